//! Recording formats and codec negotiation.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    WebM,
    Mp4,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Self::WebM => "webm",
            Self::Mp4 => "mp4",
        }
    }

    fn default_video(self) -> VideoCodec {
        match self {
            Self::WebM => VideoCodec::Vp8,
            Self::Mp4 => VideoCodec::H264,
        }
    }

    fn default_audio(self) -> AudioCodec {
        match self {
            Self::WebM => AudioCodec::Opus,
            Self::Mp4 => AudioCodec::Aac,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp9,
    Vp8,
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Aac,
}

/// A container plus optionally pinned codecs. Unpinned codecs fall back to
/// the container's default when the encoder is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingFormat {
    pub container: Container,
    pub video: Option<VideoCodec>,
    pub audio: Option<AudioCodec>,
}

impl RecordingFormat {
    pub const fn new(container: Container, video: Option<VideoCodec>, audio: Option<AudioCodec>) -> Self {
        Self { container, video, audio }
    }

    pub fn extension(&self) -> &'static str {
        self.container.extension()
    }

    pub fn video_codec(&self) -> VideoCodec {
        self.video.unwrap_or(self.container.default_video())
    }

    pub fn audio_codec(&self) -> AudioCodec {
        self.audio.unwrap_or(self.container.default_audio())
    }
}

/// MIME-style label, e.g. `video/webm;codecs=vp9,opus`.
impl fmt::Display for RecordingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "video/{}", self.extension())?;
        let codecs: Vec<&str> = [
            self.video.map(|v| match v {
                VideoCodec::Vp9 => "vp9",
                VideoCodec::Vp8 => "vp8",
                VideoCodec::H264 => "h264",
            }),
            self.audio.map(|a| match a {
                AudioCodec::Opus => "opus",
                AudioCodec::Aac => "aac",
            }),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !codecs.is_empty() {
            write!(f, ";codecs={}", codecs.join(","))?;
        }
        Ok(())
    }
}

/// Formats in order of preference.
pub const PRIORITY: [RecordingFormat; 4] = [
    RecordingFormat::new(Container::WebM, Some(VideoCodec::Vp9), Some(AudioCodec::Opus)),
    RecordingFormat::new(Container::WebM, Some(VideoCodec::Vp8), Some(AudioCodec::Opus)),
    RecordingFormat::new(Container::WebM, None, None),
    RecordingFormat::new(Container::Mp4, None, None),
];

/// Used when nothing in [`PRIORITY`] is reported as supported.
pub const DEFAULT_FORMAT: RecordingFormat =
    RecordingFormat::new(Container::WebM, Some(VideoCodec::Vp8), None);

/// Answers whether a format can be encoded on this machine.
pub trait CodecSupport {
    fn is_supported(&self, format: &RecordingFormat) -> bool;
}

impl<F> CodecSupport for F
where
    F: Fn(&RecordingFormat) -> bool,
{
    fn is_supported(&self, format: &RecordingFormat) -> bool {
        self(format)
    }
}

/// First supported entry of [`PRIORITY`], else [`DEFAULT_FORMAT`].
pub fn negotiate(support: &impl CodecSupport) -> RecordingFormat {
    match PRIORITY.iter().find(|f| support.is_supported(f)) {
        Some(format) => {
            tracing::info!(%format, "negotiated recording format");
            *format
        }
        None => {
            tracing::warn!(format = %DEFAULT_FORMAT, "no preferred format supported; using default");
            DEFAULT_FORMAT
        }
    }
}
