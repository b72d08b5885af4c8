//! Recording sessions.
//!
//! A [`Recorder`] owns at most one active session. Frames are offered at the
//! surface refresh rate and sampled down to the encoder rate by a
//! [`FramePacer`]; encoded chunks are appended in order and concatenated into
//! the artifact on stop.

use crate::format::{negotiate, CodecSupport, RecordingFormat};
use crate::snapshot::artifact_name;
use crate::CaptureError;
use kemet_hw::AudioTrack;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Encoder frame rate.
pub const RECORDING_FPS: u32 = 30;

/// What the encoder is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio: Option<AudioTrack>,
}

/// One running encoder.
pub trait Encoder {
    /// Feed one RGBA frame of the [`EncodeSpec`] dimensions. Must not block;
    /// an encoder that cannot keep up may drop the frame.
    fn write_frame(&mut self, rgba: &[u8]) -> Result<(), CaptureError>;
    /// Chunks produced so far, without blocking.
    fn drain(&mut self) -> Vec<Vec<u8>>;
    /// Close the input, wait for the encoder and return the remaining chunks.
    fn finish(self) -> Result<Vec<Vec<u8>>, CaptureError>;
}

/// Source of codec support and encoders.
pub trait EncoderBackend {
    type Support: CodecSupport;
    type Encoder: Encoder;

    fn supported(&self) -> Result<Self::Support, CaptureError>;
    fn spawn(&self, format: &RecordingFormat, spec: &EncodeSpec) -> Result<Self::Encoder, CaptureError>;
}

/// Samples a faster frame stream at a fixed rate.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    next: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            next: None,
        }
    }

    /// True when a frame offered at `now` should be encoded.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.next {
            Some(next) if now < next => false,
            Some(next) => {
                // Fell more than one interval behind: restart the schedule
                let following = next + self.interval;
                self.next = Some(if following <= now { now + self.interval } else { following });
                true
            }
            None => {
                self.next = Some(now + self.interval);
                true
            }
        }
    }
}

/// State of the one active recording.
#[derive(Debug)]
pub struct CaptureSession {
    format: RecordingFormat,
    chunks: Vec<Vec<u8>>,
    started: Instant,
    frames: u64,
}

impl CaptureSession {
    fn new(format: RecordingFormat) -> Self {
        Self {
            format,
            chunks: Vec::new(),
            started: Instant::now(),
            frames: 0,
        }
    }

    fn append(&mut self, chunks: Vec<Vec<u8>>) {
        self.chunks.extend(chunks.into_iter().filter(|c| !c.is_empty()));
    }

    pub fn format(&self) -> RecordingFormat {
        self.format
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

struct Active<E> {
    session: CaptureSession,
    encoder: E,
    pacer: FramePacer,
}

pub struct Recorder<B: EncoderBackend> {
    backend: B,
    export_dir: PathBuf,
    active: Option<Active<B::Encoder>>,
}

impl<B: EncoderBackend> Recorder<B> {
    pub fn new(backend: B, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            export_dir: export_dir.into(),
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.session().map(CaptureSession::elapsed)
    }

    /// Negotiate a format and start the encoder.
    ///
    /// Fails with [`CaptureError::AlreadyRecording`] while a session is active,
    /// leaving it untouched, and with [`CaptureError::NoSurface`] before the
    /// first frame has sized the surface. Query or spawn failures leave no
    /// session behind.
    pub fn start(
        &mut self,
        width: u32,
        height: u32,
        audio: Option<&AudioTrack>,
    ) -> Result<RecordingFormat, CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }
        if width == 0 || height == 0 {
            return Err(CaptureError::NoSurface);
        }

        let support = self.backend.supported()?;
        let format = negotiate(&support);
        let spec = EncodeSpec {
            width,
            height,
            fps: RECORDING_FPS,
            audio: audio.cloned(),
        };
        let encoder = self.backend.spawn(&format, &spec)?;

        tracing::info!(%format, width, height, audio = spec.audio.is_some(), "recording started");
        self.active = Some(Active {
            session: CaptureSession::new(format),
            encoder,
            pacer: FramePacer::new(RECORDING_FPS),
        });
        Ok(format)
    }

    /// Offer the current surface. Returns whether it was encoded.
    ///
    /// An encoder failure ends the session and discards what it recorded.
    pub fn offer_frame(&mut self, rgba: &[u8], now: Instant) -> Result<bool, CaptureError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(false);
        };
        if !active.pacer.ready(now) {
            return Ok(false);
        }
        if let Err(e) = active.encoder.write_frame(rgba) {
            tracing::warn!(error = %e, "encoder failed; recording discarded");
            self.active = None;
            return Err(e);
        }
        active.session.frames += 1;
        let chunks = active.encoder.drain();
        active.session.append(chunks);
        Ok(true)
    }

    /// Finish the encoder and write the artifact. The session is consumed
    /// whether or not this succeeds.
    pub fn stop(&mut self) -> Result<PathBuf, CaptureError> {
        self.take_session()?.finish()
    }

    /// End the active session without waiting on the encoder. The caller
    /// runs [`FinishingSession::finish`] wherever blocking is acceptable;
    /// the recorder is free to start again immediately.
    pub fn take_session(&mut self) -> Result<FinishingSession<B::Encoder>, CaptureError> {
        let Active { session, encoder, .. } = self.active.take().ok_or(CaptureError::NotRecording)?;
        Ok(FinishingSession {
            session,
            encoder,
            export_dir: self.export_dir.clone(),
        })
    }
}

/// A stopped session whose encoder has not yet flushed.
pub struct FinishingSession<E> {
    session: CaptureSession,
    encoder: E,
    export_dir: PathBuf,
}

impl<E: Encoder> FinishingSession<E> {
    pub fn format(&self) -> RecordingFormat {
        self.session.format
    }

    /// Flush the encoder and write the artifact. Blocks on the encoder.
    pub fn finish(self) -> Result<PathBuf, CaptureError> {
        let Self {
            mut session,
            encoder,
            export_dir,
        } = self;
        session.append(encoder.finish()?);
        let path = write_artifact(&export_dir, &session)?;
        tracing::info!(
            path = %path.display(),
            bytes = session.byte_len(),
            frames = session.frames,
            "recording saved"
        );
        Ok(path)
    }
}

fn write_artifact(dir: &Path, session: &CaptureSession) -> Result<PathBuf, CaptureError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(artifact_name("kemetic-video", session.format.extension()));
    std::fs::write(&path, session.chunks.concat())?;
    Ok(path)
}

/// Recording timer label, e.g. `REC 1:05`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("REC {}:{:02}", secs / 60, secs % 60)
}
