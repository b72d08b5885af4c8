//! ffmpeg subprocess encoder.
//!
//! Raw RGBA frames are queued to a writer thread that feeds ffmpeg's stdin;
//! the muxed stream comes out on stdout and is collected in chunks by a
//! reader thread. Audio, when present, is captured by ffmpeg itself from the
//! ALSA device. Nothing here blocks the caller on the pipe.

use crate::format::{AudioCodec, CodecSupport, Container, RecordingFormat, VideoCodec};
use crate::session::{EncodeSpec, Encoder, EncoderBackend};
use crate::CaptureError;
use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

const CHUNK_SIZE: usize = 64 * 1024;
/// Frames buffered ahead of ffmpeg; further frames are dropped.
const INPUT_QUEUE: usize = 2;

fn video_encoder(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::Vp9 => "libvpx-vp9",
        VideoCodec::Vp8 => "libvpx",
        VideoCodec::H264 => "libx264",
    }
}

fn audio_encoder(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Opus => "libopus",
        AudioCodec::Aac => "aac",
    }
}

/// Encoder names reported by `ffmpeg -encoders`.
#[derive(Debug, Clone, Default)]
pub struct EncoderList(HashSet<String>);

impl EncoderList {
    /// Parse `ffmpeg -hide_banner -encoders` output.
    ///
    /// Entries look like ` V....D libvpx-vp9   libvpx VP9`; the legend above
    /// the `------` separator is skipped.
    pub fn parse(output: &str) -> Self {
        let names = output
            .lines()
            .skip_while(|l| !l.trim_start().starts_with("---"))
            .skip(1)
            .filter_map(|l| l.split_whitespace().nth(1))
            .map(str::to_string)
            .collect();
        Self(names)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

impl CodecSupport for EncoderList {
    fn is_supported(&self, format: &RecordingFormat) -> bool {
        let video = self.contains(video_encoder(format.video_codec()));
        // Pinned audio codecs must exist; unpinned ones are best effort
        let audio = format.audio.map_or(true, |a| self.contains(audio_encoder(a)));
        video && audio
    }
}

/// Spawns ffmpeg encoders.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    program: PathBuf,
}

impl FfmpegBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Full argument list for one recording.
    fn args(format: &RecordingFormat, spec: &EncodeSpec) -> Vec<String> {
        let size = format!("{}x{}", spec.width, spec.height);
        let fps = spec.fps.to_string();
        let mut args: Vec<String> = [
            "-hide_banner", "-loglevel", "error", "-y",
            "-f", "rawvideo", "-pix_fmt", "rgba",
            "-s", size.as_str(),
            "-r", fps.as_str(),
            "-i", "-",
        ]
        .map(String::from)
        .to_vec();

        if let Some(track) = &spec.audio {
            args.extend(["-f", "alsa", "-i", track.device.as_str()].map(String::from));
            args.extend(["-map", "0:v", "-map", "1:a"].map(String::from));
        }

        let video = format.video_codec();
        args.extend(["-c:v", video_encoder(video)].map(String::from));
        match video {
            VideoCodec::Vp9 | VideoCodec::Vp8 => {
                args.extend(["-deadline", "realtime", "-cpu-used", "8", "-b:v", "2M"].map(String::from));
            }
            VideoCodec::H264 => {
                args.extend(["-preset", "veryfast", "-pix_fmt", "yuv420p"].map(String::from));
            }
        }
        // Keyframe every second
        args.extend(["-g".to_string(), fps]);

        if spec.audio.is_some() {
            args.extend(["-c:a", audio_encoder(format.audio_codec()), "-shortest"].map(String::from));
        }

        match format.container {
            Container::WebM => args.extend(["-f", "webm"].map(String::from)),
            // A pipe is not seekable: fragment so the moov atom comes first
            Container::Mp4 => args.extend(["-movflags", "frag_keyframe+empty_moov", "-f", "mp4"].map(String::from)),
        }
        args.push("-".to_string());
        args
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl EncoderBackend for FfmpegBackend {
    type Support = EncoderList;
    type Encoder = FfmpegEncoder;

    fn supported(&self) -> Result<EncoderList, CaptureError> {
        let output = Command::new(&self.program)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| CaptureError::Spawn {
                program: self.program_name(),
                source,
            })?;
        if !output.status.success() {
            return Err(CaptureError::Query(format!("ffmpeg -encoders exited with {}", output.status)));
        }
        let list = EncoderList::parse(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(encoders = list.0.len(), "listed ffmpeg encoders");
        Ok(list)
    }

    fn spawn(&self, format: &RecordingFormat, spec: &EncodeSpec) -> Result<FfmpegEncoder, CaptureError> {
        let args = Self::args(format, spec);
        tracing::info!(program = %self.program.display(), args = %args.join(" "), "starting encoder");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: self.program_name(),
                source,
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) = (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            return Err(CaptureError::Encoder("encoder pipes unavailable".into()));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = std::thread::Builder::new()
            .name("kemet-encoder-out".into())
            .spawn(move || read_chunks(stdout, tx))
            .map_err(|e| abort(&mut child, e))?;
        std::thread::Builder::new()
            .name("kemet-encoder-log".into())
            .spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::warn!(target: "ffmpeg", "{line}");
                }
            })
            .map_err(|e| abort(&mut child, e))?;
        let (input, frames) = mpsc::channel(INPUT_QUEUE);
        let writer = std::thread::Builder::new()
            .name("kemet-encoder-in".into())
            .spawn(move || write_frames(stdin, frames))
            .map_err(|e| abort(&mut child, e))?;

        Ok(FfmpegEncoder {
            child,
            input: Some(input),
            writer: Some(writer),
            chunks: rx,
            reader: Some(reader),
            frame_len: spec.width as usize * spec.height as usize * 4,
        })
    }
}

/// Kill and reap a half-started encoder. Its pipes close with it, so any
/// helper thread already running exits on its own.
fn abort(child: &mut Child, e: io::Error) -> CaptureError {
    let _ = child.kill();
    let _ = child.wait();
    e.into()
}

/// Feed queued frames to ffmpeg until the queue closes or the pipe breaks.
/// Dropping `sink` on return is the EOF that makes ffmpeg flush.
fn write_frames(mut sink: impl Write, mut frames: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = frames.blocking_recv() {
        if let Err(e) = sink.write_all(&frame) {
            tracing::warn!(error = %e, "write to encoder failed");
            break;
        }
    }
}

fn read_chunks(mut stdout: impl Read, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "encoder output read failed");
                break;
            }
        }
    }
}

/// A running ffmpeg process.
pub struct FfmpegEncoder {
    child: Child,
    input: Option<mpsc::Sender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
    frame_len: usize,
}

impl FfmpegEncoder {
    fn take_ready(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.chunks.try_recv() {
            out.push(chunk);
        }
        out
    }
}

impl Encoder for FfmpegEncoder {
    /// Queue a frame without waiting on ffmpeg. A full queue drops the frame.
    fn write_frame(&mut self, rgba: &[u8]) -> Result<(), CaptureError> {
        if rgba.len() != self.frame_len {
            return Err(CaptureError::Encoder(format!(
                "frame is {} bytes, encoder expects {}",
                rgba.len(),
                self.frame_len
            )));
        }
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| CaptureError::Encoder("encoder input closed".into()))?;
        match input.try_send(rgba.to_vec()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("encoder busy, frame dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CaptureError::Encoder("encoder input closed".into())),
        }
    }

    fn drain(&mut self) -> Vec<Vec<u8>> {
        self.take_ready()
    }

    /// Blocks until ffmpeg has flushed and exited.
    fn finish(mut self) -> Result<Vec<Vec<u8>>, CaptureError> {
        // Closing the queue ends the writer, whose stdin drop is ffmpeg's EOF
        drop(self.input.take());
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        let status = self.child.wait()?;
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        let chunks = self.take_ready();
        if !status.success() {
            return Err(CaptureError::Encoder(format!("ffmpeg exited with {status}")));
        }
        Ok(chunks)
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        // Abandoned mid-recording: don't leave ffmpeg running
        if self.input.is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{negotiate, PRIORITY};
    use kemet_hw::AudioTrack;

    const ENCODERS: &str = "\
Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (codec h264)
 V....D libvpx               libvpx VP8 (codec vp8)
 A....D aac                  AAC (Advanced Audio Coding)
";

    fn spec(audio: bool) -> EncodeSpec {
        EncodeSpec {
            width: 640,
            height: 480,
            fps: 30,
            audio: audio.then(|| AudioTrack { device: "hw:1".into() }),
        }
    }

    #[test]
    fn test_parse_skips_legend() {
        let list = EncoderList::parse(ENCODERS);
        assert!(list.contains("libx264"));
        assert!(list.contains("libvpx"));
        assert!(list.contains("aac"));
        assert!(!list.contains("="));
        assert!(!list.contains("libvpx-vp9"));
    }

    #[test]
    fn test_negotiation_against_parsed_list() {
        // No vp9, no opus: the pinned entries fail, generic WebM (vp8) wins
        let list = EncoderList::parse(ENCODERS);
        assert_eq!(negotiate(&list), PRIORITY[2]);
    }

    #[test]
    fn test_args_webm_with_audio() {
        let args = FfmpegBackend::args(&PRIORITY[0], &spec(true));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s 640x480 -r 30 -i -"));
        assert!(joined.contains("-f alsa -i hw:1"));
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.ends_with("-f webm -"));
    }

    #[test]
    fn test_args_mp4_without_audio() {
        let args = FfmpegBackend::args(&PRIORITY[3], &spec(false));
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("frag_keyframe+empty_moov"));
        assert!(!joined.contains("alsa"));
        assert!(!joined.contains("-c:a"));
    }

    #[test]
    fn test_read_chunks_splits_stream() {
        let stream: Vec<u8> = (0..150 * 1024).map(|i| (i % 251) as u8).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_chunks(std::io::Cursor::new(stream.clone()), tx);

        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![CHUNK_SIZE, CHUNK_SIZE, 150 * 1024 - 2 * CHUNK_SIZE]);
        assert_eq!(chunks.concat(), stream);
    }

    #[test]
    fn test_write_frames_in_order() {
        let (tx, rx) = mpsc::channel(INPUT_QUEUE);
        tx.try_send(vec![1, 2]).unwrap();
        tx.try_send(vec![3]).unwrap();
        drop(tx);
        let mut sink = Vec::new();
        write_frames(&mut sink, rx);
        assert_eq!(sink, vec![1, 2, 3]);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_frames_stops_on_broken_pipe() {
        let (tx, rx) = mpsc::channel(INPUT_QUEUE);
        tx.try_send(vec![0; 4]).unwrap();
        write_frames(BrokenPipe, rx);
        // The writer hung up, so the queue reports closed to the render side
        assert!(matches!(tx.try_send(vec![0; 4]), Err(mpsc::error::TrySendError::Closed(_))));
    }

    #[test]
    fn test_write_frame_never_waits_on_stalled_encoder() {
        // Nobody consumes the queue: a stalled ffmpeg
        let (input, mut frames) = mpsc::channel(INPUT_QUEUE);
        let mut encoder = FfmpegEncoder {
            child: Command::new("sleep").arg("30").spawn().unwrap(),
            input: Some(input),
            writer: None,
            chunks: mpsc::unbounded_channel().1,
            reader: None,
            frame_len: 4,
        };
        let start = std::time::Instant::now();
        for _ in 0..100 {
            encoder.write_frame(&[0; 4]).unwrap();
        }
        assert!(start.elapsed() < std::time::Duration::from_secs(1));

        let mut queued = 0;
        while frames.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, INPUT_QUEUE);
        // Drop kills the child
        drop(encoder);
    }

    #[test]
    fn test_abort_reaps_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let err = abort(&mut child, io::Error::new(io::ErrorKind::Other, "no threads"));
        assert!(matches!(err, CaptureError::Io(_)));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let backend = FfmpegBackend::new("/nonexistent/kemet-ffmpeg");
        assert!(matches!(backend.supported(), Err(CaptureError::Spawn { .. })));
    }
}
