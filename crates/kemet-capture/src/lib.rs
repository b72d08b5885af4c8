//! kemet-capture: Snapshot and recording capture.
//!
//! Exports the composited surface as JPEG snapshots, and records it to
//! WebM/MP4 through a negotiated encoder backend (ffmpeg in production).

pub mod ffmpeg;
pub mod format;
pub mod session;
pub mod snapshot;

pub use ffmpeg::FfmpegBackend;
pub use format::{negotiate, CodecSupport, Container, RecordingFormat};
pub use session::{format_elapsed, EncodeSpec, Encoder, EncoderBackend, FinishingSession, FramePacer, Recorder};
pub use snapshot::{frame_jpeg, save_snapshot};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
    #[error("nothing has been drawn yet")]
    NoSurface,
    #[error("encoder query failed: {0}")]
    Query(String),
    #[error("failed to start encoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder failed: {0}")]
    Encoder(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}
