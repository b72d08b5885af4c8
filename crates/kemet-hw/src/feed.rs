//! Camera feed thread.
//!
//! Opens the camera on a dedicated OS thread and forwards frames to the async
//! render loop over a bounded channel. The first message is either the first
//! frame or the acquisition error.

use crate::camera::{AudioTrack, CameraError, FrameSource};
use crate::frame::Frame;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Receiving half of a running camera feed.
///
/// Dropping it makes the feed thread exit on its next send, which drops the
/// source and releases the device.
pub struct CameraFeed {
    frames: mpsc::Receiver<Result<Frame, CameraError>>,
    audio: oneshot::Receiver<Vec<AudioTrack>>,
    audio_tracks: Vec<AudioTrack>,
}

impl CameraFeed {
    /// Next frame in arrival order. `None` once the feed thread has exited.
    pub async fn recv(&mut self) -> Option<Result<Frame, CameraError>> {
        let next = self.frames.recv().await;
        if let Ok(tracks) = self.audio.try_recv() {
            self.audio_tracks = tracks;
        }
        next
    }

    /// Next frame if one is already queued, without waiting.
    pub fn try_recv(&mut self) -> Result<Result<Frame, CameraError>, TryRecvError> {
        let next = self.frames.try_recv();
        if let Ok(tracks) = self.audio.try_recv() {
            self.audio_tracks = tracks;
        }
        next
    }

    /// Audio tracks reported by the source once it opened (empty until then).
    pub fn audio_tracks(&self) -> &[AudioTrack] {
        &self.audio_tracks
    }
}

/// Spawn the feed thread. `open` runs on that thread so a slow or failing
/// device never blocks the async runtime.
pub fn spawn_feed<S, F>(open: F, capacity: usize) -> CameraFeed
where
    S: FrameSource + 'static,
    F: FnOnce() -> Result<S, CameraError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (audio_tx, audio_rx) = oneshot::channel();

    let spawned = std::thread::Builder::new()
        .name("kemet-camera".into())
        .spawn(move || {
            let mut source = match open() {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "camera acquisition failed");
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            let _ = audio_tx.send(source.audio_tracks().to_vec());
            tracing::info!("camera feed started");

            let mut dropped = 0u64;
            loop {
                let item = source.next_frame();
                let fatal = item.is_err();
                match tx.try_send(item) {
                    Ok(()) => {}
                    Err(TrySendError::Full(Ok(_))) => {
                        // Render loop is busy with a tick; the newest frame is lost.
                        dropped += 1;
                    }
                    Err(TrySendError::Full(Err(e))) => {
                        // Camera loss must reach the loop even when it is behind.
                        let _ = tx.blocking_send(Err(e));
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
                if fatal {
                    tracing::warn!("camera capture failed; feed stopping");
                    break;
                }
            }
            tracing::info!(dropped, "camera feed stopped");
        });

    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn camera thread");
    }

    CameraFeed {
        frames: rx,
        audio: audio_rx,
        audio_tracks: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        next: u32,
        limit: u32,
    }

    impl FrameSource for Counting {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if self.next >= self.limit {
                return Err(CameraError::CaptureFailed("unplugged".into()));
            }
            self.next += 1;
            Frame::from_rgb(vec![0u8; 12], 2, 2, self.next)
                .map_err(|e| CameraError::CaptureFailed(e.to_string()))
        }

        fn audio_tracks(&self) -> &[AudioTrack] {
            static TRACKS: std::sync::OnceLock<Vec<AudioTrack>> = std::sync::OnceLock::new();
            TRACKS.get_or_init(|| vec![AudioTrack { device: "hw:1,0".into() }])
        }
    }

    #[tokio::test]
    async fn test_open_failure_is_first_message() {
        let mut feed = spawn_feed(
            || -> Result<Counting, CameraError> {
                Err(CameraError::PermissionDenied("/dev/video0".into()))
            },
            2,
        );
        assert!(matches!(
            feed.recv().await,
            Some(Err(CameraError::PermissionDenied(_)))
        ));
        assert!(feed.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order_then_loss() {
        let mut feed = spawn_feed(|| Ok(Counting { next: 0, limit: 3 }), 8);
        let mut seqs = Vec::new();
        while let Some(item) = feed.recv().await {
            match item {
                Ok(frame) => seqs.push(frame.sequence),
                Err(e) => {
                    assert!(matches!(e, CameraError::CaptureFailed(_)));
                    break;
                }
            }
        }
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(feed.recv().await.is_none());
        assert!(matches!(feed.try_recv(), Err(TryRecvError::Disconnected)));
        assert_eq!(feed.audio_tracks(), &[AudioTrack { device: "hw:1,0".into() }]);
    }
}
