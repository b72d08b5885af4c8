//! Landmark model thread.
//!
//! ONNX inference is blocking and the session needs `&mut`, so the model lives
//! on its own OS thread and the render loop talks to it over channels.

use kemet_core::{DetectError, FaceLandmarker, LandmarkProvider, LandmarkSet};
use kemet_hw::Frame;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

struct DetectRequest {
    frame: Frame,
    reply: oneshot::Sender<Result<Option<LandmarkSet>, DetectError>>,
}

/// Clone-safe handle to the landmarker thread.
#[derive(Clone)]
pub struct LandmarkerHandle {
    tx: mpsc::Sender<DetectRequest>,
}

impl LandmarkProvider for LandmarkerHandle {
    fn detect(&self, frame: &Frame) -> impl Future<Output = Result<Option<LandmarkSet>, DetectError>> + Send {
        let tx = self.tx.clone();
        let frame = frame.clone();
        async move {
            let (reply, reply_rx) = oneshot::channel();
            tx.send(DetectRequest { frame, reply })
                .await
                .map_err(|_| DetectError::Unavailable)?;
            reply_rx.await.map_err(|_| DetectError::Unavailable)?
        }
    }
}

/// Load the detector and mesh models and start the landmarker thread. Fails
/// fast if either model cannot be loaded.
pub fn spawn_landmarker(detector_path: &str, mesh_path: &str) -> Result<LandmarkerHandle, DetectError> {
    let mut landmarker = FaceLandmarker::load(detector_path, mesh_path)?;
    let (tx, mut rx) = mpsc::channel::<DetectRequest>(1);

    std::thread::Builder::new()
        .name("kemet-landmarker".into())
        .spawn(move || {
            tracing::info!("landmarker thread started");
            while let Some(DetectRequest { frame, reply }) = rx.blocking_recv() {
                let _ = reply.send(landmarker.detect(&frame));
            }
            tracing::info!("landmarker thread exiting");
        })
        .map_err(|e| DetectError::InferenceFailed(format!("failed to spawn landmarker thread: {e}")))?;

    Ok(LandmarkerHandle { tx })
}

/// Call `attempt` until it succeeds, retrying only while the model file is
/// missing. Returns `None` when retries run out or loading fails outright.
pub async fn load_with_retry<T, F>(attempt: F, retries: u32, interval: Duration) -> Option<T>
where
    T: Send + 'static,
    F: Fn() -> Result<T, DetectError> + Send + Sync + 'static,
{
    let attempt = Arc::new(attempt);
    for n in 0..=retries {
        let once = Arc::clone(&attempt);
        let result = match tokio::task::spawn_blocking(move || once()).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "model loader panicked");
                return None;
            }
        };
        match result {
            Ok(loaded) => return Some(loaded),
            Err(DetectError::ModelNotFound(path)) if n < retries => {
                tracing::debug!(path, attempt = n + 1, "face model not present yet");
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "face models unavailable; continuing without overlays");
                return None;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_until_model_appears() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let loaded = load_with_retry(
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(DetectError::ModelNotFound("face_landmark.onnx".into()))
                } else {
                    Ok(42u32)
                }
            },
            5,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(loaded, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let loaded: Option<u32> = load_with_retry(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DetectError::ModelNotFound("face_landmark.onnx".into()))
            },
            2,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(loaded, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let loaded: Option<u32> = load_with_retry(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DetectError::InferenceFailed("corrupt model".into()))
            },
            5,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(loaded, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_model_fails_fast() {
        let err = spawn_landmarker("/nonexistent/det_10g.onnx", "/nonexistent/face_landmark.onnx").err();
        assert!(matches!(err, Some(DetectError::ModelNotFound(p)) if p.ends_with("det_10g.onnx")));
    }
}
