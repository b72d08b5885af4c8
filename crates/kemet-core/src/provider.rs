//! The landmark provider seam.

use crate::landmarks::{LandmarkError, LandmarkSet};
use kemet_hw::Frame;
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("model file not found: {0} (place the face detector and face-mesh ONNX models in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("malformed landmarks: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("landmark provider is not running")]
    Unavailable,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Something that finds at most one face in a frame.
///
/// Implementations may be slow; the compositor awaits each call before the
/// frame is finished, so detector latency directly sets the frame rate.
pub trait LandmarkProvider: Send + Sync {
    fn detect(
        &self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Option<LandmarkSet>, DetectError>> + Send;
}
