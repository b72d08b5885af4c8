//! kemet-core: Overlay engine.
//!
//! Face detection and face-mesh landmarks via ONNX Runtime, procedural regalia geometry,
//! tiny-skia painting and the per-frame compositor.

pub mod catalog;
pub mod compositor;
pub mod detector;
pub mod geometry;
pub mod landmarker;
pub mod landmarks;
pub mod paint;
pub mod provider;

pub use compositor::{render_tick, Surface, TickOutcome};
pub use geometry::{build_geometry, OverlayVariant, ShapeDescription, UnknownOverlay};
pub use detector::{FaceBox, FaceDetector};
pub use landmarker::{FaceLandmarker, FaceMesh, Roi};
pub use landmarks::{LandmarkError, LandmarkSet, Point3};
pub use provider::{DetectError, LandmarkProvider};
