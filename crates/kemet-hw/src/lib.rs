//! kemet-hw: Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access, conversion of raw buffers to packed
//! RGB frames, and the dedicated camera feed thread.

pub mod camera;
pub mod feed;
pub mod frame;

pub use camera::{AudioTrack, Camera, CameraError, CameraStream, FrameSource, PixelFormat};
pub use feed::{spawn_feed, CameraFeed};
pub use frame::Frame;
