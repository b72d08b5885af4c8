//! JPEG export of the composited surface and of raw frames.

use crate::CaptureError;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use kemet_core::Surface;
use kemet_hw::Frame;
use std::path::{Path, PathBuf};

/// Quality of exported snapshots.
pub const SNAPSHOT_QUALITY: u8 = 90;
/// Quality of raw frames sent to the generative service.
pub const RAW_FRAME_QUALITY: u8 = 80;

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out)
}

/// `<prefix>-<unix-millis>.<ext>`
pub fn artifact_name(prefix: &str, ext: &str) -> String {
    format!("{prefix}-{}.{ext}", chrono::Utc::now().timestamp_millis())
}

/// Write the surface as it is currently displayed (mirrored, with overlay).
pub fn save_snapshot(surface: &Surface, export_dir: &Path) -> Result<PathBuf, CaptureError> {
    let image = surface.to_rgb_image().ok_or(CaptureError::NoSurface)?;
    let jpeg = encode_jpeg(&image, SNAPSHOT_QUALITY)?;

    std::fs::create_dir_all(export_dir)?;
    let path = export_dir.join(artifact_name("kemetic-snap", "jpg"));
    std::fs::write(&path, jpeg)?;
    tracing::info!(path = %path.display(), "snapshot saved");
    Ok(path)
}

/// Encode a camera frame as captured: unmirrored, no overlay.
pub fn frame_jpeg(frame: &Frame) -> Result<Vec<u8>, CaptureError> {
    let image = RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
        .ok_or(CaptureError::NoSurface)?;
    encode_jpeg(&image, RAW_FRAME_QUALITY)
}
