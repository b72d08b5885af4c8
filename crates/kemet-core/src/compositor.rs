//! Per-frame compositor: mirrored camera frame, then the selected overlay.
//!
//! Each tick is independent: it reads only the current frame, the current
//! selection and whatever the provider returns for that frame. Detector and
//! geometry failures are absorbed here and never reach the caller as errors.

use crate::geometry::{build_geometry, OverlayVariant};
use crate::paint::paint_overlay;
use crate::provider::LandmarkProvider;
use image::{RgbImage, RgbaImage};
use kemet_hw::Frame;
use tiny_skia::Pixmap;

/// The raster the compositor draws into. Sized lazily from the first frame.
#[derive(Default)]
pub struct Surface {
    pixmap: Option<Pixmap>,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, |p| p.width())
    }

    pub fn height(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, |p| p.height())
    }

    pub fn pixmap(&self) -> Option<&Pixmap> {
        self.pixmap.as_ref()
    }

    /// Reallocate when the frame size changes. Returns false for a zero-sized frame.
    fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        if self.width() == width && self.height() == height && self.pixmap.is_some() {
            return true;
        }
        tracing::debug!(width, height, "resizing surface");
        self.pixmap = Pixmap::new(width, height);
        self.pixmap.is_some()
    }

    /// Resize to the frame and draw it flipped horizontally, fully opaque.
    pub fn draw_mirrored(&mut self, frame: &Frame) -> bool {
        if !self.ensure_size(frame.width, frame.height) {
            return false;
        }
        let Some(pixmap) = self.pixmap.as_mut() else {
            return false;
        };
        let w = frame.width as usize;
        let src = &frame.data;
        let dst = pixmap.data_mut();
        for (y, row) in dst.chunks_exact_mut(w * 4).enumerate() {
            let src_row = &src[y * w * 3..(y + 1) * w * 3];
            for (x, px) in src_row.chunks_exact(3).enumerate() {
                let d = (w - 1 - x) * 4;
                row[d..d + 4].copy_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
        true
    }

    /// Raw RGBA bytes (premultiplied; identical to straight alpha over an opaque frame).
    pub fn rgba(&self) -> Option<&[u8]> {
        self.pixmap.as_ref().map(|p| p.data())
    }

    /// Demultiplied copy of the surface.
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        let pixmap = self.pixmap.as_ref()?;
        let mut out = Vec::with_capacity(pixmap.data().len());
        for px in pixmap.pixels() {
            let c = px.demultiply();
            out.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        RgbaImage::from_raw(pixmap.width(), pixmap.height(), out)
    }

    /// Demultiplied copy without alpha, for JPEG export.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        let rgba = self.to_rgba_image()?;
        Some(image::DynamicImage::ImageRgba8(rgba).into_rgb8())
    }
}

/// What happened during one tick. Only used for counters and debug logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Zero-sized frame; nothing drawn.
    Blank,
    /// Frame drawn, no overlay selected.
    FrameOnly,
    /// Overlay selected but the landmark model is not loaded (yet).
    NoProvider,
    /// Detector found no face.
    NoFace,
    /// Detector failed for this frame.
    DetectFailed,
    /// Landmarks lacked an index the overlay needs.
    GeometryMissing,
    /// Loop stopped while the detector was running; result dropped.
    Discarded,
    /// Overlay painted with this many shapes.
    Overlay { shapes: usize },
}

/// Run one compositor tick.
///
/// `is_cancelled` is checked after the detector resolves so a stopped loop
/// never paints a stale result.
pub async fn render_tick<P, C>(
    frame: &Frame,
    surface: &mut Surface,
    selected: OverlayVariant,
    provider: Option<&P>,
    is_cancelled: C,
) -> TickOutcome
where
    P: LandmarkProvider,
    C: Fn() -> bool,
{
    if !surface.draw_mirrored(frame) {
        return TickOutcome::Blank;
    }
    if selected == OverlayVariant::None {
        return TickOutcome::FrameOnly;
    }
    let Some(provider) = provider else {
        return TickOutcome::NoProvider;
    };

    let detected = provider.detect(frame).await;
    if is_cancelled() {
        tracing::debug!(seq = frame.sequence, "discarding detection resolved after stop");
        return TickOutcome::Discarded;
    }

    let landmarks = match detected {
        Ok(Some(set)) => set,
        Ok(None) => return TickOutcome::NoFace,
        Err(e) => {
            tracing::debug!(seq = frame.sequence, error = %e, "detection failed; frame left bare");
            return TickOutcome::DetectFailed;
        }
    };

    let desc = build_geometry(selected, &landmarks, surface.width());
    if desc.is_empty() {
        tracing::debug!(seq = frame.sequence, overlay = %selected, "landmarks missing required indices");
        return TickOutcome::GeometryMissing;
    }

    match surface.pixmap.as_mut() {
        Some(pixmap) => TickOutcome::Overlay {
            shapes: paint_overlay(pixmap, &desc),
        },
        None => TickOutcome::Blank,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::face_mesh;
    use crate::landmarks::{index, LandmarkSet, Point3};
    use crate::provider::DetectError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Returns a fixed result and counts calls.
    struct Fixed {
        result: fn() -> Result<Option<LandmarkSet>, DetectError>,
        calls: Mutex<u32>,
    }

    impl Fixed {
        fn new(result: fn() -> Result<Option<LandmarkSet>, DetectError>) -> Self {
            Self { result, calls: Mutex::new(0) }
        }
    }

    impl LandmarkProvider for Fixed {
        fn detect(
            &self,
            _frame: &Frame,
        ) -> impl std::future::Future<Output = Result<Option<LandmarkSet>, DetectError>> + Send {
            *self.calls.lock().unwrap() += 1;
            let out = (self.result)();
            async move { out }
        }
    }

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, 0, 255 - x as u8]);
            }
        }
        Frame::from_rgb(data, width, height, 1).unwrap()
    }

    fn surface_px(s: &Surface, x: u32, y: u32) -> [u8; 4] {
        let c = s.pixmap().unwrap().pixel(x, y).unwrap();
        [c.red(), c.green(), c.blue(), c.alpha()]
    }

    #[test]
    fn test_draw_mirrored_flips_rows() {
        let frame = gradient_frame(8, 2);
        let mut surface = Surface::new();
        assert!(surface.draw_mirrored(&frame));
        assert_eq!(surface.width(), 8);
        for y in 0..2 {
            for x in 0..8u32 {
                let [r, g, b] = frame.pixel(x, y);
                assert_eq!(surface_px(&surface, 7 - x, y), [r, g, b, 255]);
            }
        }
    }

    #[test]
    fn test_surface_resizes_with_frame() {
        let mut surface = Surface::new();
        surface.draw_mirrored(&gradient_frame(8, 2));
        surface.draw_mirrored(&gradient_frame(4, 3));
        assert_eq!((surface.width(), surface.height()), (4, 3));
        assert_eq!(surface.rgba().unwrap().len(), 4 * 3 * 4);
    }

    #[tokio::test]
    async fn test_none_selected_skips_detector() {
        let provider = Fixed::new(|| Ok(Some(face_mesh())));
        let mut surface = Surface::new();
        let outcome = render_tick(
            &gradient_frame(640, 480),
            &mut surface,
            OverlayVariant::None,
            Some(&provider),
            || false,
        )
        .await;
        assert_eq!(outcome, TickOutcome::FrameOnly);
        assert_eq!(*provider.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overlay_drawn_over_mirrored_frame() {
        let provider = Fixed::new(|| Ok(Some(face_mesh())));
        let frame = gradient_frame(640, 480);
        let mut surface = Surface::new();

        let outcome = render_tick(&frame, &mut surface, OverlayVariant::FullMask, Some(&provider), || false).await;
        assert_eq!(outcome, TickOutcome::Overlay { shapes: 2 });

        // The jackal snout is painted near-black over the mirrored chin area
        let chin = face_mesh().get(index::CHIN).unwrap();
        let x = (640.0 - chin.x) as u32;
        let y = (chin.y - 20.0) as u32;
        let [r, g, b, a] = surface_px(&surface, x, y);
        assert_eq!(a, 255);
        assert!(r < 40 && g < 40 && b < 40, "expected mask fill, got {r},{g},{b}");

        // Far corner still shows the mirrored frame
        let [r, _, b, _] = surface_px(&surface, 0, 479);
        assert_eq!([r, b], [frame.pixel(639, 479)[0], frame.pixel(639, 479)[2]]);
    }

    #[tokio::test]
    async fn test_detector_failures_are_swallowed() {
        let failing = Fixed::new(|| Err(DetectError::InferenceFailed("boom".into())));
        let empty = Fixed::new(|| Ok(None));
        let partial = Fixed::new(|| {
            Ok(Some(LandmarkSet::new(vec![Point3::new(1.0, 1.0, 0.0); 50], 50).unwrap()))
        });
        let frame = gradient_frame(64, 48);
        let mut surface = Surface::new();

        let v = OverlayVariant::Collar;
        assert_eq!(render_tick(&frame, &mut surface, v, Some(&failing), || false).await, TickOutcome::DetectFailed);
        assert_eq!(render_tick(&frame, &mut surface, v, Some(&empty), || false).await, TickOutcome::NoFace);
        assert_eq!(render_tick(&frame, &mut surface, v, Some(&partial), || false).await, TickOutcome::GeometryMissing);
        assert_eq!(render_tick::<Fixed, _>(&frame, &mut surface, v, None, || false).await, TickOutcome::NoProvider);

        // Each miss still leaves the mirrored frame on the surface
        assert_eq!(surface_px(&surface, 63, 0)[0], frame.pixel(0, 0)[0]);
    }

    #[tokio::test]
    async fn test_cancelled_tick_discards_result() {
        let provider = Fixed::new(|| Ok(Some(face_mesh())));
        let frame = gradient_frame(640, 480);
        let mut surface = Surface::new();
        let stopped = AtomicBool::new(true);

        let outcome = render_tick(&frame, &mut surface, OverlayVariant::Collar, Some(&provider), || {
            stopped.load(Ordering::SeqCst)
        })
        .await;
        assert_eq!(outcome, TickOutcome::Discarded);

        let mut bare = Surface::new();
        bare.draw_mirrored(&frame);
        assert_eq!(surface.rgba(), bare.rgba(), "stale overlay must not be painted");
    }

    #[test]
    fn test_rgb_export_matches_surface() {
        let frame = gradient_frame(8, 2);
        let mut surface = Surface::new();
        surface.draw_mirrored(&frame);
        let img = surface.to_rgb_image().unwrap();
        assert_eq!(img.dimensions(), (8, 2));
        assert_eq!(img.get_pixel(7, 0).0, frame.pixel(0, 0));
    }
}
