//! Rasterizes a [`ShapeDescription`] onto a `tiny_skia::Pixmap`.
//!
//! Glow is approximated the way canvas shadows are: the silhouettes are drawn
//! in the glow colour on a side layer, blurred with `image`'s fast Gaussian
//! approximation (sigma = blur / 2), and composited beneath the shapes.

use crate::geometry::{Brush, GradientStop, Glow, PathCmd, Rgba, Shape, ShapeDescription};
use image::RgbaImage;
use tiny_skia::{
    Color, FillRule, LinearGradient, Paint, Path, PathBuilder, Pixmap, PixmapPaint, RadialGradient,
    Rect, Shader, SpreadMode, Stroke, Transform,
};

/// Paint `desc` onto `pixmap`. Returns the number of shapes painted; shapes
/// whose path is degenerate are skipped.
pub fn paint_overlay(pixmap: &mut Pixmap, desc: &ShapeDescription) -> usize {
    let built: Vec<(Path, &Shape)> = desc
        .shapes
        .iter()
        .filter_map(|shape| build_path(&shape.path).map(|p| (p, shape)))
        .collect();
    if built.is_empty() {
        return 0;
    }

    if let Some(glow) = desc.glow {
        paint_glow(pixmap, &built, glow);
    }

    for (path, shape) in &built {
        if let Some(brush) = &shape.fill {
            let paint = Paint {
                shader: shader_for(brush),
                anti_alias: true,
                ..Default::default()
            };
            pixmap.fill_path(path, &paint, FillRule::Winding, Transform::identity(), None);
        }
        if let Some(stroke) = shape.stroke {
            let paint = solid_paint(stroke.color);
            let style = Stroke {
                width: stroke.width,
                ..Default::default()
            };
            pixmap.stroke_path(path, &paint, &style, Transform::identity(), None);
        }
    }

    built.len()
}

fn build_path(cmds: &[PathCmd]) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for cmd in cmds {
        match *cmd {
            PathCmd::MoveTo(p) => pb.move_to(p.x, p.y),
            PathCmd::LineTo(p) => pb.line_to(p.x, p.y),
            PathCmd::QuadTo(c, p) => pb.quad_to(c.x, c.y, p.x, p.y),
            PathCmd::CubicTo(c1, c2, p) => pb.cubic_to(c1.x, c1.y, c2.x, c2.y, p.x, p.y),
            PathCmd::Close => pb.close(),
        }
    }
    pb.finish()
}

fn color(c: Rgba) -> Color {
    Color::from_rgba8(c.r, c.g, c.b, c.a)
}

fn solid_paint(c: Rgba) -> Paint<'static> {
    let mut paint = Paint {
        anti_alias: true,
        ..Default::default()
    };
    paint.set_color(color(c));
    paint
}

fn stops(stops: &[GradientStop], remap: impl Fn(f32) -> f32) -> Vec<tiny_skia::GradientStop> {
    stops
        .iter()
        .map(|s| tiny_skia::GradientStop::new(remap(s.offset), color(s.color)))
        .collect()
}

fn fallback(stops: &[GradientStop]) -> Shader<'static> {
    let c = stops.first().map(|s| s.color).unwrap_or(Rgba::hex(0));
    Shader::SolidColor(color(c))
}

fn shader_for(brush: &Brush) -> Shader<'static> {
    match brush {
        Brush::Solid(c) => Shader::SolidColor(color(*c)),
        Brush::Linear { start, end, stops: s } => LinearGradient::new(
            tiny_skia::Point::from_xy(start.x, start.y),
            tiny_skia::Point::from_xy(end.x, end.y),
            stops(s, |o| o),
            SpreadMode::Pad,
            Transform::identity(),
        )
        .unwrap_or_else(|| fallback(s)),
        Brush::Radial {
            center,
            inner_radius,
            outer_radius,
            stops: s,
        } => {
            if *outer_radius <= 0.0 {
                return fallback(s);
            }
            // Concentric circles: an inner radius is the same as shifting
            // every stop outward and padding the first colour inside it.
            let (r0, r1) = (*inner_radius, *outer_radius);
            let c = tiny_skia::Point::from_xy(center.x, center.y);
            RadialGradient::new(
                c,
                c,
                r1,
                stops(s, |o| (r0 + o * (r1 - r0)) / r1),
                SpreadMode::Pad,
                Transform::identity(),
            )
            .unwrap_or_else(|| fallback(s))
        }
    }
}

fn paint_glow(pixmap: &mut Pixmap, built: &[(Path, &Shape)], glow: Glow) {
    let sigma = glow.blur / 2.0;
    let pad = (3.0 * sigma).ceil()
        + built
            .iter()
            .filter_map(|(_, s)| s.stroke.map(|st| st.width))
            .fold(0.0f32, f32::max);

    // Work on a layer covering only the shapes plus blur spread.
    let mut bounds: Option<Rect> = None;
    for (path, _) in built {
        let b = path.bounds();
        bounds = Some(match bounds {
            None => b,
            Some(acc) => Rect::from_ltrb(
                acc.left().min(b.left()),
                acc.top().min(b.top()),
                acc.right().max(b.right()),
                acc.bottom().max(b.bottom()),
            )
            .unwrap_or(acc),
        });
    }
    let Some(bounds) = bounds else { return };

    let x0 = ((bounds.left() - pad).floor() as i32).max(0);
    let y0 = ((bounds.top() - pad).floor() as i32).max(0);
    let x1 = ((bounds.right() + pad).ceil() as i32).min(pixmap.width() as i32);
    let y1 = ((bounds.bottom() + pad).ceil() as i32).min(pixmap.height() as i32);
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let Some(mut layer) = Pixmap::new((x1 - x0) as u32, (y1 - y0) as u32) else {
        return;
    };

    let shift = Transform::from_translate(-x0 as f32, -y0 as f32);
    let paint = solid_paint(glow.color);
    for (path, shape) in built {
        if shape.fill.is_some() {
            layer.fill_path(path, &paint, FillRule::Winding, shift, None);
        }
        if let Some(stroke) = shape.stroke {
            let style = Stroke {
                width: stroke.width,
                ..Default::default()
            };
            layer.stroke_path(path, &paint, &style, shift, None);
        }
    }

    blur_layer(&mut layer, sigma);

    pixmap.draw_pixmap(
        x0,
        y0,
        layer.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
}

/// Gaussian-blur a premultiplied layer in place. Every channel gets the same
/// kernel, so premultiplication survives.
fn blur_layer(layer: &mut Pixmap, sigma: f32) {
    if sigma <= 0.0 {
        return;
    }
    let Some(buf) = RgbaImage::from_raw(layer.width(), layer.height(), layer.data().to_vec()) else {
        return;
    };
    let blurred = image::imageops::fast_blur(&buf, sigma);
    layer.data_mut().copy_from_slice(blurred.as_raw());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::{face_mesh, WIDTH};
    use crate::geometry::{build_geometry, OverlayVariant, Point};

    fn alpha(p: &Pixmap, x: u32, y: u32) -> u8 {
        p.pixel(x, y).map(|c| c.alpha()).unwrap_or(0)
    }

    #[test]
    fn test_blur_spreads_single_pixel() {
        let mut layer = Pixmap::new(15, 15).unwrap();
        layer.fill_rect(
            Rect::from_xywh(7.0, 7.0, 1.0, 1.0).unwrap(),
            &solid_paint(Rgba::hex(0xFFFFFF)),
            Transform::identity(),
            None,
        );

        blur_layer(&mut layer, 1.0);

        let a = |x: u32, y: u32| alpha(&layer, x, y);
        assert!(a(7, 7) > 0 && a(7, 7) < 255);
        assert!(a(6, 7) > 0 && a(8, 7) > 0 && a(7, 6) > 0 && a(7, 8) > 0);
        assert_eq!(a(0, 0), 0, "blur must stay local");
    }

    #[test]
    fn test_zero_blur_leaves_layer_untouched() {
        let mut layer = Pixmap::new(4, 4).unwrap();
        layer.fill(Color::from_rgba8(10, 20, 30, 255));
        let before = layer.data().to_vec();
        blur_layer(&mut layer, 0.0);
        assert_eq!(layer.data(), &before[..]);
    }

    #[test]
    fn test_paint_collar_covers_throat() {
        let mesh = face_mesh();
        let desc = build_geometry(OverlayVariant::Collar, &mesh, WIDTH);
        let mut pixmap = Pixmap::new(WIDTH, 480).unwrap();

        assert_eq!(paint_overlay(&mut pixmap, &desc), 1);

        let chin = mesh.get(crate::landmarks::index::CHIN).unwrap();
        let cx = (WIDTH as f32 - chin.x) as u32;
        // Inside the necklace body
        assert_eq!(alpha(&pixmap, cx, (chin.y + 100.0) as u32), 255);
        // Just above the throat point: outside the shape, lit by the glow only
        let halo = alpha(&pixmap, cx, (chin.y + 12.0) as u32);
        assert!(halo > 0 && halo < 255, "halo alpha = {halo}");
        // Far corner untouched
        assert_eq!(alpha(&pixmap, 0, 0), 0);
    }

    #[test]
    fn test_empty_description_paints_nothing() {
        let mut pixmap = Pixmap::new(16, 16).unwrap();
        assert_eq!(paint_overlay(&mut pixmap, &ShapeDescription::empty()), 0);
        assert!(pixmap.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_degenerate_radial_falls_back_to_solid() {
        let brush = Brush::Radial {
            center: Point::new(0.0, 0.0),
            inner_radius: 0.0,
            outer_radius: 0.0,
            stops: vec![],
        };
        assert!(matches!(shader_for(&brush), Shader::SolidColor(_)));
    }
}
