//! Overlay geometry: landmark set + variant → shape description.
//!
//! Pure and deterministic. Every landmark is mirrored into surface space
//! (`x' = surface_width - x`) before use, because the compositor draws the
//! camera frame flipped. Offsets are absolute pixels and do not scale with
//! face size.

use crate::landmarks::{index, LandmarkSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn offset(self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Straight (non-premultiplied) RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    /// Opaque colour from `0xRRGGBB`.
    pub const fn hex(rgb: u32) -> Self {
        Self {
            r: (rgb >> 16) as u8,
            g: (rgb >> 8) as u8,
            b: rgb as u8,
            a: 255,
        }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathCmd {
    MoveTo(Point),
    LineTo(Point),
    QuadTo(Point, Point),
    CubicTo(Point, Point, Point),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Rgba,
}

const fn stop(offset: f32, color: Rgba) -> GradientStop {
    GradientStop { offset, color }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Brush {
    Solid(Rgba),
    Linear {
        start: Point,
        end: Point,
        stops: Vec<GradientStop>,
    },
    /// Concentric radial gradient; inside `inner_radius` the first stop is padded.
    Radial {
        center: Point,
        inner_radius: f32,
        outer_radius: f32,
        stops: Vec<GradientStop>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub color: Rgba,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub path: Vec<PathCmd>,
    pub fill: Option<Brush>,
    pub stroke: Option<StrokeStyle>,
}

/// Soft shadow painted beneath every shape of a description.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glow {
    pub color: Rgba,
    /// Blur extent in pixels, same meaning as a canvas `shadowBlur`.
    pub blur: f32,
}

/// Everything needed to paint one overlay for one frame. Shapes paint in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShapeDescription {
    pub glow: Option<Glow>,
    pub shapes: Vec<Shape>,
}

impl ShapeDescription {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// The selectable regalia. Immutable; only the selection changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverlayVariant {
    /// Striped nemes headcloth.
    HeaddressStriped,
    /// Flat-topped blue cap crown.
    HeaddressCrown,
    /// Broad usekh collar.
    Collar,
    /// Kohl eye paint.
    FacialPaint,
    /// Jackal mask.
    FullMask,
    #[default]
    None,
}

impl OverlayVariant {
    pub const ALL: [OverlayVariant; 6] = [
        OverlayVariant::HeaddressStriped,
        OverlayVariant::HeaddressCrown,
        OverlayVariant::Collar,
        OverlayVariant::FacialPaint,
        OverlayVariant::FullMask,
        OverlayVariant::None,
    ];

    /// Stable identifier, also the catalog key.
    pub fn id(self) -> &'static str {
        match self {
            OverlayVariant::HeaddressStriped => "nemes",
            OverlayVariant::HeaddressCrown => "nefertiti",
            OverlayVariant::Collar => "collar",
            OverlayVariant::FacialPaint => "makeup",
            OverlayVariant::FullMask => "anubis",
            OverlayVariant::None => "none",
        }
    }

    /// Canonical indices this variant reads.
    pub fn required_indices(self) -> &'static [usize] {
        const STRIPED: [usize; 4] = [
            index::FOREHEAD_TOP,
            index::LEFT_CHEEK,
            index::RIGHT_CHEEK,
            index::CHIN,
        ];
        const CROWN: [usize; 3] = [index::FOREHEAD_TOP, index::LEFT_TEMPLE, index::RIGHT_TEMPLE];
        const COLLAR: [usize; 1] = [index::CHIN];
        const PAINT: [usize; 12] = [
            33, 160, 158, 133, 153, 144, 362, 385, 387, 263, 373, 380,
        ];
        match self {
            OverlayVariant::HeaddressStriped | OverlayVariant::FullMask => &STRIPED,
            OverlayVariant::HeaddressCrown => &CROWN,
            OverlayVariant::Collar => &COLLAR,
            OverlayVariant::FacialPaint => &PAINT,
            OverlayVariant::None => &[],
        }
    }
}

impl fmt::Display for OverlayVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown overlay '{0}' (expected one of: nemes, nefertiti, collar, makeup, anubis, none)")]
pub struct UnknownOverlay(pub String);

impl FromStr for OverlayVariant {
    type Err = UnknownOverlay;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        OverlayVariant::ALL
            .into_iter()
            .find(|v| v.id() == s)
            .ok_or(UnknownOverlay(s))
    }
}

// --- Palette ---
const GOLDENROD: Rgba = Rgba::hex(0xDAA520);
const MIDNIGHT_BLUE: Rgba = Rgba::hex(0x191970);
const DARK_GOLDENROD: Rgba = Rgba::hex(0xB8860B);
const GOLD: Rgba = Rgba::hex(0xFFD700);
const LAPIS_DEEP: Rgba = Rgba::hex(0x1E3A8A);
const LAPIS_LIGHT: Rgba = Rgba::hex(0x3B82F6);
const CARNELIAN: Rgba = Rgba::hex(0xEF4444);
const TURQUOISE: Rgba = Rgba::hex(0x10B981);
const AMBER: Rgba = Rgba::hex(0xF59E0B);
const KOHL: Rgba = Rgba::hex(0x000000).with_alpha(179);
const JACKAL_BLACK: Rgba = Rgba::hex(0x111111);

const GLOW_GOLD: Glow = Glow { color: Rgba::hex(0xFFD700).with_alpha(204), blur: 25.0 };
const GLOW_BLUE: Glow = Glow { color: Rgba::hex(0x3B82F6).with_alpha(204), blur: 30.0 };
const GLOW_AMBER: Glow = Glow { color: Rgba::hex(0xF59E0B).with_alpha(179), blur: 25.0 };
const GLOW_TEAL: Glow = Glow { color: Rgba::hex(0x2DD4BF).with_alpha(128), blur: 15.0 };
const GLOW_PURPLE: Glow = Glow { color: Rgba::hex(0x9333EA).with_alpha(204), blur: 35.0 };

// --- Offsets (pixels) ---
const NEMES_CROWN_RISE: f32 = 120.0;
const NEMES_DROP_BELOW_CHIN: f32 = 100.0;
const CROWN_HEIGHT: f32 = 220.0;
const CROWN_BROW_RISE: f32 = 20.0;
const CROWN_FLARE: f32 = 10.0;
const CROWN_BROW_STROKE: f32 = 20.0;
const COLLAR_SHOULDER_DX: f32 = 120.0;
const COLLAR_SHOULDER_DY: f32 = 150.0;
const COLLAR_GRADIENT_DROP: f32 = 80.0;
const FLICK_CONTROL_DX: f32 = 40.0;
const FLICK_END_DX: f32 = 60.0;
const MASK_BROW_RISE: f32 = 50.0;
const MASK_EAR_RISE: f32 = 200.0;

/// Mirrored anchor lookup.
struct Anchors<'a> {
    set: &'a LandmarkSet,
    width: f32,
}

impl Anchors<'_> {
    fn pt(&self, idx: usize) -> Option<Point> {
        self.set.get(idx).map(|p| Point::new(self.width - p.x, p.y))
    }
}

/// Build the shapes for `variant` from one landmark set.
///
/// Returns an empty description for [`OverlayVariant::None`] or when any
/// required index is missing from the set.
pub fn build_geometry(
    variant: OverlayVariant,
    landmarks: &LandmarkSet,
    surface_width: u32,
) -> ShapeDescription {
    let anchors = Anchors {
        set: landmarks,
        width: surface_width as f32,
    };
    let built = match variant {
        OverlayVariant::HeaddressStriped => headdress_striped(&anchors),
        OverlayVariant::HeaddressCrown => headdress_crown(&anchors),
        OverlayVariant::Collar => collar(&anchors),
        OverlayVariant::FacialPaint => facial_paint(&anchors),
        OverlayVariant::FullMask => full_mask(&anchors),
        OverlayVariant::None => None,
    };
    built.unwrap_or_default()
}

fn headdress_striped(a: &Anchors) -> Option<ShapeDescription> {
    let top = a.pt(index::FOREHEAD_TOP)?;
    let left = a.pt(index::LEFT_CHEEK)?;
    let right = a.pt(index::RIGHT_CHEEK)?;
    let chin = a.pt(index::CHIN)?;

    let crown = top.offset(0.0, -NEMES_CROWN_RISE);
    let hem_y = chin.y + NEMES_DROP_BELOW_CHIN;
    let path = vec![
        PathCmd::MoveTo(crown),
        PathCmd::CubicTo(
            Point::new(left.x - 80.0, top.y),
            Point::new(left.x - 60.0, chin.y),
            Point::new(left.x - 20.0, hem_y),
        ),
        PathCmd::LineTo(Point::new(right.x + 20.0, hem_y)),
        PathCmd::CubicTo(
            Point::new(right.x + 60.0, chin.y),
            Point::new(right.x + 80.0, top.y),
            crown,
        ),
        PathCmd::Close,
    ];

    Some(ShapeDescription {
        glow: Some(GLOW_GOLD),
        shapes: vec![Shape {
            path,
            fill: Some(Brush::Linear {
                start: Point::new(left.x, top.y),
                end: Point::new(right.x, chin.y),
                stops: vec![
                    stop(0.0, GOLDENROD),
                    stop(0.2, MIDNIGHT_BLUE),
                    stop(0.4, GOLDENROD),
                    stop(0.6, MIDNIGHT_BLUE),
                    stop(1.0, GOLDENROD),
                ],
            }),
            stroke: Some(StrokeStyle { color: DARK_GOLDENROD, width: 5.0 }),
        }],
    })
}

fn headdress_crown(a: &Anchors) -> Option<ShapeDescription> {
    let top = a.pt(index::FOREHEAD_TOP)?;
    let left = a.pt(index::LEFT_TEMPLE)?;
    let right = a.pt(index::RIGHT_TEMPLE)?;

    let brow_y = top.y - CROWN_BROW_RISE;
    let cap_y = top.y - CROWN_HEIGHT;
    let body = vec![
        PathCmd::MoveTo(Point::new(left.x, brow_y)),
        PathCmd::LineTo(Point::new(left.x - CROWN_FLARE, cap_y)),
        PathCmd::LineTo(Point::new(right.x + CROWN_FLARE, cap_y)),
        PathCmd::LineTo(Point::new(right.x, brow_y)),
        PathCmd::Close,
    ];
    let band = vec![
        PathCmd::MoveTo(Point::new(left.x, brow_y)),
        PathCmd::LineTo(Point::new(right.x, brow_y)),
    ];

    Some(ShapeDescription {
        glow: Some(GLOW_BLUE),
        shapes: vec![
            Shape {
                path: body,
                fill: Some(Brush::Linear {
                    start: Point::new(left.x, top.y),
                    end: Point::new(right.x, top.y),
                    stops: vec![
                        stop(0.0, LAPIS_DEEP),
                        stop(0.5, LAPIS_LIGHT),
                        stop(1.0, LAPIS_DEEP),
                    ],
                }),
                stroke: None,
            },
            Shape {
                path: band,
                fill: None,
                stroke: Some(StrokeStyle { color: GOLD, width: CROWN_BROW_STROKE }),
            },
        ],
    })
}

fn collar(a: &Anchors) -> Option<ShapeDescription> {
    let neck = a.pt(index::CHIN)?;

    let l_shoulder = neck.offset(-COLLAR_SHOULDER_DX, COLLAR_SHOULDER_DY);
    let r_shoulder = neck.offset(COLLAR_SHOULDER_DX, COLLAR_SHOULDER_DY);
    let throat = neck.offset(0.0, 20.0);
    let path = vec![
        PathCmd::MoveTo(throat),
        PathCmd::CubicTo(
            Point::new(l_shoulder.x, neck.y + 40.0),
            l_shoulder,
            Point::new(neck.x, l_shoulder.y + 20.0),
        ),
        PathCmd::CubicTo(
            Point::new(r_shoulder.x, l_shoulder.y),
            Point::new(r_shoulder.x, neck.y + 40.0),
            throat,
        ),
        PathCmd::Close,
    ];

    Some(ShapeDescription {
        glow: Some(GLOW_AMBER),
        shapes: vec![Shape {
            path,
            fill: Some(Brush::Radial {
                center: neck.offset(0.0, COLLAR_GRADIENT_DROP),
                inner_radius: 10.0,
                outer_radius: 120.0,
                stops: vec![
                    stop(0.0, CARNELIAN),
                    stop(0.3, LAPIS_LIGHT),
                    stop(0.6, TURQUOISE),
                    stop(1.0, AMBER),
                ],
            }),
            stroke: Some(StrokeStyle { color: GOLD, width: 3.0 }),
        }],
    })
}

fn facial_paint(a: &Anchors) -> Option<ShapeDescription> {
    let kohl = StrokeStyle { color: KOHL, width: 4.0 };
    let mut shapes = Vec::with_capacity(4);

    for (contour, outer) in [
        (index::LEFT_EYE, index::LEFT_EYE_OUTER),
        (index::RIGHT_EYE, index::RIGHT_EYE_OUTER),
    ] {
        let mut path = Vec::with_capacity(contour.len() + 1);
        for (i, &idx) in contour.iter().enumerate() {
            let p = a.pt(idx)?;
            path.push(if i == 0 { PathCmd::MoveTo(p) } else { PathCmd::LineTo(p) });
        }
        path.push(PathCmd::Close);
        shapes.push(Shape { path, fill: None, stroke: Some(kohl) });

        // Flick points away from the face centre: right half sweeps right.
        let corner = a.pt(outer)?;
        let dir = if corner.x > a.width / 2.0 { 1.0 } else { -1.0 };
        shapes.push(Shape {
            path: vec![
                PathCmd::MoveTo(corner),
                PathCmd::QuadTo(
                    corner.offset(FLICK_CONTROL_DX * dir, -5.0),
                    corner.offset(FLICK_END_DX * dir, -20.0),
                ),
            ],
            fill: None,
            stroke: Some(kohl),
        });
    }

    Some(ShapeDescription { glow: Some(GLOW_TEAL), shapes })
}

fn full_mask(a: &Anchors) -> Option<ShapeDescription> {
    let top = a.pt(index::FOREHEAD_TOP)?;
    let chin = a.pt(index::CHIN)?;
    let lc = a.pt(index::LEFT_CHEEK)?;
    let rc = a.pt(index::RIGHT_CHEEK)?;

    let brow_y = top.y - MASK_BROW_RISE;
    let ear_y = top.y - MASK_EAR_RISE;
    let outline = Some(StrokeStyle { color: GOLD, width: 2.0 });

    let snout = vec![
        PathCmd::MoveTo(Point::new(lc.x, brow_y)),
        PathCmd::LineTo(Point::new(rc.x, brow_y)),
        PathCmd::LineTo(Point::new(rc.x - 20.0, chin.y)),
        PathCmd::LineTo(Point::new(chin.x, chin.y + 40.0)),
        PathCmd::LineTo(Point::new(lc.x + 20.0, chin.y)),
        PathCmd::Close,
    ];
    let ears = vec![
        PathCmd::MoveTo(Point::new(lc.x, brow_y)),
        PathCmd::LineTo(Point::new(lc.x - 40.0, ear_y)),
        PathCmd::LineTo(Point::new(top.x, brow_y)),
        PathCmd::LineTo(Point::new(rc.x + 40.0, ear_y)),
        PathCmd::LineTo(Point::new(rc.x, brow_y)),
        PathCmd::Close,
    ];

    Some(ShapeDescription {
        glow: Some(GLOW_PURPLE),
        shapes: vec![
            Shape { path: snout, fill: Some(Brush::Solid(JACKAL_BLACK)), stroke: outline },
            Shape { path: ears, fill: Some(Brush::Solid(JACKAL_BLACK)), stroke: outline },
        ],
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::landmarks::{Point3, MESH_POINT_COUNT};

    pub(crate) const WIDTH: u32 = 640;

    /// A plausible frontal face in a 640x480 frame (provider space, unmirrored).
    pub(crate) fn face_mesh() -> LandmarkSet {
        let mut pts = vec![Point3::new(320.0, 240.0, 0.0); MESH_POINT_COUNT];
        let mut set = |i: usize, x: f32, y: f32| pts[i] = Point3::new(x, y, 0.0);
        set(index::FOREHEAD_TOP, 320.0, 140.0);
        set(index::CHIN, 322.0, 330.0);
        set(index::LEFT_CHEEK, 250.0, 240.0);
        set(index::RIGHT_CHEEK, 390.0, 240.0);
        set(index::LEFT_TEMPLE, 255.0, 190.0);
        set(index::RIGHT_TEMPLE, 385.0, 190.0);
        for (k, &i) in index::LEFT_EYE.iter().enumerate() {
            set(i, 270.0 + k as f32 * 5.0, 200.0 + (k % 3) as f32);
        }
        for (k, &i) in index::RIGHT_EYE.iter().enumerate() {
            set(i, 345.0 + k as f32 * 5.0, 200.0 + (k % 3) as f32);
        }
        LandmarkSet::from_mesh(pts).unwrap()
    }

    fn first_move(desc: &ShapeDescription) -> Point {
        match desc.shapes[0].path[0] {
            PathCmd::MoveTo(p) => p,
            other => panic!("expected MoveTo, got {other:?}"),
        }
    }

    #[test]
    fn test_every_variant_builds_and_is_deterministic() {
        let mesh = face_mesh();
        for variant in OverlayVariant::ALL {
            let a = build_geometry(variant, &mesh, WIDTH);
            let b = build_geometry(variant, &mesh, WIDTH);
            assert_eq!(a, b, "{variant} not deterministic");
            if variant == OverlayVariant::None {
                assert!(a.is_empty());
            } else {
                assert!(!a.is_empty(), "{variant} built nothing");
                assert!(a.glow.is_some(), "{variant} has no glow");
            }
        }
    }

    #[test]
    fn test_missing_index_yields_empty() {
        // 100-point mesh: every overlay needs at least the chin (152)
        let small = LandmarkSet::new(vec![Point3::new(10.0, 10.0, 0.0); 100], 100).unwrap();
        for variant in OverlayVariant::ALL {
            assert!(build_geometry(variant, &small, WIDTH).is_empty(), "{variant}");
        }
    }

    #[test]
    fn test_partially_covered_mesh() {
        // 200 points cover the chin but not the cheeks, temples or eyes
        let mid = LandmarkSet::new(vec![Point3::new(10.0, 10.0, 0.0); 200], 200).unwrap();
        assert!(!build_geometry(OverlayVariant::Collar, &mid, WIDTH).is_empty());
        assert!(build_geometry(OverlayVariant::HeaddressStriped, &mid, WIDTH).is_empty());
        assert!(build_geometry(OverlayVariant::FacialPaint, &mid, WIDTH).is_empty());
    }

    #[test]
    fn test_anchor_x_is_mirrored() {
        let mesh = face_mesh();
        let chin = mesh.get(index::CHIN).unwrap();
        let desc = build_geometry(OverlayVariant::Collar, &mesh, WIDTH);
        let throat = first_move(&desc);
        assert_eq!(throat.x, WIDTH as f32 - chin.x);
        assert_eq!(throat.y, chin.y + 20.0);

        let top = mesh.get(index::FOREHEAD_TOP).unwrap();
        let nemes = build_geometry(OverlayVariant::HeaddressStriped, &mesh, WIDTH);
        let crown = first_move(&nemes);
        assert_eq!(crown.x, WIDTH as f32 - top.x);
        assert_eq!(crown.y, top.y - NEMES_CROWN_RISE);
    }

    #[test]
    fn test_mirroring_depends_on_surface_width() {
        let mesh = face_mesh();
        let narrow = first_move(&build_geometry(OverlayVariant::Collar, &mesh, 640));
        let wide = first_move(&build_geometry(OverlayVariant::Collar, &mesh, 1280));
        assert_eq!(wide.x - narrow.x, 640.0);
    }

    #[test]
    fn test_flicks_point_outward() {
        let mesh = face_mesh();
        let desc = build_geometry(OverlayVariant::FacialPaint, &mesh, WIDTH);
        assert_eq!(desc.shapes.len(), 4);
        for flick in [&desc.shapes[1], &desc.shapes[3]] {
            let (start, end) = match (flick.path[0], flick.path[1]) {
                (PathCmd::MoveTo(s), PathCmd::QuadTo(_, e)) => (s, e),
                other => panic!("unexpected flick path {other:?}"),
            };
            let outward = if start.x > WIDTH as f32 / 2.0 { 1.0 } else { -1.0 };
            assert_eq!(end.x - start.x, FLICK_END_DX * outward);
            assert!(flick.fill.is_none());
        }
    }

    #[test]
    fn test_crown_has_brow_band() {
        let desc = build_geometry(OverlayVariant::HeaddressCrown, &face_mesh(), WIDTH);
        assert_eq!(desc.shapes.len(), 2);
        let band = &desc.shapes[1];
        assert!(band.fill.is_none());
        assert_eq!(band.stroke.map(|s| s.width), Some(CROWN_BROW_STROKE));
    }

    #[test]
    fn test_parse_overlay_ids() {
        assert_eq!("Nemes".parse::<OverlayVariant>().unwrap(), OverlayVariant::HeaddressStriped);
        assert_eq!(" anubis ".parse::<OverlayVariant>().unwrap(), OverlayVariant::FullMask);
        assert!("crown".parse::<OverlayVariant>().is_err());
        for v in OverlayVariant::ALL {
            assert_eq!(v.id().parse::<OverlayVariant>().unwrap(), v);
        }
    }

    #[test]
    fn test_required_indices_cover_used_points() {
        // Dropping any required index from a full mesh must empty the overlay
        let mesh = face_mesh();
        for variant in OverlayVariant::ALL {
            for &idx in variant.required_indices() {
                let truncated = LandmarkSet::new(mesh.points()[..idx].to_vec(), idx).unwrap();
                assert!(
                    build_geometry(variant, &truncated, WIDTH).is_empty(),
                    "{variant} still built without index {idx}"
                );
            }
        }
    }
}
