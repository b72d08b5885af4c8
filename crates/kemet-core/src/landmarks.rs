use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in a face-mesh landmark set.
pub const MESH_POINT_COUNT: usize = 468;

/// Canonical face-mesh indices used by the overlays.
pub mod index {
    pub const FOREHEAD_TOP: usize = 10;
    pub const CHIN: usize = 152;
    pub const LEFT_CHEEK: usize = 234;
    pub const RIGHT_CHEEK: usize = 454;
    pub const LEFT_TEMPLE: usize = 127;
    pub const RIGHT_TEMPLE: usize = 356;
    /// Contour order: outer corner, upper lid, upper lid, inner corner, lower lid, lower lid.
    pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
    /// Contour order: inner corner, upper lid, upper lid, outer corner, lower lid, lower lid.
    pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
    pub const LEFT_EYE_OUTER: usize = 33;
    pub const RIGHT_EYE_OUTER: usize = 263;
}

/// A single landmark in provider pixel space (unmirrored).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum LandmarkError {
    #[error("partial landmark set: expected {expected} points, got {actual}")]
    Partial { expected: usize, actual: usize },
    #[error("landmark {index} has a non-finite coordinate")]
    NonFinite { index: usize },
}

/// Landmarks for exactly one detected face.
///
/// Always complete for the mesh size it was built against. Geometry code
/// still looks points up with [`get`](Self::get), since a provider with a
/// smaller mesh can legitimately lack an index an overlay needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Point3>,
}

impl LandmarkSet {
    /// Build a set, rejecting partial or corrupt point lists.
    pub fn new(points: Vec<Point3>, expected: usize) -> Result<Self, LandmarkError> {
        if points.len() != expected {
            return Err(LandmarkError::Partial {
                expected,
                actual: points.len(),
            });
        }
        if let Some(index) = points.iter().position(|p| !p.is_finite()) {
            return Err(LandmarkError::NonFinite { index });
        }
        Ok(Self { points })
    }

    /// Build a full face-mesh set.
    pub fn from_mesh(points: Vec<Point3>) -> Result<Self, LandmarkError> {
        Self::new(points, MESH_POINT_COUNT)
    }

    pub fn get(&self, index: usize) -> Option<Point3> {
        self.points.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }
}
