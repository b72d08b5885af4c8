//! Two-stage face landmarker via ONNX Runtime.
//!
//! The SCRFD detector finds the face on the whole frame; a square crop
//! around it, enlarged by a margin, is resampled to the 192x192 face-mesh
//! input. The mesh emits 468 points plus a face-presence logit; points are
//! mapped from crop space back to frame pixels.

use crate::detector::{FaceBox, FaceDetector};
use crate::landmarks::{LandmarkSet, Point3, MESH_POINT_COUNT};
use crate::provider::DetectError;
use kemet_hw::Frame;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const MESH_INPUT_SIZE: usize = 192;
const MESH_COORDS_PER_POINT: usize = 3;
const MESH_FACE_THRESHOLD: f32 = 0.5;
/// Crop side relative to the larger side of the detected box.
const MESH_CROP_SCALE: f32 = 1.5;
/// Grey fill where the crop leaves the frame; normalizes to 0.5.
const MESH_PAD_VALUE: f32 = 127.5;

/// Square region of the frame fed to the mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub cx: f32,
    pub cy: f32,
    pub size: f32,
}

impl Roi {
    pub fn around(face: &FaceBox) -> Self {
        let (cx, cy) = face.center();
        Self {
            cx,
            cy,
            size: face.width.max(face.height) * MESH_CROP_SCALE,
        }
    }

    fn origin(&self) -> (f32, f32) {
        (self.cx - self.size / 2.0, self.cy - self.size / 2.0)
    }

    /// Frame pixels per mesh-input pixel.
    fn scale(&self) -> f32 {
        self.size / MESH_INPUT_SIZE as f32
    }

    /// Mesh-input coordinates back to frame pixels.
    fn to_frame(&self, x: f32, y: f32, z: f32) -> Point3 {
        let (x0, y0) = self.origin();
        let s = self.scale();
        Point3::new(x0 + x * s, y0 + y * s, z * s)
    }
}

/// Face-mesh landmark model.
pub struct FaceMesh {
    session: Session,
    landmarks_idx: usize,
    score_idx: Option<usize>,
}

impl FaceMesh {
    /// Load the face-mesh ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectError> {
        if !Path::new(model_path).exists() {
            return Err(DetectError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded face-mesh model"
        );

        let (landmarks_idx, score_idx) = discover_outputs(&output_names);
        tracing::debug!(landmarks_idx, ?score_idx, "face-mesh output mapping");

        Ok(Self {
            session,
            landmarks_idx,
            score_idx,
        })
    }

    /// Landmarks for the face inside `roi`, in frame pixel coordinates.
    pub fn detect(&mut self, frame: &Frame, roi: Roi) -> Result<Option<LandmarkSet>, DetectError> {
        let input = crop_tensor(frame, roi);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        if let Some(idx) = self.score_idx {
            let (_, logit) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::InferenceFailed(format!("face flag: {e}")))?;
            let presence = logit.first().copied().map(sigmoid).unwrap_or(0.0);
            if presence < MESH_FACE_THRESHOLD {
                return Ok(None);
            }
        }

        let (_, raw) = outputs[self.landmarks_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::InferenceFailed(format!("landmarks: {e}")))?;

        Ok(Some(decode_landmarks(raw, &roi)?))
    }
}

/// Detector plus mesh: at most one face per frame, the most confident.
pub struct FaceLandmarker {
    detector: FaceDetector,
    mesh: FaceMesh,
}

impl FaceLandmarker {
    pub fn new(detector: FaceDetector, mesh: FaceMesh) -> Self {
        Self { detector, mesh }
    }

    pub fn load(detector_path: &str, mesh_path: &str) -> Result<Self, DetectError> {
        Ok(Self::new(FaceDetector::load(detector_path)?, FaceMesh::load(mesh_path)?))
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, DetectError> {
        let Some(face) = self.detector.detect(frame)?.into_iter().next() else {
            return Ok(None);
        };
        tracing::trace!(?face, "face detected");
        self.mesh.detect(frame, Roi::around(&face))
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Pick the landmark and face-flag outputs.
///
/// Exports name them inconsistently ("conv2d_21", "Identity", "landmarks",
/// "output_faceflag", ...). Names containing "flag" or "score" are the
/// presence logit; otherwise the first output is landmarks and the second,
/// if any, is the flag.
fn discover_outputs(names: &[String]) -> (usize, Option<usize>) {
    let is_flag = |n: &String| {
        let n = n.to_ascii_lowercase();
        n.contains("flag") || n.contains("score")
    };
    match names.iter().position(is_flag) {
        Some(flag) => {
            let landmarks = (0..names.len()).find(|&i| i != flag).unwrap_or(0);
            (landmarks, Some(flag))
        }
        None => (0, (names.len() > 1).then_some(1)),
    }
}

/// Convert raw model output (x, y, z per point, input pixels) into frame space.
fn decode_landmarks(raw: &[f32], roi: &Roi) -> Result<LandmarkSet, DetectError> {
    let points: Vec<Point3> = raw
        .chunks_exact(MESH_COORDS_PER_POINT)
        .map(|c| roi.to_frame(c[0], c[1], c[2]))
        .collect();
    Ok(LandmarkSet::new(points, MESH_POINT_COUNT)?)
}

/// Bilinearly resample `roi` into an NCHW tensor normalized to [0, 1].
/// Samples outside the frame are grey.
fn crop_tensor(frame: &Frame, roi: Roi) -> Array4<f32> {
    let (width, height) = (frame.width as usize, frame.height as usize);
    let mut tensor = Array4::<f32>::from_elem((1, 3, MESH_INPUT_SIZE, MESH_INPUT_SIZE), MESH_PAD_VALUE / 255.0);
    if width == 0 || height == 0 {
        return tensor;
    }
    let (x0, y0) = roi.origin();
    let s = roi.scale();
    let (max_x, max_y) = ((width - 1) as f32, (height - 1) as f32);
    let at = |x: usize, y: usize, c: usize| frame.data[(y * width + x) * 3 + c] as f32;

    for oy in 0..MESH_INPUT_SIZE {
        let sy = y0 + (oy as f32 + 0.5) * s - 0.5;
        if !(0.0..=max_y).contains(&sy) {
            continue;
        }
        let (ya, fy) = (sy.floor() as usize, sy.fract());
        let yb = (ya + 1).min(height - 1);

        for ox in 0..MESH_INPUT_SIZE {
            let sx = x0 + (ox as f32 + 0.5) * s - 0.5;
            if !(0.0..=max_x).contains(&sx) {
                continue;
            }
            let (xa, fx) = (sx.floor() as usize, sx.fract());
            let xb = (xa + 1).min(width - 1);

            for c in 0..3 {
                let v = at(xa, ya, c) * (1.0 - fx) * (1.0 - fy)
                    + at(xb, ya, c) * fx * (1.0 - fy)
                    + at(xa, yb, c) * (1.0 - fx) * fy
                    + at(xb, yb, c) * fx * fy;
                tensor[[0, c, oy, ox]] = v / 255.0;
            }
        }
    }
    tensor
}
