//! SCRFD face detector via ONNX Runtime.
//!
//! First stage of the landmark pipeline: finds face boxes on the whole frame
//! so the face mesh can run on a face-centred crop. Anchor-free decoding over
//! three strides, then non-maximum suppression.

use crate::provider::DetectError;
use kemet_hw::Frame;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// A detected face in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Mapping between frame pixels and letterboxed model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    pub scale: f32,
    pub pad_x: usize,
    pub pad_y: usize,
    pub new_w: usize,
    pub new_h: usize,
}

impl Letterbox {
    pub fn fit(width: usize, height: usize, input: usize) -> Self {
        let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, input);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, input);
        Self {
            scale,
            pad_x: (input - new_w) / 2,
            pad_y: (input - new_h) / 2,
            new_w,
            new_h,
        }
    }

    /// Model-input coordinates back to frame pixels.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor indices for one stride: (score, bbox).
type StrideOutputs = (usize, usize);

/// SCRFD face detector.
pub struct FaceDetector {
    session: Session,
    strides: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
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
            outputs = ?output_names,
            "loaded face detector"
        );
        if output_names.len() < 6 {
            return Err(DetectError::InferenceFailed(format!(
                "face detector needs score and bbox outputs for 3 strides, got {}",
                output_names.len()
            )));
        }

        let strides = discover_outputs(&output_names);
        tracing::debug!(?strides, "face detector output mapping");
        Ok(Self { session, strides })
    }

    /// Faces in `frame`, most confident first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, DetectError> {
        let (input, letterbox) = preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut faces = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(&self.strides) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            faces.extend(decode_stride(scores, bboxes, stride, &letterbox));
        }
        Ok(nms(faces, SCRFD_NMS_THRESHOLD))
    }
}

/// Find `score_<stride>` / `bbox_<stride>` outputs by name, else assume the
/// standard export order (scores for strides 8/16/32, then bboxes).
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();
    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => [(0, 3), (1, 4), (2, 5)],
    }
}

fn decode_stride(scores: &[f32], bboxes: &[f32], stride: usize, letterbox: &Letterbox) -> Vec<FaceBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut faces = Vec::new();
    for idx in 0..anchors.min(scores.len()) {
        let confidence = scores[idx];
        if confidence <= SCRFD_CONFIDENCE_THRESHOLD {
            continue;
        }
        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * s;
        let ay = (cell / grid_w) as f32 * s;

        let (x1, y1) = letterbox.to_frame(ax - d[0] * s, ay - d[1] * s);
        let (x2, y2) = letterbox.to_frame(ax + d[2] * s, ay + d[3] * s);
        faces.push(FaceBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }
    faces
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Keep the most confident box of every overlapping cluster, sorted by confidence.
fn nms(mut faces: Vec<FaceBox>, threshold: f32) -> Vec<FaceBox> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<FaceBox> = Vec::new();
    for face in faces {
        if keep.iter().all(|k| iou(k, &face) <= threshold) {
            keep.push(face);
        }
    }
    keep
}

/// Letterbox an RGB frame into the normalized SCRFD input tensor.
fn preprocess(frame: &Frame) -> (Array4<f32>, Letterbox) {
    let (width, height) = (frame.width as usize, frame.height as usize);
    let lb = Letterbox::fit(width, height, SCRFD_INPUT_SIZE);
    let resized = resize_rgb(&frame.data, width, height, lb.new_w, lb.new_h);

    // Padding at the mean normalizes to zero
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for y in 0..lb.new_h {
        for x in 0..lb.new_w {
            let src = (y * lb.new_w + x) * 3;
            for c in 0..3 {
                tensor[[0, c, y + lb.pad_y, x + lb.pad_x]] = (resized[src + c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }
    (tensor, lb)
}

/// Bilinear resize of packed RGB8.
fn resize_rgb(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; new_w * new_h * 3];
    if width == 0 || height == 0 {
        return out;
    }
    let sx = width as f32 / new_w as f32;
    let sy = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * sy - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * sx - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let at = |xx: usize, yy: usize| src[(yy * width + xx) * 3 + c] as f32;
                let val = at(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + at(x1, y0) * fx * (1.0 - fy)
                    + at(x0, y1) * (1.0 - fx) * fy
                    + at(x1, y1) * fx * fy;
                out[(y * new_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}
