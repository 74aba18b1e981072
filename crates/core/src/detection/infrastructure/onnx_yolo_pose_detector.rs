/// YOLO-pose detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference, confidence filtering and NMS,
/// then maps the 17 COCO keypoints back to coordinates normalized to the
/// input frame.
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayViewD, Axis, Ix3};
use ort::session::Session;
use ort::value::{Tensor, ValueType};

use crate::detection::domain::pose::{Keypoint, RawPose};
use crate::detection::domain::pose_detector::PoseDetector;
use crate::detection::domain::skeleton::NUM_KEYPOINTS;
use crate::rendering::image_codec::to_rgb_image;
use crate::shared::config::ExecutionDelegate;
use crate::shared::frame::Frame;

use super::execution_provider::execution_providers;
use super::math::greedy_nms;

const DEFAULT_INPUT_SIZE: u32 = 640;

const NMS_IOU_THRESH: f64 = 0.45;

const LETTERBOX_GRAY: u8 = 114;

/// Box (4) + person confidence (1) before the keypoint triples.
const KEYPOINT_OFFSET: usize = 5;

/// Features per detection row: box, confidence, 17 × (x, y, conf).
const NUM_FEATURES: usize = KEYPOINT_OFFSET + NUM_KEYPOINTS * 3;

/// YOLO-pose detector backed by an ONNX Runtime session.
pub struct OnnxYoloPoseDetector {
    session: Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxYoloPoseDetector {
    /// Load a YOLO-pose ONNX model and prepare for inference.
    ///
    /// The square input size comes from the model's NCHW input shape, or 640
    /// when the model leaves it dynamic.
    pub fn new(
        model_path: &Path,
        delegate: ExecutionDelegate,
        confidence: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let session = Session::builder()?
            .with_execution_providers(execution_providers(delegate))?
            .commit_from_file(model_path)?;
        let input_size = declared_input_size(&session).unwrap_or(DEFAULT_INPUT_SIZE);

        log::debug!(
            "Loaded pose model {} (input {input_size}px, delegate {})",
            model_path.display(),
            delegate.as_str()
        );

        Ok(Self {
            session,
            confidence,
            input_size,
        })
    }
}

fn declared_input_size(session: &Session) -> Option<u32> {
    let input = session.inputs().first()?;
    match input.dtype() {
        ValueType::Tensor { shape, .. } if shape.len() == 4 && shape[2] > 0 => {
            u32::try_from(shape[2]).ok()
        }
        _ => None,
    }
}

impl PoseDetector for OnnxYoloPoseDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawPose>, Box<dyn std::error::Error>> {
        let (input, geometry) = letterbox(frame, self.input_size)
            .ok_or("frame buffer does not match its dimensions")?;

        let outputs = self.session.run(ort::inputs![Tensor::from_array(input)?])?;
        let predictions = outputs[0].try_extract_array::<f32>()?;
        let rows = prediction_rows(predictions)?;

        let people = parse_rows(rows, self.confidence, &geometry);
        Ok(suppress_and_normalize(people, frame.width(), frame.height()))
    }
}

/// Split a `[1, features, anchors]` or `[1, anchors, features]` output into
/// one feature row per anchor.
fn prediction_rows(output: ArrayViewD<'_, f32>) -> Result<Vec<Vec<f32>>, Box<dyn std::error::Error>> {
    let output = output.into_dimensionality::<Ix3>()?;
    if output.len_of(Axis(0)) == 0 {
        return Err("pose model returned an empty batch".into());
    }
    let batch = output.index_axis_move(Axis(0), 0);
    // Anchors always outnumber features, which tells the layouts apart.
    let rows = if batch.nrows() < batch.ncols() {
        batch.reversed_axes()
    } else {
        batch
    };
    if rows.ncols() < NUM_FEATURES {
        return Err(format!(
            "expected {NUM_FEATURES} features per detection, got {}",
            rows.ncols()
        )
        .into());
    }
    Ok(rows.outer_iter().map(|row| row.to_vec()).collect())
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// How the frame was placed inside the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct LetterboxGeometry {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl LetterboxGeometry {
    /// Map a point in model-input pixels back to frame pixels.
    fn to_frame(self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Fit the frame into a gray `target_size` square and lay it out as an NCHW
/// float tensor in 0-1.
fn letterbox(frame: &Frame, target_size: u32) -> Option<(Array4<f32>, LetterboxGeometry)> {
    let source = to_rgb_image(frame)?;
    let scale = target_size as f64 / frame.longest_side().max(1) as f64;
    let new_w = ((frame.width() as f64 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((frame.height() as f64 * scale).round() as u32).clamp(1, target_size);
    let geometry = LetterboxGeometry {
        scale,
        pad_x: (target_size - new_w) / 2,
        pad_y: (target_size - new_h) / 2,
    };

    let mut canvas = RgbImage::from_pixel(target_size, target_size, Rgb([LETTERBOX_GRAY; 3]));
    let scaled = imageops::resize(&source, new_w, new_h, FilterType::Triangle);
    imageops::replace(
        &mut canvas,
        &scaled,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );

    let side = target_size as usize;
    let tensor = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });
    Some((tensor, geometry))
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

/// One person above the confidence threshold, in frame pixel coordinates.
#[derive(Clone, Debug)]
struct PersonDetection {
    bbox: [f64; 4],
    confidence: f64,
    /// `(x, y, conf)` per COCO keypoint.
    keypoints: [(f64, f64, f64); NUM_KEYPOINTS],
}

/// Parse `[cx, cy, w, h, conf, 17 × (x, y, conf)]` rows, dropping those
/// below `confidence`.
fn parse_rows<I>(rows: I, confidence: f64, geometry: &LetterboxGeometry) -> Vec<PersonDetection>
where
    I: IntoIterator<Item = Vec<f32>>,
{
    let mut detections = Vec::new();
    for row in rows {
        if row.len() < NUM_FEATURES {
            continue;
        }
        let conf = row[4] as f64;
        if conf < confidence {
            continue;
        }

        let (cx, cy, w, h) = (row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
        let (x1, y1) = geometry.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = geometry.to_frame(cx + w / 2.0, cy + h / 2.0);

        let mut keypoints = [(0.0, 0.0, 0.0); NUM_KEYPOINTS];
        for (k, slot) in keypoints.iter_mut().enumerate() {
            let base = KEYPOINT_OFFSET + k * 3;
            let (kx, ky) = geometry.to_frame(row[base] as f64, row[base + 1] as f64);
            *slot = (kx, ky, row[base + 2] as f64);
        }

        detections.push(PersonDetection {
            bbox: [x1, y1, x2, y2],
            confidence: conf,
            keypoints,
        });
    }
    detections
}

/// NMS, then convert survivors to poses normalized by the frame size.
fn suppress_and_normalize(
    detections: Vec<PersonDetection>,
    frame_width: u32,
    frame_height: u32,
) -> Vec<RawPose> {
    let boxes: Vec<([f64; 4], f64)> = detections.iter().map(|d| (d.bbox, d.confidence)).collect();
    let (fw, fh) = (frame_width as f64, frame_height as f64);

    greedy_nms(&boxes, NMS_IOU_THRESH)
        .into_iter()
        .map(|i| {
            let keypoints = detections[i]
                .keypoints
                .iter()
                .map(|&(x, y, conf)| {
                    Keypoint::new(
                        (x / fw).clamp(0.0, 1.0),
                        (y / fh).clamp(0.0, 1.0),
                        0.0,
                        conf.clamp(0.0, 1.0),
                    )
                })
                .collect();
            RawPose::new(keypoints)
        })
        .collect()
}
