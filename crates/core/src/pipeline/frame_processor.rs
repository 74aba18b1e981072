use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::detection::domain::pose::{BoundingBox, PoseCandidate};
use crate::detection::domain::pose_detector::PoseDetector;
use crate::detection::infrastructure::multi_scale_detector::MultiScaleDetector;
use crate::identity::frame_fingerprint::FrameFingerprint;
use crate::rendering::image_codec::{
    data_url, encode_jpeg, encode_png, fit_within, to_rgb_image, EncodeError,
};
use crate::rendering::skeleton_renderer::{draw_on_frame, draw_overlay, DrawPlan};
use crate::selection::candidate_selector::{select, SelectionResult};
use crate::shared::config::{DetectionConfig, RenderConfig};
use crate::shared::frame::Frame;
use crate::shared::request::RequestVariant;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("pose detector unavailable: {0}")]
    DetectorUnavailable(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// One frame awaiting processing.
///
/// Cheap to clone: the frame is shared, so a timed-out caller and the worker
/// still holding the item can both use it.
#[derive(Clone, Debug)]
pub struct WorkItem {
    pub id: u64,
    pub frame: Arc<Frame>,
    pub fingerprint: FrameFingerprint,
    pub variant: RequestVariant,
}

/// Response body of a processed frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub poses: Vec<PoseCandidate>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub num_poses: usize,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_pose_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
}

/// Diagnostics attached to click requests.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebugInfo {
    pub detection_threshold: f64,
    pub frame_dimensions: (u32, u32),
    pub click_point: (i64, i64),
    pub normalized_click: (f64, f64),
    pub num_poses_detected: usize,
    pub selected_pose_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_pose_bbox: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionResult>,
}

/// Detect, select and render for a single frame.
///
/// Owns its detector; each worker thread and each synchronous caller gets
/// its own processor.
pub struct FrameProcessor {
    detector: MultiScaleDetector,
    max_resize_side: u32,
    detection_threshold: f64,
    jpeg_quality: u8,
}

impl FrameProcessor {
    pub fn new(
        detector: Box<dyn PoseDetector>,
        detection: &DetectionConfig,
        render: &RenderConfig,
    ) -> Self {
        Self {
            detector: MultiScaleDetector::new(detector, detection),
            max_resize_side: detection.max_resize_side,
            detection_threshold: detection.detection_threshold,
            jpeg_quality: render.jpeg_quality,
        }
    }

    pub fn process(&mut self, item: &WorkItem) -> Result<ProcessingResult, ProcessError> {
        let start = Instant::now();
        let frame = item.frame.as_ref();
        let (width, height) = (frame.width(), frame.height());
        let flags = item.variant.flags;
        let click = item.variant.click;

        let poses = if flags.resize && frame.longest_side() > self.max_resize_side {
            let scaled = fit_within(frame.clone(), self.max_resize_side);
            self.detector.detect(&scaled)
        } else {
            self.detector.detect(frame)
        };

        let selection = select(&poses, click, width, height);
        let selected = selection.as_ref().map(|s| s.index);
        match (&click, &selection) {
            (Some(_), Some(s)) => log::debug!(
                "Frame {}: selected pose {} of {} (inside bbox: {}, score {:.3})",
                item.id,
                s.index,
                poses.len(),
                s.inside_bbox,
                s.score
            ),
            (Some(_), None) => log::warn!("Frame {}: no pose selected for click", item.id),
            _ => {}
        }

        let image = if flags.return_image {
            let plan = DrawPlan {
                selected,
                click_requested: click.is_some(),
            };
            Some(self.render(frame, &poses, plan, flags.overlay, flags.draw)?)
        } else {
            None
        };

        let debug_info = click.map(|c| DebugInfo {
            detection_threshold: self.detection_threshold,
            frame_dimensions: (width, height),
            click_point: (c.x, c.y),
            normalized_click: c.normalized(width, height),
            num_poses_detected: poses.len(),
            selected_pose_index: selected,
            selected_pose_bbox: selected.map(|i| *poses[i].bbox()),
            selection: selection.clone(),
        });

        Ok(ProcessingResult {
            num_poses: poses.len(),
            poses,
            frame_width: width,
            frame_height: height,
            processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            selected_pose_index: selected,
            image,
            debug_info,
        })
    }

    fn render(
        &self,
        frame: &Frame,
        poses: &[PoseCandidate],
        plan: DrawPlan,
        overlay: bool,
        draw: bool,
    ) -> Result<String, EncodeError> {
        if overlay {
            let canvas = draw_overlay(frame.width(), frame.height(), poses, plan);
            return Ok(data_url("image/png", &encode_png(&canvas)?));
        }
        let mut image = to_rgb_image(frame).ok_or(EncodeError::InvalidFrame)?;
        if draw {
            draw_on_frame(&mut image, poses, plan);
        }
        Ok(data_url(
            "image/jpeg",
            &encode_jpeg(&image, self.jpeg_quality)?,
        ))
    }
}
