use crate::detection::domain::pose::PoseCandidate;
use crate::detection::domain::pose_deduplicator::PoseDeduplicator;
use crate::detection::domain::pose_detector::PoseDetector;
use crate::rendering::image_codec::resize;
use crate::shared::config::DetectionConfig;
use crate::shared::frame::Frame;

/// Runs the wrapped detector once per scale factor and merges the results.
///
/// Detector output is normalized to the image it saw, so candidates from
/// every scale share one coordinate space and need no rescaling before
/// deduplication. A failing scale is logged and skipped; if every scale
/// fails the result is simply empty.
///
/// The scale list exists for detectors with variable input sizes. A
/// fixed-input model such as the YOLO adapter letterboxes every scale back
/// to the same square, so its passes differ only by resampling.
pub struct MultiScaleDetector {
    inner: Box<dyn PoseDetector>,
    scales: Vec<f64>,
    min_side: u32,
    max_side: u32,
    deduplicator: PoseDeduplicator,
}

impl MultiScaleDetector {
    pub fn new(inner: Box<dyn PoseDetector>, config: &DetectionConfig) -> Self {
        Self {
            inner,
            scales: config.scales.clone(),
            min_side: config.min_scaled_side,
            max_side: config.max_scaled_side,
            deduplicator: PoseDeduplicator::new(config.dedup.clone()),
        }
    }

    pub fn detect(&mut self, frame: &Frame) -> Vec<PoseCandidate> {
        let mut candidates = Vec::new();

        for &scale in &self.scales {
            let Some((w, h)) = self.scaled_size(frame, scale) else {
                log::debug!(
                    "Skipping scale {scale}: {}x{} out of range",
                    frame.width(),
                    frame.height()
                );
                continue;
            };

            let result = if w == frame.width() && h == frame.height() {
                self.inner.detect(frame)
            } else {
                match resize(frame, w, h) {
                    Some(scaled) => self.inner.detect(&scaled),
                    None => {
                        log::warn!("Could not resize frame for scale {scale}");
                        continue;
                    }
                }
            };

            match result {
                Ok(raw) => {
                    candidates.extend(raw.into_iter().filter_map(PoseCandidate::from_raw));
                }
                Err(e) => log::warn!("Pose detection failed at scale {scale}: {e}"),
            }
        }

        let found = candidates.len();
        let unique = self.deduplicator.dedup(candidates);
        log::debug!("Multi-scale detection: {found} raw, {} unique", unique.len());
        unique
    }

    /// Scaled dimensions, or `None` when either side leaves the sane range.
    fn scaled_size(&self, frame: &Frame, scale: f64) -> Option<(u32, u32)> {
        let w = (frame.width() as f64 * scale).round();
        let h = (frame.height() as f64 * scale).round();
        let (min, max) = (self.min_side as f64, self.max_side as f64);
        if w < min || h < min || w > max || h > max {
            return None;
        }
        Some((w as u32, h as u32))
    }
}
