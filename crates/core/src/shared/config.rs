use std::time::Duration;

use crate::shared::constants::*;

/// Model size, named after the variants the service has always exposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoseModelVariant {
    Lite,
    Full,
    Heavy,
}

impl PoseModelVariant {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lite" => Some(Self::Lite),
            "full" => Some(Self::Full),
            "heavy" => Some(Self::Heavy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lite => "lite",
            Self::Full => "full",
            Self::Heavy => "heavy",
        }
    }

    /// ONNX file name for this variant, e.g. `yolo11n-pose.onnx`.
    pub fn model_file_name(&self) -> String {
        let size = match self {
            Self::Lite => "n",
            Self::Full => "s",
            Self::Heavy => "m",
        };
        format!("{POSE_MODEL_PREFIX}{size}{POSE_MODEL_SUFFIX}")
    }
}

/// Where inference runs. `Gpu` asks for the platform accelerator and
/// silently degrades to CPU where none is compiled in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionDelegate {
    Gpu,
    Cpu,
}

impl ExecutionDelegate {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gpu" => Some(Self::Gpu),
            "cpu" => Some(Self::Cpu),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub perceptual_sweep: usize,
    pub min_frame_diff: f64,
    pub moderate_memory_percent: f64,
    pub high_memory_percent: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_SIZE,
            perceptual_sweep: DEFAULT_PERCEPTUAL_SWEEP,
            min_frame_diff: DEFAULT_MIN_FRAME_DIFF,
            moderate_memory_percent: MODERATE_MEMORY_PERCENT,
            high_memory_percent: HIGH_MEMORY_PERCENT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_per_window: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DetectionConfig {
    pub scales: Vec<f64>,
    pub min_scaled_side: u32,
    pub max_scaled_side: u32,
    pub dedup: DedupConfig,
    /// Longest side a frame is shrunk to before detection when resizing is allowed.
    pub max_resize_side: u32,
    pub detection_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            scales: DETECTION_SCALES.to_vec(),
            min_scaled_side: MIN_SCALED_SIDE,
            max_scaled_side: MAX_SCALED_SIDE,
            dedup: DedupConfig::default(),
            max_resize_side: DEFAULT_MAX_RESIZE_SIDE,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DedupConfig {
    pub visibility_threshold: f64,
    pub min_comparable: usize,
    pub keypoint_distance: f64,
    pub center_distance: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: DEDUP_VISIBILITY,
            min_comparable: DEDUP_MIN_COMPARABLE,
            keypoint_distance: DEDUP_KEYPOINT_DISTANCE,
            center_distance: DEDUP_CENTER_DISTANCE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub num_workers: usize,
    pub queue_capacity: usize,
    pub timeout: Duration,
    pub sync_pixel_area: u64,
    /// Detectors shared by request threads that process frames themselves.
    pub max_sync_detectors: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            queue_capacity: WORK_QUEUE_CAPACITY,
            timeout: Duration::from_millis(DISPATCH_TIMEOUT_MS),
            sync_pixel_area: SYNC_PIXEL_AREA,
            max_sync_detectors: DEFAULT_MAX_SYNC_DETECTORS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub jpeg_quality: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Everything the pipeline needs to know, assembled once at startup.
#[derive(Clone, Debug, Default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub detection: DetectionConfig,
    pub dispatch: DispatchConfig,
    pub render: RenderConfig,
    pub maintenance_period: MaintenancePeriod,
}

#[derive(Clone, Copy, Debug)]
pub struct MaintenancePeriod(pub Duration);

impl Default for MaintenancePeriod {
    fn default() -> Self {
        Self(Duration::from_secs(MAINTENANCE_PERIOD_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("lite", PoseModelVariant::Lite, "yolo11n-pose.onnx")]
    #[case("FULL", PoseModelVariant::Full, "yolo11s-pose.onnx")]
    #[case("heavy", PoseModelVariant::Heavy, "yolo11m-pose.onnx")]
    fn test_variant_parse_and_file_name(
        #[case] name: &str,
        #[case] expected: PoseModelVariant,
        #[case] file: &str,
    ) {
        let variant = PoseModelVariant::parse(name).unwrap();
        assert_eq!(variant, expected);
        assert_eq!(variant.model_file_name(), file);
    }

    #[test]
    fn test_unknown_variant_is_rejected() {
        assert!(PoseModelVariant::parse("huge").is_none());
    }

    #[rstest]
    #[case("gpu", Some(ExecutionDelegate::Gpu))]
    #[case("CPU", Some(ExecutionDelegate::Cpu))]
    #[case("tpu", None)]
    fn test_delegate_parse(#[case] name: &str, #[case] expected: Option<ExecutionDelegate>) {
        assert_eq!(ExecutionDelegate::parse(name), expected);
    }

    #[test]
    fn test_defaults_match_service_constants() {
        let config = ServiceConfig::default();
        assert_eq!(config.cache.max_entries, 200);
        assert_eq!(config.dispatch.queue_capacity, 30);
        assert_eq!(config.dispatch.timeout, Duration::from_secs(5));
        assert_eq!(config.dispatch.max_sync_detectors, 2);
        assert_eq!(config.rate_limit.max_per_window, 300);
        assert_eq!(config.detection.scales.len(), 7);
        assert_eq!(config.detection.detection_threshold, 0.5);
        assert_eq!(config.maintenance_period.0, Duration::from_secs(30));
    }
}
