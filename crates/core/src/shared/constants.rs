pub const POSE_MODEL_PREFIX: &str = "yolo11";
pub const POSE_MODEL_SUFFIX: &str = "-pose.onnx";

/// Scale factors tried by the multi-scale aggregator, in detection order.
pub const DETECTION_SCALES: &[f64] = &[0.5, 0.6, 0.8, 1.0, 1.2, 1.4, 1.6];

/// Scaled frames outside this side-length range are skipped.
pub const MIN_SCALED_SIDE: u32 = 96;
pub const MAX_SCALED_SIDE: u32 = 1920;

/// Default per-keypoint visibility needed for a pair to count in dedup.
pub const DEDUP_VISIBILITY: f64 = 0.3;
pub const DEDUP_MIN_COMPARABLE: usize = 3;
pub const DEDUP_KEYPOINT_DISTANCE: f64 = 0.05;
pub const DEDUP_CENTER_DISTANCE: f64 = 0.1;

pub const DEFAULT_DETECTION_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MAX_RESIZE_SIDE: u32 = 640;

pub const DEFAULT_CACHE_SIZE: usize = 200;
pub const DEFAULT_PERCEPTUAL_SWEEP: usize = 10;
/// Mean absolute 32x32 luma difference (0-1) below which frames match.
pub const DEFAULT_MIN_FRAME_DIFF: f64 = 0.05;
pub const MODERATE_MEMORY_PERCENT: f64 = 60.0;
pub const HIGH_MEMORY_PERCENT: f64 = 70.0;
pub const MODERATE_MEMORY_RATIO: f64 = 0.8;
pub const HIGH_MEMORY_RATIO: f64 = 0.7;

pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 300;
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

pub const DEFAULT_NUM_WORKERS: usize = 2;
pub const WORK_QUEUE_CAPACITY: usize = 30;
pub const DISPATCH_TIMEOUT_MS: u64 = 5000;
/// Frames with fewer pixels than 640x480 run on the calling thread.
pub const SYNC_PIXEL_AREA: u64 = 640 * 480;

/// Cap on detectors built for request threads, independent of the workers.
pub const DEFAULT_MAX_SYNC_DETECTORS: usize = 2;

pub const MAINTENANCE_PERIOD_SECS: u64 = 30;
pub const LATENCY_WINDOW: usize = 50;

pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// Request body cap for uploads; uncompressed 1080p frames fit comfortably.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub const PERCEPTUAL_SIDE: u32 = 32;
