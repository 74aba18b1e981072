mod error;
mod routes;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use posegate_core::caching::infrastructure::sysinfo_memory_probe::SysinfoMemoryProbe;
use posegate_core::detection::domain::pose_detector::PoseDetector;
use posegate_core::detection::infrastructure::onnx_yolo_pose_detector::OnnxYoloPoseDetector;
use posegate_core::pipeline::pose_service::{ModelInfo, PoseService};
use posegate_core::shared::config::{
    CacheConfig, DetectionConfig, DispatchConfig, ExecutionDelegate, PoseModelVariant,
    RateLimitConfig, RenderConfig, ServiceConfig,
};
use posegate_core::shared::constants::{
    DEFAULT_CACHE_SIZE, DEFAULT_DETECTION_THRESHOLD, DEFAULT_JPEG_QUALITY,
    DEFAULT_MAX_REQUESTS_PER_MINUTE, DEFAULT_MAX_RESIZE_SIDE, DEFAULT_MAX_SYNC_DETECTORS,
    DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_MIN_FRAME_DIFF, DEFAULT_NUM_WORKERS,
};
use posegate_core::shared::model_resolver;

use crate::routes::{router, AppState};

/// HTTP service detecting human poses in uploaded video frames.
#[derive(Parser)]
#[command(name = "posegate")]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value = "8000")]
    port: u16,

    /// Model size: lite, full or heavy.
    #[arg(long, env = "POSE_MODEL", default_value = "lite")]
    pose_model: String,

    /// Inference device: gpu or cpu.
    #[arg(long, env = "POSE_DELEGATE", default_value = "gpu")]
    pose_delegate: String,

    /// Directory searched for the model file before the user cache.
    #[arg(long, env = "MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Download location used when the model is not found locally.
    #[arg(long, env = "MODEL_URL")]
    model_url: Option<String>,

    /// Minimum person confidence (0.0-1.0).
    #[arg(long, env = "DETECTION_THRESHOLD", default_value_t = DEFAULT_DETECTION_THRESHOLD)]
    detection_threshold: f64,

    /// Longest side frames are shrunk to before detection.
    #[arg(long, env = "MAX_RESIZE_SIDE", default_value_t = DEFAULT_MAX_RESIZE_SIDE)]
    max_resize_side: u32,

    /// JPEG quality of annotated frames (1-100).
    #[arg(long = "jpeg-q", env = "JPEG_Q", default_value_t = DEFAULT_JPEG_QUALITY)]
    jpeg_q: u8,

    /// Background pose workers (0 processes everything on request threads).
    #[arg(long, env = "NUM_WORKERS", default_value_t = DEFAULT_NUM_WORKERS)]
    num_workers: usize,

    /// Detectors kept for frames processed on request threads.
    #[arg(long, env = "MAX_SYNC_DETECTORS", default_value_t = DEFAULT_MAX_SYNC_DETECTORS)]
    max_sync_detectors: usize,

    /// Largest accepted upload body, in bytes.
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    /// Maximum cached results.
    #[arg(long, env = "CACHE_SIZE", default_value_t = DEFAULT_CACHE_SIZE)]
    cache_size: usize,

    /// Perceptual difference below which frames count as the same (0.0-1.0).
    #[arg(long, env = "MIN_FRAME_DIFF", default_value_t = DEFAULT_MIN_FRAME_DIFF)]
    min_frame_diff: f64,

    /// Attach a weak ETag to frame responses.
    #[arg(
        long,
        env = "USE_ETAG",
        default_value = "1",
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    use_etag: bool,

    #[arg(
        long,
        env = "MAX_REQUESTS_PER_MINUTE",
        default_value_t = DEFAULT_MAX_REQUESTS_PER_MINUTE
    )]
    max_requests_per_minute: u32,

    /// Comma-separated CORS origins; any origin when unset.
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("LOG_LEVEL", "info"))
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (variant, delegate) = validate(&cli)?;

    let model_name = variant.model_file_name();
    log::info!("Resolving model: {model_name}");
    let model_path = model_resolver::resolve(
        &model_name,
        cli.model_url.as_deref(),
        cli.model_dir.as_deref(),
        Some(Box::new(download_progress)),
    )?;

    let confidence = cli.detection_threshold;
    let factory = move || -> Result<Box<dyn PoseDetector>, Box<dyn std::error::Error + Send + Sync>> {
        let detector = OnnxYoloPoseDetector::new(&model_path, delegate, confidence)
            .map_err(|e| e.to_string())?;
        Ok(Box::new(detector))
    };

    let service = PoseService::new(
        service_config(&cli),
        Arc::new(factory),
        Box::new(SysinfoMemoryProbe::new()),
        ModelInfo { variant, delegate },
    )?;

    let state = AppState {
        service: Arc::new(service),
        use_etag: cli.use_etag,
        max_upload_bytes: cli.max_upload_bytes,
    };
    let app = router(state, &cli.allowed_origins);
    let addr = format!("{}:{}", cli.host, cli.port);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("Listening on http://{addr}");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    log::info!("Shut down");
    Ok(())
}

fn service_config(cli: &Cli) -> ServiceConfig {
    ServiceConfig {
        cache: CacheConfig {
            max_entries: cli.cache_size,
            min_frame_diff: cli.min_frame_diff,
            ..CacheConfig::default()
        },
        rate_limit: RateLimitConfig {
            max_per_window: cli.max_requests_per_minute,
            ..RateLimitConfig::default()
        },
        detection: DetectionConfig {
            max_resize_side: cli.max_resize_side,
            detection_threshold: cli.detection_threshold,
            ..DetectionConfig::default()
        },
        dispatch: DispatchConfig {
            num_workers: cli.num_workers,
            max_sync_detectors: cli.max_sync_detectors,
            ..DispatchConfig::default()
        },
        render: RenderConfig {
            jpeg_quality: cli.jpeg_q,
        },
        ..ServiceConfig::default()
    }
}

fn validate(cli: &Cli) -> Result<(PoseModelVariant, ExecutionDelegate), Box<dyn std::error::Error>> {
    let variant = PoseModelVariant::parse(&cli.pose_model).ok_or_else(|| {
        format!(
            "Pose model must be one of: lite, full, heavy, got '{}'",
            cli.pose_model
        )
    })?;
    let delegate = ExecutionDelegate::parse(&cli.pose_delegate).ok_or_else(|| {
        format!(
            "Pose delegate must be 'gpu' or 'cpu', got '{}'",
            cli.pose_delegate
        )
    })?;
    if !(0.0..=1.0).contains(&cli.detection_threshold) {
        return Err(format!(
            "Detection threshold must be between 0.0 and 1.0, got {}",
            cli.detection_threshold
        )
        .into());
    }
    if !(0.0..=1.0).contains(&cli.min_frame_diff) {
        return Err(format!(
            "Min frame diff must be between 0.0 and 1.0, got {}",
            cli.min_frame_diff
        )
        .into());
    }
    if !(1..=100).contains(&cli.jpeg_q) {
        return Err(format!("JPEG quality must be between 1 and 100, got {}", cli.jpeg_q).into());
    }
    if cli.max_resize_side == 0 {
        return Err("Max resize side must be positive".into());
    }
    if cli.cache_size == 0 {
        return Err("Cache size must be positive".into());
    }
    if cli.max_requests_per_minute == 0 {
        return Err("Max requests per minute must be positive".into());
    }
    if cli.max_sync_detectors == 0 {
        return Err("Max sync detectors must be positive".into());
    }
    if cli.max_upload_bytes == 0 {
        return Err("Max upload bytes must be positive".into());
    }
    Ok((variant, delegate))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested");
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading pose model... {pct}%");
    } else {
        eprint!("\rDownloading pose model... {downloaded} bytes");
    }
}
