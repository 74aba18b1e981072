use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::admission::rate_limiter::RateLimiter;
use crate::caching::domain::memory_probe::MemoryProbe;
use crate::caching::domain::result_cache::{CacheKey, ResultCache};
use crate::detection::domain::pose_detector::DetectorFactory;
use crate::identity::frame_fingerprint::fingerprint;
use crate::pipeline::frame_processor::{ProcessError, ProcessingResult, WorkItem};
use crate::pipeline::infrastructure::maintenance_task::MaintenanceTask;
use crate::pipeline::infrastructure::work_dispatcher::{
    CompletionSink, DispatchStats, WorkDispatcher,
};
use crate::pipeline::performance_recorder::PerformanceRecorder;
use crate::pipeline::processor_pool::ProcessorPool;
use crate::rendering::image_codec::{decode, DecodeError};
use crate::shared::config::{ExecutionDelegate, PoseModelVariant, ServiceConfig};
use crate::shared::constants::LATENCY_WINDOW;
use crate::shared::request::RequestVariant;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// What `/health` reports about the loaded model.
#[derive(Clone, Copy, Debug)]
pub struct ModelInfo {
    pub variant: PoseModelVariant,
    pub delegate: ExecutionDelegate,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub memory_usage_percent: Option<f64>,
    pub avg_processing_time_ms: f64,
    pub processed_frames: u64,
    pub cached_hits: u64,
    pub cache_hits: u64,
    pub model: &'static str,
    pub delegate: &'static str,
    pub cache_size: usize,
    pub cache_target_size: usize,
    pub dispatch: DispatchStats,
}

/// State shared by request threads, workers and the maintenance thread.
struct ServiceState {
    cache: Mutex<ResultCache<ProcessingResult>>,
    rate_limiter: RateLimiter,
    recorder: PerformanceRecorder,
    memory: Mutex<Box<dyn MemoryProbe>>,
}

impl ServiceState {
    fn cache(&self) -> MutexGuard<'_, ResultCache<ProcessingResult>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn memory_percent(&self) -> Option<f64> {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .memory_percent()
    }

    fn maintain(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.rate_limiter.reset_if_elapsed() {
            log::debug!("Rate limit window reset");
        }
        let percent = self
            .memory_percent()
            .ok_or("memory usage unavailable, cache target unchanged")?;
        let evicted = self.cache().retarget(percent);
        if evicted > 0 {
            log::info!("Memory at {percent:.1}%: evicted {evicted} cached results");
        }
        Ok(())
    }
}

impl CompletionSink for ServiceState {
    fn complete(&self, item: &WorkItem, result: &ProcessingResult) {
        self.cache()
            .insert(item.fingerprint.clone(), item.variant, result.clone());
        self.recorder.record(result.processing_time_ms);
    }
}

/// Entry point for frame requests: admission, decode, cache, dispatch.
pub struct PoseService {
    state: Arc<ServiceState>,
    dispatcher: WorkDispatcher,
    model: ModelInfo,
    _maintenance: MaintenanceTask,
}

impl PoseService {
    pub fn new(
        config: ServiceConfig,
        factory: Arc<dyn DetectorFactory>,
        memory: Box<dyn MemoryProbe>,
        model: ModelInfo,
    ) -> Result<Self, ProcessError> {
        let state = Arc::new(ServiceState {
            cache: Mutex::new(ResultCache::new(&config.cache)),
            rate_limiter: RateLimiter::new(&config.rate_limit),
            recorder: PerformanceRecorder::new(LATENCY_WINDOW),
            memory: Mutex::new(memory),
        });

        let pool = Arc::new(ProcessorPool::new(
            factory,
            config.detection.clone(),
            config.render.clone(),
            config.dispatch.max_sync_detectors,
        ));
        let dispatcher = WorkDispatcher::new(config.dispatch.clone(), pool, state.clone())?;

        let maintained = state.clone();
        let maintenance =
            MaintenanceTask::spawn(config.maintenance_period.0, move || maintained.maintain())
                .map_err(|e| {
                    ProcessError::DetectorUnavailable(format!("maintenance spawn failed: {e}"))
                })?;

        log::info!(
            "Pose service ready: model {}, delegate {}, cache {} entries",
            model.variant.as_str(),
            model.delegate.as_str(),
            config.cache.max_entries
        );

        Ok(Self {
            state,
            dispatcher,
            model,
            _maintenance: maintenance,
        })
    }

    /// Handle one uploaded frame. Blocking: callers on an async runtime
    /// should run this on a blocking thread.
    pub fn process_frame(
        &self,
        bytes: &[u8],
        client: &str,
        variant: RequestVariant,
    ) -> Result<ProcessingResult, ServiceError> {
        let start = Instant::now();
        if !self.state.rate_limiter.admit(client) {
            log::warn!("Rate limit exceeded for client {client}");
            return Err(ServiceError::RateLimited);
        }

        let frame = decode(bytes)?;
        let fp = fingerprint(bytes, &frame);

        let cached = {
            let mut cache = self.state.cache();
            cache
                .lookup(&CacheKey::new(&fp, variant))
                .or_else(|| cache.lookup_similar(&fp, &variant))
        };
        if let Some(mut hit) = cached {
            hit.processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            self.state.recorder.record_cache_hit();
            log::debug!("Cache hit for frame {}", &fp.exact_hex()[..12]);
            return Ok(hit);
        }

        let item = WorkItem {
            id: self.dispatcher.next_id(),
            frame: Arc::new(frame),
            fingerprint: fp,
            variant,
        };
        Ok(self.dispatcher.process(item)?)
    }

    pub fn health(&self) -> HealthReport {
        let perf = self.state.recorder.snapshot();
        let (cache_size, cache_target_size) = {
            let cache = self.state.cache();
            (cache.len(), cache.target_size())
        };
        HealthReport {
            status: "ok",
            memory_usage_percent: self.state.memory_percent(),
            avg_processing_time_ms: perf.average_latency_ms,
            processed_frames: perf.processed_count,
            cached_hits: perf.cache_hits,
            cache_hits: perf.cache_hits,
            model: self.model.variant.as_str(),
            delegate: self.model.delegate.as_str(),
            cache_size,
            cache_target_size,
            dispatch: self.dispatcher.stats(),
        }
    }

    /// Empty the result cache, returning how many entries were dropped.
    pub fn clear_cache(&self) -> usize {
        let cleared = self.state.cache().clear();
        log::info!("Cleared {cleared} cached results");
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::domain::memory_probe::FixedMemoryProbe;
    use crate::detection::domain::pose_detector::PoseDetector;
    use crate::pipeline::frame_processor::tests::ColumnsDetector;
    use crate::shared::config::RateLimitConfig;
    use crate::shared::request::{ClickPoint, RenderFlags};
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    type FactoryResult = Result<Box<dyn PoseDetector>, Box<dyn std::error::Error + Send + Sync>>;

    fn service(config: ServiceConfig) -> PoseService {
        let factory = || -> FactoryResult { Ok(Box::new(ColumnsDetector(vec![0.3, 0.7]))) };
        PoseService::new(
            config,
            Arc::new(factory),
            Box::new(FixedMemoryProbe(Some(42.0))),
            ModelInfo {
                variant: PoseModelVariant::Lite,
                delegate: ExecutionDelegate::Cpu,
            },
        )
        .unwrap()
    }

    fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([shade, shade, shade]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_repeated_frame_is_served_from_cache() {
        let svc = service(ServiceConfig::default());
        let bytes = png(200, 150, 40);

        let first = svc
            .process_frame(&bytes, "c", RequestVariant::default())
            .unwrap();
        let second = svc
            .process_frame(&bytes, "c", RequestVariant::default())
            .unwrap();

        assert_eq!(first.num_poses, 2);
        assert_eq!(second.poses, first.poses);
        let health = svc.health();
        assert_eq!(health.cache_hits, 1);
        assert_eq!(health.cached_hits, 1);
        assert_eq!(health.processed_frames, 1);
        assert_eq!(health.cache_size, 1);
    }

    #[test]
    fn test_different_variant_misses_cache() {
        let svc = service(ServiceConfig::default());
        let bytes = png(200, 150, 40);
        svc.process_frame(&bytes, "c", RequestVariant::default())
            .unwrap();

        let clicked = RequestVariant::new(RenderFlags::default(), Some(ClickPoint::new(140, 60)));
        let result = svc.process_frame(&bytes, "c", clicked).unwrap();

        assert_eq!(result.selected_pose_index, Some(1));
        assert_eq!(svc.health().cache_hits, 0);
        assert_eq!(svc.health().cache_size, 2);
    }

    #[test]
    fn test_rate_limited_client_is_rejected() {
        let svc = service(ServiceConfig {
            rate_limit: RateLimitConfig {
                max_per_window: 1,
                ..RateLimitConfig::default()
            },
            ..ServiceConfig::default()
        });
        let bytes = png(100, 100, 0);

        assert!(svc.process_frame(&bytes, "a", RequestVariant::default()).is_ok());
        assert!(matches!(
            svc.process_frame(&bytes, "a", RequestVariant::default()),
            Err(ServiceError::RateLimited)
        ));
        assert!(svc.process_frame(&bytes, "b", RequestVariant::default()).is_ok());
    }

    #[test]
    fn test_undecodable_upload_is_a_decode_error() {
        let svc = service(ServiceConfig::default());
        assert!(matches!(
            svc.process_frame(b"nope", "c", RequestVariant::default()),
            Err(ServiceError::Decode(_))
        ));
    }

    #[test]
    fn test_clear_cache_reports_count_and_empties() {
        let svc = service(ServiceConfig::default());
        svc.process_frame(&png(100, 100, 1), "c", RequestVariant::default())
            .unwrap();
        svc.process_frame(&png(100, 100, 200), "c", RequestVariant::default())
            .unwrap();

        assert_eq!(svc.clear_cache(), 2);
        assert_eq!(svc.health().cache_size, 0);
    }

    #[test]
    fn test_health_reports_model_and_memory() {
        let health = service(ServiceConfig::default()).health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.model, "lite");
        assert_eq!(health.delegate, "cpu");
        assert_eq!(health.memory_usage_percent, Some(42.0));
        assert_eq!(health.cache_target_size, 200);
    }
}
