use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Point-in-time view of the recorder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub processed_count: u64,
    pub cache_hits: u64,
    pub average_latency_ms: f64,
}

/// Rolling latency window plus processed/cache-hit counters.
pub struct PerformanceRecorder {
    inner: Mutex<RecorderInner>,
}

struct RecorderInner {
    latencies: VecDeque<f64>,
    capacity: usize,
    processed: u64,
    cache_hits: u64,
}

impl RecorderInner {
    fn average(&self) -> f64 {
        if self.latencies.is_empty() {
            0.0
        } else {
            self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
        }
    }
}

impl PerformanceRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RecorderInner {
                latencies: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                processed: 0,
                cache_hits: 0,
            }),
        }
    }

    /// Record one processed frame and its latency.
    pub fn record(&self, latency_ms: f64) {
        let mut inner = self.lock();
        if inner.latencies.len() == inner.capacity {
            inner.latencies.pop_front();
        }
        inner.latencies.push_back(latency_ms);
        inner.processed += 1;
    }

    pub fn record_cache_hit(&self) {
        self.lock().cache_hits += 1;
    }

    pub fn average_latency(&self) -> f64 {
        self.lock().average()
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let inner = self.lock();
        PerformanceSnapshot {
            processed_count: inner.processed,
            cache_hits: inner.cache_hits,
            average_latency_ms: inner.average(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
