use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;

use crate::pipeline::frame_processor::{FrameProcessor, ProcessError, ProcessingResult, WorkItem};
use crate::pipeline::processor_pool::ProcessorPool;
use crate::shared::config::DispatchConfig;

type Reply = Result<ProcessingResult, ProcessError>;

/// Receives every successfully processed item, whoever processed it and
/// whether or not anyone is still waiting for it.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, item: &WorkItem, result: &ProcessingResult);
}

struct QueuedWork {
    item: WorkItem,
    reply: Sender<Reply>,
}

#[derive(Default)]
struct DispatchCounters {
    queued: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    timeouts: AtomicU64,
    sync_fallbacks: AtomicU64,
    synchronous: AtomicU64,
}

/// Dispatcher counters as reported by `/health`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Items accepted onto the worker queue.
    pub queued: u64,
    /// Items a worker finished.
    pub completed: u64,
    /// Finished items whose caller had already given up.
    pub abandoned: u64,
    pub timeouts: u64,
    /// Requests that fell back to the calling thread (queue full or timeout).
    pub sync_fallbacks: u64,
    /// Requests routed to the calling thread up front.
    pub synchronous: u64,
}

/// Routes frames to the calling thread or to a fixed pool of workers.
///
/// Small frames, and requests that disallow resizing, run on the caller.
/// Everything else goes onto a bounded queue; a full queue or a worker that
/// misses the timeout sends the caller down the synchronous path instead.
/// Abandoned items still finish and reach the `CompletionSink`.
pub struct WorkDispatcher {
    sender: Option<Sender<QueuedWork>>,
    workers: Vec<JoinHandle<()>>,
    pool: Arc<ProcessorPool>,
    sink: Arc<dyn CompletionSink>,
    counters: Arc<DispatchCounters>,
    next_id: AtomicU64,
    config: DispatchConfig,
}

impl WorkDispatcher {
    /// Spawn `config.num_workers` workers, each with its own detector.
    pub fn new(
        config: DispatchConfig,
        pool: Arc<ProcessorPool>,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<Self, ProcessError> {
        let (sender, receiver) = crossbeam_channel::bounded::<QueuedWork>(config.queue_capacity);
        let counters = Arc::new(DispatchCounters::default());

        let mut workers = Vec::with_capacity(config.num_workers);
        for n in 0..config.num_workers {
            let processor = pool.build()?;
            let handle = spawn_worker(
                n,
                processor,
                receiver.clone(),
                sink.clone(),
                counters.clone(),
            )
            .map_err(|e| ProcessError::DetectorUnavailable(format!("worker spawn failed: {e}")))?;
            workers.push(handle);
        }
        log::info!(
            "Started {} pose workers (queue capacity {})",
            workers.len(),
            config.queue_capacity
        );

        Ok(Self {
            sender: Some(sender),
            workers,
            pool,
            sink,
            counters,
            next_id: AtomicU64::new(1),
            config,
        })
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn process(&self, item: WorkItem) -> Reply {
        let small = item.frame.pixel_area() < self.config.sync_pixel_area;
        if small || !item.variant.flags.resize || self.workers.is_empty() {
            self.counters.synchronous.fetch_add(1, Ordering::Relaxed);
            return self.run_sync(&item);
        }

        let Some(sender) = &self.sender else {
            return self.fallback(&item);
        };

        let (reply_tx, reply_rx) = crossbeam_channel::bounded::<Reply>(1);
        let queued = QueuedWork {
            item: item.clone(),
            reply: reply_tx,
        };
        match sender.try_send(queued) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                log::debug!("Work queue full, processing frame {} inline", item.id);
                return self.fallback(&item);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Work queue closed, processing frame {} inline", item.id);
                return self.fallback(&item);
            }
        }

        let waited = reply_rx.recv_timeout(self.config.timeout);
        // From here on a late worker reply has nowhere to go.
        drop(reply_rx);
        match waited {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Frame {} not processed within {:?}, processing inline",
                    item.id,
                    self.config.timeout
                );
                self.fallback(&item)
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("Worker dropped frame {}, processing inline", item.id);
                self.fallback(&item)
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            queued: c.queued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            sync_fallbacks: c.sync_fallbacks.load(Ordering::Relaxed),
            synchronous: c.synchronous.load(Ordering::Relaxed),
        }
    }

    fn fallback(&self, item: &WorkItem) -> Reply {
        self.counters.sync_fallbacks.fetch_add(1, Ordering::Relaxed);
        self.run_sync(item)
    }

    fn run_sync(&self, item: &WorkItem) -> Reply {
        let result = self.pool.with_processor(|p| p.process(item))??;
        self.sink.complete(item, &result);
        Ok(result)
    }
}

impl Drop for WorkDispatcher {
    fn drop(&mut self) {
        // Disconnecting the queue lets workers drain and exit.
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Pose worker panicked");
            }
        }
    }
}

fn spawn_worker(
    n: usize,
    mut processor: FrameProcessor,
    receiver: Receiver<QueuedWork>,
    sink: Arc<dyn CompletionSink>,
    counters: Arc<DispatchCounters>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("pose-worker-{n}"))
        .spawn(move || {
            for QueuedWork { item, reply } in receiver {
                let result = processor.process(&item);
                match &result {
                    Ok(done) => {
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                        sink.complete(&item, done);
                    }
                    Err(e) => log::warn!("Worker failed on frame {}: {e}", item.id),
                }
                if reply.send(result).is_err() {
                    counters.abandoned.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Frame {} finished after its caller moved on", item.id);
                }
            }
            log::debug!("Pose worker {n} stopped");
        })
}
