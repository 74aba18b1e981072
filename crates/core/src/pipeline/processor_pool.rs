use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use crate::detection::domain::pose_detector::DetectorFactory;
use crate::pipeline::frame_processor::{FrameProcessor, ProcessError};
use crate::shared::config::{DetectionConfig, RenderConfig};

/// Frame processors for callers that process on their own thread.
///
/// A processor is checked out for the duration of one call, so no two
/// threads ever share a detector. At most `capacity` processors are ever
/// built; once they all exist, callers wait for one to come back.
pub struct ProcessorPool {
    free_tx: Sender<FrameProcessor>,
    free_rx: Receiver<FrameProcessor>,
    built: Mutex<usize>,
    capacity: usize,
    factory: Arc<dyn DetectorFactory>,
    detection: DetectionConfig,
    render: RenderConfig,
}

impl ProcessorPool {
    pub fn new(
        factory: Arc<dyn DetectorFactory>,
        detection: DetectionConfig,
        render: RenderConfig,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        let (free_tx, free_rx) = crossbeam_channel::bounded(capacity);
        Self {
            free_tx,
            free_rx,
            built: Mutex::new(0),
            capacity,
            factory,
            detection,
            render,
        }
    }

    /// Build a standalone processor with a fresh detector. Not counted
    /// against the pool capacity.
    pub fn build(&self) -> Result<FrameProcessor, ProcessError> {
        let detector = self
            .factory
            .create()
            .map_err(|e| ProcessError::DetectorUnavailable(e.to_string()))?;
        Ok(FrameProcessor::new(detector, &self.detection, &self.render))
    }

    /// Run `f` with an exclusively held processor, returning it to the pool
    /// afterwards.
    pub fn with_processor<R>(
        &self,
        f: impl FnOnce(&mut FrameProcessor) -> R,
    ) -> Result<R, ProcessError> {
        let mut processor = self.checkout()?;
        let out = f(&mut processor);
        // Never full: at most `capacity` processors exist.
        if self.free_tx.try_send(processor).is_err() {
            log::warn!("Processor pool overflow, dropping a detector");
            self.release_slot();
        }
        Ok(out)
    }

    fn checkout(&self) -> Result<FrameProcessor, ProcessError> {
        if let Ok(processor) = self.free_rx.try_recv() {
            return Ok(processor);
        }
        if self.reserve_slot() {
            log::debug!("Creating pooled pose detector");
            return self.build().inspect_err(|_| self.release_slot());
        }
        // Both channel ends live in `self`, so this only returns once a
        // processor is handed back.
        self.free_rx
            .recv()
            .map_err(|e| ProcessError::DetectorUnavailable(e.to_string()))
    }

    fn reserve_slot(&self) -> bool {
        let mut built = self.built.lock().unwrap_or_else(PoisonError::into_inner);
        if *built < self.capacity {
            *built += 1;
            true
        } else {
            false
        }
    }

    fn release_slot(&self) {
        let mut built = self.built.lock().unwrap_or_else(PoisonError::into_inner);
        *built = built.saturating_sub(1);
    }

    pub fn idle_count(&self) -> usize {
        self.free_rx.len()
    }

    /// Processors built so far, idle or checked out.
    pub fn built_count(&self) -> usize {
        *self.built.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
