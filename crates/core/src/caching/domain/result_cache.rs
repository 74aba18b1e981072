use indexmap::IndexMap;

use crate::identity::frame_fingerprint::FrameFingerprint;
use crate::shared::config::CacheConfig;
use crate::shared::constants::{HIGH_MEMORY_RATIO, MODERATE_MEMORY_RATIO};
use crate::shared::request::RequestVariant;

/// Exact frame bytes plus the request variant they were processed under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub exact: [u8; 32],
    pub variant: RequestVariant,
}

impl CacheKey {
    pub fn new(fingerprint: &FrameFingerprint, variant: RequestVariant) -> Self {
        Self {
            exact: *fingerprint.exact(),
            variant,
        }
    }
}

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    fingerprint: FrameFingerprint,
    value: V,
}

/// Bounded least-recently-used store of processing results.
///
/// One ordered map serves both access paths: lookup by key, and iteration
/// from most- to least-recently used for the perceptual sweep. Front is
/// least recent.
pub struct ResultCache<V> {
    entries: IndexMap<CacheKey, CacheEntry<V>>,
    max_entries: usize,
    target_size: usize,
    perceptual_sweep: usize,
    min_frame_diff: f64,
    moderate_memory_percent: f64,
    high_memory_percent: f64,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: IndexMap::with_capacity(config.max_entries),
            max_entries: config.max_entries,
            target_size: config.max_entries,
            perceptual_sweep: config.perceptual_sweep,
            min_frame_diff: config.min_frame_diff,
            moderate_memory_percent: config.moderate_memory_percent,
            high_memory_percent: config.high_memory_percent,
        }
    }

    /// Exact-match lookup; a hit becomes the most recently used entry.
    pub fn lookup(&mut self, key: &CacheKey) -> Option<V> {
        let idx = self.entries.get_index_of(key)?;
        Some(self.touch(idx))
    }

    /// Checks the most recent entries of the same variant for a visually
    /// similar frame.
    pub fn lookup_similar(
        &mut self,
        fingerprint: &FrameFingerprint,
        variant: &RequestVariant,
    ) -> Option<V> {
        let (idx, _) = self
            .entries
            .iter()
            .enumerate()
            .rev()
            .take(self.perceptual_sweep)
            .find(|(_, (key, entry))| {
                &key.variant == variant
                    && entry.fingerprint.is_similar(fingerprint, self.min_frame_diff)
            })?;
        Some(self.touch(idx))
    }

    /// Inserts or replaces, marking the entry most recently used, then
    /// evicts down to the target size.
    pub fn insert(&mut self, fingerprint: FrameFingerprint, variant: RequestVariant, value: V) {
        let key = CacheKey::new(&fingerprint, variant);
        let (idx, _) = self
            .entries
            .insert_full(key, CacheEntry { fingerprint, value });
        let last = self.entries.len() - 1;
        self.entries.move_index(idx, last);
        self.evict_to_target();
    }

    /// Drops every entry, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Recomputes the target size from system memory usage and evicts
    /// anything above it. Returns the number of evicted entries.
    pub fn retarget(&mut self, memory_percent: f64) -> usize {
        let ratio = if memory_percent > self.high_memory_percent {
            HIGH_MEMORY_RATIO
        } else if memory_percent > self.moderate_memory_percent {
            MODERATE_MEMORY_RATIO
        } else {
            1.0
        };
        self.target_size = (self.max_entries as f64 * ratio) as usize;
        self.evict_to_target()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    fn touch(&mut self, idx: usize) -> V {
        let last = self.entries.len() - 1;
        self.entries.move_index(idx, last);
        self.entries[last].value.clone()
    }

    fn evict_to_target(&mut self) -> usize {
        let excess = self.entries.len().saturating_sub(self.target_size);
        if excess > 0 {
            self.entries.drain(..excess);
            log::debug!(
                "Evicted {excess} cache entries (target {})",
                self.target_size
            );
        }
        excess
    }
}
