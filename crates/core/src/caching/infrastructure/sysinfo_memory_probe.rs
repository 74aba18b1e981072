use sysinfo::System;

use crate::caching::domain::memory_probe::MemoryProbe;

/// Memory probe backed by `sysinfo`, refreshing only the memory counters.
pub struct SysinfoMemoryProbe {
    system: System,
}

impl SysinfoMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoMemoryProbe {
    fn memory_percent(&mut self) -> Option<f64> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        Some(self.system.used_memory() as f64 / total as f64 * 100.0)
    }
}
