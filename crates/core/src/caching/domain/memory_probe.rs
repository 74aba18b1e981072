/// Reports how much of the system's memory is in use.
pub trait MemoryProbe: Send {
    /// Used memory as a percentage of total, or `None` if unknown.
    fn memory_percent(&mut self) -> Option<f64>;
}

/// Probe returning a fixed reading. Useful where no real measurement is
/// wanted, such as tests.
pub struct FixedMemoryProbe(pub Option<f64>);

impl MemoryProbe for FixedMemoryProbe {
    fn memory_percent(&mut self) -> Option<f64> {
        self.0
    }
}
