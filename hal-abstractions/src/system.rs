//! Runtime resource counters

/// Heap, PSRAM and scheduler figures sampled at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    pub heap_free: u32,
    pub heap_used: u32,
    /// Zero on boards without external RAM
    pub psram_free: u32,
    pub task_count: u32,
}

/// Source of [`MemoryStats`]
pub trait ResourceProbe {
    fn sample(&self) -> MemoryStats;
}
