//! Engine and allocator configuration
//!
//! Plain serde-derived structs so hosts can load them from config files.
//! The engine itself only ever sees the deserialized struct; all values are
//! fixed at startup - nothing here is changed while the tick is running.

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_CHANNELS, DEFAULT_FRAMES_PER_TICK, DEFAULT_SAMPLE_RATE};

/// Configuration for the shared-buffer chunk allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Total size of the shared sample buffer, allocated once at startup
    pub total_samples: usize,
    /// Width of one size-class bin, in samples
    pub bin_width: usize,
    /// Number of size-class bins; requests larger than
    /// `bin_width * bin_count` are served unbinned from the frontier
    pub bin_count: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            // 4M samples = ~87s of mono 48kHz audio, ~16MB
            total_samples: 4 * 1024 * 1024,
            bin_width: 512,
            bin_count: 64,
        }
    }
}

impl AllocatorConfig {
    /// Largest chunk size the bins can hold; anything bigger is unbinned
    #[inline]
    pub fn top_bin_size(&self) -> usize {
        self.bin_width * self.bin_count
    }
}

/// Configuration for the mixing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sample rate of the device clock driving the tick
    pub sample_rate: u32,
    /// Fixed frame count delivered by the periodic hardware callback
    pub frames_per_tick: usize,
    /// Output channel count; a callback delivering a different count is a
    /// fatal configuration error that disables the mixing path
    pub channels: usize,
    /// Maximum number of concurrently live sample nodes (pool capacity)
    pub max_samples: usize,
    /// Capacity of the calling-context -> tick command ring
    pub command_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frames_per_tick: DEFAULT_FRAMES_PER_TICK,
            channels: DEFAULT_CHANNELS,
            max_samples: 128,
            command_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Duration of one tick in seconds
    #[inline]
    pub fn tick_seconds(&self) -> f64 {
        self.frames_per_tick as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let alloc = AllocatorConfig::default();
        assert!(alloc.top_bin_size() <= alloc.total_samples);

        let engine = EngineConfig::default();
        let tick = engine.tick_seconds();
        assert!((tick - 512.0 / 48_000.0).abs() < 1e-12);
    }
}
