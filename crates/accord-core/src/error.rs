//! Engine error types
//!
//! Four failure families, each surfaced at the calling-context call site:
//! capacity (allocator exhaustion), configuration (channel mismatch),
//! scheduling (too little lead time - reported as an inert handle, not an
//! error value), and contract violations (double contributor, double pan
//! set). Nothing here ever crosses the real-time tick boundary: the tick
//! skips a broken sample or track for one tick instead of failing.

use thiserror::Error;

use crate::types::TrackId;

/// Errors from the shared-buffer chunk allocator
#[derive(Error, Debug)]
pub enum AllocError {
    /// No chunk large enough, even after a defragmentation pass
    #[error("allocator exhausted: requested {requested} samples, largest free region is {largest_free}")]
    Exhausted {
        requested: usize,
        largest_free: usize,
    },

    /// Not enough contiguous tail space for a fixed (permanent) allocation
    #[error("fixed region exhausted: requested {requested} samples for \"{label}\", {available} tail samples remain")]
    FixedExhausted {
        requested: usize,
        available: usize,
        label: String,
    },

    /// Zero-length allocations are rejected outright
    #[error("requested a zero-length allocation")]
    ZeroLength,
}

/// Result type for allocator operations
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors from the mixing engine's calling-context surface
#[derive(Error, Debug)]
pub enum EngineError {
    /// The hardware callback delivered a different channel count than the
    /// engine was configured for; the mixing path is disabled rather than
    /// writing corrupt interleaved audio
    #[error("channel count mismatch: configured {configured}, callback delivered {actual}")]
    ChannelMismatch { configured: usize, actual: usize },

    /// A second contributor was attached to a track that already has one
    #[error("{0} already has a contributor attached")]
    ContributorTaken(TrackId),

    /// Fixed pan gains may only be set once
    #[error("fixed pan gains were already set")]
    PanAlreadySet,

    /// The referenced track does not exist
    #[error("no such track: index {0}")]
    NoSuchTrack(usize),

    /// The calling-context -> tick command ring is full
    #[error("engine command queue is full")]
    CommandQueueFull,

    /// Allocation failure bubbling up from track/premix setup
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
