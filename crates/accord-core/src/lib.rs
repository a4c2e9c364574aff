//! Accord Core - Real-time audio mixing engine
//!
//! Renders many concurrent sound sources into a periodically-demanded,
//! fixed-size hardware output buffer with no garbage-collection pauses:
//! - [`alloc::DataAllocator`]: chunk allocator over one pre-allocated
//!   sample buffer, with size-class bins and single-pass defragmentation
//! - [`data::AudioData`]: refcounted buffer views with copy/mix/fade/
//!   resample primitives
//! - [`engine::Player`]: the sample-accurate mixing tick, with tracks,
//!   panning, filter chains and scheduled playback
//!
//! Audio decoding, device backends and DSP filter internals live outside
//! this crate; it consumes decoded buffers and a periodic callback.

pub mod alloc;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod types;

pub use types::*;
