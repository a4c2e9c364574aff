//! BufferedSample: one playing or scheduled sound instance
//!
//! Nodes are pooled by the player and linked by index through the sample
//! queues. A node's `AudioData` reference is taken at init and released
//! exactly once when the node returns to the pool. The calling context keeps
//! only a [`PlayHandle`] - a small block of atomics read by the tick at tick
//! boundaries, never mid-mix.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::data::{self, AudioData, ResampleCursor};
use crate::types::{Sample, SampleState};

use super::command::PlayTarget;
use super::queue::{SampleId, NIL_SAMPLE};

/// No forced end adjustment pending
pub(crate) const NO_END: u64 = u64::MAX;

/// Lock-free state shared between a [`PlayHandle`] and the tick.
///
/// All fields use `Ordering::Relaxed`: the tick only needs visibility at the
/// next tick boundary, not synchronization with other memory.
pub struct HandleShared {
    state: AtomicU8,
    cancel: AtomicBool,
    gain_bits: AtomicU32,
    /// Forced end, in frames from the moment the tick picks it up
    end_in_frames: AtomicU64,
}

impl HandleShared {
    pub(crate) fn new(gain: Sample) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(SampleState::Scheduled as u8),
            cancel: AtomicBool::new(false),
            gain_bits: AtomicU32::new(gain.to_bits()),
            end_in_frames: AtomicU64::new(NO_END),
        })
    }

    #[inline]
    pub(crate) fn set_state(&self, state: SampleState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn state(&self) -> SampleState {
        SampleState::from_u8(self.state.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn gain(&self) -> Sample {
        Sample::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    /// Take a pending end adjustment, if one was set since the last tick
    #[inline]
    pub(crate) fn take_end(&self) -> Option<u64> {
        let frames = self.end_in_frames.swap(NO_END, Ordering::Relaxed);
        (frames != NO_END).then_some(frames)
    }
}

/// Handle returned by `play`/`play_scheduled`.
///
/// A handle whose request was rejected synchronously (scheduling with less
/// than one tick of lead time, or a full command ring) is a no-op: every
/// method is safe to call and does nothing.
#[derive(Clone)]
pub struct PlayHandle {
    shared: Option<Arc<HandleShared>>,
}

impl PlayHandle {
    pub(crate) fn live(shared: Arc<HandleShared>) -> Self {
        Self {
            shared: Some(shared),
        }
    }

    /// The inert handle handed back for rejected requests
    pub(crate) fn noop() -> Self {
        Self { shared: None }
    }

    /// Whether this handle was rejected at the call site and controls nothing
    pub fn is_noop(&self) -> bool {
        self.shared.is_none()
    }

    /// Lifecycle state of the underlying sample
    pub fn state(&self) -> SampleState {
        match &self.shared {
            Some(s) => s.state(),
            None => SampleState::ReadyToPlay,
        }
    }

    /// Whether the sample has finished (returned to the pool). No-op handles
    /// report finished.
    pub fn is_finished(&self) -> bool {
        self.state() == SampleState::ReadyToPlay
    }

    /// Request a stop. Honored at the next tick boundary via a mandatory
    /// linear fade over that tick's remaining frames - never hard preemption.
    pub fn stop(&self) {
        if let Some(s) = &self.shared {
            s.cancel.store(true, Ordering::Relaxed);
        }
    }

    /// Change the playback gain. Deltas beyond the ramp threshold are ramped
    /// across one tick by the mixer.
    pub fn set_gain(&self, gain: Sample) {
        if let Some(s) = &self.shared {
            s.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
        }
    }

    /// Adjust the end: the sample stops `frames_from_now` frames after the
    /// tick picks this up, fading over the final tick.
    pub fn set_end(&self, frames_from_now: u64) {
        if let Some(s) = &self.shared {
            s.end_in_frames.store(frames_from_now, Ordering::Relaxed);
        }
    }
}

/// Result of one [`MixSource::next_chunk`] call
#[derive(Debug, Clone, Copy)]
pub struct SourceChunk {
    /// Samples written into the destination
    pub written: usize,
    /// Whether the source has no further samples
    pub finished: bool,
}

/// Per-sample mix override: instead of reading the sample's `AudioData`
/// directly, the tick pulls chunks from the source. This is the seam that
/// enables looping, envelopes and resampled playback.
pub trait MixSource: Send {
    /// Fill up to `dst.len()` samples; unwritten tail is left untouched
    fn next_chunk(&mut self, dst: &mut [Sample]) -> SourceChunk;
}

/// A looping source: replays its region `loops` times (`None` = endless)
pub struct LoopSource {
    data: AudioData,
    pos: usize,
    loops: Option<u32>,
    loops_done: u32,
}

impl LoopSource {
    pub fn new(data: AudioData, loops: Option<u32>) -> Self {
        Self {
            data,
            pos: 0,
            loops,
            loops_done: 0,
        }
    }

    /// Completed loop iterations
    pub fn loops_done(&self) -> u32 {
        self.loops_done
    }
}

impl MixSource for LoopSource {
    fn next_chunk(&mut self, dst: &mut [Sample]) -> SourceChunk {
        let src = self.data.samples();
        if src.is_empty() {
            return SourceChunk {
                written: 0,
                finished: true,
            };
        }
        let mut written = 0;
        while written < dst.len() {
            let take = (src.len() - self.pos).min(dst.len() - written);
            dst[written..written + take].copy_from_slice(&src[self.pos..self.pos + take]);
            written += take;
            self.pos += take;
            if self.pos == src.len() {
                self.pos = 0;
                self.loops_done += 1;
                if let Some(total) = self.loops {
                    if self.loops_done >= total {
                        return SourceChunk {
                            written,
                            finished: true,
                        };
                    }
                }
            }
        }
        SourceChunk {
            written,
            finished: false,
        }
    }
}

/// A linearly-interpolating resampled source at a fixed step
pub struct ResampleSource {
    data: AudioData,
    consumed: usize,
    cursor: ResampleCursor,
    step: f64,
}

impl ResampleSource {
    pub fn new(data: AudioData, step: f64) -> Self {
        Self {
            data,
            consumed: 0,
            cursor: ResampleCursor::new(),
            step,
        }
    }
}

impl MixSource for ResampleSource {
    fn next_chunk(&mut self, dst: &mut [Sample]) -> SourceChunk {
        let src = self.data.samples();
        let result = data::resample_copy(dst, &src[self.consumed..], &mut self.cursor, self.step);
        self.consumed += result.consumed;
        SourceChunk {
            written: result.produced,
            finished: result.produced < dst.len(),
        }
    }
}

/// Per-tick mix progression for one sample, advanced by an explicit
/// transition function until the tick's frame budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MixState {
    /// First mixed chunk: the buffer-local start offset is still pending
    LeadIn,
    /// Normal mixing
    Body,
    /// Mandatory fade to silence over the rest of the tick, then removal
    FadeOut,
    /// Nothing further this tick; node flagged for trim if finished
    Done,
}

/// One pooled sample node
pub(crate) struct BufferedSample {
    pub data: Option<AudioData>,
    pub source: Option<Box<dyn MixSource>>,
    pub target: PlayTarget,
    pub handle: Option<Arc<HandleShared>>,
    /// Gain actually applied last tick, for pop-free ramping
    pub previous_gain: Sample,
    /// Scheduled device-clock start time, seconds
    pub start_time: f64,
    /// Buffer-local start offset, applied only on the first mixed chunk
    pub buffer_offset: usize,
    /// Read index into `data` (unused when `source` overrides)
    pub next_read: usize,
    pub first_chunk: bool,
    pub should_remove: bool,
    /// Frames until a forced end; NO_END when no adjustment is pending
    pub end_countdown: u64,
    pub next: SampleId,
}

impl BufferedSample {
    pub fn empty() -> Self {
        Self {
            data: None,
            source: None,
            target: PlayTarget::detached(),
            handle: None,
            previous_gain: 0.0,
            start_time: 0.0,
            buffer_offset: 0,
            next_read: 0,
            first_chunk: true,
            should_remove: false,
            end_countdown: NO_END,
            next: NIL_SAMPLE,
        }
    }

    /// (Re)initialize a pooled node for a new request
    pub fn init(
        &mut self,
        data: AudioData,
        source: Option<Box<dyn MixSource>>,
        target: PlayTarget,
        handle: Arc<HandleShared>,
        start_time: f64,
    ) {
        debug_assert!(self.data.is_none(), "init on a node still holding data");
        self.previous_gain = handle.gain();
        self.data = Some(data);
        self.source = source;
        self.target = target;
        self.handle = Some(handle);
        self.start_time = start_time;
        self.buffer_offset = 0;
        self.next_read = 0;
        self.first_chunk = true;
        self.should_remove = false;
        self.end_countdown = NO_END;
        self.next = NIL_SAMPLE;
    }

    /// Release the audio data reference (exactly once) and return the node
    /// to its pooled state
    pub fn clear(&mut self) {
        self.data = None;
        self.source = None;
        if let Some(handle) = self.handle.take() {
            handle.set_state(SampleState::ReadyToPlay);
        }
        self.target = PlayTarget::detached();
        self.should_remove = false;
        self.first_chunk = true;
        self.next_read = 0;
        self.end_countdown = NO_END;
        self.next = NIL_SAMPLE;
    }

    /// Target gain for this tick, read once at the tick boundary
    pub fn target_gain(&self) -> Sample {
        self.handle.as_ref().map_or(0.0, |h| h.gain())
    }

    /// Whether the calling context has requested a stop
    pub fn stop_requested(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::DataAllocator;
    use crate::config::AllocatorConfig;

    fn test_data(len: usize, fill: Sample) -> AudioData {
        let alloc = DataAllocator::new(AllocatorConfig {
            total_samples: 8192,
            bin_width: 128,
            bin_count: 8,
        });
        let mut data = alloc.allocate(len).unwrap();
        data.samples_mut().fill(fill);
        data
    }

    #[test]
    fn noop_handle_is_inert_and_finished() {
        let handle = PlayHandle::noop();
        assert!(handle.is_noop());
        assert!(handle.is_finished());
        handle.stop();
        handle.set_gain(2.0);
        handle.set_end(100);
    }

    #[test]
    fn handle_round_trips_gain_and_end() {
        let shared = HandleShared::new(0.75);
        let handle = PlayHandle::live(Arc::clone(&shared));
        assert!(!handle.is_noop());
        assert_eq!(shared.gain(), 0.75);
        handle.set_gain(0.25);
        assert_eq!(shared.gain(), 0.25);

        assert_eq!(shared.take_end(), None);
        handle.set_end(4800);
        assert_eq!(shared.take_end(), Some(4800));
        assert_eq!(shared.take_end(), None);

        assert!(!shared.cancelled());
        handle.stop();
        assert!(shared.cancelled());
    }

    #[test]
    fn loop_source_wraps_and_counts() {
        let mut data = test_data(4, 0.0);
        data.copy_from(&[1.0, 2.0, 3.0, 4.0]);
        let mut source = LoopSource::new(data, Some(2));
        let mut out = [0.0; 6];
        let chunk = source.next_chunk(&mut out);
        assert_eq!(chunk.written, 6);
        assert!(!chunk.finished);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 1.0, 2.0]);
        assert_eq!(source.loops_done(), 1);

        let mut rest = [0.0; 8];
        let chunk = source.next_chunk(&mut rest);
        assert_eq!(chunk.written, 2);
        assert!(chunk.finished);
        assert_eq!(&rest[..2], &[3.0, 4.0]);
        assert_eq!(source.loops_done(), 2);
    }

    #[test]
    fn endless_loop_source_never_finishes() {
        let mut data = test_data(3, 0.0);
        data.copy_from(&[1.0, 2.0, 3.0]);
        let mut source = LoopSource::new(data, None);
        for _ in 0..10 {
            let mut out = [0.0; 7];
            let chunk = source.next_chunk(&mut out);
            assert_eq!(chunk.written, 7);
            assert!(!chunk.finished);
        }
    }

    #[test]
    fn resample_source_streams_until_exhausted() {
        let mut data = test_data(9, 0.0);
        let ramp: Vec<Sample> = (0..9).map(|i| i as Sample).collect();
        data.copy_from(&ramp);
        let mut source = ResampleSource::new(data, 2.0);
        let mut out = [0.0; 5];
        let chunk = source.next_chunk(&mut out);
        assert_eq!(chunk.written, 5);
        assert!(!chunk.finished);
        assert_eq!(out, [0.0, 2.0, 4.0, 6.0, 8.0]);

        let chunk = source.next_chunk(&mut out);
        assert_eq!(chunk.written, 0);
        assert!(chunk.finished);
    }

    #[test]
    fn clear_releases_data_exactly_once() {
        let data = test_data(64, 0.5);
        let retained = data.clone();
        let shared = HandleShared::new(1.0);
        let mut node = BufferedSample::empty();
        node.init(data, None, PlayTarget::detached(), Arc::clone(&shared), 0.0);
        assert_eq!(retained.retain_count(), 2);
        assert_eq!(shared.state(), SampleState::Scheduled);

        node.clear();
        assert_eq!(retained.retain_count(), 1);
        assert_eq!(shared.state(), SampleState::ReadyToPlay);
        // Idempotent: a second clear must not double-release
        node.clear();
        assert_eq!(retained.retain_count(), 1);
    }
}
