//! Track: per-track premix buffer, contributor slot, filter chain, pan-mix
//!
//! Each track premixes into its own fixed mono region (a permanent
//! allocation made when the track is created), runs its filter chain, and
//! pan-mixes into the interleaved output. The premix buffer is cleared
//! lazily - at most once per tick, and only when something is about to
//! write or read it.

use crate::data::{self, AudioData};
use crate::types::Sample;

use super::command::StreamObserver;
use super::filter::{Filter, FilterChain};
use super::pan::{pan_mix_dynamic, DynamicPanInfo};

/// A track's single premix contributor (a synthesizer, a sequencer voice).
/// At most one may attach per track; a second attempt is rejected at the
/// calling context.
pub trait TrackContributor: Send {
    /// Premix up to `dst.len()` mono frames for this tick; returns whether
    /// non-silent audio was written
    fn premix(&mut self, dst: &mut [Sample]) -> bool;
}

pub(crate) struct Track {
    premix: AudioData,
    filters: FilterChain,
    pan: DynamicPanInfo,
    contributor: Option<Box<dyn TrackContributor>>,
    observers: Vec<StreamObserver>,
    /// Something premixed audio this tick
    written: bool,
    /// Lazy clear already done this tick
    cleared: bool,
    muted: bool,
    /// One-tick linear mute fade still owed
    mute_fade_pending: bool,
}

impl Track {
    pub fn new(premix: AudioData, pan: DynamicPanInfo) -> Self {
        Self {
            premix,
            filters: FilterChain::new(),
            pan,
            contributor: None,
            observers: Vec::new(),
            written: false,
            cleared: false,
            muted: false,
            mute_fade_pending: false,
        }
    }

    pub fn begin_tick(&mut self) {
        self.written = false;
        self.cleared = false;
    }

    /// The premix buffer for writers (playing samples routed to this track).
    /// Clears lazily on first access each tick.
    pub fn premix_buffer(&mut self, frames: usize) -> &mut [Sample] {
        if !self.cleared {
            self.premix.samples_mut()[..frames].fill(0.0);
            self.cleared = true;
        }
        self.written = true;
        &mut self.premix.samples_mut()[..frames]
    }

    /// Tick-side attach. The controller already rejected duplicates
    /// synchronously; a race here is dropped, never panicked over.
    pub fn attach_contributor(&mut self, contributor: Box<dyn TrackContributor>) {
        if self.contributor.is_some() {
            log::warn!("contributor already attached, dropping replacement");
            return;
        }
        self.contributor = Some(contributor);
    }

    pub fn add_filter(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn add_observer(&mut self, observer: StreamObserver) {
        self.observers.push(observer);
    }

    pub fn set_gain(&mut self, channel: usize, gain: Sample) {
        self.pan.set_gain(channel, gain);
    }

    /// Mute latches after a one-tick linear fade; unmute is immediate
    pub fn set_muted(&mut self, muted: bool) {
        if muted && !self.muted {
            self.mute_fade_pending = true;
        }
        if !muted {
            self.mute_fade_pending = false;
        }
        self.muted = muted;
    }

    /// Drop filter state (delay lines, envelopes); part of clearing all
    /// playback
    pub fn reset_filters(&mut self) {
        self.filters.reset();
    }

    /// Run the per-tick track pass: contributor premix, filter chain,
    /// observers, mute latch, pan-mix into `out`. Returns whether the track
    /// contributed non-silent output.
    pub fn run_tick(&mut self, out: &mut [Sample], channels: usize, frames: usize) -> bool {
        // Contributor premix, mixing on top of routed samples
        if let Some(contributor) = self.contributor.as_mut() {
            if !self.cleared {
                self.premix.samples_mut()[..frames].fill(0.0);
                self.cleared = true;
            }
            let wrote = contributor.premix(&mut self.premix.samples_mut()[..frames]);
            self.written |= wrote;
        }

        // Filters may turn declared-silent input into real output, so the
        // empty/non-empty decision is only final after the chain has run
        let input_silent = !self.written;
        let non_silent = if self.filters.is_empty() {
            self.written
        } else {
            if !self.cleared {
                self.premix.samples_mut()[..frames].fill(0.0);
                self.cleared = true;
            }
            self.filters
                .process(self.premix.samples_mut(), 0, frames, input_silent)
        };

        if !self.observers.is_empty() {
            if !self.cleared {
                self.premix.samples_mut()[..frames].fill(0.0);
                self.cleared = true;
            }
            let buf = &self.premix.samples()[..frames];
            for observer in &mut self.observers {
                observer(buf, non_silent);
            }
        }

        if self.mute_fade_pending {
            // One-tick ramp to silence, then the latch holds
            self.mute_fade_pending = false;
            if non_silent {
                let buf = &mut self.premix.samples_mut()[..frames];
                data::fade_out(buf, frames);
                self.pan.begin_tick();
                pan_mix_dynamic(out, buf, channels, &self.pan, 1.0);
                self.pan.end_tick();
                return true;
            }
            return false;
        }
        if self.muted || !non_silent {
            return false;
        }

        self.pan.begin_tick();
        pan_mix_dynamic(out, &self.premix.samples()[..frames], channels, &self.pan, 1.0);
        self.pan.end_tick();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::DataAllocator;
    use crate::config::AllocatorConfig;
    use crate::engine::filter::test_filters::ToneFilter;

    const FRAMES: usize = 64;

    fn make_track() -> Track {
        let alloc = DataAllocator::new(AllocatorConfig {
            total_samples: 8192,
            bin_width: 128,
            bin_count: 8,
        });
        let premix = alloc.allocate_fixed(FRAMES, "premix-test").unwrap();
        Track::new(premix, DynamicPanInfo::new(2, 0.5))
    }

    struct ConstContributor(Sample);

    impl TrackContributor for ConstContributor {
        fn premix(&mut self, dst: &mut [Sample]) -> bool {
            for s in dst.iter_mut() {
                *s += self.0;
            }
            self.0 != 0.0
        }
    }

    #[test]
    fn silent_track_contributes_nothing() {
        let mut track = make_track();
        let mut out = [0.0; FRAMES * 2];
        track.begin_tick();
        assert!(!track.run_tick(&mut out, 2, FRAMES));
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn contributor_premixes_and_pans() {
        let mut track = make_track();
        track.attach_contributor(Box::new(ConstContributor(0.8)));
        let mut out = [0.0; FRAMES * 2];
        track.begin_tick();
        assert!(track.run_tick(&mut out, 2, FRAMES));
        // 0.8 premixed, 0.5 per-channel pan gain
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn second_contributor_is_dropped() {
        let mut track = make_track();
        track.attach_contributor(Box::new(ConstContributor(1.0)));
        assert!(track.contributor.is_some());
        track.attach_contributor(Box::new(ConstContributor(2.0)));
        let mut out = [0.0; FRAMES * 2];
        track.begin_tick();
        track.run_tick(&mut out, 2, FRAMES);
        // Still the first contributor's amplitude
        assert!((out[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn premix_buffer_clears_lazily_once_per_tick() {
        let mut track = make_track();
        track.begin_tick();
        track.premix_buffer(FRAMES)[0] = 0.7;
        // Second access in the same tick must not wipe earlier writes
        assert_eq!(track.premix_buffer(FRAMES)[0], 0.7);

        // A new tick clears again on first access
        track.begin_tick();
        assert_eq!(track.premix_buffer(FRAMES)[0], 0.0);
    }

    #[test]
    fn filter_can_unsilence_a_track() {
        let mut track = make_track();
        track.add_filter(Box::new(ToneFilter(0.6)));
        let mut out = [0.0; FRAMES * 2];
        track.begin_tick();
        // No writers at all, but the filter synthesizes
        assert!(track.run_tick(&mut out, 2, FRAMES));
        assert!((out[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn mute_fades_one_tick_then_latches() {
        let mut track = make_track();
        track.attach_contributor(Box::new(ConstContributor(1.0)));
        track.set_muted(true);

        let mut out = [0.0; FRAMES * 2];
        track.begin_tick();
        assert!(track.run_tick(&mut out, 2, FRAMES));
        // Fading tick: starts near the panned level, ends at zero
        assert!(out[0] > 0.4);
        assert_eq!(out[FRAMES * 2 - 1], 0.0);
        assert_eq!(out[FRAMES * 2 - 2], 0.0);

        // Latched: nothing mixed anymore
        let mut out2 = [0.0; FRAMES * 2];
        track.begin_tick();
        assert!(!track.run_tick(&mut out2, 2, FRAMES));
        assert!(out2.iter().all(|&s| s == 0.0));
        assert!(track.muted);
    }

    #[test]
    fn observer_sees_post_filter_output() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut track = make_track();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_observer = Arc::clone(&seen);
        track.add_observer(Box::new(move |buf, non_silent| {
            assert!(non_silent);
            assert!((buf[0] - 0.9).abs() < 1e-6);
            seen_in_observer.fetch_add(1, Ordering::Relaxed);
        }));
        track.attach_contributor(Box::new(ConstContributor(0.9)));

        let mut out = [0.0; FRAMES * 2];
        track.begin_tick();
        track.run_tick(&mut out, 2, FRAMES);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }
}
