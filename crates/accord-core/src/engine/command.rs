//! Commands crossing from the calling context into the mixing tick
//!
//! The calling context never touches tick-owned state directly: every
//! mutation travels over a wait-free SPSC ring and is applied at the start
//! of the next tick. Large payloads are boxed so the command enum itself
//! stays pointer-sized for cache-friendly queueing. Once a request is
//! handed off, the calling context keeps only the atomics in its
//! [`PlayHandle`](super::sample::PlayHandle).

use std::sync::Arc;

use crate::data::AudioData;
use crate::types::{Sample, TrackId};

use super::filter::Filter;
use super::pan::{DynamicPanInfo, PanInfo};
use super::sample::{HandleShared, MixSource};
use super::track::TrackContributor;

/// Where a playing sample mixes to
pub enum PlayTarget {
    /// Premix into a track's mono buffer; the track pans it later
    Track(TrackId),
    /// Pan-mix straight into the interleaved output
    Pan(PanInfo),
}

impl PlayTarget {
    /// Placeholder target for pooled nodes; mixes nowhere
    pub(crate) fn detached() -> Self {
        PlayTarget::Pan(PanInfo::Dynamic(DynamicPanInfo::new(0, 0.0)))
    }
}

/// When a sample should start
pub(crate) enum StartTime {
    /// As soon as possible: promoted at the next tick with offset 0
    Immediate,
    /// At a device-clock time; promoted in the tick covering it, with a
    /// sample-accurate buffer-local offset
    At(f64),
}

/// One play request, fully prepared in the calling context
pub(crate) struct PlayRequest {
    pub data: AudioData,
    pub source: Option<Box<dyn MixSource>>,
    pub target: PlayTarget,
    pub handle: Arc<HandleShared>,
    pub start: StartTime,
}

/// Everything a new track needs, allocated in the calling context so the
/// tick never allocates
pub(crate) struct NewTrack {
    /// Fixed premix region, one tick of mono samples
    pub premix: AudioData,
    pub pan: DynamicPanInfo,
}

/// Observer of a mixed stream: `(samples, non_silent)`, invoked after the
/// final empty/non-empty decision each tick
pub type StreamObserver = Box<dyn FnMut(&[Sample], bool) + Send>;

/// Commands sent from the calling context to the tick
pub(crate) enum EngineCommand {
    Play(Box<PlayRequest>),
    CreateTrack(Box<NewTrack>),
    /// Remove a track; remaining tracks above it are renumbered stably
    RemoveTrack(TrackId),
    AttachContributor {
        track: TrackId,
        contributor: Box<dyn TrackContributor>,
    },
    SetTrackMuted {
        track: TrackId,
        muted: bool,
    },
    SetTrackGain {
        track: TrackId,
        channel: usize,
        gain: Sample,
    },
    AddTrackFilter {
        track: TrackId,
        filter: Box<dyn Filter>,
    },
    AddMasterFilter(Box<dyn Filter>),
    ObserveMaster(StreamObserver),
    ObserveTrack {
        track: TrackId,
        observer: StreamObserver,
    },
    /// Drop every playing and pending sample; with `fade` the final tick
    /// ramps the whole output to zero instead of cutting
    ClearAll {
        fade: bool,
    },
}
