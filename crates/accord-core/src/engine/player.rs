//! Player: the periodic mixing tick and its calling-context controller
//!
//! [`Player::new`] creates the pair: the `Player` is moved to the real-time
//! context and driven by the hardware callback through [`Player::tick`]; the
//! [`PlayerController`] stays with the calling context and feeds it over a
//! wait-free command ring. The tick never allocates, never locks, and never
//! fails loudly - a broken sample or track is skipped for the tick.
//!
//! Per-tick order: drain the command ring, promote scheduled samples whose
//! start time falls inside this tick, drain immediates, mix the playing
//! queue, trim finished nodes, run the track pass, master filters, clip and
//! broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::alloc::DataAllocator;
use crate::config::EngineConfig;
use crate::data::{self, AudioData};
use crate::error::{EngineError, EngineResult};
use crate::types::{Sample, SampleState, TrackId, GAIN_RAMP_THRESHOLD};

use super::command::{EngineCommand, NewTrack, PlayRequest, PlayTarget, StartTime, StreamObserver};
use super::filter::{Filter, FilterChain};
use super::pan::{pan_mix, DynamicPanInfo, PanInfo};
use super::queue::{SamplePool, SampleQueue, NIL_SAMPLE};
use super::sample::{
    BufferedSample, HandleShared, LoopSource, MixSource, MixState, PlayHandle, ResampleSource,
    NO_END,
};
use super::track::{Track, TrackContributor};

/// Monotonic device clock, published as frames since engine start so the
/// calling context can validate scheduling lead times without a lock.
pub struct DeviceClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl DeviceClock {
    fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Frames rendered since engine start
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Device time in seconds
    #[inline]
    pub fn seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }
}

/// Tick-owned scratch storage, created once at startup and threaded through
/// the mix instead of living in global state
struct ScratchBuffers {
    /// One tick of mono samples for gain/fade staging
    mono: Box<[Sample]>,
}

impl ScratchBuffers {
    fn new(frames: usize) -> Self {
        Self {
            mono: vec![0.0; frames].into_boxed_slice(),
        }
    }
}

/// The real-time half: owns the playing queue, tracks, filters and scratch
/// exclusively. Everything it renders goes into the interleaved output
/// buffer handed to [`tick`](Player::tick).
pub struct Player {
    config: EngineConfig,
    commands: rtrb::Consumer<EngineCommand>,
    pool: SamplePool,
    scheduled: SampleQueue,
    immediate: SampleQueue,
    playing: SampleQueue,
    tracks: Vec<Track>,
    master_filters: FilterChain,
    observers: Vec<StreamObserver>,
    scratch: ScratchBuffers,
    clock: Arc<DeviceClock>,
    /// Latched on the first callback with a wrong channel count; the mixing
    /// path stays disabled rather than writing corrupt interleaved audio
    mismatch_latched: bool,
    /// A clear-all with fade arrived; this tick's output ramps to zero and
    /// every queued sample is flushed afterwards
    clear_fade_pending: bool,
}

impl Player {
    /// Create the player and its controller. The player moves to the audio
    /// context; the controller stays behind and is the only way in.
    pub fn new(config: EngineConfig, allocator: Arc<DataAllocator>) -> (Player, PlayerController) {
        log::info!(
            "player: {} frames/tick at {}Hz, {} channels, {} sample nodes",
            config.frames_per_tick,
            config.sample_rate,
            config.channels,
            config.max_samples
        );
        let (producer, consumer) = rtrb::RingBuffer::new(config.command_capacity);
        let clock = Arc::new(DeviceClock::new(config.sample_rate));
        let player = Player {
            pool: SamplePool::with_capacity(config.max_samples),
            scheduled: SampleQueue::new(),
            immediate: SampleQueue::new(),
            playing: SampleQueue::new(),
            tracks: Vec::new(),
            master_filters: FilterChain::new(),
            observers: Vec::new(),
            scratch: ScratchBuffers::new(config.frames_per_tick),
            clock: Arc::clone(&clock),
            commands: consumer,
            mismatch_latched: false,
            clear_fade_pending: false,
            config: config.clone(),
        };
        let controller = PlayerController {
            commands: producer,
            allocator,
            config,
            clock,
            contributors: Vec::new(),
        };
        (player, controller)
    }

    /// The device clock this player advances
    pub fn clock(&self) -> &Arc<DeviceClock> {
        &self.clock
    }

    /// Render one tick into `out` (interleaved, `frames_per_tick * channels`
    /// samples). Driven by the periodic hardware callback.
    pub fn tick(&mut self, out: &mut [Sample], channels: usize) {
        let frames = self.config.frames_per_tick;
        if channels != self.config.channels || out.len() != frames * channels {
            if !self.mismatch_latched {
                self.mismatch_latched = true;
                log::error!(
                    "{}; mixing disabled",
                    EngineError::ChannelMismatch {
                        configured: self.config.channels,
                        actual: channels,
                    }
                );
            }
        }
        if self.mismatch_latched {
            out.fill(0.0);
            self.clock.advance(frames as u64);
            return;
        }

        out.fill(0.0);
        let tick_start = self.clock.seconds();
        let tick_end = tick_start + self.config.tick_seconds();

        self.drain_commands();
        for track in &mut self.tracks {
            track.begin_tick();
        }
        self.promote_scheduled(tick_start, tick_end, frames);
        self.drain_immediate();

        let mixed_any = self.mix_playing(out, channels, frames);
        self.playing.remove_flagged(&mut self.pool);

        // Tracks and master filters run even on silent ticks - they may
        // synthesize - so emptiness is only decided after both passes
        let mut non_silent = mixed_any;
        for track in &mut self.tracks {
            non_silent |= track.run_tick(out, channels, frames);
        }
        if !self.master_filters.is_empty() {
            non_silent = self
                .master_filters
                .process(out, 0, frames * channels, !non_silent);
        }
        if non_silent {
            for s in out.iter_mut() {
                *s = s.clamp(-1.0, 1.0);
            }
        }

        if self.clear_fade_pending {
            self.clear_fade_pending = false;
            for frame in 0..frames {
                let gain = (frames - 1 - frame) as Sample / frames as Sample;
                for s in &mut out[frame * channels..(frame + 1) * channels] {
                    *s *= gain;
                }
            }
            self.flush_all();
        }

        for observer in &mut self.observers {
            observer(out, non_silent);
        }
        self.clock.advance(frames as u64);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                EngineCommand::Play(request) => self.admit(*request),
                EngineCommand::CreateTrack(new_track) => {
                    self.tracks.push(Track::new(new_track.premix, new_track.pan));
                }
                EngineCommand::RemoveTrack(track) => self.remove_track_now(track),
                EngineCommand::AttachContributor { track, contributor } => {
                    match self.tracks.get_mut(track.index()) {
                        Some(t) => t.attach_contributor(contributor),
                        None => log::warn!("attach to missing {track}"),
                    }
                }
                EngineCommand::SetTrackMuted { track, muted } => {
                    if let Some(t) = self.tracks.get_mut(track.index()) {
                        t.set_muted(muted);
                    }
                }
                EngineCommand::SetTrackGain {
                    track,
                    channel,
                    gain,
                } => {
                    if let Some(t) = self.tracks.get_mut(track.index()) {
                        t.set_gain(channel, gain);
                    }
                }
                EngineCommand::AddTrackFilter { track, filter } => {
                    if let Some(t) = self.tracks.get_mut(track.index()) {
                        t.add_filter(filter);
                    }
                }
                EngineCommand::AddMasterFilter(filter) => self.master_filters.push(filter),
                EngineCommand::ObserveMaster(observer) => self.observers.push(observer),
                EngineCommand::ObserveTrack { track, observer } => {
                    if let Some(t) = self.tracks.get_mut(track.index()) {
                        t.add_observer(observer);
                    }
                }
                EngineCommand::ClearAll { fade } => {
                    if fade {
                        self.clear_fade_pending = true;
                    } else {
                        self.flush_all();
                    }
                }
            }
        }
    }

    /// Take a pooled node for a new request. A full pool drops the request
    /// and finishes its handle; the tick never grows the pool.
    fn admit(&mut self, request: PlayRequest) {
        let Some(id) = self.pool.acquire() else {
            log::warn!(
                "sample pool exhausted ({} nodes), dropping play request",
                self.pool.capacity()
            );
            request.handle.set_state(SampleState::ReadyToPlay);
            return;
        };
        let (start_time, is_scheduled) = match request.start {
            StartTime::Immediate => (0.0, false),
            StartTime::At(time) => (time, true),
        };
        self.pool.get_mut(id).init(
            request.data,
            request.source,
            request.target,
            request.handle,
            start_time,
        );
        if is_scheduled {
            self.scheduled.push_back(&mut self.pool, id);
        } else {
            self.immediate.push_back(&mut self.pool, id);
        }
    }

    /// Move every scheduled sample whose start time falls inside this tick
    /// into the playing queue with a sample-accurate buffer-local offset.
    /// Runs before mixing, so a sample starting mid-tick is mixed with the
    /// correct sub-buffer offset on its very first tick.
    fn promote_scheduled(&mut self, tick_start: f64, tick_end: f64, frames: usize) {
        if self.scheduled.is_empty() {
            return;
        }
        let waiting = std::mem::replace(&mut self.scheduled, SampleQueue::new());
        let mut cur = waiting.head();
        while cur != NIL_SAMPLE {
            let node = self.pool.get(cur);
            let next = node.next;
            let discarded = node.stop_requested() || node.should_remove;
            let start = node.start_time;
            if discarded {
                self.pool.release(cur);
            } else if start < tick_end {
                let offset = ((start - tick_start) * self.config.sample_rate as f64)
                    .round()
                    .clamp(0.0, (frames - 1) as f64) as usize;
                {
                    let node = self.pool.get_mut(cur);
                    node.buffer_offset = offset;
                    if let Some(handle) = &node.handle {
                        handle.set_state(SampleState::Playing);
                    }
                }
                self.playing.push_back(&mut self.pool, cur);
            } else {
                self.scheduled.push_back(&mut self.pool, cur);
            }
            cur = next;
        }
    }

    fn drain_immediate(&mut self) {
        let mut cur = self.immediate.head();
        while cur != NIL_SAMPLE {
            let node = self.pool.get(cur);
            if let Some(handle) = &node.handle {
                handle.set_state(SampleState::Playing);
            }
            cur = node.next;
        }
        let mut staged = std::mem::replace(&mut self.immediate, SampleQueue::new());
        self.playing.concat(&mut self.pool, &mut staged);
    }

    /// Walk the playing queue, mixing every sample's contribution for this
    /// tick. Returns whether anything was mixed straight into the output.
    fn mix_playing(&mut self, out: &mut [Sample], channels: usize, frames: usize) -> bool {
        let mut mixed_any = false;
        let mut cur = self.playing.head();
        while cur != NIL_SAMPLE {
            let next = self.pool.get(cur).next;
            if self.pool.get(cur).should_remove {
                cur = next;
                continue;
            }
            let track_index = match &self.pool.get(cur).target {
                PlayTarget::Track(track) => Some(track.index()),
                PlayTarget::Pan(_) => None,
            };
            match track_index {
                Some(index) if index < self.tracks.len() => {
                    let (offset, written) =
                        Self::mix_node(self.pool.get_mut(cur), &mut self.scratch.mono, frames);
                    if written > 0 {
                        let dst = self.tracks[index].premix_buffer(frames);
                        data::mix(&mut dst[offset..], &self.scratch.mono[..written]);
                    }
                }
                Some(index) => {
                    log::debug!("sample targets missing track {index}, dropping");
                    self.pool.get_mut(cur).should_remove = true;
                }
                None => {
                    let (offset, written) =
                        Self::mix_node(self.pool.get_mut(cur), &mut self.scratch.mono, frames);
                    if written > 0 {
                        mixed_any = true;
                        let node = self.pool.get_mut(cur);
                        if let PlayTarget::Pan(pan) = &mut node.target {
                            if let PanInfo::Dynamic(dynamic) = pan {
                                dynamic.begin_tick();
                            }
                            pan_mix(
                                &mut out[offset * channels..],
                                &self.scratch.mono[..written],
                                channels,
                                pan,
                                1.0,
                            );
                            if let PanInfo::Dynamic(dynamic) = pan {
                                dynamic.end_tick();
                            }
                        }
                    }
                }
            }
            cur = next;
        }
        mixed_any
    }

    /// Mix one sample's contribution for this tick into `scratch`, advancing
    /// its state machine until the tick budget is spent. Returns the
    /// buffer-local offset and the number of frames staged; handle atomics
    /// are read exactly once, here at the tick boundary.
    fn mix_node(
        node: &mut BufferedSample,
        scratch: &mut [Sample],
        frames: usize,
    ) -> (usize, usize) {
        let target_gain = node.target_gain();
        let stop = node.stop_requested();
        if let Some(handle) = &node.handle {
            if let Some(end) = handle.take_end() {
                node.end_countdown = end;
            }
        }

        let mut offset = 0;
        let mut written = 0;
        let mut state = if node.first_chunk {
            MixState::LeadIn
        } else {
            MixState::Body
        };
        loop {
            state = match state {
                MixState::LeadIn => {
                    // The buffer-local start offset applies to the first
                    // mixed chunk only; later chunks start at 0
                    offset = node.buffer_offset.min(frames);
                    node.first_chunk = false;
                    MixState::Body
                }
                MixState::Body => {
                    let budget = frames - offset;
                    if budget == 0 {
                        MixState::Done
                    } else {
                        let (n, finished) = match node.source.as_mut() {
                            Some(source) => {
                                let chunk = source.next_chunk(&mut scratch[..budget]);
                                (chunk.written, chunk.finished)
                            }
                            None => match &node.data {
                                Some(audio) => {
                                    let src = &audio.samples()[node.next_read..];
                                    let n = data::copy(&mut scratch[..budget], src);
                                    node.next_read += n;
                                    (n, node.next_read >= audio.len())
                                }
                                None => (0, true),
                            },
                        };
                        written = n;

                        let previous = node.previous_gain;
                        if n > 0 && (target_gain - previous).abs() > GAIN_RAMP_THRESHOLD {
                            let step = (target_gain - previous) / n as Sample;
                            let mut gain = previous;
                            for s in &mut scratch[..n] {
                                gain += step;
                                *s *= gain;
                            }
                        } else if n > 0 && target_gain != 1.0 {
                            for s in &mut scratch[..n] {
                                *s *= target_gain;
                            }
                        }
                        node.previous_gain = target_gain;

                        if stop {
                            MixState::FadeOut
                        } else if node.end_countdown != NO_END {
                            if node.end_countdown <= n as u64 {
                                written = node.end_countdown as usize;
                                MixState::FadeOut
                            } else {
                                node.end_countdown -= n as u64;
                                if finished {
                                    node.should_remove = true;
                                }
                                MixState::Done
                            }
                        } else {
                            if finished {
                                node.should_remove = true;
                            }
                            MixState::Done
                        }
                    }
                }
                MixState::FadeOut => {
                    // Mandatory linear fade over whatever remains of the
                    // tick; the raw source is never mixed past a stop
                    data::fade_out(&mut scratch[..written], written);
                    node.should_remove = true;
                    MixState::Done
                }
                MixState::Done => break,
            };
        }
        (offset, written)
    }

    /// Remove a track; tracks above it shift down and every queued sample's
    /// target is renumbered to match
    fn remove_track_now(&mut self, track: TrackId) {
        let index = track.index();
        if index >= self.tracks.len() {
            log::warn!("remove of missing {track}");
            return;
        }
        self.tracks.remove(index);
        for head in [
            self.playing.head(),
            self.scheduled.head(),
            self.immediate.head(),
        ] {
            let mut cur = head;
            while cur != NIL_SAMPLE {
                let node = self.pool.get_mut(cur);
                if let PlayTarget::Track(target) = &mut node.target {
                    if target.index() == index {
                        node.should_remove = true;
                    } else if target.index() > index {
                        *target = TrackId(target.index() - 1);
                    }
                }
                cur = self.pool.get(cur).next;
            }
        }
    }

    /// Drop every playing and pending sample, returning all nodes to the
    /// pool and finishing their handles. Filter chains forget their state
    /// along with the playback they were processing.
    fn flush_all(&mut self) {
        let dropped = self.playing.len() + self.scheduled.len() + self.immediate.len();
        if dropped > 0 {
            log::debug!("flushing {dropped} queued samples");
        }
        self.playing.drain_all(&mut self.pool);
        self.scheduled.drain_all(&mut self.pool);
        self.immediate.drain_all(&mut self.pool);
        for track in &mut self.tracks {
            track.reset_filters();
        }
        self.master_filters.reset();
    }
}

/// The calling-context half: validates requests synchronously and ships
/// them to the tick over the command ring. Contract violations (double
/// contributor, missing track) surface here, never inside the tick.
pub struct PlayerController {
    commands: rtrb::Producer<EngineCommand>,
    allocator: Arc<DataAllocator>,
    config: EngineConfig,
    clock: Arc<DeviceClock>,
    /// Mirror of per-track contributor occupancy, kept in lockstep with the
    /// commands this controller has sent
    contributors: Vec<bool>,
}

impl PlayerController {
    /// Current device time in seconds
    pub fn now(&self) -> f64 {
        self.clock.seconds()
    }

    /// The shared device clock
    pub fn clock(&self) -> Arc<DeviceClock> {
        Arc::clone(&self.clock)
    }

    /// Play a sample as soon as possible, pan-mixed straight to the output
    pub fn play(&mut self, data: AudioData, pan: PanInfo, gain: Sample) -> PlayHandle {
        self.submit(data, None, PlayTarget::Pan(pan), gain, StartTime::Immediate)
    }

    /// Play a sample as soon as possible through a track's premix
    pub fn play_on_track(&mut self, data: AudioData, track: TrackId, gain: Sample) -> PlayHandle {
        self.submit(
            data,
            None,
            PlayTarget::Track(track),
            gain,
            StartTime::Immediate,
        )
    }

    /// Play a sample at a device-clock time. Start times less than one tick
    /// away cannot be honored sample-accurately and are rejected here with
    /// an inert handle.
    pub fn play_scheduled(
        &mut self,
        data: AudioData,
        target: PlayTarget,
        gain: Sample,
        start_time: f64,
    ) -> PlayHandle {
        if start_time - self.clock.seconds() < self.config.tick_seconds() {
            log::debug!("scheduled start {start_time:.6}s is under one tick away, rejecting");
            return PlayHandle::noop();
        }
        self.submit(data, None, target, gain, StartTime::At(start_time))
    }

    /// Play a sample on repeat (`None` = until stopped)
    pub fn play_looping(
        &mut self,
        data: AudioData,
        pan: PanInfo,
        gain: Sample,
        loops: Option<u32>,
    ) -> PlayHandle {
        let source = Box::new(LoopSource::new(data.clone(), loops));
        self.submit(
            data,
            Some(source),
            PlayTarget::Pan(pan),
            gain,
            StartTime::Immediate,
        )
    }

    /// Play a sample resampled by a fixed step (2.0 = octave up)
    pub fn play_resampled(
        &mut self,
        data: AudioData,
        pan: PanInfo,
        gain: Sample,
        step: f64,
    ) -> PlayHandle {
        let source = Box::new(ResampleSource::new(data.clone(), step));
        self.submit(
            data,
            Some(source),
            PlayTarget::Pan(pan),
            gain,
            StartTime::Immediate,
        )
    }

    fn submit(
        &mut self,
        data: AudioData,
        source: Option<Box<dyn MixSource>>,
        target: PlayTarget,
        gain: Sample,
        start: StartTime,
    ) -> PlayHandle {
        if let PlayTarget::Track(track) = &target {
            if track.index() >= self.contributors.len() {
                log::warn!("play request for missing {track}, rejecting");
                return PlayHandle::noop();
            }
        }
        let shared = HandleShared::new(gain);
        let request = PlayRequest {
            data,
            source,
            target,
            handle: Arc::clone(&shared),
            start,
        };
        match self.commands.push(EngineCommand::Play(Box::new(request))) {
            Ok(()) => PlayHandle::live(shared),
            Err(_) => {
                log::warn!("command ring full, dropping play request");
                PlayHandle::noop()
            }
        }
    }

    /// Create a track with the given initial per-channel gain. The premix
    /// region is a permanent allocation, so the tick never allocates.
    pub fn create_track(&mut self, gain: Sample) -> EngineResult<TrackId> {
        let premix = self
            .allocator
            .allocate_fixed(self.config.frames_per_tick, "track premix")?;
        let pan = DynamicPanInfo::new(self.config.channels, gain);
        self.send(EngineCommand::CreateTrack(Box::new(NewTrack {
            premix,
            pan,
        })))?;
        let id = TrackId(self.contributors.len());
        self.contributors.push(false);
        Ok(id)
    }

    /// Remove a track; remaining track ids above it shift down by one
    pub fn remove_track(&mut self, track: TrackId) -> EngineResult<()> {
        self.check_track(track)?;
        self.send(EngineCommand::RemoveTrack(track))?;
        self.contributors.remove(track.index());
        Ok(())
    }

    /// Attach a track's single premix contributor. A second attach on the
    /// same track is a contract violation, caught here synchronously.
    pub fn attach_contributor(
        &mut self,
        track: TrackId,
        contributor: Box<dyn TrackContributor>,
    ) -> EngineResult<()> {
        self.check_track(track)?;
        if self.contributors[track.index()] {
            return Err(EngineError::ContributorTaken(track));
        }
        self.send(EngineCommand::AttachContributor { track, contributor })?;
        self.contributors[track.index()] = true;
        Ok(())
    }

    /// Mute (one-tick fade, then latched) or unmute a track
    pub fn set_track_muted(&mut self, track: TrackId, muted: bool) -> EngineResult<()> {
        self.check_track(track)?;
        self.send(EngineCommand::SetTrackMuted { track, muted })
    }

    /// Change one channel's track gain; the tick ramps audible deltas
    pub fn set_track_gain(
        &mut self,
        track: TrackId,
        channel: usize,
        gain: Sample,
    ) -> EngineResult<()> {
        self.check_track(track)?;
        self.send(EngineCommand::SetTrackGain {
            track,
            channel,
            gain,
        })
    }

    /// Append a filter to a track's chain
    pub fn add_track_filter(&mut self, track: TrackId, filter: Box<dyn Filter>) -> EngineResult<()> {
        self.check_track(track)?;
        self.send(EngineCommand::AddTrackFilter { track, filter })
    }

    /// Append a filter to the master chain
    pub fn add_master_filter(&mut self, filter: Box<dyn Filter>) -> EngineResult<()> {
        self.send(EngineCommand::AddMasterFilter(filter))
    }

    /// Observe the final mixed output each tick
    pub fn observe_master(&mut self, observer: StreamObserver) -> EngineResult<()> {
        self.send(EngineCommand::ObserveMaster(observer))
    }

    /// Observe one track's post-filter premix each tick
    pub fn observe_track(&mut self, track: TrackId, observer: StreamObserver) -> EngineResult<()> {
        self.check_track(track)?;
        self.send(EngineCommand::ObserveTrack { track, observer })
    }

    /// Drop every playing and pending sample. With `fade` the next tick
    /// ramps the whole output to zero; without it the cut is immediate.
    pub fn clear_all(&mut self, fade: bool) -> EngineResult<()> {
        self.send(EngineCommand::ClearAll { fade })
    }

    fn check_track(&self, track: TrackId) -> EngineResult<()> {
        if track.index() < self.contributors.len() {
            Ok(())
        } else {
            Err(EngineError::NoSuchTrack(track.index()))
        }
    }

    fn send(&mut self, command: EngineCommand) -> EngineResult<()> {
        self.commands
            .push(command)
            .map_err(|_| EngineError::CommandQueueFull)
    }
}
