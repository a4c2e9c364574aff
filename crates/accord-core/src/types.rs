//! Common types and constants for the Accord engine

/// Audio sample type (32-bit float throughout the mixing path)
pub type Sample = f32;

/// Default sample rate (48kHz - standard professional audio rate)
/// This is the default; the actual rate comes from the host callback config.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Default frame count per mixing tick
pub const DEFAULT_FRAMES_PER_TICK: usize = 512;

/// Default output channel count (stereo)
pub const DEFAULT_CHANNELS: usize = 2;

/// Gain deltas between ticks larger than this are ramped linearly across the
/// tick; smaller deltas are applied as an immediate step (inaudible).
pub const GAIN_RAMP_THRESHOLD: Sample = 0.001;

/// Identifier for a mixing track
///
/// Track indices are stable across removals: removing a track renumbers the
/// tracks above it, and the engine hands out updated ids through the
/// controller. Index 0 is always the first created track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(pub usize);

impl TrackId {
    /// Get the raw track index
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track {}", self.0)
    }
}

/// Lifecycle state of a playing sample
///
/// `ReadyToPlay` nodes sit in the pool; `Scheduled` nodes wait for their
/// device-clock start time; `Playing` nodes are mixed every tick until they
/// finish or are cancelled, then return to `ReadyToPlay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SampleState {
    #[default]
    ReadyToPlay = 0,
    Scheduled = 1,
    Playing = 2,
}

impl SampleState {
    /// Decode from an atomic u8 (unknown values map to `ReadyToPlay`)
    #[inline]
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SampleState::Scheduled,
            2 => SampleState::Playing,
            _ => SampleState::ReadyToPlay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_state_round_trip() {
        for state in [
            SampleState::ReadyToPlay,
            SampleState::Scheduled,
            SampleState::Playing,
        ] {
            assert_eq!(SampleState::from_u8(state as u8), state);
        }
        assert_eq!(SampleState::from_u8(200), SampleState::ReadyToPlay);
    }
}
