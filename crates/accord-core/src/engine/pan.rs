//! Per-channel gain and panning
//!
//! A pan writes mono data into the interleaved output with one gain per
//! channel. `FixedPanInfo` is set exactly once and mixes as a straight line;
//! `DynamicPanInfo` supports live changes and decides per tick - in a
//! pre-mix phase - whether each channel needs a linear ramp across the tick,
//! then resets that decision in a post-mix phase so interpolation state
//! never leaks across tick boundaries.

use crate::error::{EngineError, EngineResult};
use crate::types::{Sample, GAIN_RAMP_THRESHOLD};

/// One output channel's gain with tick-scoped interpolation state
#[derive(Debug, Clone)]
pub struct ChannelGain {
    previous: Sample,
    next: Sample,
    interpolate: bool,
}

impl ChannelGain {
    pub fn new(gain: Sample) -> Self {
        Self {
            previous: gain,
            next: gain,
            interpolate: false,
        }
    }

    /// Target gain for the coming ticks (calling context, pre-handoff, or
    /// tick-side automation)
    pub fn set_target(&mut self, gain: Sample) {
        self.next = gain;
    }

    /// Current settled gain
    #[inline]
    pub fn current(&self) -> Sample {
        self.previous
    }

    /// Pre-mix phase: decide whether this tick interpolates. Deltas at or
    /// below the ramp threshold are applied as an immediate step.
    pub fn begin_tick(&mut self) {
        self.interpolate = (self.next - self.previous).abs() > GAIN_RAMP_THRESHOLD;
        if !self.interpolate {
            self.previous = self.next;
        }
    }

    /// Post-mix phase: settle the ramp so no interpolation state leaks into
    /// the next tick
    pub fn end_tick(&mut self) {
        self.previous = self.next;
        self.interpolate = false;
    }

    /// Mix `src` into one interleaved channel for this tick's frames.
    /// Must be called between `begin_tick` and `end_tick`.
    fn mix_into(&self, dst: &mut [Sample], src: &[Sample], channels: usize, channel: usize, extra_gain: Sample) {
        let frames = (dst.len() / channels).min(src.len());
        if frames == 0 {
            return;
        }
        if self.interpolate {
            let from = self.previous * extra_gain;
            let to = self.next * extra_gain;
            let step = (to - from) / frames as Sample;
            let mut gain = from;
            for (i, &s) in src[..frames].iter().enumerate() {
                dst[i * channels + channel] += s * gain;
                gain += step;
            }
        } else {
            let gain = self.previous * extra_gain;
            if gain != 0.0 {
                for (i, &s) in src[..frames].iter().enumerate() {
                    dst[i * channels + channel] += s * gain;
                }
            }
        }
    }
}

/// Pan with gains set exactly once; straight-line mix, no interpolation state
#[derive(Debug, Clone)]
pub struct FixedPanInfo {
    gains: Vec<Sample>,
    set: bool,
}

impl FixedPanInfo {
    /// A fixed pan for `channels` output channels, initially silent until
    /// the gains are set
    pub fn new(channels: usize) -> Self {
        Self {
            gains: vec![0.0; channels],
            set: false,
        }
    }

    /// Set the per-channel gains. A second call is a contract violation.
    pub fn set_gains(&mut self, gains: &[Sample]) -> EngineResult<()> {
        if self.set {
            return Err(EngineError::PanAlreadySet);
        }
        let len = self.gains.len().min(gains.len());
        self.gains[..len].copy_from_slice(&gains[..len]);
        self.set = true;
        Ok(())
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.gains.len()
    }

    #[inline]
    pub fn gain(&self, channel: usize) -> Sample {
        self.gains[channel]
    }
}

/// Pan that supports live gain changes with per-tick ramp decisions
#[derive(Debug, Clone)]
pub struct DynamicPanInfo {
    channels: Vec<ChannelGain>,
}

impl DynamicPanInfo {
    /// A dynamic pan with every channel at `gain`
    pub fn new(channels: usize, gain: Sample) -> Self {
        Self {
            channels: (0..channels).map(|_| ChannelGain::new(gain)).collect(),
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn set_gain(&mut self, channel: usize, gain: Sample) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.set_target(gain);
        }
    }

    pub fn gain(&self, channel: usize) -> Sample {
        self.channels[channel].current()
    }

    /// Pre-mix phase for all channels
    pub fn begin_tick(&mut self) {
        for ch in &mut self.channels {
            ch.begin_tick();
        }
    }

    /// Post-mix phase for all channels
    pub fn end_tick(&mut self) {
        for ch in &mut self.channels {
            ch.end_tick();
        }
    }
}

/// Pan strategies as a closed set of variants; direct-routed samples carry
/// one of these, tracks always hold a `DynamicPanInfo`.
#[derive(Debug, Clone)]
pub enum PanInfo {
    Fixed(FixedPanInfo),
    Dynamic(DynamicPanInfo),
}

impl PanInfo {
    /// A fixed stereo pan with the given left/right gains
    pub fn stereo(left: Sample, right: Sample) -> Self {
        let mut pan = FixedPanInfo::new(2);
        // First set on a fresh pan cannot fail
        let _ = pan.set_gains(&[left, right]);
        PanInfo::Fixed(pan)
    }

    pub fn channels(&self) -> usize {
        match self {
            PanInfo::Fixed(p) => p.channels(),
            PanInfo::Dynamic(p) => p.channels(),
        }
    }
}

/// Pan-mix `src` (mono) into the interleaved output, one pass per channel.
///
/// For dynamic pans the caller must bracket the tick with
/// [`DynamicPanInfo::begin_tick`] / [`DynamicPanInfo::end_tick`].
pub fn pan_mix(
    dst: &mut [Sample],
    src: &[Sample],
    channels: usize,
    pan: &PanInfo,
    extra_gain: Sample,
) {
    match pan {
        PanInfo::Fixed(p) => {
            for channel in 0..channels.min(p.channels()) {
                let gain = p.gain(channel) * extra_gain;
                if gain == 0.0 {
                    continue;
                }
                let frames = (dst.len() / channels).min(src.len());
                for (i, &s) in src[..frames].iter().enumerate() {
                    dst[i * channels + channel] += s * gain;
                }
            }
        }
        PanInfo::Dynamic(p) => {
            for (channel, ch) in p.channels.iter().enumerate().take(channels) {
                ch.mix_into(dst, src, channels, channel, extra_gain);
            }
        }
    }
}

/// The same per-channel mix for a track's dynamic pan
pub(crate) fn pan_mix_dynamic(
    dst: &mut [Sample],
    src: &[Sample],
    channels: usize,
    pan: &DynamicPanInfo,
    extra_gain: Sample,
) {
    for (channel, ch) in pan.channels.iter().enumerate().take(channels) {
        ch.mix_into(dst, src, channels, channel, extra_gain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pan_rejects_second_set() {
        let mut pan = FixedPanInfo::new(2);
        assert!(pan.set_gains(&[0.5, 0.5]).is_ok());
        assert!(matches!(
            pan.set_gains(&[1.0, 1.0]),
            Err(EngineError::PanAlreadySet)
        ));
        assert_eq!(pan.gain(0), 0.5);
    }

    #[test]
    fn fixed_pan_mixes_straight_line() {
        let pan = PanInfo::stereo(0.5, 0.25);
        let src = [1.0; 4];
        let mut out = [0.0; 8];
        pan_mix(&mut out, &src, 2, &pan, 1.0);
        for frame in out.chunks(2) {
            assert_eq!(frame[0], 0.5);
            assert_eq!(frame[1], 0.25);
        }
    }

    #[test]
    fn small_gain_delta_steps_immediately() {
        let mut ch = ChannelGain::new(0.5);
        ch.set_target(0.5 + GAIN_RAMP_THRESHOLD / 2.0);
        ch.begin_tick();
        // Below the threshold: stepped, not ramped
        assert_eq!(ch.current(), 0.5 + GAIN_RAMP_THRESHOLD / 2.0);
        ch.end_tick();
    }

    #[test]
    fn large_gain_delta_ramps_across_tick() {
        let mut pan = DynamicPanInfo::new(1, 0.0);
        pan.set_gain(0, 1.0);
        pan.begin_tick();
        let src = [1.0; 4];
        let mut out = [0.0; 4];
        pan_mix_dynamic(&mut out, &src, 1, &pan, 1.0);
        pan.end_tick();
        // Linear from the previous gain toward the new one
        assert_eq!(out, [0.0, 0.25, 0.5, 0.75]);

        // Next tick: ramp settled, no interpolation state left over
        pan.begin_tick();
        let mut out2 = [0.0; 4];
        pan_mix_dynamic(&mut out2, &src, 1, &pan, 1.0);
        pan.end_tick();
        assert_eq!(out2, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn interpolation_state_resets_even_without_mix() {
        let mut pan = DynamicPanInfo::new(2, 0.5);
        pan.set_gain(1, 1.0);
        pan.begin_tick();
        pan.end_tick();
        assert_eq!(pan.gain(1), 1.0);
    }
}
