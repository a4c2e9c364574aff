//! AudioData: a reference-counted view over the shared buffer, plus the
//! sample primitives the mixing path is built from
//!
//! The primitives are plain slice kernels so the player can run them on any
//! buffer (chunk regions, scratch, the interleaved output) without going
//! through a handle. Every kernel clamps to the shorter operand and returns
//! the number of samples actually processed; callers that care (fades and
//! resampling near a boundary) must check the returned length.

use std::sync::Arc;

use crate::alloc::{Region, SharedBuffer};
use crate::types::Sample;

/// An offset + length view over the shared sample buffer.
///
/// Cloning retains the underlying region; dropping the last clone releases
/// the chunk back to the allocator (fixed regions stay put). A region is
/// owned exclusively by whichever sample/track holds a retained handle -
/// holders share by cloning, never by copying sample data.
#[derive(Clone)]
pub struct AudioData {
    storage: Arc<SharedBuffer>,
    region: Arc<Region>,
    offset: usize,
    len: usize,
}

impl AudioData {
    pub(crate) fn from_region(
        storage: Arc<SharedBuffer>,
        region: Arc<Region>,
        offset: usize,
        len: usize,
    ) -> Self {
        debug_assert!(offset + len <= storage.len());
        Self {
            storage,
            region,
            offset,
            len,
        }
    }

    /// Usable length in samples (exactly the requested allocation size)
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start offset inside the shared buffer
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of live retained handles on this region. Exposed so callers
    /// (and tests) can verify release-exactly-once behavior.
    pub fn retain_count(&self) -> usize {
        Arc::strong_count(&self.region)
    }

    /// The region's samples.
    ///
    /// Sound per the allocator's exclusivity invariant: this handle's holder
    /// owns the region, and nothing else writes it concurrently.
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        unsafe { self.storage.slice(self.offset, self.len) }
    }

    /// Mutable access to the region's samples. The holder must be the sole
    /// writer; clones of this handle exist only across the play handoff,
    /// where writes have already stopped.
    #[inline]
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        unsafe { self.storage.slice_mut(self.offset, self.len) }
    }

    /// Fill the region with silence
    pub fn clear(&mut self) {
        self.samples_mut().fill(0.0);
    }

    /// Reverse the region in place
    pub fn reverse(&mut self) {
        self.samples_mut().reverse();
    }

    /// Copy from a slice into the start of the region; returns samples copied
    pub fn copy_from(&mut self, src: &[Sample]) -> usize {
        copy(self.samples_mut(), src)
    }

    /// Additively mix a slice into the start of the region
    pub fn mix_from(&mut self, src: &[Sample], gain: Sample) -> usize {
        mix_with_gain(self.samples_mut(), src, gain)
    }

    /// Linear fade-in over the first `len` samples (clamped)
    pub fn fade_in(&mut self, len: usize) -> usize {
        fade_in(self.samples_mut(), len)
    }

    /// Linear fade-out over the last `len` samples (clamped)
    pub fn fade_out(&mut self, len: usize) -> usize {
        fade_out(self.samples_mut(), len)
    }

    /// First sign change at or after `start`, if any
    pub fn find_zero_crossing(&self, start: usize) -> Option<usize> {
        find_zero_crossing(self.samples(), start)
    }
}

impl std::fmt::Debug for AudioData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioData")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("retained", &self.retain_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Slice kernels
// ---------------------------------------------------------------------------

/// Plain copy; returns samples copied
pub fn copy(dst: &mut [Sample], src: &[Sample]) -> usize {
    let len = dst.len().min(src.len());
    dst[..len].copy_from_slice(&src[..len]);
    len
}

/// Additive mix
pub fn mix(dst: &mut [Sample], src: &[Sample]) -> usize {
    let len = dst.len().min(src.len());
    for (d, s) in dst[..len].iter_mut().zip(&src[..len]) {
        *d += s;
    }
    len
}

/// Gain-scaled copy
pub fn copy_with_gain(dst: &mut [Sample], src: &[Sample], gain: Sample) -> usize {
    let len = dst.len().min(src.len());
    for (d, s) in dst[..len].iter_mut().zip(&src[..len]) {
        *d = s * gain;
    }
    len
}

/// Gain-scaled additive mix
pub fn mix_with_gain(dst: &mut [Sample], src: &[Sample], gain: Sample) -> usize {
    let len = dst.len().min(src.len());
    for (d, s) in dst[..len].iter_mut().zip(&src[..len]) {
        *d += s * gain;
    }
    len
}

/// Copy with a per-sample-linear gain ramp from `from` to `to` across the
/// processed length. Pop-free gain changes across one tick.
pub fn copy_with_ramp(dst: &mut [Sample], src: &[Sample], from: Sample, to: Sample) -> usize {
    let len = dst.len().min(src.len());
    if len == 0 {
        return 0;
    }
    let step = (to - from) / len as Sample;
    let mut gain = from;
    for (d, s) in dst[..len].iter_mut().zip(&src[..len]) {
        *d = s * gain;
        gain += step;
    }
    len
}

/// Additive mix with a per-sample-linear gain ramp
pub fn mix_with_ramp(dst: &mut [Sample], src: &[Sample], from: Sample, to: Sample) -> usize {
    let len = dst.len().min(src.len());
    if len == 0 {
        return 0;
    }
    let step = (to - from) / len as Sample;
    let mut gain = from;
    for (d, s) in dst[..len].iter_mut().zip(&src[..len]) {
        *d += s * gain;
        gain += step;
    }
    len
}

/// Linear fade-in over the first `len` samples (clamped to the buffer)
pub fn fade_in(buf: &mut [Sample], len: usize) -> usize {
    let len = len.min(buf.len());
    for (i, s) in buf[..len].iter_mut().enumerate() {
        *s *= i as Sample / len as Sample;
    }
    len
}

/// Linear fade-out over the last `len` samples; the final sample reaches
/// exactly zero
pub fn fade_out(buf: &mut [Sample], len: usize) -> usize {
    let len = len.min(buf.len());
    let start = buf.len() - len;
    for (j, s) in buf[start..].iter_mut().enumerate() {
        *s *= (len - 1 - j) as Sample / len as Sample;
    }
    len
}

/// Squared (equal-power-ish) fade-in over the first `len` samples
pub fn fade_in_squared(buf: &mut [Sample], len: usize) -> usize {
    let len = len.min(buf.len());
    for (i, s) in buf[..len].iter_mut().enumerate() {
        let g = i as Sample / len as Sample;
        *s *= g * g;
    }
    len
}

/// Squared fade-out over the last `len` samples
pub fn fade_out_squared(buf: &mut [Sample], len: usize) -> usize {
    let len = len.min(buf.len());
    let start = buf.len() - len;
    for (j, s) in buf[start..].iter_mut().enumerate() {
        let g = (len - 1 - j) as Sample / len as Sample;
        *s *= g * g;
    }
    len
}

/// Fractional read position carried across resampling calls.
///
/// The cursor accumulates; it never wraps silently. Callers must call
/// [`ResampleCursor::reset`] at loop and seek boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResampleCursor {
    frac: f64,
}

impl ResampleCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset at a loop or seek boundary
    pub fn reset(&mut self) {
        self.frac = 0.0;
    }

    /// Current fractional offset into the next source sample
    pub fn frac(&self) -> f64 {
        self.frac
    }
}

/// Outcome of a resampling call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResampleResult {
    /// Output samples produced
    pub produced: usize,
    /// Source samples consumed (fully behind the cursor; safe to discard)
    pub consumed: usize,
}

/// Fixed-step linear-interpolation resampling copy.
///
/// Produces up to `dst.len()` samples, stopping early when the source runs
/// out. At step 1.0 (cursor at zero) this is an exact identity copy; at step
/// 2.0, producing L samples consumes exactly 2L - 1 source samples.
pub fn resample_copy(
    dst: &mut [Sample],
    src: &[Sample],
    cursor: &mut ResampleCursor,
    step: f64,
) -> ResampleResult {
    resample_inner(dst, src, cursor, step, step)
}

/// Variable-step resampling copy: the step interpolates linearly from
/// `from_step` to `to_step` across the produced samples (glide / pitch bend).
pub fn resample_copy_varying(
    dst: &mut [Sample],
    src: &[Sample],
    cursor: &mut ResampleCursor,
    from_step: f64,
    to_step: f64,
) -> ResampleResult {
    resample_inner(dst, src, cursor, from_step, to_step)
}

fn resample_inner(
    dst: &mut [Sample],
    src: &[Sample],
    cursor: &mut ResampleCursor,
    from_step: f64,
    to_step: f64,
) -> ResampleResult {
    if dst.is_empty() || src.is_empty() {
        return ResampleResult {
            produced: 0,
            consumed: 0,
        };
    }
    let step_delta = if dst.len() > 1 {
        (to_step - from_step) / (dst.len() - 1) as f64
    } else {
        0.0
    };
    let mut pos = cursor.frac;
    let mut step = from_step;
    let mut produced = 0;
    for d in dst.iter_mut() {
        let base = pos as usize;
        let frac = pos - base as f64;
        if base + 1 < src.len() {
            let a = src[base] as f64;
            let b = src[base + 1] as f64;
            *d = (a + (b - a) * frac) as Sample;
        } else if base + 1 == src.len() && frac == 0.0 {
            *d = src[base];
        } else {
            break;
        }
        produced += 1;
        pos += step;
        step += step_delta;
    }
    let consumed = (pos as usize).min(src.len());
    cursor.frac = pos - consumed as f64;
    ResampleResult { produced, consumed }
}

/// Write a mono slice into one channel of an interleaved multi-channel
/// buffer; returns frames written
pub fn interleave_into(
    dst: &mut [Sample],
    src: &[Sample],
    channels: usize,
    channel: usize,
) -> usize {
    debug_assert!(channel < channels);
    let frames = (dst.len() / channels).min(src.len());
    for (i, &s) in src[..frames].iter().enumerate() {
        dst[i * channels + channel] = s;
    }
    frames
}

/// Read one channel of an interleaved multi-channel buffer into a mono
/// slice; returns frames read
pub fn deinterleave_from(
    dst: &mut [Sample],
    src: &[Sample],
    channels: usize,
    channel: usize,
) -> usize {
    debug_assert!(channel < channels);
    let frames = (src.len() / channels).min(dst.len());
    for (i, d) in dst[..frames].iter_mut().enumerate() {
        *d = src[i * channels + channel];
    }
    frames
}

/// First index at or after `start` where the signal crosses or touches zero
pub fn find_zero_crossing(src: &[Sample], start: usize) -> Option<usize> {
    let begin = start.max(1);
    for i in begin..src.len() {
        let prev = src[i - 1];
        let cur = src[i];
        if (prev < 0.0 && cur >= 0.0) || (prev > 0.0 && cur <= 0.0) {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_and_mix_clamp_to_shorter_operand() {
        let mut dst = [0.0; 4];
        let src = [1.0, 2.0];
        assert_eq!(copy(&mut dst, &src), 2);
        assert_eq!(dst, [1.0, 2.0, 0.0, 0.0]);
        assert_eq!(mix_with_gain(&mut dst, &[1.0; 8], 0.5), 4);
        assert_eq!(dst, [1.5, 2.5, 0.5, 0.5]);
    }

    #[test]
    fn ramp_is_per_sample_linear() {
        let mut dst = [0.0; 4];
        copy_with_ramp(&mut dst, &[1.0; 4], 0.0, 1.0);
        assert_eq!(dst, [0.0, 0.25, 0.5, 0.75]);

        let mut acc = [1.0; 4];
        mix_with_ramp(&mut acc, &[2.0; 4], 1.0, 0.0);
        assert_eq!(acc, [3.0, 2.5, 2.0, 1.5]);
    }

    #[test]
    fn fades_leave_middle_unchanged_and_ramp_monotonically() {
        let n = 16;
        let mut buf = vec![0.8; 64];
        fade_in(&mut buf, n);
        fade_out(&mut buf, n);

        // Middle untouched
        assert!(buf[n..64 - n].iter().all(|&s| s == 0.8));
        // Monotonic non-decreasing head from exactly zero
        assert_eq!(buf[0], 0.0);
        for i in 1..n {
            assert!(buf[i] >= buf[i - 1]);
        }
        // Monotonic non-increasing tail to exactly zero
        assert_eq!(buf[63], 0.0);
        for i in 64 - n + 1..64 {
            assert!(buf[i] <= buf[i - 1]);
        }
    }

    #[test]
    fn squared_fades_sit_below_linear() {
        let mut linear = vec![1.0; 8];
        let mut squared = vec![1.0; 8];
        fade_in(&mut linear, 8);
        fade_in_squared(&mut squared, 8);
        for i in 1..8 {
            assert!(squared[i] <= linear[i]);
        }
        let mut tail = vec![1.0; 8];
        fade_out_squared(&mut tail, 8);
        assert_eq!(tail[7], 0.0);
    }

    #[test]
    fn fade_longer_than_buffer_is_clamped() {
        let mut buf = vec![1.0; 4];
        assert_eq!(fade_in(&mut buf, 100), 4);
        assert_eq!(fade_out(&mut buf, 100), 4);
    }

    #[test]
    fn resample_step_one_is_identity() {
        let src: Vec<Sample> = (0..32).map(|i| (i as Sample).sin()).collect();
        let mut dst = vec![0.0; 32];
        let mut cursor = ResampleCursor::new();
        let result = resample_copy(&mut dst, &src, &mut cursor, 1.0);
        assert_eq!(result.produced, 32);
        assert_eq!(result.consumed, 32);
        assert_eq!(dst, src);
        assert_eq!(cursor.frac(), 0.0);
    }

    #[test]
    fn resample_step_two_consumes_2l_minus_1() {
        let l = 10;
        let src: Vec<Sample> = (0..2 * l - 1).map(|i| i as Sample).collect();
        let mut dst = vec![0.0; l];
        let mut cursor = ResampleCursor::new();
        let result = resample_copy(&mut dst, &src, &mut cursor, 2.0);
        assert_eq!(result.produced, l);
        assert_eq!(result.consumed, 2 * l - 1);
        // Even source indices sampled exactly
        for (i, &s) in dst.iter().enumerate() {
            assert_eq!(s, (2 * i) as Sample);
        }
    }

    #[test]
    fn resample_interpolates_between_samples() {
        let src = [0.0, 1.0, 2.0];
        let mut dst = [0.0; 4];
        let mut cursor = ResampleCursor::new();
        let result = resample_copy(&mut dst, &src, &mut cursor, 0.5);
        assert_eq!(result.produced, 4);
        assert_eq!(dst, [0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn resample_carries_fractional_cursor_between_calls() {
        let src: Vec<Sample> = (0..16).map(|i| i as Sample).collect();
        let mut cursor = ResampleCursor::new();
        let mut first = [0.0; 3];
        let r1 = resample_copy(&mut first, &src, &mut cursor, 1.5);
        assert_eq!(r1.produced, 3);
        // pos after: 4.5; consumed 4, frac 0.5
        assert_eq!(r1.consumed, 4);
        assert_eq!(cursor.frac(), 0.5);

        let mut second = [0.0; 2];
        let r2 = resample_copy(&mut second, &src[r1.consumed..], &mut cursor, 1.5);
        assert_eq!(r2.produced, 2);
        // Continues seamlessly: positions 4.5 and 6.0 of the original source
        assert_eq!(second, [4.5, 6.0]);

        cursor.reset();
        assert_eq!(cursor.frac(), 0.0);
    }

    #[test]
    fn varying_step_glides_between_rates() {
        let src: Vec<Sample> = (0..32).map(|i| i as Sample).collect();
        let mut dst = [0.0; 3];
        let mut cursor = ResampleCursor::new();
        // Steps applied: 1.0 then 1.5 (delta 0.5 across 3 outputs)
        let result = resample_copy_varying(&mut dst, &src, &mut cursor, 1.0, 2.0);
        assert_eq!(result.produced, 3);
        assert_eq!(dst, [0.0, 1.0, 2.5]);
    }

    #[test]
    fn interleave_round_trip() {
        let left = [1.0, 2.0, 3.0];
        let right = [4.0, 5.0, 6.0];
        let mut inter = [0.0; 6];
        assert_eq!(interleave_into(&mut inter, &left, 2, 0), 3);
        assert_eq!(interleave_into(&mut inter, &right, 2, 1), 3);
        assert_eq!(inter, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        let mut mono = [0.0; 3];
        assert_eq!(deinterleave_from(&mut mono, &inter, 2, 1), 3);
        assert_eq!(mono, right);
    }

    #[test]
    fn zero_crossing_search() {
        let src = [1.0, 0.5, -0.5, -1.0, 1.0];
        assert_eq!(find_zero_crossing(&src, 0), Some(2));
        assert_eq!(find_zero_crossing(&src, 3), Some(4));
        assert_eq!(find_zero_crossing(&[1.0, 2.0, 3.0], 0), None);
    }

    #[test]
    fn audio_data_methods_operate_on_region() {
        use crate::alloc::DataAllocator;
        use crate::config::AllocatorConfig;

        let alloc = DataAllocator::new(AllocatorConfig {
            total_samples: 4096,
            bin_width: 128,
            bin_count: 8,
        });
        let mut data = alloc.allocate(100).unwrap();
        assert_eq!(data.copy_from(&vec![0.5; 100]), 100);
        assert!(data.samples().iter().all(|&s| s == 0.5));

        data.samples_mut()[10] = -0.5;
        assert_eq!(data.find_zero_crossing(0), Some(10));

        data.reverse();
        assert_eq!(data.samples()[89], -0.5);

        data.clear();
        assert!(data.samples().iter().all(|&s| s == 0.0));
    }
}
