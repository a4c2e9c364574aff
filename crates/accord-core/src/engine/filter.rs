//! Filter contract and chains
//!
//! Filters are external collaborators: the engine never looks inside their
//! math, it only honors the `process_chunk` contract. A filter receives a
//! buffer region and a declared-silence flag and returns whether it produced
//! non-silent output - a filter may turn declared-silent input into real
//! output (a reverb tail, a synth), so the empty/non-empty decision for a
//! track or the master bus is only final after its chain has run.

use crate::types::Sample;

/// The filter contract used uniformly by track and master chains.
///
/// `buffer[offset..offset + len]` is processed in place. `input_silent`
/// tells the filter the region is declared silent (all zeros); the return
/// value declares whether the output is non-silent.
pub trait Filter: Send {
    fn process_chunk(
        &mut self,
        buffer: &mut [Sample],
        offset: usize,
        len: usize,
        input_silent: bool,
    ) -> bool;

    /// Drop internal state (delay lines, envelopes). Called when all
    /// playback is cleared, never mid-tick.
    fn reset(&mut self) {}
}

/// An ordered chain of filters sharing one buffer region
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    pub fn push(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    /// Run every filter over the region in order, threading the silence flag
    /// through. Returns whether the final output is non-silent.
    pub fn process(
        &mut self,
        buffer: &mut [Sample],
        offset: usize,
        len: usize,
        input_silent: bool,
    ) -> bool {
        let mut silent = input_silent;
        for filter in &mut self.filters {
            let produced = filter.process_chunk(buffer, offset, len, silent);
            silent = !produced;
        }
        !silent
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_filters {
    use super::*;

    /// Multiplies the region by a constant; silent in = silent out
    pub struct GainFilter(pub Sample);

    impl Filter for GainFilter {
        fn process_chunk(
            &mut self,
            buffer: &mut [Sample],
            offset: usize,
            len: usize,
            input_silent: bool,
        ) -> bool {
            for s in &mut buffer[offset..offset + len] {
                *s *= self.0;
            }
            !input_silent && self.0 != 0.0
        }
    }

    /// Writes a constant into the region regardless of input - models a
    /// filter that synthesizes sound from declared-silent input
    pub struct ToneFilter(pub Sample);

    impl Filter for ToneFilter {
        fn process_chunk(
            &mut self,
            buffer: &mut [Sample],
            offset: usize,
            len: usize,
            _input_silent: bool,
        ) -> bool {
            for s in &mut buffer[offset..offset + len] {
                *s = self.0;
            }
            self.0 != 0.0
        }
    }

    /// Writes the number of chunks processed so far into the region - models
    /// a stateful filter whose state must survive ticks but not a reset
    pub struct ChunkCountFilter {
        pub chunks: u32,
    }

    impl Filter for ChunkCountFilter {
        fn process_chunk(
            &mut self,
            buffer: &mut [Sample],
            offset: usize,
            len: usize,
            _input_silent: bool,
        ) -> bool {
            for s in &mut buffer[offset..offset + len] {
                *s = self.chunks as Sample;
            }
            self.chunks += 1;
            true
        }

        fn reset(&mut self) {
            self.chunks = 0;
        }
    }
}
