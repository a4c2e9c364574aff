//! Mixing engine - Player tick, sample queues, tracks, panning, filters
//!
//! The engine splits into a real-time half ([`Player`]) driven by the
//! periodic hardware callback, and a calling-context half
//! ([`PlayerController`]) that validates requests and ships them over a
//! wait-free command ring. Everything the tick touches is tick-owned;
//! the only state shared back is a handful of atomics.

mod command;
mod filter;
mod pan;
mod player;
mod queue;
mod sample;
mod track;

pub use command::{PlayTarget, StreamObserver};
pub use filter::{Filter, FilterChain};
pub use pan::{pan_mix, ChannelGain, DynamicPanInfo, FixedPanInfo, PanInfo};
pub use player::{DeviceClock, Player, PlayerController};
pub use sample::{LoopSource, MixSource, PlayHandle, ResampleSource, SourceChunk};
pub use track::TrackContributor;
