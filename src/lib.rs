//! DCF77 longwave time-signal decoder.
//!
//! Reconstructs civil time (CET/CEST, with DST and leap-second
//! announcements) from a stream of receiver edge events and publishes each
//! validated minute to a local `ntpd` SHM refclock segment, mirroring the
//! raw third-party-buffer bits to a named pipe every three minutes.
//!
//! The pipeline, leaves to root:
//! - [`edge_source`] — edge timestamp types and the GPIO-to-decoder hand-off.
//! - [`classifier`] — per-edge interval classification into bits/seconds/minutes.
//! - [`assembler`] — per-minute bit-frame assembly.
//! - [`field_decode`] — BCD/parity field extraction into a [`field_decode::DcfTimestamp`].
//! - [`voter`] — cross-minute consistency voting and absolute-stamp synthesis.
//! - [`precision`] — pulse-width deviation tracking and the precision exponent.
//! - [`shm`] — the NTP SHM record layout and publish protocol.
//! - [`exporter`] — the three-minute block FIFO export.
//! - [`state`] — the top-level SEARCH/TRACK/LOCKED state machine tying the above together.

pub mod assembler;
pub mod classifier;
pub mod cli;
pub mod dcf77_helpers;
pub mod edge_source;
pub mod error;
pub mod exporter;
pub mod field_decode;
pub mod precision;
pub mod shm;
pub mod state;
pub mod voter;

pub use error::InitError;
pub use field_decode::DcfTimestamp;
pub use state::{Decoder, DecoderEvent, Phase};
