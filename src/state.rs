//! Top-level state machine: wires the classifier, assembler, field decoder,
//! voter, precision estimator, SHM publisher and block exporter together
//! into the three phases from the design (SEARCH, TRACK, LOCKED).
//!
//! This is the one piece of the pipeline that owns every other piece; an
//! `EdgeSource` (or the poll loop reading an [`crate::edge_source::EdgeSlot`])
//! is the only thing that drives it, one edge at a time.

use crate::assembler::{AssembleOutcome, FrameAssembler};
use crate::classifier::{ClassifierEvent, EdgeClassifier};
use crate::edge_source::TimeInfo;
use crate::exporter::BlockExporter;
use crate::field_decode::{DcfTimestamp, FieldDecoder};
use crate::precision::PrecisionEstimator;
use crate::shm::ShmPublisher;
use crate::voter::Voter;

/// The three phases from the design: no second reference yet, a second
/// reference but no trusted absolute stamp, and a trusted absolute stamp
/// advancing under forward prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Search,
    Track,
    Locked,
}

/// What happened as a result of feeding one edge into the [`Decoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderEvent {
    /// Nothing minute-worthy happened (a mid-second pulse sample, noise
    /// below the RESYNC threshold, or a search-state probe).
    Idle,
    /// A full minute was assembled, decoded and voted on; `locked` mirrors
    /// `Decoder::phase() == Phase::Locked` at the moment of the call.
    MinuteDecoded { locked: bool },
    /// The classifier or assembler forced a drop back to SEARCH.
    Resynced,
}

/// Owns the whole decode pipeline for one receiver. Does not own an
/// [`crate::edge_source::EdgeSource`] itself: the caller drives it edge by
/// edge, from either a blocking source or a polled [`crate::edge_source::EdgeSlot`].
pub struct Decoder {
    phase: Phase,
    classifier: EdgeClassifier,
    assembler: FrameAssembler,
    field_decoder: FieldDecoder,
    voter: Voter,
    precision: PrecisionEstimator,
    shm: Option<ShmPublisher>,
    exporter: BlockExporter,
    /// The most recent voted frame, for callers that want to inspect it
    /// after a `MinuteDecoded` event.
    last: DcfTimestamp,
    last_wall: TimeInfo,
}

impl Decoder {
    pub fn new(tolerance_ms: i64, shm: Option<ShmPublisher>, fifo_path: Option<std::path::PathBuf>) -> Self {
        Self {
            phase: Phase::Search,
            classifier: EdgeClassifier::new(tolerance_ms),
            assembler: FrameAssembler::new(),
            field_decoder: FieldDecoder::new(),
            voter: Voter::new(),
            precision: PrecisionEstimator::new(),
            shm,
            exporter: BlockExporter::new(fifo_path),
            last: unset_timestamp(),
            last_wall: TimeInfo::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last(&self) -> &DcfTimestamp {
        &self.last
    }

    /// Feed one edge timestamp into the pipeline.
    pub fn on_edge(&mut self, edge: TimeInfo) -> DecoderEvent {
        self.last_wall = edge;
        let was_synchronized = self.classifier.is_synchronized();
        let event = self.classifier.handle_edge(edge);

        if !was_synchronized && self.classifier.is_synchronized() {
            self.phase = Phase::Track;
            self.assembler.begin_new_minute();
        }

        match event {
            ClassifierEvent::Resync => {
                self.drop_to_search();
                DecoderEvent::Resynced
            }
            ClassifierEvent::Noise | ClassifierEvent::PulseSample => DecoderEvent::Idle,
            ClassifierEvent::Second {
                bit,
                delta_sec,
                is_minute,
            } => {
                if is_minute && delta_sec == 0 {
                    // The SEARCH->TRACK transition on a 1.8/1.9s idle gap
                    // carries no real bit data; the frame was already reset
                    // above.
                    DecoderEvent::Idle
                } else {
                    self.on_second(bit, delta_sec, is_minute)
                }
            }
        }
    }

    fn on_second(&mut self, bit: Option<bool>, delta_sec: i64, is_minute: bool) -> DecoderEvent {
        match self.assembler.on_second(bit, delta_sec, is_minute) {
            AssembleOutcome::Continuing | AssembleOutcome::Abandoned => DecoderEvent::Idle,
            AssembleOutcome::ResyncNeeded => {
                self.drop_to_search();
                DecoderEvent::Resynced
            }
            AssembleOutcome::FrameReady => self.finish_minute(),
        }
    }

    fn finish_minute(&mut self) -> DecoderEvent {
        let frame_len = if self.field_decoder.first_minute() {
            self.field_decoder.next_minute_length()
        } else {
            self.field_decoder.this_minute_length()
        };
        let raw_bits = *self.assembler.bits();
        let decoded = self.field_decoder.decode(&raw_bits, frame_len);
        let voted = self.voter.vote(decoded);
        self.assembler.begin_new_minute();

        let precision = self.precision.update(self.classifier.min_dev());

        if voted.stamp.is_some() {
            self.phase = Phase::Locked;
            if let Some(shm) = self.shm.as_mut() {
                let tz_offset = if voted.tz == Some(true) { 2 } else { 1 };
                shm.publish(
                    voted.stamp.unwrap(),
                    self.last_wall.wall.sec,
                    (self.last_wall.wall.nsec / 1000) as i32,
                    tz_offset,
                    precision,
                    voted.leap_second_is_one == Some(true),
                );
            }
            self.exporter.push(&voted, &raw_bits);
        } else if self.phase == Phase::Locked {
            // stamp_chk fell below zero inside the Voter: drop back to
            // tracking a second reference without a full RESYNC.
            self.phase = Phase::Track;
        }

        self.last = voted;
        DecoderEvent::MinuteDecoded {
            locked: self.phase == Phase::Locked,
        }
    }

    fn drop_to_search(&mut self) {
        self.phase = Phase::Search;
        self.assembler.begin_new_minute();
        self.voter.reset();
    }
}

fn unset_timestamp() -> DcfTimestamp {
    DcfTimestamp {
        minute: None,
        hour: None,
        day: None,
        weekday: None,
        month: None,
        year: None,
        dst: None,
        leap_second: None,
        leap_second_is_one: None,
        parity_1: None,
        parity_2: None,
        parity_3: None,
        bit0_ok: false,
        bit20_ok: false,
        tz: None,
        alert: None,
        dst_change_warning: None,
        third_party_buffer: None,
        stamp: None,
        stamp_chk: -1,
        check_score: -50,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_source::Timespec;

    const BIT_BUFFER: [bool; 59] = [
        false, false, true, false, false, true, true, true, true, false, false, false, true,
        true, false, true, false, true, false, false, true, false, true, true, false, false,
        false, true, true, false, true, true, false, true, false, true, false, true, false,
        false, false, true, false, true, true, false, false, false, false, true, false, true,
        false, false, false, true, false, false, true,
    ];

    fn edge(sec: i64, nsec: i64) -> TimeInfo {
        TimeInfo {
            mono: Timespec::new(sec, nsec),
            wall: Timespec::new(1_700_000_000 + sec, nsec),
        }
    }

    /// Establishes the classifier's second reference via the SEARCH-state
    /// 0.9s idle-gap pattern, landing `Decoder` in `Phase::Track` with the
    /// reference parked at `(base_sec, 900ms)`.
    fn establish_reference(dec: &mut Decoder, base_sec: i64) {
        dec.on_edge(edge(base_sec, 0));
        dec.on_edge(edge(base_sec, 900_000_000));
    }

    /// Feeds one idealized clean minute's worth of edges, assuming the
    /// reference sits at `(base_sec, 900ms)` already. Returns the reference
    /// second after the minute gap, for chaining into the next minute.
    fn feed_minute(dec: &mut Decoder, base_sec: i64, bits: &[bool; 59]) -> (i64, DecoderEvent) {
        let mut sec = base_sec;
        let mut last = DecoderEvent::Idle;
        for &bit in bits.iter() {
            // The second reference sits at `.900s` and advances by whole
            // seconds only, so a sample `tau` past it reads as a ~100ms
            // (short/0) pulse, and `100ms` later than that as a ~200ms
            // (long/1) pulse.
            let pulse_ns = if bit { 100_000_000 } else { 0 };
            dec.on_edge(edge(sec + 1, pulse_ns));
            last = dec.on_edge(edge(sec + 1, 900_000_000));
            sec += 1;
        }
        last = dec.on_edge(edge(sec + 2, 900_000_000));
        (sec + 2, last)
    }

    #[test]
    fn test_search_state_transitions_to_track() {
        let mut dec = Decoder::new(25, None, None);
        assert_eq!(dec.phase(), Phase::Search);
        establish_reference(&mut dec, 0);
        assert_eq!(dec.phase(), Phase::Track);
    }

    #[test]
    fn test_cold_start_single_minute_decodes_without_lock() {
        let mut dec = Decoder::new(25, None, None);
        establish_reference(&mut dec, 0);
        let (_, last) = feed_minute(&mut dec, 0, &BIT_BUFFER);
        assert_eq!(last, DecoderEvent::MinuteDecoded { locked: false });
        assert_eq!(dec.last().minute, Some(46));
        assert_eq!(dec.last().hour, Some(16));
        assert_eq!(dec.last().tz, Some(true));
        assert!(dec.last().stamp.is_none());
        assert_eq!(dec.phase(), Phase::Track);
    }

    #[test]
    fn test_noise_burst_forces_resync_and_drops_phase() {
        let mut dec = Decoder::new(25, None, None);
        establish_reference(&mut dec, 0);
        assert_eq!(dec.phase(), Phase::Track);

        let mut last = DecoderEvent::Idle;
        for i in 0..10 {
            // ~1.5s intervals classify as pure noise: never a boundary or a
            // recognizable bit pulse.
            last = dec.on_edge(edge(2 + i, 500_000_000));
        }
        assert_eq!(last, DecoderEvent::Resynced);
        assert_eq!(dec.phase(), Phase::Search);
    }
}
