//! Per-edge interval classification: turns a stream of edge timestamps into
//! second/minute boundary markers and tri-state bit symbols, tracking a
//! rolling pulse-width deviation and a noise counter that triggers
//! resynchronization.
//!
//! Classification never inspects whether an edge was rising or falling,
//! only the elapsed time since the previous edge, so this takes a bare
//! [`TimeInfo`] per edge.

use crate::edge_source::TimeInfo;

const DEFAULT_TOLERANCE_MS: i64 = 25;
const MIN_TOLERANCE_MS: i64 = 5;
const MAX_TOLERANCE_MS: i64 = 40;
const NOISE_RESYNC_THRESHOLD: i32 = 9;
const SIG_STAT_LEN: usize = 60;

/// Clamp a requested tolerance (in milliseconds) into `5..=40`: out-of-range
/// requests are accepted and silently clamped rather than rejected.
pub fn clamp_tolerance_ms(requested_ms: i64) -> i64 {
    requested_ms.clamp(MIN_TOLERANCE_MS, MAX_TOLERANCE_MS)
}

/// Result of classifying one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierEvent {
    /// The second boundary arrived. `bit` is the finalized tri-state symbol
    /// for the second that just ended (`None` means "unknown"); `delta_sec`
    /// is how many seconds elapsed since the previous boundary (normally 1,
    /// 2 at a minute gap, or more after missed seconds); `is_minute` is set
    /// when `delta_sec == 2`.
    Second {
        bit: Option<bool>,
        delta_sec: i64,
        is_minute: bool,
    },
    /// A sub-second pulse sample was folded into the running short/long
    /// counts; no boundary was crossed.
    PulseSample,
    /// The interval matched no recognized pattern.
    Noise,
    /// The noise counter exceeded its threshold: the caller should drop
    /// back to the SEARCH state.
    Resync,
}

enum Reference {
    /// No second reference established yet: still hunting for a
    /// recognizable idle-gap pattern between consecutive raw edges.
    Search { last_edge: Option<TimeInfo> },
    /// Tracking a second reference.
    Tracking { second_ref: TimeInfo },
}

/// Per-bit/per-minute pulse-width deviation tracker: a 60-deep ring of
/// recent samples plus an exponentially smoothed per-minute deviation.
struct DeviationTracker {
    sig_stat: [i64; SIG_STAT_LEN],
    sig_cnt: usize,
    sig_avr: i64,
    min_dev: i64,
}

impl DeviationTracker {
    fn new() -> Self {
        Self {
            sig_stat: [0; SIG_STAT_LEN],
            sig_cnt: 0,
            sig_avr: 0,
            min_dev: 0,
        }
    }

    fn record_bit_deviation(&mut self, deviation_ns: i64) {
        self.sig_stat[self.sig_cnt] = deviation_ns;
        self.sig_cnt = (self.sig_cnt + 1) % SIG_STAT_LEN;
        self.sig_avr = self.sig_stat.iter().sum::<i64>() / SIG_STAT_LEN as i64;
    }

    fn record_minute_deviation(&mut self, nsec_at_boundary: i64, tolerance_ns: i64) {
        self.min_dev = (15 * self.min_dev + (nsec_at_boundary - tolerance_ns)) / 16;
    }
}

pub struct EdgeClassifier {
    tolerance_ns: i64,
    reference: Reference,
    sig_short: u32,
    sig_long: u32,
    noise: i32,
    deviation: DeviationTracker,
}

impl EdgeClassifier {
    pub fn new(tolerance_ms: i64) -> Self {
        Self {
            tolerance_ns: clamp_tolerance_ms(tolerance_ms) * 1_000_000,
            reference: Reference::Search { last_edge: None },
            sig_short: 0,
            sig_long: 0,
            noise: 0,
            deviation: DeviationTracker::new(),
        }
    }

    pub fn is_synchronized(&self) -> bool {
        matches!(self.reference, Reference::Tracking { .. })
    }

    /// Average pulse-width deviation across the last 60 classified bits, in
    /// nanoseconds.
    pub fn sig_avr(&self) -> i64 {
        self.deviation.sig_avr
    }

    /// Exponentially smoothed per-minute deviation, in nanoseconds.
    pub fn min_dev(&self) -> i64 {
        self.deviation.min_dev
    }

    /// Force the classifier back into the SEARCH state.
    pub fn reset_to_search(&mut self) {
        self.reference = Reference::Search { last_edge: None };
        self.sig_short = 0;
        self.sig_long = 0;
        self.noise = 0;
        self.deviation = DeviationTracker::new();
    }

    pub fn handle_edge(&mut self, edge: TimeInfo) -> ClassifierEvent {
        match self.reference {
            Reference::Search { last_edge } => self.handle_search_edge(last_edge, edge),
            Reference::Tracking { second_ref } => self.handle_tracking_edge(second_ref, edge),
        }
    }

    fn handle_search_edge(&mut self, last_edge: Option<TimeInfo>, edge: TimeInfo) -> ClassifierEvent {
        let Some(last) = last_edge else {
            self.reference = Reference::Search {
                last_edge: Some(edge),
            };
            return ClassifierEvent::Noise;
        };
        let tau = self.tolerance_ns;
        let diff = edge.mono.diff_with_tolerance(&last.mono, tau);
        let in_band = |sec: i64, nsec: i64| diff.sec == sec && (nsec..=nsec + 2 * tau).contains(&diff.nsec);

        if in_band(0, 100_000_000) || in_band(0, 200_000_000) {
            // Found a falling edge: the second reference is the *earlier*
            // of the pair.
            self.reference = Reference::Tracking { second_ref: last };
            return ClassifierEvent::Noise;
        }
        if in_band(0, 800_000_000) || in_band(0, 900_000_000) {
            // Found a rising edge inside a second: reference is the
            // *current* edge.
            self.reference = Reference::Tracking { second_ref: edge };
            return ClassifierEvent::Noise;
        }
        if in_band(1, 800_000_000) || in_band(1, 900_000_000) {
            // Found a rising edge at a minute boundary: reference is the
            // current edge, and it also marks a fresh minute start.
            self.reference = Reference::Tracking { second_ref: edge };
            return ClassifierEvent::Second {
                bit: None,
                delta_sec: 0,
                is_minute: true,
            };
        }
        self.reference = Reference::Search {
            last_edge: Some(edge),
        };
        ClassifierEvent::Noise
    }

    fn handle_tracking_edge(&mut self, second_ref: TimeInfo, edge: TimeInfo) -> ClassifierEvent {
        let tau = self.tolerance_ns;
        let diff = edge.mono.diff_with_tolerance(&second_ref.mono, tau);

        let event = if diff.sec >= 1 && (0..=2 * tau).contains(&diff.nsec) {
            let bit = self.finalize_bit();
            let is_minute = diff.sec == 2;
            if is_minute {
                self.deviation.record_minute_deviation(diff.nsec, tau);
            }
            // The reference always advances by one nominal second per
            // boundary, not by the observed `delta_sec`: a genuinely missed
            // edge is then detected as a multi-second gap on the next
            // boundary, since the reference kept ticking at its own pace.
            self.reference = Reference::Tracking {
                second_ref: second_ref.plus_seconds(1),
            };
            ClassifierEvent::Second {
                bit,
                delta_sec: diff.sec,
                is_minute,
            }
        } else if (0..=2 * tau).contains(&(diff.nsec - (100_000_000 + self.deviation.sig_avr)))
            && diff.sec == 0
        {
            self.sig_short += 1;
            let deviation = diff.nsec - tau - 100_000_000;
            self.deviation.record_bit_deviation(deviation);
            ClassifierEvent::PulseSample
        } else if (0..=2 * tau).contains(&(diff.nsec - (200_000_000 + self.deviation.sig_avr)))
            && diff.sec == 0
        {
            self.sig_long += 1;
            let deviation = diff.nsec - tau - 200_000_000;
            self.deviation.record_bit_deviation(deviation);
            ClassifierEvent::PulseSample
        } else {
            ClassifierEvent::Noise
        };

        match event {
            ClassifierEvent::Noise => {
                self.noise += 1;
                if self.noise > NOISE_RESYNC_THRESHOLD {
                    self.reset_to_search();
                    return ClassifierEvent::Resync;
                }
            }
            _ => {
                self.noise = (self.noise - 1).max(0);
            }
        }
        event
    }

    /// Combine the short/long pulse counts seen since the last second
    /// boundary into one tri-state bit symbol: both absent is unknown,
    /// only one kind present wins outright, both present picks the more
    /// frequent with ties resolved toward 1.
    fn finalize_bit(&mut self) -> Option<bool> {
        let bit = match (self.sig_short, self.sig_long) {
            (0, 0) => None,
            (s, 0) if s > 0 => Some(false),
            (0, l) if l > 0 => Some(true),
            (s, l) => Some(s <= l),
        };
        self.sig_short = 0;
        self.sig_long = 0;
        bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_source::Timespec;

    fn info(sec: i64, nsec: i64) -> TimeInfo {
        TimeInfo {
            mono: Timespec::new(sec, nsec),
            wall: Timespec::new(sec, nsec),
        }
    }

    #[test]
    fn test_clamp_tolerance() {
        assert_eq!(clamp_tolerance_ms(0), 5);
        assert_eq!(clamp_tolerance_ms(999), 40);
        assert_eq!(clamp_tolerance_ms(25), 25);
    }

    #[test]
    fn test_search_then_bit_then_second() {
        let mut c = EdgeClassifier::new(25);
        // Establish a second reference via a clean ~900 ms rising-edge gap.
        assert_eq!(c.handle_edge(info(0, 0)), ClassifierEvent::Noise);
        let ev = c.handle_edge(info(0, 900_000_000));
        assert_eq!(ev, ClassifierEvent::Noise);
        assert!(c.is_synchronized());

        // A ~100 ms pulse sample (bit 0).
        let ev = c.handle_edge(info(1, 0));
        assert_eq!(ev, ClassifierEvent::PulseSample);

        // The second boundary: ~1s later.
        let ev = c.handle_edge(info(1, 900_000_000));
        assert_eq!(
            ev,
            ClassifierEvent::Second {
                bit: Some(false),
                delta_sec: 1,
                is_minute: false,
            }
        );
    }

    #[test]
    fn test_minute_gap_detected() {
        let mut c = EdgeClassifier::new(25);
        c.handle_edge(info(0, 0));
        c.handle_edge(info(0, 900_000_000));
        assert!(c.is_synchronized());
        let ev = c.handle_edge(info(2, 900_000_000));
        assert_eq!(
            ev,
            ClassifierEvent::Second {
                bit: None,
                delta_sec: 2,
                is_minute: true,
            }
        );
    }

    #[test]
    fn test_noise_burst_forces_resync() {
        let mut c = EdgeClassifier::new(25);
        c.handle_edge(info(0, 0));
        c.handle_edge(info(0, 900_000_000));
        assert!(c.is_synchronized());
        let mut last_event = ClassifierEvent::Noise;
        for i in 0..10 {
            // Intervals of ~1.5s: too long for a bit, not aligned with the
            // second-boundary band, and `second_ref` never advances because
            // none of these classify as a boundary — a pure noise burst.
            last_event = c.handle_edge(info(2 + i, 500_000_000));
        }
        assert_eq!(last_event, ClassifierEvent::Resync);
        assert!(!c.is_synchronized());
    }

    #[test]
    fn test_tie_resolves_to_one() {
        let mut c = EdgeClassifier::new(25);
        c.sig_short = 1;
        c.sig_long = 1;
        assert_eq!(c.finalize_bit(), Some(true));
    }
}
