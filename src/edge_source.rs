//! Edge timestamp plumbing: the types the classifier operates on, and the
//! single-producer/single-consumer hand-off between the GPIO edge callback
//! and the decoder's poll loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::cell::UnsafeCell;

/// A monotonic or wall-clock instant, seconds plus nanoseconds.
///
/// Nanoseconds are always normalized into `0..1_000_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// `self - other`, with an extra `tolerance_ns` folded into the nanosecond
    /// term before normalizing: this biases every interval by the tolerance
    /// so that a single half-open band comparison can be used for both
    /// classification and boundary detection.
    pub fn diff_with_tolerance(&self, earlier: &Timespec, tolerance_ns: i64) -> Timespec {
        let mut sec = self.sec - earlier.sec;
        let mut nsec = (self.nsec - earlier.nsec) + tolerance_ns;
        if nsec >= 1_000_000_000 {
            sec += 1;
            nsec -= 1_000_000_000;
        }
        if nsec < 0 {
            sec -= 1;
            nsec += 1_000_000_000;
        }
        Timespec { sec, nsec }
    }

    pub fn plus_seconds(&self, seconds: i64) -> Timespec {
        Timespec {
            sec: self.sec + seconds,
            nsec: self.nsec,
        }
    }
}

/// A pair of timestamps recorded at the same electrical edge: a monotonic
/// reading used for all interval arithmetic, and a wall-clock reading used
/// only when publishing the receive time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeInfo {
    pub mono: Timespec,
    pub wall: Timespec,
}

impl TimeInfo {
    pub fn is_unset(&self) -> bool {
        self.mono.sec == 0
    }

    pub fn plus_seconds(&self, seconds: i64) -> TimeInfo {
        TimeInfo {
            mono: self.mono.plus_seconds(seconds),
            wall: self.wall.plus_seconds(seconds),
        }
    }
}

/// A source of edge events: on every electrical edge on the receiver pin it
/// records a [`TimeInfo`]. Implementations are the sole external
/// collaborator the decoder depends on for input.
pub trait EdgeSource {
    /// Block until the next edge, or return `None` on shutdown.
    fn next_edge(&mut self) -> Option<(bool, TimeInfo)>;
}

/// Single-producer/single-consumer slot for handing a [`TimeInfo`] from an
/// edge-handler context to the decoder's poll loop without locks or
/// allocation. Protected by a sequence counter (a "seqlock"): the writer
/// bumps the counter to an odd value,
/// writes the payload, then bumps it to an even value; a reader retries if
/// it observes an odd counter or the counter changing mid-read.
pub struct EdgeSlot {
    seq: AtomicU32,
    slot: UnsafeCell<(bool, TimeInfo)>,
}

// SAFETY: `seq` establishes a happens-before relationship between the
// writer's store and a reader's matching pair of loads that bracket its
// read of `slot`; writer and reader never touch `slot` concurrently because
// the writer only ever runs in the single callback context and readers
// retry until they observe a stable, even sequence number.
unsafe impl Sync for EdgeSlot {}

impl EdgeSlot {
    pub fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            slot: UnsafeCell::new((false, TimeInfo::default())),
        }
    }

    /// Called from the edge-handler context. Must not allocate or block.
    pub fn publish(&self, is_low_edge: bool, info: TimeInfo) {
        let seq0 = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq0.wrapping_add(1), Ordering::Release);
        // SAFETY: the odd sequence number above tells any concurrent reader
        // to discard whatever it observes; we are the only writer.
        unsafe {
            *self.slot.get() = (is_low_edge, info);
        }
        self.seq.store(seq0.wrapping_add(2), Ordering::Release);
    }

    /// Called from the decoder poll loop. Returns `None` if nothing new has
    /// been published since `last_seq`, else the edge plus its sequence
    /// number (pass it back in on the next call).
    pub fn try_read(&self, last_seq: u32) -> Option<(u32, bool, TimeInfo)> {
        loop {
            let seq1 = self.seq.load(Ordering::Acquire);
            if seq1 == last_seq || seq1 % 2 != 0 {
                // Nothing new, or a write is in progress: nothing stable to
                // report yet.
                if seq1 % 2 != 0 {
                    continue;
                }
                return None;
            }
            // SAFETY: seq1 was even when read; re-check after reading the
            // payload to detect a torn read.
            let value = unsafe { *self.slot.get() };
            let seq2 = self.seq.load(Ordering::Acquire);
            if seq1 == seq2 {
                return Some((seq1, value.0, value.1));
            }
            // Writer raced us; retry.
        }
    }
}

impl Default for EdgeSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
mod gpio {
    use super::{EdgeSource, TimeInfo, Timespec};
    use gpiocdev::line::{EdgeDetection, EdgeKind};
    use gpiocdev::request::Request;

    /// Reads edges from one or two GPIO lines via the Linux `gpiocdev`
    /// character-device interface. With two lines configured only rising
    /// edges are reported (the caller wires one line as "rising marks
    /// start of active period" and the other as "rising marks end"); with
    /// one line both edges are reported.
    pub struct GpioEdgeSource {
        request: Request,
    }

    impl GpioEdgeSource {
        pub fn new(chip: &str, pins: &[u32]) -> Result<Self, gpiocdev::Error> {
            let detection = if pins.len() == 2 {
                EdgeDetection::RisingEdge
            } else {
                EdgeDetection::BothEdges
            };
            let mut builder = Request::builder();
            builder.on_chip(chip).with_lines(pins).as_input();
            builder.with_edge_detection(detection);
            let request = builder.request()?;
            Ok(Self { request })
        }
    }

    fn now_wall() -> Timespec {
        let ts = chrono::Utc::now();
        Timespec::new(ts.timestamp(), ts.timestamp_subsec_nanos() as i64)
    }

    impl EdgeSource for GpioEdgeSource {
        fn next_edge(&mut self) -> Option<(bool, TimeInfo)> {
            let event = self.request.read_edge_event().ok()?;
            let is_low_edge = matches!(event.kind, EdgeKind::Falling);
            let mono = Timespec::new(
                (event.timestamp_ns / 1_000_000_000) as i64,
                (event.timestamp_ns % 1_000_000_000) as i64,
            );
            let info = TimeInfo {
                mono,
                wall: now_wall(),
            };
            Some((is_low_edge, info))
        }
    }
}

#[cfg(target_os = "linux")]
pub use gpio::GpioEdgeSource;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_with_tolerance_no_wrap() {
        let a = Timespec::new(10, 500_000_000);
        let b = Timespec::new(11, 0);
        let diff = b.diff_with_tolerance(&a, 25_000_000);
        assert_eq!(diff.sec, 1);
        assert_eq!(diff.nsec, 525_000_000);
    }

    #[test]
    fn test_diff_with_tolerance_overflow_carries_second() {
        let a = Timespec::new(0, 900_000_000);
        let b = Timespec::new(1, 900_000_000);
        let diff = b.diff_with_tolerance(&a, 200_000_000);
        assert_eq!(diff.sec, 2);
        assert_eq!(diff.nsec, 100_000_000);
    }

    #[test]
    fn test_diff_with_tolerance_underflow_borrows_second() {
        let a = Timespec::new(0, 900_000_000);
        let b = Timespec::new(1, 0);
        let diff = b.diff_with_tolerance(&a, 0);
        assert_eq!(diff.sec, 0);
        assert_eq!(diff.nsec, 100_000_000);
    }

    #[test]
    fn test_edge_slot_publish_and_read() {
        let slot = EdgeSlot::new();
        assert_eq!(slot.try_read(0), None);
        let info = TimeInfo {
            mono: Timespec::new(5, 0),
            wall: Timespec::new(1_700_000_000, 0),
        };
        slot.publish(true, info);
        let (seq, is_low, read_info) = slot.try_read(0).unwrap();
        assert!(is_low);
        assert_eq!(read_info, info);
        assert_eq!(slot.try_read(seq), None);
    }
}
