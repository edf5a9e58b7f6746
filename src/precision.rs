//! Precision-exponent estimation: a threshold table mapping
//! observed deviation to a log2-seconds exponent, smoothed asymmetrically
//! (climb by one step per minute when the signal is better than the
//! current estimate, drop by two when it's worse).

const INITIAL_PRECISION: i32 = 5 * 16;

/// log2(seconds)-scale precision table, nanoseconds of absolute deviation
/// to a `precision` value scaled by 16, later shifted right by 4 before
/// being written to the SHM record.
const TABLE: [(i64, i32); 15] = [
    (950, 20),
    (1_900, 19),
    (3_800, 18),
    (7_625, 17),
    (15_250, 16),
    (30_500, 15),
    (61_025, 14),
    (122_050, 13),
    (244_125, 12),
    (488_250, 11),
    (976_500, 10),
    (1_953_125, 9),
    (3_906_250, 8),
    (7_812_500, 7),
    (15_625_000, 6),
];

fn lookup(deviation_ns: i64) -> i32 {
    for &(threshold, exp) in &TABLE {
        if deviation_ns < threshold {
            return exp * 16;
        }
    }
    5 * 16
}

pub struct PrecisionEstimator {
    precision: i32,
}

impl PrecisionEstimator {
    pub fn new() -> Self {
        Self {
            precision: INITIAL_PRECISION,
        }
    }

    /// `min_dev_ns` is `classifier::DeviationTracker::min_dev`, the
    /// exponentially smoothed per-minute deviation in nanoseconds. Returns
    /// the value to write into the SHM record's `precision` field (a
    /// negative log2-seconds exponent).
    pub fn update(&mut self, min_dev_ns: i64) -> i32 {
        let deviation_ns = min_dev_ns.abs();
        let looked_up = lookup(deviation_ns);
        if looked_up > self.precision {
            self.precision += 1;
        } else if looked_up < self.precision {
            self.precision -= 2;
        }
        -(self.precision >> 4)
    }
}

impl Default for PrecisionEstimator {
    fn default() -> Self {
        Self::new()
    }
}
