//! Field decoding: turns one assembled 60-bit frame into a
//! [`DcfTimestamp`] snapshot.
//!
//! The minute/hour/date/weekday/month/year/DST/leap-second fields and their
//! BCD/parity extraction are driven through
//! `radio_datetime_utils::RadioDateTimeUtils`. This module adds the fields
//! that crate doesn't know about: the time-zone code, the transmitter
//! alert bit, the hour-gated DST-change-warning bit, and the bits 1-14
//! third-party buffer.

use radio_datetime_utils::{
    get_bcd_value, get_parity, RadioDateTimeUtils, LEAP_PROCESSED,
};

use crate::dcf77_helpers::get_binary_value;

/// A fully decoded (or partially unknown) DCF77 frame, plus the Voter's
/// absolute-timestamp bookkeeping layered on top.
#[derive(Debug, Clone, Copy)]
pub struct DcfTimestamp {
    pub minute: Option<u8>,
    pub hour: Option<u8>,
    pub day: Option<u8>,
    pub weekday: Option<u8>,
    pub month: Option<u8>,
    pub year: Option<u8>,
    pub dst: Option<u8>,
    pub leap_second: Option<u8>,
    pub leap_second_is_one: Option<bool>,
    pub parity_1: Option<bool>,
    pub parity_2: Option<bool>,
    pub parity_3: Option<bool>,
    pub bit0_ok: bool,
    pub bit20_ok: bool,
    /// `Some(true)` = CEST, `Some(false)` = CET, `None` = unknown.
    pub tz: Option<bool>,
    pub alert: Option<bool>,
    /// Bit 16, restricted to the hour window the Voter honors.
    pub dst_change_warning: Option<bool>,
    pub third_party_buffer: Option<u16>,
    /// Absolute UTC seconds, filled in by the Voter; `None` until locked.
    pub stamp: Option<i64>,
    /// Forward-prediction confidence, `-1..=10`; meaningless before the
    /// Voter has run once.
    pub stamp_chk: i8,
    /// Cumulative structural-validity score: starts at -50 (so a handful of
    /// good minutes can't look trustworthy on their own) and gains +1 per
    /// minute for each of sync bit 0, start-of-time bit 20, a valid tz, a
    /// clean date parity and a plausible leap-second announcement that held
    /// in that frame.
    pub check_score: i32,
}

impl DcfTimestamp {
    fn unset() -> Self {
        Self {
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
}

/// Wraps `RadioDateTimeUtils` with the additional per-frame fields a
/// `DcfTimestamp` carries.
pub struct FieldDecoder {
    radio_datetime: RadioDateTimeUtils,
    first_minute: bool,
    check_score: i32,
}

impl FieldDecoder {
    pub fn new() -> Self {
        Self {
            radio_datetime: RadioDateTimeUtils::new(7),
            first_minute: true,
            check_score: -50,
        }
    }

    pub fn first_minute(&self) -> bool {
        self.first_minute
    }

    /// Length in bits of the minute that is currently being decoded,
    /// tolerating an unknown leap-second state.
    pub fn this_minute_length(&self) -> u8 {
        match self.radio_datetime.get_leap_second() {
            Some(s) if (s & LEAP_PROCESSED) != 0 => 60,
            _ => 59,
        }
    }

    /// Length in bits of the minute that is about to start.
    pub fn next_minute_length(&self) -> u8 {
        use radio_datetime_utils::LEAP_ANNOUNCED;
        match self.radio_datetime.get_leap_second() {
            Some(s) if self.radio_datetime.get_minute() == Some(59) && (s & LEAP_ANNOUNCED) != 0 => {
                60
            }
            _ => 59,
        }
    }

    /// Decode one assembled frame. `bits` is the 60-slot buffer from
    /// `FrameAssembler`; `frame_len` is the number of valid bits this
    /// minute actually carried (58, 59 or 60), from
    /// `next_minute_length()`/`this_minute_length()` as appropriate.
    pub fn decode(&mut self, bits: &[Option<bool>; 60], frame_len: u8) -> DcfTimestamp {
        let added_minute = if !self.first_minute {
            self.radio_datetime.add_minute()
        } else {
            false
        };

        let mut out = DcfTimestamp::unset();
        out.bit0_ok = bits[0] == Some(false);
        out.bit20_ok = bits[20] == Some(true);

        let parity_1 = get_parity(bits, 21, 27, bits[28]);
        self.radio_datetime.set_minute(
            get_bcd_value(bits, 21, 27),
            parity_1 == Some(false),
            added_minute && !self.first_minute,
        );

        let parity_2 = get_parity(bits, 29, 34, bits[35]);
        self.radio_datetime.set_hour(
            get_bcd_value(bits, 29, 34),
            parity_2 == Some(false),
            added_minute && !self.first_minute,
        );

        let parity_3 = get_parity(bits, 36, 57, bits[58]);
        self.radio_datetime.set_weekday(
            get_bcd_value(bits, 42, 44),
            parity_3 == Some(false),
            added_minute && !self.first_minute,
        );
        self.radio_datetime.set_month(
            get_bcd_value(bits, 45, 49),
            parity_3 == Some(false),
            added_minute && !self.first_minute,
        );
        self.radio_datetime.set_year(
            get_bcd_value(bits, 50, 57),
            parity_3 == Some(false),
            added_minute && !self.first_minute,
        );
        self.radio_datetime.set_day(
            get_bcd_value(bits, 36, 41),
            parity_3 == Some(false),
            added_minute && !self.first_minute,
        );

        let dst_raw = if bits[17].is_some() && bits[18].is_some() && bits[17] != bits[18] {
            bits[17]
        } else {
            None
        };
        self.radio_datetime
            .set_dst(dst_raw, bits[16], added_minute && !self.first_minute);

        self.radio_datetime.set_leap_second(bits[19], frame_len + 1);
        let month = self.radio_datetime.get_month();
        let quarter_end_month = matches!(month, Some(3) | Some(6) | Some(9) | Some(12));
        let mut leap_second = self.radio_datetime.get_leap_second();
        if let Some(l) = leap_second {
            if (l & radio_datetime_utils::LEAP_ANNOUNCED) != 0 && !quarter_end_month {
                // A leap second is only ever inserted at the end of March,
                // June, September or December; an announcement bit seen in
                // any other month is a decode artifact, not a real warning.
                leap_second = Some(l & !radio_datetime_utils::LEAP_ANNOUNCED);
            }
        }
        let mut leap_second_is_one = None;
        if let Some(l) = leap_second {
            if (l & LEAP_PROCESSED) != 0 {
                leap_second_is_one = Some(bits[59] == Some(true));
            }
        }
        self.radio_datetime.bump_minutes_running();

        out.minute = self.radio_datetime.get_minute();
        out.hour = self.radio_datetime.get_hour();
        out.day = self.radio_datetime.get_day();
        out.weekday = self.radio_datetime.get_weekday();
        out.month = self.radio_datetime.get_month();
        out.year = self.radio_datetime.get_year();
        out.dst = self.radio_datetime.get_dst();
        out.leap_second = leap_second;
        out.leap_second_is_one = leap_second_is_one;
        out.parity_1 = parity_1;
        out.parity_2 = parity_2;
        out.parity_3 = parity_3;

        out.tz = out.dst.map(|d| d & radio_datetime_utils::DST_SUMMER != 0);
        out.alert = bits[15];

        // Restricted to hours 0-4 (see DESIGN.md Open Question resolution).
        out.dst_change_warning = match (bits[16], out.hour) {
            (Some(true), Some(hour)) if (0..=4).contains(&hour) => Some(true),
            (Some(_), _) => Some(false),
            (None, _) => None,
        };

        out.third_party_buffer = get_binary_value(bits, 1, 14);

        let leap_plausible = match bits[19] {
            Some(true) => quarter_end_month,
            Some(false) => true,
            None => false,
        };
        let satisfied = out.bit0_ok as i32
            + out.bit20_ok as i32
            + out.tz.is_some() as i32
            + (parity_3 == Some(false)) as i32
            + leap_plausible as i32;
        self.check_score += satisfied;
        out.check_score = self.check_score;

        if self.first_minute
            && out.bit0_ok
            && out.bit20_ok
            && out.dst.is_some()
            && out.year.is_some()
            && out.month.is_some()
            && out.day.is_some()
            && out.weekday.is_some()
            && out.hour.is_some()
            && out.minute.is_some()
        {
            self.first_minute = false;
        }

        out
    }
}

impl Default for FieldDecoder {
    fn default() -> Self {
        Self::new()
    }
}
