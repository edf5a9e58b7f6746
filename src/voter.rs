//! Consistency voting: turns a stream of per-minute
//! [`DcfTimestamp`] decodes, each individually noisy, into a trusted
//! absolute timestamp.
//!
//! The confidence counters live on [`Voter`] itself; `DcfTimestamp` stays a
//! plain decoded snapshot.
//!
//! Two modes, selected by whether `stamp` is known yet:
//! - **Unlocked**: each field is voted independently against the value
//!   predicted from the last accepted minute (previous value for most
//!   fields, `+1` for the minute itself across the hour/day/month/year
//!   rollover chain `radio_datetime_utils` already handles per-field).
//!   Once every counter passes 1, a trial `stamp` is synthesized and
//!   checked against the decoded weekday before being trusted.
//! - **Locked**: the next `stamp` is predicted directly (`last + 60`), all
//!   fields are overwritten from it, and disagreement with what was
//!   actually decoded lowers `stamp_chk`; it drops below zero back to
//!   unlocked mode.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::field_decode::DcfTimestamp;

/// `Some(true)` = CEST (+2h), `Some(false)` = CET (+1h); unknown zones
/// cannot be converted to/from an absolute timestamp.
fn tz_offset_hours(tz: Option<bool>) -> Option<i64> {
    tz.map(|summer| if summer { 2 } else { 1 })
}

fn to_utc_stamp(ts: &DcfTimestamp) -> Option<i64> {
    let year = ts.year?;
    let month = ts.month?;
    let day = ts.day?;
    let hour = ts.hour?;
    let minute = ts.minute?;
    let offset_hours = tz_offset_hours(ts.tz)?;
    let date = NaiveDate::from_ymd_opt(2000 + year as i32, month as u32, day as u32)?;
    let time = NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)?;
    let naive = NaiveDateTime::new(date, time);
    Some(naive.and_utc().timestamp() - offset_hours * 3600)
}

/// `(minute, hour, day, month, year, weekday)`; weekday is Monday=1..Sunday=7,
/// matching the DCF77 wire field and `radio_datetime_utils::get_weekday()`.
fn from_utc_stamp(stamp: i64, tz: Option<bool>) -> Option<(u8, u8, u8, u8, u8, u8)> {
    let offset_hours = tz_offset_hours(tz)?;
    let dt: DateTime<Utc> = DateTime::from_timestamp(stamp + offset_hours * 3600, 0)?;
    let naive = dt.naive_utc();
    let weekday = naive.weekday().num_days_from_monday() as u8 + 1;
    Some((
        naive.minute() as u8,
        naive.hour() as u8,
        naive.day() as u8,
        naive.month() as u8,
        (naive.year() - 2000) as u8,
        weekday,
    ))
}

/// Vote one field by exact agreement with the last accepted value: agree
/// bumps the counter, disagree while confident overrides with the last
/// value and spends one unit of confidence, disagree while unconfident
/// leaves the freshly decoded value alone, and a missing decode always
/// falls back to the last value.
fn vote_field<T: PartialEq + Copy>(now: &mut Option<T>, last: Option<T>, chk: &mut i8) {
    let Some(last) = last else { return };
    match *now {
        Some(v) if v == last => *chk = chk.saturating_add(1),
        Some(_) if *chk > 0 => {
            *now = Some(last);
            *chk -= 1;
        }
        None => *now = Some(last),
        _ => {}
    }
}

pub struct Voter {
    have_last: bool,
    last: DcfTimestamp,
    min_chk: i8,
    hour_chk: i8,
    day_chk: i8,
    wday_chk: i8,
    mon_chk: i8,
    year_chk: i8,
    tz_chk: i8,
    stamp: Option<i64>,
    stamp_chk: i8,
}

impl Voter {
    pub fn new() -> Self {
        Self {
            have_last: false,
            last: unset_frame(),
            min_chk: 0,
            hour_chk: 0,
            day_chk: 0,
            wday_chk: 0,
            mon_chk: 0,
            year_chk: 0,
            tz_chk: 0,
            stamp: None,
            stamp_chk: 0,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.stamp.is_some()
    }

    /// Vote one freshly decoded frame, returning the accepted output (with
    /// `stamp`/`stamp_chk` filled in).
    pub fn vote(&mut self, mut now: DcfTimestamp) -> DcfTimestamp {
        if self.stamp.is_none() {
            self.vote_unlocked(&mut now);
        } else {
            self.vote_locked(&mut now);
        }
        now.stamp = self.stamp;
        now.stamp_chk = self.stamp_chk;
        self.last = now;
        self.have_last = true;
        now
    }

    /// Drop back to unlocked mode, e.g. after the classifier/assembler
    /// forced a RESYNC.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn vote_unlocked(&mut self, now: &mut DcfTimestamp) {
        if !self.have_last {
            return;
        }
        let last = self.last;

        if let Some(last_min) = last.minute {
            let predicted = (last_min + 1) % 60;
            match now.minute {
                Some(m) if m == predicted => self.min_chk = self.min_chk.saturating_add(1),
                Some(_) if self.min_chk > 0 => {
                    now.minute = Some(predicted);
                    self.min_chk -= 1;
                }
                None => now.minute = Some(predicted),
                _ => {}
            }
        }

        let mut predicted_hour = last.hour;
        if now.minute == Some(0) {
            predicted_hour = predicted_hour.map(|h| (h + 1) % 24);
        }
        vote_field(&mut now.hour, predicted_hour, &mut self.hour_chk);

        vote_field(&mut now.day, last.day, &mut self.day_chk);
        vote_field(&mut now.weekday, last.weekday, &mut self.wday_chk);
        vote_field(&mut now.month, last.month, &mut self.mon_chk);
        vote_field(&mut now.year, last.year, &mut self.year_chk);
        vote_field(&mut now.tz, last.tz, &mut self.tz_chk);

        if self.min_chk > 1
            && self.hour_chk > 1
            && self.day_chk > 1
            && self.wday_chk > 1
            && self.mon_chk > 1
            && self.year_chk > 1
            && self.tz_chk > 1
        {
            if let Some(stamp) = to_utc_stamp(now) {
                if let Some((_, _, _, _, _, weekday)) = from_utc_stamp(stamp, now.tz) {
                    if Some(weekday) == now.weekday {
                        self.stamp = Some(stamp);
                        self.stamp_chk = 0;
                    }
                }
            }
        }
    }

    fn vote_locked(&mut self, now: &mut DcfTimestamp) {
        let stamp = self.stamp.unwrap() + 60;
        let mut mismatches = 0u32;
        let Some((pred_min, pred_hour, pred_day, pred_month, pred_year, pred_weekday)) =
            from_utc_stamp(stamp, self.last.tz)
        else {
            // Lost the ability to convert (tz became unknown): fall back to
            // unlocked mode, same as running out of confidence below.
            self.stamp = None;
            return;
        };

        predict_field(&mut now.minute, pred_min, &mut mismatches);
        predict_field(&mut now.hour, pred_hour, &mut mismatches);
        predict_field(&mut now.day, pred_day, &mut mismatches);
        predict_field(&mut now.month, pred_month, &mut mismatches);
        predict_field(&mut now.year, pred_year, &mut mismatches);
        predict_field(&mut now.weekday, pred_weekday, &mut mismatches);

        let pred_tz = self.last.tz;
        if now.tz != pred_tz {
            if now.tz.is_some() {
                mismatches += 1;
            }
            now.tz = pred_tz;
        }

        self.stamp = Some(stamp);
        if mismatches > 0 {
            self.stamp_chk -= 1;
        } else {
            self.stamp_chk = (self.stamp_chk + 1).min(10);
        }
        if self.stamp_chk < 0 {
            self.min_chk = 1;
            self.hour_chk = 1;
            self.tz_chk = 1;
            self.day_chk = 1;
            self.mon_chk = 1;
            self.wday_chk = 1;
            self.year_chk = 1;
            self.stamp = None;
        }
    }
}

impl Default for Voter {
    fn default() -> Self {
        Self::new()
    }
}

/// Overwrite `now` with the predicted value, counting it as a mismatch
/// only if something was actually decoded and it disagreed (a missing
/// decode is not evidence against the prediction).
fn predict_field(now: &mut Option<u8>, predicted: u8, mismatches: &mut u32) {
    if *now != Some(predicted) {
        if now.is_some() {
            *mismatches += 1;
        }
        *now = Some(predicted);
    }
}

fn unset_frame() -> DcfTimestamp {
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

    fn frame(minute: u8, hour: u8, day: u8, weekday: u8, month: u8, year: u8, tz_summer: bool) -> DcfTimestamp {
        let mut f = unset_frame();
        f.minute = Some(minute);
        f.hour = Some(hour);
        f.day = Some(day);
        f.weekday = Some(weekday);
        f.month = Some(month);
        f.year = Some(year);
        f.tz = Some(tz_summer);
        f
    }

    #[test]
    fn test_first_minute_establishes_baseline_without_lock() {
        let mut v = Voter::new();
        // 2022-10-22 is a Saturday (weekday 6), within CEST.
        let out = v.vote(frame(46, 16, 22, 6, 10, 22, true));
        assert!(!v.is_locked());
        assert_eq!(out.minute, Some(46));
    }

    #[test]
    fn test_agreement_eventually_locks() {
        let mut v = Voter::new();
        // Every counter needs two agreements (> 1) before a stamp is
        // synthesized: the first vote only establishes the baseline.
        v.vote(frame(46, 16, 22, 6, 10, 22, true));
        v.vote(frame(47, 16, 22, 6, 10, 22, true));
        assert!(!v.is_locked());
        let out = v.vote(frame(48, 16, 22, 6, 10, 22, true));
        assert!(v.is_locked());
        assert_eq!(out.stamp_chk, 0);
    }

    #[test]
    fn test_locked_mode_predicts_forward() {
        let mut v = Voter::new();
        v.vote(frame(46, 16, 22, 6, 10, 22, true));
        v.vote(frame(47, 16, 22, 6, 10, 22, true));
        v.vote(frame(48, 16, 22, 6, 10, 22, true));
        assert!(v.is_locked());

        // A totally garbled minute: every field unset.
        let mut garbled = unset_frame();
        garbled.tz = Some(true);
        let out = v.vote(garbled);
        assert_eq!(out.minute, Some(49));
        assert_eq!(out.hour, Some(16));
        assert!(v.is_locked());
    }

    #[test]
    fn test_repeated_mismatches_drop_lock() {
        let mut v = Voter::new();
        v.vote(frame(46, 16, 22, 6, 10, 22, true));
        v.vote(frame(47, 16, 22, 6, 10, 22, true));
        v.vote(frame(48, 16, 22, 6, 10, 22, true));
        assert!(v.is_locked());

        for _ in 0..2 {
            v.vote(frame(5, 3, 1, 1, 1, 1, true));
        }
        assert!(!v.is_locked());
    }
}
