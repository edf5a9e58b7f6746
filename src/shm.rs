//! NTP SHM refclock publishing.
//!
//! Attaches to the classic `ntpd` SHM segment and writes decoded
//! timestamps into it following the reader's required ordering: clear
//! `valid`, write the payload, bump `count`, set `valid`.

use std::sync::atomic::{fence, Ordering};

use thiserror::Error;

const NTPD_BASE: i32 = 0x4e54_5030;

pub const LEAP_NOWARNING: i32 = 0x0;
pub const LEAP_ADDSECOND: i32 = 0x1;
#[allow(dead_code)]
pub const LEAP_DELSECOND: i32 = 0x2;
#[allow(dead_code)]
pub const LEAP_NOTINSYNC: i32 = 0x3;

/// Matches `ntp_shm.h`'s `struct shmTime` field-for-field, including the
/// unused `dummy` padding.
#[repr(C)]
pub struct ShmRecord {
    pub mode: i32,
    pub count: i32,
    pub clock_time_stamp_sec: libc::time_t,
    pub clock_time_stamp_usec: i32,
    pub receive_time_stamp_sec: libc::time_t,
    pub receive_time_stamp_usec: i32,
    pub leap: i32,
    pub precision: i32,
    pub nsamples: i32,
    pub valid: i32,
    pub dummy: [i32; 10],
}

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shmget for NTP unit {unit} failed: {source}")]
    Get {
        unit: i32,
        source: std::io::Error,
    },
    #[error("shmat failed: {source}")]
    Attach { source: std::io::Error },
}

/// Deviation between the host wall clock and the decoded absolute time
/// beyond which a minute is skipped rather than published.
const WALL_CLOCK_SANITY_LIMIT_SEC: i64 = 1200;

/// Attaches to (creating if necessary) the classic NTP SHM refclock
/// segment for one `-u` unit and publishes decoded timestamps into it.
pub struct ShmPublisher {
    ptr: *mut ShmRecord,
    /// Added to every future wall-clock reading once a skipped minute
    /// reveals the host clock is off by more than
    /// `WALL_CLOCK_SANITY_LIMIT_SEC`.
    wall_anchor_offset: i64,
}

// SAFETY: the segment is exclusively written by this process (ntpd only
// reads it); `ShmPublisher` itself is only ever driven from the single
// decoder-loop thread.
unsafe impl Send for ShmPublisher {}

impl ShmPublisher {
    pub fn attach(unit: i32) -> Result<Self, ShmError> {
        let key = NTPD_BASE + unit;
        let size = std::mem::size_of::<ShmRecord>();
        // SAFETY: plain SysV IPC calls; failure is reported through errno.
        let shmid = unsafe { libc::shmget(key, size, libc::IPC_CREAT | 0o777) };
        if shmid == -1 {
            return Err(ShmError::Get {
                unit,
                source: std::io::Error::last_os_error(),
            });
        }
        // SAFETY: shmid was just validated above.
        let raw = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if raw == usize::MAX as *mut libc::c_void {
            return Err(ShmError::Attach {
                source: std::io::Error::last_os_error(),
            });
        }
        let ptr = raw as *mut ShmRecord;
        // SAFETY: ptr points at a live, correctly sized mapping.
        unsafe {
            (*ptr).valid = 0;
            (*ptr).mode = 1;
            (*ptr).count = 0;
        }
        Ok(Self {
            ptr,
            wall_anchor_offset: 0,
        })
    }

    /// Publish one decoded minute. Follows the reader protocol's required
    /// ordering: clear `valid`, write the payload, bump `count`, set
    /// `valid` — with a compiler/CPU fence around the publish so a
    /// concurrently reading `ntpd` never observes a torn write.
    ///
    /// `wall_sec`/`wall_usec` is the host wall-clock reading taken when the
    /// edge that ended this minute arrived; `tz_offset_hours` is 1 for CET,
    /// 2 for CEST. If the (anchor-corrected) wall clock disagrees with the
    /// decoded `stamp` by more than `WALL_CLOCK_SANITY_LIMIT_SEC`, this does
    /// not touch the shared-memory record at all; it only re-anchors, and
    /// returns `false`. Returns `true` if the record was written.
    pub fn publish(
        &mut self,
        stamp: i64,
        wall_sec: i64,
        wall_usec: i32,
        tz_offset_hours: i64,
        precision: i32,
        leap_pending: bool,
    ) -> bool {
        // SAFETY: `self.ptr` is a live mapping for the lifetime of `self`.
        let record = unsafe { &mut *self.ptr };
        publish_into(
            record,
            &mut self.wall_anchor_offset,
            stamp,
            wall_sec,
            wall_usec,
            tz_offset_hours,
            precision,
            leap_pending,
        )
    }
}

/// The actual publish protocol, parameterized over a plain `&mut ShmRecord`
/// rather than `self` so it can be exercised in tests against a local
/// heap-allocated record instead of a live SysV segment.
fn publish_into(
    record: &mut ShmRecord,
    wall_anchor_offset: &mut i64,
    stamp: i64,
    wall_sec: i64,
    wall_usec: i32,
    tz_offset_hours: i64,
    precision: i32,
    leap_pending: bool,
) -> bool {
    let corrected_wall = wall_sec + *wall_anchor_offset;
    let expected_wall = stamp - tz_offset_hours * 3600;
    if (corrected_wall - expected_wall).abs() > WALL_CLOCK_SANITY_LIMIT_SEC {
        *wall_anchor_offset = expected_wall - wall_sec;
        return false;
    }

    record.valid = 0;
    fence(Ordering::Release);
    record.clock_time_stamp_sec = stamp as libc::time_t;
    record.clock_time_stamp_usec = 0;
    record.receive_time_stamp_sec = corrected_wall as libc::time_t;
    record.receive_time_stamp_usec = wall_usec;
    record.precision = precision;
    record.leap = if leap_pending {
        LEAP_ADDSECOND
    } else {
        LEAP_NOWARNING
    };
    fence(Ordering::Release);
    record.count += 1;
    record.valid = 1;
    true
}

impl Drop for ShmPublisher {
    fn drop(&mut self) {
        // SAFETY: detaching a mapping this struct exclusively owns.
        unsafe {
            libc::shmdt(self.ptr as *const libc::c_void);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_record() -> ShmRecord {
        ShmRecord {
            mode: 1,
            count: 0,
            clock_time_stamp_sec: 0,
            clock_time_stamp_usec: 0,
            receive_time_stamp_sec: 0,
            receive_time_stamp_usec: 0,
            leap: 0,
            precision: 0,
            nsamples: 0,
            valid: 0,
            dummy: [0; 10],
        }
    }

    /// Exercises the publish protocol against a plain heap-allocated record
    /// instead of a real SysV segment, so this doesn't depend on SysV IPC
    /// being available in the sandbox running the test suite.
    #[test]
    fn test_wall_clock_sanity_override_skips_and_reanchors() {
        let mut record = blank_record();
        let mut wall_anchor_offset = 0i64;
        let stamp = 1_700_000_000i64;
        // Host wall clock off by 2 hours: well past the 1200s limit.
        let bad_wall = stamp - 3600 - 7200;
        let published = publish_into(
            &mut record,
            &mut wall_anchor_offset,
            stamp,
            bad_wall,
            0,
            1,
            10 * 16,
            false,
        );
        assert!(!published);
        assert_eq!(record.count, 0);
        assert_eq!(wall_anchor_offset, (stamp - 3600) - bad_wall);

        // The same raw wall reading, now anchor-corrected, lands within the
        // sanity window and is published.
        let published = publish_into(
            &mut record,
            &mut wall_anchor_offset,
            stamp + 60,
            bad_wall,
            0,
            1,
            10 * 16,
            false,
        );
        assert!(published);
        assert_eq!(record.count, 1);
        assert_eq!(record.valid, 1);
        assert_eq!(record.clock_time_stamp_sec, (stamp + 60) as libc::time_t);
    }

    #[test]
    fn test_record_layout_matches_ntp_shm_h() {
        assert_eq!(std::mem::size_of::<ShmRecord>() % std::mem::size_of::<i32>(), 0);
        // mode and count must be the first two i32s for ntpd's reader
        // protocol to find them at a fixed offset.
        assert_eq!(std::mem::offset_of!(ShmRecord, mode), 0);
        assert_eq!(
            std::mem::offset_of!(ShmRecord, count),
            std::mem::size_of::<i32>()
        );
    }
}
