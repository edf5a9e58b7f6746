//! Accumulates three consecutive minutes' third-party-buffer bits into a
//! 128-byte ASCII frame alongside the latest decoded time, and flushes it
//! to a named pipe.
//!
//! The month/weekday/year BCD fields are written at fixed offsets 8 bytes
//! apart except for the last two, which land 5 and 3 bytes apart and
//! therefore overlap the previous field's high nibble at those byte
//! positions.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::field_decode::DcfTimestamp;

const BUFFER_LEN: usize = 128;

fn write_bcd(buffer: &mut [u8; BUFFER_LEN], offset: usize, num: u8) {
    let low = num % 10;
    let high = num / 10;
    for i in 0..4 {
        buffer[offset + i] = if (low >> i) & 1 == 1 { b'1' } else { b'0' };
        buffer[offset + i + 4] = if (high >> i) & 1 == 1 { b'1' } else { b'0' };
    }
}

pub struct BlockExporter {
    fifo_path: Option<PathBuf>,
    buffer: [u8; BUFFER_LEN],
    block: usize,
    filled: [bool; 3],
}

impl BlockExporter {
    pub fn new(fifo_path: Option<PathBuf>) -> Self {
        Self {
            fifo_path,
            buffer: [b'0'; BUFFER_LEN],
            block: 0,
            filled: [false; 3],
        }
    }

    /// Feed one decoded minute. `raw_bits` is the frame `FrameAssembler`
    /// just handed off (bits 1-14 are the third-party buffer this reads).
    /// Only has an effect once the Voter has a `stamp`/`tz`/`weekday` to
    /// report and a FIFO path was configured.
    pub fn push(&mut self, now: &DcfTimestamp, raw_bits: &[Option<bool>; 60]) {
        let (Some(_stamp), Some(tz), Some(weekday), Some(minute)) =
            (now.stamp, now.tz, now.weekday, now.minute)
        else {
            return;
        };
        let Some(fifo_path) = self.fifo_path.clone() else {
            return;
        };

        let block = (minute % 3) as usize;
        if block == 0 {
            self.buffer = [b'0'; BUFFER_LEN];
            self.filled = [false; 3];
        }
        self.block = block;

        for i in 0..14 {
            self.buffer[block * 14 + i] = match raw_bits[i + 1] {
                Some(true) => b'1',
                _ => b'0',
            };
        }
        self.filled[block] = true;

        if block == 2 {
            write_bcd(&mut self.buffer, 42, minute);
            write_bcd(&mut self.buffer, 50, now.hour.unwrap_or(0));
            write_bcd(&mut self.buffer, 58, now.day.unwrap_or(0));
            write_bcd(&mut self.buffer, 66, now.month.unwrap_or(0));
            write_bcd(&mut self.buffer, 71, weekday);
            write_bcd(&mut self.buffer, 74, now.year.unwrap_or(0));
            self.buffer[82] = b'+';
            self.buffer[83] = if tz { b'2' } else { b'1' };
            self.buffer[84] = b'\n';
            self.buffer[85] = 0;

            if self.filled[0] && self.filled[1] && self.filled[2] {
                write_fifo(&fifo_path, &self.buffer);
            }
            self.filled = [false; 3];
        }
    }
}

fn write_fifo(path: &Path, buffer: &[u8; BUFFER_LEN]) {
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    if let Ok(mut f) = std::fs::OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
    {
        let _ = f.write_all(&buffer[..end]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn frame(minute: u8) -> DcfTimestamp {
        DcfTimestamp {
            minute: Some(minute),
            hour: Some(16),
            day: Some(22),
            weekday: Some(6),
            month: Some(10),
            year: Some(22),
            dst: None,
            leap_second: None,
            leap_second_is_one: None,
            parity_1: None,
            parity_2: None,
            parity_3: None,
            bit0_ok: true,
            bit20_ok: true,
            tz: Some(true),
            alert: None,
            dst_change_warning: None,
            third_party_buffer: None,
            stamp: Some(1_700_000_000),
            stamp_chk: 5,
            check_score: -45,
        }
    }

    #[test]
    fn test_write_bcd_low_and_high_nibble() {
        let mut buf = [0u8; BUFFER_LEN];
        write_bcd(&mut buf, 0, 46);
        // low nibble 6 = 0b0110 -> bits 0,1,2,3 = 0,1,1,0
        assert_eq!(&buf[0..4], b"0110");
        // high nibble 4 = 0b0100 -> bits 0,1,2,3 = 0,0,1,0
        assert_eq!(&buf[4..8], b"0010");
    }

    #[test]
    fn test_no_fifo_configured_is_a_no_op() {
        let mut e = BlockExporter::new(None);
        let bits = [Some(true); 60];
        e.push(&frame(0), &bits);
        e.push(&frame(1), &bits);
        e.push(&frame(2), &bits);
        // Nothing to assert beyond "doesn't panic": there's no FIFO to
        // have written to.
    }

    #[test]
    fn test_unset_stamp_is_a_no_op() {
        let mut e = BlockExporter::new(Some(PathBuf::from("/nonexistent/fifo")));
        let mut f = frame(2);
        f.stamp = None;
        let bits = [Some(true); 60];
        e.push(&f, &bits);
        assert!(!e.filled[2]);
    }

    /// Three consecutive minutes against a real FIFO: the reader end must
    /// see exactly one 85-byte line, written only after block 2 completes.
    #[test]
    fn test_three_minutes_write_one_85_byte_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fifo_path = dir.path().join("dcf77.fifo");
        let c_path = std::ffi::CString::new(fifo_path.to_str().unwrap()).unwrap();
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        assert_eq!(rc, 0, "mkfifo failed: {}", std::io::Error::last_os_error());

        let mut e = BlockExporter::new(Some(fifo_path.clone()));
        let bits = [Some(true); 60];

        let reader_path = fifo_path.clone();
        let reader = std::thread::spawn(move || {
            let mut f = std::fs::File::open(reader_path).expect("open fifo for read");
            let mut buf = Vec::new();
            f.read_to_end(&mut buf).expect("read fifo");
            buf
        });

        // Give the reader a moment to open before the writer's non-blocking
        // open is attempted for the block-2 write.
        std::thread::sleep(std::time::Duration::from_millis(50));

        e.push(&frame(0), &bits);
        e.push(&frame(1), &bits);
        e.push(&frame(2), &bits);
        drop(e);

        let received = reader.join().expect("reader thread");
        assert_eq!(received.len(), 85);
        assert_eq!(&received[0..42], "1".repeat(42).as_bytes());
        assert_eq!(received[84], b'\n');
    }
}
