//! Command-line flags, mirroring the original `getopt` option set.

use std::path::PathBuf;

use clap::Parser;

use crate::classifier::clamp_tolerance_ms;

#[derive(Debug, Parser)]
#[command(
    name = "dcf77d",
    about = "DCF77 longwave time-signal decoder, publishing to an NTP SHM refclock."
)]
pub struct Cli {
    /// GPIO pin connected to the receiver. Repeat once for dual-pin mode
    /// (only rising edges are used from either pin); given once, both edges
    /// of that one pin are used. Only the last two occurrences are kept: a
    /// third `-g` pushes out the oldest, mirroring the original's 2-slot
    /// `gpio[]` sliding window.
    #[arg(short = 'g', long = "gpio", value_name = "PIN", required = true)]
    pub gpio: Vec<u32>,

    /// Linux GPIO character-device chip to request `--gpio` lines from.
    #[arg(long = "chip", value_name = "PATH", default_value = "/dev/gpiochip0")]
    pub chip: String,

    /// NTP shared-memory unit number. Omit to decode without publishing.
    #[arg(short = 'u', long = "unit", value_name = "NUM")]
    pub unit: Option<i32>,

    /// FIFO path to mirror the raw bit-1..14 block export to.
    #[arg(short = 'f', long = "fifo", value_name = "PATH")]
    pub fifo: Option<PathBuf>,

    /// Tolerance in milliseconds, clamped to 5..=40.
    #[arg(short = 't', long = "tolerance", value_name = "MSEC", default_value_t = 25)]
    pub tolerance_ms: i64,

    /// Run in the foreground with debug logging instead of daemonizing.
    #[arg(short = 'D', long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// The effective tolerance after clamping to `5..=40` ms; out-of-range
    /// requests are accepted and silently clamped rather than rejected.
    pub fn tolerance_ms(&self) -> i64 {
        clamp_tolerance_ms(self.tolerance_ms)
    }

    /// The GPIO pins to actually request, capped at two: a third (or later)
    /// `-g` slides the window rather than growing it, matching the
    /// original's fixed 2-slot `gpio[]` array.
    pub fn gpio_pins(&self) -> &[u32] {
        let len = self.gpio.len();
        &self.gpio[len.saturating_sub(2)..]
    }
}
