//! `dcf77d` binary entry point: CLI parsing, SHM/FIFO setup, signal
//! handling and the ~100 Hz decoder poll loop.
//!
//! Two execution contexts per §5 of the design: a dedicated thread reads
//! edges from the GPIO source and hands them to the decoder loop through
//! [`dcf77_decoder::edge_source::EdgeSlot`]; the main thread polls that slot
//! at ~100 Hz and drives [`dcf77_decoder::Decoder`]. The edge thread must
//! never block on anything but the GPIO read itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use dcf77_decoder::cli::Cli;
use dcf77_decoder::edge_source::{EdgeSlot, EdgeSource};
use dcf77_decoder::shm::ShmPublisher;
use dcf77_decoder::state::{Decoder, DecoderEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn install_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    for sig in [
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGQUIT,
    ] {
        signal_hook::flag::register(sig, Arc::clone(&flag))
            .context("failed to register shutdown signal handler")?;
    }
    Ok(flag)
}

#[cfg(target_os = "linux")]
fn open_edge_source(cli: &Cli) -> Result<impl EdgeSource> {
    dcf77_decoder::edge_source::GpioEdgeSource::new(&cli.chip, cli.gpio_pins())
        .map_err(dcf77_decoder::InitError::from)
        .context("failed to acquire GPIO edge source")
}

#[cfg(not(target_os = "linux"))]
fn open_edge_source(_cli: &Cli) -> Result<impl EdgeSource> {
    struct Unsupported;
    impl EdgeSource for Unsupported {
        fn next_edge(&mut self) -> Option<(bool, dcf77_decoder::edge_source::TimeInfo)> {
            None
        }
    }
    bail!("GPIO edge source is only available on Linux");
    #[allow(unreachable_code)]
    Ok(Unsupported)
}

/// Runs in the dedicated edge-reading thread: blocks on the GPIO source and
/// republishes every edge into `slot`. Exits once `next_edge` returns `None`
/// (GPIO chip closed) or `shutdown` is set.
fn edge_pump(mut source: impl EdgeSource, slot: Arc<EdgeSlot>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        match source.next_edge() {
            Some((is_low_edge, info)) => slot.publish(is_low_edge, info),
            None => break,
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // The decoded tz=1/2 fields assume Europe/Berlin local time.
    std::env::set_var("TZ", ":Europe/Berlin");

    let shm = match cli.unit {
        Some(unit) => Some(ShmPublisher::attach(unit).context("failed to attach NTP SHM segment")?),
        None => {
            warn!("no -u/--unit given: decoding without SHM publishing");
            None
        }
    };

    if let Some(fifo) = &cli.fifo {
        if !fifo.exists() {
            bail!(dcf77_decoder::InitError::FifoPath(fifo.display().to_string()));
        }
    }

    let shutdown = install_shutdown_flag()?;
    let slot = Arc::new(EdgeSlot::new());

    let source = open_edge_source(&cli)?;
    let pump_slot = Arc::clone(&slot);
    let pump_shutdown = Arc::clone(&shutdown);
    let pump_handle = thread::spawn(move || edge_pump(source, pump_slot, pump_shutdown));

    let mut decoder = Decoder::new(cli.tolerance_ms(), shm, cli.fifo.clone());
    info!(tolerance_ms = cli.tolerance_ms(), "decoder starting");

    let mut last_seq = 0u32;
    while !shutdown.load(Ordering::Relaxed) {
        match slot.try_read(last_seq) {
            Some((seq, _is_low_edge, info)) => {
                last_seq = seq;
                match decoder.on_edge(info) {
                    DecoderEvent::MinuteDecoded { locked } => {
                        debug!(?locked, last = ?decoder.last(), "minute decoded");
                    }
                    DecoderEvent::Resynced => warn!("decoder resynchronized"),
                    DecoderEvent::Idle => {}
                }
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }

    info!("shutdown requested, detaching");
    drop(decoder);
    let _ = pump_handle.join();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    run(cli)
}
