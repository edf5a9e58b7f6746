//! Startup error taxonomy. Nothing in the decode pipeline itself returns
//! `Result` — tri-state values flow through parity/range checks and the
//! Voter instead. Only acquiring the process's external resources can fail.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[cfg(target_os = "linux")]
    #[error("failed to acquire GPIO chip/line for edge events: {0}")]
    Gpio(#[from] gpiocdev::Error),

    #[error("failed to attach NTP shared-memory segment: {0}")]
    Shm(#[from] crate::shm::ShmError),

    #[error("FIFO path {0} is not usable as a named pipe")]
    FifoPath(String),
}
