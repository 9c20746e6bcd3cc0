//! Link module - Owns the serial connection to the peer
//!
//! Provides:
//! - Device enumeration
//! - The link manager (open/close, queued writes, background reads)
//! - Transport abstraction over real serial ports

mod manager;
#[cfg(test)]
pub(crate) mod mock;
mod transport;

pub use manager::*;
pub use transport::*;

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Link errors
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("Link already open on {0}")]
    AlreadyOpen(String),

    #[error("Link is not open")]
    NotOpen,

    #[error("Link closed before the write completed")]
    Closed,

    #[error("Write made no progress for {0:?}")]
    WriteStalled(Duration),

    #[error("Failed to list serial devices: {0}")]
    Enumerate(#[source] io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type LinkResult<T> = Result<T, LinkError>;

/// Tuning for link I/O
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Pause between attempts when the transport does not accept bytes
    pub write_retry: Duration,
    /// Give up on a write after this long without progress (None = keep trying)
    pub write_stall_timeout: Option<Duration>,
    /// How often the reader checks for inbound bytes
    pub read_poll: Duration,
    /// Writes that may be queued before `write` starts waiting for room
    pub write_queue_depth: usize,
    /// Timeout applied to each individual port read/write call
    pub port_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            write_retry: Duration::from_millis(20),
            write_stall_timeout: None,
            read_poll: Duration::from_millis(10),
            write_queue_depth: 64,
            port_timeout: Duration::from_millis(1000),
        }
    }
}

/// List serial devices present on this host
pub fn available_devices(opener: &dyn PortOpener) -> LinkResult<Vec<String>> {
    opener.available_devices().map_err(LinkError::Enumerate)
}
