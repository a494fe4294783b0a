//! Line-oriented transports to the drum microcontroller.
//!
//! This module contains implementations of the [`Channel`] trait, the only
//! I/O seam of the crate:
//! - [`SerialChannel`] talks to the real device over RS-232/USB-serial
//!   (feature `serial`).
//! - [`DummyDrum`] simulates the device in-process for tests and dry runs.

pub mod dummy;
#[cfg(feature = "serial")]
pub mod serial_adapter;

pub use dummy::DummyDrum;
#[cfg(feature = "serial")]
pub use serial_adapter::SerialChannel;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to open serial port '{port}': {message}")]
    Open { port: String, message: String },

    #[error("Channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?} waiting for a response line")]
    Timeout(Duration),

    #[error("Channel closed by the device")]
    Closed,
}

/// Duplex, line-oriented transport: one command or response per call.
///
/// Lines are passed without their terminator; implementations add and
/// strip it.
#[async_trait]
pub trait Channel: Send {
    /// Write one command line.
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError>;

    /// Read the next response line, waiting at most `timeout`.
    async fn read_line(&mut self, timeout: Duration) -> Result<String, ChannelError>;
}

#[async_trait]
impl<C: Channel + ?Sized> Channel for Box<C> {
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        (**self).write_line(line).await
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, ChannelError> {
        (**self).read_line(timeout).await
    }
}
