//! Serial transport for the drum microcontroller.
//!
//! The device speaks newline-terminated ASCII at 115200 baud, 8N1, no flow
//! control. Reads go through a persistent pending buffer so a read that times
//! out never drops the bytes of a partially received line.

use super::{Channel, ChannelError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace, warn};

/// Default baud rate of the drum firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial [`Channel`] backed by `tokio-serial`.
pub struct SerialChannel {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Baud rate
    baud_rate: u32,

    /// Buffered port; writes go through `get_mut()`
    reader: BufReader<SerialStream>,

    /// Bytes of a line not yet terminated
    pending: Vec<u8>,
}

impl SerialChannel {
    /// Open a serial port.
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyACM0" on Linux, "COM3" on Windows)
    /// * `baud_rate` - Communication speed (the drum firmware uses 115200)
    ///
    /// # Errors
    /// Returns [`ChannelError::Open`] if the port cannot be opened
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, ChannelError> {
        let port = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ChannelError::Open {
                port: port_name.to_string(),
                message: e.to_string(),
            })?;

        info!(port = port_name, baud_rate, "Serial port opened");

        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate,
            reader: BufReader::new(port),
            pending: Vec::with_capacity(64),
        })
    }

    /// Try each candidate port in order and keep the first that opens.
    ///
    /// # Errors
    /// Returns the open error of the last candidate if none opens, or
    /// [`ChannelError::Open`] with an empty port name if `candidates` is empty
    pub fn discover<S: AsRef<str>>(candidates: &[S], baud_rate: u32) -> Result<Self, ChannelError> {
        let mut last_error = ChannelError::Open {
            port: String::new(),
            message: "no candidate ports configured".to_string(),
        };

        for candidate in candidates {
            let candidate = candidate.as_ref();
            debug!(port = candidate, "Attempting serial port");
            match Self::open(candidate, baud_rate) {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    debug!(port = candidate, error = %e, "Serial port unavailable");
                    last_error = e;
                }
            }
        }

        warn!("No drum device found on any candidate port");
        Err(last_error)
    }

    /// Name of the open port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        line
    }
}

#[async_trait]
impl Channel for SerialChannel {
    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        let port = self.reader.get_mut();
        port.write_all(line.as_bytes()).await?;
        port.write_all(b"\n").await?;
        port.flush().await?;
        debug!(port = %self.port_name, "Serial TX: {}", line);
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, ChannelError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // read_until appends partial data to `pending`, so cancelling it
            // on timeout keeps those bytes for the next call.
            let read = tokio::time::timeout_at(
                deadline,
                self.reader.read_until(b'\n', &mut self.pending),
            )
            .await
            .map_err(|_| ChannelError::Timeout(timeout))??;

            if read == 0 {
                return Err(ChannelError::Closed);
            }
            if self.pending.last() != Some(&b'\n') {
                continue;
            }

            let line = self.take_line();
            if line.is_empty() {
                continue;
            }
            trace!(port = %self.port_name, "Serial RX: {}", line);
            return Ok(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_port_reports_name() {
        let err = SerialChannel::open("/dev/does-not-exist-drum", DEFAULT_BAUD_RATE)
            .err()
            .unwrap();
        match err {
            ChannelError::Open { port, .. } => assert_eq!(port, "/dev/does-not-exist-drum"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_discover_without_candidates() {
        let candidates: [&str; 0] = [];
        let err = SerialChannel::discover(&candidates, DEFAULT_BAUD_RATE).err().unwrap();
        assert!(matches!(err, ChannelError::Open { .. }));
    }
}
