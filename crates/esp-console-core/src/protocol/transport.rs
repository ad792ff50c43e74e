//! Owned serial handle with line reassembly
//!
//! A [`Transport`] is either open or closed. Every I/O operation on a closed
//! transport fails with [`ProtocolError::NotConnected`]; closing twice is fine.

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use super::{
    serial::{configure_port, open_port},
    stream::{CommunicationChannel, SerialChannel},
    ProtocolError, LINE_TERMINATOR,
};

/// Largest chunk pulled from the channel in one read call
const READ_CHUNK: usize = 512;

/// Longest unterminated fragment kept while waiting for its newline
pub const MAX_PARTIAL_LINE: usize = 4096;

/// Serial connection to one device at one baud rate
pub struct Transport<C: CommunicationChannel = SerialChannel> {
    channel: Option<C>,
    device: String,
    baud_rate: u32,
    /// Exchange deadline for silent devices; zero means wait forever
    timeout: Duration,
    /// Bytes received but not yet handed out as a line
    pending: Vec<u8>,
}

impl Transport<SerialChannel> {
    /// Open `device` at `baud_rate`.
    ///
    /// Input already buffered by the OS is left alone; exchanges flush before
    /// they send.
    pub fn open(device: &str, baud_rate: u32, timeout: Duration) -> Result<Self, ProtocolError> {
        if device.trim().is_empty() {
            return Err(ProtocolError::NoDevice);
        }
        if !Path::new(device).exists() {
            return Err(ProtocolError::DeviceMissing(device.to_string()));
        }

        let mut port = open_port(device, baud_rate)?;
        configure_port(port.as_mut()).map_err(|e| ProtocolError::DeviceBusy {
            device: device.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!("opened {device} at {baud_rate} baud, timeout {timeout:?}");
        Ok(Self::from_channel(
            SerialChannel::new(port),
            device,
            baud_rate,
            timeout,
        ))
    }
}

impl<C: CommunicationChannel> Transport<C> {
    /// Wrap an already-open channel
    pub fn from_channel(channel: C, device: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            channel: Some(channel),
            device: device.to_string(),
            baud_rate,
            timeout,
            pending: Vec::new(),
        }
    }

    /// Whether the device is still held open
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Path the transport was opened on
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Line speed the port was opened at
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Deadline for an exchange that receives nothing; zero means none
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn channel_mut(&mut self) -> Result<&mut C, ProtocolError> {
        self.channel.as_mut().ok_or(ProtocolError::NotConnected)
    }

    /// Send `text` followed by CR-LF
    pub fn write_line(&mut self, text: &str) -> Result<(), ProtocolError> {
        let channel = self.channel_mut()?;

        let mut frame = Vec::with_capacity(text.len() + LINE_TERMINATOR.len());
        frame.extend_from_slice(text.as_bytes());
        frame.extend_from_slice(LINE_TERMINATOR);

        channel.write_all(&frame)?;
        channel.flush()?;

        tracing::debug!("tx {:?}", String::from_utf8_lossy(&frame));
        Ok(())
    }

    /// Move whatever the channel already has into the reassembly buffer
    fn fill(&mut self) -> Result<(), ProtocolError> {
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
        let mut buffer = [0u8; READ_CHUNK];

        loop {
            let available = channel.bytes_to_read()? as usize;
            if available == 0 {
                return Ok(());
            }

            let to_read = available.min(buffer.len());
            match channel.read(&mut buffer[..to_read]) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    self.pending.extend_from_slice(&buffer[..n]);
                    discard_overlong_partial(&mut self.pending, &self.device);
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Number of buffered bytes that make up complete lines.
    ///
    /// A trailing fragment without its newline isn't counted until the rest
    /// of the line arrives.
    pub fn bytes_waiting(&mut self) -> Result<usize, ProtocolError> {
        self.fill()?;
        Ok(self
            .pending
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1))
    }

    /// Next complete line with trailing whitespace removed, or an empty
    /// string if no full line has been received yet. Never blocks.
    pub fn read_line_or_empty(&mut self) -> Result<String, ProtocolError> {
        self.fill()?;
        let Some(pos) = self.pending.iter().position(|b| *b == b'\n') else {
            return Ok(String::new());
        };

        let raw: Vec<u8> = self.pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        tracing::debug!("rx {line:?}");
        Ok(line)
    }

    /// Drop stale input, both in the driver and in the reassembly buffer
    pub fn flush_input(&mut self) -> Result<(), ProtocolError> {
        self.channel_mut()?.clear_input_buffer()?;
        self.pending.clear();
        Ok(())
    }

    /// Release the device. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            tracing::debug!("closed {}", self.device);
        }
        self.pending.clear();
    }
}

/// Drop an unterminated tail once it outgrows [`MAX_PARTIAL_LINE`].
/// Complete lines ahead of it are kept.
fn discard_overlong_partial(pending: &mut Vec<u8>, device: &str) {
    let start = pending
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);
    let partial = pending.len() - start;
    if partial > MAX_PARTIAL_LINE {
        tracing::warn!("{device}: discarding {partial} bytes with no line terminator");
        pending.truncate(start);
    }
}

impl<C: CommunicationChannel> Drop for Transport<C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Something that can open a [`Transport`] for a device and rate
pub trait PortOpener {
    /// Channel type of the transports this opener produces
    type Channel: CommunicationChannel;

    /// Open `device` at `baud_rate` with the given exchange timeout
    fn open(
        &mut self,
        device: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Transport<Self::Channel>, ProtocolError>;
}

/// Opens real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    type Channel = SerialChannel;

    fn open(
        &mut self,
        device: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Transport<SerialChannel>, ProtocolError> {
        Transport::open(device, baud_rate, timeout)
    }
}
