//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the device
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Device path is blank
    #[error("No device configured")]
    NoDevice,

    /// Device path doesn't exist on the filesystem
    #[error("Device {0} does not exist")]
    DeviceMissing(String),

    /// Device exists but couldn't be opened or configured
    #[error("Could not open {device}: {reason}")]
    DeviceBusy {
        /// Path that was opened
        device: String,
        /// Driver error text
        reason: String,
    },

    /// Serial driver error on an open port
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No open transport
    #[error("Not connected to device")]
    NotConnected,

    /// A transport is already open
    #[error("Already connected")]
    AlreadyConnected,

    /// Autodetection got no exact `OK` at any candidate rate
    #[error("Couldn't find correct baud rate (tried {tried:?})")]
    NoResponsiveRate {
        /// Rates attempted, in order
        tried: Vec<u32>,
    },

    /// Baud setting is neither `auto` nor a positive integer
    #[error("Invalid baud rate setting: {0}")]
    InvalidBaudRate(String),

    /// The user aborted a running exchange
    #[error("Interrupted")]
    Interrupted,

    /// Read or write failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
