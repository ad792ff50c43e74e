//! Baud rate autodetection
//!
//! Opens the device at each candidate rate in turn, sends a harmless query
//! and keeps the first rate that gets back a clean `OK`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use super::{exchange::send_command_interruptible, PortOpener, ProtocolError};
use crate::clock::Clock;

/// Standard ESP8266 rates, fastest first
pub const BAUD_CANDIDATES: [u32; 3] = [115200, 57600, 9600];

/// Query every AT firmware answers (firmware version)
pub const PROBE_COMMAND: &str = "AT+GMR";

/// Per-candidate deadline in milliseconds
pub const PROBE_TIMEOUT_MS: u64 = 1000;

/// How autodetection probes a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Rates to try, in order
    pub candidates: Vec<u32>,
    /// Command sent at each rate
    pub command: String,
    /// Deadline for a silent device at each rate
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            candidates: BAUD_CANDIDATES.to_vec(),
            command: PROBE_COMMAND.to_string(),
            timeout_ms: PROBE_TIMEOUT_MS,
        }
    }
}

impl ProbeConfig {
    /// Per-candidate deadline as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Find the rate `device` talks at.
///
/// Only one transport is open at a time: each candidate's port is closed
/// before the next one is opened. Failing to open the device is returned as
/// is rather than counted as a wrong rate.
pub fn probe_baud<O: PortOpener, K: Clock>(
    opener: &mut O,
    device: &str,
    config: &ProbeConfig,
    clock: K,
) -> Result<u32, ProtocolError> {
    probe_baud_interruptible(opener, device, config, clock, None)
}

pub(crate) fn probe_baud_interruptible<O: PortOpener, K: Clock>(
    opener: &mut O,
    device: &str,
    config: &ProbeConfig,
    clock: K,
    interrupt: Option<Arc<AtomicBool>>,
) -> Result<u32, ProtocolError> {
    for &rate in &config.candidates {
        tracing::debug!("probing {device} at {rate} baud");

        let mut transport = opener.open(device, rate, config.timeout())?;
        let outcome =
            send_command_interruptible(&mut transport, &config.command, &clock, interrupt.clone());
        transport.close();
        let result = outcome?;

        if result.is_exact_ok() {
            tracing::info!("Found correct speed: {rate}.");
            return Ok(rate);
        }
        tracing::debug!(
            "no answer at {rate} baud (last line {:?}, {:?})",
            result.last_line,
            result.completion
        );
    }

    Err(ProtocolError::NoResponsiveRate {
        tried: config.candidates.clone(),
    })
}
