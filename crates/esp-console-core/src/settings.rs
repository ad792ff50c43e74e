//! Connection settings
//!
//! The session never reaches for global state; whoever owns the settings
//! (a config file loader, CLI flags, a test) hands them in through
//! [`SettingsStore`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::protocol::{ProbeConfig, ProtocolError};

/// Configured baud rate, or a request to detect it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BaudSetting {
    /// Detect the rate on connect
    #[default]
    Auto,
    /// Use this rate as is
    Fixed(u32),
}

impl FromStr for BaudSetting {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(BaudSetting::Auto);
        }
        match s.parse::<u32>() {
            Ok(rate) if rate > 0 => Ok(BaudSetting::Fixed(rate)),
            _ => Err(ProtocolError::InvalidBaudRate(s.to_string())),
        }
    }
}

impl TryFrom<String> for BaudSetting {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BaudSetting> for String {
    fn from(value: BaudSetting) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BaudSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaudSetting::Auto => write!(f, "auto"),
            BaudSetting::Fixed(rate) => write!(f, "{rate}"),
        }
    }
}

/// What the session needs from its configuration
pub trait SettingsStore {
    /// Path of the serial device, possibly blank if unset
    fn device_path(&self) -> String;

    /// Rate to connect at, or `auto`
    fn baud_setting(&self) -> BaudSetting;

    /// Called once autodetection has found a working rate
    fn set_baud_rate(&mut self, rate: u32);

    /// Deadline for a silent device during an exchange; zero waits forever
    fn timeout(&self) -> Duration {
        Duration::ZERO
    }

    /// How autodetection should go about it
    fn probe_config(&self) -> ProbeConfig {
        ProbeConfig::default()
    }
}

/// Plain in-memory settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Serial device path (e.g. "/dev/ttyUSB0")
    pub device: String,
    /// Baud rate or "auto"
    pub speed: BaudSetting,
    /// Exchange timeout in milliseconds, 0 for none
    pub timeout_ms: u64,
    /// Autodetection parameters
    pub probe: ProbeConfig,
}

impl SessionSettings {
    /// Settings for `device` with no exchange timeout
    pub fn new(device: impl Into<String>, speed: BaudSetting) -> Self {
        Self {
            device: device.into(),
            speed,
            ..Default::default()
        }
    }

    /// Set the exchange timeout, rounded down to whole milliseconds
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl SettingsStore for SessionSettings {
    fn device_path(&self) -> String {
        self.device.clone()
    }

    fn baud_setting(&self) -> BaudSetting {
        self.speed
    }

    fn set_baud_rate(&mut self, rate: u32) {
        self.speed = BaudSetting::Fixed(rate);
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn probe_config(&self) -> ProbeConfig {
        self.probe.clone()
    }
}

impl<S: SettingsStore + ?Sized> SettingsStore for &mut S {
    fn device_path(&self) -> String {
        (**self).device_path()
    }

    fn baud_setting(&self) -> BaudSetting {
        (**self).baud_setting()
    }

    fn set_baud_rate(&mut self, rate: u32) {
        (**self).set_baud_rate(rate)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn probe_config(&self) -> ProbeConfig {
        (**self).probe_config()
    }
}
