//! Session management
//!
//! Handles the connection lifecycle and command execution with the device.

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::{
    exchange::{send_command_interruptible, ResponseResult},
    probe::probe_baud_interruptible,
    PortOpener, ProtocolError, SerialOpener, Transport,
};
use crate::clock::{Clock, SystemClock};
use crate::settings::{BaudSetting, SettingsStore};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the port (and probing, for `auto`)
    Connecting,
    /// Connected and ready
    Connected,
}

/// Console session against one device.
///
/// Owns at most one open [`Transport`]. Commands run one at a time; dropping
/// the session closes the port.
pub struct Session<S: SettingsStore, O: PortOpener = SerialOpener, K: Clock = SystemClock> {
    settings: S,
    opener: O,
    clock: K,
    transport: Option<Transport<O::Channel>>,
    state: ConnectionState,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<S: SettingsStore> Session<S> {
    /// Session over real serial ports and the wall clock
    pub fn serial(settings: S) -> Self {
        Self::new(settings, SerialOpener, SystemClock)
    }
}

impl<S: SettingsStore, O: PortOpener, K: Clock> Session<S, O, K> {
    /// Session with an explicit port opener and clock
    pub fn new(settings: S, opener: O, clock: K) -> Self {
        Self {
            settings,
            opener,
            clock,
            transport: None,
            state: ConnectionState::Disconnected,
            interrupt: None,
        }
    }

    /// Abort running exchanges with [`ProtocolError::Interrupted`] once `flag`
    /// is set. The port stays open until [`close`](Self::close) or drop.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a transport is open
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_open)
    }

    /// Settings this session reads and updates
    pub fn settings(&self) -> &S {
        &self.settings
    }

    /// Baud rate of the open connection
    pub fn baud_rate(&self) -> Option<u32> {
        self.transport.as_ref().map(Transport::baud_rate)
    }

    /// Connect using the configured device and speed
    pub fn connect(&mut self) -> Result<u32, ProtocolError> {
        let device = self.settings.device_path();
        let speed = self.settings.baud_setting();
        self.connect_to(&device, speed)
    }

    /// Connect to `device`. With [`BaudSetting::Auto`] the rate is probed
    /// first and reported back through [`SettingsStore::set_baud_rate`].
    pub fn connect_to(&mut self, device: &str, speed: BaudSetting) -> Result<u32, ProtocolError> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }
        if device.trim().is_empty() {
            return Err(ProtocolError::NoDevice);
        }

        self.state = ConnectionState::Connecting;
        let opened = self.open_at(device, speed);
        match opened {
            Ok(transport) => {
                let rate = transport.baud_rate();
                tracing::info!("Connected to {device} at speed {rate}.");
                self.transport = Some(transport);
                self.state = ConnectionState::Connected;
                Ok(rate)
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn open_at(
        &mut self,
        device: &str,
        speed: BaudSetting,
    ) -> Result<Transport<O::Channel>, ProtocolError> {
        let rate = match speed {
            BaudSetting::Fixed(rate) => rate,
            BaudSetting::Auto => self.detect(device)?,
        };
        let timeout = self.settings.timeout();
        self.opener.open(device, rate, timeout)
    }

    fn detect(&mut self, device: &str) -> Result<u32, ProtocolError> {
        let config = self.settings.probe_config();
        let rate = probe_baud_interruptible(
            &mut self.opener,
            device,
            &config,
            &self.clock,
            self.interrupt.clone(),
        )?;
        self.settings.set_baud_rate(rate);
        Ok(rate)
    }

    /// Detect the configured device's baud rate without staying connected.
    ///
    /// Not allowed while connected, since the port can't be opened twice.
    pub fn probe_baud(&mut self) -> Result<u32, ProtocolError> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }
        let device = self.settings.device_path();
        if device.trim().is_empty() {
            return Err(ProtocolError::NoDevice);
        }
        self.detect(&device)
    }

    /// Run one command and collect the reply
    pub fn send_command(&mut self, command: &str) -> Result<ResponseResult, ProtocolError> {
        let transport = self.transport.as_mut().ok_or(ProtocolError::NotConnected)?;
        send_command_interruptible(transport, command, &self.clock, self.interrupt.clone())
    }

    /// Close the connection. Returns whether one was open.
    pub fn close(&mut self) -> bool {
        self.state = ConnectionState::Disconnected;
        match self.transport.take() {
            Some(mut transport) => {
                let was_open = transport.is_open();
                transport.close();
                if was_open {
                    tracing::info!("Disconnected from {}.", transport.device());
                }
                was_open
            }
            None => false,
        }
    }
}

impl<S: SettingsStore, O: PortOpener, K: Clock> Drop for Session<S, O, K> {
    fn drop(&mut self) {
        self.close();
    }
}
