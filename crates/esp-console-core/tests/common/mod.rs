//! Simulated AT device for integration tests
#![allow(dead_code)]

use esp_console_core::clock::{Clock, ManualClock};
use esp_console_core::protocol::{CommunicationChannel, PortOpener, ProtocolError, Transport};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Reply fragments, each released `ms` after the command line was written
pub type Script = Vec<(u64, String)>;

pub fn reply(fragments: &[(u64, &str)]) -> Script {
    fragments
        .iter()
        .map(|(ms, text)| (*ms, text.to_string()))
        .collect()
}

/// What the simulated devices saw
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub written: Vec<u8>,
    pub events: Vec<String>,
}

pub type SharedLog = Arc<Mutex<DeviceLog>>;

/// Device that answers each written line with the next script, on the
/// shared manual timeline
pub struct ScriptedChannel {
    clock: ManualClock,
    baud_rate: u32,
    scripts: VecDeque<Script>,
    in_flight: Vec<(Duration, Vec<u8>)>,
    rx: VecDeque<u8>,
    line: Vec<u8>,
    log: SharedLog,
    fail_on_send: bool,
}

impl ScriptedChannel {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            baud_rate: 115200,
            scripts: VecDeque::new(),
            in_flight: Vec::new(),
            rx: VecDeque::new(),
            line: Vec::new(),
            log: SharedLog::default(),
            fail_on_send: false,
        }
    }

    /// Make every write fail as if the adapter had been unplugged
    pub fn fail_writes(mut self) -> Self {
        self.fail_on_send = true;
        self
    }

    /// Bytes already sitting in the input buffer before anything is sent
    pub fn stale(mut self, bytes: &str) -> Self {
        self.rx.extend(bytes.as_bytes());
        self
    }

    /// Queue the reply to the next command
    pub fn reply(mut self, script: Script) -> Self {
        self.scripts.push_back(script);
        self
    }

    pub fn log(&self) -> SharedLog {
        self.log.clone()
    }

    fn with_log(mut self, baud_rate: u32, log: SharedLog) -> Self {
        self.baud_rate = baud_rate;
        self.log = log;
        self
    }

    fn release(&mut self) {
        let now = self.clock.elapsed();
        let mut waiting = Vec::new();
        for (due, bytes) in self.in_flight.drain(..) {
            if due <= now {
                self.rx.extend(bytes);
            } else {
                waiting.push((due, bytes));
            }
        }
        self.in_flight = waiting;
    }
}

impl Read for ScriptedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.release();
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_on_send {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled"));
        }
        self.log.lock().unwrap().written.extend_from_slice(buf);
        for &byte in buf {
            self.line.push(byte);
            if byte == b'\n' {
                self.line.clear();
                if let Some(script) = self.scripts.pop_front() {
                    let sent_at = self.clock.elapsed();
                    for (ms, text) in script {
                        self.in_flight
                            .push((sent_at + Duration::from_millis(ms), text.into_bytes()));
                    }
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for ScriptedChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.release();
        Ok(self.rx.len() as u32)
    }
}

impl Drop for ScriptedChannel {
    fn drop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.events.push(format!("close {}", self.baud_rate));
        }
    }
}

pub fn transport(channel: ScriptedChannel, timeout: Duration) -> Transport<ScriptedChannel> {
    Transport::from_channel(channel, "/dev/ttyUSB0", 115200, timeout)
}

/// Opener handing out scripted devices. Each open at a rate takes the next
/// queued script list for that rate; rates with nothing queued stay silent.
pub struct ScriptedOpener {
    clock: ManualClock,
    devices: HashMap<u32, VecDeque<Vec<Script>>>,
    fail_at: Option<u32>,
    log: SharedLog,
}

impl ScriptedOpener {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            devices: HashMap::new(),
            fail_at: None,
            log: SharedLog::default(),
        }
    }

    /// Script the device opened next at `baud_rate`
    pub fn on_open(mut self, baud_rate: u32, scripts: Vec<Script>) -> Self {
        self.devices.entry(baud_rate).or_default().push_back(scripts);
        self
    }

    /// Make opening at `baud_rate` fail as if the port were busy
    pub fn fail_at(mut self, baud_rate: u32) -> Self {
        self.fail_at = Some(baud_rate);
        self
    }

    pub fn log(&self) -> SharedLog {
        self.log.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().events.clone()
    }
}

impl PortOpener for ScriptedOpener {
    type Channel = ScriptedChannel;

    fn open(
        &mut self,
        device: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Transport<ScriptedChannel>, ProtocolError> {
        if self.fail_at == Some(baud_rate) {
            return Err(ProtocolError::DeviceBusy {
                device: device.to_string(),
                reason: "Device or resource busy".to_string(),
            });
        }

        self.log
            .lock()
            .unwrap()
            .events
            .push(format!("open {baud_rate}"));

        let mut channel =
            ScriptedChannel::new(&self.clock).with_log(baud_rate, self.log.clone());
        if let Some(scripts) = self.devices.get_mut(&baud_rate).and_then(VecDeque::pop_front) {
            for script in scripts {
                channel = channel.reply(script);
            }
        }

        Ok(Transport::from_channel(channel, device, baud_rate, timeout))
    }
}

/// Manual clock that raises `flag` once the shared timeline passes `after`,
/// like a Ctrl-C arriving while the loop sleeps
#[derive(Debug, Clone)]
pub struct InterruptingClock {
    clock: ManualClock,
    after: Duration,
    flag: Arc<AtomicBool>,
}

impl InterruptingClock {
    pub fn new(clock: &ManualClock, after: Duration) -> Self {
        Self {
            clock: clock.clone(),
            after,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

impl Clock for InterruptingClock {
    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
        if self.clock.elapsed() >= self.after {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

/// The usual firmware reply to `AT+GMR`
pub fn gmr_reply() -> Script {
    reply(&[
        (20, "AT+GMR\r\n"),
        (60, "AT version:1.7.4.0(May 11 2020 19:13:04)\r\n"),
        (90, "SDK version:3.0.4(9532ceb)\r\n"),
        (120, "\r\nOK\r\n"),
    ])
}
