//! One AT request/response exchange
//!
//! AT firmware replies are free-form lines with no length prefix. A reply is
//! over when a line containing `ERROR` or `OK` shows up, or, for a device that
//! stays silent, when the transport's timeout runs out. The loop below is a
//! small state machine so it can be stepped against a [`ManualClock`] in tests.
//!
//! [`ManualClock`]: crate::clock::ManualClock

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{stream::CommunicationChannel, ProtocolError, Transport};
use crate::clock::Clock;

/// Pause after the priming read before the deadline starts
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Pause between polls, and between consecutive buffered lines
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines with at most this many characters after trimming are dropped
const MIN_BODY_LINE_LEN: usize = 1;

/// Terminal status token in a firmware reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentinel {
    /// Command accepted
    Ok,
    /// Command rejected or failed
    Error,
}

impl Sentinel {
    /// Find a sentinel anywhere in `line`. `ERROR` wins over `OK`.
    pub fn find(line: &str) -> Option<Self> {
        if line.contains("ERROR") {
            Some(Sentinel::Error)
        } else if line.contains("OK") {
            Some(Sentinel::Ok)
        } else {
            None
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentinel::Ok => write!(f, "OK"),
            Sentinel::Error => write!(f, "ERROR"),
        }
    }
}

/// Why an exchange stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The device gave a definitive answer
    Sentinel(Sentinel),
    /// Nothing usable arrived before the deadline
    Timeout,
}

/// Where an exchange is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing done yet
    Idle,
    /// Stale input discarded
    Flushed,
    /// Command written, priming read not done yet
    Sent,
    /// Polling for reply lines
    Draining,
    /// Finished, with the reason
    Complete(Completion),
}

/// Outcome of one exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseResult {
    /// Last trimmed line seen, including the sentinel line itself
    pub last_line: String,
    /// Reply lines collected before the sentinel, in arrival order
    pub body: Vec<String>,
    /// Why reading stopped
    pub completion: Completion,
}

impl ResponseResult {
    /// Strict check used by baud probing: the final line is exactly `OK`
    pub fn is_exact_ok(&self) -> bool {
        self.last_line == "OK"
    }

    /// Sentinel that ended the exchange, if it didn't time out
    pub fn sentinel(&self) -> Option<Sentinel> {
        match self.completion {
            Completion::Sentinel(s) => Some(s),
            Completion::Timeout => None,
        }
    }

    /// The device said nothing usable before the deadline
    pub fn timed_out(&self) -> bool {
        self.completion == Completion::Timeout
    }
}

/// A single command/reply exchange over a borrowed transport
pub struct Exchange<'a, C: CommunicationChannel, K: Clock> {
    transport: &'a mut Transport<C>,
    clock: K,
    command: &'a str,
    state: ExchangeState,
    last_line: String,
    body: Vec<String>,
    started: Option<Instant>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a, C: CommunicationChannel, K: Clock> Exchange<'a, C, K> {
    /// Prepare to send `command` over `transport`; nothing happens until stepped
    pub fn new(transport: &'a mut Transport<C>, command: &'a str, clock: K) -> Self {
        Self {
            transport,
            clock,
            command,
            state: ExchangeState::Idle,
            last_line: String::new(),
            body: Vec::new(),
            started: None,
            interrupt: None,
        }
    }

    /// Abort with [`ProtocolError::Interrupted`] at the next step once `flag`
    /// is set
    pub fn interruptible(mut self, flag: Option<Arc<AtomicBool>>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Current state
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Lines collected so far
    pub fn body(&self) -> &[String] {
        &self.body
    }

    /// Advance by one state transition (or one poll while draining)
    pub fn step(&mut self) -> Result<ExchangeState, ProtocolError> {
        let interrupted = self
            .interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst));
        if interrupted && !matches!(self.state, ExchangeState::Complete(_)) {
            tracing::debug!("{:?} interrupted in {:?}", self.command, self.state);
            return Err(ProtocolError::Interrupted);
        }

        self.state = match self.state {
            ExchangeState::Idle => {
                self.transport.flush_input()?;
                ExchangeState::Flushed
            }
            ExchangeState::Flushed => {
                self.transport.write_line(self.command)?;
                ExchangeState::Sent
            }
            ExchangeState::Sent => {
                // Usually the command echo; it seeds last_line but never the body
                self.last_line = self.transport.read_line_or_empty()?.trim().to_string();
                self.clock.sleep(SETTLE_DELAY);
                self.started = Some(self.clock.now());
                ExchangeState::Draining
            }
            ExchangeState::Draining => self.poll()?,
            done @ ExchangeState::Complete(_) => done,
        };

        if let ExchangeState::Complete(completion) = self.state {
            tracing::debug!(
                "{:?} complete: {:?}, {} line(s)",
                self.command,
                completion,
                self.body.len()
            );
        }
        Ok(self.state)
    }

    fn poll(&mut self) -> Result<ExchangeState, ProtocolError> {
        while self.transport.bytes_waiting()? > 0 {
            let line = self.transport.read_line_or_empty()?.trim().to_string();
            if let Some(sentinel) = Sentinel::find(&line) {
                self.last_line = line;
                return Ok(ExchangeState::Complete(Completion::Sentinel(sentinel)));
            }
            if line.chars().count() > MIN_BODY_LINE_LEN {
                self.body.push(line.clone());
            }
            self.last_line = line;
            self.clock.sleep(POLL_INTERVAL);
        }

        if let Some(sentinel) = Sentinel::find(&self.last_line) {
            return Ok(ExchangeState::Complete(Completion::Sentinel(sentinel)));
        }

        let timeout = self.transport.timeout();
        if self.body.is_empty() && !timeout.is_zero() {
            let started = *self.started.get_or_insert_with(|| self.clock.now());
            if self.clock.now().duration_since(started) > timeout {
                return Ok(ExchangeState::Complete(Completion::Timeout));
            }
        }

        self.clock.sleep(POLL_INTERVAL);
        Ok(ExchangeState::Draining)
    }

    /// Step until complete and hand back the result
    pub fn run(mut self) -> Result<ResponseResult, ProtocolError> {
        loop {
            if let ExchangeState::Complete(completion) = self.step()? {
                return Ok(ResponseResult {
                    last_line: std::mem::take(&mut self.last_line),
                    body: std::mem::take(&mut self.body),
                    completion,
                });
            }
        }
    }
}

/// Flush, send `command`, and read until the reply is complete
pub fn send_command<C: CommunicationChannel, K: Clock>(
    transport: &mut Transport<C>,
    command: &str,
    clock: K,
) -> Result<ResponseResult, ProtocolError> {
    Exchange::new(transport, command, clock).run()
}

/// [`send_command`] that gives up with [`ProtocolError::Interrupted`] once
/// `interrupt` is set
pub fn send_command_interruptible<C: CommunicationChannel, K: Clock>(
    transport: &mut Transport<C>,
    command: &str,
    clock: K,
    interrupt: Option<Arc<AtomicBool>>,
) -> Result<ResponseResult, ProtocolError> {
    Exchange::new(transport, command, clock)
        .interruptible(interrupt)
        .run()
}
