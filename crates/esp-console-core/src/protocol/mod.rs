//! AT Command Protocol
//!
//! Line-oriented request/response exchanges with ESP8266 AT firmware over a
//! serial port, plus baud rate autodetection.

pub mod exchange;
mod error;
pub mod probe;
pub mod serial;
mod session;
pub mod stream;
mod transport;

pub use error::ProtocolError;
pub use exchange::{
    send_command, send_command_interruptible, Completion, Exchange, ExchangeState,
    ResponseResult, Sentinel,
};
pub use probe::{probe_baud, ProbeConfig, BAUD_CANDIDATES, PROBE_COMMAND};
pub use serial::{list_ports, PortInfo};
pub use session::{ConnectionState, Session};
pub use stream::{CommunicationChannel, SerialChannel};
pub use transport::{PortOpener, SerialOpener, Transport, MAX_PARTIAL_LINE};

/// Every command goes out with this terminator
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Driver-level read/write timeout for an open port
pub const PORT_READ_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(100);
