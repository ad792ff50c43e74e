//! # esp-console Core Library
//!
//! Session engine for talking to ESP8266 AT-command firmware over a serial
//! port.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

//!
//! This library provides:
//! - Serial transport with line reassembly
//! - AT request/response exchanges terminated by `OK` / `ERROR`
//! - Baud rate autodetection
//! - A session object that ties the above to injected settings
//!
//! ## Example
//!
//! ```rust,ignore
//! use esp_console_core::prelude::*;
//!
//! let settings = SessionSettings::new("/dev/ttyUSB0", BaudSetting::Auto);
//! let mut session = Session::serial(settings);
//! session.connect()?;
//!
//! let reply = session.send_command("AT+GMR")?;
//! for line in &reply.body {
//!     println!("{line}");
//! }
//! ```

pub mod clock;
pub mod protocol;
pub mod settings;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::protocol::{
        Completion, ProbeConfig, ProtocolError, ResponseResult, Sentinel, Session, Transport,
    };
    pub use crate::settings::{BaudSetting, SessionSettings, SettingsStore};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
