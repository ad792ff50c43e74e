//! Serial port handling
//!
//! Provides low-level serial port access for the AT console.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;

use super::{ProtocolError, PORT_READ_TIMEOUT};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                product: usb_info.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key for port names. USB-serial bridges (the usual way an ESP8266
/// board shows up) come first, then CDC-ACM ports, then everything else.
/// Numeric suffixes sort numerically.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let numbered = |rest: &str| rest.parse::<usize>().unwrap_or(usize::MAX);

    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        return (0, numbered(rest), basename.to_string());
    }
    if basename.starts_with("cu.usbserial")
        || basename.starts_with("cu.SLAB")
        || basename.starts_with("cu.wchusbserial")
    {
        return (0, 0, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        return (1, numbered(rest), basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Enumeration misses some USB-serial nodes on minimal Linux systems
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port at the given baud rate.
///
/// The driver timeout is kept short; the session never asks for more bytes
/// than `bytes_to_read` reports, so it only matters for writes.
pub fn open_port(name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(name, baud_rate)
        .timeout(PORT_READ_TIMEOUT)
        .open()
        .map_err(|e| ProtocolError::DeviceBusy {
            device: name.to_string(),
            reason: e.to_string(),
        })
}

/// Configure a serial port for AT firmware: 8N1, no flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

    // NodeMCU-style boards wire DTR/RTS to EN and GPIO0; leave both released
    // so opening the port doesn't reset the chip into the bootloader.
    if let Err(e) = port.write_data_terminal_ready(false) {
        tracing::warn!("configure_port: failed to release DTR: {e} (continuing)");
    }
    if let Err(e) = port.write_request_to_send(false) {
        tracing::warn!("configure_port: failed to release RTS: {e} (continuing)");
    }

    Ok(())
}
