use esp_console_core::protocol::{ProtocolError, LINE_TERMINATOR};
use esp_console_core::settings::BaudSetting;

#[test]
fn test_protocol_error_display() {
    let err = ProtocolError::NotConnected;
    assert_eq!(err.to_string(), "Not connected to device");
}

#[test]
fn test_device_missing_names_the_path() {
    let err = ProtocolError::DeviceMissing("/dev/cu.usbserial".to_string());
    assert!(err.to_string().contains("/dev/cu.usbserial"));
}

#[test]
fn test_no_responsive_rate_lists_candidates() {
    let err = ProtocolError::NoResponsiveRate {
        tried: vec![115200, 57600, 9600],
    };
    let msg = err.to_string();
    assert!(msg.contains("baud rate"));
    assert!(msg.contains("57600"));
}

#[test]
fn test_io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "cable pulled");
    let err: ProtocolError = io.into();
    assert!(matches!(err, ProtocolError::IoError(_)));
    assert!(err.to_string().contains("cable pulled"));
}

#[test]
fn test_invalid_baud_setting_error() {
    let err = "115k".parse::<BaudSetting>().unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidBaudRate(ref s) if s == "115k"));
}

#[test]
fn test_commands_end_in_crlf() {
    assert_eq!(LINE_TERMINATOR, b"\r\n");
}
