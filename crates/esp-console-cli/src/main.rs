//! One-shot command line front end for an ESP8266 running AT firmware.
//!
//! # Usage
//!
//! ```bash
//! esp-console ports
//! esp-console probe --device /dev/ttyUSB0
//! esp-console send --device /dev/ttyUSB0 --baud auto AT+GMR AT+CWMODE?
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use esp_console_core::prelude::*;
use esp_console_core::protocol::list_ports;

#[derive(Parser)]
#[command(name = "esp-console")]
#[command(about = "Talk to ESP8266 AT firmware over a serial port", version)]
struct Cli {
    /// Log wire traffic and exchange states
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports, likely ESP8266 adapters first
    Ports,

    /// Detect the device's baud rate
    Probe {
        #[command(flatten)]
        target: Target,
    },

    /// Send commands and print each reply
    Send {
        #[command(flatten)]
        target: Target,

        /// Baud rate, or "auto" to detect it first
        #[arg(short, long)]
        baud: Option<BaudSetting>,

        /// Give up on a silent device after this many milliseconds (0 waits forever)
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Print each reply as a JSON object
        #[arg(long)]
        json: bool,

        /// AT commands, sent in order
        #[arg(required = true)]
        commands: Vec<String>,
    },
}

#[derive(Args)]
struct Target {
    /// Serial device (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long)]
    device: Option<String>,

    /// JSON settings file; flags override its values
    #[arg(short, long)]
    settings: Option<PathBuf>,
}

/// Default exchange timeout for the CLI, so a dead device can't hang it
const DEFAULT_TIMEOUT_MS: u64 = 2000;

impl Target {
    fn load(&self) -> Result<SessionSettings> {
        let mut settings = match &self.settings {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading settings from {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing settings in {}", path.display()))?
            }
            None => SessionSettings {
                timeout_ms: DEFAULT_TIMEOUT_MS,
                ..Default::default()
            },
        };
        if let Some(device) = &self.device {
            settings.device = device.clone();
        }
        Ok(settings)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "esp_console_core=debug,esp_console=debug"
    } else {
        "esp_console_core=info,esp_console=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Flag raised by Ctrl-C. The running exchange stops at its next poll and the
/// session closes the port on the way out.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupted, closing port");
        flag.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;
    Ok(interrupted)
}

/// Lines to print for one reply: the body, then the sentinel line so OK and
/// ERROR can be told apart
fn reply_lines(reply: &ResponseResult) -> Vec<&str> {
    let mut lines: Vec<&str> = reply.body.iter().map(String::as_str).collect();
    if matches!(reply.completion, Completion::Sentinel(_)) {
        lines.push(&reply.last_line);
    }
    lines
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if matches!(
                e.downcast_ref::<ProtocolError>(),
                Some(ProtocolError::NoResponsiveRate { .. })
            ) {
                eprintln!("Check the wiring and power, or set the rate with --baud.");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Ports => {
            let ports = list_ports();
            if ports.is_empty() {
                println!("No serial ports found.");
            }
            for port in ports {
                match (port.vid, port.pid) {
                    (Some(vid), Some(pid)) => println!(
                        "{}  {:04x}:{:04x}  {}",
                        port.name,
                        vid,
                        pid,
                        port.product.unwrap_or_default()
                    ),
                    _ => println!("{}", port.name),
                }
            }
            Ok(())
        }
        Command::Probe { target } => {
            let mut session = Session::serial(target.load()?).with_interrupt(interrupt_flag()?);
            let rate = session.probe_baud()?;
            println!("{rate}");
            Ok(())
        }
        Command::Send {
            target,
            baud,
            timeout_ms,
            json,
            commands,
        } => {
            let mut settings = target.load()?;
            if let Some(baud) = baud {
                settings.speed = baud;
            }
            if let Some(timeout_ms) = timeout_ms {
                settings.timeout_ms = timeout_ms;
            }

            let mut session = Session::serial(settings).with_interrupt(interrupt_flag()?);
            session
                .connect()
                .with_context(|| format!("connecting to {}", session.settings().device))?;

            let mut failed = Vec::new();
            for command in &commands {
                let reply = session.send_command(command)?;
                if reply.sentinel() == Some(Sentinel::Error) {
                    failed.push(command.as_str());
                }
                if json {
                    println!("{}", serde_json::to_string(&reply)?);
                } else {
                    for line in reply_lines(&reply) {
                        println!("{line}");
                    }
                }
                if reply.timed_out() {
                    tracing::warn!("{command}: no reply before timeout");
                }
            }

            session.close();
            if !failed.is_empty() {
                bail!("device answered ERROR to {}", failed.join(", "));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_send_parses_auto_baud() {
        let cli = Cli::try_parse_from([
            "esp-console",
            "send",
            "--device",
            "/dev/ttyUSB0",
            "--baud",
            "auto",
            "AT+GMR",
            "AT+CWMODE?",
        ])
        .unwrap();

        match cli.command {
            Command::Send { baud, commands, .. } => {
                assert_eq!(baud, Some(BaudSetting::Auto));
                assert_eq!(commands, vec!["AT+GMR", "AT+CWMODE?"]);
            }
            _ => panic!("Expected send command"),
        }
    }

    #[test]
    fn test_send_rejects_bad_baud() {
        let result = Cli::try_parse_from(["esp-console", "send", "--baud", "fast", "AT"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_reply_lines_end_with_sentinel() {
        let reply = ResponseResult {
            last_line: "ERROR".to_string(),
            body: vec!["AT+FOO".to_string()],
            completion: Completion::Sentinel(Sentinel::Error),
        };
        assert_eq!(reply_lines(&reply), vec!["AT+FOO", "ERROR"]);

        let reply = ResponseResult {
            last_line: "OK".to_string(),
            body: vec!["AT+FOO".to_string()],
            completion: Completion::Sentinel(Sentinel::Ok),
        };
        assert_eq!(reply_lines(&reply), vec!["AT+FOO", "OK"]);
    }

    #[test]
    fn test_timed_out_reply_has_no_status_line() {
        let reply = ResponseResult {
            last_line: "AT+FOO".to_string(),
            body: vec![],
            completion: Completion::Timeout,
        };
        assert!(reply_lines(&reply).is_empty());
    }

    #[test]
    fn test_flags_override_defaults() {
        let target = Target {
            device: Some("/dev/ttyUSB1".to_string()),
            settings: None,
        };
        let settings = target.load().unwrap();
        assert_eq!(settings.device, "/dev/ttyUSB1");
        assert_eq!(settings.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(settings.speed, BaudSetting::Auto);
    }
}
