//! Adapter port selection.
//!
//! Resolution order:
//! - explicit `--port` / `CANIAP_PORT`
//! - `port.connection.serial` from the config file
//! - auto-detection among known SLCAN adapters, prompting when ambiguous
//!
//! Non-interactive mode never prompts.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    caniap::{NativePortEnumerator, PortEnumerator, PortInfo},
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if ambiguous).
    pub non_interactive: bool,
}

/// Result of port selection including whether it was a known adapter.
#[derive(Debug, Clone)]
pub struct SelectedPort {
    /// The selected port info.
    pub port: PortInfo,
    /// Whether this port matched a known or remembered adapter.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn unnamed_port(name: &str) -> PortInfo {
    PortInfo {
        name: name.to_string(),
        vid: None,
        pid: None,
        manufacturer: None,
        product: None,
        serial_number: None,
    }
}

/// Check if a port matches a known adapter (built-in list or config).
fn is_known_device(port: &PortInfo, config: &Config) -> bool {
    if port.adapter_name().is_some() {
        return true;
    }
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.knows_device(vid, pid),
        _ => false,
    }
}

fn select_non_interactive_port(candidates: Vec<PortInfo>, config: &Config) -> Result<SelectedPort> {
    match candidates.len().cmp(&1) {
        Ordering::Equal => {
            let mut candidates = candidates;
            let port = candidates.remove(0);
            Ok(SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            })
        },
        Ordering::Greater => Err(usage_err(
            "multiple serial ports found; pass --port in non-interactive mode",
        )),
        Ordering::Less => Err(usage_err("no CAN adapter found; pass --port")),
    }
}

/// Select the adapter port.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, config));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, config));
    }

    let ports = NativePortEnumerator::list_ports()?;
    if ports.is_empty() {
        return Err(usage_err("no serial ports found; is the CAN adapter plugged in?"));
    }

    let known: Vec<PortInfo> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    let candidates = if known.is_empty() { ports } else { known };

    if options.non_interactive {
        return select_non_interactive_port(candidates, config);
    }

    match candidates.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates, config)
        },
        Ordering::Equal => {
            let mut candidates = candidates;
            let port = candidates.remove(0);
            if is_known_device(&port, config) {
                info!("Auto-selected port: {}", port.name);
                Ok(SelectedPort {
                    port,
                    is_known: true,
                })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("no CAN adapter found; pass --port")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("port selection cancelled".into()).into()
            } else {
                usage_err("port selection prompt failed")
            }
        },
    }
}

/// Look a port name up among the enumerated ports, keeping USB details if found.
fn find_port_by_name(name: &str, config: &Config) -> SelectedPort {
    let ports = NativePortEnumerator::list_ports().unwrap_or_default();
    let port = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
        .cloned()
        .unwrap_or_else(|| unnamed_port(name));

    SelectedPort {
        is_known: is_known_device(&port, config),
        port,
    }
}

/// Human-readable one-line description of a port.
pub fn describe_port(port: &PortInfo) -> String {
    let adapter = port
        .adapter_name()
        .map(|name| format!(" [{}]", style(name).yellow()))
        .unwrap_or_default();
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();
    format!("{}{adapter}{vid_pid}{product}", port.name)
}

fn select_port_interactive(mut ports: Vec<PortInfo>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Known adapters first
    ports.sort_by_key(|p| !is_known_device(p, config));

    let term_width = usize::from(console::Term::stderr().size().1);
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&describe_port(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the CAN adapter")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) if index < ports.len() => {
            let port = ports.swap_remove(index);
            Ok(SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            })
        },
        Some(index) => Err(anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("port selection cancelled".into()).into()),
    }
}

fn confirm_single_port(port: PortInfo) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", describe_port(&port)))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(CliError::Cancelled("port selection cancelled".into()).into())
    }
}

/// Offer to remember an unknown USB adapter.
pub fn ask_remember_port(port: &PortInfo, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.knows_device(vid, pid) || !std::io::stdin().is_terminal() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Remember this adapter for auto-detection?")
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UsbDevice;

    fn port(name: &str, vid: Option<u16>, pid: Option<u16>) -> PortInfo {
        PortInfo {
            vid,
            pid,
            ..unnamed_port(name)
        }
    }

    fn assert_usage(err: &anyhow::Error) {
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_known_adapter_builtin() {
        let canable = port("/dev/ttyACM0", Some(0x16D0), Some(0x117E));
        assert!(is_known_device(&canable, &Config::default()));
    }

    #[test]
    fn test_known_adapter_from_config() {
        let custom = port("/dev/ttyUSB0", Some(0x1234), Some(0x5678));
        let mut config = Config::default();
        assert!(!is_known_device(&custom, &config));

        config.port.usb_device.push(UsbDevice {
            vid: 0x1234,
            pid: 0x5678,
        });
        assert!(is_known_device(&custom, &config));
    }

    #[test]
    fn test_port_without_usb_ids_is_unknown() {
        assert!(!is_known_device(&port("/dev/ttyS0", None, None), &Config::default()));
    }

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![port("/dev/ttyACM0", None, None), port("/dev/ttyACM1", None, None)];
        let err = select_non_interactive_port(ports, &Config::default()).unwrap_err();
        assert_usage(&err);
        assert!(err.to_string().contains("multiple"));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        let err = select_non_interactive_port(vec![], &Config::default()).unwrap_err();
        assert_usage(&err);
    }

    #[test]
    fn test_select_non_interactive_single_port() {
        let ports = vec![port("/dev/ttyACM0", Some(0x16D0), Some(0x117E))];
        let selected = select_non_interactive_port(ports, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyACM0");
        assert!(selected.is_known);
    }

    #[test]
    fn test_explicit_port_is_used_verbatim() {
        let options = SerialOptions {
            port: Some("/dev/caniap-test-port".into()),
            non_interactive: true,
        };
        let selected = select_serial_port(&options, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/caniap-test-port");
        assert!(!selected.is_known);
    }

    #[test]
    fn test_describe_port_includes_ids() {
        console::set_colors_enabled(false);
        let text = describe_port(&port("/dev/ttyACM0", Some(0x16D0), Some(0x117E)));
        assert!(text.starts_with("/dev/ttyACM0"));
        assert!(text.contains("16D0:117E"));
        assert!(text.contains("CANable"));
    }
}
