//! Configuration file support for caniap.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (CANIAP_*)
//! 3. Local config file (./caniap.toml)
//! 4. Global config file (~/.config/caniap/config.toml)
//!
//! Remembered USB adapters live in their own files (`caniap_ports.toml` next
//! to the project, or `ports.toml` in the global config directory) so that
//! saving one never rewrites user-edited settings.

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

/// Name of the per-project configuration file.
pub const LOCAL_CONFIG: &str = "caniap.toml";

/// Name of the per-project file of remembered adapters.
pub const LOCAL_PORTS: &str = "caniap_ports.toml";

/// Name of the global file of remembered adapters.
const GLOBAL_PORTS: &str = "ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Adapter connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Serial baud rate of the adapter.
    pub baud: Option<u32>,
    /// CAN bus bitrate in bit/s.
    pub bitrate: Option<u32>,
}

/// Remembered USB adapters, as stored in a ports file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownAdapters {
    /// Adapters to treat as known during auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

impl KnownAdapters {
    fn load(path: &Path) -> Result<Self, CliError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read ports file {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            CliError::Config(format!(
                "Failed to parse ports file {} (invalid TOML): {e}",
                path.display()
            ))
        })
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Additional USB adapters to treat as known.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Transfer tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSection {
    /// Minimum spacing between messages, in milliseconds.
    pub interval_ms: Option<u64>,
    /// Response timeout, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Retries per page before giving up (unbounded when unset).
    pub max_retries: Option<u32>,
    /// Cycle the adapter connection every N messages (0 disables).
    pub reconnect_every: Option<usize>,
    /// Zero-pad images whose length is not a multiple of 8.
    #[serde(default)]
    pub pad: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferSection,
}

impl Config {
    /// Load configuration from all available sources.
    ///
    /// Unreadable or invalid files are reported and skipped.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                match Self::load_from_file(&global_path) {
                    Ok(global_config) => {
                        debug!("Loaded global config from {}", global_path.display());
                        config.merge(global_config);
                    },
                    Err(e) => warn!("{e}"),
                }
            }
        }

        // Load local config (overrides global)
        let local_path = Path::new(LOCAL_CONFIG);
        if local_path.exists() {
            match Self::load_from_file(local_path) {
                Ok(local_config) => {
                    debug!("Loaded local config from {LOCAL_CONFIG}");
                    config.merge(local_config);
                },
                Err(e) => warn!("{e}"),
            }
        }

        config.load_known_adapters();
        config
    }

    /// Merge remembered adapters from the global and local ports files.
    fn load_known_adapters(&mut self) {
        let global = Self::global_config_dir().map(|dir| dir.join(GLOBAL_PORTS));
        let local = Some(PathBuf::from(LOCAL_PORTS));
        for path in [global, local].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            match KnownAdapters::load(&path) {
                Ok(known) => {
                    debug!("Loaded remembered adapters from {}", path.display());
                    self.add_devices(known.usb_device);
                },
                Err(e) => warn!("{e}"),
            }
        }
    }

    fn add_devices(&mut self, devices: Vec<UsbDevice>) {
        for device in devices {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// An explicitly requested file must exist and parse.
    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let mut config = Self::load_from_file(path)?;
        debug!("Loaded config from {}", path.display());
        config.load_known_adapters();
        Ok(config)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, CliError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&content).map_err(|e| {
            CliError::Config(format!(
                "Failed to parse config file {} (invalid TOML): {e}",
                path.display()
            ))
        })
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "caniap").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        let connection = other.port.connection;
        if connection.serial.is_some() {
            self.port.connection.serial = connection.serial;
        }
        if connection.baud.is_some() {
            self.port.connection.baud = connection.baud;
        }
        if connection.bitrate.is_some() {
            self.port.connection.bitrate = connection.bitrate;
        }
        self.add_devices(other.port.usb_device);

        let transfer = other.transfer;
        if transfer.interval_ms.is_some() {
            self.transfer.interval_ms = transfer.interval_ms;
        }
        if transfer.timeout_ms.is_some() {
            self.transfer.timeout_ms = transfer.timeout_ms;
        }
        if transfer.max_retries.is_some() {
            self.transfer.max_retries = transfer.max_retries;
        }
        if transfer.reconnect_every.is_some() {
            self.transfer.reconnect_every = transfer.reconnect_every;
        }
        if transfer.pad {
            self.transfer.pad = true;
        }
    }

    /// Whether a USB adapter was remembered by the user.
    pub fn knows_device(&self, vid: u16, pid: u16) -> bool {
        self.port
            .usb_device
            .iter()
            .any(|d| d.matches(vid, pid))
    }

    /// Save a USB adapter for future auto-detection.
    ///
    /// Only the ports file is touched; settings files are never rewritten.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        if self.knows_device(vid, pid) {
            return Ok(());
        }
        let device = UsbDevice { vid, pid };

        // Stay local when the project already has a config or ports file
        let path = if Path::new(LOCAL_PORTS).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join(GLOBAL_PORTS)
        } else {
            PathBuf::from(LOCAL_PORTS)
        };

        append_usb_device(&path, device.clone())?;
        self.port.usb_device.push(device);
        info!("Saved USB adapter {vid:04X}:{pid:04X} to {}", path.display());
        Ok(())
    }
}

/// Add one adapter to a ports file, keeping the entries already there.
fn append_usb_device(path: &Path, device: UsbDevice) -> anyhow::Result<()> {
    let mut known = if path.exists() {
        KnownAdapters::load(path)?
    } else {
        KnownAdapters::default()
    };
    if !known.usb_device.contains(&device) {
        known.usb_device.push(device);
    }
    known.save(path)
}
