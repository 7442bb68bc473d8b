//! Serial port abstraction for SLCAN adapters.
//!
//! USB-to-CAN adapters speaking the Lawicel/SLCAN protocol appear as serial
//! ports. The `Port` trait keeps the SLCAN transport independent from the
//! concrete port implementation so it can be driven by an in-memory port in
//! tests.
//!
//! ```text
//! +------------------+
//! | Transfer machine |
//! +--------+---------+
//!          | Transport trait
//! +--------+---------+
//! |  SlcanTransport  |
//! +--------+---------+
//!          | Port trait
//! +--------+---------+
//! | NativePort       |
//! |  (serialport)    |
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Known SLCAN adapter USB identifiers (VID, PID, name).
pub const KNOWN_ADAPTERS: &[(u16, u16, &str)] = &[
    (0x16D0, 0x117E, "CANable (slcan)"),
    (0x0483, 0x5740, "STM32 virtual COM (slcan)"),
    (0x1D50, 0x606F, "candleLight"),
    (0x0403, 0x6015, "FTDI (CANUSB)"),
];

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate of the adapter's serial side.
    pub baud_rate: u32,
    /// Read timeout of a single read call.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(50),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Name of the known adapter this port belongs to, if any.
    #[must_use]
    pub fn adapter_name(&self) -> Option<&'static str> {
        let (vid, pid) = (self.vid?, self.pid?);
        KNOWN_ADAPTERS
            .iter()
            .find(|(v, p, _)| *v == vid && *p == pid)
            .map(|(_, _, name)| *name)
    }
}

/// Byte-stream port the SLCAN transport runs over.
pub trait Port: Read + Write + Send {
    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
