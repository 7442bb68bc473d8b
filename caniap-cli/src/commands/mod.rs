//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod flash;
pub(crate) mod info;

use anyhow::Result;
use caniap::{NativePort, SerialConfig, SlcanTransport};
use console::style;

use crate::config::Config;
use crate::{Cli, get_port};

/// Resolve the adapter port and build an SLCAN transport for it.
///
/// The port itself is only opened when the transport connects.
pub(crate) fn open_adapter(cli: &Cli, config: &mut Config) -> Result<SlcanTransport<NativePort>> {
    let bitrate = cli.bitrate(config)?;
    let baud = cli.baud(config);
    let port = get_port(cli, config)?;

    if !cli.quiet {
        eprintln!(
            "{} Using {} at {baud} baud, CAN {bitrate}",
            style("🔌").cyan(),
            style(&port).bold()
        );
    }

    Ok(SlcanTransport::native(SerialConfig::new(port, baud), bitrate))
}
