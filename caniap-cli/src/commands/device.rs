//! One-shot device commands.

use anyhow::{Context, Result};
use console::style;
use std::time::Duration;

use crate::Cli;
use crate::commands::open_adapter;
use crate::config::Config;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

fn response_timeout(config: &Config) -> Duration {
    config
        .transfer
        .timeout_ms
        .map_or(DEFAULT_TIMEOUT, Duration::from_millis)
}

/// Query the device's status byte.
pub(crate) fn cmd_status(cli: &Cli, config: &mut Config) -> Result<()> {
    let timeout = response_timeout(config);
    let mut transport = open_adapter(cli, config)?;
    let status = caniap::query_status(&mut transport, timeout).context("Status query failed")?;

    let marker = if status.is_failure() {
        style("✗").red()
    } else {
        style("✓").green()
    };
    eprintln!("{marker} Device status: {}", style(status).bold());
    Ok(())
}

/// Clear the bootloader's update markers.
pub(crate) fn cmd_reset_markers(cli: &Cli, config: &mut Config) -> Result<()> {
    let timeout = response_timeout(config);
    let mut transport = open_adapter(cli, config)?;
    caniap::reset_markers(&mut transport, timeout).context("Marker reset failed")?;

    if !cli.quiet {
        eprintln!("{} Update markers cleared", style("✓").green());
    }
    Ok(())
}

/// Ask the device to jump to its ROM bootloader.
pub(crate) fn cmd_rom_bootloader(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut transport = open_adapter(cli, config)?;
    caniap::enter_system_bootloader(&mut transport)
        .context("Failed to request system bootloader")?;

    if !cli.quiet {
        eprintln!("{} System bootloader requested", style("✓").green());
    }
    Ok(())
}
