//! Flash command implementation.

use anyhow::{Context, Result};
use caniap::{
    AlignmentPolicy, FirmwareImage, ReconnectPolicy, Reconnecting, RetryPolicy, Transfer,
    TransferConfig,
};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use crate::commands::open_adapter;
use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

/// Flash options given on the command line.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlashOptions {
    pub pad: bool,
    pub max_retries: Option<u32>,
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub reconnect_every: Option<usize>,
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".into()).into())
    } else {
        Ok(())
    }
}

/// Read an image file and lay it out in frames.
pub(crate) fn load_image(path: &Path, pad: bool) -> Result<FirmwareImage> {
    let policy = if pad {
        AlignmentPolicy::ZeroPad
    } else {
        AlignmentPolicy::Reject
    };
    FirmwareImage::from_file(path, policy)
        .with_context(|| format!("Failed to load firmware image {}", path.display()))
}

/// Transfer tuning: flags first, then config file, then library defaults.
pub(crate) fn transfer_config(options: &FlashOptions, config: &Config) -> TransferConfig {
    let defaults = TransferConfig::default();
    let section = &config.transfer;

    let interval = options
        .interval_ms
        .or(section.interval_ms)
        .map_or(defaults.min_interval, Duration::from_millis);
    let timeout = options
        .timeout_ms
        .or(section.timeout_ms)
        .map_or(defaults.response_timeout, Duration::from_millis);
    let retry = match options.max_retries.or(section.max_retries) {
        Some(retries) => RetryPolicy::limited(retries),
        None => RetryPolicy::unbounded(),
    };

    defaults
        .with_min_interval(interval)
        .with_response_timeout(timeout)
        .with_retry(retry)
}

/// Reconnect cadence; 0 disables reconnection.
pub(crate) fn reconnect_policy(options: &FlashOptions, config: &Config) -> ReconnectPolicy {
    match options
        .reconnect_every
        .or(config.transfer.reconnect_every)
    {
        Some(0) => ReconnectPolicy::never(),
        Some(every) => ReconnectPolicy::every(every),
        None => ReconnectPolicy::default(),
    }
}

fn progress_bar(cli: &Cli, frames: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(frames as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    image_path: &Path,
    options: &FlashOptions,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware image {}",
            style("📦").cyan(),
            image_path.display()
        );
    }

    let image = load_image(image_path, options.pad || config.transfer.pad)?;
    let summary = image.summary();
    if !cli.quiet {
        eprintln!(
            "{} {} bytes, {} frames in {} pages",
            style("ℹ").blue(),
            summary.len,
            summary.frames,
            summary.pages
        );
        if summary.padding > 0 {
            eprintln!(
                "{} Padded final frame with {} zero bytes",
                style("⚠").yellow(),
                summary.padding
            );
        }
    }

    let transfer_config = transfer_config(options, config);
    let reconnect = reconnect_policy(options, config);
    let slcan = open_adapter(cli, config)?;
    ensure_not_interrupted()?;

    if !cli.quiet {
        eprintln!("{} Erasing and programming...", style("⏳").yellow());
    }

    let pb = progress_bar(cli, summary.frames);
    let mut transport = Reconnecting::new(slcan, reconnect);
    let result = Transfer::new(&mut transport, &image, transfer_config)
        .with_progress(|done, _| pb.set_position(done as u64))
        .run();

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            pb.abandon();
            if let Some(committed) = err.committed_frame() {
                eprintln!(
                    "{} Device accepted {committed} of {} frames before the failure",
                    style("⚠").yellow(),
                    summary.frames
                );
            }
            if err.is_cancelled() {
                return Err(CliError::Cancelled("Transfer interrupted".into()).into());
            }
            return Err(anyhow::Error::from(err).context("Firmware transfer failed"));
        },
    };

    pb.finish_with_message("done");

    if !cli.quiet {
        eprintln!(
            "\n{} Flashed {} frames in {:.1}s ({} CRC retries, {} reconnects)",
            style("🎉").green().bold(),
            report.frames_total,
            report.elapsed.as_secs_f64(),
            report.crc_failures,
            transport.reconnects()
        );
    }

    Ok(())
}
