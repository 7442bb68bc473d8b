//! caniap CLI - Command-line tool for CAN in-application firmware updates.
//!
//! ## Features
//!
//! - Flash raw binary images over an SLCAN adapter
//! - Inspect the frame/page layout and page CRCs of an image
//! - Query device status, reset update markers, jump to the ROM bootloader
//! - Adapter auto-detection and interactive selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Default serial baud rate of the adapter.
pub(crate) const DEFAULT_BAUD: u32 = 115_200;

/// Default CAN bus bitrate.
pub(crate) const DEFAULT_BITRATE: u32 = 500_000;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// CLI errors with their own exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing input (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration (exit 3).
    #[error("{0}")]
    Config(String),
    /// Interrupted by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// Exit code for a failed run.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Config(_) => 3,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(lib_err) = cause.downcast_ref::<caniap::Error>() {
            if lib_err.is_cancelled() {
                return 130;
            }
            if lib_err.is_device_not_found() {
                return 4;
            }
            if matches!(lib_err.root(), caniap::Error::Config(_)) {
                return 3;
            }
        }
    }
    1
}

/// caniap - Firmware updates for CAN IAP bootloaders over an SLCAN adapter.
///
/// Environment variables:
///   CANIAP_PORT              - Default serial port of the adapter
///   CANIAP_BAUD              - Adapter serial baud rate (default: 115200)
///   CANIAP_BITRATE           - CAN bus bitrate (default: 500000)
///   CANIAP_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "caniap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  caniap flash app.bin\n  caniap -p /dev/ttyACM0 --bitrate 250000 status\n  caniap info --json app.bin")]
pub(crate) struct Cli {
    /// Serial port of the CAN adapter (auto-detected if not specified).
    #[arg(short, long, global = true, env = "CANIAP_PORT")]
    pub(crate) port: Option<String>,

    /// Serial baud rate of the adapter [default: 115200].
    #[arg(short, long, global = true, env = "CANIAP_BAUD")]
    pub(crate) baud: Option<u32>,

    /// CAN bus bitrate in bit/s [default: 500000].
    #[arg(long, global = true, env = "CANIAP_BITRATE", value_parser = parse_bitrate)]
    pub(crate) bitrate: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "CANIAP_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash a raw binary image.
    Flash {
        /// Path to the firmware image.
        image: PathBuf,

        /// Zero-pad images whose length is not a multiple of 8.
        #[arg(long)]
        pad: bool,

        /// Give up on a page after this many CRC retries (unbounded by default).
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,

        /// Minimum spacing between CAN messages in milliseconds [default: 100].
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,

        /// Response timeout in milliseconds [default: 1000].
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Cycle the adapter connection every N messages, 0 to disable [default: 25].
        #[arg(long, value_name = "N")]
        reconnect_every: Option<usize>,
    },

    /// Show the frame/page layout of an image.
    Info {
        /// Path to the firmware image.
        image: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Zero-pad images whose length is not a multiple of 8.
        #[arg(long)]
        pad: bool,
    },

    /// Query the device status byte.
    Status,

    /// Clear the bootloader's update markers.
    ResetMarkers,

    /// Make the device jump to its ROM bootloader.
    RomBootloader,

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Accept only bitrates the SLCAN `S` command can select.
fn parse_bitrate(s: &str) -> Result<u32, String> {
    let bps: u32 = s
        .trim()
        .parse()
        .map_err(|e| format!("Invalid bitrate '{s}': {e}"))?;
    caniap::CanBitrate::from_bps(bps)
        .map(|_| bps)
        .map_err(|e| e.to_string())
}

impl Cli {
    /// Serial baud rate: flag or environment, then config, then default.
    pub(crate) fn baud(&self, config: &Config) -> u32 {
        self.baud
            .or(config.port.connection.baud)
            .unwrap_or(DEFAULT_BAUD)
    }

    /// CAN bitrate: flag or environment, then config, then default.
    pub(crate) fn bitrate(&self, config: &Config) -> Result<caniap::CanBitrate> {
        let bps = self
            .bitrate
            .or(config.port.connection.bitrate)
            .unwrap_or(DEFAULT_BITRATE);
        caniap::CanBitrate::from_bps(bps).map_err(|e| CliError::Config(e.to_string()).into())
    }
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Ctrl-C handler unavailable: {e}");
    }
    caniap::set_interrupt_checker(was_interrupted);
}

fn main() {
    // Disable colors when not writing to a terminal
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "caniap v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    match &cli.command {
        Commands::Flash {
            image,
            pad,
            max_retries,
            interval_ms,
            timeout_ms,
            reconnect_every,
        } => commands::flash::cmd_flash(
            cli,
            &mut config,
            image,
            &commands::flash::FlashOptions {
                pad: *pad,
                max_retries: *max_retries,
                interval_ms: *interval_ms,
                timeout_ms: *timeout_ms,
                reconnect_every: *reconnect_every,
            },
        ),
        Commands::Info { image, json, pad } => {
            commands::info::cmd_info(cli, &config, image, *json, *pad)
        },
        Commands::Status => commands::device::cmd_status(cli, &mut config),
        Commands::ResetMarkers => commands::device::cmd_reset_markers(cli, &mut config),
        Commands::RomBootloader => commands::device::cmd_rom_bootloader(cli, &mut config),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Get the adapter port from CLI args, config, or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}
