//! Firmware transfer: start handshake, paged frame stream with CRC
//! verification, and completion.
//!
//! ## Example
//!
//! ```rust,no_run
//! use caniap::image::{AlignmentPolicy, FirmwareImage};
//! use caniap::transfer::{Transfer, TransferConfig};
//! use caniap::transport::{CanBitrate, ReconnectPolicy, Reconnecting, SlcanTransport};
//! use caniap::SerialConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("app.bin", AlignmentPolicy::Reject)?;
//!     let slcan = SlcanTransport::native(SerialConfig::new("/dev/ttyACM0", 115200), CanBitrate::K500);
//!     let transport = Reconnecting::new(slcan, ReconnectPolicy::default());
//!
//!     let report = Transfer::new(transport, &image, TransferConfig::default())
//!         .with_progress(|done, total| println!("{done}/{total} frames"))
//!         .run()?;
//!     println!("{} CRC retries", report.crc_failures);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cursor;
pub mod machine;

pub use config::{Backoff, RetryPolicy, TransferConfig};
pub use cursor::TransferCursor;
pub use machine::{Transfer, TransferReport, TransferState, flash};
