//! # caniap
//!
//! Host side of a CAN in-application-programming (IAP) firmware update.
//!
//! This crate pushes a raw binary image into a microcontroller's flash over a
//! CAN bus, including:
//!
//! - CRC-16/CCITT page verification
//! - 8-byte frame / 250-frame page layout of the image
//! - Transfer state machine with page retry and cancellation
//! - SLCAN (Lawicel) transport over a USB serial adapter
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//! - `serde`: Serialization support for report types
//!
//! ## Example
//!
//! ```rust,no_run
//! use caniap::{AlignmentPolicy, FirmwareImage, TransferConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("app.bin", AlignmentPolicy::Reject)?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         use caniap::{CanBitrate, Reconnecting, ReconnectPolicy, SerialConfig, SlcanTransport};
//!
//!         let slcan = SlcanTransport::native(
//!             SerialConfig::new("/dev/ttyACM0", 115200),
//!             CanBitrate::K500,
//!         );
//!         let transport = Reconnecting::new(slcan, ReconnectPolicy::default());
//!         let report = caniap::flash(transport, &image, TransferConfig::default())?;
//!         println!("Sent {} frames", report.frames_sent);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod control;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod transfer;
pub mod transport;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    control::{enter_system_bootloader, query_status, reset_markers},
    error::{Error, Result},
    image::{AlignmentPolicy, FirmwareImage, ImageSummary, PageSpan},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Channel, DeviceStatus, ProtocolMessage},
    transfer::{
        Backoff, RetryPolicy, Transfer, TransferConfig, TransferReport, TransferState, flash,
    },
    transport::{CanBitrate, ReconnectPolicy, Reconnecting, SlcanTransport, Transport},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_toggle() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());

        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
