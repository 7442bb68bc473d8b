//! The transfer state machine.
//!
//! ```text
//! Idle -> Erasing -> Transferring -> AwaitingPageCrc -> PageAccepted -> Transferring | Completing -> Done
//!                         ^                          \
//!                         +------------------------ PageRejected
//! ```
//!
//! Any failure moves to `Aborted`. The transport is released exactly once on
//! every exit path.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::image::{FirmwareImage, FramePosition};
use crate::protocol::iap::{Channel, ERASE_FAILED, ProtocolMessage, READY, decode_crc_ack};
use crate::transfer::config::TransferConfig;
use crate::transfer::cursor::TransferCursor;
use crate::transport::Transport;

/// State of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Not started.
    Idle,
    /// Start handshake answered with `status`.
    Erasing {
        /// First byte of the device's reply.
        status: u8,
    },
    /// Streaming the frames of the current page.
    Transferring,
    /// The current frame closes its page and carries the CRC challenge.
    AwaitingPageCrc {
        /// Why the frame closes the page.
        position: FramePosition,
    },
    /// The device's page CRC matched.
    PageAccepted,
    /// The device's page CRC did not match.
    PageRejected {
        /// Locally accumulated CRC.
        expected: u16,
        /// CRC reported by the device.
        reported: u16,
    },
    /// All pages committed; sending the end-of-program marker.
    Completing,
    /// Finished successfully.
    Done,
    /// Stopped on an error.
    Aborted,
}

impl TransferState {
    /// Whether no further transitions happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

/// Outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TransferReport {
    /// Frames in the image.
    pub frames_total: usize,
    /// Frames put on the wire, retransmissions included.
    pub frames_sent: usize,
    /// Pages accepted by the device.
    pub pages_committed: usize,
    /// Page CRC mismatches recovered from.
    pub crc_failures: usize,
    /// Wall time from connect to release.
    pub elapsed: Duration,
}

/// Enforces the minimum spacing between messages.
struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Longest uninterrupted sleep inside a cancellable pause.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

fn settle(pause: Duration) {
    if !pause.is_zero() {
        thread::sleep(pause);
    }
}

type ProgressFn<'a> = Box<dyn FnMut(usize, usize) + 'a>;
type InterruptFn<'a> = Box<dyn Fn() -> bool + 'a>;

/// One firmware transfer over a [`Transport`].
pub struct Transfer<'a, T: Transport> {
    transport: T,
    image: &'a FirmwareImage,
    config: TransferConfig,
    cursor: TransferCursor,
    state: TransferState,
    history: Vec<TransferState>,
    pacer: Pacer,
    started: bool,
    frames_sent: usize,
    pages_committed: usize,
    crc_failures: usize,
    page_failures: u32,
    progress: Option<ProgressFn<'a>>,
    interrupted: InterruptFn<'a>,
}

impl<'a, T: Transport> Transfer<'a, T> {
    /// Prepare a transfer of `image`.
    ///
    /// Cancellation follows [`crate::is_interrupted_requested`] unless
    /// replaced with [`Transfer::with_interrupt_check`].
    pub fn new(transport: T, image: &'a FirmwareImage, config: TransferConfig) -> Self {
        let pacer = Pacer::new(config.min_interval);
        Self {
            transport,
            image,
            config,
            cursor: TransferCursor::new(),
            state: TransferState::Idle,
            history: vec![TransferState::Idle],
            pacer,
            started: false,
            frames_sent: 0,
            pages_committed: 0,
            crc_failures: 0,
            page_failures: 0,
            progress: None,
            interrupted: Box::new(crate::is_interrupted_requested),
        }
    }

    /// Report `(committed_frames, total_frames)` after every accepted page.
    #[must_use]
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: FnMut(usize, usize) + 'a,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Replace the cancellation check polled between frames.
    #[must_use]
    pub fn with_interrupt_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> bool + 'a,
    {
        self.interrupted = Box::new(check);
        self
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[TransferState] {
        &self.history
    }

    /// Current cursor.
    pub fn cursor(&self) -> &TransferCursor {
        &self.cursor
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the transfer to completion.
    ///
    /// Errors raised after the start handshake are wrapped in
    /// [`Error::Aborted`] with the last committed frame index.
    pub fn run(&mut self) -> Result<TransferReport> {
        if self.state != TransferState::Idle {
            return Err(Error::Protocol("transfer has already run".into()));
        }

        let started = Instant::now();
        info!(
            "Transferring {} bytes in {} frames",
            self.image.len(),
            self.image.total_frames()
        );

        let mut handle = match self.transport.connect() {
            Ok(handle) => handle,
            Err(e) => {
                self.enter(TransferState::Aborted);
                return Err(e);
            },
        };
        let outcome = self.drive(&mut handle);
        let released = self.transport.close(handle);

        match outcome {
            Ok(()) => {
                if let Err(e) = released {
                    warn!("Failed to release transport: {e}");
                }
                Ok(self.report(started.elapsed()))
            },
            Err(e) => {
                if let Err(close_err) = released {
                    warn!("Failed to release transport: {close_err}");
                }
                self.enter(TransferState::Aborted);
                Err(e)
            },
        }
    }

    fn report(&self, elapsed: Duration) -> TransferReport {
        TransferReport {
            frames_total: self.image.total_frames(),
            frames_sent: self.frames_sent,
            pages_committed: self.pages_committed,
            crc_failures: self.crc_failures,
            elapsed,
        }
    }

    fn enter(&mut self, next: TransferState) {
        trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn drive(&mut self, handle: &mut T::Handle) -> Result<()> {
        while !self.state.is_terminal() {
            let next = self.step(handle).map_err(|e| {
                if self.started {
                    Error::aborted(self.cursor.committed_frame_index(), e)
                } else {
                    e
                }
            })?;
            self.enter(next);
        }
        Ok(())
    }

    fn step(&mut self, handle: &mut T::Handle) -> Result<TransferState> {
        match self.state {
            TransferState::Idle => self.start(handle),
            TransferState::Erasing { status } => self.erased(status),
            TransferState::Transferring => self.transfer_frame(handle),
            TransferState::AwaitingPageCrc { position } => self.challenge_page(handle, position),
            TransferState::PageAccepted => self.accept_page(handle),
            TransferState::PageRejected { expected, reported } => {
                self.reject_page(handle, expected, reported)
            },
            TransferState::Completing => self.complete(handle),
            TransferState::Done | TransferState::Aborted => Ok(self.state),
        }
    }

    /// Sleep for `duration`, polling the interrupt check between slices.
    fn pause(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            if (self.interrupted)() {
                info!(
                    "Interrupted while waiting with {} frames committed",
                    self.cursor.committed_frame_index()
                );
                return Err(Error::Cancelled);
            }
            thread::sleep(remaining.min(PAUSE_SLICE));
        }
    }

    fn send(&mut self, handle: &mut T::Handle, message: &ProtocolMessage) -> Result<()> {
        self.pacer.wait();
        self.transport.send(handle, message)
    }

    fn request(&mut self, handle: &mut T::Handle, message: &ProtocolMessage, channel: Channel) -> Result<Vec<u8>> {
        self.pacer.wait();
        self.transport
            .request(handle, message, self.config.response_timeout, channel)
    }

    fn start(&mut self, handle: &mut T::Handle) -> Result<TransferState> {
        debug!("Requesting erase");
        let reply = self.request(handle, &ProtocolMessage::program_start(), Channel::Update)?;
        let &status = reply
            .first()
            .ok_or_else(|| Error::MalformedResponse("empty reply to program start".into()))?;
        Ok(TransferState::Erasing { status })
    }

    fn erased(&mut self, status: u8) -> Result<TransferState> {
        if status == ERASE_FAILED {
            return Err(Error::EraseFailed { status });
        }
        if status != READY {
            warn!("Unexpected program start reply 0x{status:02X}, continuing");
        }

        info!("Device erased, sending image");
        self.cursor = TransferCursor::new();
        self.started = true;
        self.pause(self.config.erase_settle)?;
        Ok(TransferState::Transferring)
    }

    fn transfer_frame(&mut self, handle: &mut T::Handle) -> Result<TransferState> {
        if (self.interrupted)() {
            info!(
                "Interrupted with {} frames committed",
                self.cursor.committed_frame_index()
            );
            return Err(Error::Cancelled);
        }

        let index = self.cursor.current_frame();
        let frame = self.image.frame_at(index)?;
        self.cursor.fold(&frame);

        match self.image.classify(index, self.cursor.frame_in_page()) {
            FramePosition::MidPage => {
                trace!("Frame {index}");
                self.send(handle, &ProtocolMessage::write_to_flash(frame.bytes()))?;
                self.frames_sent += 1;
                self.cursor.next_in_page();
                Ok(TransferState::Transferring)
            },
            position => Ok(TransferState::AwaitingPageCrc { position }),
        }
    }

    fn challenge_page(
        &mut self,
        handle: &mut T::Handle,
        position: FramePosition,
    ) -> Result<TransferState> {
        if position == FramePosition::LastFrame {
            self.send(handle, &ProtocolMessage::last_frame())?;
            settle(self.config.last_frame_settle);
        }

        let index = self.cursor.current_frame();
        let frame = self.image.frame_at(index)?;
        trace!("Frame {index} (CRC challenge)");
        let reply = self.request(
            handle,
            &ProtocolMessage::write_to_flash(frame.bytes()),
            Channel::CrcAck,
        )?;
        self.frames_sent += 1;

        let reported = decode_crc_ack(&reply)?;
        let expected = self.cursor.crc_accumulator();
        if reported == expected {
            Ok(TransferState::PageAccepted)
        } else {
            Ok(TransferState::PageRejected { expected, reported })
        }
    }

    fn accept_page(&mut self, handle: &mut T::Handle) -> Result<TransferState> {
        self.send(handle, &ProtocolMessage::crc_succeeded())?;

        let total = self.image.total_frames();
        let committed = self.cursor.commit_page();
        self.pages_committed += 1;
        self.page_failures = 0;
        debug!("Page {} committed ({committed}/{total} frames)", self.pages_committed);

        if let Some(progress) = self.progress.as_mut() {
            progress(committed, total);
        }

        if committed >= total {
            Ok(TransferState::Completing)
        } else {
            Ok(TransferState::Transferring)
        }
    }

    fn reject_page(
        &mut self,
        handle: &mut T::Handle,
        expected: u16,
        reported: u16,
    ) -> Result<TransferState> {
        let page_start = self.cursor.committed_frame_index();
        self.crc_failures += 1;
        self.page_failures += 1;
        warn!(
            "CRC mismatch on page at frame {page_start}: device 0x{reported:04X}, expected 0x{expected:04X} (attempt {})",
            self.page_failures
        );

        self.send(handle, &ProtocolMessage::crc_failed())?;
        self.cursor.reset_page();

        if self.config.retry.exhausted(self.page_failures) {
            return Err(Error::PageRetriesExhausted {
                page_start,
                attempts: self.page_failures,
            });
        }

        self.pause(self.config.retry.backoff.delay(self.page_failures))?;
        Ok(TransferState::Transferring)
    }

    fn complete(&mut self, handle: &mut T::Handle) -> Result<TransferState> {
        self.send(handle, &ProtocolMessage::program_end())?;
        info!("Transfer complete, device is loading the new program");
        Ok(TransferState::Done)
    }
}

/// Transfer `image` with the default cancellation check.
pub fn flash<T: Transport>(
    transport: T,
    image: &FirmwareImage,
    config: TransferConfig,
) -> Result<TransferReport> {
    Transfer::new(transport, image, config).run()
}
