//! Position and page CRC of an in-progress transfer.

use crate::image::{Frame, PAGE_SIZE};

/// Mutable progress state owned by the transfer loop.
///
/// `crc_accumulator` covers exactly the frames
/// `committed_frame_index ..= committed_frame_index + frame_in_page` folded
/// since the last page reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferCursor {
    committed_frame_index: usize,
    frame_in_page: usize,
    crc_accumulator: u16,
}

impl TransferCursor {
    /// Cursor at the start of the image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames permanently accepted by the device.
    pub fn committed_frame_index(&self) -> usize {
        self.committed_frame_index
    }

    /// Offset of the current frame within its page.
    pub fn frame_in_page(&self) -> usize {
        self.frame_in_page
    }

    /// Running CRC of the current page.
    pub fn crc_accumulator(&self) -> u16 {
        self.crc_accumulator
    }

    /// Image index of the current frame.
    pub fn current_frame(&self) -> usize {
        self.committed_frame_index + self.frame_in_page
    }

    /// Fold the current frame into the page CRC.
    pub fn fold(&mut self, frame: &Frame) {
        debug_assert_eq!(frame.index(), self.current_frame());
        self.crc_accumulator = frame.fold_crc(self.crc_accumulator);
    }

    /// Move to the next frame of the same page.
    pub fn next_in_page(&mut self) {
        debug_assert!(self.frame_in_page < PAGE_SIZE - 1);
        self.frame_in_page += 1;
    }

    /// Commit the current page and start the next one.
    ///
    /// Returns the new committed frame index.
    pub fn commit_page(&mut self) -> usize {
        self.committed_frame_index += self.frame_in_page + 1;
        self.reset_page();
        self.committed_frame_index
    }

    /// Rewind to the first frame of the current page.
    pub fn reset_page(&mut self) {
        self.frame_in_page = 0;
        self.crc_accumulator = 0;
    }
}
