//! Raw firmware image and its frame/page layout.
//!
//! The image is sent in 8-byte frames. Frames are grouped into pages of up to
//! [`PAGE_SIZE`] frames; each page is verified by one CRC exchange.
//!
//! ```text
//! image:  | f0 | f1 | ... | f249 | f250 | ... | f499 | f500 | ... | fN-1 |
//! pages:  |<------ page 0 ----->|<------ page 1 ---->|<-- final page -->|
//! ```

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::crc::{crc16_ccitt_zero, crc16_extend};

/// Bytes per frame (one classic CAN data field).
pub const FRAME_SIZE: usize = 8;

/// Frames per page (2000 bytes of flash).
///
/// The page closes on its 250th frame. Some older device firmware only
/// answers the CRC challenge on the 251st frame of a page; images longer than
/// one page time out against those builds.
pub const PAGE_SIZE: usize = 250;

/// What to do with an image whose length is not a multiple of [`FRAME_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignmentPolicy {
    /// Refuse the image before anything is transmitted.
    #[default]
    Reject,
    /// Pad the final frame with zero bytes.
    ZeroPad,
}

/// One 8-byte unit of transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    index: usize,
    bytes: [u8; FRAME_SIZE],
}

impl Frame {
    /// Zero-based frame index into the image.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Frame contents.
    pub fn bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.bytes
    }

    /// Fold this frame's bytes, in order, into a running CRC.
    #[must_use]
    pub fn fold_crc(&self, crc: u16) -> u16 {
        crc16_extend(crc, &self.bytes)
    }
}

/// Classification of a frame relative to its page and the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePosition {
    /// Neither closes a page nor ends the image.
    MidPage,
    /// Last frame of a full page.
    PageBoundary,
    /// Last frame of the image (may also close a full page).
    LastFrame,
}

impl FramePosition {
    /// Whether this frame carries the page CRC challenge.
    #[must_use]
    pub fn closes_page(self) -> bool {
        !matches!(self, Self::MidPage)
    }
}

/// Whether a frame at this in-page offset closes a full page.
#[must_use]
pub const fn is_page_boundary(frame_in_page: usize) -> bool {
    frame_in_page == PAGE_SIZE - 1
}

/// A run of consecutive frames verified by one CRC exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PageSpan {
    /// Index of the page's first frame.
    pub first_frame: usize,
    /// Number of frames in the page (`PAGE_SIZE` except possibly the last).
    pub frame_count: usize,
}

impl PageSpan {
    /// Zero-based page number.
    #[must_use]
    pub fn number(&self) -> usize {
        self.first_frame / PAGE_SIZE
    }

    /// One past the last frame index of the page.
    #[must_use]
    pub fn end_frame(&self) -> usize {
        self.first_frame + self.frame_count
    }
}

/// Layout summary of an image, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImageSummary {
    /// Image length in bytes, including padding.
    pub len: usize,
    /// Zero bytes appended to align the final frame.
    pub padding: usize,
    /// Number of frames.
    pub frames: usize,
    /// Number of pages.
    pub pages: usize,
    /// Frames in the final page.
    pub final_page_frames: usize,
    /// Expected CRC of every page, in order.
    pub page_crcs: Vec<u16>,
}

/// Immutable firmware image, sized to a whole number of frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    padding: usize,
}

impl FirmwareImage {
    /// Build an image from raw bytes.
    ///
    /// Empty images are rejected. Misaligned images are rejected or padded
    /// according to `policy`.
    pub fn from_bytes(data: impl Into<Vec<u8>>, policy: AlignmentPolicy) -> Result<Self> {
        let mut data = data.into();
        if data.is_empty() {
            return Err(Error::InvalidImage("image is empty".into()));
        }

        let remainder = data.len() % FRAME_SIZE;
        let padding = if remainder == 0 {
            0
        } else {
            match policy {
                AlignmentPolicy::Reject => {
                    return Err(Error::InvalidImage(format!(
                        "length {} is not a multiple of {FRAME_SIZE} bytes",
                        data.len()
                    )));
                },
                AlignmentPolicy::ZeroPad => FRAME_SIZE - remainder,
            }
        };
        data.resize(data.len() + padding, 0x00);

        Ok(Self { data, padding })
    }

    /// Read an image from a raw binary file.
    pub fn from_file<P: AsRef<Path>>(path: P, policy: AlignmentPolicy) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        debug!("Read {} bytes from {}", data.len(), path.display());
        Self::from_bytes(data, policy)
    }

    /// Image bytes, including padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes, including padding.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; empty images cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Zero bytes appended to align the final frame.
    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Number of whole frames.
    pub fn total_frames(&self) -> usize {
        self.data.len() / FRAME_SIZE
    }

    /// The 8 bytes at byte offset `index * 8`.
    pub fn frame_at(&self, index: usize) -> Result<Frame> {
        let chunk = index
            .checked_mul(FRAME_SIZE)
            .and_then(|start| Some(start..start.checked_add(FRAME_SIZE)?))
            .and_then(|range| self.data.get(range))
            .ok_or(Error::OutOfRange {
                index,
                total: self.total_frames(),
            })?;

        let mut bytes = [0u8; FRAME_SIZE];
        bytes.copy_from_slice(chunk);
        Ok(Frame { index, bytes })
    }

    /// Whether `index` is the last frame of the image.
    pub fn is_last_frame(&self, index: usize) -> bool {
        index + 1 == self.total_frames()
    }

    /// Classify the frame at `index`, sitting at `frame_in_page` within its page.
    pub fn classify(&self, index: usize, frame_in_page: usize) -> FramePosition {
        if self.is_last_frame(index) {
            FramePosition::LastFrame
        } else if is_page_boundary(frame_in_page) {
            FramePosition::PageBoundary
        } else {
            FramePosition::MidPage
        }
    }

    /// Iterate over the image's pages in order.
    pub fn pages(&self) -> impl Iterator<Item = PageSpan> + '_ {
        let total = self.total_frames();
        (0..total)
            .step_by(PAGE_SIZE)
            .map(move |first_frame| PageSpan {
                first_frame,
                frame_count: PAGE_SIZE.min(total - first_frame),
            })
    }

    /// Expected CRC of a page, as the device computes it from flash.
    pub fn page_crc(&self, span: PageSpan) -> Result<u16> {
        self.span_crc(span).ok_or(Error::OutOfRange {
            index: span.end_frame().saturating_sub(1),
            total: self.total_frames(),
        })
    }

    fn span_crc(&self, span: PageSpan) -> Option<u16> {
        self.data
            .get(span.first_frame * FRAME_SIZE..span.end_frame() * FRAME_SIZE)
            .map(crc16_ccitt_zero)
    }

    /// Frame and page layout with per-page CRCs.
    pub fn summary(&self) -> ImageSummary {
        let pages: Vec<PageSpan> = self.pages().collect();
        let page_crcs = pages
            .iter()
            .filter_map(|&span| self.span_crc(span))
            .collect();

        ImageSummary {
            len: self.len(),
            padding: self.padding,
            frames: self.total_frames(),
            pages: pages.len(),
            final_page_frames: pages
                .last()
                .map_or(0, |span| span.frame_count),
            page_crcs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_of(len: usize) -> FirmwareImage {
        #[allow(clippy::cast_possible_truncation)]
        let data: Vec<u8> = (0..len)
            .map(|i| i as u8)
            .collect();
        FirmwareImage::from_bytes(data, AlignmentPolicy::Reject).unwrap()
    }

    #[test]
    fn test_total_frames() {
        assert_eq!(image_of(8).total_frames(), 1);
        assert_eq!(image_of(16).total_frames(), 2);
        assert_eq!(image_of(2000).total_frames(), PAGE_SIZE);
    }

    #[test]
    fn test_frame_at_returns_slice() {
        let image = image_of(24);
        let frame = image.frame_at(1).unwrap();
        assert_eq!(frame.index(), 1);
        assert_eq!(frame.bytes(), &[8, 9, 10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_frame_at_out_of_range() {
        let image = image_of(16);
        assert!(matches!(
            image.frame_at(2),
            Err(Error::OutOfRange { index: 2, total: 2 })
        ));
        assert!(image.frame_at(usize::MAX).is_err());
    }

    #[test]
    fn test_is_last_frame() {
        let image = image_of(16);
        assert!(!image.is_last_frame(0));
        assert!(image.is_last_frame(1));
    }

    #[test]
    fn test_page_boundary() {
        assert!(!is_page_boundary(0));
        assert!(!is_page_boundary(248));
        assert!(is_page_boundary(249));
    }

    #[test]
    fn test_classify_prefers_last_frame() {
        let image = image_of(PAGE_SIZE * FRAME_SIZE);
        assert_eq!(image.classify(0, 0), FramePosition::MidPage);
        assert_eq!(image.classify(249, 249), FramePosition::LastFrame);

        let image = image_of(2 * PAGE_SIZE * FRAME_SIZE);
        assert_eq!(image.classify(249, 249), FramePosition::PageBoundary);
        assert!(FramePosition::PageBoundary.closes_page());
        assert!(!FramePosition::MidPage.closes_page());
    }

    #[test]
    fn test_empty_image_rejected() {
        assert!(matches!(
            FirmwareImage::from_bytes(Vec::new(), AlignmentPolicy::ZeroPad),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_misaligned_image_rejected() {
        let result = FirmwareImage::from_bytes(vec![0xAA; 13], AlignmentPolicy::Reject);
        assert!(matches!(result, Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_misaligned_image_zero_padded() {
        let image = FirmwareImage::from_bytes(vec![0xAA; 13], AlignmentPolicy::ZeroPad).unwrap();
        assert_eq!(image.len(), 16);
        assert_eq!(image.padding(), 3);
        assert_eq!(image.frame_at(1).unwrap().bytes(), &[0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0, 0, 0]);
    }

    #[test]
    fn test_pages_cover_image_with_partial_tail() {
        let image = image_of((2 * PAGE_SIZE + 10) * FRAME_SIZE);
        let pages: Vec<PageSpan> = image.pages().collect();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], PageSpan { first_frame: 0, frame_count: PAGE_SIZE });
        assert_eq!(pages[1].first_frame, PAGE_SIZE);
        assert_eq!(pages[2], PageSpan { first_frame: 2 * PAGE_SIZE, frame_count: 10 });
        assert_eq!(pages[2].number(), 2);
        assert_eq!(pages[2].end_frame(), image.total_frames());
    }

    #[test]
    fn test_page_crc_matches_frame_folding() {
        let image = image_of(PAGE_SIZE * FRAME_SIZE + 64);
        for span in image.pages() {
            let folded = (span.first_frame..span.end_frame())
                .map(|i| image.frame_at(i).unwrap())
                .fold(0u16, |crc, frame| frame.fold_crc(crc));
            assert_eq!(image.page_crc(span).unwrap(), folded);
        }
    }

    #[test]
    fn test_summary() {
        let image = image_of(PAGE_SIZE * FRAME_SIZE + 16);
        let summary = image.summary();
        assert_eq!(summary.frames, PAGE_SIZE + 2);
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.final_page_frames, 2);
        assert_eq!(summary.page_crcs.len(), 2);
        assert_eq!(
            summary.page_crcs[1],
            crc16_ccitt_zero(&image.as_bytes()[PAGE_SIZE * FRAME_SIZE..])
        );
        let per_page: Vec<u16> = image
            .pages()
            .map(|span| image.page_crc(span).unwrap())
            .collect();
        assert_eq!(summary.page_crcs, per_page);
    }

    #[test]
    fn test_page_crc_rejects_span_past_end() {
        let image = image_of(16);
        let span = PageSpan {
            first_frame: 0,
            frame_count: 3,
        };
        assert!(matches!(
            image.page_crc(span),
            Err(Error::OutOfRange { index: 2, total: 2 })
        ));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("caniap-image-{}.bin", std::process::id()));
        fs::write(&path, [0x11u8; 32]).unwrap();
        let image = FirmwareImage::from_file(&path, AlignmentPolicy::Reject).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(image.total_frames(), 4);
    }
}
