//! Firmware image handling.

pub mod firmware;

pub use firmware::{
    AlignmentPolicy, FRAME_SIZE, FirmwareImage, Frame, FramePosition, ImageSummary, PAGE_SIZE,
    PageSpan, is_page_boundary,
};
