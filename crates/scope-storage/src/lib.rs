//! Image output for enderscope.
//!
//! - [`writer`]: captured frames to TIFF/PNG/JPEG files
//! - [`preview`]: grayscale stretch and JPEG encoding for live preview

pub mod preview;
pub mod writer;

pub use preview::{encode_jpeg, stretch_to_gray, GrayFrame};
pub use writer::{ImageFormat, ImageWriter};
