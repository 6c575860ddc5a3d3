//! Preview frame encoding: luma, linear min/max stretch, JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use scope_core::{RgbFrame, ScopeError, ScopeResult};

/// 8-bit grayscale image.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// One byte per pixel, row-major
    pub data: Vec<u8>,
}

/// Convert to luma and stretch `[min, max]` linearly onto `[0, 255]`.
///
/// A flat image (min == max) maps to all zeros.
pub fn stretch_to_gray(frame: &RgbFrame) -> GrayFrame {
    let luma = frame.luma();
    let min = luma.iter().copied().min().unwrap_or(0);
    let max = luma.iter().copied().max().unwrap_or(0);
    let span = f64::from(max - min);

    let data = if span == 0.0 {
        vec![0; luma.len()]
    } else {
        let scale = 255.0 / span;
        luma.iter()
            .map(|&v| (f64::from(v - min) * scale) as u8)
            .collect()
    };

    GrayFrame {
        width: frame.width,
        height: frame.height,
        data,
    }
}

/// Encode a grayscale frame as JPEG.
pub fn encode_jpeg(frame: &GrayFrame, quality: u8) -> ScopeResult<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&frame.data, frame.width, frame.height, ExtendedColorType::L8)
        .map_err(|e| ScopeError::Image(format!("preview JPEG encoding failed: {e}")))?;
    Ok(out)
}
