//! Synthetic frames for the mock camera.

use scope_core::RgbFrame;

/// Checker cell edge in pixels.
const CELL: u32 = 4;

/// Mid-grey level the pattern oscillates around.
const MID: i32 = 128;

/// Checkerboard whose contrast is `contrast` in `[0, 1]`.
///
/// Every pixel is grey (`r == g == b`). The Laplacian variance of the green
/// channel grows with the square of the contrast, so a contrast profile over z
/// doubles as a focus-score profile.
pub fn checkerboard(width: u32, height: u32, contrast: f64) -> RgbFrame {
    let amplitude = (127.0 * contrast.clamp(0.0, 1.0)).round() as i32;
    let mut data = Vec::with_capacity(width as usize * height as usize * 3);

    for y in 0..height {
        for x in 0..width {
            let light = ((x / CELL) + (y / CELL)) % 2 == 0;
            let level = if light { MID + amplitude } else { MID - amplitude };
            let v = level.clamp(0, 255) as u8;
            data.extend_from_slice(&[v, v, v]);
        }
    }

    RgbFrame {
        width,
        height,
        data,
    }
}
