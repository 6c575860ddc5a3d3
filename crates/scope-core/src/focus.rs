//! Image sharpness metric used by autofocus.
//!
//! The score is the population variance of the absolute 4-neighbour
//! Laplacian of a single 8-bit channel. Borders replicate the edge pixel,
//! which for a 3x3 kernel is identical to symmetric reflection.

use crate::data::RgbFrame;

/// Laplacian-variance score of the frame's green channel.
#[must_use]
pub fn focus_score(frame: &RgbFrame) -> f64 {
    laplacian_variance(frame.width as usize, frame.height as usize, &frame.green())
}

/// Variance of `|∇²I|` over a `width x height` single-channel image.
///
/// Returns 0.0 for an empty image.
#[must_use]
pub fn laplacian_variance(width: usize, height: usize, pixels: &[u8]) -> f64 {
    let n = width * height;
    if n == 0 || pixels.len() < n {
        return 0.0;
    }

    let at = |x: isize, y: isize| -> f64 {
        let cx = x.clamp(0, width as isize - 1) as usize;
        let cy = y.clamp(0, height as isize - 1) as usize;
        f64::from(pixels[cy * width + cx])
    };

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 0..height as isize {
        for x in 0..width as isize {
            let lap = at(x, y - 1) + at(x - 1, y) + at(x + 1, y) + at(x, y + 1) - 4.0 * at(x, y);
            let v = lap.abs();
            sum += v;
            sum_sq += v * v;
        }
    }

    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).max(0.0)
}
