//! Image file export for captured frames.
//!
//! The container format follows the file extension:
//!
//! | Extension | Format |
//! |---|---|
//! | `.tif`, `.tiff` | TIFF, RGB 8-bit |
//! | `.png` | PNG, RGB 8-bit |
//! | `.jpg`, `.jpeg` | JPEG, quality [`JPEG_QUALITY`] |
//!
//! Parent directories are created on demand.
//!
//! # Usage
//!
//! ```rust,ignore
//! use scope_storage::ImageWriter;
//!
//! let frame = camera.capture().await?;
//! ImageWriter::write_frame(&frame, "run/sample_0h00_GFP_exp-0.1s_gain1_mosa_x0_y0.tif")?;
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::{ExtendedColorType, ImageEncoder};
use scope_core::{RgbFrame, ScopeError, ScopeResult};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// JPEG quality used for snapshot files.
pub const JPEG_QUALITY: u8 = 95;

/// Output container selected from a path's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Tagged Image File Format
    Tiff,
    /// Portable Network Graphics
    Png,
    /// JPEG (lossy)
    Jpeg,
}

impl ImageFormat {
    /// Pick the format for `path`, case-insensitively.
    pub fn from_path(path: &Path) -> ScopeResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "tif" | "tiff" => Ok(Self::Tiff),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            _ => Err(ScopeError::Image(format!(
                "unsupported image extension for {}",
                path.display()
            ))),
        }
    }
}

/// Frame-to-file export.
pub struct ImageWriter;

impl ImageWriter {
    /// Write `frame` to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The extension is not a supported format
    /// - Frame dimensions don't match data size
    /// - The directory or file cannot be created
    /// - Encoding fails
    pub fn write_frame<P: AsRef<Path>>(frame: &RgbFrame, path: P) -> ScopeResult<PathBuf> {
        let path = path.as_ref();
        let format = ImageFormat::from_path(path)?;

        let expected = frame.pixel_count() * 3;
        if frame.data.len() != expected {
            return Err(ScopeError::Image(format!(
                "frame data size mismatch: expected {expected} bytes for {}x{} RGB, got {}",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        let (w, h) = (frame.width, frame.height);
        let encoded = match format {
            ImageFormat::Tiff => {
                TiffEncoder::new(writer).encode(&frame.data, w, h, ExtendedColorType::Rgb8)
            }
            ImageFormat::Png => {
                PngEncoder::new(writer).write_image(&frame.data, w, h, ExtendedColorType::Rgb8)
            }
            ImageFormat::Jpeg => JpegEncoder::new_with_quality(writer, JPEG_QUALITY).encode(
                &frame.data,
                w,
                h,
                ExtendedColorType::Rgb8,
            ),
        };
        encoded.map_err(|e| {
            ScopeError::Image(format!("failed to encode {}: {e}", path.display()))
        })?;

        tracing::debug!(
            path = ?path,
            ?format,
            dimensions = format!("{w}x{h}"),
            "Wrote image"
        );
        Ok(path.to_path_buf())
    }

    /// [`write_frame`](Self::write_frame) on the blocking thread pool.
    pub async fn write_frame_async(frame: RgbFrame, path: PathBuf) -> ScopeResult<PathBuf> {
        tokio::task::spawn_blocking(move || Self::write_frame(&frame, path))
            .await
            .map_err(|e| ScopeError::Image(format!("image writer task failed: {e}")))?
    }
}
