//! Plain data types: stage positions, coordinate modes, colors and frames.

use crate::error::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage position in millimeters.
///
/// The same type carries both the locally tracked estimate and the
/// device-reported position; which one a value is depends on where it came
/// from (see `GcodeStage::tracked_position` vs `GcodeStage::query_position`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X axis (mm)
    pub x: f64,
    /// Y axis (mm)
    pub y: f64,
    /// Z axis (mm)
    pub z: f64,
}

impl Position {
    /// Origin after homing.
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Create a position from its three coordinates.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Add a relative move; `dz = None` leaves z untouched.
    #[must_use]
    pub fn offset(self, dx: f64, dy: f64, dz: Option<f64>) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz.unwrap_or(0.0),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(X={}, Y={}, Z={})", self.x, self.y, self.z)
    }
}

/// Parse a manually entered position.
///
/// Any field that is not a finite number rejects the whole entry with
/// `ScopeError::InvalidInput`; callers must not move the stage in that case.
pub fn parse_position_input(x: &str, y: &str, z: &str) -> ScopeResult<Position> {
    fn field(name: &str, raw: &str) -> ScopeResult<f64> {
        let value: f64 = raw.trim().parse().map_err(|_| {
            ScopeError::InvalidInput(format!("{name} = '{raw}' is not a numeric value"))
        })?;
        if !value.is_finite() {
            return Err(ScopeError::InvalidInput(format!(
                "{name} = '{raw}' is not finite"
            )));
        }
        Ok(value)
    }

    Ok(Position::new(field("X", x)?, field("Y", y)?, field("Z", z)?))
}

/// G-code positioning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateMode {
    /// `G90`: targets are absolute machine coordinates
    Absolute,
    /// `G91`: targets are offsets from the current position
    Relative,
}

impl CoordinateMode {
    /// G-code that selects this mode.
    #[must_use]
    pub fn gcode(self) -> &'static str {
        match self {
            CoordinateMode::Absolute => "G90",
            CoordinateMode::Relative => "G91",
        }
    }
}

impl fmt::Display for CoordinateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateMode::Absolute => write!(f, "absolute"),
            CoordinateMode::Relative => write!(f, "relative"),
        }
    }
}

/// 8-bit RGB triple as sent to an addressable LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Rgb {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
}

impl Rgb {
    /// All channels off.
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    /// Full white.
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    /// Full blue, the fluorescence excitation color.
    pub const BLUE: Rgb = Rgb::new(0, 0, 255);

    /// Create a color from its channels.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale every channel by `intensity`, truncating toward zero and
    /// clamping to `[0, 255]`.
    #[must_use]
    pub fn scaled(self, intensity: f64) -> Self {
        let scale = |c: u8| -> u8 { (f64::from(c) * intensity).trunc().clamp(0.0, 255.0) as u8 };
        Self {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
        }
    }
}

/// Interleaved RGB888 image as delivered by the camera.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// `width * height * 3` bytes, row-major, RGB order
    pub data: Vec<u8>,
}

impl RgbFrame {
    /// Build a frame, checking the buffer length.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> ScopeResult<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(ScopeError::Image(format!(
                "frame data size mismatch: expected {expected} bytes for {width}x{height} RGB, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Number of pixels.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Extract one channel (0 = red, 1 = green, 2 = blue).
    #[must_use]
    pub fn channel(&self, index: usize) -> Vec<u8> {
        self.data.chunks_exact(3).map(|px| px[index]).collect()
    }

    /// The green channel, used for focus scoring.
    #[must_use]
    pub fn green(&self) -> Vec<u8> {
        self.channel(1)
    }

    /// ITU-R 601-2 luma, the same conversion PIL uses for mode `L`.
    #[must_use]
    pub fn luma(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| {
                let l = (u32::from(px[0]) * 299 + u32::from(px[1]) * 587 + u32::from(px[2]) * 114)
                    / 1000;
                l as u8
            })
            .collect()
    }
}
