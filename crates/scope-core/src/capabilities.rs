//! Capability traits for the microscope's device set.
//!
//! The engines in `scope-experiment` only see these traits, never concrete
//! drivers:
//!
//! - a G-code stage implements [`Stage`]
//! - a camera implements [`Camera`]
//! - each illumination zone implements [`Illuminator`]
//! - an addressable LED strip backend implements [`PixelStrip`]
//!
//! Stage and camera traits are async (stage calls block until the firmware
//! acknowledges, captures take an exposure cycle). Light traits are
//! synchronous: a zone mutation is a buffer rewrite plus one strip push.

use crate::data::{Position, Rgb, RgbFrame};
use crate::error::ScopeResult;
use crate::focus::focus_score;
use async_trait::async_trait;

/// Capability: three-axis motion with position tracking.
///
/// # Contract
/// - Motion calls return once the device acknowledged the command.
/// - `tracked_position` is the optimistic local estimate and never touches
///   the device.
/// - `query_position` asks the device and does not modify the estimate;
///   `reconcile` asks the device and overwrites the estimate.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Move by `(dx, dy, dz)`; `dz = None` leaves z out of the command.
    async fn move_relative(&self, dx: f64, dy: f64, dz: Option<f64>) -> ScopeResult<()>;

    /// Move to `(x, y, z)`; `z = None` keeps the current z.
    async fn move_absolute(&self, x: f64, y: f64, z: Option<f64>) -> ScopeResult<()>;

    /// Home all axes; the tracked position becomes the origin.
    async fn home(&self) -> ScopeResult<()>;

    /// Device-reported position.
    async fn query_position(&self) -> ScopeResult<Position>;

    /// Locally tracked position estimate.
    async fn tracked_position(&self) -> Position;

    /// Replace the local estimate with the device-reported position.
    async fn reconcile(&self) -> ScopeResult<Position>;

    /// Move to a full position in absolute coordinates.
    async fn move_to(&self, position: Position) -> ScopeResult<()> {
        self.move_absolute(position.x, position.y, Some(position.z))
            .await
    }
}

/// Capability: still capture with exposure and gain control.
///
/// # Contract
/// - Exposure is in microseconds, gain is analogue gain (unitless).
/// - `capture` returns a full RGB frame; writing it to disk is the caller's
///   concern (see `scope-storage`).
#[async_trait]
pub trait Camera: Send + Sync {
    /// Update exposure and/or gain; `None` leaves a control unchanged.
    async fn set_controls(&self, exposure_us: Option<u32>, gain: Option<f64>) -> ScopeResult<()>;

    /// Current exposure in microseconds.
    fn exposure_us(&self) -> u32;

    /// Current analogue gain.
    fn gain(&self) -> f64;

    /// Capture one frame.
    async fn capture(&self) -> ScopeResult<RgbFrame>;

    /// Capture a frame and score its sharpness (green-channel Laplacian variance).
    async fn focus_score(&self) -> ScopeResult<f64> {
        let frame = self.capture().await?;
        Ok(focus_score(&frame))
    }
}

/// Capability: one switchable, dimmable light.
pub trait Illuminator: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Whether the light is currently on.
    fn is_on(&self) -> bool;

    /// Flip the on/off state; returns the new state.
    fn toggle(&self) -> ScopeResult<bool>;

    /// Set intensity in `[0, 1]`.
    fn set_intensity(&self, intensity: f64) -> ScopeResult<()>;

    /// Set the base color.
    fn set_rgb_color(&self, color: Rgb) -> ScopeResult<()>;

    /// Drive the light to a known state; toggles only when needed.
    fn set_on(&self, on: bool) -> ScopeResult<()> {
        if self.is_on() != on {
            self.toggle()?;
        }
        Ok(())
    }
}

/// Output backend for an addressable LED strip.
///
/// `show` receives the complete pixel buffer every time; implementations
/// latch it to the hardware in one transfer.
pub trait PixelStrip: Send {
    /// Latch the full buffer to the strip.
    fn show(&mut self, pixels: &[Rgb]) -> ScopeResult<()>;
}
