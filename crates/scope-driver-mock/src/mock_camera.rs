//! Mock camera producing synthetic checkerboard frames.
//!
//! Without a focus model every capture is a full-contrast checkerboard. With a
//! [`FocusModel`] the camera samples a z probe (usually the simulated
//! firmware's true position) at capture time and maps it through a contrast
//! profile, so autofocus searches see a deterministic score landscape.

use crate::common::MockMode;
use crate::pattern::checkerboard;
use async_trait::async_trait;
use parking_lot::Mutex;
use scope_core::{Camera, RgbFrame, ScopeError, ScopeResult};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reads the current focus-axis position in millimeters.
pub type ZProbe = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Maps a z position to checkerboard contrast in `[0, 1]`.
pub type ContrastProfile = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Couples image contrast to a z position.
#[derive(Clone)]
pub struct FocusModel {
    probe: ZProbe,
    profile: ContrastProfile,
}

impl FocusModel {
    /// Build from a probe and a contrast profile.
    pub fn new(
        probe: impl Fn() -> f64 + Send + Sync + 'static,
        profile: impl Fn(f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            probe: Arc::new(probe),
            profile: Arc::new(profile),
        }
    }

    /// Contrast falls off linearly with distance from `z_min`, reaching zero
    /// at `z_min` and full contrast `falloff` millimeters away.
    pub fn valley(probe: impl Fn() -> f64 + Send + Sync + 'static, z_min: f64, falloff: f64) -> Self {
        Self::new(probe, move |z| ((z - z_min).abs() / falloff).min(1.0))
    }

    fn contrast(&self) -> f64 {
        (self.profile)((self.probe)())
    }
}

impl std::fmt::Debug for FocusModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusModel").finish_non_exhaustive()
    }
}

/// Builder for [`MockCamera`].
#[derive(Debug, Clone)]
pub struct MockCameraBuilder {
    width: u32,
    height: u32,
    exposure_us: u32,
    gain: f64,
    mode: MockMode,
    focus: Option<FocusModel>,
    fail_at_capture: Option<u64>,
}

impl MockCameraBuilder {
    /// Start from a resolution.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            exposure_us: 100_000,
            gain: 1.0,
            mode: MockMode::Instant,
            focus: None,
            fail_at_capture: None,
        }
    }

    /// Initial exposure in microseconds.
    pub fn exposure_us(mut self, exposure_us: u32) -> Self {
        self.exposure_us = exposure_us;
        self
    }

    /// Initial analogue gain.
    pub fn gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    /// Set operational mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Couple contrast to a z position.
    pub fn focus_model(mut self, model: FocusModel) -> Self {
        self.focus = Some(model);
        self
    }

    /// Make the `n`-th capture (1-based) fail with a hardware error.
    pub fn fail_at_capture(mut self, n: u64) -> Self {
        self.fail_at_capture = Some(n);
        self
    }

    /// Build the camera.
    pub fn build(self) -> MockCamera {
        MockCamera {
            width: self.width,
            height: self.height,
            exposure_us: AtomicU32::new(self.exposure_us),
            gain: Mutex::new(self.gain),
            mode: self.mode,
            focus: self.focus,
            fail_at_capture: self.fail_at_capture,
            captures: AtomicU64::new(0),
        }
    }
}

/// Simulated still camera.
#[derive(Debug)]
pub struct MockCamera {
    width: u32,
    height: u32,
    exposure_us: AtomicU32,
    gain: Mutex<f64>,
    mode: MockMode,
    focus: Option<FocusModel>,
    fail_at_capture: Option<u64>,
    captures: AtomicU64,
}

impl MockCamera {
    /// Instant-mode camera with the given resolution.
    pub fn new(width: u32, height: u32) -> Self {
        MockCameraBuilder::new(width, height).build()
    }

    /// Create builder for advanced configuration.
    pub fn builder(width: u32, height: u32) -> MockCameraBuilder {
        MockCameraBuilder::new(width, height)
    }

    /// Number of capture attempts so far.
    pub fn capture_count(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn set_controls(&self, exposure_us: Option<u32>, gain: Option<f64>) -> ScopeResult<()> {
        if let Some(gain) = gain {
            if !gain.is_finite() || gain <= 0.0 {
                return Err(ScopeError::InvalidInput(format!(
                    "gain must be positive, got {gain}"
                )));
            }
            *self.gain.lock() = gain;
        }
        if let Some(exposure_us) = exposure_us {
            if exposure_us == 0 {
                return Err(ScopeError::InvalidInput(
                    "exposure must be at least 1 µs".to_string(),
                ));
            }
            self.exposure_us.store(exposure_us, Ordering::SeqCst);
        }
        Ok(())
    }

    fn exposure_us(&self) -> u32 {
        self.exposure_us.load(Ordering::SeqCst)
    }

    fn gain(&self) -> f64 {
        *self.gain.lock()
    }

    async fn capture(&self) -> ScopeResult<RgbFrame> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at_capture == Some(n) {
            return Err(ScopeError::Hardware(format!(
                "mock camera failure on capture {n}"
            )));
        }

        if self.mode.simulates_exposure() {
            tokio::time::sleep(Duration::from_micros(u64::from(self.exposure_us()))).await;
        }

        let contrast = self.focus.as_ref().map_or(1.0, FocusModel::contrast);
        Ok(checkerboard(self.width, self.height, contrast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[tokio::test]
    async fn controls_are_read_back() {
        let camera = MockCamera::new(8, 8);
        camera.set_controls(Some(250_000), Some(2.5)).await.unwrap();
        assert_eq!(camera.exposure_us(), 250_000);
        assert_eq!(camera.gain(), 2.5);

        camera.set_controls(None, Some(1.0)).await.unwrap();
        assert_eq!(camera.exposure_us(), 250_000);
        assert!(camera.set_controls(Some(0), None).await.is_err());
    }

    #[tokio::test]
    async fn focus_model_shapes_the_score() {
        let z = Arc::new(AtomicU64::new(0f64.to_bits()));
        let probe_z = z.clone();
        let camera = MockCamera::builder(32, 32)
            .focus_model(FocusModel::valley(
                move || f64::from_bits(probe_z.load(Ordering::SeqCst)),
                1.0,
                0.5,
            ))
            .build();

        z.store(1.0f64.to_bits(), Ordering::SeqCst);
        let at_min = camera.focus_score().await.unwrap();
        z.store(1.2f64.to_bits(), Ordering::SeqCst);
        let off_min = camera.focus_score().await.unwrap();

        assert_eq!(at_min, 0.0);
        assert!(off_min > at_min);
        assert_eq!(camera.capture_count(), 2);
    }

    #[tokio::test]
    async fn injected_failure_hits_requested_capture() {
        let camera = MockCamera::builder(4, 4).fail_at_capture(2).build();
        assert!(camera.capture().await.is_ok());
        assert!(matches!(
            camera.capture().await,
            Err(ScopeError::Hardware(_))
        ));
        assert!(camera.capture().await.is_ok());
    }
}
