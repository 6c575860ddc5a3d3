//! Configuration management for enderscope.
//!
//! Settings are layered with figment:
//!
//! 1. Built-in defaults (`Settings::default()`, exposed as a figment provider)
//! 2. A TOML file (`config/enderscope.toml` unless another path is given)
//! 3. Environment variables prefixed with `ENDERSCOPE_`, nested keys joined
//!    with `__` (e.g. `ENDERSCOPE_SERIAL__PORT=/dev/ttyACM0`)
//!
//! ## Schema
//!
//! - **`log_level`**, **`log_format`**: tracing verbosity and output format
//! - **`serial`**: port path, baud rate and response timeouts for the stage
//! - **`stage`**: mode resend policy and jog step sizes
//! - **`camera`**: resolution, exposure and gain of the camera
//! - **`lights`**: strip length plus the brightfield and fluorescence zones
//! - **`autofocus`**: coarse/fine search parameters
//! - **`timing`**: settle delays used by acquisitions
//! - **`preview`**: live preview poll interval and JPEG quality
//!
//! `Settings::validate` runs after extraction and rejects values the drivers
//! would refuse later (zones outside the strip, intensities outside `[0, 1]`).

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Provider};
use scope_core::{Rgb, ScopeError, ScopeResult};
use scope_driver_marlin::StageConfig;
use scope_driver_neopixel::ZoneConfig;
use scope_experiment::{AcquisitionTiming, AutofocusSettings, PreviewConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/enderscope.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ENDERSCOPE_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging verbosity: "error", "warn", "info", "debug" or "trace".
    pub log_level: String,
    /// Log output format: "pretty", "compact" or "json".
    pub log_format: String,
    /// Serial link to the motion controller.
    pub serial: SerialSettings,
    /// Stage behavior.
    pub stage: StageSettings,
    /// Camera settings.
    pub camera: CameraSettings,
    /// LED strip layout.
    pub lights: LightSettings,
    /// Autofocus search parameters.
    pub autofocus: AutofocusSettings,
    /// Acquisition settle delays.
    pub timing: AcquisitionTiming,
    /// Live preview.
    pub preview: PreviewConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            serial: SerialSettings::default(),
            stage: StageSettings::default(),
            camera: CameraSettings::default(),
            lights: LightSettings::default(),
            autofocus: AutofocusSettings::default(),
            timing: AcquisitionTiming::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl Provider for Settings {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("Library Defaults")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        Serialized::defaults(self).data()
    }
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Wait for a response line to an ordinary command, in milliseconds.
    pub timeout_ms: u64,
    /// Wait for homing, `M400` and bed heating, in milliseconds.
    pub long_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 5_000,
            long_timeout_ms: 120_000,
        }
    }
}

impl SerialSettings {
    /// Ordinary response timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Resend `G90`/`G91` before every move.
    pub always_resend_mode: bool,
    /// Jog step in X and Y, millimeters.
    pub xy_step_mm: f64,
    /// Jog step in Z, millimeters.
    pub z_step_mm: f64,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            always_resend_mode: false,
            xy_step_mm: 1.0,
            z_step_mm: 0.1,
        }
    }
}

/// Camera settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Exposure in microseconds.
    pub exposure_us: u32,
    /// Analogue gain.
    pub gain: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            exposure_us: 100_000,
            gain: 1.0,
        }
    }
}

/// One illumination zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSettings {
    /// First pixel index.
    pub start: usize,
    /// One past the last pixel index.
    pub end: usize,
    /// Base color.
    #[serde(default = "default_zone_color")]
    pub color: Rgb,
    /// Intensity in `[0, 1]`.
    #[serde(default = "default_zone_intensity")]
    pub intensity: f64,
}

fn default_zone_color() -> Rgb {
    Rgb::WHITE
}

fn default_zone_intensity() -> f64 {
    1.0
}

/// LED strip layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightSettings {
    /// Pixels on the strip.
    pub total_pixels: usize,
    /// Transmitted-light zone.
    pub brightfield: ZoneSettings,
    /// Excitation zone.
    pub fluorescence: ZoneSettings,
}

impl Default for LightSettings {
    fn default() -> Self {
        Self {
            total_pixels: 16,
            brightfield: ZoneSettings {
                start: 0,
                end: 8,
                color: Rgb::WHITE,
                intensity: 1.0,
            },
            fluorescence: ZoneSettings {
                start: 8,
                end: 16,
                color: Rgb::BLUE,
                intensity: 1.0,
            },
        }
    }
}

impl LightSettings {
    /// Zone configuration for the light bus.
    pub fn zone_config(&self, name: &str, zone: &ZoneSettings) -> ZoneConfig {
        ZoneConfig::new(name, zone.start, zone.end, self.total_pixels)
            .with_color(zone.color)
            .with_intensity(zone.intensity)
    }
}

impl Settings {
    /// Load from the default file location plus environment.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load defaults, then `config_path` (or the default path) if it exists,
    /// then `ENDERSCOPE_` environment variables; validate the result.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Settings::default());

        let file_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        if file_path.exists() {
            figment = figment.merge(Toml::file(&file_path));
        } else if config_path.is_some() {
            anyhow::bail!("Config file not found: {}", file_path.display());
        } else {
            tracing::debug!(path = %file_path.display(), "No config file, using defaults");
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let settings: Settings = figment
            .extract()
            .context("Failed to extract configuration from Figment")?;
        settings
            .validate()
            .context("Configuration validation failed")?;
        Ok(settings)
    }

    /// Stage controller configuration derived from these settings.
    pub fn stage_config(&self) -> StageConfig {
        StageConfig {
            always_resend_mode: self.stage.always_resend_mode,
            long_timeout: Duration::from_millis(self.serial.long_timeout_ms),
        }
    }

    /// Check values the drivers would reject later.
    pub fn validate(&self) -> ScopeResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(config_error(format!(
                "invalid log_level '{}', must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }
        if !VALID_LOG_FORMATS.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(config_error(format!(
                "invalid log_format '{}', must be one of: {}",
                self.log_format,
                VALID_LOG_FORMATS.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(config_error("serial.port must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(config_error("serial.baud_rate must be positive"));
        }
        validate_range(self.serial.timeout_ms, 100, 60_000, "serial.timeout_ms")?;
        validate_range(
            self.serial.long_timeout_ms,
            self.serial.timeout_ms,
            3_600_000,
            "serial.long_timeout_ms",
        )?;

        for (name, step) in [
            ("stage.xy_step_mm", self.stage.xy_step_mm),
            ("stage.z_step_mm", self.stage.z_step_mm),
        ] {
            if !step.is_finite() || step <= 0.0 {
                return Err(config_error(format!("{name} must be positive, got {step}")));
            }
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(config_error("camera resolution must be non-zero"));
        }
        if self.camera.exposure_us == 0 {
            return Err(config_error("camera.exposure_us must be at least 1"));
        }
        if !self.camera.gain.is_finite() || self.camera.gain <= 0.0 {
            return Err(config_error(format!(
                "camera.gain must be positive, got {}",
                self.camera.gain
            )));
        }

        let lights = &self.lights;
        for (name, zone) in [
            ("brightfield", &lights.brightfield),
            ("fluorescence", &lights.fluorescence),
        ] {
            if zone.start >= zone.end || zone.end > lights.total_pixels {
                return Err(config_error(format!(
                    "lights.{name} range {}..{} must be non-empty and within {} pixels",
                    zone.start, zone.end, lights.total_pixels
                )));
            }
            if !(0.0..=1.0).contains(&zone.intensity) {
                return Err(config_error(format!(
                    "lights.{name}.intensity must be within [0, 1], got {}",
                    zone.intensity
                )));
            }
        }

        self.autofocus
            .validate()
            .map_err(|e| config_error(format!("autofocus: {e}")))?;

        if !(1..=100).contains(&self.preview.jpeg_quality) {
            return Err(config_error(format!(
                "preview.jpeg_quality must be 1-100, got {}",
                self.preview.jpeg_quality
            )));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> ScopeError {
    ScopeError::Configuration(message.into())
}

fn validate_range(value: u64, min: u64, max: u64, name: &str) -> ScopeResult<()> {
    if value < min || value > max {
        return Err(config_error(format!(
            "{name} = {value}ms is out of valid range ({min}ms - {max}ms)"
        )));
    }
    Ok(())
}
