//! The light bus: sole owner of the global pixel buffer.
//!
//! Several illumination zones share one physical strip. Each zone owns a
//! contiguous index range of a single buffer, and every zone mutation ends with
//! the *whole* buffer being latched to the strip. If two zones computed their
//! writes from separate copies of the buffer, one would overwrite the other's
//! last state, so all zone state and the buffer live behind one lock and
//! every mutation (range rewrite plus push) happens while holding it.

use crate::zone::LightZone;
use parking_lot::Mutex;
use scope_core::{PixelStrip, Rgb, ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for one illumination zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Name used in logs and on the CLI.
    pub name: String,
    /// First pixel index owned by the zone.
    pub start: usize,
    /// One past the last owned pixel index.
    pub end: usize,
    /// Strip length this zone was wired for; the buffer grows to the largest.
    pub total_pixels: usize,
    /// Base color before intensity scaling.
    #[serde(default = "default_color")]
    pub color: Rgb,
    /// Intensity in `[0, 1]`.
    #[serde(default = "default_intensity")]
    pub intensity: f64,
}

fn default_color() -> Rgb {
    Rgb::WHITE
}

fn default_intensity() -> f64 {
    1.0
}

impl ZoneConfig {
    /// White zone at full intensity over `start..end`.
    pub fn new(name: impl Into<String>, start: usize, end: usize, total_pixels: usize) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            total_pixels,
            color: default_color(),
            intensity: default_intensity(),
        }
    }

    /// Override the base color.
    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = color;
        self
    }

    /// Override the intensity.
    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = intensity;
        self
    }
}

pub(crate) fn check_intensity(intensity: f64) -> ScopeResult<()> {
    if !(0.0..=1.0).contains(&intensity) {
        return Err(ScopeError::InvalidInput(format!(
            "intensity must be within [0, 1], got {intensity}"
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct ZoneState {
    pub(crate) name: String,
    pub(crate) range: Range<usize>,
    pub(crate) on: bool,
    pub(crate) color: Rgb,
    pub(crate) intensity: f64,
}

impl ZoneState {
    fn lit_color(&self) -> Rgb {
        if self.on {
            self.color.scaled(self.intensity)
        } else {
            Rgb::OFF
        }
    }
}

pub(crate) struct BusState {
    buffer: Vec<Rgb>,
    pub(crate) zones: Vec<ZoneState>,
    strip: Box<dyn PixelStrip>,
}

impl BusState {
    /// Rewrite zone `id`'s range from its state and latch the full buffer.
    pub(crate) fn refresh(&mut self, id: usize) -> ScopeResult<()> {
        let zone = &self.zones[id];
        let color = zone.lit_color();
        let end = zone.range.end.min(self.buffer.len());
        let start = zone.range.start.min(end);
        self.buffer[start..end].fill(color);
        debug!(zone = %zone.name, ?color, start, end, "Zone range rewritten");
        self.strip.show(&self.buffer)
    }
}

/// Shared handle to the pixel buffer, its zones and the strip backend.
///
/// Cloning is cheap and shares the same bus.
#[derive(Clone)]
pub struct LightBus {
    pub(crate) state: Arc<Mutex<BusState>>,
}

impl LightBus {
    /// Empty bus driving `strip`.
    pub fn new(strip: impl PixelStrip + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                buffer: Vec::new(),
                zones: Vec::new(),
                strip: Box::new(strip),
            })),
        }
    }

    /// Register a zone and return its handle.
    ///
    /// The buffer grows (keeping existing contents) when `total_pixels`
    /// exceeds its current length. The zone starts off and nothing is pushed.
    pub fn add_zone(&self, config: &ZoneConfig) -> ScopeResult<LightZone> {
        if config.start >= config.end {
            return Err(ScopeError::InvalidInput(format!(
                "zone '{}' has an empty pixel range {}..{}",
                config.name, config.start, config.end
            )));
        }
        check_intensity(config.intensity)?;

        let mut state = self.state.lock();
        if state.zones.iter().any(|z| z.name == config.name) {
            return Err(ScopeError::InvalidInput(format!(
                "zone '{}' already exists",
                config.name
            )));
        }
        if state.buffer.len() < config.total_pixels {
            state.buffer.resize(config.total_pixels, Rgb::OFF);
        }

        let id = state.zones.len();
        state.zones.push(ZoneState {
            name: config.name.clone(),
            range: config.start..config.end,
            on: false,
            color: config.color,
            intensity: config.intensity,
        });
        info!(
            zone = %config.name,
            start = config.start,
            end = config.end,
            buffer = state.buffer.len(),
            "Light zone registered"
        );

        Ok(LightZone::new(self.clone(), id, config.name.clone()))
    }

    /// Handle for an already registered zone.
    pub fn zone(&self, name: &str) -> Option<LightZone> {
        let state = self.state.lock();
        state
            .zones
            .iter()
            .position(|z| z.name == name)
            .map(|id| LightZone::new(self.clone(), id, name.to_string()))
    }

    /// Names of all registered zones, in registration order.
    pub fn zone_names(&self) -> Vec<String> {
        self.state.lock().zones.iter().map(|z| z.name.clone()).collect()
    }

    /// Snapshot of the buffer.
    pub fn buffer(&self) -> Vec<Rgb> {
        self.state.lock().buffer.clone()
    }
}

impl std::fmt::Debug for LightBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LightBus")
            .field("pixels", &state.buffer.len())
            .field("zones", &state.zones)
            .finish_non_exhaustive()
    }
}
