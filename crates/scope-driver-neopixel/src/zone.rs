//! Zone handles implementing [`Illuminator`].

use crate::bus::{check_intensity, LightBus};
use scope_core::{Illuminator, Rgb, ScopeResult};
use std::ops::Range;
use tracing::info;

/// A named view onto one index range of the light bus.
///
/// Every mutation goes through the bus lock: the zone's stored state is
/// updated, its range is rewritten when it is on, and the whole buffer is
/// latched to the strip before the lock is released.
#[derive(Clone, Debug)]
pub struct LightZone {
    bus: LightBus,
    id: usize,
    name: String,
}

impl LightZone {
    pub(crate) fn new(bus: LightBus, id: usize, name: String) -> Self {
        Self { bus, id, name }
    }

    /// Current base color.
    pub fn color(&self) -> Rgb {
        self.bus.state.lock().zones[self.id].color
    }

    /// Current intensity.
    pub fn intensity(&self) -> f64 {
        self.bus.state.lock().zones[self.id].intensity
    }

    /// Owned pixel range.
    pub fn range(&self) -> Range<usize> {
        self.bus.state.lock().zones[self.id].range.clone()
    }
}

impl Illuminator for LightZone {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_on(&self) -> bool {
        self.bus.state.lock().zones[self.id].on
    }

    fn toggle(&self) -> ScopeResult<bool> {
        let mut state = self.bus.state.lock();
        let on = !state.zones[self.id].on;
        state.zones[self.id].on = on;
        state.refresh(self.id)?;
        info!(zone = %self.name, on, "Light toggled");
        Ok(on)
    }

    fn set_intensity(&self, intensity: f64) -> ScopeResult<()> {
        check_intensity(intensity)?;
        let mut state = self.bus.state.lock();
        state.zones[self.id].intensity = intensity;
        if state.zones[self.id].on {
            state.refresh(self.id)?;
        }
        Ok(())
    }

    fn set_rgb_color(&self, color: Rgb) -> ScopeResult<()> {
        let mut state = self.bus.state.lock();
        state.zones[self.id].color = color;
        if state.zones[self.id].on {
            state.refresh(self.id)?;
        }
        Ok(())
    }

    fn set_on(&self, on: bool) -> ScopeResult<()> {
        let mut state = self.bus.state.lock();
        if state.zones[self.id].on == on {
            return Ok(());
        }
        state.zones[self.id].on = on;
        state.refresh(self.id)?;
        info!(zone = %self.name, on, "Light switched");
        Ok(())
    }
}
