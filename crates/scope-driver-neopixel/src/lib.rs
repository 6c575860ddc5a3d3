//! Illumination zones on an addressable (NeoPixel-style) LED strip.
//!
//! The microscope has a brightfield ring and a fluorescence excitation ring
//! wired as two ranges of one strip. [`LightBus`] owns the strip and the
//! global pixel buffer; [`LightZone`] handles implement
//! [`scope_core::Illuminator`] for each range.
//!
//! ```rust,ignore
//! let bus = LightBus::new(strip);
//! let bf = bus.add_zone(&ZoneConfig::new("brightfield", 0, 12, 24))?;
//! let gfp = bus.add_zone(&ZoneConfig::new("fluorescence", 12, 24, 24).with_color(Rgb::BLUE))?;
//! bf.set_on(true)?;
//! ```

mod bus;
mod zone;

pub use bus::{LightBus, ZoneConfig};
pub use zone::LightZone;
