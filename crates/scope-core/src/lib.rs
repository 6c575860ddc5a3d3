//! Core types and traits for enderscope.
//!
//! This crate is the shared vocabulary of the workspace:
//!
//! - [`error`]: the `ScopeError` taxonomy
//! - [`data`]: positions, coordinate modes, colors, frames
//! - [`capabilities`]: `Stage`, `Camera`, `Illuminator`, `PixelStrip`
//! - [`focus`]: the Laplacian-variance sharpness metric
//! - [`serial`]: serial port aliases and buffer draining
//! - [`signal`]: cooperative stop signal

pub mod capabilities;
pub mod data;
pub mod error;
pub mod focus;
pub mod serial;
pub mod signal;

pub use capabilities::{Camera, Illuminator, PixelStrip, Stage};
pub use data::{parse_position_input, CoordinateMode, Position, Rgb, RgbFrame};
pub use error::{ScopeError, ScopeResult};
pub use signal::StopSignal;
