//! enderscope: a motorized microscope on 3D-printer motion hardware.
//!
//! The workspace crates do the work:
//!
//! - `scope-core`: errors, data model, capability traits
//! - `scope-driver-marlin`: G-code serial transport and stage controller
//! - `scope-driver-neopixel`: illumination zones on a shared LED buffer
//! - `scope-driver-mock`: simulated firmware, camera and LED strip
//! - `scope-storage`: image files and preview encoding
//! - `scope-experiment`: autofocus, acquisitions, preview, camera ownership
//!
//! This crate adds the application layer: layered configuration, tracing
//! setup and device assembly for the `enderscope` binary.

pub mod config;
pub mod hardware;
pub mod tracing_init;

pub use config::Settings;
pub use hardware::Hardware;

pub use scope_core as core;
pub use scope_experiment as experiment;
