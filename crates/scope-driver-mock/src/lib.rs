//! Mock hardware for enderscope.
//!
//! This crate provides simulated devices for testing and for `--simulate`
//! runs without physical hardware. All mocks use async-safe waits
//! (`tokio::time::sleep`, never `std::thread::sleep`).
//!
//! # Available Mocks
//!
//! - [`MockMarlin`] - simulated Marlin firmware on an in-memory serial link
//! - [`MockCamera`] - synthetic checkerboard camera with an optional focus model
//! - [`RecordingStrip`] - LED strip backend that records every buffer push
//!
//! # Example
//!
//! ```rust,ignore
//! let (marlin, link) = MockMarlin::spawn();
//! let transport = GcodeTransport::new(Box::new(link), Duration::from_secs(1));
//! let stage = GcodeStage::connect(transport, StageConfig::default()).await?;
//!
//! let probe = marlin.clone();
//! let camera = MockCamera::builder(64, 64)
//!     .focus_model(FocusModel::valley(move || probe.position().z, 0.2, 0.5))
//!     .build();
//! ```

pub mod common;
mod mock_camera;
mod mock_marlin;
mod pattern;
mod recording_strip;

pub use common::MockMode;
pub use mock_camera::{ContrastProfile, FocusModel, MockCamera, MockCameraBuilder, ZProbe};
pub use mock_marlin::{MarlinFault, MockMarlin, MockMarlinBuilder};
pub use pattern::checkerboard;
pub use recording_strip::RecordingStrip;
