//! Marlin G-code driver for enderscope.
//!
//! A consumer 3D printer's motion system (Marlin firmware over USB serial)
//! serves as the microscope's XYZ stage.
//!
//! - [`transport`]: line-oriented request/response with bounded waits
//! - [`response`]: strict `M114` report tokenizer
//! - [`stage`]: [`GcodeStage`], the `Stage` implementation
//!
//! # Usage
//!
//! ```rust,ignore
//! use scope_driver_marlin::{GcodeStage, GcodeTransport, StageConfig};
//! use scope_core::Stage;
//!
//! let transport = GcodeTransport::open("/dev/ttyUSB0", 115200, Duration::from_secs(5)).await?;
//! let stage = GcodeStage::connect(transport, StageConfig::default()).await?;
//! stage.move_relative(1.0, 0.0, None).await?;
//! let here = stage.reconcile().await?;
//! ```

pub mod response;
pub mod stage;
pub mod transport;

pub use response::{parse_position_report, AxisReport};
pub use stage::{GcodeStage, JogDirection, StageConfig};
pub use transport::GcodeTransport;
