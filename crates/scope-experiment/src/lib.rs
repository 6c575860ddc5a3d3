//! Acquisition orchestration for enderscope.
//!
//! - [`plan`]: what to image (positions, timelapse, mosaic, z-stack, channels)
//! - [`mosaic`]: serpentine raster over a mosaic grid
//! - [`naming`]: output file names
//! - [`autofocus`]: coarse-to-fine focus search
//! - [`capture`]: exclusive camera ownership
//! - [`preview`]: live preview loop
//! - [`orchestrator`]: [`AcquisitionEngine`], which runs plans and z-stacks

pub mod autofocus;
pub mod capture;
pub mod mosaic;
pub mod naming;
pub mod orchestrator;
pub mod plan;
pub mod preview;

pub use autofocus::{autofocus, AutofocusSettings, FocusResult, FocusSample};
pub use capture::{CaptureArbiter, CaptureLease, CaptureOwner};
pub use mosaic::{MosaicCell, MosaicRaster};
pub use naming::{zstack_slice_path, ImageName};
pub use orchestrator::{
    AcquisitionEngine, AcquisitionEvent, AcquisitionReport, AcquisitionTiming, CellVisit,
    EngineState, Microscope,
};
pub use plan::{
    AcquisitionPlan, ChannelSettings, MosaicSettings, SavedPosition, Timelapse, ZStackSettings,
};
pub use preview::{start_preview, PreviewConfig, PreviewFrame, PreviewHandle};
