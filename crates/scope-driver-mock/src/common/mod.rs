//! Common infrastructure for mock devices.
//!
//! - **mode**: operational modes (Instant, Realistic)

pub mod mode;

pub use mode::MockMode;
