//! LED strip backend that records every push instead of driving hardware.

use parking_lot::Mutex;
use scope_core::{PixelStrip, Rgb, ScopeResult};
use std::sync::Arc;

/// Recording [`PixelStrip`].
///
/// Clones share the same history, so a test can keep one clone while the
/// light bus owns the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingStrip {
    pushes: Arc<Mutex<Vec<Vec<Rgb>>>>,
}

impl RecordingStrip {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of full-buffer pushes so far.
    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    /// Most recent buffer, if anything was pushed.
    pub fn last(&self) -> Option<Vec<Rgb>> {
        self.pushes.lock().last().cloned()
    }

    /// Every pushed buffer in order.
    pub fn pushes(&self) -> Vec<Vec<Rgb>> {
        self.pushes.lock().clone()
    }
}

impl PixelStrip for RecordingStrip {
    fn show(&mut self, pixels: &[Rgb]) -> ScopeResult<()> {
        tracing::trace!(pixels = pixels.len(), "Strip latched");
        self.pushes.lock().push(pixels.to_vec());
        Ok(())
    }
}
