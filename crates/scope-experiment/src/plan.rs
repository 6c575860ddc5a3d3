//! Acquisition plan: what to image, where, and how often.
//!
//! A plan is plain data. It is edited before a run (saving positions,
//! setting the timelapse or mosaic) and handed to the engine by shared
//! reference, so it cannot change while a run is executing.
//!
//! ```toml
//! autofocus = true
//!
//! [timelapse]
//! frame_count = 24
//! interval_s = 3600.0
//!
//! [mosaic]
//! rows = 3
//! columns = 3
//! step_mm = 1.5
//!
//! [[positions]]
//! name = "well A1"
//! position = { x = 10.0, y = 20.0, z = 1.2 }
//! ```

use scope_core::{Position, Rgb, ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stage position captured by an explicit save action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPosition {
    /// Label shown to the operator.
    pub name: String,
    /// Device-reported position at save time.
    pub position: Position,
}

/// Timelapse settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timelapse {
    /// Number of passes over all positions.
    pub frame_count: u32,
    /// Wait after each pass, in seconds.
    pub interval_s: f64,
}

impl Default for Timelapse {
    fn default() -> Self {
        Self {
            frame_count: 1,
            interval_s: 1.0,
        }
    }
}

impl Timelapse {
    /// Wait between passes.
    ///
    /// Fails for negative, non-finite or unrepresentably long intervals.
    pub fn interval(&self) -> ScopeResult<Duration> {
        Duration::try_from_secs_f64(self.interval_s).map_err(|e| {
            ScopeError::InvalidInput(format!(
                "timelapse interval must be a non-negative number of seconds, got {} ({e})",
                self.interval_s
            ))
        })
    }
}

/// Mosaic (tiled grid) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicSettings {
    /// Rows along the slow (Y) axis.
    pub rows: u32,
    /// Columns along the fast (X) axis.
    pub columns: u32,
    /// Stage step between neighbouring tiles, in millimeters.
    pub step_mm: f64,
}

impl Default for MosaicSettings {
    fn default() -> Self {
        Self {
            rows: 1,
            columns: 1,
            step_mm: 1.5,
        }
    }
}

impl MosaicSettings {
    /// Square `n`×`n` grid.
    pub fn square(n: u32, step_mm: f64) -> Self {
        Self {
            rows: n,
            columns: n,
            step_mm,
        }
    }

    /// Number of tiles per position, or `None` if it does not fit in `u32`.
    pub fn checked_cell_count(&self) -> Option<u32> {
        self.rows.checked_mul(self.columns)
    }

    /// Number of tiles per position, saturating at `u32::MAX`.
    pub fn cell_count(&self) -> u32 {
        self.checked_cell_count().unwrap_or(u32::MAX)
    }
}

/// Z-stack settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZStackSettings {
    /// Number of slices.
    pub slice_count: u32,
    /// Distance between slices, in millimeters.
    pub step_mm: f64,
}

impl Default for ZStackSettings {
    fn default() -> Self {
        Self {
            slice_count: 50,
            step_mm: 0.001,
        }
    }
}

impl ZStackSettings {
    /// Distance above the current plane where the stack starts.
    pub fn top_offset(&self) -> f64 {
        let n = f64::from(self.slice_count);
        (n * self.step_mm + self.step_mm) / 2.0
    }
}

/// Two-channel capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Filename label of the fluorescence channel.
    pub fluorescence_label: String,
    /// Filename label of the brightfield channel.
    pub brightfield_label: String,
    /// Excitation color set when the run starts.
    pub fluorescence_color: Rgb,
    /// Brightfield color set when the run starts.
    pub brightfield_color: Rgb,
    /// Brightfield intensity while the brightfield frame is captured.
    pub brightfield_capture_intensity: f64,
    /// Brightfield intensity restored after each cell.
    pub brightfield_restore_intensity: f64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            fluorescence_label: "GFP".to_string(),
            brightfield_label: "BF".to_string(),
            fluorescence_color: Rgb::BLUE,
            brightfield_color: Rgb::WHITE,
            brightfield_capture_intensity: 0.5,
            brightfield_restore_intensity: 1.0,
        }
    }
}

/// Everything a multi-dimensional acquisition needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionPlan {
    /// Saved positions, visited in order. Empty means "image where the stage is".
    pub positions: Vec<SavedPosition>,
    /// Timelapse settings.
    pub timelapse: Timelapse,
    /// Mosaic settings.
    pub mosaic: MosaicSettings,
    /// Z-stack settings (used by the separate z-stack entry point).
    pub zstack: ZStackSettings,
    /// Channel settings.
    pub channels: ChannelSettings,
    /// Run autofocus before each mosaic cell.
    pub autofocus: bool,
}

impl AcquisitionPlan {
    /// Append a position.
    pub fn add_position(&mut self, name: impl Into<String>, position: Position) -> usize {
        self.positions.push(SavedPosition {
            name: name.into(),
            position,
        });
        self.positions.len() - 1
    }

    /// Remove the position at `index`.
    pub fn remove_position(&mut self, index: usize) -> ScopeResult<SavedPosition> {
        if index >= self.positions.len() {
            return Err(ScopeError::InvalidInput(format!(
                "no saved position at index {index} ({} saved)",
                self.positions.len()
            )));
        }
        Ok(self.positions.remove(index))
    }

    /// Remove the most recently saved position.
    pub fn remove_last_position(&mut self) -> Option<SavedPosition> {
        self.positions.pop()
    }

    /// Forget every saved position.
    pub fn reset_positions(&mut self) {
        self.positions.clear();
    }

    /// Saved position at `index`.
    pub fn position(&self, index: usize) -> ScopeResult<&SavedPosition> {
        self.positions.get(index).ok_or_else(|| {
            ScopeError::InvalidInput(format!(
                "no saved position at index {index} ({} saved)",
                self.positions.len()
            ))
        })
    }

    /// Set timelapse frame count and interval.
    pub fn set_timelapse(&mut self, frame_count: u32, interval_s: f64) {
        self.timelapse = Timelapse {
            frame_count,
            interval_s,
        };
    }

    /// Set the mosaic grid, keeping the tile step.
    pub fn set_mosaic(&mut self, rows: u32, columns: u32) {
        self.mosaic.rows = rows;
        self.mosaic.columns = columns;
    }

    /// Reject plans the engine cannot execute.
    pub fn validate(&self) -> ScopeResult<()> {
        if self.timelapse.frame_count == 0 {
            return Err(ScopeError::InvalidInput(
                "timelapse frame_count must be at least 1".to_string(),
            ));
        }
        self.timelapse.interval()?;
        if self.mosaic.rows == 0 || self.mosaic.columns == 0 {
            return Err(ScopeError::InvalidInput(format!(
                "mosaic must have at least one row and column, got {}x{}",
                self.mosaic.rows, self.mosaic.columns
            )));
        }
        if self.mosaic.checked_cell_count().is_none() {
            return Err(ScopeError::InvalidInput(format!(
                "mosaic {}x{} has too many cells",
                self.mosaic.rows, self.mosaic.columns
            )));
        }
        if !self.mosaic.step_mm.is_finite() {
            return Err(ScopeError::InvalidInput(
                "mosaic step must be finite".to_string(),
            ));
        }
        for intensity in [
            self.channels.brightfield_capture_intensity,
            self.channels.brightfield_restore_intensity,
        ] {
            if !(0.0..=1.0).contains(&intensity) {
                return Err(ScopeError::InvalidInput(format!(
                    "brightfield intensity must be within [0, 1], got {intensity}"
                )));
            }
        }
        Ok(())
    }
}
