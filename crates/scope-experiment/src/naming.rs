//! Deterministic output file names.
//!
//! Mosaic/timelapse images:
//!
//! ```text
//! <prefix>_<t>h00_<channel>_exp-<exposure_s>s_gain<gain>_mosa_x<col>_y<row>.tif
//! ```
//!
//! When the plan has more than one saved position, `_pos<k>` is appended
//! before the extension so positions do not overwrite each other.
//!
//! Z-stack slices: `<prefix>_<slice>.tif`.

use std::path::PathBuf;

/// Fields that make up a mosaic image name.
#[derive(Debug, Clone, Copy)]
pub struct ImageName<'a> {
    /// Output directory and base name, as supplied by the caller.
    pub prefix: &'a str,
    /// Timelapse frame index.
    pub timepoint: u32,
    /// Channel label (`GFP`, `BF`, ...).
    pub channel: &'a str,
    /// Exposure in microseconds.
    pub exposure_us: u32,
    /// Analogue gain.
    pub gain: f64,
    /// Mosaic column label.
    pub column: u32,
    /// Mosaic row.
    pub row: u32,
    /// Position index, only set when several positions are imaged.
    pub position: Option<usize>,
}

impl ImageName<'_> {
    /// Render the file path.
    pub fn to_path(&self) -> PathBuf {
        let exposure_s = f64::from(self.exposure_us) / 1_000_000.0;
        let mut name = format!(
            "{}_{}h00_{}_exp-{}s_gain{}_mosa_x{}_y{}",
            self.prefix, self.timepoint, self.channel, exposure_s, self.gain, self.column, self.row
        );
        if let Some(k) = self.position {
            name.push_str(&format!("_pos{k}"));
        }
        name.push_str(".tif");
        PathBuf::from(name)
    }
}

/// Path of z-stack slice `slice`.
pub fn zstack_slice_path(prefix: &str, slice: u32) -> PathBuf {
    PathBuf::from(format!("{prefix}_{slice}.tif"))
}
