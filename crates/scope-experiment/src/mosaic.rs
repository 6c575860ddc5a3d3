//! Boustrophedon (serpentine) raster over a mosaic grid.
//!
//! Cell `i` of a `rows`×`columns` grid lies in row `i / columns`. At the start
//! of every row the stage steps once along Y and the travel direction along X
//! flips; row 0 travels in the positive direction. Before each capture the
//! stage steps once along X in the current direction.
//!
//! The column label used in file names is `i % columns` on positive rows and
//! `columns - i % columns` on negative rows, so labels follow physical
//! left-to-right order whichever way the stage is travelling.

use crate::plan::MosaicSettings;

/// One mosaic tile visit and the moves that lead to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MosaicCell {
    /// Linear cell index in visit order.
    pub index: u32,
    /// Row (slow axis).
    pub row: u32,
    /// Column label used in file names.
    pub column_label: u32,
    /// Travel direction along X for this row, `+1` or `-1`.
    pub direction: i8,
    /// Y step taken before this cell (non-zero only at a row start).
    pub dy: f64,
    /// X step taken before this cell.
    pub dx: f64,
}

/// Column label for cell `index` travelling in `direction`.
pub fn column_label(index: u32, columns: u32, direction: i8) -> u32 {
    if direction < 0 {
        columns - index % columns
    } else {
        index % columns
    }
}

/// Iterator over the cells of a mosaic in acquisition order.
#[derive(Debug, Clone)]
pub struct MosaicRaster {
    columns: u32,
    total: u32,
    step: f64,
    next: u32,
    direction: i8,
}

impl MosaicRaster {
    /// Raster over `settings`.
    pub fn new(settings: &MosaicSettings) -> Self {
        Self {
            columns: settings.columns.max(1),
            total: settings.cell_count(),
            step: settings.step_mm,
            next: 0,
            // Flipped at the first row start, so row 0 runs positive.
            direction: -1,
        }
    }
}

impl Iterator for MosaicRaster {
    type Item = MosaicCell;

    fn next(&mut self) -> Option<MosaicCell> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let row_start = index % self.columns == 0;
        if row_start {
            self.direction = -self.direction;
        }

        Some(MosaicCell {
            index,
            row: index / self.columns,
            column_label: column_label(index, self.columns, self.direction),
            direction: self.direction,
            dy: if row_start { self.step } else { 0.0 },
            dx: self.step * f64::from(self.direction),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total - self.next) as usize;
        (left, Some(left))
    }
}
