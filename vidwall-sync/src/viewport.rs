//! Per-tile crop transform.
//!
//! A node at `(row, col)` of an `rows × cols` wall renders the shared video
//! element scaled up by the grid size and shifted so that only its own tile
//! is visible. Offsets are percentages of the node's own frame:
//!
//! ```text
//!   cols = 3                 node (0,1): scale 3×, offset (-100%, 0%)
//! ┌─────┬─────┬─────┐
//! │ 0,0 │ 0,1 │ 0,2 │        ┌─────┐
//! ├─────┼─────┼─────┤  ───►  │ 0,1 │  visible window
//! │ 1,0 │ 1,1 │ 1,2 │        └─────┘
//! └─────┴─────┴─────┘
//! ```
//!
//! In duplicate mode the renderer ignores the viewport and shows the full
//! frame; the transform is still computed so switching modes is instant.

use serde::{Deserialize, Serialize};

use crate::registry::Position;
use crate::topology::GridConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Viewport {
    /// The unscaled, uncropped frame.
    pub const FULL_FRAME: Viewport = Viewport {
        scale_x: 1.0,
        scale_y: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    pub fn for_position(position: Position, grid: &GridConfig) -> Self {
        viewport(position.row, position.col, grid.rows, grid.cols)
    }
}

/// Crop transform for tile `(row, col)` of a `rows × cols` grid.
pub fn viewport(row: u32, col: u32, rows: u32, cols: u32) -> Viewport {
    Viewport {
        scale_x: f64::from(cols),
        scale_y: f64::from(rows),
        offset_x: -f64::from(col) * 100.0,
        offset_y: -f64::from(row) * 100.0,
    }
}
