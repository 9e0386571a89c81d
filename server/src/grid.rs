//! Authoritative pixel grid
//!
//! The grid is created once at startup, filled with the background color,
//! and afterwards only changes through single-cell writes. Colors are opaque
//! tokens: the store never inspects them.

use shared::{Canvas, Color};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("cell ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfBounds {
        x: i64,
        y: i64,
        width: usize,
        height: usize,
    },
}

/// The shared W×H color matrix.
#[derive(Debug, Clone)]
pub struct Grid {
    canvas: Canvas,
}

impl Grid {
    /// Fills every cell with `background`.
    pub fn new(width: usize, height: usize, background: Color) -> Self {
        Self {
            canvas: Canvas::filled(width, height, background),
        }
    }

    pub fn width(&self) -> usize {
        self.canvas.width()
    }

    pub fn height(&self) -> usize {
        self.canvas.height()
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        self.canvas.contains(x, y)
    }

    pub fn get(&self, x: i64, y: i64) -> Result<&Color, GridError> {
        self.canvas.get(x, y).ok_or_else(|| self.out_of_bounds(x, y))
    }

    /// Overwrites one cell. Writing the color a cell already holds is allowed
    /// and leaves the grid unchanged.
    pub fn set(&mut self, x: i64, y: i64, color: Color) -> Result<(), GridError> {
        if self.canvas.set(x, y, color) {
            Ok(())
        } else {
            Err(self.out_of_bounds(x, y))
        }
    }

    /// Full copy of the grid, handed to participants as they join.
    pub fn snapshot(&self) -> Canvas {
        self.canvas.clone()
    }

    fn out_of_bounds(&self, x: i64, y: i64) -> GridError {
        GridError::OutOfBounds {
            x,
            y,
            width: self.width(),
            height: self.height(),
        }
    }
}
