use anyhow::{anyhow, Result};

/// Bounding box of one grid square, µm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareBounds {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// Uniform dimension×dimension partition of the imaging area.
///
/// Squares are numbered row-major: `square = row * dimension + col`, with
/// columns along x and rows along y.
#[derive(Debug, Clone)]
pub struct GridLayout {
    pub dimension: usize,
    pub width_um: f64,
    pub height_um: f64,
    pub cell_width_um: f64,
    pub cell_height_um: f64,
}

impl GridLayout {
    /// Builds the grid from a total square count, which must be a perfect
    /// square >= 1. A non-square count is rejected, never truncated.
    pub fn new(number_of_squares: usize, width_um: f64, height_um: f64) -> Result<Self> {
        if number_of_squares == 0 {
            return Err(anyhow!("number of squares must be >= 1"));
        }
        let dimension = (number_of_squares as f64).sqrt().floor() as usize;
        if dimension * dimension != number_of_squares {
            return Err(anyhow!(
                "number of squares ({}) is not a perfect square",
                number_of_squares
            ));
        }
        if !(width_um.is_finite() && width_um > 0.0 && height_um.is_finite() && height_um > 0.0) {
            return Err(anyhow!(
                "imaging area must have positive extent; got {}µm × {}µm",
                width_um,
                height_um
            ));
        }

        Ok(Self {
            dimension,
            width_um,
            height_um,
            cell_width_um: width_um / dimension as f64,
            cell_height_um: height_um / dimension as f64,
        })
    }

    pub fn square_count(&self) -> usize {
        self.dimension * self.dimension
    }

    pub fn cell_area_um2(&self) -> f64 {
        self.cell_width_um * self.cell_height_um
    }

    pub fn image_area_um2(&self) -> f64 {
        self.width_um * self.height_um
    }

    pub fn row_col(&self, square: usize) -> (usize, usize) {
        (square / self.dimension, square % self.dimension)
    }

    pub fn square_number(&self, row: usize, col: usize) -> usize {
        row * self.dimension + col
    }

    pub fn bounds(&self, square: usize) -> SquareBounds {
        let (row, col) = self.row_col(square);
        SquareBounds {
            x0: col as f64 * self.cell_width_um,
            y0: row as f64 * self.cell_height_um,
            x1: (col + 1) as f64 * self.cell_width_um,
            y1: (row + 1) as f64 * self.cell_height_um,
        }
    }

    /// Maps a point to its square number. Cells are half-open
    /// `[x0, x1) × [y0, y1)`, except the last row/column, which closes the
    /// upper bound so points on the outer image edge are still assigned.
    /// Points outside the imaging area map to `None`.
    pub fn point_to_square(&self, x_um: f64, y_um: f64) -> Option<usize> {
        if !(x_um.is_finite() && y_um.is_finite()) {
            return None;
        }
        if x_um < 0.0 || y_um < 0.0 || x_um > self.width_um || y_um > self.height_um {
            return None;
        }
        let col = ((x_um / self.cell_width_um).floor() as usize).min(self.dimension - 1);
        let row = ((y_um / self.cell_height_um).floor() as usize).min(self.dimension - 1);
        Some(self.square_number(row, col))
    }

    /// In-grid 4-neighbourhood (up, down, left, right) of a square.
    pub fn neighbours4(&self, square: usize) -> Vec<usize> {
        let (row, col) = self.row_col(square);
        let mut out = Vec::with_capacity(4);
        if row > 0 {
            out.push(self.square_number(row - 1, col));
        }
        if row + 1 < self.dimension {
            out.push(self.square_number(row + 1, col));
        }
        if col > 0 {
            out.push(self.square_number(row, col - 1));
        }
        if col + 1 < self.dimension {
            out.push(self.square_number(row, col + 1));
        }
        out
    }

    /// In-grid 8-neighbourhood (including diagonals) of a square.
    pub fn neighbours8(&self, square: usize) -> Vec<usize> {
        let (row, col) = self.row_col(square);
        let mut out = Vec::with_capacity(8);
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = row as i64 + dr;
                let c = col as i64 + dc;
                if r < 0 || c < 0 || r >= self.dimension as i64 || c >= self.dimension as i64 {
                    continue;
                }
                out.push(self.square_number(r as usize, c as usize));
            }
        }
        out
    }
}
