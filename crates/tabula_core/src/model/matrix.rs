//! Matrix payload: homogeneous numeric grid with coordinate ranges.
//!
//! # Invariants
//! - `cells.len() == rows * columns`, stored row-major.
//! - Equality is bitwise on cells and coordinates.

use crate::model::cell::same_f64;
use crate::model::matrix_cell_count;
use crate::model::mode::NumericFormat;

#[derive(Debug, Clone)]
pub struct Matrix {
    rows: usize,
    columns: usize,
    cells: Vec<f64>,
    x_start: f64,
    x_end: f64,
    y_start: f64,
    y_end: f64,
    numeric_format: NumericFormat,
    formula: String,
}

/// Coordinate ranges mapped onto columns (x) and rows (y).
#[derive(Debug, Clone, Copy)]
pub struct Coordinates {
    pub x_start: f64,
    pub x_end: f64,
    pub y_start: f64,
    pub y_end: f64,
}

impl Coordinates {
    /// `1..=columns` on x and `1..=rows` on y.
    pub fn spanning(rows: usize, columns: usize) -> Self {
        Self {
            x_start: 1.0,
            x_end: columns.max(1) as f64,
            y_start: 1.0,
            y_end: rows.max(1) as f64,
        }
    }
}

impl PartialEq for Coordinates {
    fn eq(&self, other: &Self) -> bool {
        same_f64(self.x_start, other.x_start)
            && same_f64(self.x_end, other.x_end)
            && same_f64(self.y_start, other.y_start)
            && same_f64(self.y_end, other.y_end)
    }
}

impl PartialEq for Matrix {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
            && self.columns == other.columns
            && self.cells.len() == other.cells.len()
            && self.cells.iter().zip(&other.cells).all(|(a, b)| same_f64(*a, *b))
            && self.coordinates() == other.coordinates()
            && self.numeric_format == other.numeric_format
            && self.formula == other.formula
    }
}

impl Matrix {
    /// Zero-filled grid; coordinates default to `1..=columns` and `1..=rows`.
    /// Returns `None` when the grid would exceed `MAX_MATRIX_CELLS`.
    pub fn new(rows: usize, columns: usize) -> Option<Self> {
        let size = matrix_cell_count(rows, columns)?;
        let coordinates = Coordinates::spanning(rows, columns);
        Some(Self {
            rows,
            columns,
            cells: vec![0.0; size],
            x_start: coordinates.x_start,
            x_end: coordinates.x_end,
            y_start: coordinates.y_start,
            y_end: coordinates.y_end,
            numeric_format: NumericFormat::default(),
            formula: String::new(),
        })
    }

    /// Returns `None` when `cells` does not hold exactly `rows * columns`
    /// values.
    pub(crate) fn from_parts(
        rows: usize,
        columns: usize,
        cells: Vec<f64>,
        coordinates: Coordinates,
        numeric_format: NumericFormat,
        formula: String,
    ) -> Option<Self> {
        if cells.len() != matrix_cell_count(rows, columns)? {
            return None;
        }
        Some(Self {
            rows,
            columns,
            cells,
            x_start: coordinates.x_start,
            x_end: coordinates.x_end,
            y_start: coordinates.y_start,
            y_end: coordinates.y_end,
            numeric_format,
            formula,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<f64> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.cells.get(row * self.columns + column).copied()
    }

    pub fn display(&self, row: usize, column: usize) -> String {
        self.cell(row, column)
            .map(|value| self.numeric_format.format(value))
            .unwrap_or_default()
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            x_start: self.x_start,
            x_end: self.x_end,
            y_start: self.y_start,
            y_end: self.y_end,
        }
    }

    /// x coordinate of `column`, spread linearly over the x range.
    pub fn x_at(&self, column: usize) -> f64 {
        spread(self.x_start, self.x_end, column, self.columns)
    }

    /// y coordinate of `row`, spread linearly over the y range.
    pub fn y_at(&self, row: usize) -> f64 {
        spread(self.y_start, self.y_end, row, self.rows)
    }

    pub fn numeric_format(&self) -> NumericFormat {
        self.numeric_format
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub(crate) fn set_cell(&mut self, row: usize, column: usize, value: f64) -> bool {
        if row >= self.rows || column >= self.columns {
            return false;
        }
        self.cells[row * self.columns + column] = value;
        true
    }

    /// Changes dimensions, keeping the overlapping block; new cells are 0.
    /// Returns `false` without touching the grid past `MAX_MATRIX_CELLS`.
    pub(crate) fn resize(&mut self, rows: usize, columns: usize) -> bool {
        let Some(size) = matrix_cell_count(rows, columns) else {
            return false;
        };
        let mut cells = vec![0.0; size];
        for row in 0..rows.min(self.rows) {
            for column in 0..columns.min(self.columns) {
                cells[row * columns + column] = self.cells[row * self.columns + column];
            }
        }
        self.rows = rows;
        self.columns = columns;
        self.cells = cells;
        true
    }

    /// Replaces every cell; rejected unless the length matches.
    pub(crate) fn replace_cells(&mut self, cells: Vec<f64>) -> bool {
        if cells.len() != self.cells.len() {
            return false;
        }
        self.cells = cells;
        true
    }

    pub(crate) fn set_coordinates(&mut self, coordinates: Coordinates) {
        self.x_start = coordinates.x_start;
        self.x_end = coordinates.x_end;
        self.y_start = coordinates.y_start;
        self.y_end = coordinates.y_end;
    }

    pub(crate) fn set_numeric_format(&mut self, format: NumericFormat) {
        self.numeric_format = format;
    }

    pub(crate) fn set_formula(&mut self, formula: String) {
        self.formula = formula;
    }

    pub fn footprint(&self) -> usize {
        self.cells.len() * std::mem::size_of::<f64>() + self.formula.len()
    }
}

fn spread(start: f64, end: f64, index: usize, count: usize) -> f64 {
    if count <= 1 {
        return start;
    }
    start + (end - start) * index as f64 / (count - 1) as f64
}
