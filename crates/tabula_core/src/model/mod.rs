//! Aspect tree domain model.
//!
//! # Responsibility
//! - Define the closed set of aspect kinds (project, folder, table, matrix,
//!   column) and the tree that owns them.
//! - Define typed column storage and the filter pipeline that keeps cell
//!   payloads consistent with a column mode.
//!
//! # Invariants
//! - A parent exclusively owns its children; the tree is acyclic.
//! - Sibling names are unique.
//! - A column's storage variant always matches its mode.
//!
//! # See also
//! - `crate::command` for the only code path that mutates the tree.

pub mod aspect;
pub mod cell;
pub mod column;
pub mod filter;
pub mod interval;
pub mod matrix;
pub mod mode;
pub mod naming;
pub mod table;

/// Most rows a table or column may hold. Row indices at or past this are
/// rejected, whether they come from edits, scripts or files.
pub const MAX_ROWS: usize = 1 << 24;

/// Most cells a matrix may hold.
pub const MAX_MATRIX_CELLS: usize = 1 << 24;

/// Length needed to hold `count` rows starting at `first`, if it stays
/// within `MAX_ROWS`.
pub fn row_span(first: usize, count: usize) -> Option<usize> {
    first.checked_add(count).filter(|len| *len <= MAX_ROWS)
}

/// `rows * columns`, if it stays within `MAX_MATRIX_CELLS`.
pub fn matrix_cell_count(rows: usize, columns: usize) -> Option<usize> {
    rows.checked_mul(columns)
        .filter(|cells| *cells <= MAX_MATRIX_CELLS)
}

#[cfg(test)]
mod tests {
    use super::{matrix_cell_count, row_span, MAX_MATRIX_CELLS, MAX_ROWS};

    #[test]
    fn spans_and_cell_counts_stop_at_limits() {
        assert_eq!(row_span(3, 2), Some(5));
        assert_eq!(row_span(MAX_ROWS - 1, 1), Some(MAX_ROWS));
        assert_eq!(row_span(MAX_ROWS, 1), None);
        assert_eq!(row_span(usize::MAX, 1), None);

        assert_eq!(matrix_cell_count(2, 3), Some(6));
        assert_eq!(matrix_cell_count(MAX_MATRIX_CELLS, 2), None);
        assert_eq!(matrix_cell_count(usize::MAX, usize::MAX), None);
    }
}
