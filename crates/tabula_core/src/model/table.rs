//! Table payload. A table's columns are its `Column` children; the table
//! itself only records the declared row count.

use crate::model::aspect::Aspect;
use crate::model::column::Column;
use crate::model::mode::{ColumnMode, PlotDesignation};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    row_count: usize,
}

impl Table {
    pub fn new(row_count: usize) -> Self {
        Self { row_count }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub(crate) fn set_row_count(&mut self, row_count: usize) {
        self.row_count = row_count;
    }

    /// Empty numeric columns `"1".."n"`; the first is X, the others Y.
    pub fn default_columns(count: usize) -> Vec<Aspect> {
        (0..count)
            .map(|index| {
                let designation = if index == 0 {
                    PlotDesignation::X
                } else {
                    PlotDesignation::Y
                };
                Aspect::column(
                    (index + 1).to_string(),
                    Column::new(ColumnMode::Numeric).with_plot_designation(designation),
                )
            })
            .collect()
    }
}
