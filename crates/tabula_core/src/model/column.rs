//! Column: typed cell storage with per-row validity.
//!
//! # Responsibility
//! - Store cells `0..N-1` with a payload type fixed by the column mode.
//! - Track invalid and masked rows as interval sets.
//! - Route raw input, display and mode changes through the filter pipeline.
//!
//! # Invariants
//! - `data.data_type() == mode.data_type()` at all times.
//! - A failed conversion marks the cell invalid; it never stores a
//!   different value silently.
//! - Mutators are crate-private; outside callers go through commands.

use crate::error::{CellError, CellErrorKind, TypeError};
use crate::model::cell::{CellValue, ColumnData, Validity};
use crate::model::filter::FilterChain;
use crate::model::interval::{IntervalSet, RowRange};
use crate::model::mode::{ColumnMode, NumericFormat, PlotDesignation};
use crate::model::MAX_ROWS;

/// Typed column of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    mode: ColumnMode,
    plot_designation: PlotDesignation,
    data: ColumnData,
    invalid: IntervalSet,
    masked: IntervalSet,
    numeric_format: NumericFormat,
    datetime_format: String,
    formula: String,
}

/// Previous state of one cell, enough to restore it exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSnapshot {
    row: usize,
    len: usize,
    value: Option<CellValue>,
    invalid: bool,
}

impl CellSnapshot {
    pub fn row(&self) -> usize {
        self.row
    }
}

impl Column {
    pub fn new(mode: ColumnMode) -> Self {
        Self {
            mode,
            plot_designation: PlotDesignation::None,
            data: ColumnData::empty(mode.data_type()),
            invalid: IntervalSet::new(),
            masked: IntervalSet::new(),
            numeric_format: NumericFormat::default(),
            datetime_format: mode.default_datetime_format().to_string(),
            formula: String::new(),
        }
    }

    /// Numeric column holding `values`; NaN entries are marked invalid.
    pub fn numeric(values: Vec<f64>) -> Self {
        let mut column = Self::new(ColumnMode::Numeric);
        for (row, value) in values.iter().enumerate() {
            if value.is_nan() {
                column.invalid.insert(RowRange::single(row));
            }
        }
        column.data = ColumnData::Numeric(values);
        column
    }

    /// Text column holding `values`.
    pub fn text<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut column = Self::new(ColumnMode::Text);
        column.data = ColumnData::Text(values.into_iter().map(Into::into).collect());
        column
    }

    /// Rebuilds a column from persisted parts.
    ///
    /// Returns `None` when `data` does not match the storage type of `mode`.
    pub(crate) fn from_parts(
        mode: ColumnMode,
        plot_designation: PlotDesignation,
        data: ColumnData,
        invalid: IntervalSet,
        masked: IntervalSet,
        numeric_format: NumericFormat,
        datetime_format: String,
        formula: String,
    ) -> Option<Self> {
        if data.data_type() != mode.data_type() {
            return None;
        }
        Some(Self {
            mode,
            plot_designation,
            data,
            invalid,
            masked,
            numeric_format,
            datetime_format,
            formula,
        })
    }

    pub fn with_plot_designation(mut self, designation: PlotDesignation) -> Self {
        self.plot_designation = designation;
        self
    }

    pub fn mode(&self) -> ColumnMode {
        self.mode
    }

    pub fn plot_designation(&self) -> PlotDesignation {
        self.plot_designation
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn invalid_rows(&self) -> &IntervalSet {
        &self.invalid
    }

    pub fn masked_rows(&self) -> &IntervalSet {
        &self.masked
    }

    pub fn numeric_format(&self) -> NumericFormat {
        self.numeric_format
    }

    pub fn datetime_format(&self) -> &str {
        &self.datetime_format
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn has_formula(&self) -> bool {
        !self.formula.trim().is_empty()
    }

    /// Rows past the end read as invalid.
    pub fn validity(&self, row: usize) -> Validity {
        if row >= self.row_count() || self.invalid.contains(row) {
            Validity::Invalid
        } else if self.masked.contains(row) {
            Validity::Masked
        } else {
            Validity::Valid
        }
    }

    pub fn is_valid(&self, row: usize) -> bool {
        self.validity(row) == Validity::Valid
    }

    /// Stored payload, including placeholders of invalid cells.
    pub fn value(&self, row: usize) -> Option<CellValue> {
        self.data.get(row)
    }

    /// Payload of a valid, unmasked cell.
    pub fn valid_value(&self, row: usize) -> Option<CellValue> {
        if self.is_valid(row) {
            self.data.get(row)
        } else {
            None
        }
    }

    /// Numeric value used by formulas and plots.
    pub fn numeric_value(&self, row: usize) -> Option<f64> {
        self.valid_value(row).and_then(|value| value.as_f64())
    }

    pub fn input_filter(&self) -> FilterChain {
        FilterChain::input(self.mode, &self.datetime_format)
    }

    pub fn output_filter(&self) -> FilterChain {
        FilterChain::output(self.mode, self.numeric_format, &self.datetime_format)
    }

    /// Display text; empty for invalid cells. Masked cells still render.
    pub fn display(&self, row: usize) -> String {
        if row >= self.row_count() || self.invalid.contains(row) {
            return String::new();
        }
        self.data
            .get(row)
            .map(|value| self.output_filter().display(&value))
            .unwrap_or_default()
    }

    pub(crate) fn snapshot_cell(&self, row: usize) -> CellSnapshot {
        CellSnapshot {
            row,
            len: self.row_count(),
            value: self.data.get(row),
            invalid: self.invalid.contains(row),
        }
    }

    pub(crate) fn restore_cell(&mut self, snapshot: &CellSnapshot) {
        match &snapshot.value {
            Some(value) => {
                self.data.set(snapshot.row, value.clone());
                self.invalid
                    .set(RowRange::single(snapshot.row), snapshot.invalid);
            }
            None => self.truncate(snapshot.len),
        }
        if self.row_count() > snapshot.len {
            self.truncate(snapshot.len);
        }
    }

    /// Checks that `value` fits this column before anything is mutated.
    pub(crate) fn check_value(&self, row: usize, value: &CellValue) -> Result<(), TypeError> {
        if value.data_type() != self.mode.data_type() {
            return Err(TypeError::InvalidRowType {
                row,
                expected: self.mode,
                found: value.data_type(),
            });
        }
        Ok(())
    }

    /// Rejects rows at or past `MAX_ROWS` before anything grows.
    pub(crate) fn check_row(row: usize) -> Result<(), TypeError> {
        if row >= MAX_ROWS {
            return Err(TypeError::row_index(row));
        }
        Ok(())
    }

    /// Stores a typed value and marks the cell valid.
    pub(crate) fn set_value(&mut self, row: usize, value: CellValue) -> Result<(), TypeError> {
        Self::check_row(row)?;
        self.check_value(row, &value)?;
        self.pad_to(row);
        self.data.set(row, value);
        self.invalid.remove(RowRange::single(row));
        Ok(())
    }

    /// Converts raw text through the input filter and stores it.
    ///
    /// Blank input clears the cell. Text that fails conversion leaves the
    /// cell invalid and is reported back to the caller.
    pub(crate) fn set_text(&mut self, row: usize, raw: &str) -> Option<CellError> {
        if let Err(err) = Self::check_row(row) {
            return Some(CellError {
                row: i64::try_from(row).unwrap_or(i64::MAX),
                kind: CellErrorKind::InvalidRowIndex,
                detail: err.to_string(),
            });
        }
        if raw.trim().is_empty() && self.mode != ColumnMode::Text {
            self.clear_cell(row);
            return None;
        }
        match self.input_filter().apply(&CellValue::Text(raw.to_string())) {
            Ok(value) => {
                self.pad_to(row);
                self.data.set(row, value);
                self.invalid.remove(RowRange::single(row));
                None
            }
            Err(err) => {
                self.clear_cell(row);
                Some(CellError {
                    row: row as i64,
                    kind: CellErrorKind::InvalidRowValue,
                    detail: err.to_string(),
                })
            }
        }
    }

    fn clear_cell(&mut self, row: usize) {
        self.pad_to(row);
        self.data
            .set(row, CellValue::placeholder(self.mode.data_type()));
        self.invalid.insert(RowRange::single(row));
    }

    /// Grows the column so `row` exists; new rows are invalid.
    fn pad_to(&mut self, row: usize) {
        let len = self.row_count();
        if row < len {
            return;
        }
        self.data.resize(row + 1);
        if let Some(range) = RowRange::new(len, row) {
            self.invalid.insert(range);
        }
    }

    /// Re-types every cell for `mode`; returns the rows that failed.
    pub(crate) fn convert_to(&mut self, mode: ColumnMode) -> Vec<usize> {
        if mode == self.mode {
            return Vec::new();
        }
        let chain = FilterChain::conversion(self.mode, mode, &self.datetime_format);
        let data_type = mode.data_type();
        let mut converted = ColumnData::empty(data_type);
        let mut failed = Vec::new();
        for row in 0..self.row_count() {
            let was_invalid = self.invalid.contains(row);
            let result = self.data.get(row).map(|value| chain.apply(&value));
            match result {
                Some(Ok(value)) => {
                    converted.push(value);
                }
                _ => {
                    converted.push(CellValue::placeholder(data_type));
                    if !was_invalid {
                        self.invalid.insert(RowRange::single(row));
                        failed.push(row);
                    }
                }
            }
        }
        self.datetime_format = mode.default_datetime_format().to_string();
        self.mode = mode;
        self.data = converted;
        failed
    }

    pub(crate) fn set_plot_designation(&mut self, designation: PlotDesignation) {
        self.plot_designation = designation;
    }

    pub(crate) fn set_numeric_format(&mut self, format: NumericFormat) {
        self.numeric_format = format;
    }

    pub(crate) fn set_datetime_format(&mut self, format: String) {
        self.datetime_format = format;
    }

    pub(crate) fn set_formula(&mut self, formula: String) {
        self.formula = formula;
    }

    pub(crate) fn set_masked(&mut self, range: RowRange, masked: bool) {
        self.masked.set(range, masked);
    }

    pub(crate) fn set_invalid(&mut self, range: RowRange, invalid: bool) {
        self.invalid.set(range, invalid);
    }

    pub(crate) fn clear_masks(&mut self) {
        self.masked.clear();
    }

    pub(crate) fn replace_masks(&mut self, masked: IntervalSet) {
        self.masked = masked;
    }

    pub(crate) fn replace_invalid(&mut self, invalid: IntervalSet) {
        self.invalid = invalid;
    }

    /// Inserts `count` empty (invalid) rows before `before`.
    pub(crate) fn insert_rows(&mut self, before: usize, count: usize) {
        if before > self.row_count() || count == 0 {
            return;
        }
        self.data.insert_placeholders(before, count);
        self.invalid.insert_rows(before, count);
        self.masked.insert_rows(before, count);
        if let Some(range) = RowRange::new(before, before + count - 1) {
            self.invalid.insert(range);
        }
    }

    pub(crate) fn remove_rows(&mut self, first: usize, count: usize) {
        if first >= self.row_count() || count == 0 {
            return;
        }
        let count = count.min(self.row_count() - first);
        self.data.remove_range(first, count);
        self.invalid.remove_rows(first, count);
        self.masked.remove_rows(first, count);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        if len >= self.row_count() {
            return;
        }
        self.data.resize(len);
        self.invalid.truncate(len);
        self.masked.truncate(len);
    }

    /// Removes all cells, masks and invalid flags.
    pub(crate) fn clear(&mut self) {
        self.data = ColumnData::empty(self.mode.data_type());
        self.invalid.clear();
        self.masked.clear();
    }

    /// Writes numeric results (e.g. from a formula); `None` marks a row
    /// invalid. Values are converted into the column mode first.
    pub(crate) fn assign_numeric(&mut self, values: &[Option<f64>]) -> Vec<usize> {
        let chain = FilterChain::conversion(ColumnMode::Numeric, self.mode, "");
        let data_type = self.mode.data_type();
        let mut data = ColumnData::empty(data_type);
        let mut invalid = IntervalSet::new();
        let mut failed = Vec::new();
        for (row, value) in values.iter().enumerate() {
            let converted = value.map(|number| chain.apply(&CellValue::Numeric(number)));
            match converted {
                Some(Ok(converted)) => {
                    data.push(converted);
                }
                Some(Err(_)) => {
                    data.push(CellValue::placeholder(data_type));
                    invalid.insert(RowRange::single(row));
                    failed.push(row);
                }
                None => {
                    data.push(CellValue::placeholder(data_type));
                    invalid.insert(RowRange::single(row));
                }
            }
        }
        self.masked.truncate(values.len());
        self.data = data;
        self.invalid = invalid;
        failed
    }

    /// Approximate heap bytes; used for undo history limits.
    pub fn footprint(&self) -> usize {
        self.data.footprint()
            + (self.invalid.ranges().len() + self.masked.ranges().len())
                * std::mem::size_of::<RowRange>()
            + self.formula.len()
            + self.datetime_format.len()
    }
}
