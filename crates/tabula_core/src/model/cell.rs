//! Typed cell payloads and column storage.
//!
//! # Responsibility
//! - Hold column payloads in one vector per storage type.
//! - Compare numeric payloads bitwise so undo can be checked for exact
//!   restoration.
//!
//! # Invariants
//! - A `ColumnData` never mixes payload types.
//! - Slots without a meaningful value hold the type's placeholder; the
//!   column's invalid set, not the payload, says whether a cell is empty.

use crate::model::mode::DataType;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Bitwise float equality; every NaN equals every other NaN.
pub(crate) fn same_f64(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
}

/// Payload placed in slots that carry no value (1900-01-01 00:00 for dates).
pub fn placeholder_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// One typed cell payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Numeric(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => same_f64(*a, *b),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl CellValue {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Numeric(_) => DataType::Numeric,
            Self::Text(_) => DataType::Text,
            Self::DateTime(_) => DataType::DateTime,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    /// Placeholder payload for an empty slot of `data_type`.
    pub fn placeholder(data_type: DataType) -> Self {
        match data_type {
            DataType::Numeric => Self::Numeric(f64::NAN),
            DataType::Text => Self::Text(String::new()),
            DataType::DateTime => Self::DateTime(placeholder_datetime()),
        }
    }
}

/// Tri-state validity of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Valid,
    Invalid,
    Masked,
}

/// Column payload storage, one vector per storage type.
#[derive(Debug, Clone)]
pub enum ColumnData {
    Numeric(Vec<f64>),
    Text(Vec<String>),
    DateTime(Vec<NaiveDateTime>),
}

impl PartialEq for ColumnData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_f64(*x, *y))
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl ColumnData {
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Numeric => Self::Numeric(Vec::new()),
            DataType::Text => Self::Text(Vec::new()),
            DataType::DateTime => Self::DateTime(Vec::new()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::Numeric(_) => DataType::Numeric,
            Self::Text(_) => DataType::Text,
            Self::DateTime(_) => DataType::DateTime,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Text(values) => values.len(),
            Self::DateTime(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize) -> Option<CellValue> {
        match self {
            Self::Numeric(values) => values.get(row).copied().map(CellValue::Numeric),
            Self::Text(values) => values.get(row).cloned().map(CellValue::Text),
            Self::DateTime(values) => values.get(row).copied().map(CellValue::DateTime),
        }
    }

    /// Stores `value` at `row`, padding with placeholders when `row` is past
    /// the end. Returns `false` without touching storage on a type mismatch.
    pub(crate) fn set(&mut self, row: usize, value: CellValue) -> bool {
        if value.data_type() != self.data_type() {
            return false;
        }
        if row >= self.len() {
            self.resize(row + 1);
        }
        match (self, value) {
            (Self::Numeric(values), CellValue::Numeric(value)) => values[row] = value,
            (Self::Text(values), CellValue::Text(value)) => values[row] = value,
            (Self::DateTime(values), CellValue::DateTime(value)) => values[row] = value,
            _ => return false,
        }
        true
    }

    pub(crate) fn push(&mut self, value: CellValue) -> bool {
        let row = self.len();
        self.set(row, value)
    }

    pub(crate) fn resize(&mut self, len: usize) {
        match self {
            Self::Numeric(values) => values.resize(len, f64::NAN),
            Self::Text(values) => values.resize(len, String::new()),
            Self::DateTime(values) => values.resize(len, placeholder_datetime()),
        }
    }

    pub(crate) fn insert_placeholders(&mut self, before: usize, count: usize) {
        let at = before.min(self.len());
        match self {
            Self::Numeric(values) => {
                values.splice(at..at, std::iter::repeat(f64::NAN).take(count));
            }
            Self::Text(values) => {
                values.splice(at..at, std::iter::repeat(String::new()).take(count));
            }
            Self::DateTime(values) => {
                values.splice(at..at, std::iter::repeat(placeholder_datetime()).take(count));
            }
        }
    }

    pub(crate) fn remove_range(&mut self, first: usize, count: usize) {
        let start = first.min(self.len());
        let end = first.saturating_add(count).min(self.len());
        match self {
            Self::Numeric(values) => {
                values.drain(start..end);
            }
            Self::Text(values) => {
                values.drain(start..end);
            }
            Self::DateTime(values) => {
                values.drain(start..end);
            }
        }
    }

    /// Approximate heap bytes held by this storage.
    pub fn footprint(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len() * std::mem::size_of::<f64>(),
            Self::Text(values) => values
                .iter()
                .map(|value| value.len() + std::mem::size_of::<String>())
                .sum(),
            Self::DateTime(values) => values.len() * std::mem::size_of::<NaiveDateTime>(),
        }
    }
}
