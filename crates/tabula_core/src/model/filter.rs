//! Cell filter pipeline.
//!
//! # Responsibility
//! - Convert raw input text into typed payloads (input chains).
//! - Render typed payloads for display (output chains).
//! - Re-type payloads when a column changes mode (conversion chains).
//!
//! # Invariants
//! - Filters are pure; a chain is a linear sequence of filters.
//! - `Numeric -> Text` conversion uses the shortest representation that
//!   parses back to the same `f64`, so a `Numeric -> Text -> Numeric` round
//!   trip never changes a value.

use crate::model::cell::CellValue;
use crate::model::mode::{ColumnMode, DataType, NumericFormat};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::error::Error;
use std::fmt::{Display, Formatter, Write};

/// Julian day number of 0001-01-01 minus one (proleptic Gregorian).
const JULIAN_DAY_OFFSET: i64 = 1_721_425;
const MILLIS_PER_DAY: f64 = 86_400_000.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Lossless text format used for date-times inside project files.
pub const ISO_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const DAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const DATETIME_INPUT_FORMATS: &[&str] = &[
    ISO_DATETIME_FORMAT,
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];
const DATE_INPUT_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y"];
const TIME_INPUT_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// How numbers are turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberStyle {
    /// Shortest text that parses back to the identical `f64`.
    RoundTrip,
    /// User-facing display format.
    Formatted(NumericFormat),
}

/// One conversion stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    TextToNumeric,
    NumericToText(NumberStyle),
    TextToMonth,
    TextToDay,
    /// Tries `preferred` first, then a fixed list of common layouts.
    TextToDateTime { preferred: Option<String> },
    DateTimeToText { format: String },
    /// Integer 1-12 to the first day of that month in 1900.
    NumericToMonth,
    /// Integer 1-7 to that weekday in the first week of 1900 (Monday first).
    NumericToDay,
    /// Julian day (with fractional day) to date-time.
    NumericToDateTime,
    MonthToNumeric,
    DayToNumeric,
    DateTimeToNumeric,
}

/// Conversion failure for one input value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterError {
    pub filter: &'static str,
    pub input: String,
    pub reason: &'static str,
}

impl Display for FilterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cannot convert `{}`: {}",
            self.filter, self.input, self.reason
        )
    }
}

impl Error for FilterError {}

impl Filter {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TextToNumeric => "text_to_numeric",
            Self::NumericToText(_) => "numeric_to_text",
            Self::TextToMonth => "text_to_month",
            Self::TextToDay => "text_to_day",
            Self::TextToDateTime { .. } => "text_to_datetime",
            Self::DateTimeToText { .. } => "datetime_to_text",
            Self::NumericToMonth => "numeric_to_month",
            Self::NumericToDay => "numeric_to_day",
            Self::NumericToDateTime => "numeric_to_datetime",
            Self::MonthToNumeric => "month_to_numeric",
            Self::DayToNumeric => "day_to_numeric",
            Self::DateTimeToNumeric => "datetime_to_numeric",
        }
    }

    /// Payload type this filter consumes.
    pub fn input_type(&self) -> DataType {
        match self {
            Self::TextToNumeric
            | Self::TextToMonth
            | Self::TextToDay
            | Self::TextToDateTime { .. } => DataType::Text,
            Self::NumericToText(_)
            | Self::NumericToMonth
            | Self::NumericToDay
            | Self::NumericToDateTime => DataType::Numeric,
            Self::DateTimeToText { .. }
            | Self::MonthToNumeric
            | Self::DayToNumeric
            | Self::DateTimeToNumeric => DataType::DateTime,
        }
    }

    pub fn apply(&self, input: &CellValue) -> Result<CellValue, FilterError> {
        match (self, input) {
            (Self::TextToNumeric, CellValue::Text(raw)) => parse_number(raw)
                .map(CellValue::Numeric)
                .ok_or_else(|| self.error(raw, "not a number")),
            (Self::NumericToText(style), CellValue::Numeric(value)) => {
                Ok(CellValue::Text(match style {
                    NumberStyle::RoundTrip => format_round_trip(*value),
                    NumberStyle::Formatted(format) => format.format(*value),
                }))
            }
            (Self::TextToMonth, CellValue::Text(raw)) => parse_month(raw)
                .and_then(month_datetime)
                .map(CellValue::DateTime)
                .ok_or_else(|| self.error(raw, "not a month")),
            (Self::TextToDay, CellValue::Text(raw)) => parse_weekday(raw)
                .and_then(weekday_datetime)
                .map(CellValue::DateTime)
                .ok_or_else(|| self.error(raw, "not a day of the week")),
            (Self::TextToDateTime { preferred }, CellValue::Text(raw)) => {
                parse_datetime(raw, preferred.as_deref())
                    .map(CellValue::DateTime)
                    .ok_or_else(|| self.error(raw, "not a recognized date/time"))
            }
            (Self::DateTimeToText { format }, CellValue::DateTime(value)) => {
                Ok(CellValue::Text(format_datetime(value, format)))
            }
            (Self::NumericToMonth, CellValue::Numeric(value)) => whole_number(*value, 1, 12)
                .and_then(month_datetime)
                .map(CellValue::DateTime)
                .ok_or_else(|| self.error(&format_round_trip(*value), "expected 1-12")),
            (Self::NumericToDay, CellValue::Numeric(value)) => whole_number(*value, 1, 7)
                .and_then(weekday_datetime)
                .map(CellValue::DateTime)
                .ok_or_else(|| self.error(&format_round_trip(*value), "expected 1-7")),
            (Self::NumericToDateTime, CellValue::Numeric(value)) => julian_to_datetime(*value)
                .map(CellValue::DateTime)
                .ok_or_else(|| self.error(&format_round_trip(*value), "out of range")),
            (Self::MonthToNumeric, CellValue::DateTime(value)) => {
                Ok(CellValue::Numeric(f64::from(value.month())))
            }
            (Self::DayToNumeric, CellValue::DateTime(value)) => Ok(CellValue::Numeric(f64::from(
                value.weekday().number_from_monday(),
            ))),
            (Self::DateTimeToNumeric, CellValue::DateTime(value)) => {
                Ok(CellValue::Numeric(datetime_to_julian(value)))
            }
            (_, other) => Err(FilterError {
                filter: self.name(),
                input: describe(other),
                reason: "unexpected payload type",
            }),
        }
    }

    fn error(&self, input: &str, reason: &'static str) -> FilterError {
        FilterError {
            filter: self.name(),
            input: input.to_string(),
            reason,
        }
    }
}

/// Linear sequence of filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterChain {
    stages: Vec<Filter>,
}

impl FilterChain {
    pub fn new(stages: Vec<Filter>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Filter] {
        &self.stages
    }

    pub fn is_identity(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn apply(&self, input: &CellValue) -> Result<CellValue, FilterError> {
        let mut current = input.clone();
        for stage in &self.stages {
            current = stage.apply(&current)?;
        }
        Ok(current)
    }

    /// Raw text to the payload type of `mode`.
    pub fn input(mode: ColumnMode, datetime_format: &str) -> Self {
        Self::new(match mode {
            ColumnMode::Numeric => vec![Filter::TextToNumeric],
            ColumnMode::Text => vec![],
            ColumnMode::Month => vec![Filter::TextToMonth],
            ColumnMode::Day => vec![Filter::TextToDay],
            ColumnMode::DateTime => vec![Filter::TextToDateTime {
                preferred: Some(datetime_format.to_string()),
            }],
        })
    }

    /// Payload of `mode` to display text.
    pub fn output(mode: ColumnMode, numeric: NumericFormat, datetime_format: &str) -> Self {
        Self::new(match mode.data_type() {
            DataType::Numeric => vec![Filter::NumericToText(NumberStyle::Formatted(numeric))],
            DataType::Text => vec![],
            DataType::DateTime => vec![Filter::DateTimeToText {
                format: datetime_format.to_string(),
            }],
        })
    }

    /// Payload of `from` to payload of `to`, used by mode changes.
    ///
    /// `datetime_format` is the display format of the source column; date
    /// values turned into text read the way the user saw them.
    pub fn conversion(from: ColumnMode, to: ColumnMode, datetime_format: &str) -> Self {
        let stages = match (from.data_type(), to.data_type()) {
            (source, target) if source == target => vec![],
            (DataType::Numeric, DataType::Text) => {
                vec![Filter::NumericToText(NumberStyle::RoundTrip)]
            }
            (DataType::Numeric, DataType::DateTime) => vec![match to {
                ColumnMode::Month => Filter::NumericToMonth,
                ColumnMode::Day => Filter::NumericToDay,
                _ => Filter::NumericToDateTime,
            }],
            (DataType::Text, _) => {
                return Self::input(to, to.default_datetime_format());
            }
            (DataType::DateTime, DataType::Text) => vec![Filter::DateTimeToText {
                format: datetime_format.to_string(),
            }],
            (DataType::DateTime, DataType::Numeric) => vec![match from {
                ColumnMode::Month => Filter::MonthToNumeric,
                ColumnMode::Day => Filter::DayToNumeric,
                _ => Filter::DateTimeToNumeric,
            }],
            _ => vec![],
        };
        Self::new(stages)
    }

    /// Applies the chain and returns the text form of the result.
    pub fn display(&self, input: &CellValue) -> String {
        match self.apply(input) {
            Ok(CellValue::Text(text)) => text,
            Ok(CellValue::Numeric(value)) => format_round_trip(value),
            Ok(CellValue::DateTime(value)) => format_datetime(&value, ISO_DATETIME_FORMAT),
            Err(_) => String::new(),
        }
    }
}

/// Shortest decimal text that parses back to the identical value.
pub fn format_round_trip(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    let magnitude = value.abs();
    if magnitude == 0.0 || magnitude.is_infinite() || (1e-5..1e16).contains(&magnitude) {
        value.to_string()
    } else {
        format!("{value:e}")
    }
}

/// Formats with a strftime-style pattern, falling back to ISO when the
/// pattern cannot render this value.
pub fn format_datetime(value: &NaiveDateTime, format: &str) -> String {
    let mut rendered = String::new();
    if write!(rendered, "{}", value.format(format)).is_ok() {
        return rendered;
    }
    value.format(ISO_DATETIME_FORMAT).to_string()
}

pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

fn parse_month(raw: &str) -> Option<u32> {
    let normalized = raw.trim().to_lowercase();
    if let Ok(number) = normalized.parse::<u32>() {
        return (1..=12).contains(&number).then_some(number);
    }
    lookup_name(&MONTH_NAMES, &normalized)
}

fn parse_weekday(raw: &str) -> Option<u32> {
    let normalized = raw.trim().to_lowercase();
    if let Ok(number) = normalized.parse::<u32>() {
        return (1..=7).contains(&number).then_some(number);
    }
    lookup_name(&DAY_NAMES, &normalized)
}

/// Full name or three-letter abbreviation, 1-based.
fn lookup_name(names: &[&str], normalized: &str) -> Option<u32> {
    if normalized.chars().count() < 3 {
        return None;
    }
    names
        .iter()
        .position(|name| *name == normalized || (normalized.len() == 3 && name.starts_with(normalized)))
        .and_then(|index| u32::try_from(index + 1).ok())
}

fn month_datetime(month: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1900, month, 1).and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// 1900-01-01 was a Monday, so weekday `n` is 1900-01-`n`.
fn weekday_datetime(day: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1900, 1, day).and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn whole_number(value: f64, min: u32, max: u32) -> Option<u32> {
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    let candidate = value as i64;
    let candidate = u32::try_from(candidate).ok()?;
    (min..=max).contains(&candidate).then_some(candidate)
}

pub fn parse_datetime(raw: &str, preferred: Option<&str>) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let preferred = preferred.into_iter();
    for format in preferred.clone().chain(DATETIME_INPUT_FORMATS.iter().copied()) {
        if let Ok(value) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(value);
        }
    }
    for format in preferred.clone().chain(DATE_INPUT_FORMATS.iter().copied()) {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    for format in preferred.chain(TIME_INPUT_FORMATS.iter().copied()) {
        if let Ok(time) = NaiveTime::parse_from_str(trimmed, format) {
            return NaiveDate::from_ymd_opt(1900, 1, 1).map(|date| date.and_time(time));
        }
    }
    None
}

fn datetime_to_julian(value: &NaiveDateTime) -> f64 {
    let day = i64::from(value.date().num_days_from_ce()) + JULIAN_DAY_OFFSET;
    let time = value.time();
    let seconds =
        f64::from(time.num_seconds_from_midnight()) + f64::from(time.nanosecond()) / 1e9;
    day as f64 + seconds / SECONDS_PER_DAY
}

fn julian_to_datetime(value: f64) -> Option<NaiveDateTime> {
    if !value.is_finite() {
        return None;
    }
    let mut day = value.floor();
    let mut millis = ((value - day) * MILLIS_PER_DAY).round();
    if millis >= MILLIS_PER_DAY {
        day += 1.0;
        millis -= MILLIS_PER_DAY;
    }
    if day.abs() > f64::from(i32::MAX) {
        return None;
    }
    let days_from_ce = i32::try_from((day as i64).checked_sub(JULIAN_DAY_OFFSET)?).ok()?;
    let date = NaiveDate::from_num_days_from_ce_opt(days_from_ce)?;
    let millis = millis as u32;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        millis / 1000,
        (millis % 1000) * 1_000_000,
    )?;
    Some(date.and_time(time))
}

fn describe(value: &CellValue) -> String {
    match value {
        CellValue::Numeric(number) => format_round_trip(*number),
        CellValue::Text(text) => text.clone(),
        CellValue::DateTime(datetime) => format_datetime(datetime, ISO_DATETIME_FORMAT),
    }
}
