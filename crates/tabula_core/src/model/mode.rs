//! Column modes, storage types, plot designations and display formats.
//!
//! # Invariants
//! - Every `ColumnMode` maps to exactly one `DataType`.
//! - Wire names (`as_str`) are stable; they are persisted in project files.

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

/// Value semantics of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnMode {
    /// Floating point numbers.
    Numeric,
    /// Free text.
    Text,
    /// Month of year, stored as a date-time in 1900.
    Month,
    /// Day of week, stored as a date-time in the first week of 1900.
    Day,
    /// Full date and time.
    DateTime,
}

impl ColumnMode {
    pub const ALL: [ColumnMode; 5] = [
        ColumnMode::Numeric,
        ColumnMode::Text,
        ColumnMode::Month,
        ColumnMode::Day,
        ColumnMode::DateTime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "Numeric",
            Self::Text => "Text",
            Self::Month => "Month",
            Self::Day => "Day",
            Self::DateTime => "DateTime",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == value.trim())
    }

    /// Storage variant used by columns in this mode.
    pub fn data_type(self) -> DataType {
        match self {
            Self::Numeric => DataType::Numeric,
            Self::Text => DataType::Text,
            Self::Month | Self::Day | Self::DateTime => DataType::DateTime,
        }
    }

    /// Display format a column gets when it switches into this mode.
    pub fn default_datetime_format(self) -> &'static str {
        match self {
            Self::Month => "%B",
            Self::Day => "%A",
            _ => DEFAULT_DATETIME_FORMAT,
        }
    }
}

/// Default display format for date-time cells.
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Physical cell payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Numeric,
    Text,
    DateTime,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "Numeric",
            Self::Text => "Text",
            Self::DateTime => "DateTime",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Numeric" => Some(Self::Numeric),
            "Text" => Some(Self::Text),
            "DateTime" => Some(Self::DateTime),
            _ => None,
        }
    }
}

/// Role a column plays for the plotting layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlotDesignation {
    #[default]
    None,
    X,
    Y,
    Z,
    XError,
    YError,
}

impl PlotDesignation {
    pub const ALL: [PlotDesignation; 6] = [
        PlotDesignation::None,
        PlotDesignation::X,
        PlotDesignation::Y,
        PlotDesignation::Z,
        PlotDesignation::XError,
        PlotDesignation::YError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::X => "X",
            Self::Y => "Y",
            Self::Z => "Z",
            Self::XError => "xErr",
            Self::YError => "yErr",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|designation| designation.as_str() == value.trim())
    }
}

/// printf-style notation used when rendering numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Notation {
    /// `f`: fixed number of decimals.
    Decimal,
    /// `e`: mantissa and exponent.
    Scientific,
    /// `g`: the shorter of the two, trailing zeros removed.
    Automatic,
}

impl Notation {
    pub fn as_char(self) -> char {
        match self {
            Self::Decimal => 'f',
            Self::Scientific => 'e',
            Self::Automatic => 'g',
        }
    }

    pub fn from_char(value: char) -> Option<Self> {
        match value.to_ascii_lowercase() {
            'f' => Some(Self::Decimal),
            'e' => Some(Self::Scientific),
            'g' => Some(Self::Automatic),
            _ => None,
        }
    }
}

/// Largest digit count accepted for numeric display formats.
pub const MAX_NUMERIC_DIGITS: u8 = 16;

/// Display format for numeric cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumericFormat {
    pub notation: Notation,
    /// Decimals for `f`/`e`, significant digits for `g`.
    pub digits: u8,
}

impl Default for NumericFormat {
    fn default() -> Self {
        Self {
            notation: Notation::Automatic,
            digits: 6,
        }
    }
}

impl NumericFormat {
    pub fn new(notation: Notation, digits: u8) -> Self {
        Self {
            notation,
            digits: digits.min(MAX_NUMERIC_DIGITS),
        }
    }

    /// Renders `value` the way C's `printf` would for this notation.
    pub fn format(&self, value: f64) -> String {
        if value.is_nan() {
            return "nan".to_string();
        }
        if value.is_infinite() {
            return if value > 0.0 { "inf" } else { "-inf" }.to_string();
        }
        let digits = usize::from(self.digits);
        match self.notation {
            Notation::Decimal => format!("{value:.digits$}"),
            Notation::Scientific => scientific(value, digits),
            Notation::Automatic => automatic(value, digits.max(1)),
        }
    }
}

fn scientific(value: f64, decimals: usize) -> String {
    let raw = format!("{value:.decimals$e}");
    let Some((mantissa, exponent)) = raw.split_once('e') else {
        return raw;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}

fn automatic(value: f64, precision: usize) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let exponent = value.abs().log10().floor() as i32;
    let precision_i32 = i32::try_from(precision).unwrap_or(i32::MAX);
    if exponent < -4 || exponent >= precision_i32 {
        let rendered = scientific(value, precision - 1);
        match rendered.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{exp}", strip_trailing_zeros(mantissa)),
            None => rendered,
        }
    } else {
        let decimals = usize::try_from(precision_i32 - 1 - exponent).unwrap_or(0);
        strip_trailing_zeros(&format!("{value:.decimals$}")).to_string()
    }
}

fn strip_trailing_zeros(value: &str) -> &str {
    if !value.contains('.') {
        return value;
    }
    value.trim_end_matches('0').trim_end_matches('.')
}

/// Returns whether `format` is a usable strftime-style pattern.
pub fn is_valid_datetime_format(format: &str) -> bool {
    !format.trim().is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

#[cfg(test)]
mod tests {
    use super::{is_valid_datetime_format, ColumnMode, DataType, Notation, NumericFormat};

    #[test]
    fn modes_map_to_storage_types() {
        assert_eq!(ColumnMode::Numeric.data_type(), DataType::Numeric);
        assert_eq!(ColumnMode::Text.data_type(), DataType::Text);
        assert_eq!(ColumnMode::Month.data_type(), DataType::DateTime);
        assert_eq!(ColumnMode::Day.data_type(), DataType::DateTime);
        assert_eq!(ColumnMode::parse(" DateTime "), Some(ColumnMode::DateTime));
        assert_eq!(ColumnMode::parse("numeric"), None);
    }

    #[test]
    fn numeric_format_follows_printf_conventions() {
        let fixed = NumericFormat::new(Notation::Decimal, 2);
        assert_eq!(fixed.format(3.14159), "3.14");

        let sci = NumericFormat::new(Notation::Scientific, 3);
        assert_eq!(sci.format(1234.56), "1.235e+03");
        assert_eq!(sci.format(0.00012), "1.200e-04");

        let auto = NumericFormat::default();
        assert_eq!(auto.format(1.5), "1.5");
        assert_eq!(auto.format(1234567.0), "1.23457e+06");
        assert_eq!(auto.format(0.001), "0.001");
        assert_eq!(auto.format(0.0), "0");
        assert_eq!(auto.format(f64::NAN), "nan");
    }

    #[test]
    fn rejects_broken_datetime_patterns() {
        assert!(is_valid_datetime_format("%Y-%m-%d"));
        assert!(!is_valid_datetime_format("%Q"));
        assert!(!is_valid_datetime_format("  "));
    }
}
