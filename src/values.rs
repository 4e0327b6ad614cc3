//! Lenient parsers for spreadsheet cell values.
//!
//! Spreadsheet exports mix numbers, locale-formatted strings and placeholder
//! text in the same column. Nothing in here returns an error: unparseable
//! currency degrades to `0.0` and unparseable percentages to `None`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Display text used for amounts that have no tracking data yet.
pub const NO_TRACKING: &str = "No Tracking";

/// Exact (pre-strip, case-sensitive) strings that `parse_currency` maps to zero.
const CURRENCY_SENTINELS: [&str; 3] = [NO_TRACKING, "-", "N/A"];

/// Lowercase trimmed strings that mark a value as untracked.
const UNTRACKED_MARKERS: [&str; 4] = ["no tracking", "", "-", "n/a"];

/// A single cell as delivered by the spreadsheet API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    Text(String),
    #[default]
    Null,
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Trimmed textual form of the cell, `None` for null or blank cells.
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            CellValue::Null => return None,
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.trim().to_string(),
        };

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn round_one_decimal(value: f64) -> f64 {
    finite_or_zero((value * 10.0).round() / 10.0)
}

/// Parses a currency cell: `"$1,234.56"`, `"(500)"`, `"-$200"`, `1234.5`.
pub fn parse_currency(value: &CellValue) -> f64 {
    match value {
        CellValue::Null | CellValue::Bool(_) => 0.0,
        CellValue::Number(n) => finite_or_zero(*n),
        CellValue::Text(text) => parse_currency_str(text),
    }
}

pub fn parse_currency_str(text: &str) -> f64 {
    if CURRENCY_SENTINELS.contains(&text) {
        return 0.0;
    }

    let cleaned: String = text
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return 0.0;
    }

    let (negative, digits) = if let Some(inner) = cleaned
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        (true, inner)
    } else if let Some(rest) = cleaned.strip_prefix('-') {
        (true, rest)
    } else {
        (false, cleaned.as_str())
    };

    match digits.parse::<f64>() {
        Ok(n) if n.is_finite() => {
            if negative {
                -n
            } else {
                n
            }
        }
        _ => 0.0,
    }
}

/// True when `text` looks like a currency amount rather than a label.
pub fn is_currency_shaped(text: &str) -> bool {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '(' | ')') && !c.is_whitespace())
        .collect();
    !cleaned.is_empty() && cleaned.parse::<f64>().map(|n| n.is_finite()).unwrap_or(false)
}

/// Parses a percentage cell into whole-number percent.
///
/// Numbers strictly between 0 and 1 are treated as fractions (`0.42` is 42%).
/// Text with an explicit `%` sign is taken literally; bare numeric text
/// follows the numeric rule. Null, blank and untracked markers give `None`.
pub fn parse_percent(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Null | CellValue::Bool(_) => None,
        CellValue::Number(n) => scale_percent(*n),
        CellValue::Text(text) => {
            if !is_tracked_str(text) {
                return None;
            }

            let explicit = text.contains('%');
            let cleaned: String = text
                .chars()
                .filter(|c| *c != '%' && !c.is_whitespace())
                .collect();
            let parsed = cleaned.parse::<f64>().ok().filter(|n| n.is_finite())?;

            if explicit {
                Some(parsed)
            } else {
                scale_percent(parsed)
            }
        }
    }
}

fn scale_percent(n: f64) -> Option<f64> {
    if !n.is_finite() {
        None
    } else if n > 0.0 && n < 1.0 {
        Some(n * 100.0)
    } else {
        Some(n)
    }
}

/// True when a text cell ends in `%` or a number is a fraction in `0..=1`.
///
/// Whole numbers are left out: in a mixed row they are usually counts.
pub fn is_percent_shaped(value: &CellValue) -> bool {
    match value {
        CellValue::Number(n) => (0.0..=1.0).contains(n),
        CellValue::Text(text) => text.trim().ends_with('%') && parse_percent(value).is_some(),
        _ => false,
    }
}

pub fn is_tracked(value: &CellValue) -> bool {
    match value {
        CellValue::Null => false,
        CellValue::Bool(_) | CellValue::Number(_) => true,
        CellValue::Text(text) => is_tracked_str(text),
    }
}

fn is_tracked_str(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    !UNTRACKED_MARKERS.contains(&normalized.as_str())
}

/// A currency amount that is either tracked (possibly zero) or not tracked yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amount {
    Tracked(f64),
    Untracked,
}

impl Amount {
    pub fn from_cell(value: &CellValue) -> Self {
        if is_tracked(value) {
            Amount::Tracked(parse_currency(value))
        } else {
            Amount::Untracked
        }
    }

    pub fn from_optional(value: Option<&CellValue>) -> Self {
        value.map(Self::from_cell).unwrap_or(Amount::Untracked)
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, Amount::Tracked(_))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Amount::Tracked(v) => serializer.serialize_f64(finite_or_zero(*v)),
            Amount::Untracked => serializer.serialize_str(NO_TRACKING),
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let cell = CellValue::deserialize(deserializer)?;
        Ok(Amount::from_cell(&cell))
    }
}
