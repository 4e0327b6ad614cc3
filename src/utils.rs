use crate::error::{Result, RollupError};
use chrono::NaiveDate;

/// Parses a "YYYY-MM" key into the first day of that month.
pub fn parse_month_key(key: &str) -> Result<NaiveDate> {
    let trimmed = key.trim();
    if !has_month_key_shape(trimmed) {
        return Err(RollupError::DateError(format!(
            "Invalid month key: {}. Expected YYYY-MM",
            key
        )));
    }

    NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d").map_err(|_| {
        RollupError::DateError(format!("Invalid month key: {}. Expected YYYY-MM", key))
    })
}

fn has_month_key_shape(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[5..].iter().all(u8::is_ascii_digit)
}

/// True for labels such as "2024-03".
pub fn is_month_label(text: &str) -> bool {
    parse_month_key(text).is_ok()
}

/// True for anything that reads as a calendar date or month.
pub fn is_date_shaped(text: &str) -> bool {
    let trimmed = text.trim();
    if is_month_label(trimmed) {
        return true;
    }

    ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%d-%b-%Y"]
        .iter()
        .any(|format| NaiveDate::parse_from_str(trimmed, format).is_ok())
}

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
