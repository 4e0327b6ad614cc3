//! Positional parsers for the revenue pivot and the penetration sheet.
//!
//! These sheets are laid out for humans: the first column holds a label,
//! all-caps labels open a section and `YYYY-MM` labels are month rows of
//! the current section.

use crate::normalizer::ColumnLayout;
use crate::schema::RawSource;
use crate::utils::{is_date_shaped, is_month_label};
use crate::values::{is_currency_shaped, is_percent_shaped, parse_currency, parse_percent, CellValue};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Section name for month rows that appear before any section header.
pub const UNLABELED_SECTION: &str = "UNLABELED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotMonth {
    pub month: String,
    /// Column title -> parsed currency value.
    pub values: BTreeMap<String, f64>,
}

impl PivotMonth {
    pub fn value(&self, column: &str) -> f64 {
        self.values.get(column).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotSection {
    pub name: String,
    pub months: Vec<PivotMonth>,
}

impl PivotSection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            months: Vec::new(),
        }
    }

    /// The chronologically last month; on duplicate keys the later row wins.
    pub fn latest(&self) -> Option<&PivotMonth> {
        self.months.iter().max_by(|a, b| a.month.cmp(&b.month))
    }

    /// `(month, value)` points for one column, in row order.
    pub fn series(&self, column: &str) -> Vec<(String, f64)> {
        self.months
            .iter()
            .filter(|month| month.values.contains_key(column))
            .map(|month| (month.month.clone(), month.value(column)))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenuePivot {
    pub sections: Vec<PivotSection>,
}

impl RevenuePivot {
    /// Section lookup by name, case-insensitive.
    pub fn section(&self, name: &str) -> Option<&PivotSection> {
        self.sections
            .iter()
            .find(|section| section.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }
}

/// All-caps text that is neither an amount nor a date.
pub fn is_section_header(label: &str) -> bool {
    let label = label.trim();
    label.chars().any(char::is_alphabetic)
        && label == label.to_uppercase()
        && !is_currency_shaped(label)
        && !is_date_shaped(label)
}

/// Exact (trimmed) match only, so a `REVENUE` section under a `Revenue` column survives.
fn echoes_column_title(title: &str, value: &CellValue) -> bool {
    value
        .as_text()
        .map(|text| text.trim() == title.trim())
        .unwrap_or(false)
}

pub fn parse_revenue_pivot(source: &RawSource) -> RevenuePivot {
    let mut pivot = RevenuePivot::default();
    let Some(label_column) = source.columns.first().map(|c| c.title.as_str()) else {
        warn!("Revenue pivot {} has no columns", source.label());
        return pivot;
    };

    let layout = ColumnLayout::from_source(source);
    let mut skipped_subheaders = 0usize;
    let mut ignored_rows = 0usize;

    for row in &source.rows {
        let cells = layout.titled_cells(row);

        if cells.iter().any(|(title, value)| echoes_column_title(title, value)) {
            skipped_subheaders += 1;
            continue;
        }

        let label = cells
            .iter()
            .find(|(title, _)| title == label_column)
            .and_then(|(_, value)| value.as_text());

        let Some(label) = label else {
            ignored_rows += 1;
            continue;
        };

        if is_month_label(&label) {
            let values = cells
                .iter()
                .filter(|(title, value)| title != label_column && !value.is_null())
                .map(|(title, value)| (title.clone(), parse_currency(value)))
                .collect();

            if pivot.sections.is_empty() {
                pivot.sections.push(PivotSection::new(UNLABELED_SECTION));
            }
            if let Some(section) = pivot.sections.last_mut() {
                section.months.push(PivotMonth {
                    month: label.trim().to_string(),
                    values,
                });
            }
        } else if is_section_header(&label) {
            pivot.sections.push(PivotSection::new(label.trim()));
        } else {
            ignored_rows += 1;
        }
    }

    debug!(
        "Parsed revenue pivot {}: sections {:?}, {} sub-headers skipped, {} rows ignored",
        source.label(),
        pivot.section_names(),
        skipped_subheaders,
        ignored_rows
    );

    pivot
}

/// Department -> penetration percent.
///
/// A row belongs to a department when any of its cells mentions the
/// department name; its first percent-shaped cell is the rate. Departments
/// with no matching row are left out.
pub fn parse_penetration(source: &RawSource, departments: &[String]) -> BTreeMap<String, f64> {
    let layout = ColumnLayout::from_source(source);
    let mut rates = BTreeMap::new();

    for row in &source.rows {
        let cells = layout.titled_cells(row);
        let texts: Vec<String> = cells
            .iter()
            .filter_map(|(_, value)| value.as_text())
            .map(|text| text.to_lowercase())
            .collect();

        for department in departments {
            if rates.contains_key(department) {
                continue;
            }

            let needle = department.trim().to_lowercase();
            if needle.is_empty() || !texts.iter().any(|text| text.contains(&needle)) {
                continue;
            }

            let rate = cells
                .iter()
                .map(|(_, value)| value)
                .find(|value| is_percent_shaped(value))
                .and_then(parse_percent);

            if let Some(rate) = rate {
                rates.insert(department.clone(), rate);
            }
        }
    }

    for department in departments {
        if !rates.contains_key(department) {
            warn!(
                "No penetration rate found for department '{}' in {}",
                department,
                source.label()
            );
        }
    }

    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SourceCell, SourceColumn, SourceRow};

    fn source(titles: &[&str], rows: &[&[&str]]) -> RawSource {
        RawSource {
            name: Some("Revenue Pivot".to_string()),
            columns: titles
                .iter()
                .enumerate()
                .map(|(idx, title)| SourceColumn {
                    id: Some(idx as u64 + 1),
                    virtual_id: None,
                    title: title.to_string(),
                })
                .collect(),
            rows: rows
                .iter()
                .map(|cells| SourceRow {
                    cells: cells
                        .iter()
                        .enumerate()
                        .filter(|(_, text)| !text.is_empty())
                        .map(|(idx, text)| SourceCell {
                            column_id: Some(idx as u64 + 1),
                            display_value: Some(text.to_string()),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_section_headers() {
        assert!(is_section_header("REVENUE"));
        assert!(is_section_header("GROSS MARGIN"));
        assert!(!is_section_header("Revenue"));
        assert!(!is_section_header("$1,000"));
        assert!(!is_section_header("2024-01"));
        assert!(!is_section_header("123"));
        assert!(!is_section_header(""));
    }

    #[test]
    fn test_parse_multi_section_pivot() {
        let raw = source(
            &["Month", "Experiences", "Delivery"],
            &[
                &["REVENUE", "", ""],
                &["Month", "Experiences", "Delivery"],
                &["2024-01", "$10,000", "$30,000"],
                &["2024-02", "$12,000", "$28,000"],
                &["Notes: preliminary", "", ""],
                &["HEADCOUNT", "", ""],
                &["2024-02", "4", "9"],
            ],
        );

        let pivot = parse_revenue_pivot(&raw);
        assert_eq!(pivot.section_names(), vec!["REVENUE", "HEADCOUNT"]);

        let revenue = pivot.section("revenue").unwrap();
        assert_eq!(revenue.months.len(), 2);
        let latest = revenue.latest().unwrap();
        assert_eq!(latest.month, "2024-02");
        assert_eq!(latest.value("Experiences"), 12000.0);
        assert_eq!(latest.value("Delivery"), 28000.0);
        assert_eq!(
            revenue.series("Experiences"),
            vec![("2024-01".to_string(), 10000.0), ("2024-02".to_string(), 12000.0)]
        );

        assert_eq!(pivot.section("HEADCOUNT").unwrap().months[0].value("Delivery"), 9.0);
    }

    #[test]
    fn test_months_before_header_are_unlabeled() {
        let raw = source(
            &["Month", "Delivery"],
            &[&["2023-12", "$1,000"], &["REVENUE", ""], &["2024-01", "$2,000"]],
        );

        let pivot = parse_revenue_pivot(&raw);
        assert_eq!(pivot.section_names(), vec![UNLABELED_SECTION, "REVENUE"]);
        assert_eq!(pivot.sections[0].months[0].value("Delivery"), 1000.0);
    }

    #[test]
    fn test_latest_uses_chronology_not_row_order() {
        let raw = source(
            &["Month", "Delivery"],
            &[
                &["REVENUE", ""],
                &["2024-03", "$3"],
                &["2024-01", "$1"],
                &["2024-02", "$2"],
            ],
        );

        let pivot = parse_revenue_pivot(&raw);
        assert_eq!(pivot.section("REVENUE").unwrap().latest().unwrap().month, "2024-03");
    }

    #[test]
    fn test_parse_penetration_by_label() {
        let raw = source(
            &["Department", "Clients", "Penetration"],
            &[
                &["Department", "Clients", "Penetration"],
                &["Experiences team", "12", "45%"],
                &["Delivery", "n/a", "62.5%"],
            ],
        );
        let departments = vec!["Experiences".to_string(), "Delivery".to_string()];

        let rates = parse_penetration(&raw, &departments);
        assert_eq!(rates.get("Experiences"), Some(&45.0));
        assert_eq!(rates.get("Delivery"), Some(&62.5));
    }

    #[test]
    fn test_penetration_has_no_positional_fallback() {
        let raw = source(&["Label", "A", "B"], &[&["Overall", "40%", "60%"]]);
        let departments = vec!["Experiences".to_string(), "Delivery".to_string()];
        assert!(parse_penetration(&raw, &departments).is_empty());
    }

    #[test]
    fn test_section_header_matching_label_title_in_other_case() {
        let raw = source(
            &["Revenue", "Experiences", "Delivery"],
            &[&["REVENUE", "", ""], &["2024-01", "$10", "$30"]],
        );

        let pivot = parse_revenue_pivot(&raw);
        assert_eq!(pivot.section_names(), vec!["REVENUE"]);
        assert_eq!(pivot.section("REVENUE").unwrap().months[0].value("Delivery"), 30.0);
    }

    #[test]
    fn test_penetration_skips_numeric_counts() {
        let mut raw = source(&["Department", "Accounts", "Penetration"], &[]);
        raw.rows = vec![SourceRow {
            cells: vec![
                SourceCell {
                    column_id: Some(1),
                    value: Some(CellValue::Text("Experiences".to_string())),
                    ..Default::default()
                },
                SourceCell {
                    column_id: Some(2),
                    value: Some(CellValue::Number(14.0)),
                    ..Default::default()
                },
                SourceCell {
                    column_id: Some(3),
                    value: Some(CellValue::Number(0.35)),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }];

        let rates = parse_penetration(&raw, &["Experiences".to_string()]);
        assert!((rates["Experiences"] - 35.0).abs() < 1e-9);
    }
}
