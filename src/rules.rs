use crate::error::{Result, RollupError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    #[schemars(description = "Live client work with budgets, actuals and overage")]
    Live,

    #[schemars(description = "New business pipeline: forecast value and win probability")]
    Newbiz,

    #[schemars(description = "Internal, non-billable time")]
    Internal,

    #[schemars(description = "Rows excluded from every aggregate")]
    Unknown,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Segment::Live => "live",
            Segment::Newbiz => "newbiz",
            Segment::Internal => "internal",
            Segment::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CategoryRule {
    #[schemars(description = "Category assigned when this rule matches")]
    pub category: String,

    #[schemars(description = "Segment the category belongs to")]
    pub segment: Segment,

    #[serde(default)]
    #[schemars(description = "Workflow status values matched exactly (case-insensitive)")]
    pub statuses: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Substrings matched against the origin sheet name (case-insensitive)")]
    pub sheet_patterns: Vec<String>,
}

impl CategoryRule {
    pub fn by_status(category: &str, segment: Segment, statuses: &[&str]) -> Self {
        Self {
            category: category.to_string(),
            segment,
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            sheet_patterns: Vec::new(),
        }
    }

    pub fn by_sheet(category: &str, segment: Segment, patterns: &[&str]) -> Self {
        Self {
            category: category.to_string(),
            segment,
            statuses: Vec::new(),
            sheet_patterns: patterns.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn matches(&self, status: Option<&str>, sheet: Option<&str>) -> bool {
        let status_hit = status
            .map(fold_case)
            .filter(|s| !s.is_empty())
            .map(|s| self.statuses.iter().any(|rule| fold_case(rule) == s))
            .unwrap_or(false);

        if status_hit {
            return true;
        }

        sheet
            .map(fold_case)
            .map(|sheet| {
                self.sheet_patterns
                    .iter()
                    .any(|pattern| sheet.contains(&fold_case(pattern)))
            })
            .unwrap_or(false)
    }
}

/// Case folding shared by the status and sheet matchers.
fn fold_case(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Ordered classification rules. The first matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuleTable {
    pub rules: Vec<CategoryRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<CategoryRule>) -> Result<Self> {
        let table = Self { rules };
        table.validate()?;
        Ok(table)
    }

    pub fn classify_category(&self, workflow_status: Option<&str>, origin_sheet: Option<&str>) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matches(workflow_status, origin_sheet))
            .map(|rule| rule.category.as_str())
            .unwrap_or(UNCATEGORIZED)
    }

    pub fn segment_of(&self, category: &str) -> Segment {
        if category == UNCATEGORIZED {
            return Segment::Unknown;
        }

        self.rules
            .iter()
            .find(|rule| rule.category == category)
            .map(|rule| rule.segment)
            .unwrap_or(Segment::Unknown)
    }

    /// Categories in first-appearance order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if !seen.contains(&rule.category.as_str()) {
                seen.push(rule.category.as_str());
            }
        }
        seen
    }

    pub fn validate(&self) -> Result<()> {
        let mut segments: BTreeMap<&str, Segment> = BTreeMap::new();

        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.category.trim().is_empty() {
                return Err(RollupError::InvalidRuleTable(format!(
                    "Rule #{} has an empty category",
                    idx
                )));
            }

            if rule.category == UNCATEGORIZED {
                return Err(RollupError::InvalidRuleTable(format!(
                    "Rule #{} claims the reserved category '{}'",
                    idx, UNCATEGORIZED
                )));
            }

            let has_status = rule.statuses.iter().any(|s| !s.trim().is_empty());
            let has_sheet = rule.sheet_patterns.iter().any(|p| !p.trim().is_empty());
            if !has_status && !has_sheet {
                return Err(RollupError::InvalidRuleTable(format!(
                    "Rule #{} ('{}') has neither statuses nor sheet patterns",
                    idx, rule.category
                )));
            }

            if rule.sheet_patterns.iter().any(|p| p.trim().is_empty()) {
                return Err(RollupError::InvalidRuleTable(format!(
                    "Rule #{} ('{}') has an empty sheet pattern, which would match every sheet",
                    idx, rule.category
                )));
            }

            match segments.get(rule.category.as_str()) {
                Some(existing) if *existing != rule.segment => {
                    return Err(RollupError::InvalidRuleTable(format!(
                        "Category '{}' is mapped to both {} and {}",
                        rule.category, existing, rule.segment
                    )));
                }
                _ => {
                    segments.insert(rule.category.as_str(), rule.segment);
                }
            }
        }

        Ok(())
    }

    /// Rules for the main project tracker.
    pub fn project_defaults() -> Self {
        Self {
            rules: vec![
                CategoryRule::by_status(
                    "Active Live Projects",
                    Segment::Live,
                    &[
                        "Active",
                        "Active Climate",
                        "Active Retainer",
                        "In Progress",
                        "In Production",
                        "Kick Off",
                        "On Hold",
                    ],
                ),
                CategoryRule::by_status(
                    "Closing Live Projects",
                    Segment::Live,
                    &["Closing", "In Closeout", "Final Billing"],
                ),
                CategoryRule::by_status(
                    "New Business Pipeline",
                    Segment::Newbiz,
                    &[
                        "Pipeline",
                        "Qualifying",
                        "Proposal",
                        "SOW Out",
                        "Negotiation",
                        "Verbal Win",
                    ],
                ),
                CategoryRule::by_status(
                    "Internal Admin Time",
                    Segment::Internal,
                    &["Internal", "Admin", "Non-Billable"],
                ),
                CategoryRule::by_sheet(
                    "New Business Pipeline",
                    Segment::Newbiz,
                    &["new business", "pipeline"],
                ),
                CategoryRule::by_sheet("Internal Admin Time", Segment::Internal, &["internal", "admin"]),
                CategoryRule::by_sheet(
                    "Active Live Projects",
                    Segment::Live,
                    &["live projects", "active projects"],
                ),
            ],
        }
    }

    /// Rules for the team utilization report.
    pub fn utilization_defaults() -> Self {
        Self {
            rules: vec![CategoryRule::by_sheet(
                "Team Utilization",
                Segment::Internal,
                &["utilization", "timesheet"],
            )],
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RagStatus {
    Green,
    Yellow,
    Red,
    Blue,
    Unknown,
}

impl fmt::Display for RagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RagStatus::Green => "green",
            RagStatus::Yellow => "yellow",
            RagStatus::Red => "red",
            RagStatus::Blue => "blue",
            RagStatus::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StatusKeywords {
    pub green: Vec<String>,
    pub yellow: Vec<String>,
    pub red: Vec<String>,
    pub blue: Vec<String>,
}

impl Default for StatusKeywords {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            green: words(&["green", "on track"]),
            yellow: words(&["yellow", "amber", "at risk"]),
            red: words(&["red", "off track"]),
            blue: words(&["blue", "complete", "completed"]),
        }
    }
}

impl StatusKeywords {
    pub fn classify_status(&self, rag_value: Option<&str>) -> RagStatus {
        let Some(value) = rag_value.map(str::trim).filter(|v| !v.is_empty()) else {
            return RagStatus::Unknown;
        };

        let hit = |list: &[String]| list.iter().any(|k| k.eq_ignore_ascii_case(value));

        if hit(&self.green) {
            RagStatus::Green
        } else if hit(&self.yellow) {
            RagStatus::Yellow
        } else if hit(&self.red) {
            RagStatus::Red
        } else if hit(&self.blue) {
            RagStatus::Blue
        } else {
            RagStatus::Unknown
        }
    }
}
