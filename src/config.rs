use crate::error::{Result, RollupError};
use crate::rules::{RuleTable, Segment, StatusKeywords};
use crate::schema::KnownField;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// What a grouping dimension is keyed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionKey {
    #[schemars(description = "Group by the value of a normalized field (e.g. 'client_name')")]
    Field { field: String },

    #[schemars(description = "Group by the category assigned by the rule table")]
    Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Budget,
    Projects,
    PipelineValue,
    WeightedValue,
    BillableHours,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DimensionSpec {
    #[schemars(description = "Output key of the breakdown, e.g. 'by_client'")]
    pub name: String,

    pub key: DimensionKey,

    #[serde(default)]
    #[schemars(
        description = "If true the value is a comma-separated list and every token is counted on its own"
    )]
    pub multi_valued: bool,

    #[schemars(description = "Descending sort key of the projected array")]
    pub sort_by: SortKey,
}

impl DimensionSpec {
    pub fn field(name: &str, field: KnownField, sort_by: SortKey) -> Self {
        Self {
            name: name.to_string(),
            key: DimensionKey::Field {
                field: field.as_str().to_string(),
            },
            multi_valued: false,
            sort_by,
        }
    }

    pub fn category(name: &str, sort_by: SortKey) -> Self {
        Self {
            name: name.to_string(),
            key: DimensionKey::Category,
            multi_valued: false,
            sort_by,
        }
    }

    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }
}

/// Grouping dimensions accumulated for one segment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SegmentPlan {
    pub segment: Segment,
    pub dimensions: Vec<DimensionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DepartmentalConfig {
    #[schemars(description = "Department column titles of the revenue pivot, in display order")]
    pub departments: Vec<String>,

    #[schemars(description = "Pivot section whose latest month drives the revenue mix")]
    pub revenue_section: String,
}

impl Default for DepartmentalConfig {
    fn default() -> Self {
        Self {
            departments: vec!["Experiences".to_string(), "Delivery".to_string()],
            revenue_section: "REVENUE".to_string(),
        }
    }
}

/// Everything the engine needs to classify, fold and project rows.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    pub rules: RuleTable,

    #[serde(default)]
    pub status_keywords: StatusKeywords,

    #[schemars(description = "Column title to field name dictionary")]
    pub columns: BTreeMap<String, String>,

    pub segments: Vec<SegmentPlan>,

    #[serde(default)]
    #[schemars(description = "Pipeline stages in funnel order")]
    pub funnel_stages: Vec<String>,

    #[serde(default = "default_funnel_dimension")]
    pub funnel_dimension: String,

    #[serde(default)]
    #[schemars(description = "Newbiz dimensions that are also reported as plain project counts")]
    pub count_dimensions: Vec<String>,

    #[serde(default = "default_unassigned_label")]
    pub unassigned_label: String,

    #[serde(default)]
    pub departmental: DepartmentalConfig,
}

fn default_funnel_dimension() -> String {
    "by_stage".to_string()
}

fn default_unassigned_label() -> String {
    "Unassigned".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules: RuleTable::project_defaults(),
            status_keywords: StatusKeywords::default(),
            columns: default_column_dictionary(),
            segments: vec![
                SegmentPlan {
                    segment: Segment::Live,
                    dimensions: vec![
                        DimensionSpec::field("by_client", KnownField::ClientName, SortKey::Budget),
                        DimensionSpec::field("by_pm", KnownField::ProjectManager, SortKey::Budget),
                        DimensionSpec::field("by_ecosystem", KnownField::Ecosystem, SortKey::Budget),
                        DimensionSpec::category("by_category", SortKey::Budget),
                        DimensionSpec::field(
                            "by_request_type",
                            KnownField::RequestType,
                            SortKey::Projects,
                        )
                        .multi_valued(),
                    ],
                },
                SegmentPlan {
                    segment: Segment::Newbiz,
                    dimensions: vec![
                        DimensionSpec::field("by_stage", KnownField::PipelineStage, SortKey::Projects),
                        DimensionSpec::field(
                            "by_ecosystem",
                            KnownField::Ecosystem,
                            SortKey::PipelineValue,
                        ),
                        DimensionSpec::field(
                            "by_recommendation",
                            KnownField::Recommendation,
                            SortKey::Projects,
                        ),
                        DimensionSpec::field("by_assignment", KnownField::AssignedTo, SortKey::Projects),
                    ],
                },
                SegmentPlan {
                    segment: Segment::Internal,
                    dimensions: vec![
                        DimensionSpec::category("by_category", SortKey::Budget),
                        DimensionSpec::field("by_pm", KnownField::ProjectManager, SortKey::Budget),
                    ],
                },
            ],
            funnel_stages: [
                "Qualifying",
                "Discovery",
                "Proposal",
                "Negotiation",
                "Verbal Win",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            funnel_dimension: default_funnel_dimension(),
            count_dimensions: vec!["by_recommendation".to_string(), "by_assignment".to_string()],
            unassigned_label: default_unassigned_label(),
            departmental: DepartmentalConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration for the team utilization report.
    pub fn utilization() -> Self {
        Self {
            rules: RuleTable::utilization_defaults(),
            segments: vec![SegmentPlan {
                segment: Segment::Internal,
                dimensions: vec![
                    DimensionSpec::field("by_department", KnownField::Department, SortKey::BillableHours),
                    DimensionSpec::field(
                        "by_team_member",
                        KnownField::TeamMember,
                        SortKey::BillableHours,
                    ),
                ],
            }],
            funnel_stages: Vec::new(),
            count_dimensions: Vec::new(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn plan_for(&self, segment: Segment) -> Option<&SegmentPlan> {
        self.segments.iter().find(|plan| plan.segment == segment)
    }

    pub fn validate(&self) -> Result<()> {
        self.rules.validate()?;

        if self.unassigned_label.trim().is_empty() {
            return Err(RollupError::InvalidConfig(
                "unassigned_label must not be empty".to_string(),
            ));
        }

        for (title, field) in &self.columns {
            if field.trim().is_empty() {
                return Err(RollupError::InvalidConfig(format!(
                    "Column '{}' maps to an empty field name",
                    title
                )));
            }
        }

        for plan in &self.segments {
            if plan.segment == Segment::Unknown {
                return Err(RollupError::InvalidConfig(
                    "The unknown segment cannot carry dimensions".to_string(),
                ));
            }

            let mut names: Vec<&str> = Vec::new();
            for dimension in &plan.dimensions {
                if names.contains(&dimension.name.as_str()) {
                    return Err(RollupError::InvalidConfig(format!(
                        "Dimension '{}' is declared twice for segment {}",
                        dimension.name, plan.segment
                    )));
                }
                names.push(dimension.name.as_str());

                if RESERVED_DIMENSION_NAMES.contains(&dimension.name.trim()) {
                    return Err(RollupError::InvalidConfig(format!(
                        "Dimension name '{}' is reserved for a summary field",
                        dimension.name
                    )));
                }

                if let DimensionKey::Field { field } = &dimension.key {
                    if field.trim().is_empty() {
                        return Err(RollupError::InvalidConfig(format!(
                            "Dimension '{}' has an empty field name",
                            dimension.name
                        )));
                    }
                }
            }
        }

        if self.segments.iter().filter(|p| p.segment == Segment::Newbiz).count() > 1
            || self.segments.iter().filter(|p| p.segment == Segment::Live).count() > 1
            || self.segments.iter().filter(|p| p.segment == Segment::Internal).count() > 1
        {
            return Err(RollupError::InvalidConfig(
                "Each segment may only have one plan".to_string(),
            ));
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

/// Summary section keys that a dimension breakdown would collide with.
pub const RESERVED_DIMENSION_NAMES: &[&str] = &[
    "count",
    "tracked_projects",
    "financials",
    "status_distribution",
    "total_forecast",
    "weighted_pipeline",
    "avg_win_probability",
    "pipeline_funnel",
    "counts",
    "totals",
    "projects",
];

pub fn default_column_dictionary() -> BTreeMap<String, String> {
    let pairs: &[(&str, KnownField)] = &[
        ("RID", KnownField::Rid),
        ("Client", KnownField::ClientName),
        ("Client Name", KnownField::ClientName),
        ("Project Name", KnownField::ProjectName),
        ("Project", KnownField::ProjectName),
        ("PM", KnownField::ProjectManager),
        ("Project Manager", KnownField::ProjectManager),
        ("Workflow Status", KnownField::WorkflowStatus),
        ("Status", KnownField::WorkflowStatus),
        ("RAG", KnownField::RagStatus),
        ("RAG Status", KnownField::RagStatus),
        ("Health", KnownField::RagStatus),
        ("Budget Forecast", KnownField::BudgetForecast),
        ("Budget", KnownField::BudgetForecast),
        ("OOP", KnownField::Oop),
        ("Out of Pocket", KnownField::Oop),
        ("Actuals", KnownField::Actuals),
        ("Actuals to Date", KnownField::Actuals),
        ("Overage", KnownField::Overage),
        ("FTC Overage", KnownField::Overage),
        ("Ecosystem", KnownField::Ecosystem),
        ("Request Type", KnownField::RequestType),
        ("Approved Investment", KnownField::ApprovedInvestment),
        ("Win Probability", KnownField::WinProbability),
        ("Win %", KnownField::WinProbability),
        ("Pipeline Stage", KnownField::PipelineStage),
        ("Stage", KnownField::PipelineStage),
        ("Recommendation", KnownField::Recommendation),
        ("Assigned To", KnownField::AssignedTo),
        ("Department", KnownField::Department),
        ("Team Member", KnownField::TeamMember),
        ("Resource", KnownField::TeamMember),
        ("Billable Hours", KnownField::BillableHours),
        ("Available Hours", KnownField::AvailableHours),
        ("Start Date", KnownField::StartDate),
        ("End Date", KnownField::EndDate),
    ];

    pairs
        .iter()
        .map(|(title, field)| (title.to_string(), field.as_str().to_string()))
        .collect()
}

/// Source identifiers and credentials, usually taken from the environment.
#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    pub api_token: Option<String>,
    pub api_base_url: Option<String>,
    pub sheet_id: Option<u64>,
    pub report_ids: Vec<u64>,
    pub revenue_sheet_id: Option<u64>,
    pub penetration_sheet_id: Option<u64>,
    pub utilization_report_id: Option<u64>,
}

impl SourceSettings {
    pub const TOKEN_VAR: &'static str = "ROLLUP_API_TOKEN";
    pub const BASE_URL_VAR: &'static str = "ROLLUP_API_BASE_URL";
    pub const SHEET_VAR: &'static str = "ROLLUP_SHEET_ID";
    pub const REPORTS_VAR: &'static str = "ROLLUP_REPORT_IDS";
    pub const REVENUE_VAR: &'static str = "ROLLUP_REVENUE_SHEET_ID";
    pub const PENETRATION_VAR: &'static str = "ROLLUP_PENETRATION_SHEET_ID";
    pub const UTILIZATION_VAR: &'static str = "ROLLUP_UTILIZATION_REPORT_ID";

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; malformed ids are configuration errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let parse_id = |key: &str, raw: &str| -> Result<u64> {
            raw.parse::<u64>().map_err(|_| {
                RollupError::InvalidConfig(format!("{} must be a numeric id, got '{}'", key, raw))
            })
        };

        let optional_id = |key: &str| -> Result<Option<u64>> {
            read(key).map(|raw| parse_id(key, &raw)).transpose()
        };

        let report_ids = match read(Self::REPORTS_VAR) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_id(Self::REPORTS_VAR, s))
                .collect::<Result<Vec<u64>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            api_token: read(Self::TOKEN_VAR),
            api_base_url: read(Self::BASE_URL_VAR),
            sheet_id: optional_id(Self::SHEET_VAR)?,
            report_ids,
            revenue_sheet_id: optional_id(Self::REVENUE_VAR)?,
            penetration_sheet_id: optional_id(Self::PENETRATION_VAR)?,
            utilization_report_id: optional_id(Self::UTILIZATION_VAR)?,
        })
    }

    pub fn require_token(&self) -> Result<&str> {
        self.api_token
            .as_deref()
            .ok_or_else(|| RollupError::MissingConfig(Self::TOKEN_VAR.to_string()))
    }

    pub fn require_sheet_id(&self) -> Result<u64> {
        self.sheet_id
            .ok_or_else(|| RollupError::MissingConfig(Self::SHEET_VAR.to_string()))
    }

    pub fn require_revenue_sheet_id(&self) -> Result<u64> {
        self.revenue_sheet_id
            .ok_or_else(|| RollupError::MissingConfig(Self::REVENUE_VAR.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.plan_for(Segment::Live).is_some());
        assert!(config.plan_for(Segment::Unknown).is_none());
        assert_eq!(
            config.columns.get("Budget Forecast").map(String::as_str),
            Some("budget_forecast")
        );
        assert!(EngineConfig::utilization().validate().is_ok());
    }

    #[test]
    fn test_config_json_round_trip() {
        let json = serde_json::to_string(&EngineConfig::default()).unwrap();
        let config = EngineConfig::from_json_str(&json).unwrap();
        assert_eq!(config.funnel_stages.len(), 5);
        assert_eq!(config.unassigned_label, "Unassigned");
    }

    #[test]
    fn test_config_rejects_duplicate_dimension() {
        let mut config = EngineConfig::default();
        config.segments[0]
            .dimensions
            .push(DimensionSpec::category("by_client", SortKey::Budget));
        assert!(matches!(config.validate(), Err(RollupError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_reserved_dimension_name() {
        let mut config = EngineConfig::default();
        config.segments[0]
            .dimensions
            .push(DimensionSpec::category("projects", SortKey::Budget));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = EngineConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("rules"));
        assert!(schema_json.contains("funnel_stages"));
        assert!(schema_json.contains("sheet_patterns"));
    }

    #[test]
    fn test_source_settings_lookup() {
        let settings = SourceSettings::from_lookup(|key| match key {
            "ROLLUP_API_TOKEN" => Some("secret".to_string()),
            "ROLLUP_SHEET_ID" => Some(" 1234 ".to_string()),
            "ROLLUP_REPORT_IDS" => Some("11, 12,".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.require_token().unwrap(), "secret");
        assert_eq!(settings.require_sheet_id().unwrap(), 1234);
        assert_eq!(settings.report_ids, vec![11, 12]);
        assert!(matches!(
            settings.require_revenue_sheet_id(),
            Err(RollupError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_source_settings_rejects_bad_id() {
        let result = SourceSettings::from_lookup(|key| match key {
            "ROLLUP_SHEET_ID" => Some("sheet-one".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(RollupError::InvalidConfig(_))));
    }
}
