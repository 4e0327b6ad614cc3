//! # Portfolio Rollup
//!
//! Turns raw spreadsheet rows (sheets and cross-sheet reports from a
//! spreadsheet provider) into the summaries a portfolio dashboard shows:
//! live-project financials, the new-business pipeline, internal time, and
//! a departmental revenue and utilization snapshot.
//!
//! ## Core Concepts
//!
//! - **Normalization**: column titles are mapped to known fields through a
//!   configurable dictionary; unknown columns are kept verbatim
//! - **Classification**: an ordered rule table maps workflow status and
//!   origin sheet to a category, and each category to a segment
//!   (`live`, `newbiz`, `internal`, `unknown`)
//! - **Aggregation**: one pass folds every classified row into the segment
//!   totals and every configured grouping dimension
//! - **Tracked vs untracked**: "No Tracking" cells are kept apart from real
//!   zeroes and never drag down actuals, overage or burn rate
//!
//! ## Example
//!
//! ```rust,ignore
//! use portfolio_rollup::*;
//! use chrono::NaiveDate;
//!
//! let config = EngineConfig::default();
//! let source: RawSource = serde_json::from_str(&payload)?;
//! let as_of = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
//!
//! let summary = build_dashboard_summary(&config, &[source], as_of)?;
//! println!("{}", serde_json::to_string_pretty(&summary)?);
//! ```

pub mod config;
pub mod departmental;
pub mod engine;
pub mod error;
pub mod history;
pub mod normalizer;
pub mod pivot;
pub mod projection;
pub mod rules;
pub mod schema;
pub mod sources;
pub mod utils;
pub mod values;

#[cfg(feature = "remote")]
pub mod remote;

pub use config::{
    default_column_dictionary, DepartmentalConfig, DimensionKey, DimensionSpec, EngineConfig,
    SegmentPlan, SortKey, SourceSettings,
};
pub use departmental::{
    utilization_pct, DepartmentRevenue, DepartmentalInputs, DepartmentalSnapshot, RevenueMix,
    UtilizationEntry, UtilizationSummary,
};
pub use engine::{AggregateBucket, Contribution, ProjectRecord, Rollup, RollupEngine, SegmentRollup};
pub use error::{ErrorEnvelope, Result, RollupError};
pub use history::{
    merge_entry, metric_mom_change, HistoryEntry, HistoryStore, JsonFileHistoryStore,
    DEFAULT_HISTORY_CAP,
};
pub use normalizer::{ColumnLayout, ColumnMap, Normalizer};
pub use pivot::{parse_penetration, parse_revenue_pivot, PivotMonth, PivotSection, RevenuePivot};
pub use projection::{
    burn_rate_pct, mom_change, pipeline_funnel, DashboardSummary, FunnelStage, NamedTotals,
    SummaryProjector,
};
pub use rules::{CategoryRule, RagStatus, RuleTable, Segment, StatusKeywords, UNCATEGORIZED};
pub use schema::*;
pub use sources::{gather_dashboard_inputs, gather_departmental_inputs, SourceFetcher};
pub use utils::*;
pub use values::*;

#[cfg(feature = "remote")]
pub use remote::SheetApiClient;

use chrono::NaiveDate;
use log::{debug, info};

pub struct DashboardProcessor;

impl DashboardProcessor {
    /// Normalizes every source into one list of records, in source order.
    pub fn normalize_sources(config: &EngineConfig, sources: &[RawSource]) -> Vec<FieldRecord> {
        let normalizer = Normalizer::new(&config.columns);
        sources
            .iter()
            .flat_map(|source| normalizer.normalize(source))
            .collect()
    }

    pub fn build_snapshot(
        config: &EngineConfig,
        sources: &[RawSource],
        as_of: NaiveDate,
    ) -> Result<DashboardSummary> {
        config.validate()?;

        info!("Building dashboard summary from {} sources", sources.len());

        let records = Self::normalize_sources(config, sources);
        debug!("Normalized {} records", records.len());

        let rollup = RollupEngine::new(config).run(&records);
        Ok(SummaryProjector::new(config).project(&rollup, as_of))
    }

    pub fn build_departmental(
        config: &EngineConfig,
        inputs: &DepartmentalInputs,
    ) -> Result<DepartmentalSnapshot> {
        config.validate()?;

        let utilization_config = Self::utilization_config(config);
        utilization_config.validate()?;

        info!(
            "Building departmental snapshot for departments {:?}",
            config.departmental.departments
        );

        DepartmentalSnapshot::build(&config.departmental, &utilization_config, inputs)
    }

    /// The utilization variant, sharing the caller's column dictionary.
    pub fn utilization_config(config: &EngineConfig) -> EngineConfig {
        EngineConfig {
            columns: config.columns.clone(),
            unassigned_label: config.unassigned_label.clone(),
            ..EngineConfig::utilization()
        }
    }
}

pub fn build_dashboard_summary(
    config: &EngineConfig,
    sources: &[RawSource],
    as_of: NaiveDate,
) -> Result<DashboardSummary> {
    DashboardProcessor::build_snapshot(config, sources, as_of)
}

pub fn build_departmental_snapshot(
    config: &EngineConfig,
    inputs: &DepartmentalInputs,
) -> Result<DepartmentalSnapshot> {
    DashboardProcessor::build_departmental(config, inputs)
}

/// Fetches the configured sources and builds the dashboard summary.
#[cfg(feature = "remote")]
pub async fn fetch_dashboard_summary(
    config: &EngineConfig,
    settings: &SourceSettings,
    as_of: NaiveDate,
) -> Result<DashboardSummary> {
    config.validate()?;
    let client = SheetApiClient::from_settings(settings)?;
    let sources = gather_dashboard_inputs(&client, settings).await?;
    DashboardProcessor::build_snapshot(config, &sources, as_of)
}

/// Fetches the departmental sources and builds the snapshot.
#[cfg(feature = "remote")]
pub async fn fetch_departmental_snapshot(
    config: &EngineConfig,
    settings: &SourceSettings,
) -> Result<DepartmentalSnapshot> {
    config.validate()?;
    let client = SheetApiClient::from_settings(settings)?;
    let inputs = gather_departmental_inputs(&client, settings).await?;
    DashboardProcessor::build_departmental(config, &inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_sheet() -> RawSource {
        let payload = r#"{
            "id": 100,
            "name": "Portfolio Tracker",
            "columns": [
                {"id": 1, "title": "Client"},
                {"id": 2, "title": "Workflow Status"},
                {"id": 3, "title": "Budget Forecast"},
                {"id": 4, "title": "Actuals"},
                {"id": 5, "title": "Overage"},
                {"id": 6, "title": "Ecosystem"}
            ],
            "rows": [
                {"cells": [
                    {"columnId": 1, "value": "Acme"},
                    {"columnId": 2, "value": "Active Climate"},
                    {"columnId": 3, "value": 10000},
                    {"columnId": 4, "displayValue": "$6,000"},
                    {"columnId": 5, "displayValue": "$500"},
                    {"columnId": 6, "value": "Climate"}
                ]},
                {"cells": [
                    {"columnId": 1, "value": "Globex"},
                    {"columnId": 2, "value": "Active"},
                    {"columnId": 3, "displayValue": "$5,000"},
                    {"columnId": 4, "value": "No Tracking"},
                    {"columnId": 5, "displayValue": "-$200"},
                    {"columnId": 6, "value": "Climate"}
                ]},
                {"cells": [
                    {"columnId": 1, "value": "Initech"},
                    {"columnId": 2, "value": "Archived"}
                ]}
            ]
        }"#;
        serde_json::from_str(payload).unwrap()
    }

    #[test]
    fn test_end_to_end_processing() {
        let config = EngineConfig::default();
        let as_of = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let summary = build_dashboard_summary(&config, &[live_sheet()], as_of).unwrap();

        assert_eq!(summary.project_count, 2);
        assert_eq!(summary.uncategorized, 1);
        assert_eq!(summary.live.count, 2);
        assert_eq!(summary.live.tracked_projects, 1);
        assert!((summary.live.financials.total_budget - 15000.0).abs() < 0.01);
        assert!((summary.live.financials.total_actuals - 6000.0).abs() < 0.01);
        assert!((summary.live.financials.total_overage - 300.0).abs() < 0.01);
        assert_eq!(summary.live.financials.burn_rate_pct, 40.0);

        let json = serde_json::to_value(&summary.live.projects[1]).unwrap();
        assert_eq!(json["actuals_display"], "No Tracking");
    }

    #[test]
    fn test_invalid_config_fails_before_processing() {
        let mut config = EngineConfig::default();
        config.unassigned_label = "  ".to_string();

        let result = build_dashboard_summary(&config, &[live_sheet()], NaiveDate::MIN);
        assert!(matches!(result, Err(RollupError::InvalidConfig(_))));
        assert_eq!(result.unwrap_err().status_code(), 500);
    }

    #[test]
    fn test_utilization_config_shares_dictionary() {
        let mut config = EngineConfig::default();
        config
            .columns
            .insert("Hours Logged".to_string(), "billable_hours".to_string());

        let utilization = DashboardProcessor::utilization_config(&config);
        assert_eq!(
            utilization.columns.get("Hours Logged").map(String::as_str),
            Some("billable_hours")
        );
        assert_eq!(utilization.rules.categories(), vec!["Team Utilization"]);
    }
}
