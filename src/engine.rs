use crate::config::{DimensionKey, DimensionSpec, EngineConfig, SortKey};
use crate::rules::{RagStatus, Segment};
use crate::schema::{FieldRecord, KnownField};
use crate::values::{parse_currency, parse_percent, Amount, CellValue};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running totals for one group (a client, an ecosystem, a pipeline stage...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub projects: usize,
    /// Projects whose actuals are tracked.
    pub tracked_projects: usize,
    pub budget: f64,
    pub oop: f64,
    pub actuals: f64,
    pub overage: f64,
    pub investment: f64,
    pub overserviced_count: usize,
    pub overserviced_amount: f64,
    pub underserviced_count: usize,
    /// Sum of the negative overages, so `overserviced_amount + underserviced_amount == overage`.
    pub underserviced_amount: f64,
    pub pipeline_value: f64,
    pub weighted_value: f64,
    pub billable_hours: f64,
    pub available_hours: f64,
}

impl AggregateBucket {
    pub fn absorb(&mut self, contribution: &Contribution) {
        self.projects += 1;
        self.budget += contribution.budget;
        self.oop += contribution.oop;
        self.investment += contribution.investment;
        self.pipeline_value += contribution.pipeline_value;
        self.weighted_value += contribution.weighted_value;
        self.billable_hours += contribution.billable_hours;
        self.available_hours += contribution.available_hours;

        if let Amount::Tracked(actuals) = contribution.actuals {
            self.actuals += actuals;
            self.tracked_projects += 1;
        }

        if let Amount::Tracked(overage) = contribution.overage {
            self.overage += overage;
            if overage > 0.0 {
                self.overserviced_count += 1;
                self.overserviced_amount += overage;
            } else if overage < 0.0 {
                self.underserviced_count += 1;
                self.underserviced_amount += overage;
            }
        }
    }

    pub fn sort_value(&self, key: SortKey) -> f64 {
        match key {
            SortKey::Budget => self.budget,
            SortKey::Projects => self.projects as f64,
            SortKey::PipelineValue => self.pipeline_value,
            SortKey::WeightedValue => self.weighted_value,
            SortKey::BillableHours => self.billable_hours,
        }
    }
}

/// The parsed numbers one row adds to every bucket it lands in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub budget: f64,
    pub oop: f64,
    pub investment: f64,
    pub actuals: Amount,
    pub overage: Amount,
    pub win_probability: Option<f64>,
    pub pipeline_value: f64,
    pub weighted_value: f64,
    pub billable_hours: f64,
    pub available_hours: f64,
}

impl Contribution {
    pub fn from_record(record: &FieldRecord, segment: Segment) -> Self {
        let currency = |field: KnownField| record.field(field).map(parse_currency).unwrap_or(0.0);

        let budget = currency(KnownField::BudgetForecast);
        let win_probability = record.field(KnownField::WinProbability).and_then(parse_percent);

        let (pipeline_value, weighted_value) = if segment == Segment::Newbiz {
            let weighted = budget * win_probability.unwrap_or(0.0) / 100.0;
            (budget, weighted)
        } else {
            (0.0, 0.0)
        };

        Self {
            budget,
            oop: currency(KnownField::Oop),
            investment: currency(KnownField::ApprovedInvestment),
            actuals: Amount::from_optional(record.field(KnownField::Actuals)),
            overage: Amount::from_optional(record.field(KnownField::Overage)),
            win_probability,
            pipeline_value,
            weighted_value,
            billable_hours: currency(KnownField::BillableHours),
            available_hours: currency(KnownField::AvailableHours),
        }
    }

    pub fn is_overserviced(&self) -> bool {
        matches!(self.overage, Amount::Tracked(v) if v > 0.0)
    }

    pub fn is_underserviced(&self) -> bool {
        matches!(self.overage, Amount::Tracked(v) if v < 0.0)
    }
}

/// Keys a `ProjectRecord` writes next to its flattened fields.
pub const PROJECT_RECORD_KEYS: &[&str] = &[
    "sheet_name",
    "category",
    "segment",
    "rag_color",
    "budget",
    "actuals_display",
    "overage_display",
    "win_probability_pct",
    "weighted_value",
    "is_overserviced",
    "is_underserviced",
];

/// A classified row with its derived display fields.
///
/// Unmapped columns whose title clashes with one of `PROJECT_RECORD_KEYS`
/// are renamed with an `extra_` prefix.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectRecord {
    #[serde(flatten)]
    pub fields: FieldRecord,
    pub category: String,
    pub segment: Segment,
    pub rag_color: RagStatus,
    pub budget: f64,
    pub actuals_display: Amount,
    pub overage_display: Amount,
    pub win_probability_pct: Option<f64>,
    pub weighted_value: f64,
    pub is_overserviced: bool,
    pub is_underserviced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentRollup {
    pub segment: Segment,
    pub totals: AggregateBucket,
    pub status_counts: BTreeMap<RagStatus, usize>,
    /// Dimension name -> group label -> bucket.
    pub dimensions: BTreeMap<String, BTreeMap<String, AggregateBucket>>,
    pub projects: Vec<ProjectRecord>,
    pub win_probability_sum: f64,
    pub win_probability_samples: usize,
}

impl SegmentRollup {
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            totals: AggregateBucket::default(),
            status_counts: BTreeMap::new(),
            dimensions: BTreeMap::new(),
            projects: Vec::new(),
            win_probability_sum: 0.0,
            win_probability_samples: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.projects.len()
    }

    pub fn dimension(&self, name: &str) -> Option<&BTreeMap<String, AggregateBucket>> {
        self.dimensions.get(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rollup {
    pub total_rows: usize,
    /// Rows excluded because their category resolved to the unknown segment.
    pub uncategorized: usize,
    pub segments: BTreeMap<Segment, SegmentRollup>,
}

impl Rollup {
    pub fn segment(&self, segment: Segment) -> Option<&SegmentRollup> {
        self.segments.get(&segment)
    }

    pub fn classified_rows(&self) -> usize {
        self.segments.values().map(SegmentRollup::count).sum()
    }
}

/// Classifies rows and folds them into per-segment aggregates.
pub struct RollupEngine<'a> {
    config: &'a EngineConfig,
}

impl<'a> RollupEngine<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, records: &[FieldRecord]) -> Rollup {
        let mut segments = BTreeMap::new();
        for plan in &self.config.segments {
            let mut rollup = SegmentRollup::new(plan.segment);
            for dimension in &plan.dimensions {
                rollup.dimensions.insert(dimension.name.clone(), BTreeMap::new());
            }
            segments.insert(plan.segment, rollup);
        }

        let mut rollup = Rollup {
            total_rows: 0,
            uncategorized: 0,
            segments,
        };

        for record in records {
            rollup.total_rows += 1;

            let status = record.text(KnownField::WorkflowStatus);
            let category = self
                .config
                .rules
                .classify_category(status.as_deref(), record.sheet_name.as_deref());
            let segment = self.config.rules.segment_of(category);

            if segment == Segment::Unknown {
                rollup.uncategorized += 1;
                continue;
            }

            let contribution = Contribution::from_record(record, segment);
            let project = self.enrich(record, category, segment, &contribution);

            let target = rollup
                .segments
                .entry(segment)
                .or_insert_with(|| SegmentRollup::new(segment));
            self.fold(target, record, project, &contribution);
        }

        info!(
            "Rolled up {} rows: {} classified, {} uncategorized",
            rollup.total_rows,
            rollup.classified_rows(),
            rollup.uncategorized
        );
        for (segment, segment_rollup) in &rollup.segments {
            debug!(
                "Segment {}: {} projects, budget {:.2}",
                segment,
                segment_rollup.count(),
                segment_rollup.totals.budget
            );
        }

        rollup
    }

    fn enrich(
        &self,
        record: &FieldRecord,
        category: &str,
        segment: Segment,
        contribution: &Contribution,
    ) -> ProjectRecord {
        let rag = record.text(KnownField::RagStatus);

        ProjectRecord {
            fields: without_key_clashes(record),
            category: category.to_string(),
            segment,
            rag_color: self.config.status_keywords.classify_status(rag.as_deref()),
            budget: contribution.budget,
            actuals_display: contribution.actuals,
            overage_display: contribution.overage,
            win_probability_pct: contribution.win_probability,
            weighted_value: contribution.weighted_value,
            is_overserviced: contribution.is_overserviced(),
            is_underserviced: contribution.is_underserviced(),
        }
    }

    fn fold(
        &self,
        target: &mut SegmentRollup,
        record: &FieldRecord,
        project: ProjectRecord,
        contribution: &Contribution,
    ) {
        target.totals.absorb(contribution);
        *target.status_counts.entry(project.rag_color).or_insert(0) += 1;

        if let Some(win) = contribution.win_probability {
            target.win_probability_sum += win;
            target.win_probability_samples += 1;
        }

        if let Some(plan) = self.config.plan_for(target.segment) {
            for dimension in &plan.dimensions {
                let buckets = target.dimensions.entry(dimension.name.clone()).or_default();
                for label in self.dimension_labels(dimension, record, &project.category) {
                    buckets.entry(label).or_default().absorb(contribution);
                }
            }
        }

        target.projects.push(project);
    }

    /// Group labels a row contributes to for one dimension.
    fn dimension_labels(
        &self,
        dimension: &DimensionSpec,
        record: &FieldRecord,
        category: &str,
    ) -> Vec<String> {
        let raw = match &dimension.key {
            DimensionKey::Category => Some(category.to_string()),
            DimensionKey::Field { field } => record.get(field).and_then(CellValue::as_text),
        };

        let mut labels: Vec<String> = Vec::new();
        if let Some(text) = raw {
            if dimension.multi_valued {
                for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    if !labels.iter().any(|existing| existing == token) {
                        labels.push(token.to_string());
                    }
                }
            } else {
                labels.push(text);
            }
        }

        if labels.is_empty() {
            labels.push(self.config.unassigned_label.clone());
        }
        labels
    }
}

fn without_key_clashes(record: &FieldRecord) -> FieldRecord {
    let mut fields = record.clone();
    let clashing: Vec<String> = fields
        .extra
        .keys()
        .filter(|key| PROJECT_RECORD_KEYS.contains(&key.as_str()))
        .cloned()
        .collect();

    for key in clashing {
        if let Some(value) = fields.extra.remove(&key) {
            let mut renamed = format!("extra_{}", key);
            while fields.extra.contains_key(&renamed) {
                renamed = format!("extra_{}", renamed);
            }
            fields.extra.insert(renamed, value);
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::UNCATEGORIZED;

    fn live_row(client: &str, ecosystem: &str, budget: &str, actuals: &str, overage: &str) -> FieldRecord {
        FieldRecord::default()
            .with("workflow_status", "Active")
            .with("client_name", client)
            .with("ecosystem", ecosystem)
            .with("budget_forecast", budget)
            .with("actuals", actuals)
            .with("overage", overage)
    }

    #[test]
    fn test_two_row_live_scenario() {
        let config = EngineConfig::default();
        let rows = vec![
            live_row("Acme", "Climate", "$10,000", "$6,000", "$500"),
            live_row("Globex", "Climate", "$5,000", "No Tracking", "-$200"),
        ];

        let rollup = RollupEngine::new(&config).run(&rows);
        let live = rollup.segment(Segment::Live).unwrap();

        assert_eq!(live.count(), 2);
        assert_eq!(live.totals.budget, 15000.0);
        assert_eq!(live.totals.actuals, 6000.0);
        assert_eq!(live.totals.tracked_projects, 1);
        assert_eq!(live.totals.overage, 300.0);
        assert_eq!(live.totals.overserviced_count, 1);
        assert_eq!(live.totals.underserviced_count, 1);
        assert_eq!(live.totals.overserviced_amount, 500.0);
        assert_eq!(live.totals.underserviced_amount, -200.0);

        let climate = &live.dimension("by_ecosystem").unwrap()["Climate"];
        assert_eq!(climate.budget, 15000.0);
        assert_eq!(climate.projects, 2);

        assert_eq!(live.projects[1].actuals_display, Amount::Untracked);
        assert!(live.projects[0].is_overserviced);
        assert!(live.projects[1].is_underserviced);
    }

    #[test]
    fn test_uncategorized_rows_are_excluded() {
        let config = EngineConfig::default();
        let rows = vec![
            live_row("Acme", "Climate", "$1,000", "$0", "$0"),
            FieldRecord::default()
                .with("workflow_status", "Someday")
                .with("budget_forecast", "$99,999"),
            FieldRecord::default().with("client_name", "No status at all"),
        ];

        let rollup = RollupEngine::new(&config).run(&rows);
        assert_eq!(rollup.total_rows, 3);
        assert_eq!(rollup.uncategorized, 2);
        assert_eq!(rollup.classified_rows() + rollup.uncategorized, rollup.total_rows);

        let live = rollup.segment(Segment::Live).unwrap();
        assert_eq!(live.totals.budget, 1000.0);
        assert!(live.projects.iter().all(|p| p.category != UNCATEGORIZED));
    }

    #[test]
    fn test_missing_dimension_value_uses_unassigned_label() {
        let config = EngineConfig::default();
        let rows = vec![
            FieldRecord::default()
                .with("workflow_status", "Active")
                .with("budget_forecast", "$2,000"),
            live_row("Acme", "Unassigned", "$3,000", "$0", "$0"),
        ];

        let rollup = RollupEngine::new(&config).run(&rows);
        let live = rollup.segment(Segment::Live).unwrap();
        let unassigned = &live.dimension("by_ecosystem").unwrap()["Unassigned"];
        assert_eq!(unassigned.projects, 2);
        assert_eq!(unassigned.budget, 5000.0);
        assert_eq!(live.dimension("by_client").unwrap()["Unassigned"].projects, 1);
    }

    #[test]
    fn test_request_types_are_split() {
        let config = EngineConfig::default();
        let rows = vec![
            live_row("Acme", "Climate", "$1,000", "$0", "$0")
                .with("request_type", "Design, Build ,Design"),
            live_row("Acme", "Climate", "$1,000", "$0", "$0").with("request_type", "Build"),
        ];

        let rollup = RollupEngine::new(&config).run(&rows);
        let by_type = rollup
            .segment(Segment::Live)
            .unwrap()
            .dimension("by_request_type")
            .unwrap();

        assert_eq!(by_type["Design"].projects, 1);
        assert_eq!(by_type["Build"].projects, 2);
        assert_eq!(by_type.len(), 2);
    }

    #[test]
    fn test_newbiz_weighted_pipeline() {
        let config = EngineConfig::default();
        let rows = vec![
            FieldRecord::default()
                .with("workflow_status", "Proposal")
                .with("pipeline_stage", "Proposal")
                .with("budget_forecast", "$40,000")
                .with("win_probability", 0.25),
            FieldRecord::default()
                .with("workflow_status", "Negotiation")
                .with("pipeline_stage", "Negotiation")
                .with("budget_forecast", "$10,000")
                .with("win_probability", "80%"),
            FieldRecord::default()
                .with("workflow_status", "Pipeline")
                .with("budget_forecast", "$5,000"),
        ];

        let rollup = RollupEngine::new(&config).run(&rows);
        let newbiz = rollup.segment(Segment::Newbiz).unwrap();

        assert_eq!(newbiz.count(), 3);
        assert_eq!(newbiz.totals.pipeline_value, 55000.0);
        assert!((newbiz.totals.weighted_value - 18000.0).abs() < 1e-6);
        assert_eq!(newbiz.win_probability_samples, 2);
        assert_eq!(newbiz.dimension("by_stage").unwrap()["Unassigned"].projects, 1);
        assert!(newbiz.projects[2].win_probability_pct.is_none());
    }

    #[test]
    fn test_status_distribution() {
        let config = EngineConfig::default();
        let rows = vec![
            live_row("A", "X", "$1", "$1", "$0").with("rag_status", "Green"),
            live_row("B", "X", "$1", "$1", "$0").with("rag_status", "amber"),
            live_row("C", "X", "$1", "$1", "$0"),
        ];

        let rollup = RollupEngine::new(&config).run(&rows);
        let live = rollup.segment(Segment::Live).unwrap();
        assert_eq!(live.status_counts[&RagStatus::Green], 1);
        assert_eq!(live.status_counts[&RagStatus::Yellow], 1);
        assert_eq!(live.status_counts[&RagStatus::Unknown], 1);
        assert_eq!(live.projects[1].rag_color, RagStatus::Yellow);
    }

    #[test]
    fn test_zero_overage_is_neither() {
        let contribution = Contribution::from_record(
            &live_row("A", "X", "$1", "$1", "$0"),
            Segment::Live,
        );
        assert!(!contribution.is_overserviced());
        assert!(!contribution.is_underserviced());

        let untracked = Contribution::from_record(
            &live_row("A", "X", "$1", "$1", "No Tracking"),
            Segment::Live,
        );
        assert_eq!(untracked.overage, Amount::Untracked);
        assert!(!untracked.is_overserviced());
    }

    #[test]
    fn test_project_record_serialization() {
        let config = EngineConfig::default();
        let rows = vec![live_row("Acme", "Climate", "$5,000", "No Tracking", "$10")];
        let rollup = RollupEngine::new(&config).run(&rows);
        let json = serde_json::to_value(&rollup.segment(Segment::Live).unwrap().projects[0]).unwrap();

        assert_eq!(json["client_name"], "Acme");
        assert_eq!(json["category"], "Active Live Projects");
        assert_eq!(json["segment"], "live");
        assert_eq!(json["actuals_display"], "No Tracking");
        assert_eq!(json["overage_display"], 10.0);
        assert_eq!(json["is_overserviced"], true);
    }

    #[test]
    fn test_clashing_extra_columns_are_renamed() {
        let config = EngineConfig::default();
        let row = live_row("Acme", "Climate", "$1,000", "$100", "$0")
            .with("category", "Retainer")
            .with("budget", "n/a");

        let rollup = RollupEngine::new(&config).run(&[row]);
        let project = &rollup.segment(Segment::Live).unwrap().projects[0];
        let json = serde_json::to_value(project).unwrap();

        assert_eq!(json["category"], "Active Live Projects");
        assert_eq!(json["extra_category"], "Retainer");
        assert_eq!(json["budget"], 1000.0);
        assert_eq!(json["extra_budget"], "n/a");
    }
}
