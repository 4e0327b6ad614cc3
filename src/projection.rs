use crate::config::{EngineConfig, SortKey};
use crate::engine::{AggregateBucket, ProjectRecord, Rollup, SegmentRollup};
use crate::rules::{RagStatus, Segment};
use crate::values::{finite_or_zero, round_one_decimal};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One row of a breakdown array: a group label plus its totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTotals {
    pub name: String,
    #[serde(flatten)]
    pub totals: AggregateBucket,
    pub burn_rate_pct: f64,
}

/// Actuals as a percentage of budget, one decimal; 0 when there is no budget.
pub fn burn_rate_pct(actuals: f64, budget: f64) -> f64 {
    if budget == 0.0 {
        return 0.0;
    }
    finite_or_zero((actuals / budget * 1000.0).round() / 10.0)
}

/// Percent change between the last two chronological points.
///
/// Points are `(period key, value)` pairs; keys sort chronologically
/// (`YYYY-MM` or `YYYY-MM-DD`).
pub fn mom_change(points: &[(String, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }

    let mut ordered: Vec<&(String, f64)> = points.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    let previous = ordered[ordered.len() - 2].1;
    let current = ordered[ordered.len() - 1].1;

    if previous == 0.0 || !previous.is_finite() || !current.is_finite() {
        return None;
    }

    Some(round_one_decimal((current - previous) / previous * 100.0))
}

/// Buckets as an array sorted by `sort_by` descending, ties by name.
pub fn sorted_breakdown(
    buckets: &BTreeMap<String, AggregateBucket>,
    sort_by: SortKey,
) -> Vec<NamedTotals> {
    let mut rows: Vec<NamedTotals> = buckets
        .iter()
        .map(|(name, bucket)| NamedTotals {
            name: name.clone(),
            totals: sanitize_bucket(bucket),
            burn_rate_pct: burn_rate_pct(bucket.actuals, bucket.budget),
        })
        .collect();

    rows.sort_by(|a, b| {
        b.totals
            .sort_value(sort_by)
            .partial_cmp(&a.totals.sort_value(sort_by))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });

    rows
}

fn sanitize_bucket(bucket: &AggregateBucket) -> AggregateBucket {
    AggregateBucket {
        budget: finite_or_zero(bucket.budget),
        oop: finite_or_zero(bucket.oop),
        actuals: finite_or_zero(bucket.actuals),
        overage: finite_or_zero(bucket.overage),
        investment: finite_or_zero(bucket.investment),
        overserviced_amount: finite_or_zero(bucket.overserviced_amount),
        underserviced_amount: finite_or_zero(bucket.underserviced_amount),
        pipeline_value: finite_or_zero(bucket.pipeline_value),
        weighted_value: finite_or_zero(bucket.weighted_value),
        billable_hours: finite_or_zero(bucket.billable_hours),
        available_hours: finite_or_zero(bucket.available_hours),
        ..bucket.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStage {
    pub stage: String,
    pub count: usize,
    pub value: f64,
    pub weighted_value: f64,
}

/// One entry per configured stage, in configured order, zero-filled.
pub fn pipeline_funnel(
    stages: &[String],
    by_stage: Option<&BTreeMap<String, AggregateBucket>>,
) -> Vec<FunnelStage> {
    stages
        .iter()
        .map(|stage| {
            let mut entry = FunnelStage {
                stage: stage.clone(),
                count: 0,
                value: 0.0,
                weighted_value: 0.0,
            };

            let matching = by_stage
                .into_iter()
                .flatten()
                .filter(|(label, _)| label.trim().eq_ignore_ascii_case(stage.trim()));
            for (_, bucket) in matching {
                entry.count += bucket.projects;
                entry.value += finite_or_zero(bucket.pipeline_value);
                entry.weighted_value += finite_or_zero(bucket.weighted_value);
            }

            entry
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveFinancials {
    pub total_budget: f64,
    pub total_oop: f64,
    pub total_actuals: f64,
    pub total_overage: f64,
    pub total_investment: f64,
    pub burn_rate_pct: f64,
    pub overserviced_count: usize,
    pub overserviced_amount: f64,
    pub underserviced_count: usize,
    pub underserviced_amount: f64,
}

impl LiveFinancials {
    fn from_totals(totals: &AggregateBucket) -> Self {
        let totals = sanitize_bucket(totals);
        Self {
            total_budget: totals.budget,
            total_oop: totals.oop,
            total_actuals: totals.actuals,
            total_overage: totals.overage,
            total_investment: totals.investment,
            burn_rate_pct: burn_rate_pct(totals.actuals, totals.budget),
            overserviced_count: totals.overserviced_count,
            overserviced_amount: totals.overserviced_amount,
            underserviced_count: totals.underserviced_count,
            underserviced_amount: totals.underserviced_amount,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveSection {
    pub count: usize,
    pub tracked_projects: usize,
    pub financials: LiveFinancials,
    pub status_distribution: BTreeMap<RagStatus, usize>,
    #[serde(flatten)]
    pub breakdowns: BTreeMap<String, Vec<NamedTotals>>,
    pub projects: Vec<ProjectRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewbizSection {
    pub count: usize,
    pub total_forecast: f64,
    pub weighted_pipeline: f64,
    pub avg_win_probability: Option<f64>,
    pub pipeline_funnel: Vec<FunnelStage>,
    #[serde(flatten)]
    pub breakdowns: BTreeMap<String, Vec<NamedTotals>>,
    /// Plain project counts per label, keyed by dimension name.
    pub counts: BTreeMap<String, BTreeMap<String, usize>>,
    pub projects: Vec<ProjectRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InternalSection {
    pub count: usize,
    pub totals: AggregateBucket,
    #[serde(flatten)]
    pub breakdowns: BTreeMap<String, Vec<NamedTotals>>,
    pub projects: Vec<ProjectRecord>,
}

/// The dashboard payload.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub as_of: NaiveDate,
    pub project_count: usize,
    pub uncategorized: usize,
    pub live: LiveSection,
    pub newbiz: NewbizSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<InternalSection>,
}

/// Turns a `Rollup` into the sorted, finite `DashboardSummary`.
pub struct SummaryProjector<'a> {
    config: &'a EngineConfig,
}

impl<'a> SummaryProjector<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn project(&self, rollup: &Rollup, as_of: NaiveDate) -> DashboardSummary {
        let empty_live = SegmentRollup::new(Segment::Live);
        let empty_newbiz = SegmentRollup::new(Segment::Newbiz);

        let live = rollup.segment(Segment::Live).unwrap_or(&empty_live);
        let newbiz = rollup.segment(Segment::Newbiz).unwrap_or(&empty_newbiz);
        let internal = rollup
            .segment(Segment::Internal)
            .filter(|segment| segment.count() > 0)
            .map(|segment| self.internal_section(segment));

        let summary = DashboardSummary {
            as_of,
            project_count: rollup.classified_rows(),
            uncategorized: rollup.uncategorized,
            live: self.live_section(live),
            newbiz: self.newbiz_section(newbiz),
            internal,
        };

        debug!(
            "Projected summary as of {}: {} live, {} newbiz, internal {}",
            as_of,
            summary.live.count,
            summary.newbiz.count,
            if summary.internal.is_some() { "present" } else { "absent" }
        );

        summary
    }

    /// Sorted breakdown arrays for every dimension planned for the segment.
    pub fn breakdowns(&self, segment: &SegmentRollup) -> BTreeMap<String, Vec<NamedTotals>> {
        let Some(plan) = self.config.plan_for(segment.segment) else {
            return BTreeMap::new();
        };

        plan.dimensions
            .iter()
            .map(|dimension| {
                let rows = segment
                    .dimension(&dimension.name)
                    .map(|buckets| sorted_breakdown(buckets, dimension.sort_by))
                    .unwrap_or_default();
                (dimension.name.clone(), rows)
            })
            .collect()
    }

    fn live_section(&self, segment: &SegmentRollup) -> LiveSection {
        LiveSection {
            count: segment.count(),
            tracked_projects: segment.totals.tracked_projects,
            financials: LiveFinancials::from_totals(&segment.totals),
            status_distribution: segment.status_counts.clone(),
            breakdowns: self.breakdowns(segment),
            projects: segment.projects.clone(),
        }
    }

    fn newbiz_section(&self, segment: &SegmentRollup) -> NewbizSection {
        let avg_win_probability = if segment.win_probability_samples > 0 {
            Some(round_one_decimal(
                segment.win_probability_sum / segment.win_probability_samples as f64,
            ))
            .filter(|v| v.is_finite())
        } else {
            None
        };

        let counts = self
            .config
            .count_dimensions
            .iter()
            .filter_map(|name| {
                let buckets = segment.dimension(name)?;
                let counts = buckets
                    .iter()
                    .map(|(label, bucket)| (label.clone(), bucket.projects))
                    .collect();
                Some((name.clone(), counts))
            })
            .collect();

        NewbizSection {
            count: segment.count(),
            total_forecast: finite_or_zero(segment.totals.pipeline_value),
            weighted_pipeline: finite_or_zero(segment.totals.weighted_value),
            avg_win_probability,
            pipeline_funnel: pipeline_funnel(
                &self.config.funnel_stages,
                segment.dimension(&self.config.funnel_dimension),
            ),
            breakdowns: self.breakdowns(segment),
            counts,
            projects: segment.projects.clone(),
        }
    }

    fn internal_section(&self, segment: &SegmentRollup) -> InternalSection {
        InternalSection {
            count: segment.count(),
            totals: sanitize_bucket(&segment.totals),
            breakdowns: self.breakdowns(segment),
            projects: segment.projects.clone(),
        }
    }
}
