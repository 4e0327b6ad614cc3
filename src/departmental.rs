use crate::config::{DepartmentalConfig, EngineConfig};
use crate::engine::{AggregateBucket, RollupEngine};
use crate::error::{Result, RollupError};
use crate::normalizer::Normalizer;
use crate::pivot::{parse_penetration, parse_revenue_pivot, RevenuePivot};
use crate::projection::mom_change;
use crate::rules::Segment;
use crate::schema::RawSource;
use crate::values::{finite_or_zero, round_one_decimal};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The sources a departmental snapshot is built from.
#[derive(Debug, Clone)]
pub struct DepartmentalInputs {
    pub revenue: RawSource,
    pub penetration: Option<RawSource>,
    pub utilization: Option<RawSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentRevenue {
    pub department: String,
    pub value: f64,
    pub share_pct: Option<f64>,
    pub mom_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueMix {
    pub section: String,
    pub month: String,
    pub total: f64,
    pub departments: Vec<DepartmentRevenue>,
}

impl RevenueMix {
    pub fn from_pivot(pivot: &RevenuePivot, config: &DepartmentalConfig) -> Result<Self> {
        let section = pivot.section(&config.revenue_section).ok_or_else(|| {
            RollupError::MalformedPayload {
                source_id: "revenue".to_string(),
                details: format!(
                    "Section '{}' not found (found {:?})",
                    config.revenue_section,
                    pivot.section_names()
                ),
            }
        })?;

        let latest = section.latest().ok_or_else(|| RollupError::MalformedPayload {
            source_id: "revenue".to_string(),
            details: format!("Section '{}' has no month rows", section.name),
        })?;

        let values: Vec<(String, f64)> = config
            .departments
            .iter()
            .map(|department| (department.clone(), finite_or_zero(latest.value(department))))
            .collect();
        let total: f64 = values.iter().map(|(_, value)| value).sum();

        let departments = values
            .into_iter()
            .map(|(department, value)| {
                let share_pct = if total != 0.0 {
                    Some(round_one_decimal(value / total * 100.0))
                } else {
                    None
                };
                let mom_change = mom_change(&section.series(&department));

                DepartmentRevenue {
                    department,
                    value,
                    share_pct,
                    mom_change,
                }
            })
            .collect();

        Ok(Self {
            section: section.name.clone(),
            month: latest.month.clone(),
            total,
            departments,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationEntry {
    pub name: String,
    pub billable_hours: f64,
    pub available_hours: f64,
    pub utilization_pct: Option<f64>,
}

impl UtilizationEntry {
    fn from_bucket(name: &str, bucket: &AggregateBucket) -> Self {
        Self {
            name: name.to_string(),
            billable_hours: finite_or_zero(bucket.billable_hours),
            available_hours: finite_or_zero(bucket.available_hours),
            utilization_pct: utilization_pct(bucket.billable_hours, bucket.available_hours),
        }
    }
}

/// Billable over available hours as a percent, one decimal; `None` with no capacity.
pub fn utilization_pct(billable: f64, available: f64) -> Option<f64> {
    if available <= 0.0 || !available.is_finite() {
        return None;
    }
    Some(round_one_decimal(billable / available * 100.0)).filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSummary {
    pub overall: UtilizationEntry,
    pub by_department: Vec<UtilizationEntry>,
    pub by_team_member: Vec<UtilizationEntry>,
}

impl UtilizationSummary {
    /// Runs the rollup engine over the utilization report.
    pub fn from_source(config: &EngineConfig, source: &RawSource) -> Self {
        let records = Normalizer::new(&config.columns).normalize(source);
        let rollup = RollupEngine::new(config).run(&records);

        let empty = BTreeMap::new();
        let segment = rollup.segment(Segment::Internal);
        let entries = |dimension: &str| -> Vec<UtilizationEntry> {
            let buckets = segment
                .and_then(|s| s.dimension(dimension))
                .unwrap_or(&empty);
            let mut entries: Vec<UtilizationEntry> = buckets
                .iter()
                .map(|(name, bucket)| UtilizationEntry::from_bucket(name, bucket))
                .collect();
            entries.sort_by(|a, b| {
                b.billable_hours
                    .partial_cmp(&a.billable_hours)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.name.cmp(&b.name))
            });
            entries
        };

        let totals = segment.map(|s| s.totals.clone()).unwrap_or_default();
        if rollup.uncategorized > 0 {
            warn!(
                "{} utilization rows from {} matched no utilization rule",
                rollup.uncategorized,
                source.label()
            );
        }

        Self {
            overall: UtilizationEntry::from_bucket("Overall", &totals),
            by_department: entries("by_department"),
            by_team_member: entries("by_team_member"),
        }
    }
}

/// Departmental health: revenue mix plus optional penetration and utilization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentalSnapshot {
    pub month: String,
    pub revenue_mix: RevenueMix,
    pub sections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penetration: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization: Option<UtilizationSummary>,
}

impl DepartmentalSnapshot {
    pub fn build(
        config: &DepartmentalConfig,
        utilization_config: &EngineConfig,
        inputs: &DepartmentalInputs,
    ) -> Result<Self> {
        let pivot = parse_revenue_pivot(&inputs.revenue);
        let revenue_mix = RevenueMix::from_pivot(&pivot, config)?;

        let penetration = inputs
            .penetration
            .as_ref()
            .map(|source| parse_penetration(source, &config.departments));

        let utilization = inputs
            .utilization
            .as_ref()
            .map(|source| UtilizationSummary::from_source(utilization_config, source));

        info!(
            "Built departmental snapshot for {}: revenue {:.2}, penetration {}, utilization {}",
            revenue_mix.month,
            revenue_mix.total,
            if penetration.is_some() { "present" } else { "absent" },
            if utilization.is_some() { "present" } else { "absent" }
        );

        Ok(Self {
            month: revenue_mix.month.clone(),
            sections: pivot.section_names().iter().map(|s| s.to_string()).collect(),
            revenue_mix,
            penetration,
            utilization,
        })
    }
}
