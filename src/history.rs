use crate::departmental::DepartmentalSnapshot;
use crate::error::Result;
use crate::projection::{mom_change, DashboardSummary};
use crate::utils::day_key;
use crate::values::finite_or_zero;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Entries kept by default: roughly a year of daily snapshots.
pub const DEFAULT_HISTORY_CAP: usize = 365;

/// One point of a historical series, keyed by day (`YYYY-MM-DD`) or month (`YYYY-MM`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub key: String,
    pub metrics: BTreeMap<String, f64>,
}

impl HistoryEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), finite_or_zero(value));
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Daily entry from a dashboard summary.
    pub fn from_dashboard(summary: &DashboardSummary) -> Self {
        let live = &summary.live;
        let newbiz = &summary.newbiz;

        let mut entry = Self::new(day_key(summary.as_of))
            .with_metric("project_count", summary.project_count as f64)
            .with_metric("uncategorized", summary.uncategorized as f64)
            .with_metric("live_count", live.count as f64)
            .with_metric("live_tracked_projects", live.tracked_projects as f64)
            .with_metric("live_total_budget", live.financials.total_budget)
            .with_metric("live_total_actuals", live.financials.total_actuals)
            .with_metric("live_total_overage", live.financials.total_overage)
            .with_metric("live_burn_rate_pct", live.financials.burn_rate_pct)
            .with_metric("live_overserviced_count", live.financials.overserviced_count as f64)
            .with_metric("live_underserviced_count", live.financials.underserviced_count as f64)
            .with_metric("newbiz_count", newbiz.count as f64)
            .with_metric("newbiz_total_forecast", newbiz.total_forecast)
            .with_metric("newbiz_weighted_pipeline", newbiz.weighted_pipeline);

        if let Some(avg) = newbiz.avg_win_probability {
            entry = entry.with_metric("newbiz_avg_win_probability", avg);
        }
        if let Some(internal) = &summary.internal {
            entry = entry.with_metric("internal_count", internal.count as f64);
        }

        entry
    }

    /// Monthly entry from a departmental snapshot.
    pub fn from_departmental(snapshot: &DepartmentalSnapshot) -> Self {
        let mut entry = Self::new(snapshot.month.clone())
            .with_metric("revenue_total", snapshot.revenue_mix.total);

        for department in &snapshot.revenue_mix.departments {
            let slug = metric_slug(&department.department);
            entry = entry.with_metric(&format!("revenue_{}", slug), department.value);
            if let Some(share) = department.share_pct {
                entry = entry.with_metric(&format!("share_{}", slug), share);
            }
        }

        if let Some(penetration) = &snapshot.penetration {
            for (department, rate) in penetration {
                entry = entry.with_metric(&format!("penetration_{}", metric_slug(department)), *rate);
            }
        }

        if let Some(utilization) = &snapshot.utilization {
            if let Some(pct) = utilization.overall.utilization_pct {
                entry = entry.with_metric("utilization_pct", pct);
            }
            entry = entry.with_metric("billable_hours", utilization.overall.billable_hours);
        }

        entry
    }
}

/// Lowercase metric name fragment: "Client Experiences" -> "client_experiences".
pub fn metric_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

/// Replace-or-append by key, sort by key, keep the newest `cap` entries.
pub fn merge_entry(mut entries: Vec<HistoryEntry>, entry: HistoryEntry, cap: usize) -> Vec<HistoryEntry> {
    match entries.iter_mut().find(|existing| existing.key == entry.key) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));

    if entries.len() > cap {
        let excess = entries.len() - cap;
        entries.drain(..excess);
    }

    entries
}

/// Month-over-month style change of one metric across the last two entries that carry it.
pub fn metric_mom_change(entries: &[HistoryEntry], metric: &str) -> Option<f64> {
    let points: Vec<(String, f64)> = entries
        .iter()
        .filter_map(|entry| entry.metric(metric).map(|value| (entry.key.clone(), value)))
        .collect();
    mom_change(&points)
}

/// Persistence seam for history lists.
pub trait HistoryStore {
    fn load(&self) -> Result<Vec<HistoryEntry>>;

    fn save(&self, entries: &[HistoryEntry]) -> Result<()>;

    fn cap(&self) -> usize {
        DEFAULT_HISTORY_CAP
    }

    fn append(&self, entry: HistoryEntry) -> Result<Vec<HistoryEntry>> {
        let key = entry.key.clone();
        let merged = merge_entry(self.load()?, entry, self.cap());
        self.save(&merged)?;
        debug!("Stored history entry {} ({} entries kept)", key, merged.len());
        Ok(merged)
    }
}

/// History kept as a pretty-printed JSON array in a single file.
pub struct JsonFileHistoryStore {
    path: PathBuf,
    cap: usize,
}

impl JsonFileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cap: DEFAULT_HISTORY_CAP,
        }
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }
}

impl HistoryStore for JsonFileHistoryStore {
    fn load(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)?;
        info!("Wrote {} history entries to {}", entries.len(), self.path.display());
        Ok(())
    }

    fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: f64) -> HistoryEntry {
        HistoryEntry::new(key).with_metric("revenue_total", value)
    }

    #[test]
    fn test_merge_replaces_same_key() {
        let entries = vec![entry("2024-01", 100.0), entry("2024-02", 200.0)];
        let merged = merge_entry(entries, entry("2024-02", 250.0), 12);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].metric("revenue_total"), Some(250.0));
    }

    #[test]
    fn test_merge_sorts_and_caps() {
        let entries = vec![entry("2024-03", 3.0), entry("2024-01", 1.0), entry("2024-02", 2.0)];
        let merged = merge_entry(entries, entry("2023-12", 0.5), 3);

        let keys: Vec<&str> = merged.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["2024-01", "2024-02", "2024-03"]);
    }

    #[test]
    fn test_metric_mom_change() {
        let entries = vec![entry("2024-01", 1000.0), entry("2024-02", 1100.0)];
        assert_eq!(metric_mom_change(&entries, "revenue_total"), Some(10.0));
        assert_eq!(metric_mom_change(&entries, "missing"), None);
    }

    #[test]
    fn test_metric_slug() {
        assert_eq!(metric_slug("Experiences"), "experiences");
        assert_eq!(metric_slug(" Client  Delivery & Ops "), "client_delivery_ops");
    }

    #[test]
    fn test_json_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("rollup-history-{}", std::process::id()));
        let path = dir.join("departmental.json");
        let _ = std::fs::remove_file(&path);

        let store = JsonFileHistoryStore::new(&path).with_cap(2);
        assert!(store.load().unwrap().is_empty());

        store.append(entry("2024-01", 1.0)).unwrap();
        store.append(entry("2024-02", 2.0)).unwrap();
        let kept = store.append(entry("2024-03", 3.0)).unwrap();
        assert_eq!(kept.len(), 2);

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded, kept);
        assert_eq!(reloaded[0].key, "2024-02");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
