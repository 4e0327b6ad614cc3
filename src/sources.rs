use crate::config::SourceSettings;
use crate::departmental::DepartmentalInputs;
use crate::error::Result;
use crate::schema::{RawSource, SourceKind};
use futures::future::try_join_all;
use log::{info, warn};
use std::future::Future;

/// Anything that can fetch a sheet or report by id.
pub trait SourceFetcher {
    fn fetch_raw_source(
        &self,
        id: u64,
        kind: SourceKind,
    ) -> impl Future<Output = Result<RawSource>> + Send;
}

/// Fetches the main sheet and every configured report concurrently.
///
/// All of these are required: the first failure is returned as is.
pub async fn gather_dashboard_inputs<F>(fetcher: &F, settings: &SourceSettings) -> Result<Vec<RawSource>>
where
    F: SourceFetcher + Sync,
{
    let sheet_id = settings.require_sheet_id()?;

    let mut requests = vec![(sheet_id, SourceKind::Sheet)];
    requests.extend(settings.report_ids.iter().map(|id| (*id, SourceKind::Report)));

    info!("Fetching {} dashboard sources", requests.len());

    let sources = try_join_all(
        requests
            .into_iter()
            .map(|(id, kind)| fetcher.fetch_raw_source(id, kind)),
    )
    .await?;

    Ok(sources)
}

/// Fetches the revenue pivot plus the optional penetration and utilization sources.
///
/// The revenue pivot is required. Optional sources that are not configured,
/// or that fail to fetch, come back as `None`.
pub async fn gather_departmental_inputs<F>(
    fetcher: &F,
    settings: &SourceSettings,
) -> Result<DepartmentalInputs>
where
    F: SourceFetcher + Sync,
{
    let revenue_id = settings.require_revenue_sheet_id()?;

    let (revenue, penetration, utilization) = futures::join!(
        fetcher.fetch_raw_source(revenue_id, SourceKind::Sheet),
        fetch_optional(fetcher, settings.penetration_sheet_id, SourceKind::Sheet, "penetration"),
        fetch_optional(
            fetcher,
            settings.utilization_report_id,
            SourceKind::Report,
            "utilization"
        ),
    );

    Ok(DepartmentalInputs {
        revenue: revenue?,
        penetration,
        utilization,
    })
}

async fn fetch_optional<F>(fetcher: &F, id: Option<u64>, kind: SourceKind, label: &str) -> Option<RawSource>
where
    F: SourceFetcher + Sync,
{
    let id = id?;
    match fetcher.fetch_raw_source(id, kind).await {
        Ok(source) => Some(source),
        Err(e) => {
            warn!("Optional {} source {} unavailable: {}", label, id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RollupError;
    use std::collections::HashMap;

    struct MockFetcher {
        sources: HashMap<u64, RawSource>,
    }

    impl MockFetcher {
        fn with_ids(ids: &[u64]) -> Self {
            let sources = ids
                .iter()
                .map(|id| {
                    (
                        *id,
                        RawSource {
                            id: Some(*id),
                            name: Some(format!("Source {}", id)),
                            ..Default::default()
                        },
                    )
                })
                .collect();
            Self { sources }
        }
    }

    impl SourceFetcher for MockFetcher {
        async fn fetch_raw_source(&self, id: u64, kind: SourceKind) -> Result<RawSource> {
            self.sources
                .get(&id)
                .cloned()
                .map(|source| RawSource { kind, ..source })
                .ok_or_else(|| RollupError::FetchFailed {
                    source_id: id.to_string(),
                    details: "404 Not Found".to_string(),
                })
        }
    }

    #[tokio::test]
    async fn test_gather_dashboard_inputs() {
        let fetcher = MockFetcher::with_ids(&[1, 2, 3]);
        let settings = SourceSettings {
            sheet_id: Some(1),
            report_ids: vec![2, 3],
            ..Default::default()
        };

        let sources = gather_dashboard_inputs(&fetcher, &settings).await.unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].kind, SourceKind::Sheet);
        assert_eq!(sources[2].kind, SourceKind::Report);
        assert_eq!(sources[2].id, Some(3));
    }

    #[tokio::test]
    async fn test_required_source_failure_propagates() {
        let fetcher = MockFetcher::with_ids(&[1]);
        let settings = SourceSettings {
            sheet_id: Some(1),
            report_ids: vec![9],
            ..Default::default()
        };

        let result = gather_dashboard_inputs(&fetcher, &settings).await;
        assert!(matches!(result, Err(RollupError::FetchFailed { .. })));
    }

    #[tokio::test]
    async fn test_missing_sheet_id_fails_before_fetch() {
        let fetcher = MockFetcher::with_ids(&[]);
        let result = gather_dashboard_inputs(&fetcher, &SourceSettings::default()).await;
        assert!(matches!(result, Err(RollupError::MissingConfig(_))));
    }

    #[tokio::test]
    async fn test_optional_source_failure_degrades() {
        let fetcher = MockFetcher::with_ids(&[10, 11]);
        let settings = SourceSettings {
            revenue_sheet_id: Some(10),
            penetration_sheet_id: Some(11),
            utilization_report_id: Some(99),
            ..Default::default()
        };

        let inputs = gather_departmental_inputs(&fetcher, &settings).await.unwrap();
        assert_eq!(inputs.revenue.id, Some(10));
        assert!(inputs.penetration.is_some());
        assert!(inputs.utilization.is_none());
    }

    #[tokio::test]
    async fn test_revenue_failure_is_fatal() {
        let fetcher = MockFetcher::with_ids(&[11]);
        let settings = SourceSettings {
            revenue_sheet_id: Some(10),
            penetration_sheet_id: Some(11),
            ..Default::default()
        };

        let result = gather_departmental_inputs(&fetcher, &settings).await;
        assert!(result.is_err());
    }
}
