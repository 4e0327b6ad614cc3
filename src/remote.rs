use crate::config::SourceSettings;
use crate::error::{Result, RollupError};
use crate::schema::{RawSource, SourceKind};
use crate::sources::SourceFetcher;
use log::debug;
use reqwest::Client;

const DEFAULT_BASE_URL: &str = "https://api.smartsheet.com/2.0";

/// REST client for the spreadsheet provider.
#[derive(Clone)]
pub struct SheetApiClient {
    client: Client,
    api_token: String,
    base_url: String,
}

impl SheetApiClient {
    pub fn new(api_token: String) -> Self {
        Self {
            client: Client::new(),
            api_token,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn from_settings(settings: &SourceSettings) -> Result<Self> {
        let client = Self::new(settings.require_token()?.to_string());
        Ok(match settings.api_base_url.as_deref() {
            Some(base_url) => client.with_base_url(base_url),
            None => client,
        })
    }

    pub fn source_url(&self, id: u64, kind: SourceKind) -> String {
        match kind {
            SourceKind::Sheet => format!("{}/sheets/{}", self.base_url, id),
            SourceKind::Report => format!("{}/reports/{}?include=sourceSheets", self.base_url, id),
        }
    }
}

impl SourceFetcher for SheetApiClient {
    async fn fetch_raw_source(&self, id: u64, kind: SourceKind) -> Result<RawSource> {
        let url = self.source_url(id, kind);
        debug!("GET {}", url);

        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let error_text = res.text().await?;
            return Err(RollupError::FetchFailed {
                source_id: id.to_string(),
                details: format!("{} request failed (status {}): {}", kind, status, error_text),
            });
        }

        let body = res.text().await?;
        let mut source: RawSource =
            serde_json::from_str(&body).map_err(|e| RollupError::MalformedPayload {
                source_id: id.to_string(),
                details: e.to_string(),
            })?;

        source.kind = kind;
        if source.id.is_none() {
            source.id = Some(id);
        }

        debug!(
            "Fetched {} {}: {} columns, {} rows",
            kind,
            id,
            source.columns.len(),
            source.rows.len()
        );

        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_urls() {
        let client = SheetApiClient::new("token".to_string()).with_base_url("http://localhost:9000/");
        assert_eq!(client.source_url(7, SourceKind::Sheet), "http://localhost:9000/sheets/7");
        assert_eq!(
            client.source_url(8, SourceKind::Report),
            "http://localhost:9000/reports/8?include=sourceSheets"
        );
    }

    #[test]
    fn test_from_settings_requires_token() {
        let result = SheetApiClient::from_settings(&SourceSettings::default());
        assert!(matches!(result, Err(RollupError::MissingConfig(_))));
    }
}
