use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollupError {
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid rule table: {0}")]
    InvalidRuleTable(String),

    #[error("Fetch failed for source {source_id}: {details}")]
    FetchFailed { source_id: String, details: String },

    #[error("Malformed payload from source {source_id}: {details}")]
    MalformedPayload { source_id: String, details: String },

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[cfg(feature = "remote")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RollupError {
    /// HTTP status a request handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            RollupError::FetchFailed { .. } | RollupError::MalformedPayload { .. } => 502,
            #[cfg(feature = "remote")]
            RollupError::Http(_) => 502,
            _ => 500,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RollupError::MissingConfig(_)
                | RollupError::InvalidConfig(_)
                | RollupError::InvalidRuleTable(_)
        )
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: self.to_string(),
        }
    }
}

/// The `{ "error": message }` body returned instead of a summary.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
}

pub type Result<T> = std::result::Result<T, RollupError>;
