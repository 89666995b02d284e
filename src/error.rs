use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Illegal transition from {from} via {action}")]
    IllegalTransition { from: String, action: String },

    #[error("API error: {message}")]
    Api { message: String },
}

pub type Result<T> = std::result::Result<T, ScraperError>;

/// Per-URL processing outcomes that are recorded rather than propagated.
///
/// These never abort a batch; the pipeline stores them on the candidate URL or
/// in a schedule's parsing logs so moderation tooling can tell them apart.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum ProcessingFailure {
    #[error("fetch blocked by login wall or anti-bot page: {0}")]
    FetchBlocked(String),

    #[error("fetch timed out after {0} ms")]
    FetchTimeout(u64),

    #[error("fetch failed: {0}")]
    FetchError(String),

    #[error("extraction provider error after {attempts} attempts: {message}")]
    ExtractionProviderError { attempts: u32, message: String },

    #[error("model output failed validation: {0}")]
    ExtractionMalformed(String),

    #[error("geocoding unresolved for '{0}'")]
    GeocodeUnresolved(String),

    #[error("promotion rejected by moderation: {0}")]
    ModerationRejected(String),
}

impl ProcessingFailure {
    /// Transient failures may be retried on a later run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProcessingFailure::FetchTimeout(_) | ProcessingFailure::FetchError(_)
        )
    }

    /// Short machine-readable label used for metrics and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingFailure::FetchBlocked(_) => "fetch_blocked",
            ProcessingFailure::FetchTimeout(_) => "fetch_timeout",
            ProcessingFailure::FetchError(_) => "fetch_error",
            ProcessingFailure::ExtractionProviderError { .. } => "extraction_provider_error",
            ProcessingFailure::ExtractionMalformed(_) => "extraction_malformed",
            ProcessingFailure::GeocodeUnresolved(_) => "geocode_unresolved",
            ProcessingFailure::ModerationRejected(_) => "moderation_rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fetch_timeouts_and_errors_are_transient() {
        assert!(ProcessingFailure::FetchTimeout(5000).is_transient());
        assert!(ProcessingFailure::FetchError("502".into()).is_transient());
        assert!(!ProcessingFailure::FetchBlocked("login".into()).is_transient());
        assert!(!ProcessingFailure::ExtractionMalformed("bad json".into()).is_transient());
        assert!(!ProcessingFailure::ModerationRejected("spam".into()).is_transient());
    }

    #[test]
    fn test_failure_serializes_with_kind_tag() {
        let failure = ProcessingFailure::ExtractionProviderError {
            attempts: 3,
            message: "429".into(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "ExtractionProviderError");
        assert_eq!(json["detail"]["attempts"], 3);
    }
}
