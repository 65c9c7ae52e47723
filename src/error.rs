//! Error types for the export pipeline.

use thiserror::Error;

/// Result type alias using the export error type.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Generic message used when the server did not explain a failed request.
pub const GENERIC_UPSTREAM_MESSAGE: &str = "Request could not be initialized.";

/// Main error type for the export pipeline.
#[derive(Error, Debug)]
pub enum ExportError {
    /// A user-supplied attribute name is not in the catalog
    #[error("{0} is not a valid attribute")]
    InvalidAttribute(String),

    /// An aggregation was selected with an empty attribute list
    #[error("No attributes specified for aggregation {aggregation}")]
    NoAttributes { aggregation: String },

    /// An aggregation export was requested without any aggregation
    #[error("No aggregation selected for export")]
    NoAggregationsSelected,

    /// A selection names an aggregation that no selected source carries
    #[error("Unknown aggregation: {0}")]
    UnknownAggregation(String),

    /// Two sources describe the same aggregation id differently
    #[error("Aggregation {id} on source {source_id} disagrees on {field} with the first descriptor")]
    InconsistentAggregation {
        id: String,
        source_id: String,
        field: &'static str,
    },

    /// Malformed or inverted time range
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    /// Configuration that cannot drive an export
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The upstream API answered 401; the session has been notified
    #[error("Unauthorized: no active session")]
    Unauthorized,

    /// Any other non-2xx answer from the upstream API
    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The export was aborted by the caller
    #[error("Export aborted")]
    Aborted,

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV rendering error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// ZIP archive error
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExportError {
    /// Cancellation rejects the job but is not a failure from the user's point of view.
    pub fn is_abort(&self) -> bool {
        matches!(self, ExportError::Aborted)
    }

    /// Build an [`ExportError::Upstream`] from a failed response body.
    ///
    /// The server reports errors as `{"message": "..."}`. When the body is empty or
    /// carries no message, the generic text plus the request path is used instead.
    pub fn upstream(status: u16, body: &str, path: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message")?.as_str().map(str::to_string))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("{}\n{}", GENERIC_UPSTREAM_MESSAGE, path));
        ExportError::Upstream { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_uses_server_message() {
        let err = ExportError::upstream(404, r#"{"code":404,"message":"source not found"}"#, "/data/x");
        match err {
            ExportError::Upstream { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "source not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_upstream_falls_back_to_generic_message() {
        for body in ["", "not json", r#"{"code":500}"#] {
            let err = ExportError::upstream(500, body, "/data/x?page=1");
            let ExportError::Upstream { message, .. } = err else {
                panic!("expected upstream error");
            };
            assert!(message.starts_with(GENERIC_UPSTREAM_MESSAGE));
            assert!(message.ends_with("/data/x?page=1"));
        }
    }

    #[test]
    fn test_is_abort() {
        assert!(ExportError::Aborted.is_abort());
        assert!(!ExportError::Unauthorized.is_abort());
    }
}
