//! Export configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Configuration for talking to the datastore API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Base URL of the datastore API (e.g., <http://localhost:8085>)
    pub api_url: String,

    /// Data sources requested per page from the registry API
    pub registry_per_page: u64,

    /// Data points requested per page from the data API
    pub data_per_page: u64,

    /// Aggregated points requested per page from the aggregation API
    pub aggr_per_page: u64,

    /// Timeout for each page request in milliseconds
    pub timeout_ms: u64,

    /// Header used to carry the session ticket
    pub auth_header: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8085".to_string(),
            registry_per_page: 100,
            data_per_page: 1000,
            aggr_per_page: 1000,
            timeout_ms: 60_000,
            auth_header: "X-Auth-Token".to_string(),
        }
    }
}

impl ExportConfig {
    /// Load configuration from a JSON file. Keys that are absent keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: ExportConfig = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), api_url = %config.api_url, "Loaded export configuration");
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make pagination impossible.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("registry_per_page", self.registry_per_page),
            ("data_per_page", self.data_per_page),
            ("aggr_per_page", self.aggr_per_page),
        ] {
            if value == 0 {
                return Err(ExportError::InvalidConfig(format!("{name} must be at least 1")));
            }
        }
        if self.api_url.is_empty() {
            return Err(ExportError::InvalidConfig("api_url must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"api_url": "https://hds.example.com", "data_per_page": 50}}"#).unwrap();

        let config = ExportConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.api_url, "https://hds.example.com");
        assert_eq!(config.data_per_page, 50);
        assert_eq!(config.aggr_per_page, 1000);
        assert_eq!(config.registry_per_page, 100);
        assert_eq!(config.auth_header, "X-Auth-Token");
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let config = ExportConfig {
            aggr_per_page: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ExportError::InvalidConfig(_))));
    }
}
