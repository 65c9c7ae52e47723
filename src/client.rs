//! Authenticated GET access to the datastore API with response classification.

use std::sync::Arc;

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::http::{HttpClient, HttpRequest};
use crate::session::Session;

/// Issues page requests and turns non-2xx answers into errors.
///
/// A 401 notifies the [`Session`] before failing with [`ExportError::Unauthorized`].
#[derive(Clone)]
pub struct ApiClient<H: HttpClient> {
    http_client: Arc<H>,
    session: Arc<dyn Session>,
    config: ExportConfig,
}

impl<H: HttpClient> ApiClient<H> {
    pub fn new(http_client: Arc<H>, session: Arc<dyn Session>, config: ExportConfig) -> Self {
        Self {
            http_client,
            session,
            config,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// GET `path` with `query`, returning the body of a 2xx response.
    pub async fn get(&self, path: &str, query: Vec<(String, String)>) -> Result<String> {
        let request = HttpRequest {
            base_url: self.config.api_url.clone(),
            path: path.to_string(),
            query,
            auth_header: self.config.auth_header.clone(),
            token: self.session.token(),
        };

        let response = self
            .http_client
            .execute(&request, self.config.timeout_ms)
            .await?;

        if response.is_success() {
            return Ok(response.body);
        }

        if response.status == 401 {
            tracing::warn!(path = %request.path, "Upstream API rejected the session");
            self.session.on_unauthorized();
            return Err(ExportError::Unauthorized);
        }

        let error = ExportError::upstream(response.status, &response.body, &request.path_and_query());
        tracing::warn!(path = %request.path, status = response.status, error = %error, "Upstream request failed");
        Err(error)
    }
}

/// Query parameters for one page: `per_page` then `page`, after any `leading` pairs.
pub fn page_query(leading: &[(&str, &str)], per_page: u64, page: u64) -> Vec<(String, String)> {
    leading
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain([
            ("per_page".to_string(), per_page.to_string()),
            ("page".to_string(), page.to_string()),
        ])
        .collect()
}
