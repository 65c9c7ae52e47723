//! Paginated listing of the data source registry.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::client::{ApiClient, page_query};
use crate::domain::aggregation::{AggregationDescriptor, AggregationGroups};
use crate::error::Result;
use crate::fetch::PageCursor;
use crate::http::HttpClient;

/// A registered data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub aggregation: Vec<AggregationDescriptor>,
    /// Remaining registry fields (resource, meta, retention, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<AggregationDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<AggregationDescriptor>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct RegistryPage {
    total: u64,
    #[serde(default)]
    entries: Option<Vec<DataSource>>,
}

/// Group the aggregations of `sources`, visiting sources in the given order.
pub fn group_aggregations(sources: &[DataSource]) -> Result<AggregationGroups> {
    AggregationGroups::group(
        sources
            .iter()
            .map(|s| (s.id.as_str(), s.aggregation.as_slice())),
    )
}

/// Reads the registry API.
pub struct RegistryClient<H: HttpClient> {
    client: ApiClient<H>,
}

impl<H: HttpClient> RegistryClient<H> {
    pub fn new(client: ApiClient<H>) -> Self {
        Self { client }
    }

    /// All registered sources in registry order.
    #[tracing::instrument(skip(self))]
    pub async fn list_sources(&self) -> Result<Vec<DataSource>> {
        self.client.config().validate()?;
        let mut cursor = PageCursor::new(self.client.config().registry_per_page);
        let mut sources = Vec::new();

        loop {
            let body = self
                .client
                .get("/registry", page_query(&[], cursor.per_page, cursor.page))
                .await?;
            let page: RegistryPage = serde_json::from_str(&body)?;
            cursor.total = Some(page.total);

            if page.total == 0 {
                tracing::info!("The registry contains no data sources");
                return Ok(Vec::new());
            }
            sources.extend(page.entries.unwrap_or_default());
            tracing::debug!(
                page = cursor.page,
                total = page.total,
                loaded = sources.len(),
                "Loaded registry page"
            );

            if !cursor.has_more() {
                break;
            }
            cursor.advance();
        }

        tracing::info!(sources = sources.len(), "Loaded registry");
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportConfig;
    use crate::error::ExportError;
    use crate::http::{HttpResponse, MockHttpClient};
    use crate::session::StaticSession;
    use std::sync::Arc;

    fn registry(mock: &MockHttpClient, per_page: u64) -> RegistryClient<MockHttpClient> {
        let config = ExportConfig {
            registry_per_page: per_page,
            ..Default::default()
        };
        RegistryClient::new(ApiClient::new(
            Arc::new(mock.clone()),
            Arc::new(StaticSession::default()),
            config,
        ))
    }

    fn ok(body: &str) -> crate::error::Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    #[tokio::test]
    async fn test_lists_all_pages() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "/registry",
            ok(r#"{"total":3,"entries":[
                {"id":"s1","resource":"temp","aggregation":[{"id":"a1","interval":"1h","aggregates":["max"],"retention":""}]},
                {"id":"s2","aggregation":null}
            ]}"#),
        );
        mock.add_response("/registry", ok(r#"{"total":3,"entries":[{"id":"s3"}]}"#));

        let sources = registry(&mock, 2).list_sources().await.unwrap();
        let ids: Vec<_> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(sources[0].extra["resource"], "temp");
        assert!(sources[1].aggregation.is_empty());

        let pages: Vec<_> = mock.get_calls().iter().map(|c| c.page).collect();
        assert_eq!(pages, vec![Some(1), Some(2)]);

        let groups = group_aggregations(&sources).unwrap();
        assert_eq!(groups.get("a1").unwrap().sources, vec!["s1"]);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let mock = MockHttpClient::new();
        mock.add_response("/registry", ok(r#"{"total":0,"entries":[]}"#));
        assert!(registry(&mock, 100).list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_page_size_rejected() {
        let mock = MockHttpClient::new();
        mock.add_response("/registry", ok(r#"{"total":1,"entries":[{"id":"s1"}]}"#));
        let err = registry(&mock, 0).list_sources().await.unwrap_err();
        assert!(matches!(err, ExportError::InvalidConfig(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_error_propagates() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "/registry",
            Ok(HttpResponse {
                status: 500,
                body: String::new(),
            }),
        );
        let err = registry(&mock, 100).list_sources().await.unwrap_err();
        assert!(matches!(err, ExportError::Upstream { status: 500, .. }));
    }
}
