use busbar_sf_client::security::url::encode_param;
use busbar_sf_client::{QueryResult, RequestMethod};
use serde_json::Value as JsonValue;
use tracing::instrument;

use crate::error::Result;

/// REST service a SELECT is sent to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryService {
    /// `query`: live records only.
    #[default]
    Query,
    /// `queryAll`: includes deleted and merged records.
    QueryAll,
    /// `tooling/query`: Tooling API objects.
    Tooling,
}

impl QueryService {
    /// Path relative to the versioned REST root.
    pub fn path(&self) -> &'static str {
        match self {
            QueryService::Query => "query",
            QueryService::QueryAll => "queryAll",
            QueryService::Tooling => "tooling/query",
        }
    }
}

impl super::SalesforceConnection {
    /// Run a SOQL query and return the first chunk.
    ///
    /// Later chunks are fetched with [`query_more`](Self::query_more) using
    /// the chunk's `nextRecordsUrl`.
    #[instrument(skip(self), fields(alias = %self.config.alias))]
    pub async fn query(&self, soql: &str, service: QueryService) -> Result<QueryResult<JsonValue>> {
        let path = format!("{}?q={}", service.path(), encode_param(soql));
        self.request_json(RequestMethod::Get, &path, None).await
    }

    /// Exchange a locator for the next chunk. A locator is valid only once.
    #[instrument(skip(self), fields(alias = %self.config.alias))]
    pub async fn query_more(&self, locator: &str) -> Result<QueryResult<JsonValue>> {
        self.request_json(RequestMethod::Get, locator, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::connection;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_query_encodes_soql() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v62.0/query"))
            .and(query_param("q", "SELECT Id FROM Contact WHERE LastName = 'O\\'Hara'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalSize": 0, "done": true, "records": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, Default::default());
        let result = conn
            .query(
                "SELECT Id FROM Contact WHERE LastName = 'O\\'Hara'",
                QueryService::Query,
            )
            .await
            .unwrap();
        assert_eq!(result.total_size, 0);
        assert!(result.done);
    }

    #[tokio::test]
    async fn test_query_services() {
        let server = MockServer::start().await;
        for service_path in ["queryAll", "tooling/query"] {
            Mock::given(method("GET"))
                .and(path(format!("/services/data/v62.0/{service_path}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "totalSize": 1, "done": true,
                    "records": [{"attributes": {"type": "X"}, "Id": "a00000000000001AAA"}]
                })))
                .expect(1)
                .mount(&server)
                .await;
        }

        let (conn, _) = connection(&server, Default::default());
        let all = conn
            .query("SELECT Id FROM Contact", QueryService::QueryAll)
            .await
            .unwrap();
        assert_eq!(all.records.len(), 1);
        let tooling = conn
            .query("SELECT Id FROM ApexClass", QueryService::Tooling)
            .await
            .unwrap();
        assert_eq!(tooling.records.len(), 1);
    }

    #[tokio::test]
    async fn test_query_more_uses_locator() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v62.0/query/01gD0000002HU6KIAW-2000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalSize": 2001, "done": true,
                "records": [{"attributes": {"type": "Contact"}, "Id": "003000000000001AAA"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, Default::default());
        let more = conn
            .query_more("/services/data/v62.0/query/01gD0000002HU6KIAW-2000")
            .await
            .unwrap();
        assert_eq!(more.total_size, 2001);
        assert!(more.continuation().is_none());
    }
}
