//! REST Query Engine
//!
//! Executes statements against the remote data service's REST query endpoint.

use crate::error::{CopilotError, Result};
use crate::execution::engine::{ExecutionError, RowSet, StatementExecutor};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_API_VERSION: &str = "v59.0";

// REST query API: GET {instance}/services/data/{version}/query?q=<statement>
// Header: Authorization: Bearer <access token>
// Large results are paged through `nextRecordsUrl` until `done` is true.

/// Authenticated handle to the remote service, shared by the executor and the
/// schema provider.
pub struct RestConnection {
    instance_url: String,
    access_token: String,
    api_version: String,
    client: Client,
}

impl RestConnection {
    pub fn new(instance_url: String, access_token: String, api_version: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            instance_url: instance_url.trim_end_matches('/').to_string(),
            access_token,
            api_version,
            client,
        })
    }

    /// Create a connection from `SF_INSTANCE_URL`, `SF_ACCESS_TOKEN` and `SF_API_VERSION`.
    pub fn from_env() -> Result<Self> {
        let instance_url = std::env::var("SF_INSTANCE_URL")
            .map_err(|_| CopilotError::Config("SF_INSTANCE_URL is not set".to_string()))?;
        let access_token = std::env::var("SF_ACCESS_TOKEN")
            .map_err(|_| CopilotError::Config("SF_ACCESS_TOKEN is not set".to_string()))?;
        let api_version =
            std::env::var("SF_API_VERSION").unwrap_or_else(|_| DEFAULT_API_VERSION.to_string());

        Self::new(instance_url, access_token, api_version)
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/services/data/{}/{}",
            self.instance_url,
            self.api_version,
            path.trim_start_matches('/')
        )
    }

    /// Resolve a server-relative URL such as `nextRecordsUrl`.
    pub fn absolute(&self, path: &str) -> String {
        format!("{}/{}", self.instance_url, path.trim_start_matches('/'))
    }

    pub(crate) async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        self.client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
    }
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    message: String,
}

/// Turn a failed response into error text that keeps the service's error code.
pub(crate) fn describe_failure(status: StatusCode, body: &str) -> String {
    if let Ok(errors) = serde_json::from_str::<Vec<ServiceError>>(body) {
        if !errors.is_empty() {
            return errors
                .iter()
                .map(|e| match &e.error_code {
                    Some(code) => format!("{}: {}", code, e.message),
                    None => e.message.clone(),
                })
                .collect::<Vec<_>>()
                .join("; ");
        }
    }

    let body = body.trim();
    let text = match status {
        StatusCode::UNAUTHORIZED => {
            format!("INVALID_SESSION_ID: Session expired or invalid (HTTP 401) {}", body)
        }
        StatusCode::FORBIDDEN => format!("INSUFFICIENT_ACCESS: Permission denied (HTTP 403) {}", body),
        StatusCode::NOT_FOUND => {
            format!("NOT_FOUND: The requested resource does not exist (HTTP 404) {}", body)
        }
        _ => format!("HTTP {}: {}", status.as_u16(), body),
    };
    text.trim_end().to_string()
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "totalSize", default)]
    total_size: u64,
    #[serde(default = "default_done")]
    done: bool,
    #[serde(default)]
    records: Vec<serde_json::Value>,
    #[serde(rename = "nextRecordsUrl")]
    next_records_url: Option<String>,
}

fn default_done() -> bool {
    true
}

pub struct RestQueryEngine {
    connection: Arc<RestConnection>,
    max_rows: usize,
}

impl RestQueryEngine {
    pub fn new(connection: Arc<RestConnection>, max_rows: usize) -> Self {
        Self {
            connection,
            max_rows: max_rows.max(1),
        }
    }

    async fn fetch_page(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<QueryResponse, ExecutionError> {
        let response = self
            .connection
            .get(url, query)
            .await
            .map_err(|e| ExecutionError::new(format!("Request to remote service failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutionError::new(format!("Failed to read remote response: {}", e)))?;

        if !status.is_success() {
            return Err(ExecutionError::new(describe_failure(status, &body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| ExecutionError::new(format!("Unreadable query response: {}", e)))
    }
}

#[async_trait]
impl StatementExecutor for RestQueryEngine {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn execute(&self, statement: &str) -> std::result::Result<RowSet, ExecutionError> {
        debug!("Executing statement: {}", statement);
        let first_url = self.connection.endpoint("query");
        let mut page = self.fetch_page(&first_url, &[("q", statement)]).await?;

        let total_count = page.total_size;
        let mut records = std::mem::take(&mut page.records);

        while !page.done && records.len() < self.max_rows {
            let Some(next) = page.next_records_url.take() else {
                break;
            };
            page = self.fetch_page(&self.connection.absolute(&next), &[]).await?;
            records.append(&mut page.records);
        }

        if records.len() > self.max_rows {
            warn!(
                "Result truncated to {} of {} rows",
                self.max_rows, total_count
            );
            records.truncate(self.max_rows);
        }

        info!("Statement returned {} rows (total {})", records.len(), total_count);
        Ok(RowSet::new(records, total_count))
    }
}
