//! ClickHouse HTTP client
//!
//! Statements are POSTed to the HTTP interface with `default_format=JSON`;
//! the row count comes from the `rows` field of the response.

use crate::error::{CareQueryError, Result};
use crate::execution::{ConnectionConfig, ExecutorFactory, QueryOutcome, SqlExecutor};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ClickHouseJsonResponse {
    #[serde(default)]
    rows: Option<u64>,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

pub struct ClickHouseClient {
    client: Client,
    base_url: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl ClickHouseClient {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| CareQueryError::Database(format!("Failed to create HTTP client: {}", e)))?;

        let host = config.host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host, config.port)
        } else {
            format!("http://{}:{}", host, config.port)
        };

        Ok(Self {
            client,
            base_url,
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: config.timeout,
        })
    }

    async fn post(&self, sql: &str) -> Result<String> {
        let mut request = self
            .client
            .post(format!("{}/", self.base_url))
            .query(&[("database", self.database.as_str()), ("default_format", "JSON")])
            .body(sql.trim().trim_end_matches(';').to_string());

        if let Some(user) = &self.username {
            request = request.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CareQueryError::Database(format!("ClickHouse request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CareQueryError::Database(format!("Failed to read ClickHouse response: {}", e)))?;

        if !status.is_success() {
            return Err(CareQueryError::Database(format!(
                "ClickHouse error ({}): {}",
                status,
                body.trim()
            )));
        }
        Ok(body)
    }

    async fn bounded<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            CareQueryError::Database(format!("ClickHouse call timed out after {:?}", self.timeout))
        })?
    }
}

/// Row count of a JSON-format response; empty bodies count as zero rows
pub fn parse_row_count(body: &str) -> Result<u64> {
    if body.trim().is_empty() {
        return Ok(0);
    }
    let parsed: ClickHouseJsonResponse = serde_json::from_str(body)?;
    Ok(parsed.rows.unwrap_or(parsed.data.len() as u64))
}

#[async_trait]
impl SqlExecutor for ClickHouseClient {
    async fn ping(&self) -> Result<()> {
        self.bounded(self.post("SELECT 1")).await.map(|_| ())
    }

    async fn execute(&self, sql: &str) -> Result<QueryOutcome> {
        debug!("Executing on ClickHouse: {}", sql.chars().take(150).collect::<String>());
        let body = self.bounded(self.post(sql)).await?;
        let row_count = parse_row_count(&body).unwrap_or_else(|e| {
            warn!("Unparseable ClickHouse response, assuming 0 rows: {}", e);
            0
        });
        Ok(QueryOutcome { row_count })
    }
}

/// Creates a fresh [`ClickHouseClient`] for every connection attempt
#[derive(Debug, Clone, Default)]
pub struct ClickHouseConnector;

impl ExecutorFactory for ClickHouseConnector {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SqlExecutor>> {
        Ok(Box::new(ClickHouseClient::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    #[test]
    fn test_parse_row_count() {
        let body = r#"{"meta":[{"name":"x","type":"UInt8"}],"data":[{"x":1}],"rows":1,"statistics":{}}"#;
        assert_eq!(parse_row_count(body).unwrap(), 1);
        assert_eq!(parse_row_count(r#"{"data":[{},{}]}"#).unwrap(), 2);
        assert_eq!(parse_row_count("").unwrap(), 0);
        assert!(parse_row_count("not json").is_err());
    }

    #[test]
    fn test_base_url_from_host() {
        let mut config = ConnectionConfig::candidates(&DatabaseConfig::default()).remove(0);
        let client = ClickHouseClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8123");

        config.host = "https://ch.example.com/".to_string();
        let client = ClickHouseClient::new(&config).unwrap();
        assert_eq!(client.base_url, "https://ch.example.com:8123");
    }
}
