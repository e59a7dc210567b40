//! Database access used by the validator.
//!
//! Connections are created per validation through an [`ExecutorFactory`] and
//! dropped when the validation finishes.

pub mod clickhouse;

pub use clickhouse::{ClickHouseClient, ClickHouseConnector};

use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One way of connecting to the analytical store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub label: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl ConnectionConfig {
    /// Full credentials, then without password, then server defaults
    pub fn candidates(config: &DatabaseConfig) -> Vec<ConnectionConfig> {
        let base = ConnectionConfig {
            label: "full".to_string(),
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            username: Some(config.username.clone()),
            password: Some(config.password.clone()),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        };
        let without_password = ConnectionConfig {
            label: "without_password".to_string(),
            password: None,
            ..base.clone()
        };
        let minimal = ConnectionConfig {
            label: "minimal".to_string(),
            username: None,
            password: None,
            ..base.clone()
        };
        vec![base, without_password, minimal]
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Rows returned by a validation query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub row_count: u64,
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Runs `SELECT 1`; an error means the store is unreachable with this configuration
    async fn ping(&self) -> Result<()>;

    async fn execute(&self, sql: &str) -> Result<QueryOutcome>;
}

pub trait ExecutorFactory: Send + Sync {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SqlExecutor>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_degrade_credentials() {
        let candidates = ConnectionConfig::candidates(&DatabaseConfig::default());
        let labels: Vec<_> = candidates.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["full", "without_password", "minimal"]);
        assert!(candidates[0].password.is_some());
        assert!(candidates[1].password.is_none());
        assert!(candidates[1].username.is_some());
        assert!(candidates[2].username.is_none());
        assert!(candidates.iter().all(|c| c.database == "docnexus"));
    }
}
