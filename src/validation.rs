//! SQL Validator
//!
//! Syntax check first, then a live attempt against each connection
//! configuration in turn. Outcomes form a trust ladder consumed by the
//! confidence model: database_execution > syntax_only > syntax_check > error.

use crate::config::DatabaseConfig;
use crate::execution::{ClickHouseConnector, ConnectionConfig, ExecutorFactory, SqlExecutor};
use crate::sql_generator::starts_with_sql_keyword;
use crate::text::contains_word;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const DATABASE_UNAVAILABLE_MESSAGE: &str = "database unavailable, syntax validation passed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    DatabaseExecution,
    SyntaxOnly,
    SyntaxCheck,
    Error,
}

impl ValidationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationType::DatabaseExecution => "database_execution",
            ValidationType::SyntaxOnly => "syntax_only",
            ValidationType::SyntaxCheck => "syntax_check",
            ValidationType::Error => "error",
        }
    }

    /// Position on the trust ladder, higher is stronger
    pub fn trust_rank(&self) -> u8 {
        match self {
            ValidationType::DatabaseExecution => 3,
            ValidationType::SyntaxOnly => 2,
            ValidationType::SyntaxCheck => 1,
            ValidationType::Error => 0,
        }
    }
}

impl fmt::Display for ValidationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub executable: bool,
    pub error: Option<String>,
    pub result_row_count: u64,
    pub validation_type: ValidationType,
    /// Label of the connection configuration that executed the query
    pub connection: Option<String>,
}

impl ValidationResult {
    pub fn executed(row_count: u64, connection: &str) -> Self {
        Self {
            valid: true,
            executable: true,
            error: None,
            result_row_count: row_count,
            validation_type: ValidationType::DatabaseExecution,
            connection: Some(connection.to_string()),
        }
    }

    pub fn syntax_only() -> Self {
        Self {
            valid: true,
            executable: false,
            error: Some(DATABASE_UNAVAILABLE_MESSAGE.to_string()),
            result_row_count: 0,
            validation_type: ValidationType::SyntaxOnly,
            connection: None,
        }
    }

    /// Syntax-only outcome that keeps the last database error for the caller
    pub fn syntax_only_after(last_error: &str) -> Self {
        Self {
            error: Some(format!("{} (last error: {})", DATABASE_UNAVAILABLE_MESSAGE, last_error)),
            ..Self::syntax_only()
        }
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            executable: false,
            error: Some(message.into()),
            result_row_count: 0,
            validation_type: ValidationType::SyntaxCheck,
            connection: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            executable: false,
            error: Some(message.into()),
            result_row_count: 0,
            validation_type: ValidationType::Error,
            connection: None,
        }
    }
}

/// Heuristic shape check; `Err` carries a user-facing message
pub fn check_syntax(sql: &str) -> std::result::Result<(), String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err("Empty SQL".to_string());
    }
    if !starts_with_sql_keyword(trimmed) {
        return Err("SQL must start with one of: SELECT, WITH, INSERT, UPDATE, DELETE".to_string());
    }

    let upper = trimmed.to_uppercase();
    if upper.starts_with("WITH") && !contains_word(&upper, "SELECT") {
        return Err("WITH clause must contain SELECT statement".to_string());
    }
    if trimmed.matches('(').count() != trimmed.matches(')').count() {
        return Err("Unbalanced parentheses in SQL".to_string());
    }
    Ok(())
}

/// Read statements get `LIMIT 1` unless they already limit or count;
/// write statements are only parsed through `EXPLAIN AST`.
pub fn prepare_test_sql(sql: &str) -> String {
    let body = sql.trim().trim_end_matches(';').trim_end();
    let upper = body.to_uppercase();

    if upper.starts_with("SELECT") || upper.starts_with("WITH") {
        if contains_word(&upper, "LIMIT") || upper.contains("COUNT(") {
            format!("{};", body)
        } else {
            format!("{} LIMIT 1;", body)
        }
    } else {
        format!("EXPLAIN AST {};", body)
    }
}

pub struct SqlValidator {
    factory: Arc<dyn ExecutorFactory>,
    connections: Vec<ConnectionConfig>,
}

impl SqlValidator {
    pub fn new(factory: Arc<dyn ExecutorFactory>, connections: Vec<ConnectionConfig>) -> Self {
        Self {
            factory,
            connections,
        }
    }

    /// ClickHouse over the full, password-less and minimal configurations
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(Arc::new(ClickHouseConnector), ConnectionConfig::candidates(config))
    }

    pub async fn validate(&self, sql: &str) -> ValidationResult {
        if let Err(message) = check_syntax(sql) {
            info!("Syntax check failed: {}", message);
            return ValidationResult::syntax_error(message);
        }

        let test_sql = prepare_test_sql(sql);
        let mut last_error: Option<String> = None;
        for (attempt, config) in self.connections.iter().enumerate() {
            info!(
                "ClickHouse attempt {} ({}) at {}",
                attempt + 1,
                config.label,
                config.endpoint()
            );

            // Dropped at the end of each iteration, error paths included
            let executor: Box<dyn SqlExecutor> = match self.factory.connect(config) {
                Ok(executor) => executor,
                Err(e) => {
                    warn!("Attempt {} could not create a client: {}", attempt + 1, e);
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            if let Err(e) = executor.ping().await {
                warn!("Attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e.to_string());
                continue;
            }

            match executor.execute(&test_sql).await {
                Ok(outcome) => {
                    info!("Database validation successful ({} rows)", outcome.row_count);
                    return ValidationResult::executed(outcome.row_count, &config.label);
                }
                Err(e) => {
                    warn!("Attempt {} rejected the query: {}", attempt + 1, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        warn!("Database unavailable, using syntax-only validation");
        match last_error {
            Some(message) => ValidationResult::syntax_only_after(&message),
            None => ValidationResult::syntax_only(),
        }
    }
}
