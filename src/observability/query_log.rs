//! Query Log
//!
//! Append-only CSV record of every processed query, plus aggregate statistics
//! read back from the same file. Writing is a side effect of the pipeline and
//! never influences a result.

use crate::error::Result;
use crate::pipeline::PipelineResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// One CSV row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogRecord {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub sql: String,
    pub query_type: String,
    pub confidence: f64,
    pub confidence_grade: String,
    pub generation_source: String,
    pub validation_type: String,
    pub entity_count: usize,
    pub join_count: usize,
    pub processing_time: f64,
    pub success: bool,
    pub error: Option<String>,
}

impl QueryLogRecord {
    pub fn from_result(result: &PipelineResult) -> Self {
        Self {
            timestamp: result.timestamp,
            query: result.query.clone(),
            sql: result.sql.clone(),
            query_type: result.query_type.to_string(),
            confidence: result.confidence,
            confidence_grade: result.confidence_grade.label().to_string(),
            generation_source: result.generation_source.to_string(),
            validation_type: result
                .validation
                .as_ref()
                .map(|v| v.validation_type.to_string())
                .unwrap_or_else(|| "none".to_string()),
            entity_count: result.entities.populated_types().len(),
            join_count: crate::text::count_word(&result.sql, "JOIN"),
            processing_time: result.processing_time,
            success: result.success,
            error: result.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogStatistics {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub average_confidence: f64,
    pub average_processing_time: f64,
    pub query_types: BTreeMap<String, u64>,
    pub generation_sources: BTreeMap<String, u64>,
    /// Rows that could not be parsed and were left out of the averages
    pub skipped_rows: u64,
}

pub struct QueryLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl QueryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row, writing the header first when the file is new or empty
    pub fn append(&self, result: &PipelineResult) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);

        writer.serialize(QueryLogRecord::from_result(result))?;
        writer.flush()?;
        info!("Query result logged: confidence={:.2}", result.confidence);
        Ok(())
    }

    pub fn records(&self) -> Result<Vec<QueryLogRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut records = Vec::new();
        for row in reader.deserialize::<QueryLogRecord>() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable query log row: {}", e),
            }
        }
        Ok(records)
    }

    /// Totals, averages and histograms over the whole log; a missing file yields zeros
    pub fn statistics(&self) -> Result<LogStatistics> {
        let mut stats = LogStatistics::default();
        if !self.path.exists() {
            return Ok(stats);
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut confidence_sum = 0.0;
        let mut time_sum = 0.0;
        let mut parsed = 0u64;

        for row in reader.deserialize::<QueryLogRecord>() {
            stats.total_queries += 1;
            let record = match row {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable query log row: {}", e);
                    stats.skipped_rows += 1;
                    continue;
                }
            };
            parsed += 1;
            if record.success {
                stats.successful_queries += 1;
            }
            confidence_sum += record.confidence;
            time_sum += record.processing_time;
            *stats.query_types.entry(record.query_type).or_insert(0) += 1;
            *stats.generation_sources.entry(record.generation_source).or_insert(0) += 1;
        }

        if parsed > 0 {
            stats.average_confidence = confidence_sum / parsed as f64;
            stats.average_processing_time = time_sum / parsed as f64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineResult;
    use crate::sql_generator::StatsSnapshot;

    fn temp_log() -> QueryLog {
        let path = std::env::temp_dir().join(format!("carequery_log_{}.csv", uuid::Uuid::new_v4()));
        QueryLog::new(path)
    }

    #[test]
    fn test_missing_file_gives_empty_statistics() {
        let log = temp_log();
        assert_eq!(log.statistics().unwrap(), LogStatistics::default());
        assert!(log.records().unwrap().is_empty());
    }

    #[test]
    fn test_append_and_aggregate() {
        let log = temp_log();

        let mut ok = PipelineResult::error_result("top prescribers", "placeholder", 0.5, StatsSnapshot::default());
        ok.success = true;
        ok.error = None;
        ok.sql = "SELECT a FROM t JOIN u ON t.id = u.id LIMIT 10;".to_string();
        ok.confidence = 0.8;
        let failed = PipelineResult::error_result("???", "SQL generation failed", 1.5, StatsSnapshot::default());

        log.append(&ok).unwrap();
        log.append(&failed).unwrap();

        let records = log.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].join_count, 1);
        assert_eq!(records[1].error.as_deref(), Some("SQL generation failed"));

        let stats = log.statistics().unwrap();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.successful_queries, 1);
        assert!((stats.average_confidence - 0.4).abs() < 1e-9);
        assert!((stats.average_processing_time - 1.0).abs() < 1e-9);
        assert_eq!(stats.generation_sources.get("error"), Some(&2));

        let header = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(header.lines().filter(|l| l.starts_with("timestamp,")).count(), 1);
        std::fs::remove_file(log.path()).ok();
    }
}
