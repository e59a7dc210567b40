//! Hybrid SQL Generator
//!
//! Tries the primary LLM with the structured prompt, then the fallback LLM
//! with the simplified prompt, and returns a failed sentinel when neither
//! produces usable SQL. Each source is called at most once per request.

use crate::entities::EntityBag;
use crate::intent::IntentAnalysis;
use crate::llm::LlmBackend;
use crate::prompts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const GENERATION_FAILED_MESSAGE: &str = "SQL generation failed: no LLM source produced usable SQL";

/// Statements the generator accepts
pub const SQL_START_KEYWORDS: &[&str] = &["SELECT", "WITH", "INSERT", "UPDATE", "DELETE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationSource {
    PrimaryLlm,
    FallbackLlm,
    Failed,
    Error,
}

impl GenerationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationSource::PrimaryLlm => "primary_llm",
            GenerationSource::FallbackLlm => "fallback_llm",
            GenerationSource::Failed => "failed",
            GenerationSource::Error => "error",
        }
    }
}

impl fmt::Display for GenerationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub sql: String,
    pub source: GenerationSource,
    pub success: bool,
    pub error: Option<String>,
}

impl GenerationResult {
    fn generated(sql: String, source: GenerationSource) -> Self {
        Self {
            sql,
            source,
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            sql: String::new(),
            source: GenerationSource::Failed,
            success: false,
            error: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            sql: String::new(),
            source: GenerationSource::Error,
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Usage counters shared across requests
#[derive(Debug, Default)]
pub struct GenerationStats {
    total_queries: AtomicU64,
    successful_queries: AtomicU64,
    primary_calls: AtomicU64,
    fallback_calls: AtomicU64,
    failed_generations: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub primary_calls: u64,
    pub fallback_calls: u64,
    pub failed_generations: u64,
    pub success_rate: f64,
    pub primary_usage_rate: f64,
    pub fallback_usage_rate: f64,
}

impl GenerationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.total_queries.load(Ordering::Relaxed);
        let successful = self.successful_queries.load(Ordering::Relaxed);
        let primary = self.primary_calls.load(Ordering::Relaxed);
        let fallback = self.fallback_calls.load(Ordering::Relaxed);
        let rate = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };

        StatsSnapshot {
            total_queries: total,
            successful_queries: successful,
            primary_calls: primary,
            fallback_calls: fallback,
            failed_generations: self.failed_generations.load(Ordering::Relaxed),
            success_rate: rate(successful),
            primary_usage_rate: rate(primary),
            fallback_usage_rate: rate(fallback),
        }
    }

    fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct HybridSqlGenerator {
    primary: Option<Arc<dyn LlmBackend>>,
    fallback: Option<Arc<dyn LlmBackend>>,
    stats: Arc<GenerationStats>,
}

impl HybridSqlGenerator {
    pub fn new(primary: Option<Arc<dyn LlmBackend>>, fallback: Option<Arc<dyn LlmBackend>>) -> Self {
        Self::with_stats(primary, fallback, Arc::new(GenerationStats::new()))
    }

    pub fn with_stats(
        primary: Option<Arc<dyn LlmBackend>>,
        fallback: Option<Arc<dyn LlmBackend>>,
        stats: Arc<GenerationStats>,
    ) -> Self {
        if primary.is_none() && fallback.is_none() {
            warn!("No LLM backend configured, every generation will fail");
        }
        Self {
            primary,
            fallback,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<GenerationStats> {
        Arc::clone(&self.stats)
    }

    pub async fn generate(
        &self,
        query: &str,
        entities: &EntityBag,
        context: &str,
        intent: &IntentAnalysis,
    ) -> GenerationResult {
        GenerationStats::record(&self.stats.total_queries);

        if query.trim().is_empty() {
            GenerationStats::record(&self.stats.failed_generations);
            return GenerationResult::failed("SQL generation failed: empty query");
        }

        let start = Instant::now();

        if let Some(primary) = &self.primary {
            GenerationStats::record(&self.stats.primary_calls);
            let prompt = prompts::primary_sql_prompt(query, entities, context, intent);
            if let Some(sql) = attempt(primary.as_ref(), &prompt).await {
                GenerationStats::record(&self.stats.successful_queries);
                info!("{} generation successful ({:.3}s)", primary.name(), start.elapsed().as_secs_f64());
                return GenerationResult::generated(sql, GenerationSource::PrimaryLlm);
            }
        }

        if let Some(fallback) = &self.fallback {
            GenerationStats::record(&self.stats.fallback_calls);
            let prompt = prompts::fallback_sql_prompt(query, entities, intent);
            if let Some(sql) = attempt(fallback.as_ref(), &prompt).await {
                GenerationStats::record(&self.stats.successful_queries);
                info!("{} fallback generation successful ({:.3}s)", fallback.name(), start.elapsed().as_secs_f64());
                return GenerationResult::generated(sql, GenerationSource::FallbackLlm);
            }
        }

        GenerationStats::record(&self.stats.failed_generations);
        warn!("All generation sources failed for query: {}", query);
        GenerationResult::failed(GENERATION_FAILED_MESSAGE)
    }
}

/// One call, no retry. Errors and unusable answers both yield `None`.
async fn attempt(backend: &dyn LlmBackend, prompt: &str) -> Option<String> {
    match backend.generate(prompt).await {
        Ok(raw) => {
            let sql = sanitize_sql(&raw);
            if sql.is_none() {
                warn!("{} returned unusable output", backend.name());
            }
            sql
        }
        Err(e) => {
            warn!("{} generation failed: {}", backend.name(), e);
            None
        }
    }
}

const BOILERPLATE_PREFIXES: &[&str] = &[
    "here is the sql query:",
    "here's the sql query:",
    "here is the query:",
    "sql query:",
    "sql:",
    "query:",
];

/// Reduces a model answer to a single SQL statement ending in `;`.
/// Returns `None` when what remains does not start with an accepted keyword.
pub fn sanitize_sql(raw: &str) -> Option<String> {
    let unfenced = raw.replace("```sql", "").replace("```SQL", "").replace("```", "");

    let lines: Vec<&str> = unfenced
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !(l.starts_with('#') || l.starts_with("--") || l.starts_with("/*")))
        .filter(|l| !l.eq_ignore_ascii_case("sql"))
        .collect();

    let mut text = lines.join(" ");
    loop {
        let lower = text.to_ascii_lowercase();
        match BOILERPLATE_PREFIXES.iter().find(|p| lower.starts_with(*p)) {
            Some(prefix) => text = text[prefix.len()..].trim_start().to_string(),
            None => break,
        }
    }

    let statement = first_statement(&text).trim().to_string();
    if !starts_with_sql_keyword(&statement) {
        return None;
    }
    Some(format!("{};", statement))
}

/// Text before the first `;` that is not inside a quoted literal
fn first_statement(text: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (None, '\'' | '"' | '`') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, ';') => return &text[..i],
            _ => {}
        }
    }
    text
}

/// Accepted keyword followed by a non-identifier character
pub fn starts_with_sql_keyword(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();
    SQL_START_KEYWORDS.iter().any(|k| {
        upper.starts_with(k)
            && upper[k.len()..]
                .chars()
                .next()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '_'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CareQueryError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FakeLlm {
        answer: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FakeLlm {
        fn new(answer: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for FakeLlm {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .map(str::to_string)
                .ok_or_else(|| CareQueryError::Llm("timeout".to_string()))
        }
    }

    #[test]
    fn test_sanitize_strips_fences_and_comments() {
        let raw = "```sql\n-- top drugs\nSELECT NDC_PREFERRED_BRAND_NM\nFROM t\nLIMIT 5\n```";
        assert_eq!(
            sanitize_sql(raw).unwrap(),
            "SELECT NDC_PREFERRED_BRAND_NM FROM t LIMIT 5;"
        );
    }

    #[test]
    fn test_sanitize_strips_prefix_and_keeps_first_statement() {
        let raw = "Here is the SQL query: SELECT 'a;b' FROM t; DROP TABLE t;";
        assert_eq!(sanitize_sql(raw).unwrap(), "SELECT 'a;b' FROM t;");
    }

    #[test]
    fn test_sanitize_rejects_prose() {
        assert!(sanitize_sql("I cannot answer that.").is_none());
        assert!(sanitize_sql("").is_none());
        assert!(sanitize_sql("SELECTED items are shown").is_none());
        assert!(sanitize_sql("DROP TABLE t;").is_none());
    }

    #[test]
    fn test_sanitize_accepts_all_keywords() {
        for k in SQL_START_KEYWORDS {
            assert!(sanitize_sql(&format!("{} x", k.to_lowercase())).is_some(), "{}", k);
        }
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = FakeLlm::new(Some("SELECT 1"));
        let fallback = FakeLlm::new(Some("SELECT 2"));
        let generator = HybridSqlGenerator::new(Some(primary.clone()), Some(fallback.clone()));
        let result = generator
            .generate("q", &EntityBag::new(), "", &IntentAnalysis::fallback())
            .await;
        assert!(result.success);
        assert_eq!(result.source, GenerationSource::PrimaryLlm);
        assert_eq!(result.sql, "SELECT 1;");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unusable_primary_falls_through_once() {
        let primary = FakeLlm::new(Some("Sorry, no idea"));
        let fallback = FakeLlm::new(Some("SELECT 2"));
        let generator = HybridSqlGenerator::new(Some(primary.clone()), Some(fallback.clone()));
        let result = generator
            .generate("q", &EntityBag::new(), "", &IntentAnalysis::fallback())
            .await;
        assert_eq!(result.source, GenerationSource::FallbackLlm);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);

        let stats = generator.stats().snapshot();
        assert_eq!(stats.total_queries, 1);
        assert_eq!(stats.primary_calls, 1);
        assert_eq!(stats.fallback_calls, 1);
        assert_eq!(stats.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_all_sources_fail() {
        let generator = HybridSqlGenerator::new(Some(FakeLlm::new(None)), None);
        let result = generator
            .generate("q", &EntityBag::new(), "", &IntentAnalysis::fallback())
            .await;
        assert!(!result.success);
        assert_eq!(result.source, GenerationSource::Failed);
        assert_eq!(result.error.as_deref(), Some(GENERATION_FAILED_MESSAGE));
    }

    #[tokio::test]
    async fn test_empty_query_calls_nothing() {
        let primary = FakeLlm::new(Some("SELECT 1"));
        let generator = HybridSqlGenerator::new(Some(primary.clone()), None);
        let result = generator
            .generate("  ", &EntityBag::new(), "", &IntentAnalysis::fallback())
            .await;
        assert!(!result.success);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_stats_rates_are_zero() {
        let snapshot = GenerationStats::new().snapshot();
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.primary_usage_rate, 0.0);
    }
}
