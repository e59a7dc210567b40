//! Query Pipeline
//!
//! One request, strictly sequential:
//!
//! 1. length check
//! 2. entity extraction and intent classification
//! 3. HyDE examples
//! 4. context retrieval
//! 5. SQL generation (primary, then fallback LLM)
//! 6. validation against ClickHouse
//! 7. evaluation diagnostics
//! 8. confidence scoring
//!
//! A generation failure ends the request with a failed result. Later stages
//! degrade to defaults. Anything else that goes wrong becomes an error result,
//! so `process` always returns a well-formed [`PipelineResult`].

use crate::config::{AppConfig, ProcessingConfig};
use crate::confidence::{ConfidenceBreakdown, ConfidenceCalculator, ConfidenceGrade, ScoringInput, TierPolicy};
use crate::entities::{EntityBag, EntityExtractor, EntityMapping};
use crate::error::{CareQueryError, Result};
use crate::execution::{ClickHouseConnector, ConnectionConfig, ExecutorFactory};
use crate::hyde::HydeGenerator;
use crate::intent::{IntentAnalysis, QueryType};
use crate::llm::{GeminiClient, LlmBackend, OllamaClient};
use crate::observability::QueryLog;
use crate::schema_rag::{ContextRetriever, HashingEmbedder, HttpEmbedder, RetrievedContext, SchemaIndex, TextEmbedder, VectorIndex};
use crate::sql_evaluator::{SqlEvaluation, SqlEvaluator};
use crate::sql_generator::{GenerationResult, GenerationSource, HybridSqlGenerator, StatsSnapshot};
use crate::validation::{SqlValidator, ValidationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Quality score used when evaluation could not run
pub const NEUTRAL_QUALITY_SCORE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub sql: String,
    pub success: bool,
    pub confidence: f64,
    pub confidence_grade: ConfidenceGrade,
    pub query_type: QueryType,
    pub intent: IntentAnalysis,
    pub entities: EntityBag,
    pub mappings: Vec<EntityMapping>,
    pub hyde_examples: Vec<String>,
    pub context: RetrievedContext,
    pub generation_source: GenerationSource,
    pub validation: Option<ValidationResult>,
    pub evaluation: Option<SqlEvaluation>,
    pub quality_score: f64,
    pub confidence_breakdown: Option<ConfidenceBreakdown>,
    pub generation_stats: StatsSnapshot,
    /// Seconds from the start of `process`
    pub processing_time: f64,
    pub error: Option<String>,
}

impl PipelineResult {
    /// Result for a request that failed outside the normal stage flow
    pub fn error_result(
        query: &str,
        error: impl Into<String>,
        processing_time: f64,
        generation_stats: StatsSnapshot,
    ) -> Self {
        let intent = IntentAnalysis::fallback();
        Self {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query: query.to_string(),
            sql: String::new(),
            success: false,
            confidence: 0.0,
            confidence_grade: ConfidenceGrade::Failed,
            query_type: intent.query_type,
            intent,
            entities: EntityBag::new(),
            mappings: Vec::new(),
            hyde_examples: Vec::new(),
            context: RetrievedContext::default(),
            generation_source: GenerationSource::Error,
            validation: None,
            evaluation: None,
            quality_score: 0.0,
            confidence_breakdown: None,
            generation_stats,
            processing_time,
            error: Some(error.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validation.as_ref().map_or(false, |v| v.valid)
    }

    pub fn is_executable(&self) -> bool {
        self.validation.as_ref().map_or(false, |v| v.executable)
    }
}

/// Per-request state carried from the understanding stages to assembly
struct Understanding {
    entities: EntityBag,
    intent: IntentAnalysis,
    hyde_examples: Vec<String>,
    context: RetrievedContext,
}

pub struct QueryPipeline {
    extractor: EntityExtractor,
    hyde_llm: Option<Arc<dyn LlmBackend>>,
    hyde: HydeGenerator,
    index: Option<Arc<dyn VectorIndex>>,
    retriever: ContextRetriever,
    generator: HybridSqlGenerator,
    validator: SqlValidator,
    evaluator: SqlEvaluator,
    calculator: ConfidenceCalculator,
    query_log: Option<QueryLog>,
    processing: ProcessingConfig,
}

impl QueryPipeline {
    /// Pipeline without a vector index or query log, using default limits.
    /// The primary backend also produces the HyDE examples.
    pub fn new(
        primary: Option<Arc<dyn LlmBackend>>,
        fallback: Option<Arc<dyn LlmBackend>>,
        executors: Arc<dyn ExecutorFactory>,
        connections: Vec<ConnectionConfig>,
    ) -> Self {
        let processing = ProcessingConfig::default();
        Self {
            extractor: EntityExtractor::new(),
            hyde: HydeGenerator::new(primary.clone(), processing.max_hyde_examples),
            hyde_llm: primary.clone(),
            retriever: ContextRetriever::new(None, processing.max_context_documents),
            index: None,
            generator: HybridSqlGenerator::new(primary, fallback),
            validator: SqlValidator::new(executors, connections),
            evaluator: SqlEvaluator::new(),
            calculator: ConfidenceCalculator::new(),
            query_log: None,
            processing,
        }
    }

    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.retriever = ContextRetriever::new(Some(Arc::clone(&index)), self.processing.max_context_documents);
        self.index = Some(index);
        self
    }

    pub fn with_query_log(mut self, query_log: QueryLog) -> Self {
        self.query_log = Some(query_log);
        self
    }

    pub fn with_processing(mut self, processing: ProcessingConfig) -> Self {
        self.hyde = HydeGenerator::new(self.hyde_llm.clone(), processing.max_hyde_examples);
        self.retriever = ContextRetriever::new(self.index.clone(), processing.max_context_documents);
        self.processing = processing;
        self
    }

    pub fn with_policy(mut self, policy: TierPolicy) -> Self {
        self.calculator = ConfidenceCalculator::with_policy(policy);
        self
    }

    /// Wires the real backends. Missing credentials disable a backend rather
    /// than failing; an index that cannot be built is skipped.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let primary: Option<Arc<dyn LlmBackend>> = match GeminiClient::from_config(&config.llm.primary)? {
            Some(client) => {
                info!("Primary LLM: gemini ({})", client.model());
                Some(Arc::new(client))
            }
            None => None,
        };
        let fallback: Option<Arc<dyn LlmBackend>> = match OllamaClient::from_config(&config.llm.fallback)? {
            Some(client) => {
                info!("Fallback LLM: ollama ({})", client.model());
                Some(Arc::new(client))
            }
            None => None,
        };

        let mut pipeline = Self::new(
            primary,
            fallback,
            Arc::new(ClickHouseConnector),
            ConnectionConfig::candidates(&config.database),
        )
        .with_processing(config.processing.clone());

        if config.retrieval.enabled {
            let embedder: Arc<dyn TextEmbedder> = match HttpEmbedder::from_config(&config.retrieval)? {
                Some(remote) => Arc::new(remote),
                None => Arc::new(HashingEmbedder::new(config.retrieval.hashing_dimensions)),
            };
            match SchemaIndex::build(embedder).await {
                Ok(index) => pipeline = pipeline.with_index(Arc::new(index)),
                Err(e) => warn!("Schema index unavailable, continuing without context: {}", e),
            }
        }

        if config.logging.enabled {
            pipeline = pipeline.with_query_log(QueryLog::new(config.logging.csv_path.clone()));
        }
        Ok(pipeline)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.generator.stats().snapshot()
    }

    pub fn query_log(&self) -> Option<&QueryLog> {
        self.query_log.as_ref()
    }

    /// Runs the validator alone
    pub async fn validate_sql(&self, sql: &str) -> ValidationResult {
        self.validator.validate(sql).await
    }

    pub async fn process(&self, query: &str) -> PipelineResult {
        let start = Instant::now();
        info!("Starting query processing: {}", query);

        let timeout = Duration::from_secs(self.processing.query_timeout_secs.max(1));
        let result = match tokio::time::timeout(timeout, self.run(query, start)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Query processing failed: {}", e);
                PipelineResult::error_result(query, e.to_string(), start.elapsed().as_secs_f64(), self.stats())
            }
            Err(_) => {
                error!("Query processing timed out after {:?}", timeout);
                PipelineResult::error_result(
                    query,
                    format!("Query processing timed out after {}s", timeout.as_secs()),
                    start.elapsed().as_secs_f64(),
                    self.stats(),
                )
            }
        };

        if let Some(log) = &self.query_log {
            if let Err(e) = log.append(&result) {
                warn!("Failed to log query result: {}", e);
            }
        }
        result
    }

    async fn run(&self, query: &str, start: Instant) -> Result<PipelineResult> {
        let length = query.chars().count();
        if length > self.processing.max_query_length {
            return Err(CareQueryError::InvalidInput(format!(
                "Query is {} characters, maximum is {}",
                length, self.processing.max_query_length
            )));
        }

        let understanding = self.understand(query).await;

        info!("Generating SQL");
        let generation = self
            .generator
            .generate(
                query,
                &understanding.entities,
                &understanding.context.as_prompt_text(),
                &understanding.intent,
            )
            .await;
        if !generation.success {
            warn!("SQL generation failed, skipping validation and scoring");
            return Ok(self.failed(query, understanding, generation, start));
        }

        info!("Validating SQL");
        let validation = self.validator.validate(&generation.sql).await;

        let mappings = understanding.entities.mappings();
        let evaluation = match self.evaluator.evaluate(
            &generation.sql,
            query,
            &understanding.intent,
            &understanding.entities,
            &mappings,
            &understanding.context.scores,
        ) {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                warn!("SQL evaluation failed, using neutral quality score: {}", e);
                None
            }
        };
        let quality_score = evaluation
            .as_ref()
            .map_or(NEUTRAL_QUALITY_SCORE, |e| e.quality_score);

        let (confidence, breakdown) = self.calculator.score(&ScoringInput {
            sql: &generation.sql,
            source: generation.source,
            query,
            entities: &understanding.entities,
            hyde_examples: &understanding.hyde_examples,
            validation: &validation,
            intent: &understanding.intent,
            elapsed_secs: start.elapsed().as_secs_f64(),
        });
        let confidence_grade = ConfidenceGrade::from_score(confidence);

        let processing_time = start.elapsed().as_secs_f64();
        info!(
            "Query processing completed in {:.2}s with confidence {:.1}% ({})",
            processing_time,
            confidence * 100.0,
            confidence_grade
        );

        Ok(PipelineResult {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query: query.to_string(),
            sql: generation.sql,
            success: true,
            confidence,
            confidence_grade,
            query_type: understanding.intent.query_type,
            intent: understanding.intent,
            entities: understanding.entities,
            mappings,
            hyde_examples: understanding.hyde_examples,
            context: understanding.context,
            generation_source: generation.source,
            validation: Some(validation),
            evaluation,
            quality_score,
            confidence_breakdown: Some(breakdown),
            generation_stats: self.stats(),
            processing_time,
            error: None,
        })
    }

    async fn understand(&self, query: &str) -> Understanding {
        info!("Classifying query and extracting entities");
        let (entities, intent) = self.extractor.extract(query);
        info!(
            "Query type {} with {} entity values",
            intent.query_type,
            entities.total_values()
        );

        info!("Generating HyDE examples");
        let hyde_examples = self.hyde.generate(query, &intent).await;

        info!("Retrieving context");
        let context = self.retriever.retrieve(query, &intent, &hyde_examples).await;

        Understanding {
            entities,
            intent,
            hyde_examples,
            context,
        }
    }

    fn failed(
        &self,
        query: &str,
        understanding: Understanding,
        generation: GenerationResult,
        start: Instant,
    ) -> PipelineResult {
        PipelineResult {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query: query.to_string(),
            sql: generation.sql,
            success: false,
            confidence: 0.0,
            confidence_grade: ConfidenceGrade::Failed,
            query_type: understanding.intent.query_type,
            mappings: understanding.entities.mappings(),
            intent: understanding.intent,
            entities: understanding.entities,
            hyde_examples: understanding.hyde_examples,
            context: understanding.context,
            generation_source: generation.source,
            validation: None,
            evaluation: None,
            quality_score: 0.0,
            confidence_breakdown: None,
            generation_stats: self.stats(),
            processing_time: start.elapsed().as_secs_f64(),
            error: generation.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::SqlExecutor;
    use async_trait::async_trait;

    struct Unreachable;

    impl ExecutorFactory for Unreachable {
        fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn SqlExecutor>> {
            Err(CareQueryError::Database("connection refused".to_string()))
        }
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl LlmBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn pipeline(primary: Option<Arc<dyn LlmBackend>>) -> QueryPipeline {
        let connections = ConnectionConfig::candidates(&Default::default());
        QueryPipeline::new(primary, None, Arc::new(Unreachable), connections)
    }

    #[tokio::test]
    async fn test_overlong_query_is_an_error_result() {
        let pipeline = pipeline(None);
        let query = "x".repeat(501);
        let result = pipeline.process(&query).await;
        assert!(!result.success);
        assert_eq!(result.generation_source, GenerationSource::Error);
        assert!(result.error.unwrap().contains("maximum is 500"));
    }

    #[tokio::test]
    async fn test_no_backends_fails_without_scoring() {
        let result = pipeline(None).process("top 5 cardiologists in Texas").await;
        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.confidence_grade, ConfidenceGrade::Failed);
        assert!(result.validation.is_none());
        assert!(result.confidence_breakdown.is_none());
        assert!(result.entities.has(crate::entities::EntityType::State));
    }

    #[tokio::test]
    async fn test_offline_database_still_scores() {
        let llm: Arc<dyn LlmBackend> = Arc::new(Fixed(
            "SELECT first_name, last_name FROM as_providers_v1 WHERE specialties[1] ILIKE '%Cardiology%' LIMIT 5",
        ));
        let result = pipeline(Some(llm)).process("top 5 cardiologists").await;
        assert!(result.success);
        assert!(result.is_valid());
        assert!(!result.is_executable());
        assert!(result.sql.ends_with(';'));
        assert!((0.0..=1.0).contains(&result.confidence));
        assert!(result.evaluation.is_some());
    }

    #[tokio::test]
    async fn test_from_config_without_gemini_key() {
        let mut config = AppConfig::default();
        config.llm.fallback.enabled = false;
        config.retrieval.enabled = false;
        config.logging.enabled = false;

        let pipeline = QueryPipeline::from_config(&config).await.unwrap();
        assert!(pipeline.hyde_llm.is_none());
        assert!(pipeline.index.is_none());
        let result = pipeline.process("top 5 cardiologists in Texas").await;
        assert_eq!(result.generation_source, GenerationSource::Failed);
    }
}
