pub mod config;
pub mod confidence;
pub mod entities;
pub mod error;
pub mod execution;
pub mod hyde;
pub mod intent;
pub mod knowledge_base;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod prompts;
pub mod schema_rag;
pub mod sql_evaluator;
pub mod sql_generator;
pub mod text;
pub mod validation;

pub use config::AppConfig;
pub use confidence::{ConfidenceBreakdown, ConfidenceCalculator, ConfidenceGrade, TierPolicy};
pub use entities::{EntityBag, EntityExtractor, EntityType};
pub use error::{CareQueryError, Result};
pub use intent::{IntentAnalysis, QueryType};
pub use pipeline::{PipelineResult, QueryPipeline};
pub use sql_generator::{GenerationSource, HybridSqlGenerator};
pub use validation::{SqlValidator, ValidationResult, ValidationType};
