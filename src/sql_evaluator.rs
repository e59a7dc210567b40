//! SQL Evaluator
//!
//! Structural, schema and entity-alignment diagnostics for a generated query.
//! The result is for inspection and the legacy quality score only; the
//! confidence model never reads it.
//!
//! Tables and columns come from the sqlparser AST (ClickHouse dialect). When
//! the statement does not parse, a regex pass over FROM/JOIN and the select
//! list is used instead.

use crate::entities::{EntityBag, EntityMapping, EntityType};
use crate::error::{CareQueryError, Result};
use crate::intent::{IntentAnalysis, QueryType};
use crate::knowledge_base as kb;
use crate::text::{contains_word, count_word};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{visit_expressions, visit_relations, Expr, Statement};
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use tracing::{debug, info};

/// Statement starts accepted by the diagnostic syntax check
pub const EVALUATION_START_KEYWORDS: &[&str] =
    &["SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER"];

/// Names that show up in the select list but are never schema columns
const NON_COLUMN_WORDS: &[&str] = &[
    "SELECT", "DISTINCT", "AS", "COUNT", "SUM", "AVG", "MAX", "MIN", "FROM", "CASE", "WHEN", "THEN",
    "ELSE", "END", "AND", "OR", "NOT", "NULL", "TOSTRING", "TOYEAR", "ROUND", "UNIQ", "ANY", "IF",
];

lazy_static! {
    static ref FROM_TABLE: Option<Regex> = Regex::new(r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_.]*)").ok();
    static ref JOIN_TABLE: Option<Regex> = Regex::new(r"(?i)\bJOIN\s+([A-Za-z_][A-Za-z0-9_.]*)").ok();
    static ref SELECT_LIST: Option<Regex> = Regex::new(r"(?is)\bSELECT\s+(.*?)\bFROM\b").ok();
    static ref IDENTIFIER: Option<Regex> = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").ok();
    static ref DATE_LITERAL: Option<Regex> = Regex::new(r"\d{4}-\d{2}-\d{2}").ok();
}

fn pattern(re: &'static Option<Regex>, name: &str) -> Result<&'static Regex> {
    re.as_ref()
        .ok_or_else(|| CareQueryError::Validation(format!("{} pattern failed to compile", name)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDetails {
    pub tables_found: Vec<String>,
    pub tables_valid: Vec<String>,
    pub columns_found: Vec<String>,
    pub columns_valid: Vec<String>,
    pub invalid_elements: Vec<String>,
    /// Whether the names came from the parsed AST rather than the regex fallback
    pub from_ast: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDetails {
    pub total_entities: usize,
    pub entities_in_sql: usize,
    pub found_entities: Vec<String>,
    pub missing_entities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingDetails {
    pub total_mappings: usize,
    pub used_mappings: usize,
    pub used_columns: Vec<String>,
    pub unused_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub score: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub has_valid_structure: bool,
    pub uses_appropriate_tables: bool,
    pub handles_dialect_types: bool,
    pub incorporates_entities: bool,
    pub follows_best_practices: bool,
    pub complexity_appropriate: bool,
}

impl QualityMetrics {
    fn passed(&self) -> usize {
        [
            self.has_valid_structure,
            self.uses_appropriate_tables,
            self.handles_dialect_types,
            self.incorporates_entities,
            self.follows_best_practices,
            self.complexity_appropriate,
        ]
        .iter()
        .filter(|passed| **passed)
        .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total_checks: usize,
    pub passed_checks: usize,
    /// "good", "fair" or "poor" from the legacy quality score
    pub overall_quality: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlEvaluation {
    pub query_type: QueryType,
    pub syntax_score: f64,
    pub syntax_message: String,
    pub schema_score: f64,
    pub schema_message: String,
    pub schema_details: SchemaDetails,
    pub dialect_score: f64,
    pub dialect_message: String,
    pub dialect_warnings: Vec<String>,
    pub entity_score: f64,
    pub entity_message: String,
    pub entity_details: EntityDetails,
    pub mapping_score: f64,
    pub mapping_message: String,
    pub mapping_details: MappingDetails,
    pub value_score: f64,
    pub value_message: String,
    pub retrieval_score: f64,
    /// Legacy weighted blend of the scores above
    pub quality_score: f64,
    pub performance: PerformanceAnalysis,
    pub quality_metrics: QualityMetrics,
    pub summary: EvaluationSummary,
}

impl SqlEvaluation {
    /// Short human-readable report
    pub fn summary_text(&self) -> String {
        let mut text = format!(
            "SQL Evaluation: {}/{} checks passed ({} quality)\n",
            self.summary.passed_checks, self.summary.total_checks, self.summary.overall_quality
        );
        if self.syntax_score < 0.5 {
            text.push_str("Syntax issues detected\n");
        }
        if self.schema_score < 0.5 {
            text.push_str("Schema compliance issues\n");
        }
        if self.entity_score < 0.5 {
            text.push_str("Entity incorporation issues\n");
        }
        if !self.performance.issues.is_empty() {
            text.push_str(&format!(
                "{} performance considerations\n",
                self.performance.issues.len()
            ));
        }
        text
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlEvaluator;

impl SqlEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        sql: &str,
        query: &str,
        intent: &IntentAnalysis,
        entities: &EntityBag,
        mappings: &[EntityMapping],
        retrieval_scores: &[f32],
    ) -> Result<SqlEvaluation> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(CareQueryError::InvalidInput("cannot evaluate empty SQL".to_string()));
        }
        debug!("Evaluating SQL for query: {}", query);

        let (syntax_score, syntax_message, statements) = check_syntax(sql);
        let schema_details = match &statements {
            Some(statements) => schema_from_ast(statements),
            None => schema_from_text(sql)?,
        };
        let (schema_score, schema_message, schema_details) = score_schema(schema_details);
        let (dialect_score, dialect_warnings) = check_dialect(sql, &schema_details.tables_valid)?;
        let dialect_message = if dialect_warnings.is_empty() {
            "Good ClickHouse compatibility".to_string()
        } else {
            format!("ClickHouse compatibility with {} warnings", dialect_warnings.len())
        };
        let (entity_score, entity_message, entity_details) = score_entities(sql, entities);
        let (mapping_score, mapping_message, mapping_details) = score_mappings(sql, mappings);
        let (value_score, value_message) = score_values(entities);
        let retrieval_score = retrieval_relevance(retrieval_scores);

        let quality_score = round3(
            0.20 * retrieval_score
                + 0.25 * syntax_score
                + 0.20 * schema_score
                + 0.15 * dialect_score
                + 0.10 * entity_score
                + 0.05 * value_score
                + 0.05 * mapping_score,
        );

        let performance = analyze_performance(sql);
        let recommended_used = intent.recommended_tables.is_empty()
            || intent
                .recommended_tables
                .iter()
                .any(|t| schema_details.tables_valid.iter().any(|v| v.eq_ignore_ascii_case(t)));
        let quality_metrics = QualityMetrics {
            has_valid_structure: syntax_score > 0.5,
            uses_appropriate_tables: schema_score > 0.7 && recommended_used,
            handles_dialect_types: dialect_score > 0.8,
            incorporates_entities: entity_score > 0.5,
            follows_best_practices: performance.score > 0.8,
            complexity_appropriate: count_word(sql, "JOIN") <= 3,
        };

        let summary = EvaluationSummary {
            total_checks: 6,
            passed_checks: quality_metrics.passed(),
            overall_quality: if quality_score > 0.7 {
                "good"
            } else if quality_score > 0.5 {
                "fair"
            } else {
                "poor"
            }
            .to_string(),
        };
        info!(
            "SQL evaluation completed: {}/{} checks, {} quality",
            summary.passed_checks, summary.total_checks, summary.overall_quality
        );

        Ok(SqlEvaluation {
            query_type: intent.query_type,
            syntax_score,
            syntax_message,
            schema_score,
            schema_message,
            schema_details,
            dialect_score,
            dialect_message,
            dialect_warnings,
            entity_score,
            entity_message,
            entity_details,
            mapping_score,
            mapping_message,
            mapping_details,
            value_score,
            value_message,
            retrieval_score,
            quality_score,
            performance,
            quality_metrics,
            summary,
        })
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn ratio_or_neutral(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.5
    } else {
        hits as f64 / total as f64
    }
}

fn check_syntax(sql: &str) -> (f64, String, Option<Vec<Statement>>) {
    let upper = sql.to_uppercase();
    let first = upper.split_whitespace().next().unwrap_or("");
    if !EVALUATION_START_KEYWORDS.contains(&first) {
        return (
            0.0,
            format!(
                "Invalid SQL start. Must begin with: {}",
                EVALUATION_START_KEYWORDS.join(", ")
            ),
            None,
        );
    }

    match Parser::parse_sql(&ClickHouseDialect {}, sql) {
        Ok(statements) => (
            1.0,
            format!("Valid ClickHouse SQL syntax (starts with {})", first),
            Some(statements),
        ),
        Err(e) => {
            let detail: String = e.to_string().chars().take(100).collect();
            debug!("SQL parsing failed: {}, using heuristic fallback", detail);
            (0.7, format!("Valid SQL start but parsing issues: {}", detail), None)
        }
    }
}

fn schema_from_ast(statements: &[Statement]) -> SchemaDetails {
    let mut cte_names = Vec::new();
    let mut tables = Vec::new();
    let mut columns = Vec::new();

    for statement in statements {
        if let Statement::Query(query) = statement {
            if let Some(with) = &query.with {
                cte_names.extend(with.cte_tables.iter().map(|cte| cte.alias.name.value.clone()));
            }
        }
        let _ = visit_relations(statement, |name| {
            if let Some(ident) = name.0.last() {
                tables.push(ident.value.clone());
            }
            ControlFlow::<()>::Continue(())
        });
        let _ = visit_expressions(statement, |expr| {
            match expr {
                Expr::Identifier(ident) => columns.push(ident.value.clone()),
                Expr::CompoundIdentifier(parts) => {
                    if let Some(ident) = parts.last() {
                        columns.push(ident.value.clone());
                    }
                }
                _ => {}
            }
            ControlFlow::<()>::Continue(())
        });
    }

    SchemaDetails {
        tables_found: tables
            .into_iter()
            .filter(|t| !cte_names.contains(t))
            .unique()
            .collect(),
        columns_found: columns.into_iter().unique().collect(),
        from_ast: true,
        ..Default::default()
    }
}

fn schema_from_text(sql: &str) -> Result<SchemaDetails> {
    let from = pattern(&FROM_TABLE, "FROM")?;
    let join = pattern(&JOIN_TABLE, "JOIN")?;
    let select_list = pattern(&SELECT_LIST, "select list")?;
    let identifier = pattern(&IDENTIFIER, "identifier")?;

    let tables = from
        .captures_iter(sql)
        .chain(join.captures_iter(sql))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().rsplit('.').next().unwrap_or(m.as_str()).to_string())
        .unique()
        .collect();

    let columns = select_list
        .captures(sql)
        .and_then(|c| c.get(1))
        .map(|m| {
            identifier
                .find_iter(m.as_str())
                .map(|w| w.as_str())
                .filter(|w| !NON_COLUMN_WORDS.iter().any(|k| k.eq_ignore_ascii_case(w)))
                .map(|w| w.to_string())
                .unique()
                .collect()
        })
        .unwrap_or_default();

    Ok(SchemaDetails {
        tables_found: tables,
        columns_found: columns,
        from_ast: false,
        ..Default::default()
    })
}

fn score_schema(mut details: SchemaDetails) -> (f64, String, SchemaDetails) {
    let total = details.tables_found.len() + details.columns_found.len();
    let mut valid = 0;

    for table in &details.tables_found {
        match kb::table(table) {
            Some(schema) => {
                valid += 1;
                details.tables_valid.push(schema.name.to_string());
            }
            None => details.invalid_elements.push(format!("Invalid table: {}", table)),
        }
    }
    for column in &details.columns_found {
        if kb::find_column(column).is_some() {
            valid += 1;
            details.columns_valid.push(column.clone());
        } else {
            details.invalid_elements.push(format!("Invalid column: {}", column));
        }
    }

    // Nothing recognisable as a table or column is a failure, not a missing signal
    let score = if total == 0 { 0.0 } else { valid as f64 / total as f64 };
    let message = if total > 0 && valid == total {
        format!("All {} schema elements valid", total)
    } else if score > 0.5 {
        format!("{}/{} schema elements valid", valid, total)
    } else {
        format!("Poor schema compliance: {}/{} valid", valid, total)
    };
    (score, message, details)
}

fn check_dialect(sql: &str, tables_valid: &[String]) -> Result<(f64, Vec<String>)> {
    let date_literal = pattern(&DATE_LITERAL, "date literal")?;
    let upper = sql.to_uppercase();
    let mut score = 1.0;
    let mut warnings = Vec::new();

    for table in tables_valid.iter().filter_map(|t| kb::table(t)) {
        for column in table.columns.iter().filter(|c| contains_word(sql, c.name)) {
            if column.data_type.starts_with("Array") {
                let indexed = sql.contains(&format!("{}[", column.name));
                if !indexed
                    && !sql.contains("arrayJoin")
                    && !upper.contains("ANY(")
                    && !sql.contains("has(")
                {
                    warnings.push(format!(
                        "Array column {} may need arrayJoin/ANY/has or an index",
                        column.name
                    ));
                    score *= 0.9;
                }
            } else if column.data_type.starts_with("Enum8") {
                let quoted_known = kb::KNOWN_GENDERS
                    .iter()
                    .any(|g| sql.contains(&format!("'{}'", g)));
                if !quoted_known {
                    warnings.push(format!("Enum8 column {} may have invalid values", column.name));
                    score *= 0.9;
                }
            } else if column.data_type == "Date" || column.data_type == "Date32" {
                if !date_literal.is_match(sql) && !upper.contains("EXTRACT(") && !sql.contains("toYear(") {
                    warnings.push(format!(
                        "Date column {} may need proper date format",
                        column.name
                    ));
                    score *= 0.95;
                }
            }
        }
    }
    Ok((score, warnings))
}

fn score_entities(sql: &str, entities: &EntityBag) -> (f64, String, EntityDetails) {
    let sql_lower = sql.to_lowercase();
    let mut details = EntityDetails::default();

    for (entity_type, values) in entities.iter() {
        for value in values {
            details.total_entities += 1;
            let label = format!("{}: {}", entity_type, value);
            if sql_lower.contains(&value.to_lowercase()) {
                details.entities_in_sql += 1;
                details.found_entities.push(label);
            } else {
                details.missing_entities.push(label);
            }
        }
    }

    if details.total_entities == 0 {
        return (0.5, "No entities detected to validate".to_string(), details);
    }
    let score = ratio_or_neutral(details.entities_in_sql, details.total_entities);
    let message = if details.entities_in_sql == details.total_entities {
        format!("All {} entities found in SQL", details.total_entities)
    } else if score > 0.5 {
        format!("{}/{} entities found in SQL", details.entities_in_sql, details.total_entities)
    } else {
        format!(
            "Poor entity usage: {}/{} found",
            details.entities_in_sql, details.total_entities
        )
    };
    (score, message, details)
}

fn score_mappings(sql: &str, mappings: &[EntityMapping]) -> (f64, String, MappingDetails) {
    let mut details = MappingDetails::default();

    for mapping in mappings {
        for column in &mapping.columns {
            details.total_mappings += 1;
            let label = format!("{}: {}", mapping.entity_type, column);
            if sql.contains(column.as_str()) {
                details.used_mappings += 1;
                details.used_columns.push(label);
            } else {
                details.unused_columns.push(label);
            }
        }
    }

    if details.total_mappings == 0 {
        return (0.5, "No column mappings to validate".to_string(), details);
    }
    let score = ratio_or_neutral(details.used_mappings, details.total_mappings);
    let grade = if score > 0.8 {
        "Excellent"
    } else if score > 0.5 {
        "Good"
    } else {
        "Poor"
    };
    let message = format!(
        "{} column mapping: {}/{} used",
        grade, details.used_mappings, details.total_mappings
    );
    (score, message, details)
}

/// Whether an extracted value belongs to the vocabulary of its type
pub fn is_known_value(entity_type: EntityType, value: &str) -> bool {
    match entity_type {
        EntityType::State => kb::is_known_state(value),
        EntityType::Year | EntityType::Number => value.parse::<u32>().is_ok(),
        EntityType::Provider => kb::PROVIDER_TERMS
            .iter()
            .any(|(_, role)| role.eq_ignore_ascii_case(value)),
        EntityType::Patient => kb::candidate_columns(entity_type).contains(&value),
        other => kb::known_values(other)
            .iter()
            .any(|known| known.eq_ignore_ascii_case(value)),
    }
}

fn score_values(entities: &EntityBag) -> (f64, String) {
    let mut total = 0;
    let mut valid = 0;
    let mut unknown = Vec::new();

    for (entity_type, values) in entities.iter() {
        for value in values {
            total += 1;
            if is_known_value(entity_type, value) {
                valid += 1;
            } else {
                unknown.push(value.as_str());
            }
        }
    }

    let message = match unknown.last() {
        Some(value) => format!("Value not found in known values: {}", value),
        None if total == 0 => "No values to validate".to_string(),
        None => "Values validated".to_string(),
    };
    (ratio_or_neutral(valid, total), message)
}

fn retrieval_relevance(scores: &[f32]) -> f64 {
    if scores.is_empty() {
        return 0.5;
    }
    let mean = scores.iter().map(|s| *s as f64).sum::<f64>() / scores.len() as f64;
    round3(mean.clamp(0.0, 1.0))
}

fn analyze_performance(sql: &str) -> PerformanceAnalysis {
    let upper = sql.to_uppercase();
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    let mut score = 1.0;

    if upper.contains("SELECT *") {
        issues.push("Uses SELECT * which may be inefficient".to_string());
        recommendations.push("Specify only needed columns".to_string());
        score *= 0.8;
    }
    let join_count = count_word(sql, "JOIN");
    if join_count > 3 {
        issues.push(format!("Many joins ({}) may impact performance", join_count));
        recommendations.push("Consider query optimization".to_string());
        score *= 0.9;
    }
    if !contains_word(sql, "LIMIT") {
        issues.push("No LIMIT clause - may return large result sets".to_string());
        recommendations.push("Add LIMIT clause for better performance".to_string());
        score *= 0.95;
    }
    if !contains_word(sql, "WHERE") && contains_word(sql, "FROM") {
        issues.push("No WHERE clause - may scan entire table".to_string());
        recommendations.push("Add WHERE clause to filter data".to_string());
        score *= 0.9;
    }

    let message = if issues.is_empty() {
        "Good SQL performance characteristics".to_string()
    } else {
        format!("{} performance considerations", issues.len())
    };
    PerformanceAnalysis {
        issues,
        recommendations,
        score,
        message,
    }
}
