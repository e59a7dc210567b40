//! Tiered Confidence Calculator
//!
//! Three weighted tiers, each the sum of two weighted sub-scores:
//!
//! | Tier | Weight | Sub-scores |
//! |---|---|---|
//! | 1 Foundational | 0.40 | syntax_structure 0.20, database_compatibility 0.20 |
//! | 2 Semantic | 0.35 | intent_recognition 0.15, entity_accuracy 0.20 |
//! | 3 Practical | 0.25 | execution_success 0.15, performance_efficiency 0.10 |
//!
//! A tier whose raw total is below 70% of its weight is floored to that
//! threshold, unless a lower tier already missed its own threshold; then it is
//! scaled by the failure penalty instead. The capped tiers are summed and a
//! contextual boost of at most 10% is applied.
//!
//! The floor/penalty interaction is a calibration choice, not a smooth
//! function: below its threshold a tier ignores its own sub-scores, and a
//! lower tier crossing its threshold switches the tiers above it from penalty
//! to floor. [`TierPolicy`] keeps the constants tunable.

use crate::entities::{EntityBag, EntityType};
use crate::intent::IntentAnalysis;
use crate::sql_generator::GenerationSource;
use crate::text::{contains_any_word, contains_word, count_word};
use crate::validation::{ValidationResult, ValidationType};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const SYNTAX_WEIGHT: f64 = 0.20;
const COMPATIBILITY_WEIGHT: f64 = 0.20;
const INTENT_WEIGHT: f64 = 0.15;
const ENTITY_WEIGHT: f64 = 0.20;
const EXECUTION_WEIGHT: f64 = 0.15;
const PERFORMANCE_WEIGHT: f64 = 0.10;

const MAX_COMPLEXITY_BOOST: f64 = 0.10;
const MAX_HEALTHCARE_BOOST: f64 = 0.05;
const MAX_TOTAL_BOOST: f64 = 0.10;

const FILTER_WORDS: &[&str] = &["in", "from", "where", "with"];
const AGGREGATION_WORDS: &[&str] = &["count", "total", "sum", "average"];
const GROUPING_WORDS: &[&str] = &["by", "group", "each"];

lazy_static! {
    static ref ARRAY_INDEX: Option<Regex> = Regex::new(r"\[\d+\]").ok();
}

/// Tier weights and the capping rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub foundational_weight: f64,
    pub semantic_weight: f64,
    pub practical_weight: f64,
    /// Fraction of a tier's weight below which the tier counts as failed
    pub threshold_ratio: f64,
    /// Multiplier applied to a tier when a lower tier failed
    pub failure_penalty: f64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            foundational_weight: 0.40,
            semantic_weight: 0.35,
            practical_weight: 0.25,
            threshold_ratio: 0.70,
            failure_penalty: 0.7,
        }
    }
}

impl TierPolicy {
    fn floor(&self, weight: f64) -> f64 {
        weight * self.threshold_ratio
    }

    /// Caps one tier; `lower_failed` is true when any lower tier missed its threshold
    pub fn cap(&self, total: f64, weight: f64, lower_failed: bool) -> TierOutcome {
        let floor = self.floor(weight);
        let threshold_met = total >= floor;
        let capped = if lower_failed {
            total * self.failure_penalty
        } else if threshold_met {
            total
        } else {
            floor
        };
        TierOutcome {
            total,
            capped,
            threshold_met,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierOutcome {
    /// Raw sum of the weighted sub-scores
    pub total: f64,
    pub capped: f64,
    pub threshold_met: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FoundationalTier {
    pub syntax_structure: f64,
    pub database_compatibility: f64,
    #[serde(flatten)]
    pub outcome: TierOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticTier {
    pub intent_recognition: f64,
    pub entity_accuracy: f64,
    #[serde(flatten)]
    pub outcome: TierOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PracticalTier {
    pub execution_success: f64,
    pub performance_efficiency: f64,
    #[serde(flatten)]
    pub outcome: TierOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierScores {
    pub tier_1: FoundationalTier,
    pub tier_2: SemanticTier,
    pub tier_3: PracticalTier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextualBoost {
    pub complexity: f64,
    pub healthcare: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceMetadata {
    pub query: String,
    pub sql_length: usize,
    pub generation_source: GenerationSource,
    pub processing_time: f64,
    pub validation_type: ValidationType,
    /// Number of entity types with at least one value
    pub entity_count: usize,
    pub join_count: usize,
    pub hyde_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub final_confidence: f64,
    pub tier_scores: TierScores,
    pub base_score: f64,
    pub contextual_boost: ContextualBoost,
    /// Multiplier for the backend that produced the SQL
    pub source_factor: f64,
    pub metadata: ConfidenceMetadata,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceGrade {
    Excellent,
    VeryGood,
    Good,
    Fair,
    Poor,
    /// Reserved for results where no SQL was generated
    Failed,
}

impl ConfidenceGrade {
    pub fn from_score(confidence: f64) -> Self {
        if confidence >= 0.90 {
            ConfidenceGrade::Excellent
        } else if confidence >= 0.80 {
            ConfidenceGrade::VeryGood
        } else if confidence >= 0.70 {
            ConfidenceGrade::Good
        } else if confidence >= 0.60 {
            ConfidenceGrade::Fair
        } else {
            ConfidenceGrade::Poor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceGrade::Excellent => "Excellent",
            ConfidenceGrade::VeryGood => "Very Good",
            ConfidenceGrade::Good => "Good",
            ConfidenceGrade::Fair => "Fair",
            ConfidenceGrade::Poor => "Poor",
            ConfidenceGrade::Failed => "Failed",
        }
    }

    /// Label with the score band, e.g. "Very Good (80-89%)"
    pub fn description(&self) -> &'static str {
        match self {
            ConfidenceGrade::Excellent => "Excellent (90%+)",
            ConfidenceGrade::VeryGood => "Very Good (80-89%)",
            ConfidenceGrade::Good => "Good (70-79%)",
            ConfidenceGrade::Fair => "Fair (60-69%)",
            ConfidenceGrade::Poor => "Poor (<60%)",
            ConfidenceGrade::Failed => "Failed",
        }
    }
}

impl fmt::Display for ConfidenceGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything the calculator looks at for one generated query
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub sql: &'a str,
    pub source: GenerationSource,
    pub query: &'a str,
    pub entities: &'a EntityBag,
    pub hyde_examples: &'a [String],
    pub validation: &'a ValidationResult,
    pub intent: &'a IntentAnalysis,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalculator {
    policy: TierPolicy,
}

impl ConfidenceCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: TierPolicy) -> Self {
        Self { policy }
    }

    pub fn score(&self, input: &ScoringInput<'_>) -> (f64, ConfidenceBreakdown) {
        // Collapse line breaks so multi-word keywords like ORDER BY match
        let sql = input.sql.split_whitespace().join(" ");
        let metadata = ConfidenceMetadata {
            query: input.query.to_string(),
            sql_length: input.sql.trim().chars().count(),
            generation_source: input.source,
            processing_time: input.elapsed_secs,
            validation_type: input.validation.validation_type,
            entity_count: input.entities.populated_types().len(),
            join_count: count_word(&sql, "JOIN"),
            hyde_count: input.hyde_examples.len(),
        };

        if sql.is_empty() {
            let tier_scores = TierScores::default();
            let breakdown = ConfidenceBreakdown {
                final_confidence: 0.0,
                insights: self.insights(&tier_scores),
                tier_scores,
                base_score: 0.0,
                contextual_boost: ContextualBoost::default(),
                source_factor: source_factor(input.source),
                metadata,
            };
            return (0.0, breakdown);
        }

        let p = &self.policy;
        let syntax = SYNTAX_WEIGHT * syntax_structure(&sql);
        let compatibility = COMPATIBILITY_WEIGHT * database_compatibility(&sql, input.validation);
        let tier_1 = p.cap(syntax + compatibility, p.foundational_weight, false);

        let intent = INTENT_WEIGHT * intent_recognition(input.query, input.intent, &sql);
        let entity = ENTITY_WEIGHT * entity_accuracy(input.entities, &sql);
        let tier_2 = p.cap(intent + entity, p.semantic_weight, !tier_1.threshold_met);

        let execution = EXECUTION_WEIGHT * execution_success(input.validation);
        let performance = PERFORMANCE_WEIGHT * performance_efficiency(input.elapsed_secs, &sql);
        let tier_3 = p.cap(
            execution + performance,
            p.practical_weight,
            !tier_1.threshold_met || !tier_2.threshold_met,
        );

        let tier_scores = TierScores {
            tier_1: FoundationalTier {
                syntax_structure: syntax,
                database_compatibility: compatibility,
                outcome: tier_1,
            },
            tier_2: SemanticTier {
                intent_recognition: intent,
                entity_accuracy: entity,
                outcome: tier_2,
            },
            tier_3: PracticalTier {
                execution_success: execution,
                performance_efficiency: performance,
                outcome: tier_3,
            },
        };

        let base_score = tier_1.capped + tier_2.capped + tier_3.capped;
        let complexity = complexity_boost(&sql);
        let healthcare = healthcare_boost(input.entities, &sql);
        let contextual_boost = ContextualBoost {
            complexity,
            healthcare,
            total: (complexity + healthcare).min(MAX_TOTAL_BOOST),
        };
        let source_factor = source_factor(input.source);
        // Applied after the clamp so a saturated score still ranks by source
        let final_confidence = (base_score * (1.0 + contextual_boost.total)).clamp(0.0, 1.0) * source_factor;

        debug!(
            "Confidence {:.3} (tiers {:.3}/{:.3}/{:.3}, boost {:.3}, source {:.2})",
            final_confidence, tier_1.capped, tier_2.capped, tier_3.capped, contextual_boost.total, source_factor
        );

        let breakdown = ConfidenceBreakdown {
            final_confidence,
            insights: self.insights(&tier_scores),
            tier_scores,
            base_score,
            contextual_boost,
            source_factor,
            metadata,
        };
        (final_confidence, breakdown)
    }

    /// One message per tier below its threshold, then the weakest tier
    pub fn insights(&self, tiers: &TierScores) -> Vec<String> {
        let p = &self.policy;
        let rows = [
            (
                "foundational correctness",
                tiers.tier_1.outcome,
                p.foundational_weight,
                "Improve SQL syntax and ClickHouse compatibility",
            ),
            (
                "semantic accuracy",
                tiers.tier_2.outcome,
                p.semantic_weight,
                "Better entity detection and intent recognition needed",
            ),
            (
                "practical validation",
                tiers.tier_3.outcome,
                p.practical_weight,
                "Optimize query performance and execution",
            ),
        ];

        let mut insights: Vec<String> = rows
            .iter()
            .filter(|(_, outcome, weight, _)| outcome.total < p.floor(*weight))
            .map(|(_, _, _, message)| message.to_string())
            .collect();

        if !insights.is_empty() {
            let weakest = rows
                .iter()
                .map(|(name, outcome, weight, _)| (name, outcome.total / weight))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((name, _)) = weakest {
                insights.push(format!("Weakest tier: {}", name));
            }
        }
        insights
    }
}

fn first_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_start_matches('(')
        .to_uppercase()
}

/// Structure score in [0, 1]
pub fn syntax_structure(sql: &str) -> f64 {
    let mut score = 0.0;
    if matches!(first_keyword(sql).as_str(), "SELECT" | "WITH") {
        score += 0.25;
    }
    if contains_word(sql, "FROM") {
        score += 0.125;
    }
    if contains_word(sql, "SELECT") {
        score += 0.125;
    }
    score += match count_word(sql, "JOIN") {
        0 => 0.10,
        1..=3 => 0.25,
        _ => 0.15,
    };
    if contains_word(sql, "ORDER BY") {
        score += 0.10;
    }
    if contains_word(sql, "LIMIT") {
        score += 0.10;
    }
    if contains_word(sql, "GROUP BY") {
        score += 0.05;
    }
    f64::min(score, 1.0)
}

/// Primary model output is trusted most; anything that did not come from a
/// model never outranks the fallback.
pub fn source_factor(source: GenerationSource) -> f64 {
    match source {
        GenerationSource::PrimaryLlm => 1.0,
        GenerationSource::FallbackLlm => 0.95,
        GenerationSource::Failed | GenerationSource::Error => 0.90,
    }
}

/// Trust ladder plus ClickHouse idioms, in [0, 1]
pub fn database_compatibility(sql: &str, validation: &ValidationResult) -> f64 {
    let mut score: f64 = match validation.validation_type {
        ValidationType::DatabaseExecution => 0.50,
        ValidationType::SyntaxOnly => 0.35,
        ValidationType::SyntaxCheck => 0.25,
        ValidationType::Error => 0.0,
    };

    let upper = sql.to_uppercase();
    let has_ilike = contains_word(sql, "ILIKE");
    if has_ilike {
        score += 0.10;
    }
    if sql.contains("toString(") {
        score += 0.10;
    }
    if ARRAY_INDEX.as_ref().map_or(false, |re| re.is_match(sql)) {
        score += 0.10;
    }
    if upper.contains("EXTRACT(") {
        score += 0.10;
    }
    if contains_word(sql, "LIKE") && !has_ilike {
        score -= 0.05;
    }
    score.clamp(0.0, 1.0)
}

/// How well the SQL shape follows the query's wording, in [0, 1]
pub fn intent_recognition(query: &str, intent: &IntentAnalysis, sql: &str) -> f64 {
    let upper = sql.to_uppercase();
    let mut score = 0.0;

    if intent.needs_ranking && contains_word(sql, "ORDER BY") {
        score += if contains_word(sql, "DESC") { 0.30 } else { 0.20 };
    }
    if contains_any_word(query, FILTER_WORDS) && contains_word(sql, "WHERE") {
        score += 0.25;
    }
    if contains_any_word(query, AGGREGATION_WORDS)
        && ["COUNT(", "SUM(", "AVG("].iter().any(|f| upper.contains(f))
    {
        score += 0.25;
    }
    if contains_any_word(query, GROUPING_WORDS) && contains_word(sql, "GROUP BY") {
        score += 0.20;
    }
    f64::min(score, 1.0)
}

fn used_in_sql(value: &str, sql_upper: &str) -> bool {
    !value.is_empty() && sql_upper.contains(&value.to_uppercase())
}

fn critical_types_used(entities: &EntityBag, sql: &str) -> usize {
    let upper = sql.to_uppercase();
    EntityType::CRITICAL
        .iter()
        .filter(|t| entities.get(**t).iter().any(|v| used_in_sql(v, &upper)))
        .count()
}

/// Share of extracted values present in the SQL plus a critical-type bonus, in [0, 1]
pub fn entity_accuracy(entities: &EntityBag, sql: &str) -> f64 {
    let total = entities.total_values();
    if total == 0 {
        return 0.5;
    }
    let upper = sql.to_uppercase();
    let used = entities
        .iter()
        .flat_map(|(_, values)| values.iter())
        .filter(|v| used_in_sql(v, &upper))
        .count();

    let usage_rate = used as f64 / total as f64;
    let bonus = f64::min(critical_types_used(entities, sql) as f64 * 0.10, 0.30);
    f64::min(usage_rate + bonus, 1.0)
}

pub fn execution_success(validation: &ValidationResult) -> f64 {
    match (validation.validation_type, validation.valid) {
        (ValidationType::DatabaseExecution, true) => 1.0,
        (ValidationType::SyntaxOnly, true) => 0.7,
        (ValidationType::SyntaxCheck, true) => 0.5,
        _ => 0.2,
    }
}

/// Starts at 1.0 and subtracts penalties, floored at 0
pub fn performance_efficiency(elapsed_secs: f64, sql: &str) -> f64 {
    let mut score: f64 = 1.0;
    if elapsed_secs > 10.0 {
        score -= 0.3;
    } else if elapsed_secs > 5.0 {
        score -= 0.1;
    }

    let upper = sql.to_uppercase();
    if upper.contains("SELECT *") {
        score -= 0.2;
    }
    if count_word(sql, "JOIN") > 3 {
        score -= 0.1;
    }
    if !contains_word(sql, "LIMIT") && !upper.contains("COUNT(") {
        score -= 0.1;
    }
    score.max(0.0)
}

pub fn complexity_boost(sql: &str) -> f64 {
    let tokens: usize = ["JOIN", "WHERE", "AND", "OR"]
        .iter()
        .map(|k| count_word(sql, k))
        .sum();
    f64::min(tokens as f64 * 0.02, MAX_COMPLEXITY_BOOST)
}

pub fn healthcare_boost(entities: &EntityBag, sql: &str) -> f64 {
    f64::min(critical_types_used(entities, sql) as f64 * 0.0125, MAX_HEALTHCARE_BOOST)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityExtractor;

    fn score_with(sql: &str, query: &str, validation: ValidationResult, elapsed: f64) -> (f64, ConfidenceBreakdown) {
        score_from(GenerationSource::PrimaryLlm, sql, query, validation, elapsed)
    }

    fn score_from(
        source: GenerationSource,
        sql: &str,
        query: &str,
        validation: ValidationResult,
        elapsed: f64,
    ) -> (f64, ConfidenceBreakdown) {
        let (entities, intent) = EntityExtractor::new().extract(query);
        ConfidenceCalculator::new().score(&ScoringInput {
            sql,
            source,
            query,
            entities: &entities,
            hyde_examples: &[],
            validation: &validation,
            intent: &intent,
            elapsed_secs: elapsed,
        })
    }

    #[test]
    fn test_select_star_partial_structure_and_penalties() {
        assert!((syntax_structure("SELECT * FROM t") - 0.60).abs() < 1e-9);
        // SELECT * and no LIMIT
        assert!((performance_efficiency(0.1, "SELECT * FROM t") - 0.70).abs() < 1e-9);
    }

    #[test]
    fn test_limit_never_lowers_performance() {
        let sqls = [
            "SELECT * FROM t",
            "SELECT a FROM t JOIN u ON t.x = u.x",
            "SELECT COUNT(*) FROM t",
            "SELECT a FROM t WHERE b = 1 ORDER BY a",
        ];
        for sql in sqls {
            for elapsed in [0.5, 6.0, 12.0] {
                let with_limit = format!("{} LIMIT 10", sql);
                assert!(
                    performance_efficiency(elapsed, &with_limit) >= performance_efficiency(elapsed, sql),
                    "{}",
                    sql
                );
            }
        }
    }

    #[test]
    fn test_empty_sql_scores_zero() {
        for sql in ["", "   \n\t"] {
            let (confidence, breakdown) = score_with(sql, "top 10 prescribers of Ozempic", ValidationResult::syntax_error("Empty SQL"), 0.0);
            assert_eq!(confidence, 0.0);
            assert_eq!(breakdown.base_score, 0.0);
            assert_eq!(breakdown.tier_scores, TierScores::default());
        }
    }

    #[test]
    fn test_bounds_across_ladder_and_timings() {
        let validations = [
            ValidationResult::executed(10, "full"),
            ValidationResult::syntax_only(),
            ValidationResult::syntax_error("Unbalanced parentheses in SQL"),
            ValidationResult::error("Code: 60. Table does not exist"),
        ];
        let sqls = [
            "SELECT * FROM t",
            "garbage",
            "SELECT a FROM t1 JOIN t2 ON a JOIN t3 ON b JOIN t4 ON c JOIN t5 ON d WHERE x AND y OR z AND w LIMIT 5",
            "SELECT PRESCRIBER_NPI_NM FROM fct WHERE NDC_PREFERRED_BRAND_NM ILIKE '%Ozempic%' \
             AND PRESCRIBER_NPI_STATE_CD = 'NY' ORDER BY 1 DESC LIMIT 10",
        ];
        for validation in validations {
            for sql in sqls {
                for elapsed in [0.0, 7.0, 60.0] {
                    let (confidence, breakdown) =
                        score_with(sql, "Who are the top 10 prescribers of Ozempic in New York?", validation.clone(), elapsed);
                    assert!((0.0..=1.0).contains(&confidence), "{} -> {}", sql, confidence);
                    assert_eq!(confidence, breakdown.final_confidence);
                    assert!(breakdown.contextual_boost.total <= MAX_TOTAL_BOOST + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_strong_query_grades_well() {
        let sql = "SELECT PRESCRIBER_NPI_NM, COUNT(*) AS rx FROM fct_pharmacy_clear_claim_allstatus_cluster_brand \
                   WHERE NDC_PREFERRED_BRAND_NM ILIKE '%Ozempic%' AND PRESCRIBER_NPI_STATE_CD = 'NY' \
                   GROUP BY PRESCRIBER_NPI_NM ORDER BY rx DESC LIMIT 10";
        let (confidence, breakdown) = score_with(
            sql,
            "Who are the top 10 prescribers of Ozempic in New York?",
            ValidationResult::executed(10, "full"),
            1.0,
        );
        assert!(breakdown.tier_scores.tier_1.outcome.threshold_met);
        assert!(confidence >= 0.7, "{}", confidence);
        assert!(breakdown.insights.is_empty());
    }

    #[test]
    fn test_primary_source_outranks_fallback() {
        let sql = "SELECT PRESCRIBER_NPI_NM, COUNT(*) AS rx FROM fct_pharmacy_clear_claim_allstatus_cluster_brand \
                   WHERE NDC_PREFERRED_BRAND_NM ILIKE '%Ozempic%' AND PRESCRIBER_NPI_STATE_CD = 'NY' \
                   GROUP BY PRESCRIBER_NPI_NM ORDER BY rx DESC LIMIT 10";
        let query = "Who are the top 10 prescribers of Ozempic in New York?";
        for validation in [ValidationResult::executed(10, "full"), ValidationResult::syntax_only()] {
            let score = |source| score_from(source, sql, query, validation.clone(), 1.0).0;
            let primary = score(GenerationSource::PrimaryLlm);
            let fallback = score(GenerationSource::FallbackLlm);
            assert!(primary > fallback, "{} vs {}", primary, fallback);
            assert!(fallback > score(GenerationSource::Failed));
            assert!(fallback > score(GenerationSource::Error));
        }

        // Saturated scores still separate
        let (saturated, breakdown) = score_from(GenerationSource::FallbackLlm, sql, query, ValidationResult::executed(10, "full"), 0.1);
        assert!(saturated < 1.0);
        assert_eq!(breakdown.source_factor, 0.95);
    }

    #[test]
    fn test_compatibility_ladder_with_idioms() {
        let ilike = "SELECT a FROM t WHERE b ILIKE '%x%'";
        assert!((database_compatibility(ilike, &ValidationResult::executed(1, "full")) - 0.60).abs() < 1e-9);
        assert!((database_compatibility(ilike, &ValidationResult::syntax_only()) - 0.45).abs() < 1e-9);
        // Plain LIKE costs a little and never goes below zero
        let like = "SELECT a FROM t WHERE b LIKE '%x%'";
        assert_eq!(database_compatibility(like, &ValidationResult::error("rejected")), 0.0);
    }

    #[test]
    fn test_lower_tier_failure_penalizes_instead_of_flooring() {
        let policy = TierPolicy::default();
        let floored = policy.cap(0.10, 0.35, false);
        assert!((floored.capped - 0.245).abs() < 1e-12);
        assert!(!floored.threshold_met);

        let penalized = policy.cap(0.10, 0.35, true);
        assert!((penalized.capped - 0.07).abs() < 1e-12);
    }

    #[test]
    fn test_capping_edge_near_threshold() {
        let policy = TierPolicy::default();

        // Flat below the floor: sub-score changes do not move the tier
        let zero = policy.cap(0.0, 0.40, false);
        let almost = policy.cap(0.279, 0.40, false);
        assert_eq!(zero.capped, almost.capped);
        assert!((almost.capped - 0.28).abs() < 1e-12);

        // Crossing the tier 1 threshold by 0.002 flips the upper tiers from
        // penalty to floor and moves the base score by about 0.21
        let weak = 0.05;
        let base = |tier_1_raw: f64| {
            let t1 = policy.cap(tier_1_raw, 0.40, false);
            let t2 = policy.cap(weak, 0.35, !t1.threshold_met);
            let t3 = policy.cap(weak, 0.25, !t1.threshold_met || !t2.threshold_met);
            t1.capped + t2.capped + t3.capped
        };
        let jump = base(0.281) - base(0.279);
        assert!((jump - 0.211).abs() < 1e-9, "{}", jump);
    }

    #[test]
    fn test_grades() {
        assert_eq!(ConfidenceGrade::from_score(0.95), ConfidenceGrade::Excellent);
        assert_eq!(ConfidenceGrade::from_score(0.80), ConfidenceGrade::VeryGood);
        assert_eq!(ConfidenceGrade::from_score(0.70).label(), "Good");
        assert_eq!(ConfidenceGrade::from_score(0.6), ConfidenceGrade::Fair);
        assert_eq!(ConfidenceGrade::from_score(0.0), ConfidenceGrade::Poor);
        assert_eq!(ConfidenceGrade::Failed.description(), "Failed");
    }

    #[test]
    fn test_entity_accuracy_neutral_and_bonus() {
        assert_eq!(entity_accuracy(&EntityBag::new(), "SELECT 1"), 0.5);

        let (entities, _) = EntityExtractor::new().extract("Ozempic prescriptions in Texas");
        let sql = "SELECT * FROM fct WHERE NDC_PREFERRED_BRAND_NM = 'Ozempic'";
        let score = entity_accuracy(&entities, sql);
        // Drug used, state missing; drug adds a critical bonus
        let used_rate = 1.0 / entities.total_values() as f64;
        assert!((score - (used_rate + 0.10)).abs() < 1e-9);
    }

    #[test]
    fn test_insights_point_at_weakest_tier() {
        let (_, breakdown) = score_with(
            "garbage",
            "list things",
            ValidationResult::syntax_error("SQL must start with one of: SELECT, WITH, INSERT, UPDATE, DELETE"),
            0.0,
        );
        assert_eq!(breakdown.insights[0], "Improve SQL syntax and ClickHouse compatibility");
        assert!(breakdown.insights.last().unwrap().starts_with("Weakest tier: "));
    }
}
