//! Intent classification
//!
//! Query type is decided by [`CLASSIFICATION_RULES`], an ordered decision
//! table evaluated top to bottom; the first matching rule wins. Constraint
//! detection is independent of the query type and additive.

use crate::entities::{EntityBag, EntityType};
use crate::knowledge_base as kb;
use crate::text::{contains_any_word, contains_word};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    PrescriptionAnalysis,
    ProcedureAnalysis,
    PaymentAnalysis,
    KolAnalysis,
    FacilityAnalysis,
    ProviderAnalysis,
    ComplexMultiTable,
    General,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::PrescriptionAnalysis => "prescription_analysis",
            QueryType::ProcedureAnalysis => "procedure_analysis",
            QueryType::PaymentAnalysis => "payment_analysis",
            QueryType::KolAnalysis => "kol_analysis",
            QueryType::FacilityAnalysis => "facility_analysis",
            QueryType::ProviderAnalysis => "provider_analysis",
            QueryType::ComplexMultiTable => "complex_multi_table",
            QueryType::General => "general",
        }
    }

    /// Physical tables that usually answer this kind of question
    pub fn tables(&self) -> &'static [&'static str] {
        match self {
            QueryType::PrescriptionAnalysis => &[kb::PHARMACY_CLAIMS, kb::KOL_PROVIDERS, kb::PROVIDERS],
            QueryType::ProcedureAnalysis => &[kb::REFERRALS, kb::PROVIDERS],
            QueryType::PaymentAnalysis => &[kb::PAYMENTS, kb::PROVIDERS],
            QueryType::KolAnalysis => &[kb::KOL_PROVIDERS, kb::KOL_SCORES, kb::CONDITIONS],
            QueryType::FacilityAnalysis => &[kb::REFERRALS, kb::PROVIDERS],
            QueryType::ProviderAnalysis => &[kb::PROVIDERS, kb::KOL_PROVIDERS],
            QueryType::ComplexMultiTable => &[kb::PHARMACY_CLAIMS, kb::PROVIDERS, kb::PAYMENTS, kb::REFERRALS],
            QueryType::General => &[],
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryIntent {
    Prescription,
    Procedure,
    Payment,
    Facility,
    Kol,
    Provider,
    General,
}

impl PrimaryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryIntent::Prescription => "prescription",
            PrimaryIntent::Procedure => "procedure",
            PrimaryIntent::Payment => "payment",
            PrimaryIntent::Facility => "facility",
            PrimaryIntent::Kol => "kol",
            PrimaryIntent::Provider => "provider",
            PrimaryIntent::General => "general",
        }
    }
}

impl fmt::Display for PrimaryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    Location,
    Temporal,
    Specialty,
    Volume,
    Financial,
}

impl Constraint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Constraint::Location => "location",
            Constraint::Temporal => "temporal",
            Constraint::Specialty => "specialty",
            Constraint::Volume => "volume",
            Constraint::Financial => "financial",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub primary_intent: PrimaryIntent,
    pub query_type: QueryType,
    pub constraints: BTreeSet<Constraint>,
    pub needs_ranking: bool,
    pub complexity_level: u8,
    pub recommended_tables: Vec<String>,
}

impl IntentAnalysis {
    /// Classification used for empty input and extraction failures
    pub fn fallback() -> Self {
        Self {
            primary_intent: PrimaryIntent::General,
            query_type: QueryType::General,
            constraints: BTreeSet::new(),
            needs_ranking: false,
            complexity_level: 0,
            recommended_tables: Vec::new(),
        }
    }

    pub fn has_constraint(&self, constraint: Constraint) -> bool {
        self.constraints.contains(&constraint)
    }
}

/// One row of the classification decision table
pub struct ClassificationRule {
    pub name: &'static str,
    pub query_type: QueryType,
    pub matches: fn(&str, &EntityBag) -> bool,
}

impl fmt::Debug for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRule")
            .field("name", &self.name)
            .field("query_type", &self.query_type)
            .finish()
    }
}

/// Evaluated in order; a query mentioning a drug and a procedure is a prescription query.
pub static CLASSIFICATION_RULES: &[ClassificationRule] = &[
    ClassificationRule {
        name: "prescription",
        query_type: QueryType::PrescriptionAnalysis,
        matches: |q, bag| {
            ["prescription", "prescrib", "medication", "pharmacy"]
                .iter()
                .any(|k| q.contains(k))
                || bag.has(EntityType::Drug)
                || kb::KNOWN_DRUGS.iter().any(|d| contains_word(q, d))
        },
    },
    ClassificationRule {
        name: "procedure",
        query_type: QueryType::ProcedureAnalysis,
        matches: |q, bag| {
            ["procedure", "surgery", "surgical", "operation"]
                .iter()
                .any(|k| q.contains(k))
                || bag.has(EntityType::Procedure)
        },
    },
    ClassificationRule {
        name: "payment",
        query_type: QueryType::PaymentAnalysis,
        matches: |q, _| {
            ["payment", "paid", "life science", "compensation"]
                .iter()
                .any(|k| q.contains(k))
        },
    },
    ClassificationRule {
        name: "kol",
        query_type: QueryType::KolAnalysis,
        matches: |q, _| contains_any_word(q, &["kol", "kols"]) || q.contains("opinion leader"),
    },
    ClassificationRule {
        name: "facility",
        query_type: QueryType::FacilityAnalysis,
        matches: |q, _| {
            ["facility", "facilities", "hospital", "clinic", "ambulatory"]
                .iter()
                .any(|k| q.contains(k))
                || contains_word(q, "asc")
        },
    },
    ClassificationRule {
        name: "provider",
        query_type: QueryType::ProviderAnalysis,
        matches: |q, _| {
            ["provider", "physician", "doctor", "specialist"]
                .iter()
                .any(|k| q.contains(k))
                || contains_any_word(q, &["hcp", "hcps"])
        },
    },
];

/// Query type when no rule matches
pub const DEFAULT_QUERY_TYPE: QueryType = QueryType::ComplexMultiTable;

const RANKING_WORDS: &[&str] = &["top", "best", "highest", "most", "leading"];
const LOCATION_WORDS: &[&str] = &["state", "states", "city", "cities", "region", "location", "county"];
const TEMPORAL_WORDS: &[&str] = &["year", "years", "month", "quarter", "recent", "annual", "since", "between"];
const VOLUME_WORDS: &[&str] = &["most", "volume", "count", "how many", "number of", "frequent"];
const FINANCIAL_WORDS: &[&str] = &["payment", "payments", "paid", "amount", "cost", "spend", "spending", "revenue", "dollars"];

const PRIMARY_INTENT_KEYWORDS: &[(PrimaryIntent, &[&str])] = &[
    (PrimaryIntent::Prescription, &["prescrib", "drug", "medication", "pharmacy", "dispens"]),
    (PrimaryIntent::Procedure, &["procedure", "surgery", "operation", "treatment", "perform"]),
    (PrimaryIntent::Payment, &["payment", "paid", "compensation", "financial", "money"]),
    (PrimaryIntent::Facility, &["hospital", "facility", "center", "asc", "ambulatory"]),
    (PrimaryIntent::Kol, &["kol", "key opinion leader", "influential", "expert", "leader"]),
    (PrimaryIntent::Provider, &["provider", "doctor", "physician", "hcp", "prescriber"]),
];

/// Classifies a query given its already-extracted entities
pub fn analyze(query: &str, entities: &EntityBag) -> IntentAnalysis {
    let query_lower = query.to_lowercase();
    if query_lower.trim().is_empty() {
        return IntentAnalysis::fallback();
    }

    let query_type = classify(&query_lower, entities);
    let constraints = detect_constraints(&query_lower, entities);
    let complexity_level = constraints.len().min(5) as u8;

    IntentAnalysis {
        primary_intent: primary_intent(&query_lower),
        query_type,
        needs_ranking: contains_any_word(&query_lower, RANKING_WORDS),
        complexity_level,
        recommended_tables: recommended_tables(query_type, entities),
        constraints,
    }
}

pub fn classify(query_lower: &str, entities: &EntityBag) -> QueryType {
    CLASSIFICATION_RULES
        .iter()
        .find(|rule| (rule.matches)(query_lower, entities))
        .map(|rule| rule.query_type)
        .unwrap_or(DEFAULT_QUERY_TYPE)
}

/// Highest keyword-hit count wins; ties go to the earlier intent
pub fn primary_intent(query_lower: &str) -> PrimaryIntent {
    let mut best = (PrimaryIntent::General, 0usize);
    for (intent, keywords) in PRIMARY_INTENT_KEYWORDS {
        let hits = keywords.iter().filter(|k| query_lower.contains(*k)).count();
        if hits > best.1 {
            best = (*intent, hits);
        }
    }
    best.0
}

pub fn detect_constraints(query_lower: &str, entities: &EntityBag) -> BTreeSet<Constraint> {
    let mut constraints = BTreeSet::new();

    if entities.has(EntityType::State) || contains_any_word(query_lower, LOCATION_WORDS) {
        constraints.insert(Constraint::Location);
    }
    if entities.has(EntityType::Year) || contains_any_word(query_lower, TEMPORAL_WORDS) {
        constraints.insert(Constraint::Temporal);
    }
    if entities.has(EntityType::Specialty)
        || contains_any_word(query_lower, &["specialty", "specialist", "specialists"])
    {
        constraints.insert(Constraint::Specialty);
    }
    if entities.has(EntityType::Number) || contains_any_word(query_lower, VOLUME_WORDS) {
        constraints.insert(Constraint::Volume);
    }
    if entities.has(EntityType::PaymentType) || contains_any_word(query_lower, FINANCIAL_WORDS) {
        constraints.insert(Constraint::Financial);
    }

    constraints
}

/// Query-type tables first, then tables suggested by the entities present
pub fn recommended_tables(query_type: QueryType, entities: &EntityBag) -> Vec<String> {
    let mut scored: Vec<&'static str> = Vec::new();
    if entities.has(EntityType::Drug) || entities.has(EntityType::Patient) {
        scored.push(kb::PHARMACY_CLAIMS);
    }
    if entities.has(EntityType::PaymentType) || entities.has(EntityType::Company) {
        scored.push(kb::PAYMENTS);
    }
    if entities.has(EntityType::Specialty) || entities.has(EntityType::State) {
        scored.push(kb::PROVIDERS);
        scored.push(kb::KOL_PROVIDERS);
    }
    if entities.has(EntityType::Procedure) {
        scored.push(kb::REFERRALS);
    }

    query_type
        .tables()
        .iter()
        .chain(scored.iter())
        .unique()
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag_with(entity_type: EntityType, value: &str) -> EntityBag {
        let mut bag = EntityBag::new();
        bag.insert(entity_type, value);
        bag
    }

    #[test]
    fn test_rule_order_is_fixed() {
        let names: Vec<_> = CLASSIFICATION_RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec!["prescription", "procedure", "payment", "kol", "facility", "provider"]
        );
    }

    #[test]
    fn test_drug_beats_procedure() {
        let q = "ozempic prescriptions before knee arthroplasty procedure";
        let mut bag = bag_with(EntityType::Drug, "Ozempic");
        bag.insert(EntityType::Procedure, "knee arthroplasty");
        assert_eq!(classify(q, &bag), QueryType::PrescriptionAnalysis);
    }

    #[test]
    fn test_default_is_complex_multi_table() {
        let q = "compare everything across the dataset";
        assert_eq!(classify(q, &EntityBag::new()), QueryType::ComplexMultiTable);
    }

    #[test]
    fn test_facility_and_provider_rules() {
        assert_eq!(
            classify("busiest asc in texas", &EntityBag::new()),
            QueryType::FacilityAnalysis
        );
        assert_eq!(
            classify("list hcps with many referrals", &EntityBag::new()),
            QueryType::ProviderAnalysis
        );
    }

    #[test]
    fn test_constraints_are_additive() {
        let mut bag = bag_with(EntityType::State, "TX");
        bag.insert(EntityType::Year, "2022");
        bag.insert(EntityType::Number, "10");
        let analysis = analyze("top 10 cardiology providers in TX in 2022 by payment amount", &bag);
        assert!(analysis.has_constraint(Constraint::Location));
        assert!(analysis.has_constraint(Constraint::Temporal));
        assert!(analysis.has_constraint(Constraint::Volume));
        assert!(analysis.has_constraint(Constraint::Financial));
        assert_eq!(analysis.complexity_level as usize, analysis.constraints.len());
        assert!(analysis.needs_ranking);
    }

    #[test]
    fn test_ranking_requires_whole_word() {
        let analysis = analyze("stop listing laptop owners", &EntityBag::new());
        assert!(!analysis.needs_ranking);
    }

    #[test]
    fn test_primary_intent_scoring() {
        assert_eq!(
            primary_intent("which hospital center has the most ambulatory visits"),
            PrimaryIntent::Facility
        );
        assert_eq!(primary_intent("hello"), PrimaryIntent::General);
    }

    #[test]
    fn test_recommended_tables_deduplicated() {
        let bag = bag_with(EntityType::Drug, "Ozempic");
        let tables = recommended_tables(QueryType::PrescriptionAnalysis, &bag);
        assert_eq!(tables[0], kb::PHARMACY_CLAIMS);
        assert_eq!(tables.iter().filter(|t| *t == kb::PHARMACY_CLAIMS).count(), 1);
    }
}
