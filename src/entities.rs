//! Entity extraction
//!
//! Turns raw query text into a typed [`EntityBag`] and, through
//! [`crate::intent`], an [`IntentAnalysis`]. Matching is deterministic:
//! the same query always produces the same bag.

use crate::error::{CareQueryError, Result};
use crate::intent::{self, IntentAnalysis};
use crate::knowledge_base as kb;
use crate::text::contains_word;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Drug,
    State,
    Specialty,
    Procedure,
    Year,
    Company,
    Facility,
    Provider,
    Condition,
    PaymentType,
    Patient,
    Number,
}

impl EntityType {
    pub const ALL: [EntityType; 12] = [
        EntityType::Drug,
        EntityType::State,
        EntityType::Specialty,
        EntityType::Procedure,
        EntityType::Year,
        EntityType::Company,
        EntityType::Facility,
        EntityType::Provider,
        EntityType::Condition,
        EntityType::PaymentType,
        EntityType::Patient,
        EntityType::Number,
    ];

    /// Types whose usage in SQL earns the healthcare bonuses
    pub const CRITICAL: [EntityType; 4] = [
        EntityType::Drug,
        EntityType::Procedure,
        EntityType::Specialty,
        EntityType::State,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Drug => "drug",
            EntityType::State => "state",
            EntityType::Specialty => "specialty",
            EntityType::Procedure => "procedure",
            EntityType::Year => "year",
            EntityType::Company => "company",
            EntityType::Facility => "facility",
            EntityType::Provider => "provider",
            EntityType::Condition => "condition",
            EntityType::PaymentType => "payment_type",
            EntityType::Patient => "patient",
            EntityType::Number => "number",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracted literal values per entity type.
///
/// Every type is always present; a type without matches holds an empty list.
/// Values within a type are unique and keep first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBag {
    values: BTreeMap<EntityType, Vec<String>>,
}

impl Default for EntityBag {
    fn default() -> Self {
        Self {
            values: EntityType::ALL.iter().map(|t| (*t, Vec::new())).collect(),
        }
    }
}

impl EntityBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value unless the type already holds it
    pub fn insert(&mut self, entity_type: EntityType, value: impl Into<String>) {
        let value = value.into();
        if value.trim().is_empty() {
            return;
        }
        let slot = self.values.entry(entity_type).or_default();
        if !slot.contains(&value) {
            slot.push(value);
        }
    }

    pub fn extend<I, S>(&mut self, entity_type: EntityType, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self.insert(entity_type, value);
        }
    }

    pub fn get(&self, entity_type: EntityType) -> &[String] {
        self.values
            .get(&entity_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn has(&self, entity_type: EntityType) -> bool {
        !self.get(entity_type).is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(|v| v.is_empty())
    }

    pub fn total_values(&self) -> usize {
        self.values.values().map(|v| v.len()).sum()
    }

    pub fn populated_types(&self) -> Vec<EntityType> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityType, &[String])> {
        self.values.iter().map(|(t, v)| (*t, v.as_slice()))
    }

    /// Pairs every populated type with its candidate columns
    pub fn mappings(&self) -> Vec<EntityMapping> {
        self.iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(entity_type, values)| EntityMapping {
                entity_type,
                values: values.to_vec(),
                columns: kb::candidate_columns(entity_type)
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            })
            .collect()
    }
}

/// A populated entity type bound to the schema columns it may filter on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapping {
    pub entity_type: EntityType,
    pub values: Vec<String>,
    pub columns: Vec<String>,
}

lazy_static! {
    static ref YEAR_PATTERN: Option<Regex> = Regex::new(r"\b(20\d{2})\b").ok();
    static ref TOP_N_PATTERN: Option<Regex> = Regex::new(r"\btop\s+(\d+)\b").ok();
    static ref N_MOST_PATTERN: Option<Regex> =
        Regex::new(r"\b(\d+)\s+(?:most|highest|top|largest)\b").ok();
    static ref STATE_CODE_PATTERN: Option<Regex> = Regex::new(r"\b([A-Z]{2})\b").ok();
}

/// State codes that are also English words in upper-case text
const AMBIGUOUS_STATE_CODES: &[&str] = &[
    "AL", "CO", "DE", "HI", "ID", "IN", "LA", "MA", "ME", "OH", "OK", "OR", "PA",
];

/// Words after which an ambiguous code still reads as a state
const LOCATION_PREPOSITIONS: &[&str] = &["in", "from", "across", "within"];

/// Ambiguous codes count only right after a location preposition
fn is_state_code_at(query: &str, code: &str, start: usize) -> bool {
    if !kb::is_state_code(code) {
        return false;
    }
    if !AMBIGUOUS_STATE_CODES.contains(&code) {
        return true;
    }
    query[..start]
        .split_whitespace()
        .next_back()
        .map_or(false, |word| LOCATION_PREPOSITIONS.iter().any(|p| word.eq_ignore_ascii_case(p)))
}

fn pattern(re: &'static Option<Regex>, name: &str) -> Result<&'static Regex> {
    re.as_ref()
        .ok_or_else(|| CareQueryError::Extraction(format!("{} pattern failed to compile", name)))
}

/// Deterministic rule-based entity and intent extractor
#[derive(Debug, Clone, Default)]
pub struct EntityExtractor;

impl EntityExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extracts entities and classifies intent. Never fails: any internal error
    /// degrades to an empty bag and the general fallback intent.
    pub fn extract(&self, query: &str) -> (EntityBag, IntentAnalysis) {
        if query.trim().is_empty() {
            debug!("Empty query, returning default extraction");
            return (EntityBag::default(), IntentAnalysis::fallback());
        }

        match self.try_extract(query) {
            Ok(result) => result,
            Err(e) => {
                warn!("Entity extraction failed, using defaults: {}", e);
                (EntityBag::default(), IntentAnalysis::fallback())
            }
        }
    }

    pub fn try_extract(&self, query: &str) -> Result<(EntityBag, IntentAnalysis)> {
        let bag = self.extract_entities(query)?;
        let analysis = intent::analyze(query, &bag);
        info!(
            "Extracted {} entity values across {} types, query type {}",
            bag.total_values(),
            bag.populated_types().len(),
            analysis.query_type
        );
        Ok((bag, analysis))
    }

    pub fn extract_entities(&self, query: &str) -> Result<EntityBag> {
        let query_lower = query.to_lowercase();
        let mut bag = EntityBag::new();

        for entity_type in [
            EntityType::Drug,
            EntityType::Procedure,
            EntityType::PaymentType,
            EntityType::Condition,
            EntityType::Company,
        ] {
            let found = kb::known_values(entity_type)
                .iter()
                .filter(|value| contains_word(&query_lower, value))
                .copied();
            bag.extend(entity_type, found);
        }

        // State names first, then validated uppercase codes
        let names = kb::US_STATES
            .iter()
            .filter(|(name, _)| contains_word(&query_lower, name))
            .map(|(name, _)| *name);
        bag.extend(EntityType::State, names);

        let codes = pattern(&STATE_CODE_PATTERN, "state code")?
            .captures_iter(query)
            .filter_map(|c| c.get(1))
            .filter(|m| is_state_code_at(query, m.as_str(), m.start()))
            .map(|m| m.as_str())
            .unique()
            .collect::<Vec<_>>();
        bag.extend(EntityType::State, codes);

        bag.extend(EntityType::Specialty, extract_specialties(&query_lower));

        let years = pattern(&YEAR_PATTERN, "year")?
            .captures_iter(query)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect::<Vec<_>>();
        bag.extend(EntityType::Year, years);

        let mut numbers = pattern(&TOP_N_PATTERN, "top-n")?
            .captures_iter(&query_lower)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect::<Vec<_>>();
        if numbers.is_empty() {
            numbers = pattern(&N_MOST_PATTERN, "n-most")?
                .captures_iter(&query_lower)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect();
        }
        bag.extend(EntityType::Number, numbers);

        let facilities = kb::FACILITY_TERMS
            .iter()
            .filter(|term| contains_word(&query_lower, term))
            .copied();
        bag.extend(EntityType::Facility, facilities);

        let providers = kb::PROVIDER_TERMS
            .iter()
            .filter(|(term, _)| contains_word(&query_lower, term))
            .map(|(_, role)| *role);
        bag.extend(EntityType::Provider, providers);

        if kb::PATIENT_TERMS.iter().any(|t| contains_word(&query_lower, t)) {
            bag.insert(EntityType::Patient, "PATIENT_ID");
        }

        for (entity_type, values) in bag.iter().filter(|(_, v)| !v.is_empty()) {
            debug!("Found {}: {:?}", entity_type, values);
        }

        Ok(bag)
    }
}

/// Direct specialty names followed by synonym-derived specialties
fn extract_specialties(query_lower: &str) -> Vec<&'static str> {
    let direct = kb::KNOWN_SPECIALTIES
        .iter()
        .filter(|s| contains_word(query_lower, s))
        .copied();
    let synonyms = kb::SPECIALTY_SYNONYMS
        .iter()
        .filter(|(trigger, _)| {
            contains_word(query_lower, trigger) || contains_word(query_lower, &format!("{}s", trigger))
        })
        .map(|(_, specialty)| *specialty);
    direct.chain(synonyms).unique().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bag_has_every_type() {
        let bag = EntityBag::default();
        for t in EntityType::ALL {
            assert!(bag.get(t).is_empty());
        }
        assert_eq!(bag.total_values(), 0);
        assert!(bag.mappings().is_empty());
    }

    #[test]
    fn test_insert_deduplicates_in_first_seen_order() {
        let mut bag = EntityBag::new();
        bag.extend(EntityType::Drug, ["Ozempic", "Humira", "Ozempic"]);
        assert_eq!(bag.get(EntityType::Drug), &["Ozempic", "Humira"]);
    }

    #[test]
    fn test_drug_case_preserved_from_knowledge_base() {
        let bag = EntityExtractor::new()
            .extract_entities("prescriptions of ozempic and JARDIANCE")
            .unwrap();
        assert_eq!(bag.get(EntityType::Drug), &["JARDIANCE", "Ozempic"]);
    }

    #[test]
    fn test_state_codes_are_case_sensitive() {
        let extractor = EntityExtractor::new();
        let upper = extractor.extract_entities("providers in CA and TX").unwrap();
        assert_eq!(upper.get(EntityType::State), &["CA", "TX"]);

        let lower = extractor.extract_entities("providers in ca").unwrap();
        assert!(lower.get(EntityType::State).is_empty());

        // Uppercase tokens that are not state codes are ignored
        let noise = extractor.extract_entities("KOL list for XX").unwrap();
        assert!(noise.get(EntityType::State).is_empty());
    }

    #[test]
    fn test_upper_case_words_are_not_state_codes() {
        let extractor = EntityExtractor::new();
        let shouted = extractor
            .extract_entities("TOP 10 PRESCRIBERS OR PAYMENTS IN NEW YORK")
            .unwrap();
        assert_eq!(shouted.get(EntityType::State), &["New York"]);

        let boolean = extractor.extract_entities("Ozempic OR Wegovy prescribers in NY").unwrap();
        assert_eq!(boolean.get(EntityType::State), &["NY"]);

        // A location preposition still marks the code as a state
        let oregon = extractor.extract_entities("cardiologists in OR and from PA").unwrap();
        assert_eq!(oregon.get(EntityType::State), &["OR", "PA"]);
    }

    #[test]
    fn test_specialty_synonyms() {
        let bag = EntityExtractor::new()
            .extract_entities("top cardiologists treating heart disease and cancer")
            .unwrap();
        let specialties = bag.get(EntityType::Specialty);
        assert!(specialties.contains(&"cardiology".to_string()));
        assert!(specialties.contains(&"oncology".to_string()));
        assert_eq!(
            specialties.iter().filter(|s| *s == "cardiology").count(),
            1
        );
    }

    #[test]
    fn test_numbers_fallback_pattern() {
        let extractor = EntityExtractor::new();
        let top = extractor.extract_entities("top 5 hospitals").unwrap();
        assert_eq!(top.get(EntityType::Number), &["5"]);

        let most = extractor.extract_entities("the 20 most active surgeons").unwrap();
        assert_eq!(most.get(EntityType::Number), &["20"]);
    }

    #[test]
    fn test_provider_facility_and_patient() {
        let bag = EntityExtractor::new()
            .extract_entities("How many patients did physicians at the ambulatory surgical center see in 2023?")
            .unwrap();
        assert_eq!(bag.get(EntityType::Provider), &["physician"]);
        assert_eq!(bag.get(EntityType::Facility), &["ambulatory surgical center"]);
        assert_eq!(bag.get(EntityType::Patient), &["PATIENT_ID"]);
        assert_eq!(bag.get(EntityType::Year), &["2023"]);
    }

    #[test]
    fn test_empty_query_returns_defaults() {
        let (bag, analysis) = EntityExtractor::new().extract("   ");
        assert!(bag.is_empty());
        assert_eq!(analysis.complexity_level, 0);
        assert_eq!(analysis.query_type, crate::intent::QueryType::General);
    }

    #[test]
    fn test_mappings_carry_candidate_columns() {
        let mut bag = EntityBag::new();
        bag.insert(EntityType::State, "NY");
        let mappings = bag.mappings();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].columns[0], "PRESCRIBER_NPI_STATE_CD");
        assert!(mappings[0].columns.contains(&"states[1]".to_string()));
    }
}
