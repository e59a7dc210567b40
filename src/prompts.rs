//! Prompt builders for SQL generation and hypothetical examples

use crate::entities::EntityBag;
use crate::intent::{Constraint, IntentAnalysis};
use crate::knowledge_base as kb;
use itertools::Itertools;

/// Retrieved context is truncated to this many characters in the primary prompt
pub const MAX_PROMPT_CONTEXT_CHARS: usize = 1000;

const JOIN_RULES: &str = "CRITICAL JOIN PATTERNS:
- Pharmacy to Provider: toString(prov.type_1_npi) = p.PRESCRIBER_NPI_NBR
- Provider to Payments: prov.type_1_npi = pay.type_1_npi
- Provider to Referrals: prov.type_1_npi = r.primary_type_1_npi
- KOL Providers to Scores: k.npi = s.mf_providers_npi
- KOL Scores to Conditions: s.mf_conditions_projectId = c.projectId
- Use aliases: p, prov, pay, r, k, s, c";

const DIALECT_RULES: &str = "CLICKHOUSE RULES:
1. Arrays are 1-indexed: specialties[1], states[1], cities[1]
2. Use ILIKE for case-insensitive text matching
3. Use toString() for NPI type conversions: toString(type_1_npi)
4. Date functions: EXTRACT(YEAR FROM date_column)
5. Handle Nullable columns appropriately
6. Use LIMIT for performance optimization";

const DOMAIN_RULES: &str = "HEALTHCARE DOMAIN RULES:
1. Prescription queries: NDC_PREFERRED_BRAND_NM, PRESCRIBER_NPI_NM, PATIENT_ID
2. Procedure queries: procedure_code_description, primary_hospital_name
3. Payment queries: life_science_firm_name, amount, nature_of_payment, year
4. Provider queries: first_name, last_name, specialties[1], states[1]
5. Facility queries: primary_hospital_name, referring_hospital_name
6. KOL queries: displayName, score, primaryOrgName
Do NOT use columns that are not in the schema (there is no DISEASE_NM or facility_type).";

fn entity_lines(entities: &EntityBag, upper: bool) -> String {
    entities
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(t, values)| {
            let label = if upper {
                t.as_str().to_uppercase()
            } else {
                t.as_str().to_string()
            };
            format!("{}: {}", label, values.join(", "))
        })
        .join("\n")
}

fn table_details(tables: &[String]) -> String {
    tables
        .iter()
        .filter_map(|name| kb::table(name))
        .map(|table| {
            let columns = table.columns.iter().map(|c| c.name).join(", ");
            let joins = kb::TABLE_RELATIONSHIPS
                .iter()
                .filter(|r| r.from_table == table.name || r.to_table == table.name)
                .map(|r| r.join_condition)
                .join("; ");
            if joins.is_empty() {
                format!("- {}: {}\n  Columns: {}", table.name, table.description, columns)
            } else {
                format!(
                    "- {}: {}\n  Columns: {}\n  Joins: {}",
                    table.name, table.description, columns, joins
                )
            }
        })
        .join("\n")
}

fn constraint_instructions(intent: &IntentAnalysis) -> String {
    intent
        .constraints
        .iter()
        .filter_map(|c| match c {
            Constraint::Location => Some(
                "LOCATION: use states[1] for as_providers_v1, PRESCRIBER_NPI_STATE_CD for pharmacy claims, \
primary_type_2_npi_state for referrals. Handle both state codes (CA, NY) and full names.",
            ),
            Constraint::Temporal => Some(
                "TEMPORAL: use EXTRACT(YEAR FROM date) for referrals, EXTRACT(YEAR FROM SERVICE_DATE_DD) \
for pharmacy claims, the year column for as_lsf_v1.",
            ),
            Constraint::Specialty => Some(
                "SPECIALTY: use specialties[1] for as_providers_v1 and primary_specialty for referrals, \
matched with ILIKE.",
            ),
            Constraint::Financial => Some(
                "FINANCIAL: aggregate amount from as_lsf_v1 or TOTAL_PAID_AMT from pharmacy claims.",
            ),
            Constraint::Volume => None,
        })
        .join("\n")
}

const RANKING_INSTRUCTIONS: &str = "RANKING REQUIREMENTS:
- Use COUNT(*) for volume-based ranking of prescriptions or procedures
- Use SUM(amount) for financial ranking from as_lsf_v1
- Always include ORDER BY ... DESC for top queries
- Include an appropriate LIMIT (10-20 for top queries)
- GROUP BY every non-aggregated selected column";

/// Structured prompt for the primary backend
pub fn primary_sql_prompt(
    query: &str,
    entities: &EntityBag,
    context: &str,
    intent: &IntentAnalysis,
) -> String {
    let context: String = context.chars().take(MAX_PROMPT_CONTEXT_CHARS).collect();
    let context = if context.trim().is_empty() {
        "No additional context".to_string()
    } else {
        context
    };
    let constraints = intent.constraints.iter().map(|c| c.as_str()).join(", ");
    let related = kb::expand_synonyms(query).into_iter().unique().join(", ");
    let ranking = if intent.needs_ranking {
        RANKING_INSTRUCTIONS
    } else {
        ""
    };

    format!(
        r#"You are an expert ClickHouse SQL generator for healthcare data. Generate ONLY the SQL query, no explanations.

QUERY: "{query}"

INTENT ANALYSIS:
- Primary Intent: {primary}
- Query Type: {query_type}
- Complexity Level: {complexity}/5
- Needs Ranking: {ranking_flag}
- Constraints: {constraints}

ENTITY CONSTRAINTS:
{entities}

RELATED TERMS: {related}

RECOMMENDED TABLES:
{tables}

{constraint_instructions}

{ranking}

{join_rules}

{dialect_rules}

{domain_rules}

CONTEXT FROM RETRIEVAL:
{context}

CRITICAL: Generate only the ClickHouse SQL query. No markdown, no explanations, no comments."#,
        query = query,
        primary = intent.primary_intent,
        query_type = intent.query_type,
        complexity = intent.complexity_level,
        ranking_flag = intent.needs_ranking,
        constraints = constraints,
        entities = entity_lines(entities, true),
        related = if related.is_empty() { "none".to_string() } else { related },
        tables = table_details(&intent.recommended_tables),
        constraint_instructions = constraint_instructions(intent),
        ranking = ranking,
        join_rules = JOIN_RULES,
        dialect_rules = DIALECT_RULES,
        domain_rules = DOMAIN_RULES,
        context = context,
    )
}

/// Short prompt for the local fallback model
pub fn fallback_sql_prompt(query: &str, entities: &EntityBag, intent: &IntentAnalysis) -> String {
    format!(
        r#"Generate ClickHouse SQL for healthcare query: {query}

Tables to use: {tables}
Entities:
{entities}

Rules:
- Arrays are 1-indexed: specialties[1], states[1]
- Use ILIKE for text matching
- Join as_providers_v1 with other tables using type_1_npi
- For prescriptions: {pharmacy}
- For procedures: {referrals}
- For payments: {payments}
- Use toString(type_1_npi) = PRESCRIBER_NPI_NBR for pharmacy joins
- For top queries use ORDER BY ... DESC LIMIT 10

Use only actual column names from the schema.

Return only SQL:"#,
        query = query,
        tables = intent.recommended_tables.join(", "),
        entities = entity_lines(entities, false),
        pharmacy = kb::PHARMACY_CLAIMS,
        referrals = kb::REFERRALS,
        payments = kb::PAYMENTS,
    )
}

/// Asks for three alternative example queries
pub fn hyde_prompt(query: &str, intent: &IntentAnalysis) -> String {
    let tables = if intent.recommended_tables.is_empty() {
        kb::SCHEMA.iter().map(|t| format!("- {}", t.name)).join("\n")
    } else {
        intent
            .recommended_tables
            .iter()
            .map(|t| format!("- {}", t))
            .join("\n")
    };

    format!(
        r#"Generate 3 different ClickHouse SQL query examples for this healthcare question:

Question: "{query}"
Query Type: {query_type}

Use these healthcare tables:
{tables}

Rules:
- Arrays are 1-indexed: specialties[1], states[1]
- Use toString() for NPI joins: toString(type_1_npi) = PRESCRIBER_NPI_NBR
- Use ILIKE for case-insensitive matching
- Use table aliases (p, prov, pay, r, k)

Return 3 different SQL approaches as separate queries, each ending with a semicolon:"#,
        query = query,
        query_type = intent.query_type,
        tables = tables,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityExtractor;

    #[test]
    fn test_primary_prompt_embeds_entities_and_tables() {
        let query = "Who are the top 10 prescribers of Ozempic in New York?";
        let (bag, intent) = EntityExtractor::new().extract(query);
        let prompt = primary_sql_prompt(query, &bag, "", &intent);
        assert!(prompt.contains("DRUG: Ozempic"));
        assert!(prompt.contains(kb::PHARMACY_CLAIMS));
        assert!(prompt.contains("RANKING REQUIREMENTS"));
        assert!(prompt.contains("No additional context"));
    }

    #[test]
    fn test_primary_prompt_truncates_context() {
        let (bag, intent) = EntityExtractor::new().extract("payments in 2022");
        let context = "x".repeat(5000);
        let prompt = primary_sql_prompt("payments in 2022", &bag, &context, &intent);
        assert!(!prompt.contains(&"x".repeat(MAX_PROMPT_CONTEXT_CHARS + 1)));
        assert!(prompt.contains(&"x".repeat(MAX_PROMPT_CONTEXT_CHARS)));
    }

    #[test]
    fn test_fallback_prompt_is_short() {
        let query = "top hospitals for colonoscopy";
        let (bag, intent) = EntityExtractor::new().extract(query);
        let fallback = fallback_sql_prompt(query, &bag, &intent);
        let primary = primary_sql_prompt(query, &bag, "", &intent);
        assert!(fallback.len() < primary.len());
        assert!(fallback.contains("procedure: colonoscopy"));
    }
}
