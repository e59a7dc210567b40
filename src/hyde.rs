//! Hypothetical SQL examples used to prime retrieval and generation

use crate::intent::IntentAnalysis;
use crate::llm::LlmBackend;
use crate::prompts;
use crate::text::contains_word;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PRESCRIPTION_TEMPLATES: &[&str] = &[
    "SELECT p.PRESCRIBER_NPI_NM, COUNT(*) AS prescription_count FROM fct_pharmacy_clear_claim_allstatus_cluster_brand p GROUP BY p.PRESCRIBER_NPI_NM ORDER BY prescription_count DESC LIMIT 10;",
    "SELECT p.NDC_PREFERRED_BRAND_NM, COUNT(*) AS drug_count FROM fct_pharmacy_clear_claim_allstatus_cluster_brand p GROUP BY p.NDC_PREFERRED_BRAND_NM ORDER BY drug_count DESC LIMIT 10;",
    "SELECT prov.specialties[1], COUNT(*) AS specialty_count FROM as_providers_v1 prov INNER JOIN fct_pharmacy_clear_claim_allstatus_cluster_brand p ON toString(prov.type_1_npi) = p.PRESCRIBER_NPI_NBR GROUP BY prov.specialties[1] ORDER BY specialty_count DESC LIMIT 10;",
];

const PROCEDURE_TEMPLATES: &[&str] = &[
    "SELECT r.procedure_code_description, COUNT(*) AS procedure_count FROM as_providers_referrals_v2 r GROUP BY r.procedure_code_description ORDER BY procedure_count DESC LIMIT 10;",
    "SELECT r.primary_hospital_name, COUNT(*) AS hospital_count FROM as_providers_referrals_v2 r GROUP BY r.primary_hospital_name ORDER BY hospital_count DESC LIMIT 10;",
    "SELECT r.primary_type_2_npi_state, COUNT(*) AS state_count FROM as_providers_referrals_v2 r GROUP BY r.primary_type_2_npi_state ORDER BY state_count DESC LIMIT 10;",
];

const PAYMENT_TEMPLATES: &[&str] = &[
    "SELECT pay.life_science_firm_name, SUM(pay.amount) AS total_payment FROM as_lsf_v1 pay GROUP BY pay.life_science_firm_name ORDER BY total_payment DESC LIMIT 10;",
    "SELECT pay.nature_of_payment, COUNT(*) AS payment_count FROM as_lsf_v1 pay GROUP BY pay.nature_of_payment ORDER BY payment_count DESC LIMIT 10;",
    "SELECT pay.year, SUM(pay.amount) AS yearly_total FROM as_lsf_v1 pay GROUP BY pay.year ORDER BY yearly_total DESC LIMIT 10;",
];

const KOL_TEMPLATES: &[&str] = &[
    "SELECT k.displayName, k.score FROM mf_providers k ORDER BY k.score DESC LIMIT 10;",
    "SELECT k.primaryOrgName, AVG(k.score) AS avg_score FROM mf_providers k GROUP BY k.primaryOrgName ORDER BY avg_score DESC LIMIT 10;",
    "SELECT c.display, COUNT(*) AS condition_count FROM mf_conditions c INNER JOIN mf_scores s ON c.projectId = s.mf_conditions_projectId GROUP BY c.display ORDER BY condition_count DESC LIMIT 10;",
];

const FACILITY_TEMPLATES: &[&str] = &[
    "SELECT r.primary_hospital_name, COUNT(DISTINCT r.primary_type_1_npi) AS provider_count FROM as_providers_referrals_v2 r GROUP BY r.primary_hospital_name ORDER BY provider_count DESC LIMIT 10;",
    "SELECT prov.hospital_names[1], COUNT(*) AS facility_count FROM as_providers_v1 prov WHERE prov.hospital_names[1] != '' GROUP BY prov.hospital_names[1] ORDER BY facility_count DESC LIMIT 10;",
    "SELECT k.primaryOrgName, COUNT(*) AS kol_count FROM mf_providers k GROUP BY k.primaryOrgName ORDER BY kol_count DESC LIMIT 10;",
];

const GENERAL_TEMPLATES: &[&str] = &[
    "SELECT prov.first_name, prov.last_name, prov.specialties[1] FROM as_providers_v1 prov LIMIT 10;",
    "SELECT k.displayName, k.score FROM mf_providers k ORDER BY k.score DESC LIMIT 10;",
    "SELECT DISTINCT prov.states[1] AS state FROM as_providers_v1 prov WHERE prov.states[1] != '' ORDER BY state LIMIT 10;",
];

pub struct HydeGenerator {
    llm: Option<Arc<dyn LlmBackend>>,
    max_examples: usize,
}

impl HydeGenerator {
    pub fn new(llm: Option<Arc<dyn LlmBackend>>, max_examples: usize) -> Self {
        Self { llm, max_examples }
    }

    /// At most `max_examples` statements; never fails.
    pub async fn generate(&self, query: &str, intent: &IntentAnalysis) -> Vec<String> {
        if query.trim().is_empty() || self.max_examples == 0 {
            return Vec::new();
        }

        if let Some(llm) = &self.llm {
            match llm.generate(&prompts::hyde_prompt(query, intent)).await {
                Ok(response) => {
                    let examples = extract_sql_statements(&response, self.max_examples);
                    if !examples.is_empty() {
                        info!("Generated {} HyDE examples via {}", examples.len(), llm.name());
                        return examples;
                    }
                    debug!("{} answer contained no SQL, using templates", llm.name());
                }
                Err(e) => warn!("HyDE generation via {} failed: {}", llm.name(), e),
            }
        }

        let examples: Vec<String> = template_examples(query)
            .iter()
            .take(self.max_examples)
            .map(|s| s.to_string())
            .collect();
        info!("Using {} HyDE template examples", examples.len());
        examples
    }
}

/// Template family chosen by query keywords
pub fn template_examples(query: &str) -> &'static [&'static str] {
    let q = query.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| q.contains(w));

    if has(&["prescrib", "drug", "medication"]) {
        PRESCRIPTION_TEMPLATES
    } else if has(&["procedure", "surgery", "operation"]) {
        PROCEDURE_TEMPLATES
    } else if has(&["payment", "paid", "financial"]) {
        PAYMENT_TEMPLATES
    } else if contains_word(&q, "kol") || has(&["opinion leader", "expert"]) {
        KOL_TEMPLATES
    } else if contains_word(&q, "asc") || has(&["facility", "hospital", "ambulatory"]) {
        FACILITY_TEMPLATES
    } else {
        GENERAL_TEMPLATES
    }
}

/// Pulls SELECT/WITH statements out of a free-form answer.
/// A statement runs from its starting line until a line ending in `;`.
pub fn extract_sql_statements(response: &str, limit: usize) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in response.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with("--") || line.starts_with("```") {
            continue;
        }
        let upper = line.to_uppercase();
        if upper.starts_with("SELECT") || upper.starts_with("WITH") {
            flush_statement(&mut current, &mut statements);
            current.push(line);
        } else if !current.is_empty() {
            current.push(line);
        } else {
            continue;
        }

        if line.ends_with(';') {
            flush_statement(&mut current, &mut statements);
        }
    }
    flush_statement(&mut current, &mut statements);

    statements.truncate(limit);
    statements
}

fn flush_statement(current: &mut Vec<&str>, statements: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let mut sql = current.join(" ").trim().to_string();
    current.clear();
    if !sql.ends_with(';') {
        sql.push(';');
    }
    statements.push(sql);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CareQueryError, Result};
    use crate::intent::IntentAnalysis;
    use async_trait::async_trait;

    struct CannedLlm(Result<String>);

    #[async_trait]
    impl LlmBackend for CannedLlm {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(CareQueryError::Llm(e.to_string())),
            }
        }
    }

    #[test]
    fn test_extract_multiline_statements() {
        let response = "Here are three options:\n```sql\nSELECT a\nFROM t\nLIMIT 5;\n```\n\
            2. WITH x AS (SELECT 1) SELECT * FROM x;\nSELECT b FROM u\n";
        let statements = extract_sql_statements(response, 3);
        assert_eq!(statements[0], "SELECT a FROM t LIMIT 5;");
        assert_eq!(statements[1], "SELECT b FROM u;");
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn test_template_selection() {
        assert_eq!(template_examples("which drugs sell best"), PRESCRIPTION_TEMPLATES);
        assert_eq!(template_examples("Top ASC by volume"), FACILITY_TEMPLATES);
        assert_eq!(template_examples("hello"), GENERAL_TEMPLATES);
    }

    #[tokio::test]
    async fn test_falls_back_to_templates_on_llm_error() {
        let llm: Arc<dyn LlmBackend> =
            Arc::new(CannedLlm(Err(CareQueryError::Llm("down".to_string()))));
        let generator = HydeGenerator::new(Some(llm), 2);
        let examples = generator
            .generate("total payments by firm", &IntentAnalysis::fallback())
            .await;
        assert_eq!(examples.len(), 2);
        assert!(examples[0].contains("as_lsf_v1"));
    }

    #[tokio::test]
    async fn test_uses_llm_examples() {
        let llm: Arc<dyn LlmBackend> = Arc::new(CannedLlm(Ok(
            "SELECT 1 FROM a;\nSELECT 2 FROM b;\nSELECT 3 FROM c;\nSELECT 4 FROM d;".to_string(),
        )));
        let generator = HydeGenerator::new(Some(llm), 3);
        let examples = generator.generate("anything", &IntentAnalysis::fallback()).await;
        assert_eq!(examples, vec!["SELECT 1 FROM a;", "SELECT 2 FROM b;", "SELECT 3 FROM c;"]);
    }

    #[tokio::test]
    async fn test_empty_query_yields_nothing() {
        let generator = HydeGenerator::new(None, 3);
        assert!(generator.generate("  ", &IntentAnalysis::fallback()).await.is_empty());
    }
}
