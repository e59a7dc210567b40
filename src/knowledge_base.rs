//! Healthcare Domain Knowledge Base
//!
//! Static term-to-column mappings, known entity values, specialty synonyms,
//! the analytical store schema and table relationships. Every other component
//! reads from here; nothing here is mutable.

use crate::entities::EntityType;

/// Pharmacy prescription claims
pub const PHARMACY_CLAIMS: &str = "fct_pharmacy_clear_claim_allstatus_cluster_brand";
/// Provider directory (array columns are 1-indexed)
pub const PROVIDERS: &str = "as_providers_v1";
/// Life-science firm payments to providers
pub const PAYMENTS: &str = "as_lsf_v1";
/// Referrals, diagnoses and procedures
pub const REFERRALS: &str = "as_providers_referrals_v2";
/// Key opinion leader providers
pub const KOL_PROVIDERS: &str = "mf_providers";
/// KOL scores per condition
pub const KOL_SCORES: &str = "mf_scores";
/// Condition directory
pub const CONDITIONS: &str = "mf_conditions";

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub data_type: &'static str,
    pub comment: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub columns: &'static [ColumnDef],
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A join edge between two tables
#[derive(Debug, Clone, Copy)]
pub struct TableRelationship {
    pub from_table: &'static str,
    pub to_table: &'static str,
    pub join_condition: &'static str,
}

const fn col(name: &'static str, data_type: &'static str, comment: &'static str) -> ColumnDef {
    ColumnDef { name, data_type, comment }
}

pub static SCHEMA: &[TableSchema] = &[
    TableSchema {
        name: PAYMENTS,
        description: "Life science firm payments to healthcare providers",
        columns: &[
            col("type_1_npi", "UInt64", "National Provider Identifier of the paid provider"),
            col("life_science_firm_name", "String", "Life science firm making the payment"),
            col("product_name", "String", "Product associated with the payment"),
            col("nature_of_payment", "Nullable(String)", "Payment type (Food and Beverage, Travel, Education, ...)"),
            col("year", "UInt16", "Year the payment was made"),
            col("amount", "Nullable(Float32)", "Monetary amount of the payment"),
        ],
    },
    TableSchema {
        name: PROVIDERS,
        description: "Healthcare provider details",
        columns: &[
            col("type_1_npi", "UInt64", "Primary NPI identifier"),
            col("first_name", "String", "Provider first name"),
            col("middle_name", "String", "Provider middle name"),
            col("last_name", "String", "Provider last name"),
            col("gender", "Enum8('M' = 1, 'F' = 2, 'O' = 3, 'U' = 4, '' = 5)", "Provider gender"),
            col("specialties", "Array(String)", "Medical specialties"),
            col("conditions", "Array(String)", "Medical conditions treated"),
            col("cities", "Array(String)", "Cities where the provider practices"),
            col("states", "Array(String)", "States where the provider practices"),
            col("hospital_names", "Array(String)", "Affiliated hospital names"),
            col("system_names", "Array(String)", "Affiliated health system names"),
            col("best_hospital_name", "String", "Best hospital name"),
            col("best_system_name", "String", "Best system name"),
        ],
    },
    TableSchema {
        name: REFERRALS,
        description: "Provider referrals with diagnoses and procedures",
        columns: &[
            col("primary_type_1_npi", "UInt64", "Primary Type 1 NPI"),
            col("referring_type_1_npi", "UInt64", "Referring Type 1 NPI"),
            col("primary_type_1_npi_name", "String", "Primary provider name"),
            col("referring_type_1_npi_name", "String", "Referring provider name"),
            col("primary_type_2_npi_state", "String", "Primary provider state"),
            col("referring_type_2_npi_state", "String", "Referring provider state"),
            col("primary_hospital_name", "String", "Primary hospital name"),
            col("referring_hospital_name", "String", "Referring hospital name"),
            col("primary_specialty", "String", "Primary provider specialty"),
            col("referring_specialty", "String", "Referring provider specialty"),
            col("date", "Date", "Referral date"),
            col("diagnosis_code", "String", "Diagnosis code"),
            col("diagnosis_code_description", "String", "Diagnosis description"),
            col("procedure_code", "String", "Procedure code"),
            col("procedure_code_description", "String", "Procedure description"),
            col("total_claim_charge", "Float64", "Total claim charge"),
            col("patient_count", "UInt64", "Number of patients"),
        ],
    },
    TableSchema {
        name: PHARMACY_CLAIMS,
        description: "Pharmacy prescription claims",
        columns: &[
            col("RX_ANCHOR_DD", "Date32", "Prescription anchor date"),
            col("RX_CLAIM_NBR", "String", "Prescription claim number"),
            col("PATIENT_ID", "String", "Patient identifier"),
            col("SERVICE_DATE_DD", "Date32", "Service date"),
            col("TRANSACTION_STATUS_NM", "String", "Transaction status"),
            col("NDC", "String", "National Drug Code"),
            col("NDC_DESC", "String", "NDC description"),
            col("NDC_GENERIC_NM", "String", "Generic drug name"),
            col("NDC_PREFERRED_BRAND_NM", "String", "Preferred brand name"),
            col("NDC_DRUG_NM", "String", "Drug name"),
            col("NDC_DRUG_CLASS_NM", "String", "Drug class"),
            col("DIAGNOSIS_CD", "String", "Diagnosis code"),
            col("PRESCRIBER_NPI_NBR", "String", "Prescriber NPI"),
            col("PRESCRIBER_NPI_NM", "String", "Prescriber name"),
            col("PRESCRIBER_NPI_STATE_CD", "String", "Prescriber state code"),
            col("PAYER_COMPANY_NM", "String", "Payer company name"),
            col("GROSS_DUE_AMT", "Decimal(38,9)", "Gross amount due"),
            col("TOTAL_PAID_AMT", "Decimal(38,9)", "Total amount paid"),
        ],
    },
    TableSchema {
        name: CONDITIONS,
        description: "Medical condition directory",
        columns: &[
            col("projectId", "Int32", "Condition project identifier"),
            col("display", "Nullable(String)", "Condition display name"),
            col("codingType", "Nullable(String)", "Coding system"),
        ],
    },
    TableSchema {
        name: KOL_PROVIDERS,
        description: "Key opinion leader providers",
        columns: &[
            col("npi", "Int32", "Provider NPI"),
            col("name", "Nullable(String)", "Provider name"),
            col("displayName", "Nullable(String)", "Provider display name"),
            col("score", "Nullable(Float32)", "Overall KOL score"),
            col("primaryOrgName", "Nullable(String)", "Primary organization"),
            col("healthSystem_name", "Nullable(String)", "Health system name"),
        ],
    },
    TableSchema {
        name: KOL_SCORES,
        description: "KOL scores per condition",
        columns: &[
            col("id", "Int32", "Score identifier"),
            col("score", "Nullable(Float32)", "Condition score"),
            col("mf_providers_npi", "Nullable(Int32)", "KOL provider NPI"),
            col("mf_conditions_projectId", "Nullable(Int32)", "Condition project identifier"),
        ],
    },
];

pub static TABLE_RELATIONSHIPS: &[TableRelationship] = &[
    TableRelationship {
        from_table: PHARMACY_CLAIMS,
        to_table: PROVIDERS,
        join_condition: "toString(prov.type_1_npi) = p.PRESCRIBER_NPI_NBR",
    },
    TableRelationship {
        from_table: PROVIDERS,
        to_table: PAYMENTS,
        join_condition: "prov.type_1_npi = pay.type_1_npi",
    },
    TableRelationship {
        from_table: PROVIDERS,
        to_table: REFERRALS,
        join_condition: "prov.type_1_npi = r.primary_type_1_npi",
    },
    TableRelationship {
        from_table: KOL_PROVIDERS,
        to_table: KOL_SCORES,
        join_condition: "k.npi = s.mf_providers_npi",
    },
    TableRelationship {
        from_table: KOL_SCORES,
        to_table: CONDITIONS,
        join_condition: "s.mf_conditions_projectId = c.projectId",
    },
];

pub const KNOWN_DRUGS: &[&str] = &[
    "JARDIANCE", "EYLEA HD", "Humira", "Keytruda", "Ozempic", "Mounjaro",
    "Wegovy", "Rybelsus", "Trulicity", "Victoza", "Lantus", "Humalog",
    "Novolog", "Levemir", "Tresiba", "Basaglar", "Lyrica", "Gabapentin",
    "Atorvastatin", "Rosuvastatin", "Simvastatin", "Metformin",
];

pub const KNOWN_PROCEDURES: &[&str] = &[
    "laparoscopic", "knee arthroplasty", "hip replacement", "coronary angioplasty",
    "cataract surgery", "colonoscopy", "endoscopy", "cardiac catheterization",
    "appendectomy", "cholecystectomy", "hernia repair", "tonsillectomy",
];

pub const KNOWN_PAYMENT_TYPES: &[&str] = &[
    "Food and Beverage", "Travel and Lodging", "Education", "Research",
    "Consulting Fee", "Speaker Fee", "Grant", "Honoraria", "Gift",
];

pub const KNOWN_CONDITIONS: &[&str] = &[
    "diabetes", "hypertension", "heart disease", "cancer", "obesity",
    "depression", "anxiety", "arthritis", "asthma", "COPD",
];

pub const KNOWN_SPECIALTIES: &[&str] = &[
    "cardiology", "oncology", "endocrinology", "neurology", "psychiatry",
    "orthopedics", "dermatology", "gastroenterology", "pulmonology",
    "rheumatology", "urology", "ophthalmology", "otolaryngology",
];

pub const KNOWN_COMPANIES: &[&str] = &[
    "Pfizer", "Johnson & Johnson", "Roche", "Novartis", "Merck",
    "AbbVie", "Bristol Myers Squibb", "Amgen", "Gilead", "Eli Lilly",
];

pub const KNOWN_GENDERS: &[&str] = &["M", "F", "O", "U"];

/// Facility phrases; stored with this spelling when matched
pub const FACILITY_TERMS: &[&str] = &[
    "ambulatory surgical center", "medical center", "health system",
    "hospital", "clinic", "ASC",
];

/// (term in query, stored provider role)
pub const PROVIDER_TERMS: &[(&str, &str)] = &[
    ("prescribers", "prescriber"),
    ("prescriber", "prescriber"),
    ("physicians", "physician"),
    ("physician", "physician"),
    ("doctors", "doctor"),
    ("doctor", "doctor"),
    ("surgeons", "surgeon"),
    ("surgeon", "surgeon"),
    ("clinicians", "clinician"),
    ("clinician", "clinician"),
    ("providers", "provider"),
    ("provider", "provider"),
    ("hcps", "hcp"),
    ("hcp", "hcp"),
];

pub const PATIENT_TERMS: &[&str] = &["patients", "patient", "members", "member", "individuals", "individual"];

/// (trigger word, specialty) pairs for practitioner titles and related vocabulary
pub const SPECIALTY_SYNONYMS: &[(&str, &str)] = &[
    ("cardiologist", "cardiology"),
    ("cardiac", "cardiology"),
    ("heart", "cardiology"),
    ("oncologist", "oncology"),
    ("cancer", "oncology"),
    ("endocrinologist", "endocrinology"),
    ("diabetes", "endocrinology"),
    ("hormone", "endocrinology"),
    ("neurologist", "neurology"),
    ("psychiatrist", "psychiatry"),
    ("orthopedic", "orthopedics"),
    ("dermatologist", "dermatology"),
    ("gastroenterologist", "gastroenterology"),
    ("pulmonologist", "pulmonology"),
    ("rheumatologist", "rheumatology"),
    ("urologist", "urology"),
    ("ophthalmologist", "ophthalmology"),
    ("otolaryngologist", "otolaryngology"),
];

/// (full name, postal code)
pub const US_STATES: &[(&str, &str)] = &[
    ("Alabama", "AL"), ("Alaska", "AK"), ("Arizona", "AZ"), ("Arkansas", "AR"),
    ("California", "CA"), ("Colorado", "CO"), ("Connecticut", "CT"), ("Delaware", "DE"),
    ("District of Columbia", "DC"), ("Florida", "FL"), ("Georgia", "GA"), ("Hawaii", "HI"),
    ("Idaho", "ID"), ("Illinois", "IL"), ("Indiana", "IN"), ("Iowa", "IA"),
    ("Kansas", "KS"), ("Kentucky", "KY"), ("Louisiana", "LA"), ("Maine", "ME"),
    ("Maryland", "MD"), ("Massachusetts", "MA"), ("Michigan", "MI"), ("Minnesota", "MN"),
    ("Mississippi", "MS"), ("Missouri", "MO"), ("Montana", "MT"), ("Nebraska", "NE"),
    ("Nevada", "NV"), ("New Hampshire", "NH"), ("New Jersey", "NJ"), ("New Mexico", "NM"),
    ("New York", "NY"), ("North Carolina", "NC"), ("North Dakota", "ND"), ("Ohio", "OH"),
    ("Oklahoma", "OK"), ("Oregon", "OR"), ("Pennsylvania", "PA"), ("Rhode Island", "RI"),
    ("South Carolina", "SC"), ("South Dakota", "SD"), ("Tennessee", "TN"), ("Texas", "TX"),
    ("Utah", "UT"), ("Vermont", "VT"), ("Virginia", "VA"), ("Washington", "WA"),
    ("West Virginia", "WV"), ("Wisconsin", "WI"), ("Wyoming", "WY"),
];

/// General healthcare vocabulary expansions used to enrich generation prompts
pub const HEALTHCARE_SYNONYMS: &[(&str, &[&str])] = &[
    ("doctor", &["physician", "provider", "prescriber", "clinician"]),
    ("medicine", &["drug", "medication", "pharmaceutical", "prescription"]),
    ("hospital", &["medical center", "health system", "clinic", "facility"]),
    ("treatment", &["therapy", "procedure", "intervention", "care"]),
    ("disease", &["condition", "illness", "disorder", "diagnosis"]),
    ("payment", &["reimbursement", "compensation", "fee", "amount"]),
];

/// Candidate schema columns an entity type may bind to
pub fn candidate_columns(entity_type: EntityType) -> &'static [&'static str] {
    match entity_type {
        EntityType::Drug => &["NDC_PREFERRED_BRAND_NM", "NDC_DRUG_NM", "NDC_GENERIC_NM", "NDC_DESC", "product_name"],
        EntityType::State => &["PRESCRIBER_NPI_STATE_CD", "states[1]", "primary_type_2_npi_state", "referring_type_2_npi_state"],
        EntityType::Specialty => &["specialties[1]", "primary_specialty", "referring_specialty"],
        EntityType::Procedure => &["procedure_code_description", "procedure_code", "diagnosis_code_description", "diagnosis_code"],
        EntityType::Year => &["year", "SERVICE_DATE_DD", "date", "RX_ANCHOR_DD"],
        EntityType::Company => &["life_science_firm_name", "primaryOrgName", "PAYER_COMPANY_NM"],
        EntityType::Facility => &["primary_hospital_name", "referring_hospital_name", "hospital_names[1]", "best_hospital_name"],
        EntityType::Provider => &["PRESCRIBER_NPI_NM", "PRESCRIBER_NPI_NBR", "first_name", "last_name", "displayName", "name"],
        EntityType::Condition => &["conditions", "display", "diagnosis_code_description", "DIAGNOSIS_CD"],
        EntityType::PaymentType => &["nature_of_payment", "amount", "TOTAL_PAID_AMT", "GROSS_DUE_AMT"],
        EntityType::Patient => &["PATIENT_ID"],
        EntityType::Number => &[],
    }
}

/// Known values for the entity types backed by a fixed vocabulary
pub fn known_values(entity_type: EntityType) -> &'static [&'static str] {
    match entity_type {
        EntityType::Drug => KNOWN_DRUGS,
        EntityType::Procedure => KNOWN_PROCEDURES,
        EntityType::PaymentType => KNOWN_PAYMENT_TYPES,
        EntityType::Condition => KNOWN_CONDITIONS,
        EntityType::Specialty => KNOWN_SPECIALTIES,
        EntityType::Company => KNOWN_COMPANIES,
        EntityType::Facility => FACILITY_TERMS,
        _ => &[],
    }
}

pub fn is_state_code(token: &str) -> bool {
    US_STATES.iter().any(|(_, code)| *code == token)
}

pub fn is_known_state(value: &str) -> bool {
    US_STATES
        .iter()
        .any(|(name, code)| name.eq_ignore_ascii_case(value) || *code == value)
}

pub fn table(name: &str) -> Option<&'static TableSchema> {
    SCHEMA.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

/// Finds the first table declaring the column (array index suffixes are ignored)
pub fn find_column(name: &str) -> Option<(&'static TableSchema, &'static ColumnDef)> {
    let bare = name.split('[').next().unwrap_or(name);
    SCHEMA.iter().find_map(|t| {
        t.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(bare))
            .map(|c| (t, c))
    })
}

/// Related vocabulary for terms mentioned in the query
pub fn expand_synonyms(query: &str) -> Vec<&'static str> {
    let query_lower = query.to_lowercase();
    HEALTHCARE_SYNONYMS
        .iter()
        .filter(|(term, _)| query_lower.contains(term))
        .flat_map(|(_, synonyms)| synonyms.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_relationship_references_known_tables() {
        for rel in TABLE_RELATIONSHIPS {
            assert!(table(rel.from_table).is_some(), "{}", rel.from_table);
            assert!(table(rel.to_table).is_some(), "{}", rel.to_table);
        }
    }

    #[test]
    fn test_find_column_strips_array_index() {
        let (table, column) = find_column("states[1]").unwrap();
        assert_eq!(table.name, PROVIDERS);
        assert!(column.data_type.starts_with("Array"));
    }

    #[test]
    fn test_state_lookup() {
        assert!(is_state_code("NY"));
        assert!(!is_state_code("ny"));
        assert!(is_known_state("new york"));
        assert!(!is_known_state("Ontario"));
    }

    #[test]
    fn test_expand_synonyms() {
        let expanded = expand_synonyms("Which doctor received the largest payment?");
        assert!(expanded.contains(&"physician"));
        assert!(expanded.contains(&"reimbursement"));
        assert!(expand_synonyms("unrelated text").is_empty());
    }
}
