//! Schema Embedder
//!
//! Turns knowledge-base tables, columns and relationships into searchable
//! documents, and embeds text either locally (feature hashing) or through an
//! OpenAI-compatible embeddings endpoint.

use crate::config::RetrievalConfig;
use crate::error::{CareQueryError, Result};
use crate::knowledge_base::{ColumnDef, TableRelationship, TableSchema, SCHEMA, TABLE_RELATIONSHIPS};
use crate::schema_rag::vector_store::{Document, Embedding};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed_text(&self, text: &str) -> Result<Embedding>;
}

/// Deterministic bag-of-words embedding via FNV-1a feature hashing
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl TextEmbedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_text(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed(text))
    }
}

/// Lowercased alphanumeric tokens; snake_case identifiers also yield their parts
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        if word.contains('_') {
            tokens.extend(
                word.split('_')
                    .filter(|p| p.len() > 1)
                    .map(|p| p.to_string()),
            );
        }
        tokens.push(word);
    }
    tokens
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints
pub struct HttpEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(api_key: String, base_url: String, model: String, dimension: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CareQueryError::Retrieval(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimension,
        })
    }

    /// `Ok(None)` without an API key
    pub fn from_config(config: &RetrievalConfig) -> Result<Option<Self>> {
        match config.embedding_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(Some(Self::new(
                key.to_string(),
                config.embedding_base_url.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
            )?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl TextEmbedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_text(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(&format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CareQueryError::Retrieval(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CareQueryError::Retrieval(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            CareQueryError::Retrieval(format!("Failed to parse embedding response: {}", e))
        })?;

        let data = response_json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|arr| arr.first())
            .ok_or_else(|| CareQueryError::Retrieval("No embedding data in response".to_string()))?;

        let embedding: Vec<f32> = data
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| CareQueryError::Retrieval("No embedding vector in response".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if embedding.len() != self.dimension {
            return Err(CareQueryError::Retrieval(format!(
                "Embedding has {} dimensions, expected {}",
                embedding.len(),
                self.dimension
            )));
        }
        Ok(embedding)
    }
}

fn table_to_document(table: &TableSchema) -> Document {
    let columns: Vec<&str> = table.columns.iter().map(|c| c.name).collect();
    let text = format!(
        "Table: {}. Description: {}. Columns: {}",
        table.name,
        table.description,
        columns.join(", ")
    );
    Document::new(format!("table:{}", table.name), text)
        .with_metadata("kind", "table")
        .with_metadata("table", table.name)
}

fn column_to_document(table: &TableSchema, column: &ColumnDef) -> Document {
    let text = format!(
        "Column: {}.{}. Description: {}. Type: {}",
        table.name, column.name, column.comment, column.data_type
    );
    Document::new(format!("column:{}.{}", table.name, column.name), text)
        .with_metadata("kind", "column")
        .with_metadata("table", table.name)
        .with_metadata("column", column.name)
        .with_metadata("data_type", column.data_type)
}

fn relationship_to_document(rel: &TableRelationship) -> Document {
    let text = format!(
        "Join {} with {} on {}",
        rel.from_table, rel.to_table, rel.join_condition
    );
    Document::new(format!("join:{}:{}", rel.from_table, rel.to_table), text)
        .with_metadata("kind", "relationship")
        .with_metadata("from_table", rel.from_table)
        .with_metadata("to_table", rel.to_table)
        .with_metadata("join_condition", rel.join_condition)
}

/// One document per table, per column and per relationship, without embeddings
pub fn schema_documents() -> Vec<Document> {
    let mut documents = Vec::new();
    for table in SCHEMA {
        documents.push(table_to_document(table));
        for column in table.columns {
            documents.push(column_to_document(table, column));
        }
    }
    documents.extend(TABLE_RELATIONSHIPS.iter().map(relationship_to_document));
    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_rag::vector_store::cosine_similarity;

    #[test]
    fn test_http_embedder_uses_configured_dimension() {
        let config = RetrievalConfig {
            embedding_api_key: Some("key".to_string()),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimensions: 768,
            ..RetrievalConfig::default()
        };
        let embedder = HttpEmbedder::from_config(&config).unwrap().unwrap();
        assert_eq!(embedder.dimension(), 768);

        let no_key = RetrievalConfig::default();
        assert!(HttpEmbedder::from_config(&no_key).unwrap().is_none());
    }

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Ozempic prescribers in New York");
        let b = embedder.embed("Ozempic prescribers in New York");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(embedder.embed("").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_related_text_scores_higher() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed("payment amount by life science firm");
        let payments = embedder.embed("Column: as_lsf_v1.amount. Description: payment amount");
        let kol = embedder.embed("Column: mf_scores.id. Description: Score identifier");
        assert!(cosine_similarity(&query, &payments) > cosine_similarity(&query, &kol));
    }

    #[test]
    fn test_tokenize_splits_identifiers() {
        let tokens = tokenize("PRESCRIBER_NPI_STATE_CD");
        assert!(tokens.contains(&"prescriber_npi_state_cd".to_string()));
        assert!(tokens.contains(&"state".to_string()));
    }

    #[test]
    fn test_schema_documents_cover_tables_and_joins() {
        let docs = schema_documents();
        let tables = docs.iter().filter(|d| d.metadata["kind"] == "table").count();
        let joins = docs.iter().filter(|d| d.metadata["kind"] == "relationship").count();
        assert_eq!(tables, SCHEMA.len());
        assert_eq!(joins, TABLE_RELATIONSHIPS.len());
    }
}
