//! Vector Store
//!
//! In-memory cosine-similarity store over schema documents. The schema is
//! small (tens of documents), so search is a linear scan.

use crate::error::{CareQueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Document in the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    #[serde(skip)]
    pub embedding: Option<Embedding>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: HashMap::new(),
            embedding: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
}

pub struct InMemoryVectorStore {
    /// Insertion order is kept so equal scores rank deterministically
    documents: Vec<Document>,
    dimension: usize,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            documents: Vec::new(),
            dimension,
        }
    }

    /// Documents without an embedding of the store's dimension are skipped
    pub fn add_document(&mut self, document: Document) {
        match &document.embedding {
            Some(embedding) if embedding.len() == self.dimension => {
                self.documents.push(document);
            }
            Some(embedding) => {
                warn!(
                    "Embedding dimension {} doesn't match store dimension {}, skipping {}",
                    embedding.len(),
                    self.dimension,
                    document.id
                );
            }
            None => warn!("Document {} has no embedding, skipping", document.id),
        }
    }

    pub fn add_documents(&mut self, documents: Vec<Document>) {
        for doc in documents {
            self.add_document(doc);
        }
    }

    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if self.documents.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        if query_embedding.len() != self.dimension {
            return Err(CareQueryError::Retrieval(format!(
                "Query embedding dimension {} doesn't match store dimension {}",
                query_embedding.len(),
                self.dimension
            )));
        }

        let mut results: Vec<SearchResult> = self
            .documents
            .iter()
            .filter_map(|doc| {
                doc.embedding.as_ref().map(|embedding| SearchResult {
                    document: doc.clone(),
                    score: cosine_similarity(query_embedding, embedding),
                })
            })
            .collect();

        // Stable sort keeps insertion order among ties
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
