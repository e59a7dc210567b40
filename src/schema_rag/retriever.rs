//! Context Retriever
//!
//! Builds an enhanced query from the user question, its intent and the HyDE
//! examples, then asks a vector index for the closest schema documents.
//! Retrieval never fails outward: any problem yields an empty context.

use crate::error::Result;
use crate::intent::IntentAnalysis;
use crate::schema_rag::embedder::{schema_documents, TextEmbedder};
use crate::schema_rag::vector_store::{InMemoryVectorStore, SearchResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// At most this many HyDE examples are folded into the enhanced query
pub const MAX_HYDE_IN_QUERY: usize = 2;

/// Text-in, ranked-documents-out similarity search
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, text: &str, top_k: usize) -> Result<Vec<SearchResult>>;
}

/// Knowledge-base schema embedded into an in-memory store
pub struct SchemaIndex {
    store: InMemoryVectorStore,
    embedder: Arc<dyn TextEmbedder>,
}

impl SchemaIndex {
    /// Embeds every schema document; fails if the embedder does
    pub async fn build(embedder: Arc<dyn TextEmbedder>) -> Result<Self> {
        let mut store = InMemoryVectorStore::new(embedder.dimension());
        for mut doc in schema_documents() {
            doc.embedding = Some(embedder.embed_text(&doc.text).await?);
            store.add_document(doc);
        }
        info!("Schema index built with {} documents", store.len());
        Ok(Self { store, embedder })
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl VectorIndex for SchemaIndex {
    async fn search(&self, text: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let embedding = self.embedder.embed_text(text).await?;
        self.store.search(&embedding, top_k)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub documents: Vec<String>,
    pub scores: Vec<f32>,
    pub structured_values: Vec<HashMap<String, String>>,
    pub retrieval_successful: bool,
    pub error: Option<String>,
}

impl RetrievedContext {
    pub fn empty(error: Option<String>) -> Self {
        Self {
            error,
            ..Self::default()
        }
    }

    /// Documents joined for inclusion in a prompt
    pub fn as_prompt_text(&self) -> String {
        self.documents.join("\n")
    }
}

pub struct ContextRetriever {
    index: Option<Arc<dyn VectorIndex>>,
    max_documents: usize,
}

impl ContextRetriever {
    pub fn new(index: Option<Arc<dyn VectorIndex>>, max_documents: usize) -> Self {
        Self {
            index,
            max_documents,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        intent: &IntentAnalysis,
        hyde_examples: &[String],
    ) -> RetrievedContext {
        let index = match &self.index {
            Some(index) => index,
            None => {
                debug!("No vector index configured, returning empty context");
                return RetrievedContext::empty(None);
            }
        };

        let enhanced = enhanced_query(query, intent, hyde_examples);
        match index.search(&enhanced, self.max_documents).await {
            Ok(results) => {
                info!("Retrieved {} context documents", results.len());
                RetrievedContext {
                    retrieval_successful: !results.is_empty(),
                    documents: results.iter().map(|r| r.document.text.clone()).collect(),
                    scores: results.iter().map(|r| r.score).collect(),
                    structured_values: results.into_iter().map(|r| r.document.metadata).collect(),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Context retrieval failed: {}", e);
                RetrievedContext::empty(Some(e.to_string()))
            }
        }
    }
}

/// Query text, an intent line, and up to two HyDE examples
pub fn enhanced_query(query: &str, intent: &IntentAnalysis, hyde_examples: &[String]) -> String {
    let mut enhanced = format!(
        "{}\n\nIntent: {} analysis\nPrimary tables: {}",
        query,
        intent.query_type,
        intent.recommended_tables.join(", ")
    );
    if !hyde_examples.is_empty() {
        enhanced.push_str("\n\nSQL patterns:\n");
        let examples: Vec<&str> = hyde_examples
            .iter()
            .take(MAX_HYDE_IN_QUERY)
            .map(|s| s.as_str())
            .collect();
        enhanced.push_str(&examples.join("\n"));
    }
    enhanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityExtractor;
    use crate::error::CareQueryError;
    use crate::schema_rag::embedder::HashingEmbedder;

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn search(&self, _text: &str, _top_k: usize) -> Result<Vec<SearchResult>> {
            Err(CareQueryError::Retrieval("index offline".to_string()))
        }
    }

    #[test]
    fn test_enhanced_query_limits_examples() {
        let (_, intent) = EntityExtractor::new().extract("Ozempic prescribers");
        let examples = vec!["SELECT 1;".to_string(), "SELECT 2;".to_string(), "SELECT 3;".to_string()];
        let enhanced = enhanced_query("Ozempic prescribers", &intent, &examples);
        assert!(enhanced.starts_with("Ozempic prescribers\n\nIntent: prescription_analysis analysis"));
        assert!(enhanced.contains("SELECT 2;"));
        assert!(!enhanced.contains("SELECT 3;"));
    }

    #[tokio::test]
    async fn test_missing_or_failing_index_yields_empty_context() {
        let intent = IntentAnalysis::fallback();

        let none = ContextRetriever::new(None, 5).retrieve("q", &intent, &[]).await;
        assert!(none.documents.is_empty());
        assert!(!none.retrieval_successful);

        let failing = ContextRetriever::new(Some(Arc::new(FailingIndex)), 5)
            .retrieve("q", &intent, &[])
            .await;
        assert!(failing.documents.is_empty());
        assert!(failing.error.unwrap().contains("index offline"));
    }

    #[tokio::test]
    async fn test_schema_index_returns_payment_documents() {
        let index = SchemaIndex::build(Arc::new(HashingEmbedder::new(256))).await.unwrap();
        assert!(!index.is_empty());

        let retriever = ContextRetriever::new(Some(Arc::new(index)), 5);
        let (_, intent) = EntityExtractor::new().extract("total payment amount by life science firm");
        let context = retriever
            .retrieve("total payment amount by life science firm", &intent, &[])
            .await;
        assert_eq!(context.documents.len(), 5);
        assert_eq!(context.scores.len(), context.structured_values.len());
        assert!(context.retrieval_successful);
        assert!(context.documents.iter().any(|d| d.contains("as_lsf_v1")));
    }
}
