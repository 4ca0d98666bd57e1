/// Named collections of similarity indexes sharing one embedding provider
use super::{EmbeddingProvider, SearchHit, SimilarityIndex};
use crate::error::{Result, SimPatientError};
use ahash::AHashMap;
use std::sync::Arc;

/// Vector collection store
///
/// Collections are built once and never mutated afterwards; rebuilding a name
/// swaps in a fresh index.
pub struct VectorStore {
    provider: Arc<dyn EmbeddingProvider>,
    collections: AHashMap<String, Arc<SimilarityIndex>>,
}

impl VectorStore {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            collections: AHashMap::new(),
        }
    }

    /// Embed `texts` and store them as collection `name`
    pub fn build(&mut self, name: &str, texts: Vec<String>) -> Result<Arc<SimilarityIndex>> {
        let index = Arc::new(build_index(self.provider.as_ref(), name, texts)?);
        self.collections
            .insert(index.name().to_string(), index.clone());
        Ok(index)
    }

    /// Embed `query` and return the `top_k` closest entries of collection `name`
    pub fn search(&self, name: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let index = self.collection(name)?;
        let vector = self.provider.embed(query)?;
        Ok(index.search(&vector, top_k)?)
    }

    /// Search with a query vector computed by the caller
    pub fn search_vector(&self, name: &str, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        Ok(self.collection(name)?.search(query, top_k)?)
    }

    pub fn collection(&self, name: &str) -> Result<Arc<SimilarityIndex>> {
        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| SimPatientError::UnknownCollection {
                name: name.to_string(),
            })
    }

    /// Drop collection `name`; false if it was never built
    pub fn remove(&mut self, name: &str) -> bool {
        self.collections.remove(name).is_some()
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }
}

/// Embed a corpus into a standalone index
pub fn build_index(
    provider: &dyn EmbeddingProvider,
    name: &str,
    texts: Vec<String>,
) -> Result<SimilarityIndex> {
    if texts.is_empty() {
        return Err(SimPatientError::EmptyCorpus {
            collection: name.to_string(),
        });
    }

    let embeddings = provider.embed_batch(&texts)?;
    tracing::debug!(
        "Built collection '{}' with {} entries ({})",
        name,
        texts.len(),
        provider.model_name()
    );

    Ok(SimilarityIndex::from_embeddings(name, texts, embeddings)?)
}
