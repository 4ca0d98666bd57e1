/// Exact cosine-similarity index over a small corpus
use ndarray::{Array1, Array2, ArrayView1};
use std::cmp::Ordering;

use super::EmbeddingError;

/// Search hit with the matched text and its similarity score
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Original text of the matched entry
    pub text: String,
    /// Insertion position of the matched entry
    pub position: usize,
    /// Cosine similarity (0.0 to 1.0 for non-negative embeddings)
    pub score: f32,
}

/// Immutable similarity index
///
/// Rows are L2-normalized at build time so a query is scored with a single
/// matrix-vector product. Per-session corpora are a few dozen entries, where
/// brute force is exact and cheaper than maintaining a graph index.
#[derive(Debug)]
pub struct SimilarityIndex {
    name: String,
    texts: Vec<String>,
    matrix: Array2<f32>,
}

impl SimilarityIndex {
    /// Build an index from texts and their embeddings (same order).
    ///
    /// Callers guarantee `texts` is non-empty.
    pub fn from_embeddings(
        name: impl Into<String>,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, EmbeddingError> {
        if texts.len() != embeddings.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        let mut matrix = Array2::<f32>::zeros((embeddings.len(), dimension));

        for (i, embedding) in embeddings.iter().enumerate() {
            if embedding.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
            let mut row = matrix.row_mut(i);
            row.assign(&ArrayView1::from(embedding.as_slice()));
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|v| v / norm);
            }
        }

        Ok(Self {
            name: name.into(),
            texts,
            matrix,
        })
    }

    /// Rank every entry against `query` and keep the `top_k` best.
    ///
    /// Results are in descending score order; equal scores keep insertion
    /// order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, EmbeddingError> {
        if query.len() != self.dimension() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query = Array1::from(query.to_vec());
        let norm = query.dot(&query).sqrt();
        let scores = if norm > 0.0 {
            self.matrix.dot(&query) / norm
        } else {
            Array1::zeros(self.texts.len())
        };

        let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        ranked.truncate(top_k);

        Ok(ranked
            .into_iter()
            .map(|(position, score)| SearchHit {
                text: self.texts[position].clone(),
                position,
                score,
            })
            .collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }
}
