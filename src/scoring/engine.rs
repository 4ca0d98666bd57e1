/// Rubric scoring of free-text answers by semantic similarity
use super::Rubric;
use crate::config::ScoringConfig;
use crate::embedding::{EmbeddingProvider, VectorStore};
use crate::error::{Result, SimPatientError};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Acceptance policy for rubric matches
#[derive(Debug, Clone, Copy)]
pub struct ScoreSettings {
    /// Similarity at or above which the best criterion counts
    pub acceptance_threshold: f32,
    /// Score given when nothing is accepted
    pub minimum_score: f64,
}

impl From<&ScoringConfig> for ScoreSettings {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            acceptance_threshold: config.acceptance_threshold,
            minimum_score: config.minimum_score,
        }
    }
}

/// Grade for one learner answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub score: f64,
    /// Raw similarity of the closest criterion
    pub similarity: f32,
    /// Label of the accepted criterion, if any
    pub matched_criterion: Option<String>,
    /// Label of the closest criterion, accepted or not
    pub nearest_criterion: Option<String>,
}

impl Assessment {
    /// Feedback line attached to the learner's message
    pub fn feedback(&self) -> String {
        let mut feedback = format!("Similarity: {:.2}", self.similarity);
        if let Some(label) = &self.matched_criterion {
            feedback.push_str(&format!("\nMatched: {}", label));
        }
        feedback
    }

    pub fn is_accepted(&self) -> bool {
        self.matched_criterion.is_some()
    }
}

/// Per-key rubric store and grader
///
/// Each session key owns one rubric and a similarity index over its reference
/// texts. Loading a key again replaces both.
pub struct ScoreEngine {
    store: VectorStore,
    rubrics: AHashMap<String, Arc<Rubric>>,
    settings: ScoreSettings,
}

impl ScoreEngine {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: ScoreSettings) -> Self {
        Self {
            store: VectorStore::new(provider),
            rubrics: AHashMap::new(),
            settings,
        }
    }

    /// Index `rubric` under `session_key`, replacing any earlier rubric
    pub fn load(&mut self, session_key: &str, rubric: Rubric) -> Result<()> {
        self.store.build(session_key, rubric.reference_texts())?;
        if self
            .rubrics
            .insert(session_key.to_string(), Arc::new(rubric))
            .is_some()
        {
            tracing::debug!("Replaced rubric for '{}'", session_key);
        }
        Ok(())
    }

    /// Drop the rubric for `session_key`; false if none was loaded
    pub fn unload(&mut self, session_key: &str) -> bool {
        self.store.remove(session_key);
        self.rubrics.remove(session_key).is_some()
    }

    /// Grade `text` against the rubric loaded for `session_key`
    pub fn score(&self, text: &str, session_key: &str) -> Result<Assessment> {
        self.rubric(session_key)?;
        let query = self.store.provider().embed(text)?;
        self.score_vector(&query, session_key)
    }

    /// Grade an answer that has already been embedded
    pub fn score_vector(&self, query: &[f32], session_key: &str) -> Result<Assessment> {
        let rubric = self.rubric(session_key)?;
        let best = self.store.search_vector(session_key, query, 1)?.into_iter().next();

        let Some(hit) = best else {
            return Ok(self.unmatched(0.0, None));
        };

        let criterion = rubric.get(hit.position);
        let nearest = criterion.map(|c| c.display_label().to_string());

        match criterion {
            Some(c) if hit.score >= self.settings.acceptance_threshold => Ok(Assessment {
                score: c.score,
                similarity: hit.score,
                matched_criterion: nearest.clone(),
                nearest_criterion: nearest,
            }),
            _ => Ok(self.unmatched(hit.score, nearest)),
        }
    }

    fn unmatched(&self, similarity: f32, nearest: Option<String>) -> Assessment {
        Assessment {
            score: self.settings.minimum_score,
            similarity,
            matched_criterion: None,
            nearest_criterion: nearest,
        }
    }

    pub fn rubric(&self, session_key: &str) -> Result<Arc<Rubric>> {
        self.rubrics
            .get(session_key)
            .cloned()
            .ok_or_else(|| SimPatientError::UnknownSession {
                key: session_key.to_string(),
            })
    }

    /// Best attainable per-answer score for `session_key`
    pub fn max_score(&self, session_key: &str) -> Result<f64> {
        Ok(self.rubric(session_key)?.max_score())
    }
}
