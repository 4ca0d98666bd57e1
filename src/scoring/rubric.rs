use crate::error::{Result, SimPatientError};
use serde::{Deserialize, Serialize};

/// One gradable point of a rubric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Model answer the learner's text is compared against
    #[serde(alias = "text")]
    pub reference_text: String,
    /// Points awarded when this criterion is matched
    #[serde(alias = "weight")]
    pub score: f64,
    /// Short name shown in feedback; defaults to the reference text
    #[serde(default)]
    pub label: String,
}

impl Criterion {
    pub fn new(reference_text: impl Into<String>, label: impl Into<String>, score: f64) -> Self {
        Self {
            reference_text: reference_text.into(),
            score,
            label: label.into(),
        }
    }

    /// Label for display, falling back to the reference text
    pub fn display_label(&self) -> &str {
        if self.label.trim().is_empty() {
            &self.reference_text
        } else {
            &self.label
        }
    }
}

/// Ordered scoring rubric for one patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rubric {
    criteria: Vec<Criterion>,
}

impl Rubric {
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    /// Parse a scoring JSON document: an array of criteria
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SimPatientError::Json {
            source: e,
            context: "Failed to parse scoring rubric".to_string(),
        })
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn get(&self, index: usize) -> Option<&Criterion> {
        self.criteria.get(index)
    }

    pub fn reference_texts(&self) -> Vec<String> {
        self.criteria
            .iter()
            .map(|c| c.reference_text.clone())
            .collect()
    }

    /// Best score a single answer can earn
    pub fn max_score(&self) -> f64 {
        self.criteria
            .iter()
            .map(|c| c.score)
            .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}
