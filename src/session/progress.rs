use super::SessionSummary;
use crate::error::{Result, SimPatientError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Running record of a learner's results with one patient
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningProgress {
    pub total_conversations: u32,
    /// Sum of per-conversation average scores
    pub total_score: f64,
    pub average_score: f64,
    pub last_conversation_at: Option<DateTime<Utc>>,
}

impl LearningProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished conversation into the running totals
    pub fn record(&mut self, summary: &SessionSummary) {
        self.total_conversations += 1;
        self.total_score += summary.average_score;
        self.average_score = self.total_score / self.total_conversations as f64;
        self.last_conversation_at = Some(summary.ended_at);
    }
}

/// Progress per patient, persisted as JSON between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressLog {
    /// Keyed by patient name; sorted so the file diffs cleanly
    #[serde(default)]
    pub patients: BTreeMap<String, LearningProgress>,
}

impl ProgressLog {
    /// Load the log at `path`; a missing file is an empty log
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| SimPatientError::Io {
            source: e,
            context: format!("Failed to read progress file: {:?}", path),
        })?;
        serde_json::from_str(&content).map_err(|e| SimPatientError::Json {
            source: e,
            context: format!("Failed to parse progress file: {:?}", path),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SimPatientError::Io {
                source: e,
                context: format!("Failed to create progress directory: {:?}", parent),
            })?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|e| SimPatientError::Json {
            source: e,
            context: "Failed to serialize progress".to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| SimPatientError::Io {
            source: e,
            context: format!("Failed to write progress file: {:?}", path),
        })
    }

    /// Fold `summary` into `patient`'s record and return the updated record
    pub fn record(&mut self, patient: &str, summary: &SessionSummary) -> &LearningProgress {
        let progress = self.patients.entry(patient.to_string()).or_default();
        progress.record(summary);
        progress
    }

    pub fn get(&self, patient: &str) -> Option<&LearningProgress> {
        self.patients.get(patient)
    }
}
