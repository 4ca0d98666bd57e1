//! Virtual patient definitions
//!
//! A patient bundles a dialog script and a scoring rubric. Both are authored
//! as JSON files and loaded together.

use crate::dialog::Script;
use crate::error::{Result, SimPatientError};
use crate::scoring::Rubric;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One virtual patient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "dialog_json")]
    pub dialog: Script,
    #[serde(alias = "scoring_json")]
    pub scoring: Rubric,
}

impl PatientProfile {
    pub fn new(name: impl Into<String>, dialog: Script, scoring: Rubric) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            dialog,
            scoring,
        }
    }

    /// Load from separate dialog and scoring JSON files
    pub fn from_files(name: impl Into<String>, dialog_path: &Path, scoring_path: &Path) -> Result<Self> {
        let dialog = Script::from_json(&read_file(dialog_path)?)?;
        let scoring = Rubric::from_json(&read_file(scoring_path)?)?;

        let profile = Self::new(name, dialog, scoring);
        tracing::info!(
            "Loaded patient '{}': {} script entries, {} rubric criteria",
            profile.name,
            profile.dialog.len(),
            profile.scoring.len()
        );
        Ok(profile)
    }

    /// Load a single JSON document holding name, description, dialog and scoring
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = read_file(path)?;
        serde_json::from_str(&content).map_err(|e| SimPatientError::Json {
            source: e,
            context: format!("Failed to parse patient file: {}", path.display()),
        })
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| SimPatientError::Io {
        source: e,
        context: format!("Failed to read {}", path.display()),
    })
}
