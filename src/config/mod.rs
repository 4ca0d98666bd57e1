//! Configuration management
//!
//! Loads the TOML configuration, applies profile and environment overrides,
//! and validates the result before any session is started.

use crate::error::{Result, SimPatientError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Learner-facing text for a conversation that is no longer active
pub const DEFAULT_EXPIRED_MESSAGE: &str =
    "This conversation has expired. Please start a new conversation.";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub scoring: ScoringConfig,
    pub dialog: DialogConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Which embedding backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic feature hashing, no model download
    Hashing,
    /// FastEmbed ONNX sentence model
    FastEmbed,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hashing" => Ok(ProviderKind::Hashing),
            "fastembed" => Ok(ProviderKind::FastEmbed),
            other => Err(format!(
                "Provider must be 'hashing' or 'fastembed', got '{}'",
                other
            )),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    /// Upper bound for one embedding job, e.g. "10s" or "500ms"
    pub timeout: String,
}

impl EmbeddingConfig {
    pub fn timeout_duration(&self) -> Result<Duration> {
        parse_duration(&self.timeout).ok_or_else(|| SimPatientError::InvalidConfigValue {
            path: "embedding.timeout".to_string(),
            message: format!("Invalid duration format: {}", self.timeout),
        })
    }
}

/// Question retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum similarity for a learner question to count as a script match
    pub match_threshold: f32,
}

/// Rubric scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Minimum similarity for an answer to earn a criterion's score
    pub acceptance_threshold: f32,
    /// Score awarded when no criterion is accepted
    pub minimum_score: f64,
}

/// How the patient chooses its next line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogMode {
    /// Walk the script in order regardless of input
    Sequential,
    /// Answer whichever scripted question the learner asked
    Retrieval,
}

impl std::str::FromStr for DialogMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(DialogMode::Sequential),
            "retrieval" => Ok(DialogMode::Retrieval),
            other => Err(format!(
                "Mode must be 'sequential' or 'retrieval', got '{}'",
                other
            )),
        }
    }
}

/// Dialog configuration and fallback utterances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogConfig {
    pub mode: DialogMode,
    /// Said once the sequential script has run out
    pub exhausted_message: String,
    /// Said when no scripted question is close enough
    pub clarification_message: String,
    /// Said when a matched question has no scripted answer
    pub apology_message: String,
}

/// Conversation lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shown when a learner writes to a conversation that has ended
    pub expired_message: String,
    /// How many ended conversation ids are remembered and refused on restart.
    /// Older ids are forgotten first and may then be started again.
    pub ended_retention: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expired_message: DEFAULT_EXPIRED_MESSAGE.to_string(),
            ended_retention: 10_000,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialog_mode: Option<DialogMode>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SimPatientError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SimPatientError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| SimPatientError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| SimPatientError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(threshold) = overrides.match_threshold {
            self.retrieval.match_threshold = threshold;
        }
        if let Some(threshold) = overrides.acceptance_threshold {
            self.scoring.acceptance_threshold = threshold;
        }
        if let Some(floor) = overrides.minimum_score {
            self.scoring.minimum_score = floor;
        }
        if let Some(mode) = overrides.dialog_mode {
            self.dialog.mode = mode;
        }

        tracing::debug!("Applied profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: SIMPATIENT_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(std::env::vars());
    }

    /// Apply overrides from `(name, value)` pairs in environment-variable form
    pub fn apply_overrides_from<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("SIMPATIENT_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let invalid = |message: String| SimPatientError::InvalidConfigValue {
            path: path.to_string(),
            message,
        };

        match path {
            "EMBEDDING__PROVIDER" => {
                self.embedding.provider = value.parse().map_err(invalid)?;
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__TIMEOUT" => {
                self.embedding.timeout = value.to_string();
            }
            "RETRIEVAL__MATCH_THRESHOLD" => {
                self.retrieval.match_threshold = value
                    .parse()
                    .map_err(|_| invalid(format!("Cannot parse '{}' as number", value)))?;
            }
            "SCORING__ACCEPTANCE_THRESHOLD" => {
                self.scoring.acceptance_threshold = value
                    .parse()
                    .map_err(|_| invalid(format!("Cannot parse '{}' as number", value)))?;
            }
            "SCORING__MINIMUM_SCORE" => {
                self.scoring.minimum_score = value
                    .parse()
                    .map_err(|_| invalid(format!("Cannot parse '{}' as number", value)))?;
            }
            "DIALOG__MODE" => {
                self.dialog.mode = value.parse().map_err(invalid)?;
            }
            "SESSION__EXPIRED_MESSAGE" => {
                self.session.expired_message = value.to_string();
            }
            "SESSION__ENDED_RETENTION" => {
                self.session.ended_retention = value
                    .parse()
                    .map_err(|_| invalid(format!("Cannot parse '{}' as integer", value)))?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            SimPatientError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("simpatient").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            embedding: EmbeddingConfig {
                provider: ProviderKind::Hashing,
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                batch_size: 32,
                timeout: "10s".to_string(),
            },
            retrieval: RetrievalConfig {
                match_threshold: 0.6,
            },
            scoring: ScoringConfig {
                acceptance_threshold: 0.6,
                minimum_score: 0.0,
            },
            dialog: DialogConfig {
                mode: DialogMode::Retrieval,
                exhausted_message: "The conversation has ended.".to_string(),
                clarification_message:
                    "I don't quite understand what you mean. Could you ask another way?"
                        .to_string(),
                apology_message: "Sorry, I don't know how to answer that question.".to_string(),
            },
            session: SessionConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

/// Parse durations like "500ms", "10s", "2m", "1h"; bare digits are seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit_ms): (&str, u64) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = digits.trim().parse().ok()?;
    Some(Duration::from_millis(value.checked_mul(unit_ms)?))
}
