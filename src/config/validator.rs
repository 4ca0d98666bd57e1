use crate::config::{parse_duration, Config, ProviderKind, SCHEMA_VERSION};
use crate::error::{Result, SimPatientError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_thresholds(config, &mut errors);
        Self::validate_messages(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SimPatientError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if embedding.provider == ProviderKind::FastEmbed && embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        match parse_duration(&embedding.timeout) {
            Some(d) if d.is_zero() => errors.push(ValidationError::new(
                "embedding.timeout",
                "Timeout must be greater than 0",
            )),
            Some(_) => {}
            None => errors.push(ValidationError::new(
                "embedding.timeout",
                format!("Invalid duration format: {}", embedding.timeout),
            )),
        }
    }

    fn validate_thresholds(config: &Config, errors: &mut Vec<ValidationError>) {
        let thresholds = [
            ("retrieval.match_threshold", config.retrieval.match_threshold),
            (
                "scoring.acceptance_threshold",
                config.scoring.acceptance_threshold,
            ),
        ];

        for (path, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ValidationError::new(
                    path,
                    format!("Threshold must be between 0.0 and 1.0, got {}", value),
                ));
            }
        }

        if !config.scoring.minimum_score.is_finite() {
            errors.push(ValidationError::new(
                "scoring.minimum_score",
                "Minimum score must be a finite number",
            ));
        }
    }

    fn validate_messages(config: &Config, errors: &mut Vec<ValidationError>) {
        let messages = [
            ("dialog.exhausted_message", &config.dialog.exhausted_message),
            (
                "dialog.clarification_message",
                &config.dialog.clarification_message,
            ),
            ("dialog.apology_message", &config.dialog.apology_message),
            ("session.expired_message", &config.session.expired_message),
        ];

        for (path, message) in messages {
            if message.trim().is_empty() {
                errors.push(ValidationError::new(path, "Message cannot be empty"));
            }
        }
    }
}
