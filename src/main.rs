use simpatient::cli::{Cli, Commands, ConfigAction, PatientArgs};
use simpatient::config::{Config, DialogMode};
use simpatient::embedding::{provider_from_config, EmbeddingProvider};
use simpatient::error::{Result, SimPatientError};
use simpatient::patient::PatientProfile;
use simpatient::scoring::{Rubric, ScoreEngine, ScoreSettings};
use simpatient::session::{ConversationId, LearningProgress, ProgressLog, SessionRegistry};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Practice {
            patient,
            sequential,
        } => {
            cmd_practice(cli.config, cli.profile, patient, sequential)?;
        }
        Commands::Score {
            scoring,
            text,
            json,
        } => {
            cmd_score(cli.config, cli.profile, &scoring, &text, json)?;
        }
        Commands::Validate { patient } => {
            cmd_validate(patient)?;
        }
        Commands::Progress { name } => {
            cmd_progress(cli.config, name)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "simpatient=debug"
    } else {
        "simpatient=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_practice(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    args: PatientArgs,
    sequential: bool,
) -> Result<()> {
    let progress_path = progress_path(config_path.as_deref())?;
    let mut config = load_config(config_path, profile)?;
    if sequential {
        config.dialog.mode = DialogMode::Sequential;
    }

    let patient = PatientProfile::from_files(args.name, &args.dialog, &args.scoring)?;
    let provider = build_provider(&config)?;
    let registry = SessionRegistry::from_config(provider, &config)?;

    let rt = tokio::runtime::Runtime::new().map_err(|e| SimPatientError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;

    rt.block_on(async {
        let id = ConversationId::new();
        let opening = registry
            .start(id, patient.dialog.clone(), patient.scoring.clone())
            .await?;

        let session = registry.get(id).await?;
        let mode = if session.is_retrieval().await {
            "retrieval"
        } else {
            "sequential"
        };
        println!("Conversation with {} ({})", patient.name, id);
        println!(
            "{} scripted questions, {} mode. Type your questions; '/end' finishes the session.\n",
            session.question_count().await,
            mode
        );
        println!("Patient: {}", opening);

        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("\nYou: ");
            std::io::stdout().flush().ok();

            let line = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    return Err(SimPatientError::Io {
                        source: e,
                        context: "Failed to read from stdin".to_string(),
                    })
                }
                None => break,
            };

            let line = line.trim();
            if line == "/end" {
                break;
            }
            if line.is_empty() {
                continue;
            }

            match registry.turn(id, line).await {
                Ok(turn) => {
                    println!("  [{}]", turn.feedback.replace('\n', " | "));
                    println!("Patient: {}", turn.next_utterance);
                }
                Err(e) if e.is_retryable() => println!("  {}", registry.user_message(&e)),
                Err(e @ SimPatientError::SessionExpired { .. }) => {
                    println!("  {}", registry.user_message(&e));
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(summary) = registry.end(id).await {
            println!("\nSession summary");
            println!("===============");
            println!("  Turns:         {}", summary.turns);
            println!("  Total score:   {:.2}", summary.total_score);
            println!("  Average score: {:.2}", summary.average_score);
            println!("  Duration:      {}s", summary.duration().num_seconds());

            let mut log = ProgressLog::load(&progress_path)?;
            let progress = log.record(&patient.name, &summary).clone();
            log.save(&progress_path)?;
            tracing::debug!("Saved progress to {}", progress_path.display());

            println!();
            print_progress(&patient.name, &progress);
        }

        Ok(())
    })
}

fn cmd_score(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    scoring: &std::path::Path,
    text: &str,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let content = std::fs::read_to_string(scoring).map_err(|e| SimPatientError::Io {
        source: e,
        context: format!("Failed to read {}", scoring.display()),
    })?;
    let rubric = Rubric::from_json(&content)?;

    let mut engine = ScoreEngine::new(build_provider(&config)?, ScoreSettings::from(&config.scoring));
    engine.load("cli", rubric)?;
    let assessment = engine.score(text, "cli")?;

    if json {
        let out = serde_json::to_string_pretty(&assessment).map_err(|e| SimPatientError::Json {
            source: e,
            context: "Failed to serialize assessment".to_string(),
        })?;
        println!("{}", out);
    } else {
        println!("Score: {}", assessment.score);
        println!("{}", assessment.feedback());
        if !assessment.is_accepted() {
            if let Some(nearest) = &assessment.nearest_criterion {
                println!("Closest criterion: {}", nearest);
            }
        }
    }

    Ok(())
}

fn cmd_validate(args: PatientArgs) -> Result<()> {
    let patient = PatientProfile::from_files(args.name, &args.dialog, &args.scoring)?;

    println!("✓ Patient '{}' is valid", patient.name);
    println!("  Script entries:  {}", patient.dialog.len());
    println!("  Rubric criteria: {}", patient.scoring.len());
    println!("  Max turn score:  {}", patient.scoring.max_score());
    println!("  Opening line:    {}", patient.dialog.opening());

    Ok(())
}

fn cmd_progress(config_path: Option<PathBuf>, name: Option<String>) -> Result<()> {
    let path = progress_path(config_path.as_deref())?;
    let log = ProgressLog::load(&path)?;

    match name {
        Some(name) => match log.get(&name) {
            Some(progress) => print_progress(&name, progress),
            None => println!("No practice sessions recorded for '{}'", name),
        },
        None if log.patients.is_empty() => {
            println!("No practice sessions recorded yet");
        }
        None => {
            for (name, progress) in &log.patients {
                print_progress(name, progress);
                println!();
            }
        }
    }

    Ok(())
}

fn print_progress(name: &str, progress: &LearningProgress) {
    println!("Progress with {}", name);
    println!("  Conversations: {}", progress.total_conversations);
    println!("  Average score: {:.2}", progress.average_score);
    if let Some(last) = progress.last_conversation_at {
        println!("  Last session:  {}", last.format("%Y-%m-%d %H:%M UTC"));
    }
}

/// Progress is stored next to the config file
fn progress_path(config_path: Option<&Path>) -> Result<PathBuf> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    Ok(config_path.with_file_name("progress.json"))
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SimPatientError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'simpatient config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        simpatient::config::ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}

fn build_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = provider_from_config(&config.embedding)?;
    tracing::debug!(
        "Using embedding provider {} ({}D)",
        provider.model_name(),
        provider.dimension()
    );
    Ok(provider)
}
