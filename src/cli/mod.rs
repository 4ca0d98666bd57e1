//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "simpatient",
    version,
    about = "Practice clinical interviews with a scripted virtual patient",
    long_about = "Simpatient runs a conversation with a virtual patient defined by a dialog script \
                  and a scoring rubric. Every answer is graded by semantic similarity to the rubric \
                  and the patient replies from its script."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/simpatient/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config (e.g., "exam")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where a patient definition comes from
#[derive(clap::Args, Debug, Clone)]
pub struct PatientArgs {
    /// Dialog script JSON file (array of {question, answer})
    #[arg(short, long, value_name = "FILE")]
    pub dialog: PathBuf,

    /// Scoring rubric JSON file (array of {reference_text, label, score})
    #[arg(short, long, value_name = "FILE")]
    pub scoring: PathBuf,

    /// Patient name shown in the session header
    #[arg(short, long, default_value = "Virtual patient")]
    pub name: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Hold an interactive conversation with a virtual patient
    Practice {
        #[command(flatten)]
        patient: PatientArgs,

        /// Walk the script in order instead of matching questions
        #[arg(long)]
        sequential: bool,
    },

    /// Grade a single answer against a rubric
    Score {
        /// Scoring rubric JSON file
        #[arg(short, long, value_name = "FILE")]
        scoring: PathBuf,

        /// Answer text to grade
        text: String,

        /// Show the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a dialog script and rubric load correctly
    Validate {
        #[command(flatten)]
        patient: PatientArgs,
    },

    /// Show accumulated results from earlier practice sessions
    Progress {
        /// Only show this patient
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_practice() {
        let cli = Cli::try_parse_from([
            "simpatient",
            "practice",
            "--dialog",
            "d.json",
            "--scoring",
            "s.json",
            "--sequential",
        ])
        .unwrap();

        match cli.command {
            Commands::Practice {
                patient,
                sequential,
            } => {
                assert_eq!(patient.dialog, PathBuf::from("d.json"));
                assert_eq!(patient.name, "Virtual patient");
                assert!(sequential);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_progress() {
        let cli = Cli::try_parse_from(["simpatient", "progress", "--name", "Mr. Chen"]).unwrap();
        match cli.command {
            Commands::Progress { name } => assert_eq!(name.as_deref(), Some("Mr. Chen")),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
