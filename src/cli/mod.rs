use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[value(alias = "open-ai", alias = "openai")]
    OpenAI,
    #[value(alias = "anthropic")]
    Anthropic,
    #[value(alias = "ollama")]
    Ollama,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted generation backend over HTTP
    Remote,
    /// Generate with an LLM provider and keep records on this machine
    Local,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Zip,
    Markdown,
    Text,
}

#[derive(Parser, Debug)]
#[command(name = "vibe_promptgen", version, about = "Turn a project wizard into PRD, flows, tasks and per-item build prompts")]
pub struct Args {
    /// TOML config file; flags override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    pub backend: Option<BackendKind>,

    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    #[arg(long, global = true)]
    pub user_id: Option<String>,

    #[arg(long, value_enum, global = true)]
    pub provider: Option<ProviderKind>,

    #[arg(long, global = true)]
    pub model: Option<String>,

    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Write each stage's request and output under the data dir
    #[arg(long, default_value_t = false, global = true)]
    pub save_artifacts: bool,

    #[arg(long, default_value_t = false, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit the wizard and run the generation pipeline
    Generate {
        #[arg(long, default_value = "main")]
        wizard: String,

        /// Read the wizard answers from a JSON file instead of the saved form
        #[arg(long)]
        form: Option<PathBuf>,

        /// Run every stage without asking between them
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,

        /// Stop after this stage (prd, user_flows, tasks, lists, prompts)
        #[arg(long)]
        until: Option<String>,
    },
    /// Continue an earlier generation from where it stopped
    Resume {
        generation_id: String,

        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,

        /// Step back to an earlier stage and regenerate from there
        #[arg(long)]
        from: Option<String>,
    },
    /// Show progress counts for a generation
    Status { generation_id: String },
    /// Mark a generation as cancelled
    Cancel { generation_id: String },
    /// Write a generation's results to disk
    Export {
        generation_id: String,

        #[arg(long, value_enum, default_value_t = ExportFormat::Zip)]
        format: ExportFormat,

        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show remaining prompt quota
    Stats,
    /// Inspect or edit the saved wizard answers
    Form {
        #[arg(long, default_value = "main")]
        wizard: String,

        #[command(subcommand)]
        action: FormAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum FormAction {
    Show,
    /// Set a field, e.g. `techStack.frontend "React, Tailwind"`
    Set { key: String, value: String },
    Clear,
    /// Stage a JSON file as a one-shot prefill for the next run
    Prefill { file: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate() {
        let args = Args::parse_from(["vibe_promptgen", "--backend", "local", "generate", "-y", "--until", "lists"]);
        assert_eq!(args.backend, Some(BackendKind::Local));
        match args.command {
            Command::Generate { yes, until, wizard, .. } => {
                assert!(yes);
                assert_eq!(until.as_deref(), Some("lists"));
                assert_eq!(wizard, "main");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_form_set() {
        let args = Args::parse_from(["vibe_promptgen", "form", "set", "projectName", "Shop"]);
        match args.command {
            Command::Form { action: FormAction::Set { key, value }, .. } => {
                assert_eq!(key, "projectName");
                assert_eq!(value, "Shop");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_export_defaults_to_zip() {
        let args = Args::parse_from(["vibe_promptgen", "export", "g1"]);
        assert!(matches!(args.command, Command::Export { format: ExportFormat::Zip, .. }));
    }

    #[test]
    fn test_parse_resume_from() {
        let args = Args::parse_from(["vibe_promptgen", "resume", "g1", "--from", "prd"]);
        match args.command {
            Command::Resume { generation_id, from, yes } => {
                assert_eq!(generation_id, "g1");
                assert_eq!(from.as_deref(), Some("prd"));
                assert!(!yes);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
