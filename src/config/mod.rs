use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::{Args, BackendKind, ProviderKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub backend: BackendKind,
    pub backend_url: String,
    pub user_id: String,
    pub provider: ProviderKind,
    pub model: String,
    pub timeout_secs: u64,
    pub ollama_url: Option<String>,
    /// Per-item call budget before it counts as a timeout
    pub item_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_initial_delay_ms: u64,
    /// Pause between item prompts
    pub item_delay_ms: u64,
    /// Prompts a local user may generate; `None` means unlimited
    pub local_prompt_quota: Option<i64>,
    pub save_artifacts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: BackendKind::Remote,
            backend_url: "http://127.0.0.1:3210".into(),
            user_id: "local-user".into(),
            provider: ProviderKind::OpenAI,
            model: "gpt-4.1-mini".into(),
            timeout_secs: 600,
            ollama_url: Some("http://localhost:11434".into()),
            item_timeout_secs: 60,
            retry_attempts: 3,
            retry_initial_delay_ms: 1000,
            item_delay_ms: 0,
            local_prompt_quota: None,
            save_artifacts: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".promptgen")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs_err::read_to_string(path)?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Config file (if given) with command-line flags layered on top.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        if let Some(d) = &args.data_dir {
            cfg.data_dir = d.clone();
        }
        if let Some(b) = args.backend {
            cfg.backend = b;
        }
        if let Some(u) = &args.backend_url {
            cfg.backend_url = u.clone();
        }
        if let Some(u) = &args.user_id {
            cfg.user_id = u.clone();
        }
        if let Some(p) = args.provider {
            cfg.provider = p;
        }
        if let Some(m) = &args.model {
            cfg.model = m.clone();
        }
        if let Some(t) = args.timeout_secs {
            cfg.timeout_secs = t;
        }
        if args.save_artifacts {
            cfg.save_artifacts = true;
        }
        Ok(cfg)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.db")
    }

    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_delay: std::time::Duration::from_millis(self.retry_initial_delay_ms),
            attempt_timeout: Some(std::time::Duration::from_secs(self.item_timeout_secs)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
backend = "local"
provider = "ollama"
model = "llama3.1"
"#,
        )
        .unwrap();
        assert_eq!(cfg.backend, BackendKind::Local);
        assert_eq!(cfg.provider, ProviderKind::Ollama);
        assert_eq!(cfg.item_timeout_secs, 60);
        assert_eq!(cfg.retry_attempts, 3);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promptgen.toml");
        fs_err::write(&path, "model = \"from-file\"\nuser_id = \"file-user\"\n").unwrap();

        let args = Args::parse_from([
            "vibe_promptgen",
            "--config",
            path.to_str().unwrap(),
            "--model",
            "from-flag",
            "stats",
        ]);
        let cfg = Config::from_args(&args).unwrap();
        assert_eq!(cfg.model, "from-flag");
        assert_eq!(cfg.user_id, "file-user");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let p = Config::default().retry_policy();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.initial_delay, std::time::Duration::from_secs(1));
        assert_eq!(p.attempt_timeout, Some(std::time::Duration::from_secs(60)));
    }
}
