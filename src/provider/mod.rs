use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::cli::ProviderKind;
use crate::errors::GenError;

pub mod anthropic;
pub mod ollama;
pub mod openai;

/// Prompt text for one chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub system: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer: Option<String>,
}

impl Instruction {
    /// System text with developer notes appended, for APIs with a single
    /// system slot.
    pub fn merged_system(&self) -> String {
        let mut system = self.system.clone();
        if let Some(dev) = &self.developer {
            system.push_str("\n\nDeveloper notes:\n");
            system.push_str(dev);
        }
        system
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, ins: &Instruction) -> Result<String, GenError>;
}

pub type DynProvider = Box<dyn Provider + Send + Sync>;

pub fn make_provider(
    kind: ProviderKind,
    model: String,
    timeout_secs: u64,
    ollama_url: Option<String>,
) -> Result<DynProvider> {
    match kind {
        ProviderKind::OpenAI => {
            let key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY env var is not set"))?;
            Ok(Box::new(openai::OpenAIProvider::new(model, key, timeout_secs)))
        }
        ProviderKind::Anthropic => {
            let key =
                std::env::var("ANTHROPIC_API_KEY").map_err(|_| anyhow!("ANTHROPIC_API_KEY env var is not set"))?;
            Ok(Box::new(anthropic::Anthropic::new(model, key, timeout_secs)))
        }
        ProviderKind::Ollama => Ok(Box::new(ollama::Ollama::new(
            model,
            ollama_url.unwrap_or_else(|| "http://localhost:11434".into()),
            timeout_secs,
        ))),
    }
}

/// Map a non-success HTTP status to an error kind the retry policy
/// understands.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> GenError {
    let msg = format!("{provider} API error ({status}): {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenError::Permission(msg),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => GenError::Validation(msg),
        _ => GenError::Transient(msg),
    }
}
