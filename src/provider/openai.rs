use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{status_error, Instruction};
use crate::errors::GenError;

pub struct OpenAIProvider {
    model: String,
    api_key: String,
    api_base: String,
    client: Client,
    timeout_secs: u64,
}

impl OpenAIProvider {
    pub fn new(model: String, api_key: String, timeout_secs: u64) -> Self {
        Self {
            model,
            api_key,
            api_base: "https://api.openai.com".into(),
            client: Client::new(),
            timeout_secs,
        }
    }
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[async_trait]
impl super::Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, ins: &Instruction) -> Result<String, GenError> {
        let mut messages = vec![json!({ "role": "system", "content": ins.system })];
        if let Some(dev) = &ins.developer {
            messages.push(json!({ "role": "developer", "content": dev }));
        }
        messages.push(json!({ "role": "user", "content": ins.user }));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.7,
        });

        let url = format!("{}/v1/chat/completions", self.api_base.trim_end_matches('/'));
        tracing::debug!(url = %url, model = %self.model, "openai request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(status_error("OpenAI", status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| GenError::Transient(format!("failed to parse OpenAI response: {e}")))?;

        Ok(parsed.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default())
    }
}
