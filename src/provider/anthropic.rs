use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{status_error, Instruction, Provider};
use crate::errors::GenError;

pub struct Anthropic {
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
    pub api_base: String,
    pub api_version: String,
}

impl Anthropic {
    pub fn new(model: String, api_key: String, timeout_secs: u64) -> Self {
        Self {
            model,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
            api_base: "https://api.anthropic.com".into(),
            api_version: "2023-06-01".into(),
        }
    }
}

#[derive(Serialize)]
struct MsgRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Msg<'a>>,
    system: &'a str,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MsgResponse {
    content: Vec<Block>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(default)]
    text: String,
    #[serde(default)]
    r#type: String,
}

#[async_trait]
impl Provider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, ins: &Instruction) -> Result<String, GenError> {
        let url = format!("{}/v1/messages", self.api_base.trim_end_matches('/'));
        let client = Client::builder().timeout(self.timeout).build()?;
        let system = ins.merged_system();
        let body = MsgRequest {
            model: &self.model,
            max_tokens: 8192,
            messages: vec![Msg { role: "user", content: &ins.user }],
            system: &system,
        };

        tracing::debug!(url = %url, model = %self.model, "anthropic request");

        let resp = client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(status_error("Anthropic", status, &text));
        }

        let parsed: MsgResponse = serde_json::from_str(&text)
            .map_err(|e| GenError::Transient(format!("anthropic response parse error: {e}")))?;

        Ok(parsed
            .content
            .into_iter()
            .filter(|b| b.r#type == "text")
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}
