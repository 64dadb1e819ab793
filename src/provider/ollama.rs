use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{status_error, Instruction, Provider};
use crate::errors::GenError;

pub struct Ollama {
    pub model: String,
    pub url: String,
    pub timeout: Duration,
}

impl Ollama {
    pub fn new(model: String, url: String, timeout_secs: u64) -> Self {
        Self { model, url, timeout: Duration::from_secs(timeout_secs) }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Msg>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct Msg {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: MsgOut,
}

#[derive(Deserialize)]
struct MsgOut {
    content: String,
}

fn to_messages(ins: &Instruction) -> Vec<Msg> {
    vec![
        Msg { role: "system".into(), content: ins.merged_system() },
        Msg { role: "user".into(), content: ins.user.clone() },
    ]
}

#[async_trait]
impl Provider for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, ins: &Instruction) -> Result<String, GenError> {
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let client = Client::builder().timeout(self.timeout).build()?;
        let body = ChatRequest {
            model: &self.model,
            messages: to_messages(ins),
            stream: false,
            options: OllamaOptions { temperature: 0.4 },
        };

        tracing::debug!(url = %url, model = %self.model, "ollama request");

        let resp = client.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(status_error("Ollama", status, &text));
        }

        // Some proxies in front of ollama return the bare content
        let content = match serde_json::from_str::<ChatResponse>(&text) {
            Ok(c) => c.message.content,
            Err(_) => text,
        };
        Ok(content)
    }
}
