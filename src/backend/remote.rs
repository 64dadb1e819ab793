//! Hosted backend reached through its HTTP function API.
//!
//! Every call is `POST {base}/api/{action|mutation|query}` with
//! `{"path": "module:function", "args": {...}, "format": "json"}`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::Backend;
use crate::errors::GenError;
use crate::provider::status_error;
use crate::wire::{
    GeneratedLists, GenerationProgress, GenerationRecord, GenerationStatus, ItemPrompt, ItemRequest,
    SelectedPromptTypes, StageInput, UsageStats, WizardForm,
};

#[derive(Debug, Clone, Copy)]
enum CallKind {
    Action,
    Mutation,
    Query,
}

impl CallKind {
    fn endpoint(&self) -> &'static str {
        match self {
            CallKind::Action => "action",
            CallKind::Mutation => "mutation",
            CallKind::Query => "query",
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error_message: Option<String>,
}

pub struct RemoteBackend {
    base: String,
    token: Option<String>,
    client: Client,
}

impl RemoteBackend {
    pub fn new(base: &str, token: Option<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
        Ok(Self { base: base.trim_end_matches('/').to_string(), token, client })
    }

    async fn call<T: DeserializeOwned>(&self, kind: CallKind, path: &str, args: Value) -> Result<T, GenError> {
        let url = format!("{}/api/{}", self.base, kind.endpoint());
        tracing::debug!(url = %url, path, "backend call");

        let mut req = self.client.post(&url).json(&json!({ "path": path, "args": args, "format": "json" }));
        if let Some(t) = &self.token {
            req = req.bearer_auth(t);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        let value = decode_envelope(status, &text)?;
        serde_json::from_value(value).map_err(|e| GenError::Transient(format!("unexpected response from {path}: {e}")))
    }
}

/// Unwrap the function API envelope, classifying backend error text.
fn decode_envelope(status: StatusCode, body: &str) -> Result<Value, GenError> {
    match serde_json::from_str::<Envelope>(body) {
        Ok(env) if env.status == "success" => Ok(env.value),
        Ok(env) => {
            let msg = env.error_message.unwrap_or_else(|| format!("backend returned status {}", env.status));
            Err(GenError::from_remote_message(&msg))
        }
        Err(_) if !status.is_success() => Err(status_error("backend", status, body)),
        Err(e) => Err(GenError::Transient(format!("malformed backend response: {e}"))),
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn create_generation(
        &self,
        user_id: &str,
        project_name: &str,
        form: &WizardForm,
        selected: &SelectedPromptTypes,
    ) -> Result<String, GenError> {
        let args = json!({
            "userId": user_id,
            "projectName": project_name,
            "formData": form,
            "selectedPromptTypes": selected,
        });
        self.call(CallKind::Mutation, "generations:create", args).await
    }

    async fn generate_prd(&self, input: &StageInput<'_>) -> Result<String, GenError> {
        self.call(CallKind::Action, "generations:generatePRD", to_args(input)?).await
    }

    async fn generate_user_flows(&self, input: &StageInput<'_>) -> Result<String, GenError> {
        self.call(CallKind::Action, "generations:generateUserFlows", to_args(input)?).await
    }

    async fn generate_task_file(&self, input: &StageInput<'_>) -> Result<String, GenError> {
        self.call(CallKind::Action, "generations:generateTaskFile", to_args(input)?).await
    }

    async fn generate_lists(&self, input: &StageInput<'_>) -> Result<GeneratedLists, GenError> {
        self.call(CallKind::Action, "generations:generateLists", to_args(input)?).await
    }

    async fn generate_item_prompt(&self, req: &ItemRequest<'_>) -> Result<ItemPrompt, GenError> {
        self.call(CallKind::Action, "generations:generateItemPrompt", to_args(req)?).await
    }

    async fn approve_step(&self, generation_id: &str, step: &str) -> Result<(), GenError> {
        let _: Value = self
            .call(CallKind::Mutation, "generations:approveStep", json!({ "generationId": generation_id, "step": step }))
            .await?;
        Ok(())
    }

    async fn update_generation_status(&self, generation_id: &str, status: GenerationStatus) -> Result<(), GenError> {
        let _: Value = self
            .call(CallKind::Mutation, "generations:updateStatus", json!({ "generationId": generation_id, "status": status }))
            .await?;
        Ok(())
    }

    async fn get_generation_progress(&self, generation_id: &str) -> Result<GenerationProgress, GenError> {
        self.call(CallKind::Query, "generations:getProgress", json!({ "generationId": generation_id })).await
    }

    async fn get_generation(&self, generation_id: &str) -> Result<GenerationRecord, GenError> {
        let rec: Option<GenerationRecord> =
            self.call(CallKind::Query, "generations:get", json!({ "generationId": generation_id })).await?;
        rec.ok_or_else(|| GenError::Validation(format!("generation {generation_id} not found")))
    }

    async fn get_user_stats(&self, user_id: &str) -> Result<UsageStats, GenError> {
        self.call(CallKind::Query, "users:getStats", json!({ "userId": user_id })).await
    }
}

fn to_args<T: serde::Serialize>(v: &T) -> Result<Value, GenError> {
    serde_json::to_value(v).map_err(|e| GenError::Validation(format!("cannot encode request: {e}")))
}
