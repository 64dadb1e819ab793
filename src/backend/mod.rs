//! Generation backend boundary.
//!
//! Every operation returns `GenError` so callers can decide on retries by
//! error kind. Implementations classify their own transport failures.

use async_trait::async_trait;
use std::sync::Arc;

use crate::cli::BackendKind;
use crate::config::Config;
use crate::errors::GenError;
use crate::store::Store;
use crate::wire::{
    GeneratedLists, GenerationProgress, GenerationRecord, GenerationStatus, ItemPrompt, ItemRequest,
    SelectedPromptTypes, StageInput, UsageStats, WizardForm,
};

pub mod local;
pub mod remote;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn create_generation(
        &self,
        user_id: &str,
        project_name: &str,
        form: &WizardForm,
        selected: &SelectedPromptTypes,
    ) -> Result<String, GenError>;

    async fn generate_prd(&self, input: &StageInput<'_>) -> Result<String, GenError>;

    async fn generate_user_flows(&self, input: &StageInput<'_>) -> Result<String, GenError>;

    async fn generate_task_file(&self, input: &StageInput<'_>) -> Result<String, GenError>;

    async fn generate_lists(&self, input: &StageInput<'_>) -> Result<GeneratedLists, GenError>;

    async fn generate_item_prompt(&self, req: &ItemRequest<'_>) -> Result<ItemPrompt, GenError>;

    async fn approve_step(&self, generation_id: &str, step: &str) -> Result<(), GenError>;

    async fn update_generation_status(&self, generation_id: &str, status: GenerationStatus) -> Result<(), GenError>;

    async fn get_generation_progress(&self, generation_id: &str) -> Result<GenerationProgress, GenError>;

    async fn get_generation(&self, generation_id: &str) -> Result<GenerationRecord, GenError>;

    async fn get_user_stats(&self, user_id: &str) -> Result<UsageStats, GenError>;
}

pub type DynBackend = Arc<dyn Backend>;

pub fn make_backend(cfg: &Config, store: Arc<Store>) -> anyhow::Result<DynBackend> {
    match cfg.backend {
        BackendKind::Remote => {
            let token = std::env::var("PROMPTGEN_TOKEN").ok();
            Ok(Arc::new(remote::RemoteBackend::new(&cfg.backend_url, token, cfg.timeout_secs)?))
        }
        BackendKind::Local => {
            let provider =
                crate::provider::make_provider(cfg.provider, cfg.model.clone(), cfg.timeout_secs, cfg.ollama_url.clone())?;
            Ok(Arc::new(local::LocalBackend::new(provider, store, cfg.local_prompt_quota)))
        }
    }
}
