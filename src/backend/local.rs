//! Backend that runs generation on this machine.
//!
//! Stage text comes from an LLM provider; the generation record and usage
//! counter live in the local store under `record:<id>` and `stats:<user>`.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use super::Backend;
use crate::errors::GenError;
use crate::prompt;
use crate::provider::DynProvider;
use crate::store::Store;
use crate::wire::{
    GeneratedLists, GenerationProgress, GenerationRecord, GenerationStatus, ItemPrompt, ItemRequest, PromptItem,
    SelectedPromptTypes, StageInput, UsageStats, WizardForm,
};

pub struct LocalBackend {
    provider: DynProvider,
    store: Arc<Store>,
    quota: Option<i64>,
    write_lock: Mutex<()>,
}

fn record_key(id: &str) -> String {
    format!("record:{id}")
}

fn usage_key(user_id: &str) -> String {
    format!("stats:{user_id}")
}

fn store_err(e: anyhow::Error) -> GenError {
    GenError::Transient(format!("local store: {e:#}"))
}

impl LocalBackend {
    pub fn new(provider: DynProvider, store: Arc<Store>, quota: Option<i64>) -> Self {
        Self { provider, store, quota, write_lock: Mutex::new(()) }
    }

    fn load(&self, id: &str) -> Result<GenerationRecord, GenError> {
        self.store
            .get_json(&record_key(id))
            .map_err(store_err)?
            .ok_or_else(|| GenError::Validation(format!("generation {id} not found")))
    }

    fn update<F>(&self, id: &str, f: F) -> Result<GenerationRecord, GenError>
    where
        F: FnOnce(&mut GenerationRecord),
    {
        let _guard = self.write_lock.lock();
        let mut rec = self.load(id)?;
        f(&mut rec);
        self.store.put_json(&record_key(id), &rec).map_err(store_err)?;
        Ok(rec)
    }

    fn used(&self, user_id: &str) -> Result<i64, GenError> {
        Ok(self.store.get_json::<i64>(&usage_key(user_id)).map_err(store_err)?.unwrap_or(0))
    }

    fn stats_for(&self, user_id: &str) -> Result<UsageStats, GenError> {
        Ok(match self.quota {
            None => UsageStats { remaining_prompts: i64::MAX, is_pro: true },
            Some(q) => UsageStats { remaining_prompts: (q - self.used(user_id)?).max(0), is_pro: false },
        })
    }

    fn ensure_not_cancelled(&self, id: &str) -> Result<GenerationRecord, GenError> {
        let rec = self.load(id)?;
        if rec.status == GenerationStatus::Cancelled {
            return Err(GenError::Validation(format!("cannot generate for cancelled generation {id}")));
        }
        Ok(rec)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn create_generation(
        &self,
        user_id: &str,
        project_name: &str,
        form: &WizardForm,
        selected: &SelectedPromptTypes,
    ) -> Result<String, GenError> {
        let id = Uuid::new_v4().to_string();
        let rec = GenerationRecord {
            generation_id: id.clone(),
            user_id: user_id.to_string(),
            project_name: project_name.to_string(),
            form_data: form.clone(),
            selected_prompt_types: *selected,
            status: GenerationStatus::Pending,
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        self.store.put_json(&record_key(&id), &rec).map_err(store_err)?;
        tracing::info!(generation_id = %id, provider = self.provider.name(), "local generation created");
        Ok(id)
    }

    async fn generate_prd(&self, input: &StageInput<'_>) -> Result<String, GenError> {
        self.ensure_not_cancelled(input.generation_id)?;
        let text = self.provider.complete(&prompt::prd(input)).await?;
        if !text.trim().is_empty() {
            self.update(input.generation_id, |r| {
                r.prd = Some(text.clone());
                r.status = GenerationStatus::InProgress;
            })?;
        }
        Ok(text)
    }

    async fn generate_user_flows(&self, input: &StageInput<'_>) -> Result<String, GenError> {
        self.ensure_not_cancelled(input.generation_id)?;
        let text = self.provider.complete(&prompt::user_flows(input)).await?;
        if !text.trim().is_empty() {
            self.update(input.generation_id, |r| r.user_flows = Some(text.clone()))?;
        }
        Ok(text)
    }

    async fn generate_task_file(&self, input: &StageInput<'_>) -> Result<String, GenError> {
        self.ensure_not_cancelled(input.generation_id)?;
        let text = self.provider.complete(&prompt::task_file(input)).await?;
        if !text.trim().is_empty() {
            self.update(input.generation_id, |r| r.task_file = Some(text.clone()))?;
        }
        Ok(text)
    }

    async fn generate_lists(&self, input: &StageInput<'_>) -> Result<GeneratedLists, GenError> {
        let rec = self.ensure_not_cancelled(input.generation_id)?;
        let selected = input.selected_prompt_types.copied().unwrap_or(rec.selected_prompt_types);
        let text = self.provider.complete(&prompt::lists(input, &selected)).await?;
        let lists = prompt::parse_lists(&text, &selected)?;
        self.update(input.generation_id, |r| r.lists = Some(lists.clone()))?;
        Ok(lists)
    }

    async fn generate_item_prompt(&self, req: &ItemRequest<'_>) -> Result<ItemPrompt, GenError> {
        let id = req.stage.generation_id;
        self.ensure_not_cancelled(id)?;
        crate::quota::check_single(&self.stats_for(req.stage.user_id)?)?;

        let text = self.provider.complete(&prompt::item(&req.stage, req.item_type, req.item_name)).await?;
        if text.trim().is_empty() {
            return Ok(ItemPrompt { prompt: text });
        }

        let rec = self.update(id, |r| {
            r.prompts.push(req.item_type, PromptItem { title: req.item_name.to_string(), prompt: text.clone() });
            if r.lists.as_ref().is_some_and(|l| l.is_complete(&r.prompts, &r.selected_prompt_types)) {
                r.status = GenerationStatus::Completed;
            }
        })?;
        let _guard = self.write_lock.lock();
        let used = self.used(&rec.user_id)?;
        self.store.put_json(&usage_key(&rec.user_id), &(used + 1)).map_err(store_err)?;
        Ok(ItemPrompt { prompt: text })
    }

    async fn approve_step(&self, generation_id: &str, step: &str) -> Result<(), GenError> {
        self.update(generation_id, |r| {
            if !r.approved_steps.iter().any(|s| s == step) {
                r.approved_steps.push(step.to_string());
            }
        })?;
        Ok(())
    }

    async fn update_generation_status(&self, generation_id: &str, status: GenerationStatus) -> Result<(), GenError> {
        self.update(generation_id, |r| r.status = status)?;
        Ok(())
    }

    async fn get_generation_progress(&self, generation_id: &str) -> Result<GenerationProgress, GenError> {
        let rec = self.load(generation_id)?;
        let (total_items, pending) = match &rec.lists {
            Some(l) => (l.total_for(&rec.selected_prompt_types), l.pending(&rec.prompts, &rec.selected_prompt_types).len()),
            None => (0, 0),
        };
        Ok(GenerationProgress {
            status: rec.status,
            total_items,
            completed_items: total_items - pending,
            prompts: rec.prompts,
        })
    }

    async fn get_generation(&self, generation_id: &str) -> Result<GenerationRecord, GenError> {
        self.load(generation_id)
    }

    async fn get_user_stats(&self, user_id: &str) -> Result<UsageStats, GenError> {
        self.stats_for(user_id)
    }
}
