//! Generation driver.
//!
//! Walks a generation through `form → prd → user_flows → tasks → lists →
//! prompts → summary`. Each stage call needs every earlier output, blank
//! output counts as failure, and the stage only advances on success.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::DynBackend;
use crate::errors::GenError;
use crate::retry::RetryPolicy;
use crate::store::{artifacts, Store};
use crate::wire::{
    GeneratedLists, GenerationRecord, GenerationStatus, PromptSet, SelectedPromptTypes, Stage, StageInput, WizardForm,
};
use crate::worker::{ProgressSink, PromptJob, PromptWorker, RunOutcome};

/// Client-side mirror of one generation.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub generation_id: Option<String>,
    pub user_id: String,
    pub form: WizardForm,
    pub prd: Option<String>,
    pub user_flows: Option<String>,
    pub task_file: Option<String>,
    pub lists: Option<GeneratedLists>,
    pub prompts: PromptSet,
    pub stage: Stage,
}

impl Session {
    pub fn selected(&self) -> SelectedPromptTypes {
        self.form.selected_prompt_types
    }

    fn input<'a>(&'a self, generation_id: &'a str) -> StageInput<'a> {
        StageInput {
            generation_id,
            user_id: &self.user_id,
            form_data: &self.form,
            prd: self.prd.as_deref(),
            user_flows: self.user_flows.as_deref(),
            task_file: self.task_file.as_deref(),
            selected_prompt_types: None,
        }
    }

    /// Names of the outputs `stage` needs that are not there yet.
    pub fn missing_for(&self, stage: Stage) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if stage <= Stage::Form {
            return missing;
        }
        if self.generation_id.is_none() {
            missing.push("generation record");
        }
        let needs: [(Stage, bool, &'static str); 4] = [
            (Stage::UserFlows, self.prd.is_some(), "PRD"),
            (Stage::Tasks, self.user_flows.is_some(), "user flows"),
            (Stage::Lists, self.task_file.is_some(), "task file"),
            (Stage::Prompts, self.lists.is_some(), "lists"),
        ];
        for (from, present, name) in needs {
            if stage >= from && !present {
                missing.push(name);
            }
        }
        missing
    }

    /// Rebuild from a backend record, positioned after its last output.
    pub fn from_record(rec: GenerationRecord) -> Self {
        let mut form = rec.form_data;
        form.selected_prompt_types = rec.selected_prompt_types;
        let mut s = Session {
            generation_id: Some(rec.generation_id),
            user_id: rec.user_id,
            form,
            prd: rec.prd.filter(|t| !t.trim().is_empty()),
            user_flows: rec.user_flows.filter(|t| !t.trim().is_empty()),
            task_file: rec.task_file.filter(|t| !t.trim().is_empty()),
            lists: rec.lists,
            prompts: rec.prompts,
            ..Default::default()
        };
        s.stage = s.last_complete_stage();
        s
    }

    fn last_complete_stage(&self) -> Stage {
        if let Some(lists) = &self.lists {
            if lists.is_complete(&self.prompts, &self.selected()) {
                return Stage::Summary;
            }
            return Stage::Lists;
        }
        if self.task_file.is_some() {
            Stage::Tasks
        } else if self.user_flows.is_some() {
            Stage::UserFlows
        } else if self.prd.is_some() {
            Stage::Prd
        } else {
            Stage::Form
        }
    }
}

/// Caller hooks around each stage `Driver::run_through` performs. Every
/// hook has a default, so an observer only overrides what it shows.
pub trait StageObserver: Send + Sync {
    /// Called before `stage` starts; `false` stops the run there.
    fn proceed(&self, _stage: Stage) -> bool {
        true
    }

    /// Progress sink for a prompt run over `total` items.
    fn prompt_sink(&self, _total: usize) -> Option<Arc<dyn ProgressSink>> {
        None
    }

    fn worker_started(&self, _worker: &Arc<PromptWorker>) {}

    fn finished(&self, _stage: Stage, _session: &Session) {}

    fn failed(&self, _stage: Stage, _error: &GenError) {}
}

/// Runs every stage without asking and shows nothing.
pub struct Unattended;

impl StageObserver for Unattended {}

pub struct Driver {
    backend: DynBackend,
    session: Session,
    policy: RetryPolicy,
    item_delay: Duration,
    store: Option<Arc<Store>>,
    artifacts_dir: Option<PathBuf>,
    worker: Option<Arc<PromptWorker>>,
}

impl Driver {
    pub fn new(backend: DynBackend, user_id: &str, form: WizardForm) -> Self {
        Self::from_session(backend, Session { user_id: user_id.to_string(), form, ..Default::default() })
    }

    pub fn from_session(backend: DynBackend, session: Session) -> Self {
        Self {
            backend,
            session,
            policy: RetryPolicy::default(),
            item_delay: Duration::ZERO,
            store: None,
            artifacts_dir: None,
            worker: None,
        }
    }

    /// Load an existing generation from the backend.
    pub async fn resume(backend: DynBackend, generation_id: &str) -> Result<Self, GenError> {
        let rec = backend.get_generation(generation_id).await?;
        let session = Session::from_record(rec);
        tracing::info!(generation_id, stage = %session.stage, "resumed generation");
        Ok(Self::from_session(backend, session))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Save each stage's request and output under `data_dir`.
    pub fn with_artifacts(mut self, data_dir: PathBuf) -> Self {
        self.artifacts_dir = Some(data_dir);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stage(&self) -> Stage {
        self.session.stage
    }

    fn require(&self, stage: Stage) -> Result<String, GenError> {
        let missing = self.session.missing_for(stage);
        if !missing.is_empty() {
            return Err(GenError::MissingPrerequisite { stage, missing });
        }
        self.session.generation_id.clone().ok_or(GenError::MissingPrerequisite {
            stage,
            missing: vec!["generation record"],
        })
    }

    fn record_error(&self, e: GenError) -> GenError {
        tracing::error!(stage = %self.session.stage, error = %e, "stage failed");
        e
    }

    fn accept_text(&self, stage: Stage, result: Result<String, GenError>) -> Result<String, GenError> {
        match result {
            Ok(t) if t.trim().is_empty() => Err(self.record_error(GenError::EmptyContent { stage })),
            Ok(t) => Ok(t),
            Err(e) => Err(self.record_error(e)),
        }
    }

    /// Move to `stage` and acknowledge the stage before it.
    async fn advance(&mut self, stage: Stage) {
        self.session.stage = stage;
        tracing::info!(stage = %stage, "stage complete");

        if let (Some(id), Some(prev)) = (self.session.generation_id.clone(), stage.previous()) {
            if let Err(e) = self.backend.approve_step(&id, prev.as_str()).await {
                tracing::warn!(step = %prev, error = %e, "could not approve step");
            }
        }
    }

    fn save_artifact(&self, stage: Stage, output: &str) {
        let (Some(dir), Some(id)) = (&self.artifacts_dir, &self.session.generation_id) else { return };
        let input = self.session.input(id);
        if let Err(e) = artifacts::save_stage(dir, id, stage.as_str(), &input, output) {
            tracing::warn!(stage = %stage, error = %e, "could not save stage artifacts");
        }
    }

    /// Quota pre-flight, form validation, then create the generation record.
    pub async fn submit(&mut self) -> Result<String, GenError> {
        let stats = match self.backend.get_user_stats(&self.session.user_id).await {
            Ok(s) => s,
            Err(e) => return Err(self.record_error(e)),
        };
        if let Err(e) = crate::quota::check_bulk(&stats) {
            return Err(self.record_error(e));
        }
        if let Err(e) = self.session.form.validate() {
            return Err(self.record_error(e));
        }

        let selected = self.session.selected();
        let created = self
            .backend
            .create_generation(&self.session.user_id, &self.session.form.project_name, &self.session.form, &selected)
            .await;
        let id = match created {
            Ok(id) => id,
            Err(e) => return Err(self.record_error(e)),
        };
        tracing::info!(generation_id = %id, "generation created");
        self.session.generation_id = Some(id.clone());
        Ok(id)
    }

    pub async fn generate_prd(&mut self) -> Result<(), GenError> {
        let id = self.require(Stage::Prd)?;
        let result = self.backend.generate_prd(&self.session.input(&id)).await;
        let text = self.accept_text(Stage::Prd, result)?;
        self.save_artifact(Stage::Prd, &text);
        self.session.prd = Some(text);
        self.advance(Stage::Prd).await;
        Ok(())
    }

    pub async fn generate_user_flows(&mut self) -> Result<(), GenError> {
        let id = self.require(Stage::UserFlows)?;
        let result = self.backend.generate_user_flows(&self.session.input(&id)).await;
        let text = self.accept_text(Stage::UserFlows, result)?;
        self.save_artifact(Stage::UserFlows, &text);
        self.session.user_flows = Some(text);
        self.advance(Stage::UserFlows).await;
        Ok(())
    }

    pub async fn generate_tasks(&mut self) -> Result<(), GenError> {
        let id = self.require(Stage::Tasks)?;
        let result = self.backend.generate_task_file(&self.session.input(&id)).await;
        let text = self.accept_text(Stage::Tasks, result)?;
        self.save_artifact(Stage::Tasks, &text);
        self.session.task_file = Some(text);
        self.advance(Stage::Tasks).await;
        Ok(())
    }

    pub async fn generate_lists(&mut self) -> Result<(), GenError> {
        let id = self.require(Stage::Lists)?;
        let selected = self.session.selected();
        let result = {
            let mut input = self.session.input(&id);
            input.selected_prompt_types = Some(&selected);
            self.backend.generate_lists(&input).await
        };
        let lists = match result {
            Ok(l) if l.is_empty_for(&selected) => {
                return Err(self.record_error(GenError::EmptyContent { stage: Stage::Lists }))
            }
            Ok(l) => l,
            Err(e) => return Err(self.record_error(e)),
        };
        if let Ok(json) = serde_json::to_string_pretty(&lists) {
            self.save_artifact(Stage::Lists, &json);
        }
        self.session.lists = Some(lists);
        self.worker = None;
        self.advance(Stage::Lists).await;
        Ok(())
    }

    /// The worker for the prompt stage, built on first use. `sink` only
    /// applies when the worker is created.
    fn prompt_worker(&mut self, sink: Option<Arc<dyn ProgressSink>>) -> Result<Arc<PromptWorker>, GenError> {
        if let Some(w) = &self.worker {
            return Ok(w.clone());
        }
        let id = self.require(Stage::Prompts)?;
        let s = &self.session;
        let job = PromptJob {
            generation_id: id,
            user_id: s.user_id.clone(),
            form: s.form.clone(),
            prd: s.prd.clone().unwrap_or_default(),
            user_flows: s.user_flows.clone().unwrap_or_default(),
            task_file: s.task_file.clone().unwrap_or_default(),
            lists: s.lists.clone().unwrap_or_default(),
            selected: s.selected(),
        };
        let mut worker = PromptWorker::new(self.backend.clone(), job, self.policy.clone())
            .with_completed(s.prompts.clone())
            .with_item_delay(self.item_delay);
        if let Some(store) = &self.store {
            worker = worker
                .with_store(store.clone())
                .map_err(|e| GenError::Transient(format!("progress cache: {e:#}")))?;
        }
        if let Some(sink) = sink {
            worker = worker.with_sink(sink);
        }
        let worker = Arc::new(worker);
        self.worker = Some(worker.clone());
        Ok(worker)
    }

    /// Generate one prompt per listed item, then move to the summary.
    /// Calling again after a failure retries from the failing item.
    pub async fn generate_prompts(&mut self, sink: Option<Arc<dyn ProgressSink>>) -> Result<RunOutcome, GenError> {
        let worker = match self.prompt_worker(sink) {
            Ok(w) => w,
            Err(e) => return Err(self.record_error(e)),
        };
        self.run_worker(worker).await
    }

    async fn run_worker(&mut self, worker: Arc<PromptWorker>) -> Result<RunOutcome, GenError> {
        if self.session.stage < Stage::Prompts {
            self.advance(Stage::Prompts).await;
        }

        let outcome = worker.run().await;
        self.session.prompts = worker.prompts();
        match &outcome {
            RunOutcome::Completed { .. } => self.advance(Stage::Summary).await,
            // a fired token cannot be reset; the next call builds a new worker
            RunOutcome::Cancelled => self.worker = None,
            RunOutcome::Failed { .. } | RunOutcome::Refused(_) | RunOutcome::AlreadyRunning => {}
        }
        Ok(outcome)
    }

    /// Prompt stage as run by `run_through`. `Ok(false)` means another run
    /// already owns the worker.
    async fn prompt_stage(&mut self, observer: &dyn StageObserver) -> Result<bool, GenError> {
        let s = &self.session;
        let total = s.lists.as_ref().map(|l| l.total_for(&s.selected())).unwrap_or(0);
        let sink = observer.prompt_sink(total);
        if sink.is_some() && !self.worker.as_ref().is_some_and(|w| w.is_running()) {
            // the committed prompts carry over, so the rebuilt worker resumes
            self.worker = None;
        }
        let worker = self.prompt_worker(sink).map_err(|e| self.record_error(e))?;
        observer.worker_started(&worker);

        match self.run_worker(worker).await? {
            RunOutcome::Completed { generated, skipped } => {
                tracing::info!(generated, skipped, "prompt stage finished");
                Ok(true)
            }
            RunOutcome::AlreadyRunning => Ok(false),
            RunOutcome::Failed { error, .. } | RunOutcome::Refused(error) => Err(error),
            RunOutcome::Cancelled => {
                self.cancel().await;
                Err(GenError::Cancelled)
            }
        }
    }

    /// Run every remaining stage in order until `until` is reached, a stage
    /// fails or `observer` declines the next one. Returns the stage reached.
    pub async fn run_through(&mut self, until: Stage, observer: &dyn StageObserver) -> Result<Stage, GenError> {
        if self.session.generation_id.is_none() {
            self.submit().await?;
        }
        while self.session.stage < until {
            let next = match self.session.stage.next() {
                None => break,
                // summary is reached by finishing the prompt stage
                Some(Stage::Summary) => Stage::Prompts,
                Some(stage) => stage,
            };
            if !observer.proceed(next) {
                tracing::debug!(stage = %next, "stopped before stage");
                break;
            }
            let result = match next {
                Stage::Prd => self.generate_prd().await.map(|_| true),
                Stage::UserFlows => self.generate_user_flows().await.map(|_| true),
                Stage::Tasks => self.generate_tasks().await.map(|_| true),
                Stage::Lists => self.generate_lists().await.map(|_| true),
                _ => self.prompt_stage(observer).await,
            };
            match result {
                Ok(true) => observer.finished(next, &self.session),
                Ok(false) => break,
                Err(e) => {
                    observer.failed(next, &e);
                    return Err(e);
                }
            }
        }
        Ok(self.session.stage)
    }

    /// Show an earlier stage again. Nothing generated is discarded; moving
    /// forward goes through the stage operations.
    pub fn back_to(&mut self, stage: Stage) -> Result<(), GenError> {
        if stage > self.session.stage {
            return Err(GenError::Validation(format!(
                "cannot go back to {} from {}",
                stage.display_name(),
                self.session.stage.display_name()
            )));
        }
        tracing::debug!(from = %self.session.stage, to = %stage, "moving back");
        self.session.stage = stage;
        Ok(())
    }

    /// Stop generating. The status write is best effort.
    pub async fn cancel(&mut self) {
        if let Some(w) = self.worker.take() {
            tracing::debug!(running = w.is_running(), "cancelling prompt worker");
            w.cancel();
        }
        if let Some(id) = &self.session.generation_id {
            if let Err(e) = self.backend.update_generation_status(id, GenerationStatus::Cancelled).await {
                tracing::warn!(generation_id = %id, error = %e, "could not mark generation cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::wire::{PromptCategory, UsageStats};

    fn form(selected: &[PromptCategory]) -> WizardForm {
        WizardForm {
            project_name: "Recipe Box".into(),
            project_description: "Save and share recipes".into(),
            selected_prompt_types: SelectedPromptTypes::only(selected),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_frontend_only_end_to_end() {
        let mock = Arc::new(
            MockBackend::new()
                .with_lists(PromptCategory::Frontend, &["Home Screen", "Settings Screen"])
                .with_lists(PromptCategory::Backend, &["GET /api/recipes"]),
        );
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));

        let stage = driver.run_through(Stage::Summary, &Unattended).await.unwrap();
        assert_eq!(stage, Stage::Summary);
        assert_eq!(
            mock.item_calls(),
            vec![
                (PromptCategory::Frontend, "Home Screen".to_string()),
                (PromptCategory::Frontend, "Settings Screen".to_string()),
            ]
        );
        assert_eq!(driver.session().prompts.count(PromptCategory::Frontend), 2);
        assert_eq!(
            mock.state.lock().approvals,
            vec!["form", "prd", "user_flows", "tasks", "lists", "prompts"]
        );
    }

    #[tokio::test]
    async fn test_low_quota_blocks_submission() {
        let mock = Arc::new(MockBackend::new());
        mock.state.lock().stats = Some(UsageStats { remaining_prompts: 9, is_pro: false });
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));

        let err = driver.submit().await.unwrap_err();
        assert_eq!(err, GenError::QuotaExceeded { remaining: 9, required: 10 });
        assert!(!mock.calls().contains(&"create_generation".to_string()));
        assert_eq!(driver.session().generation_id, None);
    }

    #[tokio::test]
    async fn test_pro_user_ignores_quota() {
        let mock = Arc::new(MockBackend::new());
        mock.state.lock().stats = Some(UsageStats { remaining_prompts: 0, is_pro: true });
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));
        assert_eq!(driver.submit().await.unwrap(), "gen-1");
    }

    #[tokio::test]
    async fn test_invalid_form_is_not_submitted() {
        let mock = Arc::new(MockBackend::new());
        let mut driver = Driver::new(mock.clone(), "u1", WizardForm::default());
        assert!(matches!(driver.submit().await, Err(GenError::Validation(_))));
        assert!(!mock.calls().contains(&"create_generation".to_string()));
    }

    #[tokio::test]
    async fn test_empty_prd_does_not_advance() {
        let mock = Arc::new(MockBackend::new());
        mock.state.lock().prd = Some("   \n".into());
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));
        driver.submit().await.unwrap();

        let err = driver.generate_prd().await.unwrap_err();
        assert_eq!(err, GenError::EmptyContent { stage: Stage::Prd });
        assert!(err.to_string().contains("PRD"));
        assert_eq!(driver.stage(), Stage::Form);
        assert_eq!(driver.session().prd, None);
        assert!(mock.state.lock().approvals.is_empty());

        mock.state.lock().prd = Some("# PRD".into());
        driver.generate_prd().await.unwrap();
        assert_eq!(driver.stage(), Stage::Prd);
    }

    #[tokio::test]
    async fn test_missing_prerequisites_are_listed() {
        let mock = Arc::new(MockBackend::new());
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));
        driver.submit().await.unwrap();

        let err = driver.generate_tasks().await.unwrap_err();
        assert_eq!(err, GenError::MissingPrerequisite { stage: Stage::Tasks, missing: vec!["PRD", "user flows"] });
        assert!(!mock.calls().contains(&"generate_task_file".to_string()));
    }

    #[tokio::test]
    async fn test_prd_needs_a_record() {
        let mock = Arc::new(MockBackend::new());
        let mut driver = Driver::new(mock, "u1", form(&[PromptCategory::Frontend]));
        let err = driver.generate_prd().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot generate prd: missing generation record");
    }

    #[tokio::test]
    async fn test_empty_lists_are_rejected() {
        let mock = Arc::new(MockBackend::new().with_lists(PromptCategory::Backend, &["GET /api/x"]));
        let mut driver = Driver::new(mock, "u1", form(&[PromptCategory::Frontend]));
        let err = driver.run_through(Stage::Lists, &Unattended).await.unwrap_err();
        assert_eq!(err, GenError::EmptyContent { stage: Stage::Lists });
        assert_eq!(driver.stage(), Stage::Tasks);
    }

    #[tokio::test]
    async fn test_stage_artifacts_are_saved() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new());
        let mut driver =
            Driver::new(mock, "u1", form(&[PromptCategory::Frontend])).with_artifacts(tmp.path().to_path_buf());
        driver.run_through(Stage::Prd, &Unattended).await.unwrap();

        let dir = artifacts::generation_dir(tmp.path(), "gen-1");
        assert!(dir.join("prd.md").exists());
        let req = std::fs::read_to_string(dir.join("prd.request.json")).unwrap();
        assert!(req.contains("Recipe Box"));
    }

    #[tokio::test]
    async fn test_back_keeps_outputs() {
        let mock = Arc::new(MockBackend::new());
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));
        driver.run_through(Stage::Tasks, &Unattended).await.unwrap();

        driver.back_to(Stage::Prd).unwrap();
        assert_eq!(driver.stage(), Stage::Prd);
        assert!(driver.session().task_file.is_some());
        assert!(driver.back_to(Stage::Tasks).is_err());

        mock.state.lock().user_flows = Some("# Flows v2".into());
        driver.generate_user_flows().await.unwrap();
        assert_eq!(driver.stage(), Stage::UserFlows);
        assert_eq!(driver.session().user_flows.as_deref(), Some("# Flows v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_prompt_keeps_stage_and_retries() {
        let mock = Arc::new(MockBackend::new().with_lists(PromptCategory::Frontend, &["Home Screen", "Settings Screen"]));
        mock.state
            .lock()
            .failing_items
            .insert("Settings Screen".into(), GenError::Validation("bad item".into()));
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));

        let err = driver.run_through(Stage::Summary, &Unattended).await.unwrap_err();
        assert_eq!(err, GenError::Validation("bad item".into()));
        assert_eq!(driver.stage(), Stage::Prompts);
        assert_eq!(driver.session().prompts.total(), 1);

        mock.state.lock().failing_items.clear();
        let outcome = driver.generate_prompts(None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { generated: 1, skipped: 1 });
        assert_eq!(driver.stage(), Stage::Summary);
    }

    #[tokio::test]
    async fn test_cancel_marks_record() {
        let mock = Arc::new(MockBackend::new());
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));
        driver.submit().await.unwrap();
        driver.cancel().await;
        assert_eq!(mock.state.lock().statuses, vec![GenerationStatus::Cancelled]);
    }

    #[tokio::test]
    async fn test_resume_positions_after_last_output() {
        let mock = Arc::new(MockBackend::new());
        let mut lists = GeneratedLists::default();
        lists.insert(PromptCategory::Frontend, vec!["Home Screen".into()]);
        mock.state.lock().record = Some(GenerationRecord {
            generation_id: "gen-9".into(),
            user_id: "u1".into(),
            form_data: form(&[PromptCategory::Frontend]),
            selected_prompt_types: SelectedPromptTypes::only(&[PromptCategory::Frontend]),
            prd: Some("p".into()),
            user_flows: Some("f".into()),
            task_file: Some("t".into()),
            lists: Some(lists),
            ..Default::default()
        });

        let driver = Driver::resume(mock, "gen-9").await.unwrap();
        assert_eq!(driver.stage(), Stage::Lists);
        assert_eq!(driver.session().generation_id.as_deref(), Some("gen-9"));
        assert!(driver.session().missing_for(Stage::Prompts).is_empty());
    }

    #[derive(Default)]
    struct Recorder {
        stop_at: Option<Stage>,
        cancel_worker: bool,
        events: parking_lot::Mutex<Vec<String>>,
    }

    impl StageObserver for Recorder {
        fn proceed(&self, stage: Stage) -> bool {
            self.stop_at != Some(stage)
        }

        fn worker_started(&self, worker: &Arc<PromptWorker>) {
            if self.cancel_worker {
                worker.cancel();
            }
        }

        fn finished(&self, stage: Stage, _session: &Session) {
            self.events.lock().push(format!("done {stage}"));
        }

        fn failed(&self, stage: Stage, error: &GenError) {
            self.events.lock().push(format!("failed {stage}: {error}"));
        }
    }

    #[tokio::test]
    async fn test_observer_can_stop_before_a_stage() {
        let mock = Arc::new(MockBackend::new().with_lists(PromptCategory::Frontend, &["Home Screen"]));
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));
        let rec = Recorder { stop_at: Some(Stage::Prompts), ..Default::default() };

        let reached = driver.run_through(Stage::Summary, &rec).await.unwrap();
        assert_eq!(reached, Stage::Lists);
        assert!(mock.item_calls().is_empty());
        assert_eq!(*rec.events.lock(), vec!["done prd", "done user_flows", "done tasks", "done lists"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_hears_prompt_failure() {
        let mock = Arc::new(MockBackend::new().with_lists(PromptCategory::Frontend, &["Home Screen"]));
        mock.state.lock().failing_items.insert("Home Screen".into(), GenError::Validation("bad item".into()));
        let mut driver = Driver::new(mock, "u1", form(&[PromptCategory::Frontend]));
        let rec = Recorder::default();

        assert!(driver.run_through(Stage::Summary, &rec).await.is_err());
        assert_eq!(rec.events.lock().last().map(String::as_str), Some("failed prompts: validation failed: bad item"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_can_be_started_again() {
        let mock = Arc::new(MockBackend::new().with_lists(PromptCategory::Frontend, &["Home Screen", "Settings Screen"]));
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));
        let rec = Recorder { cancel_worker: true, ..Default::default() };

        let err = driver.run_through(Stage::Summary, &rec).await.unwrap_err();
        assert_eq!(err, GenError::Cancelled);
        assert_eq!(mock.state.lock().statuses, vec![GenerationStatus::Cancelled]);
        assert!(mock.item_calls().is_empty());

        let outcome = driver.generate_prompts(None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { generated: 2, skipped: 0 });
        assert_eq!(driver.stage(), Stage::Summary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_the_spent_worker() {
        let mock = Arc::new(MockBackend::new().with_lists(PromptCategory::Frontend, &["Home Screen"]));
        let mut driver = Driver::new(mock.clone(), "u1", form(&[PromptCategory::Frontend]));
        driver.run_through(Stage::Lists, &Unattended).await.unwrap();

        let first = driver.prompt_worker(None).unwrap();
        driver.cancel().await;
        assert!(first.cancel_token().is_cancelled());

        let outcome = driver.generate_prompts(None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { generated: 1, skipped: 0 });
        assert_eq!(mock.item_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_ignores_prompts_off_the_list() {
        let mock = Arc::new(MockBackend::new());
        let mut lists = GeneratedLists::default();
        lists.insert(PromptCategory::Frontend, vec!["Cart Screen".into(), "Checkout Screen".into()]);
        let mut prompts = PromptSet::default();
        for title in ["Home Screen", "Settings Screen"] {
            prompts.push(PromptCategory::Frontend, crate::wire::PromptItem { title: title.into(), prompt: "p".into() });
        }
        mock.state.lock().record = Some(GenerationRecord {
            generation_id: "gen-3".into(),
            user_id: "u1".into(),
            form_data: form(&[PromptCategory::Frontend]),
            selected_prompt_types: SelectedPromptTypes::only(&[PromptCategory::Frontend]),
            prd: Some("p".into()),
            user_flows: Some("f".into()),
            task_file: Some("t".into()),
            lists: Some(lists),
            prompts,
            ..Default::default()
        });

        let driver = Driver::resume(mock, "gen-3").await.unwrap();
        assert_eq!(driver.stage(), Stage::Lists);
    }

    #[test]
    fn test_session_stage_from_partial_record() {
        let rec = GenerationRecord { generation_id: "g".into(), prd: Some("p".into()), user_flows: Some("".into()), ..Default::default() };
        let s = Session::from_record(rec);
        assert_eq!(s.stage, Stage::Prd);
        assert_eq!(s.user_flows, None);
    }
}
