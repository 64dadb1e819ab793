//! Per-item prompt worker.
//!
//! Drains the selected categories' item lists one item at a time, in
//! category order then list order. Only one `run` may be in flight; a
//! concurrent call returns `RunOutcome::AlreadyRunning` and does nothing.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backend::DynBackend;
use crate::errors::GenError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::Store;
use crate::wire::{
    GeneratedLists, ItemRequest, PromptCategory, PromptItem, PromptSet, SelectedPromptTypes, Stage, StageInput,
    WizardForm,
};

/// Owned snapshot of everything an item prompt depends on.
#[derive(Debug, Clone)]
pub struct PromptJob {
    pub generation_id: String,
    pub user_id: String,
    pub form: WizardForm,
    pub prd: String,
    pub user_flows: String,
    pub task_file: String,
    pub lists: GeneratedLists,
    pub selected: SelectedPromptTypes,
}

impl PromptJob {
    fn stage_input(&self) -> StageInput<'_> {
        StageInput {
            generation_id: &self.generation_id,
            user_id: &self.user_id,
            form_data: &self.form,
            prd: Some(&self.prd),
            user_flows: Some(&self.user_flows),
            task_file: Some(&self.task_file),
            selected_prompt_types: None,
        }
    }

    /// Every `(category, item)` pair in generation order.
    pub fn queue(&self) -> Vec<(PromptCategory, String)> {
        self.selected
            .selected()
            .into_iter()
            .flat_map(|c| self.lists.items(c).iter().map(move |i| (c, i.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Generating { category: PromptCategory, item: String },
    Error { category: PromptCategory, item: String, error: GenError },
    Done,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { generated: usize, skipped: usize },
    AlreadyRunning,
    Refused(GenError),
    Failed { category: PromptCategory, item: String, error: GenError },
    Cancelled,
}

/// Hooks for showing per-item progress.
pub trait ProgressSink: Send + Sync {
    fn started(&self, _category: PromptCategory, _item: &str, _done: usize, _total: usize) {}
    fn finished(&self, _category: PromptCategory, _item: &str, _done: usize, _total: usize) {}
    fn skipped(&self, _category: PromptCategory, _item: &str) {}
}

struct WorkerState {
    status: WorkerStatus,
    completed: PromptSet,
}

struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok().map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PromptWorker {
    backend: DynBackend,
    job: PromptJob,
    policy: RetryPolicy,
    item_delay: Duration,
    store: Option<Arc<Store>>,
    sink: Option<Arc<dyn ProgressSink>>,
    state: Mutex<WorkerState>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl PromptWorker {
    pub fn new(backend: DynBackend, job: PromptJob, policy: RetryPolicy) -> Self {
        Self {
            backend,
            job,
            policy,
            item_delay: Duration::ZERO,
            store: None,
            sink: None,
            state: Mutex::new(WorkerState { status: WorkerStatus::Idle, completed: PromptSet::default() }),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Seed with prompts the backend already has.
    pub fn with_completed(self, prompts: PromptSet) -> Self {
        {
            let mut st = self.state.lock();
            merge(&mut st.completed, prompts);
        }
        self
    }

    /// Persist progress to `store` and pick up a fresh saved snapshot.
    pub fn with_store(mut self, store: Arc<Store>) -> anyhow::Result<Self> {
        if let Some(saved) = store.restore_progress(&self.job.generation_id, chrono::Utc::now())? {
            tracing::info!(generation_id = %self.job.generation_id, restored = saved.total(), "restored prompt progress");
            merge(&mut self.state.lock().completed, saved);
        }
        self.store = Some(store);
        Ok(self)
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn status(&self) -> WorkerStatus {
        self.state.lock().status.clone()
    }

    pub fn prompts(&self) -> PromptSet {
        self.state.lock().completed.clone()
    }

    /// `(completed, total)` over the selected categories.
    pub fn progress(&self) -> (usize, usize) {
        let st = self.state.lock();
        let queue = self.job.queue();
        let done = queue.iter().filter(|(c, i)| st.completed.contains(*c, i)).count();
        (done, queue.len())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_status(&self, status: WorkerStatus) {
        self.state.lock().status = status;
    }

    fn fail(&self, category: PromptCategory, item: String, error: GenError) -> RunOutcome {
        tracing::error!(category = %category, item = %item, error = %error, "item prompt generation failed");
        self.set_status(WorkerStatus::Error { category, item: item.clone(), error: error.clone() });
        RunOutcome::Failed { category, item, error }
    }

    fn cancelled(&self) -> RunOutcome {
        tracing::info!(generation_id = %self.job.generation_id, "prompt generation cancelled");
        self.set_status(WorkerStatus::Cancelled);
        RunOutcome::Cancelled
    }

    pub async fn run(&self) -> RunOutcome {
        let Some(_flight) = FlightGuard::acquire(&self.running) else {
            tracing::info!(generation_id = %self.job.generation_id, "prompt generation already running, ignoring call");
            return RunOutcome::AlreadyRunning;
        };
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }

        match self.backend.get_user_stats(&self.job.user_id).await {
            Ok(stats) => {
                if let Err(e) = crate::quota::check_single(&stats) {
                    tracing::warn!(error = %e, "prompt quota exhausted");
                    self.set_status(WorkerStatus::Idle);
                    return RunOutcome::Refused(e);
                }
            }
            // the backend enforces its own limit per item
            Err(e) => tracing::warn!(error = %e, "could not read usage stats, continuing"),
        }

        let queue = self.job.queue();
        let total = queue.len();
        let mut generated = 0;
        let mut skipped = 0;

        for (category, item) in queue {
            if self.cancel.is_cancelled() {
                return self.cancelled();
            }
            if self.state.lock().completed.contains(category, &item) {
                tracing::debug!(category = %category, item = %item, "already generated, skipping");
                skipped += 1;
                if let Some(s) = &self.sink {
                    s.skipped(category, &item);
                }
                continue;
            }

            self.set_status(WorkerStatus::Generating { category, item: item.clone() });
            let done = self.progress().0;
            if let Some(s) = &self.sink {
                s.started(category, &item, done, total);
            }

            let label = format!("{category}/{item}");
            let req = ItemRequest { stage: self.job.stage_input(), item_type: category, item_name: &item };
            let (backend, req) = (&self.backend, &req);
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(GenError::Cancelled),
                r = retry_with_backoff(&self.policy, &label, move || backend.generate_item_prompt(req)) => r,
            };

            let prompt = match result {
                Ok(p) if p.prompt.trim().is_empty() => {
                    return self.fail(category, item, GenError::EmptyContent { stage: Stage::Prompts });
                }
                Ok(p) => p.prompt,
                Err(GenError::Cancelled) => return self.cancelled(),
                Err(e) => return self.fail(category, item, e),
            };

            let snapshot = {
                let mut st = self.state.lock();
                st.completed.push(category, PromptItem { title: item.clone(), prompt });
                st.completed.clone()
            };
            generated += 1;
            tracing::info!(category = %category, item = %item, "item prompt generated");

            if let Some(store) = &self.store {
                if let Err(e) = store.save_progress(&self.job.generation_id, &snapshot) {
                    tracing::warn!(error = %e, "could not save prompt progress");
                }
            }
            if let Some(s) = &self.sink {
                s.finished(category, &item, self.progress().0, total);
            }

            if !self.item_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return self.cancelled(),
                    _ = tokio::time::sleep(self.item_delay) => {}
                }
            }
        }

        self.set_status(WorkerStatus::Done);
        tracing::info!(generation_id = %self.job.generation_id, generated, skipped, "all item prompts generated");
        RunOutcome::Completed { generated, skipped }
    }
}

fn merge(into: &mut PromptSet, from: PromptSet) {
    for (cat, items) in from.0 {
        for item in items {
            into.push(cat, item);
        }
    }
}
