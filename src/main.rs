use anyhow::{anyhow, Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod backend;
mod cli;
mod config;
mod errors;
mod export;
mod form;
mod pipeline;
mod prompt;
mod provider;
mod quota;
mod retry;
mod store;
mod ux;
mod wire;
mod worker;

use cli::{Command, ExportFormat, FormAction};
use errors::GenError;
use pipeline::{Driver, Session, StageObserver};
use wire::{GenerationStatus, Stage, WizardForm};
use worker::{ProgressSink, PromptWorker, WorkerStatus};

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();
}

fn read_form(path: &Path) -> Result<WizardForm> {
    let text = fs_err::read_to_string(path)?;
    serde_json::from_str(&text).with_context(|| format!("invalid wizard JSON in {}", path.display()))
}

fn driver_for(cfg: &config::Config, store: &Arc<store::Store>, driver: Driver) -> Driver {
    let driver = driver
        .with_policy(cfg.retry_policy())
        .with_item_delay(Duration::from_millis(cfg.item_delay_ms))
        .with_store(store.clone());
    if cfg.save_artifacts {
        driver.with_artifacts(cfg.data_dir.clone())
    } else {
        driver
    }
}

/// Terminal side of a stage run: asks before each stage, shows its output
/// and ties Ctrl-C to the prompt worker.
struct Console {
    project: String,
    yes: bool,
    bar: Mutex<Option<Arc<ux::BarSink>>>,
    worker: Mutex<Option<Arc<PromptWorker>>>,
    ctrl_c: Mutex<Option<JoinHandle<()>>>,
}

impl Console {
    fn new(project: &str, yes: bool) -> Self {
        Self {
            project: project.to_string(),
            yes,
            bar: Mutex::new(None),
            worker: Mutex::new(None),
            ctrl_c: Mutex::new(None),
        }
    }

    fn end_prompt_run(&self) {
        if let Some(bar) = self.bar.lock().take() {
            bar.finish();
        }
        if let Some(handle) = self.ctrl_c.lock().take() {
            handle.abort();
        }
    }
}

impl StageObserver for Console {
    fn proceed(&self, stage: Stage) -> bool {
        if !self.yes && !ux::confirm(&format!("Generate {}?", stage.display_name())) {
            return false;
        }
        ux::stage_banner(stage, &self.project);
        true
    }

    fn prompt_sink(&self, total: usize) -> Option<Arc<dyn ProgressSink>> {
        let bar = Arc::new(ux::BarSink::new(total));
        *self.bar.lock() = Some(bar.clone());
        Some(bar)
    }

    fn worker_started(&self, worker: &Arc<PromptWorker>) {
        let token = worker.cancel_token();
        let handle = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
        *self.ctrl_c.lock() = Some(handle);
        *self.worker.lock() = Some(worker.clone());
    }

    fn finished(&self, stage: Stage, s: &Session) {
        self.end_prompt_run();
        match stage {
            Stage::Prd => ux::show_document(stage, s.prd.as_deref().unwrap_or_default(), 20),
            Stage::UserFlows => ux::show_document(stage, s.user_flows.as_deref().unwrap_or_default(), 20),
            Stage::Tasks => ux::show_document(stage, s.task_file.as_deref().unwrap_or_default(), 20),
            Stage::Lists => {
                if let Some(lists) = &s.lists {
                    ux::show_lists(lists, &s.selected());
                }
            }
            _ => {}
        }
    }

    fn failed(&self, stage: Stage, error: &GenError) {
        self.end_prompt_run();
        ux::print_error(error);
        let Some(worker) = self.worker.lock().take() else { return };
        match worker.status() {
            WorkerStatus::Error { category, item, .. } => {
                println!(
                    "{} stopped at {} {}. Generated prompts are kept; `resume` retries from there.",
                    stage.display_name(),
                    category.item_noun(),
                    item
                );
            }
            WorkerStatus::Cancelled => println!("Cancelled. Generated prompts are kept."),
            _ => {}
        }
    }
}

/// Walk the remaining stages up to `until` and report where the run ended.
async fn run_stages(driver: &mut Driver, until: Stage, yes: bool) -> Result<()> {
    let console = Console::new(&driver.session().form.project_name, yes);
    let reached = driver.run_through(until, &console).await.context("generation stopped")?;

    let s = driver.session();
    if reached == Stage::Summary {
        ux::print_prompt_dashboard(&s.prompts, &s.selected());
        if let Some(id) = &s.generation_id {
            println!("Export with `export {id}`.");
        }
    } else if reached < until {
        if let Some(id) = &s.generation_id {
            println!("Stopped. Continue later with `resume {id}`.");
        }
    }
    Ok(())
}

fn parse_stage(s: &str) -> Result<Stage> {
    Stage::parse(s).ok_or_else(|| anyhow!("unknown stage `{s}`"))
}

fn default_export_path(project: &str, format: ExportFormat) -> PathBuf {
    let ext = match format {
        ExportFormat::Zip => "zip",
        ExportFormat::Markdown => "md",
        ExportFormat::Text => "txt",
    };
    let stem = export::slugify(if project.is_empty() { "prompts" } else { project });
    PathBuf::from(format!("{stem}-prompts.{ext}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_logging(args.debug);

    let cfg = config::Config::from_args(&args)?;
    let store = Arc::new(store::Store::open(cfg.store_path())?);
    store.prune_progress(chrono::Utc::now())?;
    let forms = form::FormStore::new(store.clone());
    let connect = || backend::make_backend(&cfg, store.clone());
    tracing::debug!(data_dir = %cfg.data_dir.display(), backend = ?cfg.backend, "starting");

    match args.command {
        Command::Form { wizard, action } => match action {
            FormAction::Show => {
                println!("{}", serde_json::to_string_pretty(&forms.load(&wizard)?)?);
            }
            FormAction::Set { key, value } => {
                forms.update_field(&wizard, &key, &value)?;
                println!("{key} saved");
            }
            FormAction::Clear => {
                if forms.clear(&wizard)? {
                    println!("Cleared saved answers for {wizard}");
                }
            }
            FormAction::Prefill { file } => {
                forms.set_prefill(&read_form(&file)?)?;
                println!("Prefill staged; the next `generate` picks it up");
            }
        },
        Command::Generate { wizard, form, yes, until } => {
            let form = match form {
                Some(path) => {
                    let f = read_form(&path)?;
                    forms.save(&wizard, &f)?;
                    f
                }
                None => forms.load_with_prefill(&wizard)?,
            };
            let until = match until.as_deref() {
                Some(s) => parse_stage(s)?,
                None => Stage::Summary,
            };

            let mut driver = driver_for(&cfg, &store, Driver::new(connect()?, &cfg.user_id, form));
            let id = match driver.submit().await {
                Ok(id) => id,
                Err(e) => {
                    ux::print_error(&e);
                    return Err(anyhow::Error::new(e).context("submission refused"));
                }
            };
            println!("Generation {id} created");
            run_stages(&mut driver, until, yes).await?;
        }
        Command::Resume { generation_id, yes, from } => {
            let driver = Driver::resume(connect()?, &generation_id).await?;
            let mut driver = driver_for(&cfg, &store, driver);
            if let Some(s) = from.as_deref() {
                let stage = parse_stage(s)?;
                // regenerating `stage` starts from the one before it
                driver.back_to(stage.previous().unwrap_or(Stage::Form))?;
            }
            println!("Resuming {} at {}", generation_id, driver.stage().display_name());
            run_stages(&mut driver, Stage::Summary, yes).await?;
        }
        Command::Status { generation_id } => {
            let progress = connect()?.get_generation_progress(&generation_id).await?;
            ux::print_progress(&generation_id, &progress);
            if let Some(cached) = store.restore_progress(&generation_id, chrono::Utc::now())? {
                println!("  {} prompt(s) cached locally", cached.total());
            }
        }
        Command::Cancel { generation_id } => {
            connect()?.update_generation_status(&generation_id, GenerationStatus::Cancelled).await?;
            println!("Generation {generation_id} cancelled");
        }
        Command::Export { generation_id, format, out } => {
            let rec = connect()?.get_generation(&generation_id).await?;
            let path = out.unwrap_or_else(|| default_export_path(&rec.form_data.project_name, format));
            let summary = match format {
                ExportFormat::Zip => export::write_zip(&rec, &path)?,
                ExportFormat::Markdown => export::write_markdown(&rec, &path)?,
                ExportFormat::Text => export::write_text(&rec.prompts, &path)?,
            };
            ux::print_export(&summary);
        }
        Command::Stats => {
            let stats = connect()?.get_user_stats(&cfg.user_id).await?;
            ux::print_stats(&stats);
        }
    }

    Ok(())
}
