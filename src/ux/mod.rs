use colored::Colorize;
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::time::Duration;

use crate::export::ExportSummary;
use crate::wire::{
    GeneratedLists, GenerationProgress, GenerationStatus, PromptCategory, PromptSet, SelectedPromptTypes, Stage,
    UsageStats,
};
use crate::worker::ProgressSink;

pub fn stage_banner(stage: Stage, project: &str) {
    let pos = Stage::all().iter().position(|s| *s == stage).unwrap_or(0);
    println!(
        "\n{} {}  {}",
        format!("[{}/{}]", pos, Stage::all().len() - 1).dimmed(),
        format!("=== {} ===", stage.display_name().to_uppercase()).bold(),
        project.cyan()
    );
}

/// First `max_lines` of a stage document.
pub fn show_document(stage: Stage, text: &str, max_lines: usize) {
    let lines: Vec<&str> = text.lines().collect();
    for l in lines.iter().take(max_lines) {
        println!("  {}", l);
    }
    if lines.len() > max_lines {
        println!(
            "  {}",
            format!("... {} more lines (saved with the {} output)", lines.len() - max_lines, stage.display_name()).dimmed()
        );
    }
}

pub fn show_lists(lists: &GeneratedLists, selected: &SelectedPromptTypes) {
    for cat in selected.selected() {
        let items = lists.items(cat);
        println!("{} {}", format!("{}:", cat.display_name()).bold(), format!("({})", items.len()).dimmed());
        if items.is_empty() {
            println!("  (none)");
        }
        for (i, item) in items.iter().enumerate() {
            println!("  {}. {}", i + 1, item);
        }
    }
    println!(
        "\n{} prompts will be generated, one request each.",
        lists.total_for(selected).to_string().bold()
    );
}

pub fn print_prompt_dashboard(prompts: &PromptSet, selected: &SelectedPromptTypes) {
    println!(
        "\n{}",
        "┏━━━━━━━━━━━━━━━━━━━━━━━ Prompts ━━━━━━━━━━━━━━━━━━━━━━━━━┓".bold()
    );
    let counts: Vec<String> = selected
        .selected()
        .into_iter()
        .map(|c| format!("{}: {}", category_label(c), prompts.count(c)))
        .collect();
    println!("  {}   {}: {}", counts.join("   "), "Total".bold(), prompts.total());
    println!("{}", "┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛".bold());

    for cat in selected.selected() {
        for item in prompts.items(cat) {
            println!("{} {}", format!("[{}]", cat.as_str()).dimmed(), item.title.bold());
            println!("{}\n", indent(item.prompt.trim(), 2));
        }
    }
}

fn category_label(c: PromptCategory) -> colored::ColoredString {
    let name = c.display_name();
    match c {
        PromptCategory::Frontend => name.green().bold(),
        PromptCategory::Backend => name.yellow().bold(),
        PromptCategory::Security => name.red().bold(),
        PromptCategory::Functionality => name.cyan().bold(),
        PromptCategory::ErrorFixing => name.magenta().bold(),
    }
}

pub fn print_progress(id: &str, p: &GenerationProgress) {
    let status = match p.status {
        GenerationStatus::Completed => "completed".green(),
        GenerationStatus::Cancelled | GenerationStatus::Failed => format!("{:?}", p.status).to_lowercase().red(),
        _ => format!("{:?}", p.status).to_lowercase().yellow(),
    };
    println!("{} {}  {}", "Generation".bold(), id, status);
    println!("  {}/{} item prompts", p.completed_items, p.total_items);
    for cat in PromptCategory::all() {
        let titles = p.prompts.titles(*cat);
        if !titles.is_empty() {
            println!("  {}: {}", category_label(*cat), titles.join(", "));
        }
    }
}

pub fn print_stats(stats: &UsageStats) {
    if stats.is_pro {
        println!("{} unlimited prompts", "Pro".green().bold());
    } else {
        let n = stats.remaining_prompts.to_string();
        let shown = if stats.remaining_prompts < crate::quota::BULK_THRESHOLD { n.red() } else { n.green() };
        println!("{} prompts remaining this month", shown.bold());
    }
}

pub fn print_export(summary: &ExportSummary) {
    println!(
        "{} {}  ({} file(s), {})",
        "Exported".green().bold(),
        summary.path.display(),
        summary.files,
        format_size(summary.bytes, DECIMAL)
    );
}

pub fn print_error(err: &dyn std::fmt::Display) {
    eprintln!("{} {}", "error:".red().bold(), err);
}

pub fn confirm(prompt: &str) -> bool {
    print!("{} [y/N]: ", prompt);
    let _ = io::stdout().flush();
    let mut s = String::new();
    if io::stdin().read_line(&mut s).is_ok() {
        let ans = s.trim().to_lowercase();
        ans == "y" || ans == "yes"
    } else {
        false
    }
}

/// Progress bar over the worker's item queue.
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarSink {
    fn started(&self, category: PromptCategory, item: &str, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
        self.bar.set_message(format!("{} {}", category.item_noun(), item));
    }

    fn finished(&self, _category: PromptCategory, item: &str, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
        self.bar.println(format!("  {} {}", "✓".green(), item));
    }

    fn skipped(&self, _category: PromptCategory, item: &str) {
        self.bar.inc(1);
        self.bar.println(format!("  {} {} (already generated)", "·".dimmed(), item));
    }
}

fn indent(s: &str, n: usize) -> String {
    let pad = " ".repeat(n);
    s.lines()
        .map(|l| format!("{}{}", pad, l))
        .collect::<Vec<_>>()
        .join("\n")
}
