use anyhow::{Context, Result};
use fs_err as fs;
use regex::Regex;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::wire::{GenerationRecord, PromptCategory, PromptSet, WizardForm};

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

/// Lowercase, dash-separated file stem for a prompt title.
pub fn slugify(title: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    let re = NON_WORD.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is a valid regex"));
    let lower = title.to_lowercase();
    let slug = re.replace_all(&lower, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.chars().take(80).collect::<String>().trim_end_matches('-').to_string()
    }
}

/// Write `bytes` through a temp file in the target directory so a failed
/// export never leaves a half-written file behind.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<u64> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(bytes.len() as u64)
}

fn prompts_markdown(out: &mut String, prompts: &PromptSet) {
    for cat in PromptCategory::all() {
        let items = prompts.items(*cat);
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "## {} Prompts\n", cat.display_name());
        for item in items {
            let _ = writeln!(out, "### {}\n\n{}\n", item.title, item.prompt.trim());
        }
    }
}

pub fn render_markdown(rec: &GenerationRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", project_name(rec));
    if !rec.form_data.project_description.is_empty() {
        let _ = writeln!(out, "{}\n", rec.form_data.project_description);
    }
    for (title, body) in [("PRD", &rec.prd), ("User Flows", &rec.user_flows), ("Tasks", &rec.task_file)] {
        if let Some(text) = body {
            let _ = writeln!(out, "## {title}\n\n{}\n", text.trim());
        }
    }
    prompts_markdown(&mut out, &rec.prompts);
    out
}

pub fn render_text(prompts: &PromptSet) -> String {
    let mut out = String::new();
    for cat in PromptCategory::all() {
        for item in prompts.items(*cat) {
            let _ = writeln!(out, "[{}] {}\n{}\n", cat.display_name(), item.title, item.prompt.trim());
        }
    }
    out
}

/// Every stage document and prompt as one Markdown file.
pub fn write_markdown(rec: &GenerationRecord, path: &Path) -> Result<ExportSummary> {
    let bytes = write_atomic(path, render_markdown(rec).as_bytes())?;
    tracing::info!(path = %path.display(), bytes, "markdown export written");
    Ok(ExportSummary { path: path.to_path_buf(), files: 1, bytes })
}

/// Prompts only, as plain text.
pub fn write_text(prompts: &PromptSet, path: &Path) -> Result<ExportSummary> {
    let bytes = write_atomic(path, render_text(prompts).as_bytes())?;
    tracing::info!(path = %path.display(), bytes, "text export written");
    Ok(ExportSummary { path: path.to_path_buf(), files: 1, bytes })
}

fn project_name(rec: &GenerationRecord) -> &str {
    if !rec.form_data.project_name.is_empty() {
        &rec.form_data.project_name
    } else if !rec.project_name.is_empty() {
        &rec.project_name
    } else {
        "Untitled Project"
    }
}

fn readme(rec: &GenerationRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", project_name(rec));
    let _ = writeln!(out, "{}\n", "=".repeat(project_name(rec).chars().count()));
    if !rec.form_data.project_description.is_empty() {
        let _ = writeln!(out, "{}\n", rec.form_data.project_description);
    }
    let _ = writeln!(out, "Generation: {}", rec.generation_id);
    let _ = writeln!(out, "Total prompts: {}\n", rec.prompts.total());
    for cat in PromptCategory::all() {
        let n = rec.prompts.count(*cat);
        if n > 0 {
            let _ = writeln!(out, "  {}/  {} prompt(s)", cat.as_str(), n);
        }
    }
    out.push_str("\nEach folder holds one Markdown file per prompt. Feed them to your coding assistant in order.\n");
    out
}

/// Editor rules derived from the stack and coding preferences.
pub fn cursor_rules(form: &WizardForm) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Project: {}\n", if form.project_name.is_empty() { "Untitled" } else { &form.project_name });
    let stack = &form.tech_stack;
    for (label, items) in [
        ("Frontend", &stack.frontend),
        ("Backend", &stack.backend),
        ("Database", &stack.database),
        ("Hosting", &stack.hosting),
    ] {
        if !items.is_empty() {
            let _ = writeln!(out, "- {label}: {}", items.join(", "));
        }
    }
    if form.authentication {
        out.push_str("- Authentication is required; protect every private route and endpoint.\n");
    }
    if !form.design_style.is_empty() {
        let _ = writeln!(out, "- Design style: {}", form.design_style);
    }
    if !form.coding_preferences.is_empty() {
        out.push_str("\n## Coding preferences\n");
        for p in &form.coding_preferences {
            let _ = writeln!(out, "- {p}");
        }
    }
    out
}

/// Folder per category with one Markdown file per prompt, plus a README,
/// `.cursorrules` and the stage documents under `docs/`.
pub fn write_zip(rec: &GenerationRecord, path: &Path) -> Result<ExportSummary> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let tmp = NamedTempFile::new_in(parent)?;
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(tmp.reopen()?);
    let mut files = 0usize;

    let mut add = |zip: &mut ZipWriter<std::fs::File>, name: String, body: &str| -> Result<()> {
        zip.start_file(name.as_str(), opts).with_context(|| format!("zip entry {name}"))?;
        zip.write_all(body.as_bytes())?;
        files += 1;
        Ok(())
    };

    add(&mut zip, "README.txt".into(), &readme(rec))?;
    add(&mut zip, ".cursorrules".into(), &cursor_rules(&rec.form_data))?;
    for (name, body) in [("PRD.md", &rec.prd), ("USER_FLOWS.md", &rec.user_flows), ("TASKS.md", &rec.task_file)] {
        if let Some(text) = body {
            add(&mut zip, format!("docs/{name}"), text)?;
        }
    }

    // the index prefix keeps names unique inside a category folder
    for cat in PromptCategory::all() {
        for (i, item) in rec.prompts.items(*cat).iter().enumerate() {
            let stem = format!("{:02}-{}", i + 1, slugify(&item.title));
            let body = format!("# {}\n\n{}\n", item.title, item.prompt.trim());
            add(&mut zip, format!("{}/{stem}.md", cat.as_str()), &body)?;
        }
    }

    zip.finish()?;
    let bytes = tmp.as_file().metadata()?.len();
    tmp.persist(path).with_context(|| format!("cannot write {}", path.display()))?;
    tracing::info!(path = %path.display(), files, bytes, "zip export written");
    Ok(ExportSummary { path: path.to_path_buf(), files, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{PromptItem, TechStack};
    use std::io::Read;

    fn record() -> GenerationRecord {
        let mut prompts = PromptSet::default();
        prompts.push(PromptCategory::Frontend, PromptItem { title: "Home Screen".into(), prompt: "Build home".into() });
        prompts.push(PromptCategory::Frontend, PromptItem { title: "Settings / Profile".into(), prompt: "Build settings".into() });
        prompts.push(PromptCategory::Backend, PromptItem { title: "GET /api/recipes".into(), prompt: "List recipes".into() });
        GenerationRecord {
            generation_id: "gen-1".into(),
            form_data: WizardForm {
                project_name: "Recipe Box".into(),
                project_description: "Save recipes".into(),
                tech_stack: TechStack { frontend: vec!["Next.js".into()], ..Default::default() },
                coding_preferences: vec!["TypeScript strict mode".into()],
                ..Default::default()
            },
            prd: Some("# PRD\nbody".into()),
            task_file: Some("- [ ] task".into()),
            prompts,
            ..Default::default()
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("GET /api/recipes"), "get-api-recipes");
        assert_eq!(slugify("  Home Screen!! "), "home-screen");
        assert_eq!(slugify("???"), "untitled");
        assert_eq!(slugify("Café Menü"), "caf-men");
    }

    #[test]
    fn test_zip_keeps_prompts_with_the_same_title() {
        let mut rec = record();
        rec.prompts.push(PromptCategory::Backend, PromptItem { title: "GET /api/recipes!".into(), prompt: "Again".into() });
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dupes.zip");
        write_zip(&rec, &path).unwrap();

        let archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        let names: Vec<&str> = archive.file_names().filter(|n| n.starts_with("backend/")).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"backend/01-get-api-recipes.md"));
        assert!(names.contains(&"backend/02-get-api-recipes.md"));
    }

    #[test]
    fn test_zip_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out/recipe-box.zip");
        let summary = write_zip(&record(), &path).unwrap();
        assert_eq!(summary.files, 7);
        assert!(summary.bytes > 0);

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                ".cursorrules",
                "README.txt",
                "backend/01-get-api-recipes.md",
                "docs/PRD.md",
                "docs/TASKS.md",
                "frontend/01-home-screen.md",
                "frontend/02-settings-profile.md",
            ]
        );

        let mut readme = String::new();
        archive.by_name("README.txt").unwrap().read_to_string(&mut readme).unwrap();
        assert!(readme.contains("Recipe Box"));
        assert!(readme.contains("Total prompts: 3"));

        let mut rules = String::new();
        archive.by_name(".cursorrules").unwrap().read_to_string(&mut rules).unwrap();
        assert!(rules.contains("Frontend: Next.js"));
        assert!(rules.contains("TypeScript strict mode"));
    }

    #[test]
    fn test_markdown_includes_documents_and_prompts() {
        let md = render_markdown(&record());
        assert!(md.starts_with("# Recipe Box"));
        assert!(md.contains("## PRD"));
        assert!(!md.contains("## User Flows"));
        let fe = md.find("## Frontend Prompts").unwrap();
        let be = md.find("## Backend Prompts").unwrap();
        assert!(fe < be);
    }

    #[test]
    fn test_text_export_writes_prompts_only() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prompts.txt");
        let rec = record();
        write_text(&rec.prompts, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[Frontend] Home Screen\nBuild home"));
        assert!(!text.contains("# PRD"));
    }
}
