use crate::errors::GenError;
use crate::provider::Instruction;
use crate::wire::{GeneratedLists, PromptCategory, SelectedPromptTypes, Stage, StageInput, WizardForm};

fn writing_rules() -> &'static str {
r#"Writing Rules:
- Write in Markdown. Use headings, short paragraphs and bullet lists.
- Be concrete and specific to THIS project. No lorem ipsum, no generic filler.
- Respect the chosen tech stack exactly; do not introduce frameworks the user did not pick.
- Prefer decisions over options. When something is unspecified, choose a sensible default and state it.
- Do not wrap the whole answer in a code fence."#
}

/// The wizard answers rendered as a compact Markdown brief.
pub fn form_brief(form: &WizardForm) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Project: {}\n\n", or_unspecified(&form.project_name)));
    out.push_str(&format!("Description: {}\n", or_unspecified(&form.project_description)));
    if !form.project_type.is_empty() {
        out.push_str(&format!("Type: {}\n", form.project_type));
    }
    if !form.target_audience.is_empty() {
        out.push_str(&format!("Audience: {}\n", form.target_audience));
    }
    if !form.key_features.is_empty() {
        out.push_str("\nKey features:\n");
        for f in &form.key_features {
            out.push_str(&format!("- {f}\n"));
        }
    }
    let ts = &form.tech_stack;
    let stack = [("Frontend", &ts.frontend), ("Backend", &ts.backend), ("Database", &ts.database), ("Hosting", &ts.hosting)];
    if stack.iter().any(|(_, v)| !v.is_empty()) {
        out.push_str("\nTech stack:\n");
        for (label, v) in stack {
            if !v.is_empty() {
                out.push_str(&format!("- {label}: {}\n", v.join(", ")));
            }
        }
    }
    if !form.design_style.is_empty() || !form.color_scheme.is_empty() {
        out.push_str(&format!(
            "\nDesign: {} / colors: {}\n",
            or_unspecified(&form.design_style),
            or_unspecified(&form.color_scheme)
        ));
    }
    if form.authentication {
        out.push_str("Authentication: required\n");
    }
    if !form.coding_preferences.is_empty() {
        out.push_str("\nCoding preferences:\n");
        for p in &form.coding_preferences {
            out.push_str(&format!("- {p}\n"));
        }
    }
    if !form.extra.is_empty() {
        out.push_str("\nOther answers:\n");
        for (k, v) in &form.extra {
            let v = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("- {k}: {v}\n"));
        }
    }
    out
}

fn or_unspecified(s: &str) -> &str {
    if s.trim().is_empty() {
        "(unspecified)"
    } else {
        s
    }
}

pub fn prd(input: &StageInput<'_>) -> Instruction {
    Instruction {
        system: format!(
            "You are a senior product manager. Write a complete Product Requirements Document.\n\n{}",
            writing_rules()
        ),
        user: format!(
            "{}\n\nWrite the PRD with these sections: Overview, Goals, Target Users, Core Features (with acceptance criteria), Non-functional Requirements, Out of Scope, Success Metrics.",
            form_brief(input.form_data)
        ),
        developer: None,
    }
}

pub fn user_flows(input: &StageInput<'_>) -> Instruction {
    Instruction {
        system: format!(
            "You are a UX architect. Derive the user flows of a product from its PRD.\n\n{}",
            writing_rules()
        ),
        user: format!(
            "{}\n\n## PRD\n{}\n\nList every primary user flow. For each: name, actor, entry point, numbered steps, screens touched, success and failure outcomes.",
            form_brief(input.form_data),
            input.prd.unwrap_or_default()
        ),
        developer: None,
    }
}

pub fn task_file(input: &StageInput<'_>) -> Instruction {
    Instruction {
        system: format!(
            "You are a tech lead. Break a product into an ordered implementation task file.\n\n{}",
            writing_rules()
        ),
        user: format!(
            "{}\n\n## PRD\n{}\n\n## User Flows\n{}\n\nProduce a task breakdown grouped by milestone. Every task gets an id (T1, T2, ...), a one-line goal, dependencies and a done-when line.",
            form_brief(input.form_data),
            input.prd.unwrap_or_default(),
            input.user_flows.unwrap_or_default()
        ),
        developer: None,
    }
}

pub fn lists(input: &StageInput<'_>, selected: &SelectedPromptTypes) -> Instruction {
    let wanted: Vec<String> = selected
        .selected()
        .iter()
        .map(|c| format!("\"{}\": [names of every {} to build]", c.as_str(), c.item_noun()))
        .collect();
    Instruction {
        system: "You extract build inventories from planning documents. Output exactly one JSON object and nothing else.".into(),
        user: format!(
            "{}\n\n## Task File\n{}\n\nReturn a JSON object with exactly these keys:\n{{ {} }}\nUse short, unique, human-readable names (e.g. \"Home Screen\", \"POST /api/orders\").",
            form_brief(input.form_data),
            input.task_file.unwrap_or_default(),
            wanted.join(", ")
        ),
        developer: Some("No markdown, no code fences, no commentary. Each array must be non-empty and free of duplicates.".into()),
    }
}

pub fn item(input: &StageInput<'_>, category: PromptCategory, name: &str) -> Instruction {
    let focus = match category {
        PromptCategory::Frontend => "layout, components, states (loading/empty/error), responsive behaviour and accessibility",
        PromptCategory::Backend => "route, request/response shapes, validation, persistence, auth and error codes",
        PromptCategory::Security => "threat addressed, controls to implement, configuration and how to verify it",
        PromptCategory::Functionality => "behaviour, data involved, edge cases and acceptance checks",
        PromptCategory::ErrorFixing => "symptoms, likely root causes, diagnostic steps and the fix to apply",
    };
    Instruction {
        system: format!(
            "You write precise, self-contained prompts for AI coding assistants. A prompt you write will be pasted into the assistant as-is.\n\n{}",
            writing_rules()
        ),
        user: format!(
            "{}\n\n## PRD\n{}\n\n## User Flows\n{}\n\n## Task File\n{}\n\nWrite the build prompt for the {} \"{}\". Cover {}.",
            form_brief(input.form_data),
            input.prd.unwrap_or_default(),
            input.user_flows.unwrap_or_default(),
            input.task_file.unwrap_or_default(),
            category.item_noun(),
            name,
            focus
        ),
        developer: None,
    }
}

/// Parse the lists stage's JSON answer, tolerating fences and chatter
/// around the object.
pub fn parse_lists(content: &str, selected: &SelectedPromptTypes) -> Result<GeneratedLists, GenError> {
    let obj = extract_first_json_object(content).ok_or(GenError::EmptyContent { stage: Stage::Lists })?;
    let value: serde_json::Value = serde_json::from_str(&obj)
        .map_err(|e| GenError::Transient(format!("lists answer is not valid JSON: {e}")))?;
    let map = value
        .as_object()
        .ok_or_else(|| GenError::Transient("lists answer is not a JSON object".into()))?;

    let mut lists = GeneratedLists::default();
    for (key, v) in map {
        let Some(cat) = PromptCategory::parse(key) else { continue };
        if !selected.is_selected(cat) {
            continue;
        }
        let mut names: Vec<String> = Vec::new();
        for n in v.as_array().into_iter().flatten() {
            let name = match n {
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Object(o) => o.get("name").and_then(|x| x.as_str()).unwrap_or_default().trim().to_string(),
                _ => String::new(),
            };
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        lists.insert(cat, names);
    }
    Ok(lists)
}

/// Extracts the first top-level JSON object substring from a string.
/// Handles nested braces and braces inside strings; returns None if not found.
fn extract_first_json_object(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_str {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_str = false;
            }
            continue;
        }
        if b == b'"' && start.is_some() {
            in_str = true;
        } else if b == b'{' {
            if start.is_none() {
                start = Some(i);
            }
            depth += 1;
        } else if b == b'}' && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(st) = start {
                    return Some(s[st..=i].to_string());
                }
            }
        }
    }
    None
}
