use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// ========================================
/// Generation record wire types
/// ========================================

/// One named step of the generation pipeline, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Form,
    Prd,
    UserFlows,
    Tasks,
    Lists,
    Prompts,
    Summary,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Form,
            Stage::Prd,
            Stage::UserFlows,
            Stage::Tasks,
            Stage::Lists,
            Stage::Prompts,
            Stage::Summary,
        ]
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Form => Some(Stage::Prd),
            Stage::Prd => Some(Stage::UserFlows),
            Stage::UserFlows => Some(Stage::Tasks),
            Stage::Tasks => Some(Stage::Lists),
            Stage::Lists => Some(Stage::Prompts),
            Stage::Prompts => Some(Stage::Summary),
            Stage::Summary => None,
        }
    }

    pub fn previous(&self) -> Option<Stage> {
        match self {
            Stage::Form => None,
            Stage::Prd => Some(Stage::Form),
            Stage::UserFlows => Some(Stage::Prd),
            Stage::Tasks => Some(Stage::UserFlows),
            Stage::Lists => Some(Stage::Tasks),
            Stage::Prompts => Some(Stage::Lists),
            Stage::Summary => Some(Stage::Prompts),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Form => "Form",
            Stage::Prd => "PRD",
            Stage::UserFlows => "User Flows",
            Stage::Tasks => "Tasks",
            Stage::Lists => "Lists",
            Stage::Prompts => "Prompts",
            Stage::Summary => "Summary",
        }
    }

    /// Step name used when approving a stage on the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Form => "form",
            Stage::Prd => "prd",
            Stage::UserFlows => "user_flows",
            Stage::Tasks => "tasks",
            Stage::Lists => "lists",
            Stage::Prompts => "prompts",
            Stage::Summary => "summary",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        let norm = s.trim().to_lowercase().replace(['-', ' '], "_");
        Stage::all().iter().copied().find(|st| st.as_str() == norm)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item categories. Declaration order is the generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptCategory {
    Frontend,
    Backend,
    Security,
    Functionality,
    ErrorFixing,
}

impl PromptCategory {
    pub fn all() -> &'static [PromptCategory] {
        &[
            PromptCategory::Frontend,
            PromptCategory::Backend,
            PromptCategory::Security,
            PromptCategory::Functionality,
            PromptCategory::ErrorFixing,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptCategory::Frontend => "frontend",
            PromptCategory::Backend => "backend",
            PromptCategory::Security => "security",
            PromptCategory::Functionality => "functionality",
            PromptCategory::ErrorFixing => "error_fixing",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PromptCategory::Frontend => "Frontend",
            PromptCategory::Backend => "Backend",
            PromptCategory::Security => "Security",
            PromptCategory::Functionality => "Functionality",
            PromptCategory::ErrorFixing => "Error Fixing",
        }
    }

    /// What a single item of this category is called.
    pub fn item_noun(&self) -> &'static str {
        match self {
            PromptCategory::Frontend => "screen",
            PromptCategory::Backend => "endpoint",
            PromptCategory::Security => "security feature",
            PromptCategory::Functionality => "functionality",
            PromptCategory::ErrorFixing => "error scenario",
        }
    }

    pub fn parse(s: &str) -> Option<PromptCategory> {
        let norm = s.trim().to_lowercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "frontend" => Some(PromptCategory::Frontend),
            "backend" => Some(PromptCategory::Backend),
            "security" => Some(PromptCategory::Security),
            "functionality" => Some(PromptCategory::Functionality),
            "error_fixing" | "errorfixing" => Some(PromptCategory::ErrorFixing),
            _ => None,
        }
    }
}

impl fmt::Display for PromptCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedPromptTypes {
    #[serde(default)]
    pub frontend: bool,
    #[serde(default)]
    pub backend: bool,
    #[serde(default)]
    pub security: bool,
    #[serde(default)]
    pub functionality: bool,
    #[serde(default)]
    pub error_fixing: bool,
}

impl Default for SelectedPromptTypes {
    fn default() -> Self {
        Self { frontend: true, backend: true, security: false, functionality: false, error_fixing: false }
    }
}

impl SelectedPromptTypes {
    #[cfg(test)]
    pub fn none() -> Self {
        Self { frontend: false, backend: false, security: false, functionality: false, error_fixing: false }
    }

    #[cfg(test)]
    pub fn only(categories: &[PromptCategory]) -> Self {
        let mut s = Self::none();
        for c in categories {
            s.set(*c, true);
        }
        s
    }

    pub fn is_selected(&self, cat: PromptCategory) -> bool {
        match cat {
            PromptCategory::Frontend => self.frontend,
            PromptCategory::Backend => self.backend,
            PromptCategory::Security => self.security,
            PromptCategory::Functionality => self.functionality,
            PromptCategory::ErrorFixing => self.error_fixing,
        }
    }

    #[cfg(test)]
    pub fn set(&mut self, cat: PromptCategory, on: bool) {
        match cat {
            PromptCategory::Frontend => self.frontend = on,
            PromptCategory::Backend => self.backend = on,
            PromptCategory::Security => self.security = on,
            PromptCategory::Functionality => self.functionality = on,
            PromptCategory::ErrorFixing => self.error_fixing = on,
        }
    }

    /// Selected categories in generation order.
    pub fn selected(&self) -> Vec<PromptCategory> {
        PromptCategory::all().iter().copied().filter(|c| self.is_selected(*c)).collect()
    }

    pub fn any(&self) -> bool {
        !self.selected().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechStack {
    #[serde(default)]
    pub frontend: Vec<String>,
    #[serde(default)]
    pub backend: Vec<String>,
    #[serde(default)]
    pub database: Vec<String>,
    #[serde(default)]
    pub hosting: Vec<String>,
}

/// Snapshot of every wizard answer at submission time.
///
/// Fields the wizard grows over time land in `extra` and are sent along
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardForm {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub project_description: String,
    #[serde(default)]
    pub project_type: String,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub key_features: Vec<String>,
    #[serde(default)]
    pub tech_stack: TechStack,
    #[serde(default)]
    pub design_style: String,
    #[serde(default)]
    pub color_scheme: String,
    #[serde(default)]
    pub coding_preferences: Vec<String>,
    #[serde(default)]
    pub authentication: bool,
    #[serde(default)]
    pub selected_prompt_types: SelectedPromptTypes,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Category-keyed lists of item names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratedLists(pub BTreeMap<PromptCategory, Vec<String>>);

impl GeneratedLists {
    pub fn items(&self, cat: PromptCategory) -> &[String] {
        self.0.get(&cat).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn insert(&mut self, cat: PromptCategory, items: Vec<String>) {
        self.0.insert(cat, items);
    }

    /// Total items across the selected categories.
    pub fn total_for(&self, selected: &SelectedPromptTypes) -> usize {
        selected.selected().iter().map(|c| self.items(*c).len()).sum()
    }

    pub fn is_empty_for(&self, selected: &SelectedPromptTypes) -> bool {
        self.total_for(selected) == 0
    }

    /// Listed items of the selected categories that have no prompt yet, in
    /// generation order.
    pub fn pending<'a>(&'a self, prompts: &PromptSet, selected: &SelectedPromptTypes) -> Vec<(PromptCategory, &'a str)> {
        selected
            .selected()
            .into_iter()
            .flat_map(|c| self.items(c).iter().map(move |i| (c, i.as_str())))
            .filter(|(c, i)| !prompts.contains(*c, i))
            .collect()
    }

    /// Every listed item has a prompt and there was at least one item.
    pub fn is_complete(&self, prompts: &PromptSet, selected: &SelectedPromptTypes) -> bool {
        !self.is_empty_for(selected) && self.pending(prompts, selected).is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptItem {
    pub title: String,
    pub prompt: String,
}

/// Category-keyed generated prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptSet(pub BTreeMap<PromptCategory, Vec<PromptItem>>);

impl PromptSet {
    pub fn contains(&self, cat: PromptCategory, title: &str) -> bool {
        self.0.get(&cat).map(|v| v.iter().any(|p| p.title == title)).unwrap_or(false)
    }

    /// Append unless the title already exists. Returns whether it was added.
    pub fn push(&mut self, cat: PromptCategory, item: PromptItem) -> bool {
        if self.contains(cat, &item.title) {
            return false;
        }
        self.0.entry(cat).or_default().push(item);
        true
    }

    pub fn items(&self, cat: PromptCategory) -> &[PromptItem] {
        self.0.get(&cat).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn count(&self, cat: PromptCategory) -> usize {
        self.items(cat).len()
    }

    pub fn total(&self) -> usize {
        self.0.values().map(|v| v.len()).sum()
    }

    pub fn titles(&self, cat: PromptCategory) -> Vec<&str> {
        self.items(cat).iter().map(|p| p.title.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

/// The backend-owned record accumulating every stage output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub generation_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub project_name: String,
    pub form_data: WizardForm,
    pub selected_prompt_types: SelectedPromptTypes,
    #[serde(default)]
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_flows: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lists: Option<GeneratedLists>,
    #[serde(default)]
    pub prompts: PromptSet,
    #[serde(default)]
    pub approved_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationProgress {
    pub status: GenerationStatus,
    pub total_items: usize,
    pub completed_items: usize,
    #[serde(default)]
    pub prompts: PromptSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub remaining_prompts: i64,
    pub is_pro: bool,
}

/// Everything a stage call needs from earlier stages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInput<'a> {
    pub generation_id: &'a str,
    pub user_id: &'a str,
    pub form_data: &'a WizardForm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prd: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_flows: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_file: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_prompt_types: Option<&'a SelectedPromptTypes>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRequest<'a> {
    #[serde(flatten)]
    pub stage: StageInput<'a>,
    pub item_type: PromptCategory,
    pub item_name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPrompt {
    pub prompt: String,
}
