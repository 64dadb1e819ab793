//! Wizard answers: persistence, one-shot prefill and field editing.

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use std::sync::Arc;

use crate::errors::GenError;
use crate::store::Store;
use crate::wire::WizardForm;

const PREFILL_KEY: &str = "prefill";

fn form_key(wizard: &str) -> String {
    format!("form:{wizard}")
}

pub struct FormStore {
    store: Arc<Store>,
}

impl FormStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// The saved snapshot for a wizard, or an empty form.
    pub fn load(&self, wizard: &str) -> Result<WizardForm> {
        Ok(self.store.get_json(&form_key(wizard))?.unwrap_or_default())
    }

    pub fn save(&self, wizard: &str, form: &WizardForm) -> Result<()> {
        self.store.put_json(&form_key(wizard), form)
    }

    pub fn clear(&self, wizard: &str) -> Result<bool> {
        self.store.delete(&form_key(wizard))
    }

    pub fn set_prefill(&self, form: &WizardForm) -> Result<()> {
        self.store.put_json(PREFILL_KEY, form)
    }

    /// Prefill payload handed over by another page; gone after the first read.
    pub fn take_prefill(&self) -> Result<Option<WizardForm>> {
        self.store.take_json(PREFILL_KEY)
    }

    /// Load the wizard, letting a pending prefill payload win over the saved
    /// snapshot. The result is saved back so the prefill survives a restart.
    pub fn load_with_prefill(&self, wizard: &str) -> Result<WizardForm> {
        match self.take_prefill()? {
            Some(form) => {
                tracing::info!(wizard, "applying prefill payload");
                self.save(wizard, &form)?;
                Ok(form)
            }
            None => self.load(wizard),
        }
    }

    /// Set one field and persist immediately.
    pub fn update_field(&self, wizard: &str, key: &str, raw: &str) -> Result<WizardForm> {
        let form = set_field(&self.load(wizard)?, key, raw)?;
        self.save(wizard, &form)?;
        Ok(form)
    }
}

/// Set a dotted field path (`techStack.frontend`) from its text form.
///
/// Arrays take comma-separated values, booleans take true/false/yes/no,
/// everything else is stored as a string. Unknown top-level keys are kept
/// as extra fields.
pub fn set_field(form: &WizardForm, key: &str, raw: &str) -> Result<WizardForm> {
    let mut doc = serde_json::to_value(form)?;
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        bail!("empty field name");
    }

    let (last, parents) = parts.split_last().ok_or_else(|| anyhow!("empty field name"))?;
    let mut cursor = &mut doc;
    for p in parents {
        let obj = cursor.as_object_mut().ok_or_else(|| anyhow!("{key}: {p} is not an object"))?;
        cursor = obj.entry(p.to_string()).or_insert_with(|| Value::Object(Default::default()));
    }
    let obj = cursor.as_object_mut().ok_or_else(|| anyhow!("{key}: parent is not an object"))?;

    let new_value = match obj.get(*last) {
        Some(Value::Array(_)) => Value::Array(
            raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(|s| Value::String(s.to_string())).collect(),
        ),
        Some(Value::Bool(_)) => Value::Bool(parse_bool(raw).ok_or_else(|| anyhow!("{key} expects true or false"))?),
        _ => Value::String(raw.to_string()),
    };
    obj.insert(last.to_string(), new_value);

    Ok(serde_json::from_value(doc)?)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

impl WizardForm {
    /// Checks run before submission.
    pub fn validate(&self) -> Result<(), GenError> {
        let mut missing = Vec::new();
        if self.project_name.trim().is_empty() {
            missing.push("project name");
        }
        if self.project_description.trim().is_empty() {
            missing.push("project description");
        }
        if !self.selected_prompt_types.any() {
            missing.push("at least one prompt type");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GenError::Validation(format!("missing {}", missing.join(", "))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::PromptCategory;

    fn store() -> FormStore {
        FormStore::new(Arc::new(Store::in_memory().unwrap()))
    }

    #[test]
    fn test_load_missing_is_default() {
        let fs = store();
        assert_eq!(fs.load("main").unwrap(), WizardForm::default());
    }

    #[test]
    fn test_update_field_persists() {
        let fs = store();
        fs.update_field("main", "projectName", "Recipe Box").unwrap();
        fs.update_field("main", "techStack.frontend", "React, Tailwind ,").unwrap();
        fs.update_field("main", "selectedPromptTypes.security", "yes").unwrap();
        fs.update_field("main", "budget", "small").unwrap();

        let form = fs.load("main").unwrap();
        assert_eq!(form.project_name, "Recipe Box");
        assert_eq!(form.tech_stack.frontend, vec!["React", "Tailwind"]);
        assert!(form.selected_prompt_types.is_selected(PromptCategory::Security));
        assert_eq!(form.extra["budget"], "small");
    }

    #[test]
    fn test_bad_bool_is_rejected() {
        let form = WizardForm::default();
        assert!(set_field(&form, "authentication", "maybe").is_err());
    }

    #[test]
    fn test_prefill_wins_once() {
        let fs = store();
        fs.update_field("main", "projectName", "Saved").unwrap();
        let prefill = WizardForm { project_name: "Prefilled".into(), ..Default::default() };
        fs.set_prefill(&prefill).unwrap();

        assert_eq!(fs.load_with_prefill("main").unwrap().project_name, "Prefilled");
        assert!(fs.take_prefill().unwrap().is_none());
        assert_eq!(fs.load_with_prefill("main").unwrap().project_name, "Prefilled");
    }

    #[test]
    fn test_validate_reports_all_missing() {
        let mut form = WizardForm::default();
        form.selected_prompt_types = crate::wire::SelectedPromptTypes::none();
        let err = form.validate().unwrap_err().to_string();
        assert!(err.contains("project name"));
        assert!(err.contains("project description"));
        assert!(err.contains("prompt type"));

        form.project_name = "A".into();
        form.project_description = "B".into();
        form.selected_prompt_types.frontend = true;
        assert!(form.validate().is_ok());
    }
}
