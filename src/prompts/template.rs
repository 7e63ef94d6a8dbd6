//! Template loading and rendering for validator prompts
//!
//! Supports {{variable}} substitution and {{#if var}}...{{/if}} conditionals.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::errors::{GatekeeperError, Result};
use crate::fs::{get_validator_prompts_dir, validate_id};
use crate::schemas::ValidatorConfig;

// Bundled default prompt
const DEFAULT_VALIDATOR_PROMPT: &str = include_str!("validator.md");

lazy_static::lazy_static! {
    static ref IF_REGEX: Regex =
        Regex::new(r"\{\{#if\s+(\w+)\}\}([\s\S]*?)\{\{/if\}\}").unwrap();
    static ref IFNOT_REGEX: Regex =
        Regex::new(r"\{\{#ifnot\s+(\w+)\}\}([\s\S]*?)\{\{/ifnot\}\}").unwrap();
    static ref VAR_REGEX: Regex = Regex::new(r"\{\{(\w+)\}\}").unwrap();
}

/// Variables available for prompt template rendering
#[derive(Debug, Clone, Default)]
pub struct PromptVariables {
    pub task_id: String,

    pub task_title: String,

    /// Markdown body of the task
    pub task_body: String,

    pub round: u32,

    pub validator_id: String,

    pub wave: String,

    pub session_id: Option<String>,

    /// Directory the validator reviews
    pub worktree: String,

    /// Body of the round's implementation report (if recorded)
    pub implementation_report: Option<String>,

    /// Files changed in the round (optional context)
    pub changed_files: Option<Vec<String>>,
}

impl PromptVariables {
    /// Convert to a hashmap of string values for template rendering
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();

        map.insert("task_id".to_string(), self.task_id.clone());
        map.insert("task_title".to_string(), self.task_title.clone());
        map.insert("task_body".to_string(), self.task_body.clone());
        map.insert("round".to_string(), self.round.to_string());
        map.insert("validator_id".to_string(), self.validator_id.clone());
        map.insert("wave".to_string(), self.wave.clone());
        map.insert("worktree".to_string(), self.worktree.clone());

        if let Some(ref session) = self.session_id {
            map.insert("session_id".to_string(), session.clone());
        }
        if let Some(ref report) = self.implementation_report {
            map.insert("implementation_report".to_string(), report.clone());
        }
        if let Some(ref files) = self.changed_files {
            map.insert("changed_files".to_string(), files.join("\n- "));
        }

        map
    }
}

/// Load a validator prompt template, checking for a custom template first.
///
/// Looks in `.gatekeeper/prompts/validators/<id>.md`, falling back to the
/// bundled default.
pub fn load_validator_template(root: &Path, validator_id: &str) -> Result<String> {
    validate_id(validator_id)?;
    let custom_path = get_validator_prompts_dir(root).join(format!("{}.md", validator_id));
    if custom_path.exists() {
        return std::fs::read_to_string(&custom_path).map_err(|e| {
            GatekeeperError::FileNotFound(format!(
                "Cannot read template {}: {}",
                custom_path.display(),
                e
            ))
        });
    }
    Ok(DEFAULT_VALIDATOR_PROMPT.to_string())
}

/// Render a prompt template with variable substitution.
///
/// - `{{variable}}` - Simple variable substitution
/// - `{{#if variable}}...{{/if}}` - Included if variable is non-empty
/// - `{{#ifnot variable}}...{{/ifnot}}` - Included if variable is empty/missing
pub fn render_prompt(template: &str, variables: &PromptVariables) -> String {
    let vars = variables.to_map();
    let present = |name: &str| vars.get(name).map(|v| !v.is_empty()).unwrap_or(false);

    let result = IF_REGEX.replace_all(template, |caps: &regex::Captures| {
        if present(&caps[1]) {
            caps[2].to_string()
        } else {
            String::new()
        }
    });

    let result = IFNOT_REGEX.replace_all(&result, |caps: &regex::Captures| {
        if present(&caps[1]) {
            String::new()
        } else {
            caps[2].to_string()
        }
    });

    VAR_REGEX
        .replace_all(&result, |caps: &regex::Captures| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Source of the opaque prompt text each validator receives
pub trait PromptProvider: Send + Sync {
    fn prompt(&self, validator: &ValidatorConfig, variables: &PromptVariables) -> Result<String>;
}

/// Renders `.gatekeeper/prompts/validators/<id>.md` or the bundled default
#[derive(Debug, Clone)]
pub struct TemplatePromptProvider {
    root: PathBuf,
}

impl TemplatePromptProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TemplatePromptProvider { root: root.into() }
    }
}

impl PromptProvider for TemplatePromptProvider {
    fn prompt(&self, validator: &ValidatorConfig, variables: &PromptVariables) -> Result<String> {
        let template = load_validator_template(&self.root, &validator.id)?;
        Ok(render_prompt(&template, variables))
    }
}
