//! MCP prompts for data management workflows.
//!
//! Each prompt is a markdown template with one `{{argument}}` placeholder.
//! Templates are compiled into the binary; a directory given by
//! `MCP_PROMPTS_DIR` can override them file by file.

use crate::error::{NotFoundKind, ServerError, ServerResult};
use crate::protocol::{Content, GetPromptResult, Prompt, PromptArgument, PromptMessage, Role};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Static description of one prompt.
struct PromptDef {
    name: &'static str,
    title: &'static str,
    description: &'static str,
    argument: &'static str,
    argument_description: &'static str,
    template: &'static str,
}

const PROMPTS: &[PromptDef] = &[
    PromptDef {
        name: "manage-data",
        title: "Manage Data",
        description: "Carry out a data management task described in plain language",
        argument: "instructions",
        argument_description: "What should be done with the data",
        template: include_str!("../templates/manage-data.md"),
    },
    PromptDef {
        name: "insert-employee",
        title: "Insert Employee",
        description: "Add a new employee record from free-text details",
        argument: "employee_info",
        argument_description: "Details of the employee to add (name, email, department, ...)",
        template: include_str!("../templates/insert-employee.md"),
    },
    PromptDef {
        name: "delete-employee",
        title: "Delete Employee",
        description: "Remove an employee record after confirming which one",
        argument: "employee_identifier",
        argument_description: "Name, email or id of the employee to remove",
        template: include_str!("../templates/delete-employee.md"),
    },
];

/// Build the list of available prompts.
pub fn build_prompt_list() -> Vec<Prompt> {
    PROMPTS
        .iter()
        .map(|def| Prompt {
            name: def.name.to_string(),
            title: Some(def.title.to_string()),
            description: Some(def.description.to_string()),
            arguments: vec![PromptArgument {
                name: def.argument.to_string(),
                description: Some(def.argument_description.to_string()),
                required: true,
            }],
        })
        .collect()
}

/// Resolves prompt templates.
#[derive(Debug, Clone, Default)]
pub struct PromptCatalog {
    override_dir: Option<PathBuf>,
}

impl PromptCatalog {
    /// Create a catalog, optionally reading templates from `override_dir` first.
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    /// Get a specific prompt with its argument substituted.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<&Map<String, Value>>,
    ) -> ServerResult<GetPromptResult> {
        let def = PROMPTS
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ServerError::not_found(NotFoundKind::Prompt, name))?;

        let template = self.load_template(def).await;
        let value = arguments
            .and_then(|args| args.get(def.argument))
            .map(argument_text)
            .unwrap_or_default();

        Ok(GetPromptResult {
            description: Some(def.description.to_string()),
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::text(substitute(&template, def.argument, &value)),
            }],
        })
    }

    async fn load_template(&self, def: &PromptDef) -> String {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{}.md", def.name));
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    debug!("Loaded prompt template from {}", path.display());
                    return text;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to read {}: {}; using built-in template", path.display(), e),
            }
        }
        def.template.to_string()
    }
}

/// Render an argument value as prompt text.
///
/// Strings are used verbatim, arrays are joined with `", "`.
fn argument_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(argument_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn substitute(template: &str, argument: &str, value: &str) -> String {
    template.replace(&format!("{{{{{}}}}}", argument), value)
}
