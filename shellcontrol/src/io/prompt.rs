//! System prompt rendering for the planner.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::toolset::ToolKind;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

#[derive(Debug, Clone, Serialize)]
struct ToolContext {
    name: &'static str,
    description: &'static str,
    schema: String,
}

impl ToolContext {
    fn from_kind(kind: ToolKind) -> Result<Self> {
        Ok(Self {
            name: kind.name(),
            description: kind.description(),
            schema: serde_json::to_string_pretty(&kind.parameters_schema())
                .context("serialize tool schema")?,
        })
    }
}

/// Inputs for the system prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs {
    pub command_timeout_secs: u64,
}

/// Render the system prompt from `template_path`, or the bundled template.
pub fn render_system_prompt(template_path: Option<&Path>, inputs: PromptInputs) -> Result<String> {
    let source = match template_path {
        Some(path) => {
            debug!(path = %path.display(), "using system prompt override");
            fs::read_to_string(path)
                .with_context(|| format!("read system prompt {}", path.display()))?
        }
        None => SYSTEM_TEMPLATE.to_string(),
    };
    let tools = ToolKind::ALL
        .into_iter()
        .map(ToolContext::from_kind)
        .collect::<Result<Vec<_>>>()?;

    let env = Environment::new();
    let template = env
        .template_from_str(&source)
        .context("parse system prompt template")?;
    let rendered = template
        .render(context! {
            tools => tools,
            command_timeout_secs => inputs.command_timeout_secs,
            complete_tool => ToolKind::MarkComplete.name(),
        })
        .context("render system prompt")?;
    Ok(rendered)
}
