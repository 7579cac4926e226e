//! The closed set of tools a planner may call.
//!
//! Adding a tool means adding a [`ToolKind`] variant, its parameter schema and
//! a matching [`ToolAction`] variant; the loop itself never branches on names.

use std::path::PathBuf;

use serde_json::{Map, Value, json};

use crate::core::error::ValidationError;

/// Tool identity, resolved from the name a planner used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    RunCommand,
    ReadFile,
    WriteFile,
    MarkComplete,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::RunCommand,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::MarkComplete,
    ];

    /// Canonical name advertised to the planner.
    pub fn name(self) -> &'static str {
        match self {
            Self::RunCommand => "run-command",
            Self::ReadFile => "read-file",
            Self::WriteFile => "write-file",
            Self::MarkComplete => "mark-complete",
        }
    }

    /// Older name still accepted from planners prompted with it.
    pub fn legacy_name(self) -> &'static str {
        match self {
            Self::RunCommand => "execute_shell_command",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::MarkComplete => "task_complete",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name || kind.legacy_name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::RunCommand => {
                "Run one shell command string and return its stdout, stderr and exit status."
            }
            Self::ReadFile => "Read a text file and return its contents.",
            Self::WriteFile => {
                "Replace the contents of a file, creating parent directories as needed."
            }
            Self::MarkComplete => "Finish the task with a short summary of what was achieved.",
        }
    }

    /// JSON Schema (Draft 2020-12) for the tool's `parameters` object.
    pub fn parameters_schema(self) -> Value {
        match self {
            Self::RunCommand => json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "minLength": 1 }
                },
                "required": ["command"]
            }),
            Self::ReadFile => json!({
                "type": "object",
                "properties": {
                    "filename": { "type": "string", "minLength": 1 }
                },
                "required": ["filename"]
            }),
            Self::WriteFile => json!({
                "type": "object",
                "properties": {
                    "filename": { "type": "string", "minLength": 1 },
                    "content": { "type": "string" }
                },
                "required": ["filename"]
            }),
            Self::MarkComplete => json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" }
                }
            }),
        }
    }
}

/// A validated tool call with typed parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAction {
    RunCommand { command: String },
    ReadFile { path: PathBuf },
    WriteFile { path: PathBuf, content: String },
    MarkComplete { summary: Option<String> },
}

impl ToolAction {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::RunCommand { .. } => ToolKind::RunCommand,
            Self::ReadFile { .. } => ToolKind::ReadFile,
            Self::WriteFile { .. } => ToolKind::WriteFile,
            Self::MarkComplete { .. } => ToolKind::MarkComplete,
        }
    }

    /// Build typed parameters. Assumes `parameters` already passed the schema.
    pub fn from_parameters(
        kind: ToolKind,
        parameters: &Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        let action = match kind {
            ToolKind::RunCommand => Self::RunCommand {
                command: required_str(kind, parameters, "command")?,
            },
            ToolKind::ReadFile => Self::ReadFile {
                path: PathBuf::from(required_str(kind, parameters, "filename")?),
            },
            ToolKind::WriteFile => Self::WriteFile {
                path: PathBuf::from(required_str(kind, parameters, "filename")?),
                content: optional_str(parameters, "content").unwrap_or_default(),
            },
            ToolKind::MarkComplete => Self::MarkComplete {
                summary: optional_str(parameters, "summary").filter(|s| !s.trim().is_empty()),
            },
        };
        Ok(action)
    }
}

fn required_str(
    kind: ToolKind,
    parameters: &Map<String, Value>,
    key: &str,
) -> Result<String, ValidationError> {
    optional_str(parameters, key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ValidationError::InvalidParameters {
            tool: kind.name().to_string(),
            reason: format!("missing `{key}`"),
        })
}

fn optional_str(parameters: &Map<String, Value>, key: &str) -> Option<String> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_canonical_and_legacy_names() {
        assert_eq!(ToolKind::from_name("run-command"), Some(ToolKind::RunCommand));
        assert_eq!(
            ToolKind::from_name("execute_shell_command"),
            Some(ToolKind::RunCommand)
        );
        assert_eq!(
            ToolKind::from_name("task_complete"),
            Some(ToolKind::MarkComplete)
        );
        assert_eq!(ToolKind::from_name("fetch_webpage"), None);
    }

    #[test]
    fn write_file_content_defaults_to_empty() {
        let params = json!({ "filename": "out.txt" });
        let action =
            ToolAction::from_parameters(ToolKind::WriteFile, params.as_object().expect("object"))
                .expect("action");
        assert_eq!(
            action,
            ToolAction::WriteFile {
                path: PathBuf::from("out.txt"),
                content: String::new(),
            }
        );
    }

    #[test]
    fn blank_summary_is_dropped() {
        let params = json!({ "summary": "  " });
        let action = ToolAction::from_parameters(
            ToolKind::MarkComplete,
            params.as_object().expect("object"),
        )
        .expect("action");
        assert_eq!(action, ToolAction::MarkComplete { summary: None });
    }
}
