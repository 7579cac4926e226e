//! Decision validator: raw planner text in, structured [`Decision`] out.
//!
//! Parsing is tolerant of absent or extraneous narrative fields, but a
//! decision that is expected to move the session forward must carry exactly
//! one well-formed tool call whose parameters match the tool's schema.

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::error::ValidationError;
use crate::core::toolset::{ToolAction, ToolKind};
use crate::core::types::{Decision, Knowledge, ToolCall};

const TOOL_CALL_KEYS: [&str; 3] = ["tool_call", "tool_to_use", "toolCall"];

/// A decision whose tool call resolved to a typed action.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDecision {
    pub decision: Decision,
    pub action: ToolAction,
}

/// Parses planner output and checks it against the known tool set.
pub struct DecisionValidator {
    schemas: Vec<(ToolKind, Validator)>,
}

impl DecisionValidator {
    /// Compile the parameter schema of every known tool.
    pub fn new() -> Result<Self> {
        let mut schemas = Vec::with_capacity(ToolKind::ALL.len());
        for kind in ToolKind::ALL {
            let compiled = jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&kind.parameters_schema())
                .with_context(|| format!("compile parameter schema for {}", kind.name()))?;
            schemas.push((kind, compiled));
        }
        Ok(Self { schemas })
    }

    /// Parse planner text into a [`Decision`] without requiring a tool call.
    ///
    /// A tool call that is present must still be structurally sound.
    pub fn parse(&self, raw: &str) -> Result<Decision, ValidationError> {
        let body = strip_code_fence(raw);
        let value: Value = serde_json::from_str(body).map_err(|err| ValidationError::NotJson {
            reason: err.to_string(),
        })?;
        let Value::Object(object) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let tool_call = match tool_call_value(&object) {
            None => None,
            Some(value) => Some(parse_tool_call(value)?),
        };

        Ok(Decision {
            knowledge: object.get("knowledge").and_then(knowledge_field),
            open_tasks: object.get("open_tasks").and_then(task_list),
            completed_tasks: object.get("completed_tasks").and_then(task_list),
            previous_action_results: object.get("previous_action_results").and_then(text_field),
            next_action: object.get("next_action").and_then(text_field),
            tool_call,
        })
    }

    /// Parse and require a tool call that names a known tool with valid parameters.
    pub fn validate(&self, raw: &str) -> Result<ValidatedDecision, ValidationError> {
        let decision = self.parse(raw)?;
        let call = decision
            .tool_call
            .as_ref()
            .ok_or(ValidationError::MissingToolCall)?;
        let action = self.resolve(call)?;
        debug!(tool = action.kind().name(), "decision validated");
        Ok(ValidatedDecision { decision, action })
    }

    /// Resolve a tool call to a typed action, checking its parameter schema.
    pub fn resolve(&self, call: &ToolCall) -> Result<ToolAction, ValidationError> {
        let kind = ToolKind::from_name(&call.name).ok_or_else(|| ValidationError::UnknownTool {
            name: call.name.clone(),
        })?;
        let parameters = Value::Object(call.parameters.clone());
        if let Some((_, schema)) = self.schemas.iter().find(|(k, _)| *k == kind) {
            let messages: Vec<String> = schema
                .iter_errors(&parameters)
                .map(|err| err.to_string())
                .collect();
            if !messages.is_empty() {
                return Err(ValidationError::InvalidParameters {
                    tool: kind.name().to_string(),
                    reason: messages.join("; "),
                });
            }
        }
        ToolAction::from_parameters(kind, &call.parameters)
    }
}

/// Unwrap a response the planner wrapped in a Markdown code fence.
pub fn strip_code_fence(raw: &str) -> &str {
    use std::sync::LazyLock;
    static FENCE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"(?s)^\s*```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?\s*```\s*$").unwrap()
    });
    match FENCE_RE.captures(raw).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str(),
        None => raw.trim(),
    }
}

fn tool_call_value(object: &Map<String, Value>) -> Option<&Value> {
    TOOL_CALL_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .filter(|value| !value.is_null())
}

fn parse_tool_call(value: &Value) -> Result<ToolCall, ValidationError> {
    let Value::Object(call) = value else {
        return Err(ValidationError::MalformedToolCall);
    };
    let name = match call.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err(ValidationError::MissingToolName),
    };
    let parameters = match call.get("parameters") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(parameters)) => parameters.clone(),
        Some(_) => {
            return Err(ValidationError::InvalidParameters {
                tool: name,
                reason: "`parameters` must be an object".to_string(),
            });
        }
    };
    Ok(ToolCall { name, parameters })
}

// Optional narrative fields of the wrong type are ignored rather than rejected.

fn knowledge_field(value: &Value) -> Option<Knowledge> {
    value.as_object().cloned()
}

fn task_list(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

fn text_field(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
