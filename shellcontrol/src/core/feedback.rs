//! Text fed back to the planner after tool calls and rejected responses.

use crate::core::error::{ToolErrorKind, ToolExecutionError, ValidationError};
use crate::core::event::{NO_ERROR_OUTPUT, NO_OUTPUT};
use crate::core::toolset::ToolKind;
use crate::core::types::ToolResult;

/// Render a tool result as the next user message for the planner.
pub fn render_tool_feedback(kind: ToolKind, result: &ToolResult) -> String {
    match kind {
        ToolKind::RunCommand => render_command_result(result),
        _ => {
            let mut text = result.stdout.clone();
            if let Some(note) = &result.additional_error {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(note);
            }
            text
        }
    }
}

fn render_command_result(result: &ToolResult) -> String {
    let output = if result.stdout.is_empty() {
        NO_OUTPUT
    } else {
        result.stdout.trim_end()
    };
    let mut errors = if result.stderr.is_empty() {
        NO_ERROR_OUTPUT.to_string()
    } else {
        result.stderr.trim_end().to_string()
    };
    match result.error {
        Some(ToolErrorKind::Timeout) => {
            errors.push_str("\nError: the command exceeded its time limit and was killed.");
        }
        Some(ToolErrorKind::Cancelled) => {
            errors.push_str("\nError: the command was cancelled.");
        }
        _ => {}
    }
    if let Some(note) = result
        .additional_error
        .as_deref()
        .filter(|note| !matches!(*note, "timeout" | "cancelled"))
    {
        errors.push('\n');
        errors.push_str(note);
    }

    let mut text = format!("Output of the command:\n```\n{output}\n```\n");
    if !result.ok {
        text.push_str(&format!("Errors:\n```\n{errors}\n```\n"));
    }
    match result.exit_code {
        Some(code) => text.push_str(&format!("Exit status: {code}")),
        None => text.push_str("Exit status: none (process was killed)"),
    }
    text
}

/// Render a tool execution error for the planner.
pub fn render_tool_error(kind: ToolKind, err: &ToolExecutionError) -> String {
    let mut text = format!("The {} tool failed ({}): {}", kind.name(), err.kind, err.message);
    if let Some(partial) = &err.partial
        && !partial.stdout.is_empty()
    {
        text.push_str("\nPartial output:\n");
        text.push_str(&partial.stdout);
    }
    text
}

/// Synthetic correction appended after a rejected planner response.
pub fn correction_message(err: &ValidationError) -> String {
    let tools: Vec<&str> = ToolKind::ALL.iter().map(|kind| kind.name()).collect();
    format!(
        "Your previous response was rejected: {err}.\n\
         Reply with exactly one JSON object and nothing else. It must contain \
         `tool_call` with a `name` (one of: {}) and a `parameters` object.",
        tools.join(", ")
    )
}
