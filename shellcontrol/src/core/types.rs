//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the validator, the session,
//! the dispatcher and the event stream. They carry no I/O handles.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::ToolErrorKind;

/// Planner-maintained facts. Values may be nested mappings.
pub type Knowledge = Map<String, Value>;

/// Lifecycle of a session. `Completed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Planning,
    Validating,
    Executing,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

/// Author of a turn in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Planner,
    Tool,
}

/// One exchange in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    /// Literal text as sent to or received from the planner.
    pub raw_text: String,
    /// Parsed decision; only present on planner turns that validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            raw_text: text.into(),
            decision: None,
        }
    }

    pub fn planner(raw_text: impl Into<String>, decision: Option<Decision>) -> Self {
        Self {
            role: Role::Planner,
            raw_text: raw_text.into(),
            decision,
        }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            raw_text: text.into(),
            decision: None,
        }
    }
}

/// The single tool invocation a planner asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Structured intent of one planner turn. Immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Partial knowledge update (shallow present-key overwrite).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<Knowledge>,
    /// Full replacement of the open task list when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_tasks: Option<Vec<String>>,
    /// Full replacement of the completed task list when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_tasks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_action_results: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(
        default,
        alias = "tool_to_use",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_call: Option<ToolCall>,
}

/// Uniform result shape produced by every tool executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    /// Only set for process-executing tools that exited on their own.
    pub exit_code: Option<i32>,
    pub error: Option<ToolErrorKind>,
    /// Free-text diagnostic (timeout, truncation).
    pub additional_error: Option<String>,
}

impl ToolResult {
    /// Successful result of a tool that does not spawn a process.
    pub fn message(stdout: impl Into<String>) -> Self {
        Self {
            ok: true,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Result of a call preempted by the termination signal.
    pub fn cancelled() -> Self {
        Self {
            ok: false,
            error: Some(ToolErrorKind::Cancelled),
            additional_error: Some("cancelled".to_string()),
            ..Self::default()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error == Some(ToolErrorKind::Cancelled)
    }
}
