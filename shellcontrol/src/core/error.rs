//! Error taxonomy of the orchestration protocol.
//!
//! Validation and tool errors are recoverable and fed back to the planner.
//! [`AbortReason`] enumerates the fatal conditions that end a session.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::ToolResult;

/// Planner output that cannot be turned into an actionable decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("response is not valid JSON: {reason}")]
    NotJson { reason: String },
    #[error("response must be a single JSON object")]
    NotAnObject,
    #[error("response has no tool call; every response must select exactly one tool")]
    MissingToolCall,
    #[error("tool call must be an object with `name` and `parameters`")]
    MalformedToolCall,
    #[error("tool call is missing `name`")]
    MissingToolName,
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },
    #[error("invalid parameters for '{tool}': {reason}")]
    InvalidParameters { tool: String, reason: String },
}

/// Classification of an unsuccessful tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    NonZeroExit,
    Timeout,
    Cancelled,
    Filesystem,
    Spawn,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonZeroExit => "non_zero_exit",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Filesystem => "filesystem",
            Self::Spawn => "spawn",
        }
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool call that failed before producing a regular result.
///
/// Carries whatever output was collected before the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolExecutionError {
    pub kind: ToolErrorKind,
    pub message: String,
    pub partial: Option<ToolResult>,
}

impl ToolExecutionError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            partial: None,
        }
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Filesystem, message)
    }

    pub fn spawn(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Spawn, message)
    }

    pub fn with_partial(mut self, partial: ToolResult) -> Self {
        self.partial = Some(partial);
        self
    }

    /// Collapse into a failed [`ToolResult`], keeping partial output.
    pub fn into_result(self) -> ToolResult {
        let mut result = self.partial.unwrap_or_default();
        result.ok = false;
        result.error = Some(self.kind);
        result.additional_error = Some(self.message);
        result
    }
}

/// Fatal conditions that move a session to `Aborted`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AbortReason {
    #[error("Planner produced {attempts} invalid responses in a row (last: {last_error}). Exiting.")]
    RetryBudgetExhausted { attempts: u32, last_error: String },
    #[error("Total cost is exceeding the limit (USD {limit_usd}). Exiting.")]
    CostLimitExceeded { total_usd: f64, limit_usd: f64 },
    #[error("Terminated on request.")]
    Terminated,
    #[error("Observer disconnected.")]
    TransportClosed,
    #[error("Planner call failed: {reason}")]
    PlannerFailed { reason: String },
}

impl AbortReason {
    /// Short label recorded in the conversation log.
    pub fn conclusion(&self) -> &'static str {
        match self {
            Self::RetryBudgetExhausted { .. } | Self::PlannerFailed { .. } => "failed",
            Self::CostLimitExceeded { .. } => "aborted_due_cost",
            Self::Terminated => "terminated",
            Self::TransportClosed => "disconnected",
        }
    }

    /// Whether an Abort event can still reach the observer.
    pub fn is_observable(&self) -> bool {
        !matches!(self, Self::TransportClosed)
    }
}
