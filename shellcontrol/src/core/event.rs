//! Observer-visible events and their wire payloads.
//!
//! Events serialize as `{"type": "<Kind>", "payload": ...}`.

use serde::{Deserialize, Serialize};

use crate::core::types::{Decision, ToolResult};

/// Shown in place of empty stdout.
pub const NO_OUTPUT: &str = "(The command produced no output)";
/// Shown in place of empty stderr.
pub const NO_ERROR_OUTPUT: &str = "(The command produced no error output)";

/// One unit of progress emitted by the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    Prompt(String),
    PlannerResponse(Decision),
    ToolResult(ToolResultPayload),
    ToolError(String),
    Info(String),
    Warning(String),
    Abort(String),
    Completed(Option<String>),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prompt(_) => "Prompt",
            Self::PlannerResponse(_) => "PlannerResponse",
            Self::ToolResult(_) => "ToolResult",
            Self::ToolError(_) => "ToolError",
            Self::Info(_) => "Info",
            Self::Warning(_) => "Warning",
            Self::Abort(_) => "Abort",
            Self::Completed(_) => "Completed",
        }
    }

    /// Abort and Completed are the last event of a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Abort(_) | Self::Completed(_))
    }
}

/// Display shape of a [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub output: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_error: Option<String>,
    pub returncode: i32,
}

impl From<&ToolResult> for ToolResultPayload {
    fn from(result: &ToolResult) -> Self {
        Self {
            output: or_sentinel(&result.stdout, NO_OUTPUT),
            error: or_sentinel(&result.stderr, NO_ERROR_OUTPUT),
            additional_error: result.additional_error.clone(),
            returncode: result.exit_code.unwrap_or(0),
        }
    }
}

fn or_sentinel(text: &str, sentinel: &str) -> String {
    if text.is_empty() {
        sentinel.to_string()
    } else {
        text.to_string()
    }
}
