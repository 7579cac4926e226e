//! Tool Dispatcher and the executors behind it.
//!
//! Every validated [`ToolAction`] maps to exactly one executor. Mark-complete
//! runs nothing and only tells the loop to close the session.

pub mod files;
pub mod run_command;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::core::error::{ToolErrorKind, ToolExecutionError};
use crate::core::toolset::ToolAction;
use crate::core::types::ToolResult;

pub use run_command::CommandSettings;

/// Outcome of one dispatched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Finished(ToolResult),
    Complete { summary: Option<String> },
}

/// Seam between the loop and the side-effecting executors.
#[async_trait::async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run one action. A cancelled call resolves to a cancelled [`ToolResult`].
    async fn dispatch(
        &self,
        action: &ToolAction,
        cancel: &CancellationToken,
        budget: Duration,
    ) -> Result<Dispatched, ToolExecutionError>;
}

/// Dispatcher backed by the real process and filesystem executors.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    settings: CommandSettings,
}

impl Dispatcher {
    pub fn new(settings: CommandSettings) -> Self {
        Self { settings }
    }
}

#[async_trait::async_trait]
impl ToolRunner for Dispatcher {
    #[instrument(skip_all, fields(tool = action.kind().name()))]
    async fn dispatch(
        &self,
        action: &ToolAction,
        cancel: &CancellationToken,
        budget: Duration,
    ) -> Result<Dispatched, ToolExecutionError> {
        if cancel.is_cancelled() {
            debug!("cancelled before dispatch");
            return Ok(Dispatched::Finished(ToolResult::cancelled()));
        }
        let result = match action {
            ToolAction::MarkComplete { summary } => {
                return Ok(Dispatched::Complete {
                    summary: summary.clone(),
                });
            }
            ToolAction::RunCommand { command } => {
                let command = command.clone();
                let settings = self.settings.clone();
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || {
                    run_command::run_command(&command, &settings, budget, &cancel)
                })
                .await
                .map_err(|e| {
                    ToolExecutionError::new(ToolErrorKind::Spawn, format!("command task failed: {e}"))
                })??
            }
            ToolAction::ReadFile { path } => files::read_file(path)?,
            ToolAction::WriteFile { path, content } => files::write_file(path, content)?,
        };
        debug!(ok = result.ok, exit_code = ?result.exit_code, "tool finished");
        Ok(Dispatched::Finished(result))
    }
}
