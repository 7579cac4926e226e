//! Test-only planners, tool runners and helpers for driving sessions.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::ToolExecutionError;
use crate::core::event::Event;
use crate::core::toolset::ToolAction;
use crate::core::types::{ToolResult, Turn};
use crate::core::usage::{Pricing, TokenUsage};
use crate::io::planner::{Planner, PlannerReply};
use crate::looping::LoopConfig;
use crate::tools::{CommandSettings, Dispatched, Dispatcher, ToolRunner};

/// One scripted planner turn.
#[derive(Debug, Clone)]
pub enum PlannerStep {
    Reply { text: String, usage: TokenUsage },
    Fail(String),
}

impl PlannerStep {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Reply {
            text: text.into(),
            usage: TokenUsage::default(),
        }
    }
}

/// Planner that replays a fixed script and records the history it was shown.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    steps: Mutex<VecDeque<PlannerStep>>,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedPlanner {
    pub fn new(steps: impl IntoIterator<Item = PlannerStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Replies with the given texts in order.
    pub fn replies<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(PlannerStep::text))
    }

    /// Histories passed to each call, in call order.
    pub fn seen(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, history: &[Turn]) -> Result<PlannerReply> {
        self.seen
            .lock()
            .map_err(|_| anyhow!("planner lock poisoned"))?
            .push(history.to_vec());
        let step = self
            .steps
            .lock()
            .map_err(|_| anyhow!("planner lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("planner script exhausted"))?;
        match step {
            PlannerStep::Reply { text, usage } => Ok(PlannerReply { text, usage }),
            PlannerStep::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Tool runner that returns fixed outcomes and records every action.
#[derive(Debug, Default)]
pub struct ScriptedTools {
    outcomes: Mutex<VecDeque<Result<ToolResult, ToolExecutionError>>>,
    actions: Mutex<Vec<ToolAction>>,
}

impl ScriptedTools {
    pub fn new(outcomes: impl IntoIterator<Item = Result<ToolResult, ToolExecutionError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn actions(&self) -> Vec<ToolAction> {
        self.actions
            .lock()
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ToolRunner for ScriptedTools {
    async fn dispatch(
        &self,
        action: &ToolAction,
        _cancel: &CancellationToken,
        _budget: Duration,
    ) -> Result<Dispatched, ToolExecutionError> {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action.clone());
        }
        if let ToolAction::MarkComplete { summary } = action {
            return Ok(Dispatched::Complete {
                summary: summary.clone(),
            });
        }
        let next = self
            .outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front());
        match next {
            Some(outcome) => outcome.map(Dispatched::Finished),
            None => Ok(Dispatched::Finished(ToolResult::message("ok"))),
        }
    }
}

/// Tool runner whose calls take `delay` and ignore cancellation.
#[derive(Debug, Clone, Copy)]
pub struct StallingTools {
    delay: Duration,
}

impl StallingTools {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ToolRunner for StallingTools {
    async fn dispatch(
        &self,
        action: &ToolAction,
        _cancel: &CancellationToken,
        _budget: Duration,
    ) -> Result<Dispatched, ToolExecutionError> {
        if let ToolAction::MarkComplete { summary } = action {
            return Ok(Dispatched::Complete {
                summary: summary.clone(),
            });
        }
        tokio::time::sleep(self.delay).await;
        Ok(Dispatched::Finished(ToolResult::message("slow ok")))
    }
}

/// Planner response selecting `tool` with `parameters`.
pub fn decision_json(tool: &str, parameters: Value) -> String {
    json!({
        "next_action": format!("use {tool}"),
        "tool_call": { "name": tool, "parameters": parameters }
    })
    .to_string()
}

/// Planner response that runs `command`.
pub fn run_command_json(command: &str) -> String {
    decision_json("run-command", json!({ "command": command }))
}

/// Planner response that completes the task.
pub fn complete_json(summary: &str) -> String {
    decision_json("mark-complete", json!({ "summary": summary }))
}

/// Fast limits, no conversation logs, no cost limit.
pub fn test_loop_config() -> LoopConfig {
    LoopConfig {
        max_retries: 3,
        command_timeout: Duration::from_secs(10),
        max_total_cost_usd: 0.0,
        pricing: Pricing {
            input_per_million: 0.4,
            output_per_million: 0.4,
        },
        termination_grace: Duration::from_millis(500),
        log_dir: None,
        system_prompt: None,
    }
}

/// Real dispatcher using `sh` and short grace periods.
pub fn test_dispatcher() -> Dispatcher {
    Dispatcher::new(CommandSettings {
        shell: "sh".to_string(),
        output_limit_bytes: 100_000,
        grace: Duration::from_millis(500),
    })
}

/// Drain events until the channel closes.
pub async fn collect_events(events: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push(event);
    }
    collected
}
