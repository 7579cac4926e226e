//! Orchestration loop: drives one session from its first prompt to a terminal state.
//!
//! The loop is the only writer of [`Session`] state. At most one of {planner
//! call, tool call} is in flight, and both yield to the termination signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::budget::{RetryBudget, RetryVerdict};
use crate::core::decision::DecisionValidator;
use crate::core::error::{AbortReason, ToolExecutionError};
use crate::core::event::{Event, ToolResultPayload};
use crate::core::feedback::{correction_message, render_tool_error, render_tool_feedback};
use crate::core::session::Session;
use crate::core::toolset::ToolAction;
use crate::core::types::{SessionStatus, ToolResult, Turn};
use crate::core::usage::{Pricing, UsageReport, UsageTracker};
use crate::io::config::AgentConfig;
use crate::io::conversation_log::{ConversationWriteRequest, write_conversation};
use crate::io::planner::Planner;
use crate::tools::{CommandSettings, Dispatched, Dispatcher, ToolRunner};
use crate::transport::{EventSink, Inbound, LoopEnd, TransportError};

/// Loop settings derived from [`AgentConfig`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_retries: u32,
    pub command_timeout: Duration,
    /// `0` disables the cost check.
    pub max_total_cost_usd: f64,
    pub pricing: Pricing,
    /// How long to wait for a cancelled tool call to resolve.
    pub termination_grace: Duration,
    pub log_dir: Option<PathBuf>,
    /// Recorded in conversation logs.
    pub system_prompt: Option<String>,
}

impl LoopConfig {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            command_timeout: cfg.command_timeout(),
            max_total_cost_usd: cfg.max_total_cost_usd,
            pricing: cfg.pricing(),
            termination_grace: cfg.termination_grace(),
            log_dir: cfg.conversation_log_dir().map(PathBuf::from),
            system_prompt: None,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStop {
    Completed { summary: Option<String> },
    Aborted(AbortReason),
}

impl LoopStop {
    /// Label recorded in the conversation log.
    pub fn conclusion(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Aborted(reason) => reason.conclusion(),
        }
    }
}

/// Summary of one session run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub session: Session,
    pub stop: LoopStop,
    pub usage: UsageReport,
    pub planner_calls: u32,
    pub user_prompt: Option<String>,
    pub log_path: Option<PathBuf>,
}

/// Mutable state of one run, owned by the loop task.
struct Run {
    session: Session,
    usage: UsageTracker,
    budget: RetryBudget,
    planner_calls: u32,
    user_prompt: Option<String>,
}

/// Drives sessions against a planner and a tool runner.
///
/// Shareable across sessions; every call to [`Orchestrator::run`] owns its session.
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    tools: Arc<dyn ToolRunner>,
    validator: DecisionValidator,
    config: LoopConfig,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        tools: Arc<dyn ToolRunner>,
        config: LoopConfig,
    ) -> Result<Self> {
        Ok(Self {
            planner,
            tools,
            validator: DecisionValidator::new()?,
            config,
        })
    }

    /// Wire the real dispatcher from `cfg`.
    pub fn from_config(
        cfg: &AgentConfig,
        planner: Arc<dyn Planner>,
        system_prompt: Option<String>,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(CommandSettings {
            shell: cfg.shell.clone(),
            output_limit_bytes: cfg.output_limit_bytes,
            grace: cfg.termination_grace(),
        });
        let mut config = LoopConfig::from_config(cfg);
        config.system_prompt = system_prompt;
        Self::new(planner, Arc::new(dispatcher), config)
    }

    /// Run a session until it completes or aborts.
    ///
    /// Exactly one Completed or Abort event is emitted at the end, unless the
    /// client is gone.
    #[instrument(skip_all, fields(session = %end.session_id))]
    pub async fn run(&self, end: LoopEnd) -> LoopOutcome {
        let LoopEnd {
            session_id,
            mut inbound,
            mut sink,
            cancel,
        } = end;
        let mut run = Run {
            session: Session::new(session_id),
            usage: UsageTracker::new(self.config.pricing),
            budget: RetryBudget::new(self.config.max_retries),
            planner_calls: 0,
            user_prompt: None,
        };

        let stop = match self
            .drive(&mut run, &mut inbound, &mut sink, &cancel)
            .await
        {
            Ok(summary) => LoopStop::Completed { summary },
            Err(reason) => {
                warn!(reason = %reason, "session aborted");
                advance(&mut run.session, SessionStatus::Aborted);
                if reason.is_observable() {
                    // A client that stopped reading must not hold the teardown.
                    let abort = sink.emit(Event::Abort(reason.to_string()));
                    match tokio::time::timeout(self.config.termination_grace, abort).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => debug!(err = %err, "abort event not delivered"),
                        Err(_) => warn!("abort event not delivered within the grace period"),
                    }
                }
                LoopStop::Aborted(reason)
            }
        };

        let usage = run.usage.report();
        info!(
            conclusion = stop.conclusion(),
            planner_calls = run.planner_calls,
            total_cost = usage.total_cost,
            "session finished"
        );
        let log_path = self.save_conversation(&run, &stop, usage);
        LoopOutcome {
            session: run.session,
            stop,
            usage,
            planner_calls: run.planner_calls,
            user_prompt: run.user_prompt,
            log_path,
        }
    }

    async fn drive(
        &self,
        run: &mut Run,
        inbound: &mut mpsc::Receiver<Inbound>,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, AbortReason> {
        let first = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AbortReason::Terminated),
            msg = inbound.recv() => match msg {
                Some(Inbound::Prompt(prompt)) => prompt,
                None => return Err(AbortReason::TransportClosed),
            },
        };
        run.user_prompt = Some(first.clone());
        accept_prompt(run, sink, cancel, first).await?;
        advance(&mut run.session, SessionStatus::Planning);

        loop {
            loop {
                match inbound.try_recv() {
                    Ok(Inbound::Prompt(prompt)) => {
                        accept_prompt(run, sink, cancel, prompt).await?;
                    }
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }
            if sink.is_closed() {
                return Err(AbortReason::TransportClosed);
            }

            let reply = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AbortReason::Terminated),
                reply = self.planner.invoke(run.session.history()) => reply,
            };
            run.planner_calls += 1;
            let reply = reply.map_err(|err| {
                error!(err = %format!("{err:#}"), "planner call failed");
                AbortReason::PlannerFailed {
                    reason: format!("{err:#}"),
                }
            })?;
            run.usage.add(reply.usage);
            advance(&mut run.session, SessionStatus::Validating);

            let validated = match self.validator.validate(&reply.text) {
                Ok(validated) => validated,
                Err(err) => {
                    run.session.append_turn(Turn::planner(reply.text, None));
                    run.session.append_turn(Turn::user(correction_message(&err)));
                    match run.budget.record_failure() {
                        RetryVerdict::Retry { attempt } => {
                            warn!(attempt, err = %err, "invalid planner response");
                            advance(&mut run.session, SessionStatus::Planning);
                            emit(
                                sink,
                                cancel,
                                Event::Warning(format!(
                                    "Invalid planner response: {err}. Retrying ({attempt}/{}).",
                                    run.budget.max_retries()
                                )),
                            )
                            .await?;
                            continue;
                        }
                        RetryVerdict::Exhausted { attempts } => {
                            return Err(AbortReason::RetryBudgetExhausted {
                                attempts,
                                last_error: err.to_string(),
                            });
                        }
                    }
                }
            };

            run.budget.reset();
            run.session.apply_decision(&validated.decision);
            run.session.append_turn(Turn::planner(
                reply.text,
                Some(validated.decision.clone()),
            ));
            let kind = validated.action.kind();

            if let ToolAction::MarkComplete { summary } = &validated.action {
                advance(&mut run.session, SessionStatus::Completed);
                info!("planner marked the task complete");
                if let Err(err) = sink.emit(Event::Completed(summary.clone())).await {
                    debug!(err = %err, "completed event not delivered");
                }
                return Ok(summary.clone());
            }

            emit(sink, cancel, Event::PlannerResponse(validated.decision)).await?;
            advance(&mut run.session, SessionStatus::Executing);

            let dispatched = self.dispatch(&validated.action, cancel).await;
            let cancelled = cancel.is_cancelled();
            let event = match dispatched {
                Ok(Dispatched::Finished(result)) => {
                    run.session
                        .append_turn(Turn::tool(render_tool_feedback(kind, &result)));
                    if cancelled || result.is_cancelled() {
                        return Err(AbortReason::Terminated);
                    }
                    Event::ToolResult(ToolResultPayload::from(&result))
                }
                Ok(Dispatched::Complete { .. }) => {
                    warn!(tool = kind.name(), "unexpected completion from tool runner");
                    Event::ToolError(format!("{} did not produce a result", kind.name()))
                }
                Err(err) => {
                    warn!(tool = kind.name(), kind = %err.kind, err = %err, "tool failed");
                    run.session.append_turn(Turn::tool(render_tool_error(kind, &err)));
                    if cancelled {
                        return Err(AbortReason::Terminated);
                    }
                    Event::ToolError(err.message)
                }
            };
            emit(sink, cancel, event).await?;
            advance(&mut run.session, SessionStatus::Planning);

            let total = run.usage.total_cost();
            let limit = self.config.max_total_cost_usd;
            if limit > 0.0 && total > limit {
                return Err(AbortReason::CostLimitExceeded {
                    total_usd: total,
                    limit_usd: limit,
                });
            }
        }
    }

    /// Run one tool call; after termination, wait at most the grace period for it.
    async fn dispatch(
        &self,
        action: &ToolAction,
        cancel: &CancellationToken,
    ) -> Result<Dispatched, ToolExecutionError> {
        let call = self
            .tools
            .dispatch(action, cancel, self.config.command_timeout);
        tokio::pin!(call);
        tokio::select! {
            biased;
            dispatched = &mut call => dispatched,
            () = cancel.cancelled() => {
                match tokio::time::timeout(self.config.termination_grace, &mut call).await {
                    Ok(dispatched) => dispatched,
                    Err(_) => {
                        warn!("tool call did not stop within the grace period");
                        Ok(Dispatched::Finished(ToolResult::cancelled()))
                    }
                }
            }
        }
    }

    fn save_conversation(&self, run: &Run, stop: &LoopStop, usage: UsageReport) -> Option<PathBuf> {
        let log_dir = self.config.log_dir.as_deref()?;
        let request = ConversationWriteRequest {
            log_dir,
            session_id: run.session.id(),
            user_prompt: run.user_prompt.as_deref(),
            conclusion: stop.conclusion(),
            model: self.planner.model_name(),
            system_prompt: self.config.system_prompt.as_deref(),
            messages: run.session.history(),
            usage,
        };
        match write_conversation(&request) {
            Ok(path) => {
                debug!(path = %path.display(), "saved conversation");
                Some(path)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to save conversation");
                None
            }
        }
    }
}

async fn accept_prompt(
    run: &mut Run,
    sink: &mut EventSink,
    cancel: &CancellationToken,
    prompt: String,
) -> Result<(), AbortReason> {
    debug!(chars = prompt.len(), "prompt accepted");
    run.session.append_turn(Turn::user(prompt.clone()));
    emit(sink, cancel, Event::Prompt(prompt)).await
}

/// Deliver an event unless termination arrives while the client queue is full.
async fn emit(
    sink: &mut EventSink,
    cancel: &CancellationToken,
    event: Event,
) -> Result<(), AbortReason> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AbortReason::Terminated),
        sent = sink.emit(event) => sent.map_err(|_: TransportError| AbortReason::TransportClosed),
    }
}

fn advance(session: &mut Session, to: SessionStatus) {
    if let Err(err) = session.transition(to) {
        error!(from = ?err.from, to = ?err.to, "invalid session transition");
        debug_assert!(false, "invalid session transition {err:?}");
        return;
    }
    debug!(status = to.as_str(), "session transition");
}
