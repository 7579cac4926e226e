//! Session-level tests for the orchestration loop.
//!
//! Each test drives `Orchestrator::run` over a real session channel with a
//! scripted planner, and either scripted tools or the real dispatcher running
//! `sh`. No network is involved.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use shellcontrol::core::error::{AbortReason, ToolExecutionError};
use shellcontrol::core::event::Event;
use shellcontrol::core::toolset::ToolAction;
use shellcontrol::core::types::{Role, SessionStatus, ToolResult};
use shellcontrol::core::usage::TokenUsage;
use shellcontrol::looping::{LoopConfig, LoopOutcome, LoopStop, Orchestrator};
use shellcontrol::test_support::{
    PlannerStep, ScriptedPlanner, ScriptedTools, StallingTools, collect_events, complete_json,
    decision_json, run_command_json, test_dispatcher, test_loop_config,
};
use shellcontrol::tools::ToolRunner;
use shellcontrol::transport::{ClientEnd, Inbound, session_channel};

async fn run_session(
    planner: Arc<ScriptedPlanner>,
    tools: Arc<dyn ToolRunner>,
    config: LoopConfig,
    prompts: &[&str],
) -> (Vec<Event>, LoopOutcome) {
    let orchestrator = Orchestrator::new(planner, tools, config).expect("orchestrator");
    let (mut client, end) = session_channel(64, CancellationToken::new());
    for prompt in prompts {
        client
            .prompts
            .send(Inbound::Prompt((*prompt).to_string()))
            .await
            .expect("send prompt");
    }
    let task = tokio::spawn(async move { orchestrator.run(end).await });
    let events = collect_events(&mut client.events).await;
    let outcome = task.await.expect("join session");
    (events, outcome)
}

fn command_output(stdout: &str) -> ToolResult {
    ToolResult {
        ok: true,
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
        error: None,
        additional_error: None,
    }
}

fn kinds(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::kind).collect()
}

/// `ls /tmp` returning `a.txt` surfaces as a ToolResult with the no-error sentinel.
#[tokio::test]
async fn run_command_result_is_reported_with_sentinels() {
    let planner = Arc::new(ScriptedPlanner::replies([
        run_command_json("ls /tmp"),
        complete_json("listed /tmp"),
    ]));
    let tools = Arc::new(ScriptedTools::new([Ok(command_output("a.txt\n"))]));

    let (events, outcome) = run_session(
        planner.clone(),
        tools.clone(),
        test_loop_config(),
        &["list files in /tmp"],
    )
    .await;

    assert_eq!(
        kinds(&events),
        ["Prompt", "PlannerResponse", "ToolResult", "Completed"]
    );
    assert_eq!(
        serde_json::to_value(&events[2]).expect("serialize"),
        json!({
            "type": "ToolResult",
            "payload": {
                "output": "a.txt\n",
                "error": "(The command produced no error output)",
                "returncode": 0
            }
        })
    );
    assert_eq!(events[3], Event::Completed(Some("listed /tmp".to_string())));
    // Mark-complete is handled by the loop, not dispatched.
    assert_eq!(
        tools.actions(),
        [ToolAction::RunCommand {
            command: "ls /tmp".to_string()
        }]
    );
    assert_eq!(
        outcome.stop,
        LoopStop::Completed {
            summary: Some("listed /tmp".to_string())
        }
    );
    assert_eq!(outcome.session.current_status(), SessionStatus::Completed);
    assert_eq!(planner.calls(), 2);
}

/// A decision without a tool call is retried with a correction turn.
#[tokio::test]
async fn missing_tool_call_is_retried_then_completes() {
    let planner = Arc::new(ScriptedPlanner::replies([
        json!({"next_action": "think about it"}).to_string(),
        complete_json("done"),
    ]));
    let (events, outcome) = run_session(
        planner.clone(),
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
        &["do something"],
    )
    .await;

    assert_eq!(kinds(&events), ["Prompt", "Warning", "Completed"]);
    let Event::Warning(message) = &events[1] else {
        panic!("expected warning");
    };
    assert!(message.contains("no tool call"));
    assert!(message.contains("(1/3)"));

    // The second call sees the rejected response and the correction.
    let seen = planner.seen();
    let retry_history = &seen[1];
    assert_eq!(retry_history.len(), 3);
    assert_eq!(retry_history[1].role, Role::Planner);
    assert_eq!(retry_history[1].decision, None);
    assert_eq!(retry_history[2].role, Role::User);
    assert!(retry_history[2].raw_text.contains("rejected"));
    assert!(matches!(outcome.stop, LoopStop::Completed { .. }));
}

/// `max_retries` consecutive invalid responses abort without further planner calls.
#[tokio::test]
async fn retry_budget_exhaustion_aborts() {
    let planner = Arc::new(ScriptedPlanner::replies([
        "not json at all".to_string(),
        decision_json("fetch_webpage", json!({"url": "http://example.com"})),
        decision_json("run-command", json!({})),
        complete_json("never reached"),
    ]));
    let (events, outcome) = run_session(
        planner.clone(),
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
        &["do something"],
    )
    .await;

    assert_eq!(kinds(&events), ["Prompt", "Warning", "Warning", "Abort"]);
    assert_eq!(planner.calls(), 3);
    match &outcome.stop {
        LoopStop::Aborted(AbortReason::RetryBudgetExhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(*attempts, 3);
            assert!(last_error.contains("run-command"));
        }
        other => panic!("unexpected stop {other:?}"),
    }
    assert_eq!(outcome.session.current_status(), SessionStatus::Aborted);
}

/// Successful validations reset the retry counter.
#[tokio::test]
async fn retry_counter_resets_after_valid_response() {
    let planner = Arc::new(ScriptedPlanner::replies([
        "oops".to_string(),
        "oops".to_string(),
        run_command_json("true"),
        "oops".to_string(),
        "oops".to_string(),
        complete_json("made it"),
    ]));
    let (events, outcome) = run_session(
        planner,
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
        &["go"],
    )
    .await;

    assert_eq!(
        kinds(&events),
        [
            "Prompt",
            "Warning",
            "Warning",
            "PlannerResponse",
            "ToolResult",
            "Warning",
            "Warning",
            "Completed"
        ]
    );
    assert!(matches!(outcome.stop, LoopStop::Completed { .. }));
}

/// A command exceeding its budget is killed and reported; the session keeps going.
#[tokio::test]
async fn command_timeout_is_recoverable() {
    let planner = Arc::new(ScriptedPlanner::replies([
        run_command_json("sleep 5"),
        complete_json("gave up waiting"),
    ]));
    let config = LoopConfig {
        command_timeout: Duration::from_millis(200),
        ..test_loop_config()
    };
    let (events, outcome) = run_session(
        planner.clone(),
        Arc::new(test_dispatcher()),
        config,
        &["wait a bit"],
    )
    .await;

    assert_eq!(
        kinds(&events),
        ["Prompt", "PlannerResponse", "ToolResult", "Completed"]
    );
    let Event::ToolResult(payload) = &events[2] else {
        panic!("expected tool result");
    };
    assert_eq!(payload.additional_error.as_deref(), Some("timeout"));
    assert_eq!(payload.returncode, 0);

    let feedback = &planner.seen()[1][2];
    assert_eq!(feedback.role, Role::Tool);
    assert!(feedback.raw_text.contains("exceeded its time limit"));
    assert!(matches!(outcome.stop, LoopStop::Completed { .. }));
}

/// Termination during a running command kills it and emits exactly one Abort.
#[tokio::test]
async fn termination_kills_running_command() {
    let planner = Arc::new(ScriptedPlanner::replies([
        run_command_json("echo started; sleep 10"),
        complete_json("never reached"),
    ]));
    let orchestrator = Orchestrator::new(
        planner.clone(),
        Arc::new(test_dispatcher()),
        test_loop_config(),
    )
    .expect("orchestrator");
    let (mut client, end) = session_channel(64, CancellationToken::new());
    client
        .prompts
        .send(Inbound::Prompt("sleep".to_string()))
        .await
        .expect("send");

    let started = Instant::now();
    let task = tokio::spawn(async move { orchestrator.run(end).await });
    let mut events = Vec::new();
    while let Some(event) = client.events.recv().await {
        if matches!(event, Event::PlannerResponse(_)) {
            tokio::time::sleep(Duration::from_millis(200)).await;
            client.termination.terminate();
        }
        events.push(event);
    }
    let outcome = task.await.expect("join");

    assert_eq!(kinds(&events), ["Prompt", "PlannerResponse", "Abort"]);
    assert_eq!(events[2], Event::Abort("Terminated on request.".to_string()));
    assert_eq!(outcome.stop, LoopStop::Aborted(AbortReason::Terminated));
    assert_eq!(outcome.session.current_status(), SessionStatus::Aborted);
    assert_eq!(planner.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Termination before any prompt still produces a single Abort.
#[tokio::test]
async fn termination_while_idle_aborts() {
    let planner = Arc::new(ScriptedPlanner::default());
    let orchestrator = Orchestrator::new(
        planner.clone(),
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
    )
    .expect("orchestrator");
    let cancel = CancellationToken::new();
    let (mut client, end) = session_channel(8, cancel.clone());
    cancel.cancel();

    let outcome = orchestrator.run(end).await;
    let events = collect_events(&mut client.events).await;
    assert_eq!(events, [Event::Abort("Terminated on request.".to_string())]);
    assert_eq!(outcome.stop, LoopStop::Aborted(AbortReason::Terminated));
    assert_eq!(planner.calls(), 0);
}

/// A disconnected client stops the loop before it calls the planner.
#[tokio::test]
async fn disconnected_client_aborts_silently() {
    let planner = Arc::new(ScriptedPlanner::replies([complete_json("unused")]));
    let orchestrator = Orchestrator::new(
        planner.clone(),
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
    )
    .expect("orchestrator");
    let (client, end) = session_channel(8, CancellationToken::new());
    client
        .prompts
        .send(Inbound::Prompt("hello".to_string()))
        .await
        .expect("send");
    drop(client.events);

    let outcome = orchestrator.run(end).await;
    assert_eq!(outcome.stop, LoopStop::Aborted(AbortReason::TransportClosed));
    assert_eq!(outcome.stop.conclusion(), "disconnected");
    assert_eq!(planner.calls(), 0);
}

/// Tool failures surface as ToolError and are fed back to the planner.
#[tokio::test]
async fn tool_execution_error_is_not_fatal() {
    let planner = Arc::new(ScriptedPlanner::replies([
        decision_json("read_file", json!({"filename": "/nope"})),
        complete_json("file is missing"),
    ]));
    let tools = Arc::new(ScriptedTools::new([Err(ToolExecutionError::filesystem(
        "Read error: /nope: No such file or directory",
    ))]));
    let (events, outcome) =
        run_session(planner.clone(), tools, test_loop_config(), &["read /nope"]).await;

    assert_eq!(
        kinds(&events),
        ["Prompt", "PlannerResponse", "ToolError", "Completed"]
    );
    assert_eq!(
        events[2],
        Event::ToolError("Read error: /nope: No such file or directory".to_string())
    );
    let feedback = &planner.seen()[1][2];
    assert!(feedback.raw_text.contains("read-file tool failed (filesystem)"));
    assert!(matches!(outcome.stop, LoopStop::Completed { .. }));
}

/// A failing planner call aborts the session.
#[tokio::test]
async fn planner_failure_aborts() {
    let planner = Arc::new(ScriptedPlanner::new([PlannerStep::Fail(
        "connection refused".to_string(),
    )]));
    let (events, outcome) = run_session(
        planner,
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
        &["go"],
    )
    .await;

    assert_eq!(kinds(&events), ["Prompt", "Abort"]);
    assert!(matches!(
        outcome.stop,
        LoopStop::Aborted(AbortReason::PlannerFailed { .. })
    ));
    assert_eq!(outcome.stop.conclusion(), "failed");
}

/// Accumulated planner cost above the limit aborts after the tool call.
#[tokio::test]
async fn cost_limit_aborts_after_tool() {
    let planner = Arc::new(ScriptedPlanner::new([
        PlannerStep::Reply {
            text: run_command_json("echo hi"),
            usage: TokenUsage {
                prompt_tokens: 1_000_000,
                completion_tokens: 250_000,
            },
        },
        PlannerStep::text(complete_json("unused")),
    ]));
    let config = LoopConfig {
        max_total_cost_usd: 0.1,
        ..test_loop_config()
    };
    let (events, outcome) = run_session(
        planner.clone(),
        Arc::new(ScriptedTools::default()),
        config,
        &["go"],
    )
    .await;

    assert_eq!(
        kinds(&events),
        ["Prompt", "PlannerResponse", "ToolResult", "Abort"]
    );
    assert!(matches!(
        outcome.stop,
        LoopStop::Aborted(AbortReason::CostLimitExceeded { .. })
    ));
    assert_eq!(outcome.stop.conclusion(), "aborted_due_cost");
    assert!((outcome.usage.total_cost - 0.5).abs() < 1e-9);
    assert_eq!(planner.calls(), 1);
}

/// Knowledge merges per key and history only grows across planner calls.
#[tokio::test]
async fn knowledge_and_history_accumulate() {
    let planner = Arc::new(ScriptedPlanner::replies([
        json!({
            "knowledge": {"os": "linux", "net": {"ip": "10.0.0.2"}},
            "open_tasks": ["inspect", "report"],
            "tool_call": {"name": "run-command", "parameters": {"command": "uname"}}
        })
        .to_string(),
        json!({
            "knowledge": {"net": {"up": true}},
            "open_tasks": [],
            "completed_tasks": ["inspect", "report"],
            "tool_call": {"name": "mark-complete", "parameters": {}}
        })
        .to_string(),
    ]));
    let (_, outcome) = run_session(
        planner.clone(),
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
        &["inspect the host"],
    )
    .await;

    let session = &outcome.session;
    assert_eq!(session.knowledge()["os"], json!("linux"));
    assert_eq!(session.knowledge()["net"], json!({"up": true}));
    assert!(session.open_tasks().is_empty());
    assert_eq!(session.completed_tasks().len(), 2);
    assert_eq!(
        outcome.stop,
        LoopStop::Completed { summary: None }
    );

    let seen = planner.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].len() < seen[1].len());
    assert_eq!(seen[0][..], seen[1][..seen[0].len()]);
    assert_eq!(&session.history()[..seen[1].len()], &seen[1][..]);
}

/// Prompts queued while a session runs are added before the next planner call.
#[tokio::test]
async fn queued_prompts_advance_the_session() {
    let planner = Arc::new(ScriptedPlanner::replies([complete_json("both handled")]));
    let (events, _) = run_session(
        planner.clone(),
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
        &["first request", "and also this"],
    )
    .await;

    assert_eq!(kinds(&events), ["Prompt", "Prompt", "Completed"]);
    let texts: Vec<String> = planner.seen()[0]
        .iter()
        .map(|turn| turn.raw_text.clone())
        .collect();
    assert_eq!(texts, ["first request", "and also this"]);
}

/// Fenced responses from the planner are accepted.
#[tokio::test]
async fn fenced_response_is_accepted() {
    let fenced = format!("```json\n{}\n```", complete_json("fenced"));
    let planner = Arc::new(ScriptedPlanner::replies([fenced]));
    let (events, _) = run_session(
        planner,
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
        &["go"],
    )
    .await;
    assert_eq!(events.last(), Some(&Event::Completed(Some("fenced".to_string()))));
}

/// A finished session writes its conversation log.
#[tokio::test]
async fn conversation_log_is_written() {
    let temp = tempfile::tempdir().expect("tempdir");
    let planner = Arc::new(ScriptedPlanner::replies([
        run_command_json("echo hello"),
        complete_json("said hello"),
    ]));
    let config = LoopConfig {
        log_dir: Some(temp.path().to_path_buf()),
        system_prompt: Some("system".to_string()),
        ..test_loop_config()
    };
    let (_, outcome) = run_session(
        planner,
        Arc::new(test_dispatcher()),
        config,
        &["say hello"],
    )
    .await;

    let path = outcome.log_path.expect("log path");
    assert!(path.starts_with(temp.path()));
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(record["conclusion"], "completed");
    assert_eq!(record["user_prompt"], "say hello");
    assert_eq!(record["model"], "scripted");
    assert_eq!(record["messages"].as_array().map(Vec::len), Some(4));
    assert!(
        record["messages"][2]["raw_text"]
            .as_str()
            .expect("tool text")
            .contains("hello")
    );
}

/// A client that stops reading must not keep termination from landing.
#[tokio::test]
async fn terminate_lands_while_event_queue_is_full() {
    let planner = Arc::new(ScriptedPlanner::replies([run_command_json("ls")]));
    let orchestrator = Orchestrator::new(
        planner.clone(),
        Arc::new(ScriptedTools::default()),
        test_loop_config(),
    )
    .expect("orchestrator");
    let (client, end) = session_channel(1, CancellationToken::new());
    client
        .prompts
        .send(Inbound::Prompt("list files".to_string()))
        .await
        .expect("send");
    let session = tokio::spawn(async move { orchestrator.run(end).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    client.termination.terminate();
    let outcome = tokio::time::timeout(Duration::from_secs(2), session)
        .await
        .expect("loop stopped within the grace period")
        .expect("join");

    assert_eq!(outcome.stop, LoopStop::Aborted(AbortReason::Terminated));
    assert_eq!(planner.calls(), 1);
}

/// Dropping the event stream mid-tool stops the loop before the next planner call.
#[tokio::test]
async fn disconnect_during_tool_call_stops_planning() {
    let planner = Arc::new(ScriptedPlanner::replies([
        run_command_json("ls"),
        complete_json("unused"),
    ]));
    let orchestrator = Orchestrator::new(
        planner.clone(),
        Arc::new(StallingTools::new(Duration::from_millis(300))),
        test_loop_config(),
    )
    .expect("orchestrator");
    let (client, end) = session_channel(8, CancellationToken::new());
    let ClientEnd {
        prompts,
        mut events,
        ..
    } = client;
    prompts
        .send(Inbound::Prompt("list files".to_string()))
        .await
        .expect("send");
    let session = tokio::spawn(async move { orchestrator.run(end).await });

    loop {
        match events.recv().await {
            Some(Event::PlannerResponse(_)) => break,
            Some(_) => {}
            None => panic!("event stream closed before the planner replied"),
        }
    }
    drop(events);

    let outcome = tokio::time::timeout(Duration::from_secs(2), session)
        .await
        .expect("loop stopped")
        .expect("join");
    assert_eq!(outcome.stop, LoopStop::Aborted(AbortReason::TransportClosed));
    assert_eq!(planner.calls(), 1);
    drop(prompts);
}
