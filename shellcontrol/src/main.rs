//! `shellcontrol`: run the shell agent from a terminal.
//!
//! One session per invocation. Events are printed as they arrive and Ctrl+C
//! terminates the session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use shellcontrol::core::event::Event;
use shellcontrol::core::toolset::ToolKind;
use shellcontrol::exit_codes;
use shellcontrol::io::config::{AgentConfig, DEFAULT_CONFIG_FILE, load_config, write_config};
use shellcontrol::io::planner::{OpenAiPlanner, Planner};
use shellcontrol::io::prompt::{PromptInputs, render_system_prompt};
use shellcontrol::logging;
use shellcontrol::looping::{LoopStop, Orchestrator};
use shellcontrol::transport::{Inbound, session_channel};

const EVENT_QUEUE: usize = 64;

#[derive(Parser)]
#[command(
    name = "shellcontrol",
    version,
    about = "Shell agent driven by an LLM planner"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one session for PROMPT and print its events.
    Run {
        prompt: String,
        /// Config file (missing file means defaults).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// List the tools the planner can call.
    Tools,
    /// Write a config file with default values.
    InitConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init("warn");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { prompt, config } => cmd_run(prompt, &config),
        Command::Tools => {
            cmd_tools()?;
            Ok(exit_codes::OK)
        }
        Command::InitConfig { config, force } => {
            cmd_init_config(&config, force)?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(prompt: String, config_path: &Path) -> Result<i32> {
    if prompt.trim().is_empty() {
        bail!("prompt must be non-empty");
    }
    let mut cfg = load_config(config_path)?;
    cfg.apply_env_overrides();
    cfg.validate()?;

    let system_prompt = render_system_prompt(
        cfg.system_prompt_path.as_deref(),
        PromptInputs {
            command_timeout_secs: cfg.command_timeout_secs,
        },
    )?;
    let planner: Arc<dyn Planner> =
        Arc::new(OpenAiPlanner::from_config(&cfg.planner, system_prompt.clone())?);
    let model = planner.model_name().to_string();
    let orchestrator = Orchestrator::from_config(&cfg, planner, Some(system_prompt))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    runtime.block_on(async move {
        let (mut client, end) = session_channel(EVENT_QUEUE, CancellationToken::new());
        println!("Shell agent powered by \"{model}\"");
        println!("Request from the user: \"{prompt}\"");
        let names: Vec<&str> = ToolKind::ALL.iter().map(|kind| kind.name()).collect();
        println!("Tools: {}", names.join(", "));
        println!("Press Ctrl+C to stop at any step.");

        let termination = client.termination.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, terminating session...");
                termination.terminate();
            }
        });

        let session = tokio::spawn(async move { orchestrator.run(end).await });
        client
            .prompts
            .send(Inbound::Prompt(prompt))
            .await
            .context("send prompt")?;
        while let Some(event) = client.events.recv().await {
            print_event(&event);
        }
        let outcome = session.await.context("join session task")?;

        println!("\n=== Usage Summary ===");
        println!("{}", outcome.usage.summary());
        if let Some(path) = &outcome.log_path {
            println!("Conversation saved to {}", path.display());
        }
        let code = match outcome.stop {
            LoopStop::Completed { .. } => exit_codes::OK,
            LoopStop::Aborted(_) => exit_codes::ABORTED,
        };
        Ok::<i32, anyhow::Error>(code)
    })
}

fn print_event(event: &Event) {
    match event {
        Event::Prompt(_) => {}
        Event::PlannerResponse(decision) => {
            println!("\n=== Planner Response ===");
            match serde_json::to_string_pretty(decision) {
                Ok(text) => println!("{text}"),
                Err(_) => println!("{decision:?}"),
            }
        }
        Event::ToolResult(payload) => {
            println!("\n=== Tool Output ===");
            println!("Output:\n{}", payload.output.trim_end());
            if payload.returncode != 0 || payload.additional_error.is_some() {
                println!("Errors:\n{}", payload.error.trim_end());
            }
            if let Some(extra) = &payload.additional_error {
                println!("Note: {extra}");
            }
            println!("Exit status: {}", payload.returncode);
        }
        Event::ToolError(message) => {
            println!("\n=== Tool Output - ERROR ===");
            println!("{message}");
        }
        Event::Info(message) => println!("\n==> {message}"),
        Event::Warning(message) => println!("\n==> WARNING: {message}"),
        Event::Abort(message) => println!("\n==> ERROR: {message}"),
        Event::Completed(summary) => {
            println!("\n==> The task is complete.");
            if let Some(summary) = summary {
                println!("{summary}");
            }
        }
    }
}

fn cmd_tools() -> Result<()> {
    for kind in ToolKind::ALL {
        let schema = serde_json::to_string_pretty(&kind.parameters_schema())
            .context("serialize tool schema")?;
        println!("{} (alias: {})", kind.name(), kind.legacy_name());
        println!("  {}", kind.description());
        for line in schema.lines() {
            println!("  {line}");
        }
    }
    Ok(())
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())?;
    println!("Wrote {}", path.display());
    Ok(())
}
