//! Agent server: WebSocket sessions, SSE observers and an optional static frontend.

mod routes;
mod sse;
mod state;
mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use shellcontrol::io::config::{DEFAULT_CONFIG_FILE, load_config};
use shellcontrol::io::planner::{OpenAiPlanner, Planner};
use shellcontrol::io::prompt::{PromptInputs, render_system_prompt};
use shellcontrol::looping::Orchestrator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "shellcontrol-web")]
#[command(about = "Web server for the shell agent")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Agent config file (missing file means defaults)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory containing frontend static files
    #[arg(long, default_value = "frontend")]
    ui_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shellcontrol_web=info".parse()?)
                .add_directive("shellcontrol=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut cfg = load_config(&args.config)?;
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
    info!(model = planner.model_name(), "starting shellcontrol-web");
    let orchestrator = Orchestrator::from_config(&cfg, planner, Some(system_prompt))?;

    let state = AppState::new(Arc::new(orchestrator));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .merge(routes::router())
        .route("/ws", get(ws::ws_handler))
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    if args.ui_dir.exists() {
        info!(ui_dir = %args.ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(&args.ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %args.ui_dir.display(), "UI directory not found, API-only mode");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
