//! Agent configuration stored as TOML (default `shellcontrol.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::usage::Pricing;

pub const DEFAULT_CONFIG_FILE: &str = "shellcontrol.toml";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_TOTAL_COST_USD: f64 = 0.5;
pub const DEFAULT_TERMINATION_GRACE_MS: u64 = 2_000;
pub const DEFAULT_SHELL: &str = "bash";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_COST_PER_MILLION: f64 = 0.4;

pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const MODEL_ENV: &str = "AGENT_MODEL";

/// Agent configuration (TOML).
///
/// Missing fields take the defaults above.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Wall-clock budget for one run-command call.
    pub command_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Consecutive invalid planner responses tolerated before aborting.
    pub max_retries: u32,

    /// Abort once accumulated planner cost exceeds this. `0` disables the check.
    pub max_total_cost_usd: f64,

    /// How long to wait for a killed command's pipes to drain.
    pub termination_grace_ms: u64,

    /// Interpreter used to run command scripts.
    pub shell: String,

    /// Save a conversation log when a session ends.
    pub save_conversations: bool,

    /// Directory for conversation logs.
    pub log_dir: PathBuf,

    /// Replaces the bundled system prompt template.
    pub system_prompt_path: Option<PathBuf>,

    pub planner: PlannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    /// OpenAI-compatible API root (the part before `/chat/completions`).
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            input_cost_per_million: DEFAULT_COST_PER_MILLION,
            output_cost_per_million: DEFAULT_COST_PER_MILLION,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            max_retries: DEFAULT_MAX_RETRIES,
            max_total_cost_usd: DEFAULT_MAX_TOTAL_COST_USD,
            termination_grace_ms: DEFAULT_TERMINATION_GRACE_MS,
            shell: DEFAULT_SHELL.to_string(),
            save_conversations: true,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            system_prompt_path: None,
            planner: PlannerConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.max_total_cost_usd.is_nan() || self.max_total_cost_usd < 0.0 {
            return Err(anyhow!("max_total_cost_usd must be >= 0"));
        }
        if self.save_conversations && self.log_dir.as_os_str().is_empty() {
            return Err(anyhow!("log_dir must be non-empty when save_conversations is set"));
        }
        if self.shell.trim().is_empty() {
            return Err(anyhow!("shell must be non-empty"));
        }
        if self.planner.base_url.trim().is_empty() {
            return Err(anyhow!("planner.base_url must be non-empty"));
        }
        if self.planner.model.trim().is_empty() {
            return Err(anyhow!("planner.model must be non-empty"));
        }
        if self.planner.request_timeout_secs == 0 {
            return Err(anyhow!("planner.request_timeout_secs must be > 0"));
        }
        if self.planner.input_cost_per_million < 0.0 || self.planner.output_cost_per_million < 0.0
        {
            return Err(anyhow!("planner costs must be >= 0"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn pricing(&self) -> Pricing {
        Pricing {
            input_per_million: self.planner.input_cost_per_million,
            output_per_million: self.planner.output_cost_per_million,
        }
    }

    /// Directory for conversation logs, if saving is enabled.
    pub fn conversation_log_dir(&self) -> Option<&Path> {
        self.save_conversations.then_some(self.log_dir.as_path())
    }

    /// Apply `OPENAI_BASE_URL` / `AGENT_MODEL` from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.planner.base_url = url.trim().to_string();
        }
        if let Some(model) = lookup(MODEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.planner.model = model.trim().to_string();
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
