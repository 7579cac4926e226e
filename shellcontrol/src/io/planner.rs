//! Planner capability and its OpenAI-compatible HTTP backend.
//!
//! The loop only sees [`Planner`]: conversation history in, raw text out.
//! Tests swap in scripted planners without any network.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::{Role, Turn};
use crate::core::usage::TokenUsage;
use crate::io::config::PlannerConfig;

/// Raw planner output plus the tokens it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerReply {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait Planner: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce the next planner turn for `history`.
    async fn invoke(&self, history: &[Turn]) -> Result<PlannerReply>;
}

/// Chat-completions client (`POST {base_url}/chat/completions`).
pub struct OpenAiPlanner {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    system_prompt: String,
}

impl OpenAiPlanner {
    /// Build a client, reading the API key from `config.api_key_env`.
    pub fn from_config(config: &PlannerConfig, system_prompt: String) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("read API key from ${}", config.api_key_env))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            system_prompt,
        })
    }

    fn build_messages<'a>(&'a self, history: &'a [Turn]) -> Vec<ChatMessage<'a>> {
        std::iter::once(ChatMessage {
            role: "system",
            content: &self.system_prompt,
        })
        .chain(history.iter().map(|turn| ChatMessage {
            role: match turn.role {
                Role::User | Role::Tool => "user",
                Role::Planner => "assistant",
            },
            content: &turn.raw_text,
        }))
        .collect()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[async_trait]
impl Planner for OpenAiPlanner {
    fn model_name(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, turns = history.len()))]
    async fn invoke(&self, history: &[Turn]) -> Result<PlannerReply> {
        let request = ChatRequest {
            model: &self.model,
            messages: self.build_messages(history),
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|parsed| parsed.error.message)
                .unwrap_or(body);
            return Err(anyhow!("planner returned {status}: {message}"));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("decode chat completion response")?;
        let reply = parse_reply(parsed)?;
        debug!(
            prompt_tokens = reply.usage.prompt_tokens,
            completion_tokens = reply.usage.completion_tokens,
            "planner replied"
        );
        Ok(reply)
    }
}

fn parse_reply(response: ChatResponse) -> Result<PlannerReply> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no choices in planner response"))?;
    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();
    Ok(PlannerReply {
        text: choice.message.content.unwrap_or_default().trim().to_string(),
        usage,
    })
}
