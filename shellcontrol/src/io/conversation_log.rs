//! Conversation logs written when a session ends (`<log_dir>/conversation_*.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::core::types::Turn;
use crate::core::usage::UsageReport;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationRecord<'a> {
    pub timestamp: String,
    pub session_id: Uuid,
    pub user_prompt: Option<&'a str>,
    pub conclusion: &'a str,
    pub model: &'a str,
    pub system_prompt: Option<&'a str>,
    pub messages: &'a [Turn],
    pub usage: UsageReport,
}

pub struct ConversationWriteRequest<'a> {
    pub log_dir: &'a Path,
    pub session_id: Uuid,
    pub user_prompt: Option<&'a str>,
    pub conclusion: &'a str,
    pub model: &'a str,
    pub system_prompt: Option<&'a str>,
    pub messages: &'a [Turn],
    pub usage: UsageReport,
}

/// Write the record and return its path.
pub fn write_conversation(request: &ConversationWriteRequest<'_>) -> Result<PathBuf> {
    write_conversation_at(request, Local::now())
}

fn write_conversation_at(
    request: &ConversationWriteRequest<'_>,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    fs::create_dir_all(request.log_dir)
        .with_context(|| format!("create log dir {}", request.log_dir.display()))?;

    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let mut path = request.log_dir.join(format!("conversation_{stamp}.json"));
    if path.exists() {
        let short = request.session_id.simple().to_string();
        path = request
            .log_dir
            .join(format!("conversation_{stamp}_{}.json", &short[..8]));
    }

    let record = ConversationRecord {
        timestamp: now.to_rfc3339(),
        session_id: request.session_id,
        user_prompt: request.user_prompt,
        conclusion: request.conclusion,
        model: request.model,
        system_prompt: request.system_prompt,
        messages: request.messages,
        usage: request.usage,
    };
    let mut buf = serde_json::to_string_pretty(&record)?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
