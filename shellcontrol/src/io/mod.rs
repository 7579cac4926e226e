//! Side-effecting helpers: processes, config, planner backend, prompts and logs.

pub mod config;
pub mod conversation_log;
pub mod planner;
pub mod process;
pub mod prompt;
