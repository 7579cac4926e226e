//! Planner-driven shell agent.
//!
//! A planner (an LLM behind an HTTP API) reads the conversation and picks one
//! tool call per turn; the loop validates it, runs it, and feeds the result
//! back until the planner marks the task complete. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (decision validation, session
//!   merge rules, retry and cost budgets, events). No I/O.
//! - **[`tools`]**: The Tool Dispatcher and its executors.
//! - **[`io`]**: Side-effecting operations (processes, config, planner HTTP,
//!   logs). Isolated to enable fakes in tests.
//!
//! [`looping`] drives a session over the queues in [`transport`].

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod transport;
