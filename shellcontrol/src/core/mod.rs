//! Deterministic, pure logic shared by the orchestration core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod decision;
pub mod error;
pub mod event;
pub mod feedback;
pub mod session;
pub mod toolset;
pub mod types;
pub mod usage;
