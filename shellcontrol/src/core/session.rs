//! Per-conversation state and the merge rules for planner-reported fields.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::core::types::{Decision, Knowledge, SessionStatus, Turn};

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// Authoritative conversation state, owned by exactly one loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: Uuid,
    history: Vec<Turn>,
    knowledge: Knowledge,
    open_tasks: Vec<String>,
    completed_tasks: Vec<String>,
    status: SessionStatus,
}

/// Read-only view used for event payloads and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub status: SessionStatus,
    pub turns: usize,
    pub knowledge: Knowledge,
    pub open_tasks: Vec<String>,
    pub completed_tasks: Vec<String>,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            history: Vec::new(),
            knowledge: Knowledge::new(),
            open_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            status: SessionStatus::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn knowledge(&self) -> &Knowledge {
        &self.knowledge
    }

    pub fn open_tasks(&self) -> &[String] {
        &self.open_tasks
    }

    pub fn completed_tasks(&self) -> &[String] {
        &self.completed_tasks
    }

    pub fn current_status(&self) -> SessionStatus {
        self.status
    }

    /// History is append-only.
    pub fn append_turn(&mut self, turn: Turn) {
        self.history.push(turn);
    }

    /// Merge planner-reported state.
    ///
    /// - `knowledge`: every present key replaces the prior value wholesale
    ///   (nested maps are not deep-merged); absent keys keep their value.
    /// - `open_tasks` / `completed_tasks`: replaced entirely when present.
    pub fn apply_decision(&mut self, decision: &Decision) {
        if let Some(update) = &decision.knowledge {
            for (key, value) in update {
                self.knowledge.insert(key.clone(), value.clone());
            }
        }
        if let Some(open) = &decision.open_tasks {
            self.open_tasks = open.clone();
        }
        if let Some(done) = &decision.completed_tasks {
            self.completed_tasks = done.clone();
        }
    }

    /// Move to `to`, enforcing the loop's state graph.
    ///
    /// Terminal statuses accept no further transitions.
    pub fn transition(&mut self, to: SessionStatus) -> Result<(), TransitionError> {
        use SessionStatus::{Aborted, Completed, Executing, Idle, Planning, Validating};

        let from = self.status;
        let allowed = match (from, to) {
            (Completed | Aborted, _) => false,
            (_, Aborted) => true,
            (Idle, Planning) => true,
            (Planning, Validating) => true,
            (Validating, Planning | Executing | Completed) => true,
            (Executing, Planning) => true,
            _ => false,
        };
        if !allowed {
            return Err(TransitionError { from, to });
        }
        self.status = to;
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            status: self.status,
            turns: self.history.len(),
            knowledge: self.knowledge.clone(),
            open_tasks: self.open_tasks.clone(),
            completed_tasks: self.completed_tasks.clone(),
        }
    }
}
