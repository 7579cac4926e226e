//! Bounded retry budget for invalid planner output.

/// Outcome of recording one validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Ask the planner again; `attempt` failures so far.
    Retry { attempt: u32 },
    /// Consecutive failures reached the configured maximum.
    Exhausted { attempts: u32 },
}

/// Counts consecutive validation failures against `max_retries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    max_retries: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            used: 0,
        }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Increment the counter; retry while it stays below the maximum.
    pub fn record_failure(&mut self) -> RetryVerdict {
        self.used += 1;
        if self.used < self.max_retries {
            RetryVerdict::Retry { attempt: self.used }
        } else {
            RetryVerdict::Exhausted {
                attempts: self.used,
            }
        }
    }

    /// A valid decision clears the streak.
    pub fn reset(&mut self) {
        self.used = 0;
    }
}
