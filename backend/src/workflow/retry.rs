//! Bounded retry for natural-key conflicts.
//!
//! Step instance creation, document slot creation and version numbering are
//! read-then-insert sequences. Two concurrent requests can both read "absent"
//! (or the same max version) and race on the insert; the loser sees a unique
//! violation, reports [`WorkflowError::ConflictRetryable`], and the operation
//! starts over from the read. A [`RetryBudget`] caps how many times that may
//! happen before the conflict is surfaced as an upstream failure.

use tracing::warn;

use super::error::WorkflowError;

#[derive(Debug)]
pub struct RetryBudget {
    operation: &'static str,
    remaining: u32,
    attempts: u32,
}

impl RetryBudget {
    pub fn new(operation: &'static str, max_retries: u32) -> Self {
        Self { operation, remaining: max_retries, attempts: 0 }
    }

    /// Absorb one conflict. Errors once the budget is exhausted.
    pub fn absorb(&mut self, error: WorkflowError) -> Result<(), WorkflowError> {
        let WorkflowError::ConflictRetryable(reason) = error else {
            return Err(error);
        };

        self.attempts += 1;
        if self.remaining == 0 {
            return Err(WorkflowError::UpstreamFailure {
                service: "storage".to_string(),
                message: format!(
                    "{} still conflicting after {} attempt(s): {}",
                    self.operation, self.attempts, reason
                ),
            });
        }

        self.remaining -= 1;
        warn!(
            operation = self.operation,
            attempt = self.attempts,
            "Retrying after conflict: {}",
            reason
        );
        Ok(())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
