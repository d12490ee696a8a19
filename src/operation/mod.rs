//! Fault-tolerant sequencing of risky hardware actions.
//!
//! A [`RecoverableOperation`] walks its steps through Attempt and Error
//! states. Failures are put to the operator through an
//! [`ErrorChannel`](crate::operator::ErrorChannel), who picks Retry, Ignore
//! or Abort as the step's [`RecoveryPolicy`] allows.

mod engine;
mod executor;
pub mod step;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use engine::{OperationOutcome, OperationState, RecoverableOperation, RecoveryPolicy, Transition, Trigger};
pub use executor::{ExecutorStatus, OperationExecutor};
pub use step::{FnStep, Step, StepError, WaitUntil};

/// Defaults for wait-until steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Interval between condition checks (in milliseconds).
    pub wait_poll_ms: u64,
    /// Time a condition may take before the step fails (in milliseconds).
    pub wait_timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            wait_poll_ms: step::DEFAULT_WAIT_POLL.as_millis() as u64,
            wait_timeout_ms: step::DEFAULT_WAIT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl RecoveryConfig {
    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// A wait step using these intervals.
    pub fn wait_until<C, F>(&self, name: impl Into<String>, condition: F) -> WaitUntil<C, F>
    where
        F: Fn(&C) -> bool + Send + Sync,
    {
        WaitUntil::new(name, condition)
            .with_poll(self.wait_poll())
            .with_timeout(self.wait_timeout())
    }
}
