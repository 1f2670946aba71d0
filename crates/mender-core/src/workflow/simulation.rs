//! Payload-driven failure and latency injection.
//!
//! Any payload may carry these keys, honoured by every executor before it
//! does real work:
//!
//! - `simulate_failure: true` -- every attempt fails with "Simulated Failure"
//! - `fail_attempts: N` -- attempts `1..=N` fail, later attempts proceed
//! - `simulate_delay_ms: N` -- sleep `N` ms first
//!
//! [`SimulatedExecutor`] does nothing beyond this plus a fixed unit of fake
//! work, for demos and tests.

use std::time::Duration;

use mender_types::error::ExecutionError;
use serde_json::json;

use super::executor::{TaskExecutor, TaskInvocation};

pub const SIMULATED_FAILURE: &str = "Simulated Failure";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationDirectives {
    pub always_fail: bool,
    pub fail_attempts: u32,
    pub delay: Option<Duration>,
}

impl SimulationDirectives {
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        let always_fail = payload
            .get("simulate_failure")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let fail_attempts = payload
            .get("fail_attempts")
            .and_then(|v| v.as_u64())
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0);
        let delay = payload
            .get("simulate_delay_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis);
        Self {
            always_fail,
            fail_attempts,
            delay,
        }
    }

    /// Sleep if asked to, then fail if this attempt is meant to fail.
    pub async fn apply(&self, attempt: u32) -> Result<(), ExecutionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail || attempt <= self.fail_attempts {
            return Err(ExecutionError::Failed(SIMULATED_FAILURE.to_string()));
        }
        Ok(())
    }
}

/// Executor that only simulates work.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    work: Duration,
}

impl SimulatedExecutor {
    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

/// Result reported by simulated work.
pub fn simulated_success() -> serde_json::Value {
    json!({"status": "success", "processed": true})
}

/// Sleep for `work` (if non-zero) and report success.
pub async fn simulate_work(work: Duration) -> serde_json::Value {
    if !work.is_zero() {
        tokio::time::sleep(work).await;
    }
    simulated_success()
}

impl TaskExecutor for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(
        &self,
        invocation: &TaskInvocation,
    ) -> Result<serde_json::Value, ExecutionError> {
        SimulationDirectives::from_payload(&invocation.payload)
            .apply(invocation.attempt)
            .await?;
        tracing::debug!(
            task = invocation.task_name.as_str(),
            task_type = %invocation.task_type,
            attempt = invocation.attempt,
            "simulated task work"
        );
        Ok(simulate_work(self.work).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_types::workflow::TaskType;
    use uuid::Uuid;

    fn invocation(payload: serde_json::Value, attempt: u32) -> TaskInvocation {
        TaskInvocation {
            workflow_id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            task_name: "processing".to_string(),
            task_type: TaskType::Compute,
            payload,
            attempt,
        }
    }

    #[test]
    fn directives_default_when_absent() {
        let d = SimulationDirectives::from_payload(&json!({"values": [1, 2]}));
        assert_eq!(d, SimulationDirectives::default());
    }

    #[test]
    fn directives_parse() {
        let d = SimulationDirectives::from_payload(&json!({
            "simulate_failure": true,
            "fail_attempts": 2,
            "simulate_delay_ms": 5
        }));
        assert!(d.always_fail);
        assert_eq!(d.fail_attempts, 2);
        assert_eq!(d.delay, Some(Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn always_fail_fails_every_attempt() {
        let exec = SimulatedExecutor::new(Duration::ZERO);
        for attempt in 1..=5 {
            let err = exec
                .execute(&invocation(json!({"simulate_failure": true}), attempt))
                .await
                .unwrap_err();
            assert_eq!(err, ExecutionError::Failed(SIMULATED_FAILURE.to_string()));
        }
    }

    #[tokio::test]
    async fn fail_attempts_recovers_after_n() {
        let exec = SimulatedExecutor::new(Duration::ZERO);
        let payload = json!({"fail_attempts": 1});
        assert!(exec.execute(&invocation(payload.clone(), 1)).await.is_err());
        let out = exec.execute(&invocation(payload, 2)).await.unwrap();
        assert_eq!(out, simulated_success());
    }

    #[tokio::test]
    async fn plain_payload_succeeds() {
        let exec = SimulatedExecutor::new(Duration::ZERO);
        let out = exec.execute(&invocation(json!({}), 1)).await.unwrap();
        assert_eq!(out["processed"], true);
    }
}
