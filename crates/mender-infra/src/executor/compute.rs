//! COMPUTE executor: small pure computations.
//!
//! Payload: `{operation, values?, input?}`. `sum`, `product`, `max` and
//! `min` fold the numeric `values` array; `sha256` hashes the string `input`.
//! Integer inputs give integer results unless the fold overflows, in which
//! case it is redone in floating point.

use std::time::Duration;

use mender_core::workflow::executor::{TaskExecutor, TaskInvocation};
use mender_core::workflow::simulation::{SimulationDirectives, simulate_work};
use mender_types::error::ExecutionError;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::optional_str;

pub struct ComputeExecutor {
    simulated_work: Duration,
}

impl ComputeExecutor {
    pub fn new(simulated_work: Duration) -> Self {
        Self { simulated_work }
    }
}

impl TaskExecutor for ComputeExecutor {
    fn name(&self) -> &str {
        "compute"
    }

    async fn execute(&self, invocation: &TaskInvocation) -> Result<Value, ExecutionError> {
        SimulationDirectives::from_payload(&invocation.payload)
            .apply(invocation.attempt)
            .await?;

        let payload = &invocation.payload;
        let Some(operation) = optional_str(payload, "operation").map_err(ExecutionError::Failed)?
        else {
            return Ok(simulate_work(self.simulated_work).await);
        };

        let result = match operation {
            "sha256" => {
                let input = optional_str(payload, "input")
                    .map_err(ExecutionError::Failed)?
                    .ok_or_else(|| ExecutionError::Failed("sha256 requires 'input'".to_string()))?;
                Value::String(format!("{:x}", Sha256::digest(input.as_bytes())))
            }
            "sum" | "product" | "max" | "min" => fold(operation, &numeric_values(payload)?)?,
            other => {
                return Err(ExecutionError::Failed(format!(
                    "unknown compute operation: '{other}'"
                )));
            }
        };

        tracing::debug!(
            task = invocation.task_name.as_str(),
            operation,
            "compute task completed"
        );
        Ok(json!({"operation": operation, "result": result}))
    }
}

fn numeric_values(payload: &Value) -> Result<Vec<serde_json::Number>, ExecutionError> {
    let values = payload
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| ExecutionError::Failed("'values' must be an array of numbers".to_string()))?;
    values
        .iter()
        .map(|v| match v {
            Value::Number(n) => Ok(n.clone()),
            other => Err(ExecutionError::Failed(format!("not a number: {other}"))),
        })
        .collect()
}

fn fold(operation: &str, values: &[serde_json::Number]) -> Result<Value, ExecutionError> {
    if values.is_empty() && matches!(operation, "max" | "min") {
        return Err(ExecutionError::Failed(format!("{operation} of empty 'values'")));
    }

    let ints: Option<Vec<i64>> = values.iter().map(serde_json::Number::as_i64).collect();
    if let Some(ints) = ints {
        let folded = match operation {
            "sum" => ints.iter().try_fold(0i64, |acc, v| acc.checked_add(*v)),
            "product" => ints.iter().try_fold(1i64, |acc, v| acc.checked_mul(*v)),
            "max" => ints.iter().copied().max(),
            _ => ints.iter().copied().min(),
        };
        if let Some(n) = folded {
            return Ok(json!(n));
        }
    }

    let floats: Vec<f64> = values.iter().filter_map(serde_json::Number::as_f64).collect();
    let folded = match operation {
        "sum" => floats.iter().sum(),
        "product" => floats.iter().product(),
        "max" => floats.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        _ => floats.iter().copied().fold(f64::INFINITY, f64::min),
    };
    serde_json::Number::from_f64(folded)
        .map(Value::Number)
        .ok_or_else(|| ExecutionError::Failed(format!("{operation} is not a finite number")))
}
