//! Concrete task executors, one per `TaskType`.
//!
//! Each executor honours the simulation directives first and falls back to
//! simulated work when its payload does not describe any real work, so demo
//! payloads behave the same under every task type.

pub mod compute;
pub mod http;
pub mod io;

use std::path::PathBuf;
use std::time::Duration;

use mender_core::workflow::executor::{BoxTaskExecutor, ExecutorSet};
use mender_types::config::GlobalConfig;

pub use compute::ComputeExecutor;
pub use http::HttpExecutor;
pub use io::IoExecutor;

/// Build the live executor set from configuration.
///
/// `io_root` is the already-resolved sandbox for IO_OPERATION tasks.
pub fn build_executor_set(
    config: &GlobalConfig,
    io_root: PathBuf,
) -> Result<ExecutorSet, reqwest::Error> {
    let work = Duration::from_millis(config.engine.simulated_work_ms);
    let http = HttpExecutor::new(
        Duration::from_secs(config.executors.http_timeout_secs),
        work,
    )?;
    tracing::debug!(io_root = %io_root.display(), "building executor set");

    Ok(ExecutorSet::new(
        BoxTaskExecutor::new(http),
        BoxTaskExecutor::new(ComputeExecutor::new(work)),
        BoxTaskExecutor::new(IoExecutor::new(io_root, work)),
    ))
}

/// Read an optional string field, rejecting non-string values.
pub(crate) fn optional_str<'a>(
    payload: &'a serde_json::Value,
    field: &str,
) -> Result<Option<&'a str>, String> {
    match payload.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(format!("'{field}' must be a string, got {other}")),
    }
}
