//! Global configuration types for Mender.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls engine
//! limits, retry backoff, the HTTP server, and executor settings.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.mender/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub executors: ExecutorConfig,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on workflows driven at the same time.
    #[serde(default = "default_max_concurrent_workflows")]
    pub max_concurrent_workflows: usize,

    /// Per-attempt executor timeout.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Applied to task specs that omit `max_retries`.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Highest `max_retries` a request may ask for.
    #[serde(default = "default_max_retries_limit")]
    pub max_retries_limit: u32,

    /// Duration of the simulated work unit for payloads without real work.
    #[serde(default = "default_simulated_work_ms")]
    pub simulated_work_ms: u64,

    #[serde(default = "default_list_limit")]
    pub default_list_limit: u32,

    #[serde(default = "default_max_list_limit")]
    pub max_list_limit: u32,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Pause before a drive that stopped on a storage error is retried.
    #[serde(default = "default_redrive_delay_ms")]
    pub redrive_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_max_concurrent_workflows() -> usize {
    64
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_retries_limit() -> u32 {
    10
}

fn default_simulated_work_ms() -> u64 {
    1000
}

fn default_list_limit() -> u32 {
    10
}

fn default_max_list_limit() -> u32 {
    100
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_redrive_delay_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: default_max_concurrent_workflows(),
            task_timeout_secs: default_task_timeout_secs(),
            default_max_retries: default_max_retries(),
            max_retries_limit: default_max_retries_limit(),
            simulated_work_ms: default_simulated_work_ms(),
            default_list_limit: default_list_limit(),
            max_list_limit: default_max_list_limit(),
            event_bus_capacity: default_event_bus_capacity(),
            redrive_delay_ms: default_redrive_delay_ms(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Delay inserted between a failed attempt and its retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Re-dispatch immediately.
    None,
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(retry - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Exponential {
            base_ms: 1000,
            max_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by CORS. A single `"*"` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Sandbox root for IO_OPERATION tasks. Defaults to `{data_dir}/io`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_root: Option<String>,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            io_root: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.engine.max_concurrent_workflows, 64);
        assert_eq!(config.engine.default_max_retries, 3);
        assert_eq!(config.engine.default_list_limit, 10);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:3000"]);
        assert!(config.executors.io_root.is_none());
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.task_timeout_secs, 300);
        assert_eq!(config.engine.redrive_delay_ms, 5000);
        assert_eq!(
            config.engine.backoff,
            BackoffConfig::Exponential {
                base_ms: 1000,
                max_ms: 30_000
            }
        );
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
[engine]
max_concurrent_workflows = 8
simulated_work_ms = 0

[engine.backoff]
kind = "fixed"
delay_ms = 250

[server]
host = "0.0.0.0"
port = 9000
cors_origins = ["*"]

[executors]
io_root = "/tmp/mender-io"
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_concurrent_workflows, 8);
        assert_eq!(config.engine.simulated_work_ms, 0);
        assert_eq!(config.engine.default_max_retries, 3);
        assert_eq!(config.engine.backoff, BackoffConfig::Fixed { delay_ms: 250 });
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.executors.io_root.as_deref(), Some("/tmp/mender-io"));
        assert_eq!(config.executors.http_timeout_secs, 30);
    }

    #[test]
    fn test_backoff_none_parses() {
        let config: EngineConfig = toml::from_str("[backoff]\nkind = \"none\"\n").unwrap();
        assert_eq!(config.backoff, BackoffConfig::None);
    }
}
