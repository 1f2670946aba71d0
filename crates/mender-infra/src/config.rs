//! Global configuration loader for Mender.
//!
//! Reads `config.toml` from the data directory (`~/.mender/` unless
//! `MENDER_DATA_DIR` says otherwise) and deserializes it into
//! [`GlobalConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::{Path, PathBuf};

use mender_types::config::GlobalConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "MENDER_DATA_DIR";

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Resolve the data directory: `MENDER_DATA_DIR`, else `~/.mender`, else
/// `./.mender` when no home directory is known.
pub fn resolve_data_dir() -> PathBuf {
    data_dir_from(std::env::var(DATA_DIR_ENV).ok())
}

fn data_dir_from(env_value: Option<String>) -> PathBuf {
    match env_value.filter(|v| !v.trim().is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mender"),
    }
}

/// Sandbox root for IO_OPERATION tasks: `executors.io_root` if set (relative
/// paths are taken from `data_dir`), otherwise `{data_dir}/io`.
pub fn resolve_io_root(config: &GlobalConfig, data_dir: &Path) -> PathBuf {
    match config.executors.io_root.as_deref() {
        Some(root) if Path::new(root).is_absolute() => PathBuf::from(root),
        Some(root) => data_dir.join(root),
        None => data_dir.join("io"),
    }
}
