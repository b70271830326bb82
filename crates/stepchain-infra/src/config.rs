//! Global configuration loader for Stepchain.
//!
//! Reads `config.toml` from the data directory (`~/.stepchain/` in
//! production) and deserializes it into [`GlobalConfig`]. Falls back to
//! defaults when the file is missing or malformed. Also resolves the data
//! directory and the gateway API key from the environment.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use stepchain_types::config::GlobalConfig;

/// Resolve the data directory.
///
/// `STEPCHAIN_DATA_DIR` wins; otherwise `~/.stepchain`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STEPCHAIN_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stepchain")
}

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
            tracing::debug!(
                "No config.toml found at {}, using defaults",
                config_path.display()
            );
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!(
                "Failed to read {}: {err}, using defaults",
                config_path.display()
            );
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

/// Resolve the gateway API key from the configured environment variable.
///
/// A missing key is not an error at startup -- the gateway will reject calls
/// with an authentication failure at run time -- but it is worth a warning.
pub fn resolve_api_key(config: &GlobalConfig) -> SecretString {
    match std::env::var(&config.api_key_env) {
        Ok(key) if !key.is_empty() => SecretString::from(key),
        _ => {
            tracing::warn!(
                env = config.api_key_env.as_str(),
                "gateway API key not set; model calls will fail authentication"
            );
            SecretString::from(String::new())
        }
    }
}
