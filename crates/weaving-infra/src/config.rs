//! Configuration loader for Weaving Flow.
//!
//! Reads `config.toml` from the data directory (`~/.weave/` unless
//! `WEAVE_DATA_DIR` says otherwise) and deserializes it into [`WeaveConfig`].
//! Falls back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use weaving_types::config::WeaveConfig;

/// Environment variable that relocates the data directory.
pub const DATA_DIR_ENV: &str = "WEAVE_DATA_DIR";

/// Resolve the data directory: `WEAVE_DATA_DIR`, else `~/.weave`, else `./.weave`.
pub fn resolve_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".weave")
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`WeaveConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> WeaveConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return WeaveConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return WeaveConfig::default();
        }
    };

    match toml::from_str::<WeaveConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            WeaveConfig::default()
        }
    }
}

/// The configured database URL, or `sqlite://{data_dir}/weave.db`.
pub fn database_url(config: &WeaveConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| format!("sqlite://{}?mode=rwc", data_dir.join("weave.db").display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config, WeaveConfig::default());
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
database_url = "sqlite:///var/lib/weave/runs.db"

[browser]
headless_override = false
launch_timeout_secs = 45

[supervisor]
shutdown_grace_secs = 3
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.database_url.as_deref(), Some("sqlite:///var/lib/weave/runs.db"));
        assert_eq!(config.browser.headless_override, Some(false));
        assert_eq!(config.browser.launch_timeout_secs, 45);
        assert_eq!(config.supervisor.shutdown_grace_secs, 3);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config, WeaveConfig::default());
    }

    #[test]
    fn database_url_defaults_to_data_dir() {
        let url = database_url(&WeaveConfig::default(), Path::new("/tmp/weave"));
        assert!(url.starts_with("sqlite://"));
        assert!(url.contains("/tmp/weave/weave.db"));

        let config = WeaveConfig {
            database_url: Some("sqlite::memory:".to_string()),
            ..WeaveConfig::default()
        };
        assert_eq!(database_url(&config, Path::new("/unused")), "sqlite::memory:");
    }
}
