//! CLI configuration

use crate::error::{CliError, CliResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which provider adapter commands run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local simulator persisted to a JSON state file
    #[default]
    Local,
    /// HTTP gateway
    Http,
}

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    /// Gateway endpoint for the http provider
    pub endpoint: Option<String>,

    /// Default provider
    pub provider: Option<ProviderKind>,

    /// State file of the local provider
    pub state_file: Option<PathBuf>,

    /// Seconds between stability polls
    pub poll_interval_seconds: Option<u64>,

    /// Stability wait timeout when `--timeout` is not given
    pub default_timeout_seconds: Option<u64>,
}

impl CliConfig {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> CliResult<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let config: CliConfig =
                toml::from_str(&contents).map_err(|e| CliError::Settings(e.to_string()))?;
            Ok(config)
        } else {
            Ok(CliConfig::default())
        }
    }

    /// Get the default configuration file path
    fn default_config_path() -> CliResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::Settings("Cannot find config directory".into()))?;
        Ok(config_dir.join("deployfish").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert!(config.endpoint.is_none());
        assert!(config.provider.is_none());
    }

    #[test]
    fn test_load_missing_config() {
        let config = CliConfig::load(Some("/nonexistent/path/config.toml")).unwrap();
        assert!(config.state_file.is_none());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "provider = \"http\"\nendpoint = \"http://gateway:9000\"\npoll_interval_seconds = 2\n",
        )
        .unwrap();

        let config = CliConfig::load(path.to_str()).unwrap();
        assert_eq!(config.provider, Some(ProviderKind::Http));
        assert_eq!(config.endpoint.as_deref(), Some("http://gateway:9000"));
        assert_eq!(config.poll_interval_seconds, Some(2));
        assert!(config.default_timeout_seconds.is_none());
    }

    #[test]
    fn test_invalid_config_is_a_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "provider = \"carrier-pigeon\"\n").unwrap();

        let err = CliConfig::load(path.to_str()).unwrap_err();
        assert!(matches!(err, CliError::Settings(_)));
    }
}
