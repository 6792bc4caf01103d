use crate::cli::OutputFormat;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use stars_link::LinkConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const APP_DIR: &str = "stars";
const CONFIG_FILE: &str = "config.toml";
const CREDENTIALS_FILE: &str = "credentials.json";

/// CLI configuration stored as TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default output format
    pub output: OutputFormat,

    /// Where the credential is kept. Defaults to `credentials.json` next to the
    /// configuration file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,

    /// Server and connection settings
    pub link: LinkConfig,
}

impl AppConfig {
    /// Load from `path`, or the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = Self::resolve_path(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Overwrite the configuration file with defaults.
    pub fn reset(path: Option<&Path>) -> Result<()> {
        Self::default().save(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Credential file to use with this configuration.
    pub fn credentials_path(&self, config_path: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = &self.credentials_file {
            return Ok(path.clone());
        }
        let config_path = Self::resolve_path(config_path)?;
        let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(CREDENTIALS_FILE))
    }

    fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::default_path(),
        }
    }

    fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or_else(|| AppError::Config("cannot determine the configuration directory".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_round_trip_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.output = OutputFormat::Json;
        config.link.host = "https://stars.example".into();
        config.link.reconnect.max_attempts = 4;
        config.save(Some(&path)).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);

        AppConfig::reset(Some(&path)).unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[link]\nhost = \"http://10.0.0.2:8080\"\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.link.host, "http://10.0.0.2:8080");
        assert_eq!(config.link.reconnect, LinkConfig::default().reconnect);
        assert_eq!(config.output, OutputFormat::Pretty);
    }

    #[test]
    fn test_credentials_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = AppConfig::default();
        assert_eq!(
            config.credentials_path(Some(&path)).unwrap(),
            dir.path().join("credentials.json")
        );
    }
}
