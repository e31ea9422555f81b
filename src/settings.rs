//! Client settings
//!
//! Read from a YAML file, by default `<config dir>/tmc/config.yaml`:
//!
//! ```yaml
//! timeout_ms: 30000
//! organization_path: acme/
//! preferred_server: DB01
//! state_file: /var/lib/tmc/state.json
//! ```

use crate::container::{ContainerManager, FirstServer, NamedServer, OrgPath};
use crate::error::{Result, TmError};
use crate::server::{StateStore, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

/// tmc client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Bound on every remote call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Organizational path used when none is given
    #[serde(default)]
    pub organization_path: OrgPath,
    /// Database server new containers go to; the first one when unset
    #[serde(default)]
    pub preferred_server: Option<String>,
    /// State file of the in-process server
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            organization_path: OrgPath::root(),
            preferred_server: None,
            state_file: None,
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("tmc")
            .join("config.yaml")
    }

    /// Load settings from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    /// Parse settings from YAML
    pub fn parse_str(content: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(TmError::InvalidConfig(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }

        if let Some(server) = &self.preferred_server {
            if server.trim().is_empty() {
                return Err(TmError::InvalidConfig(
                    "preferred_server must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// State store at the configured location, or the default one
    pub fn state_store(&self) -> StateStore {
        StateStore::new(
            self.state_file
                .clone()
                .unwrap_or_else(StateStore::default_path),
        )
    }

    /// Container manager honouring `preferred_server`
    pub fn container_manager(&self) -> ContainerManager {
        match &self.preferred_server {
            Some(name) => ContainerManager::with_selector(NamedServer(name.clone())),
            None => ContainerManager::with_selector(FirstServer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = tempdir().unwrap();
        let settings = Settings::load(&temp.path().join("config.yaml")).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_parse_settings() {
        let settings = Settings::parse_str(
            r#"
timeout_ms: 1500
organization_path: acme
preferred_server: DB02
state_file: /tmp/tmc-state.json
"#,
        )
        .unwrap();

        assert_eq!(settings.timeout(), Duration::from_millis(1500));
        assert_eq!(settings.organization_path.as_str(), "acme/");
        assert_eq!(settings.preferred_server.as_deref(), Some("DB02"));
        assert_eq!(
            settings.state_store().path(),
            Path::new("/tmp/tmc-state.json")
        );
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings = Settings::parse_str("preferred_server: DB01\n").unwrap();

        assert_eq!(settings.timeout_ms, default_timeout_ms());
        assert_eq!(settings.organization_path, OrgPath::root());
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(
            Settings::parse_str("timeout_ms: 0\n"),
            Err(TmError::InvalidConfig(_))
        ));
        assert!(matches!(
            Settings::parse_str("timeout_ms: soon\n"),
            Err(TmError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "timeout_ms: 250\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.timeout_ms, 250);
    }
}
