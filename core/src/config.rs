use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::exec::DEFAULT_MAX_OUTPUT_BYTES;
use crate::exec::DEFAULT_SHELL;
use crate::exec::RunnerSettings;
use crate::stream::DEFAULT_SUBSCRIBER_CAPACITY;

pub const CONFIG_TOML_FILE: &str = "forge.toml";
pub const FORGE_HOME_ENV: &str = "FORGE_HOME";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForgeConfig {
    pub channel: ChannelConfig,
    pub records: RecordsConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Per-subscriber queue depth. Events beyond it are dropped.
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordsConfig {
    /// Where execution records are written. Unset keeps them in memory.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    pub shell: String,
    pub env: BTreeMap<String, String>,
    /// Bytes of output kept in each execution record.
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            env: BTreeMap::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl RunnerConfig {
    pub fn settings(&self) -> RunnerSettings {
        RunnerSettings {
            shell: self.shell.clone(),
            env: self.env.clone(),
            max_output_bytes: self.max_output_bytes,
        }
    }
}

impl ForgeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ForgeConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel.capacity must be at least 1".to_string(),
            ));
        }
        if self.runner.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "runner.max_output_bytes must be at least 1".to_string(),
            ));
        }
        if self.runner.shell.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "runner.shell must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// `$FORGE_HOME`, falling back to `~/.forge`.
pub fn find_forge_home() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os(FORGE_HOME_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|home| home.join(".forge"))
}

pub fn default_config_path() -> Option<PathBuf> {
    find_forge_home().map(|home| home.join(CONFIG_TOML_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(
            ForgeConfig::from_toml_str("").expect("parse"),
            ForgeConfig::default()
        );
    }

    #[test]
    fn parses_all_sections() {
        let config = ForgeConfig::from_toml_str(
            r#"
[channel]
capacity = 8

[records]
dir = "/tmp/forge-records"

[runner]
shell = "/bin/bash"
env = { FORGE_MODE = "ci" }
max_output_bytes = 4096
"#,
        )
        .expect("parse");

        assert_eq!(config.channel.capacity, 8);
        assert_eq!(
            config.records.dir,
            Some(PathBuf::from("/tmp/forge-records"))
        );
        let settings = config.runner.settings();
        assert_eq!(settings.shell, "/bin/bash");
        assert_eq!(settings.env.get("FORGE_MODE").map(String::as_str), Some("ci"));
        assert_eq!(settings.max_output_bytes, 4096);
    }

    #[test]
    fn rejects_zero_capacity() {
        assert_matches!(
            ForgeConfig::from_toml_str("[channel]\ncapacity = 0\n"),
            Err(ConfigError::Invalid(_))
        );
    }

    #[test]
    fn rejects_zero_output_cap() {
        assert_matches!(
            ForgeConfig::from_toml_str("[runner]\nmax_output_bytes = 0\n"),
            Err(ConfigError::Invalid(_))
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        assert_matches!(
            ForgeConfig::from_toml_str("[channel]\nretries = 3\n"),
            Err(ConfigError::Parse(_))
        );
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = ForgeConfig::load(&dir.path().join(CONFIG_TOML_FILE)).expect("load");
        assert_eq!(config, ForgeConfig::default());
    }
}
