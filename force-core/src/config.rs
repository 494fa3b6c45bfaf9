//! Process-wide configuration (spec.md §6 "Configuration"). Read once at
//! startup and never mutated thereafter.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Deployment mode, gates startup strictness (spec.md §4.11, §8 S6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Staging,
    Production,
}

/// MCP transport selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum Transport {
    Stdio,
    Http { host: String, port: u16 },
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Stdio
    }
}

pub mod defaults {
    pub fn max_workers() -> usize {
        num_cpus::get()
    }

    pub fn log_rotation_bytes() -> u64 {
        64 * 1024 * 1024
    }

    pub fn auto_fix_on_start() -> bool {
        false
    }

    pub fn debug() -> bool {
        false
    }
}

/// Engine configuration, one field per spec.md §6 entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Component root directory.
    pub root: PathBuf,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default = "defaults::debug")]
    pub debug: bool,
    #[serde(default = "defaults::auto_fix_on_start")]
    pub auto_fix_on_start: bool,
    #[serde(default = "defaults::max_workers")]
    pub max_workers: usize,
    #[serde(default = "defaults::log_rotation_bytes")]
    pub log_rotation_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            mode: Mode::default(),
            transport: Transport::default(),
            debug: defaults::debug(),
            auto_fix_on_start: defaults::auto_fix_on_start(),
            max_workers: defaults::max_workers(),
            log_rotation_bytes: defaults::log_rotation_bytes(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than zero");
        }
        if self.log_rotation_bytes == 0 {
            anyhow::bail!("log_rotation_bytes must be greater than zero");
        }
        if let Transport::Http { host, port } = &self.transport {
            if host.is_empty() {
                anyhow::bail!("http transport requires a non-empty host");
            }
            if *port == 0 {
                anyhow::bail!("http transport requires a non-zero port");
            }
        }
        Ok(())
    }

    pub fn schemas_dir(&self) -> PathBuf {
        self.root.join("schemas")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(".backup")
    }

    pub fn learning_log_path(&self) -> PathBuf {
        self.root.join("learning").join("execution_log.jsonl")
    }

    pub fn policy_state_path(&self) -> PathBuf {
        self.root.join(".force").join("policy_state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = EngineConfig::default();
        config.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_http_transport_with_empty_host() {
        let mut config = EngineConfig::default();
        config.transport = Transport::Http {
            host: String::new(),
            port: 8080,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn derives_paths_from_root() {
        let config = EngineConfig {
            root: PathBuf::from("/srv/force"),
            ..EngineConfig::default()
        };
        assert_eq!(config.schemas_dir(), PathBuf::from("/srv/force/schemas"));
        assert_eq!(
            config.learning_log_path(),
            PathBuf::from("/srv/force/learning/execution_log.jsonl")
        );
    }
}
