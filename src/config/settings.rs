/// Runner configuration loading from testbox.json
use crate::config::types::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do with a language that has no ecosystem preset
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnknownLanguagePolicy {
    /// Fail validation before any side effect
    #[default]
    Reject,
    /// Build with the Go toolchain preset
    Fallback,
}

/// Fixed, operator-controlled settings. Nothing here is caller-controlled.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Container CLI used for build/run/rmi
    pub container_binary: String,
    /// Prefix for per-request image and container names
    pub image_prefix: String,
    /// Parent directory for build contexts (system temp dir when unset)
    pub context_root: Option<PathBuf>,
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub run_timeout_secs: u64,
    pub build_timeout_secs: u64,
    /// Per-stream capture cap
    pub max_output_bytes: usize,
    /// Concurrent sandboxes
    pub workers: usize,
    /// Admitted-but-not-started requests
    pub queue_capacity: usize,
    pub unknown_language: UnknownLanguagePolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            container_binary: "docker".to_string(),
            image_prefix: "testbox-run".to_string(),
            context_root: None,
            memory_limit_mb: 512,
            cpu_limit: 1.0,
            run_timeout_secs: 30,
            build_timeout_secs: 300,
            max_output_bytes: 10 * 1024 * 1024,
            workers: 4,
            queue_capacity: 16,
            unknown_language: UnknownLanguagePolicy::Reject,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))
    }

    /// Load ./testbox.json when present, otherwise built-in defaults
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| SandboxError::Config(format!("Failed to get current directory: {}", e)))?
            .join("testbox.json");

        if !config_path.exists() {
            log::debug!("No testbox.json in current directory, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }

    pub fn context_root(&self) -> PathBuf {
        self.context_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_limits() {
        let config = RunnerConfig::default();
        assert_eq!(config.memory_limit_mb, 512);
        assert_eq!(config.cpu_limit, 1.0);
        assert_eq!(config.run_timeout(), Duration::from_secs(30));
        assert_eq!(config.unknown_language, UnknownLanguagePolicy::Reject);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"workers": 2, "run_timeout_secs": 5, "unknown_language": "fallback"}}"#
        )
        .unwrap();

        let config = RunnerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.run_timeout_secs, 5);
        assert_eq!(config.unknown_language, UnknownLanguagePolicy::Fallback);
        assert_eq!(config.container_binary, "docker");
        assert_eq!(config.queue_capacity, 16);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        match RunnerConfig::load_from_file(file.path()) {
            Err(SandboxError::Config(msg)) => assert!(msg.contains("parse")),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
