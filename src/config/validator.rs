// Runner config validation
// Startup validation fails fast with actionable errors; warnings are logged.

use crate::config::settings::{RunnerConfig, UnknownLanguagePolicy};
use crate::config::types::{Result, SandboxError};

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate config at startup. Any error is fatal.
pub fn validate_config(config: &RunnerConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_limits(config, &mut result);
    validate_pool(config, &mut result);
    validate_naming(config, &mut result);

    if config.unknown_language == UnknownLanguagePolicy::Fallback {
        result.add_warning(
            "unknown_language=fallback builds unsupported languages with the Go toolchain"
                .to_string(),
        );
    }

    for warning in &result.warnings {
        log::warn!("config: {}", warning);
    }

    if !result.is_valid() {
        return Err(SandboxError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_limits(config: &RunnerConfig, result: &mut ValidationResult) {
    if config.memory_limit_mb == 0 {
        result.add_error("memory_limit_mb cannot be zero".to_string());
    } else if config.memory_limit_mb < 64 {
        result.add_warning(format!(
            "memory_limit_mb {} is very low, toolchains may be OOM-killed",
            config.memory_limit_mb
        ));
    }

    if !config.cpu_limit.is_finite() || config.cpu_limit <= 0.0 {
        result.add_error(format!("cpu_limit must be positive, got {}", config.cpu_limit));
    }

    if config.run_timeout_secs == 0 {
        result.add_error("run_timeout_secs cannot be zero".to_string());
    }

    if config.build_timeout_secs == 0 {
        result.add_error("build_timeout_secs cannot be zero".to_string());
    }

    if config.max_output_bytes == 0 {
        result.add_error("max_output_bytes cannot be zero".to_string());
    }
}

fn validate_pool(config: &RunnerConfig, result: &mut ValidationResult) {
    if config.workers == 0 {
        result.add_error("workers cannot be zero".to_string());
    }

    if config.queue_capacity == 0 {
        result.add_error("queue_capacity cannot be zero".to_string());
    }
}

fn validate_naming(config: &RunnerConfig, result: &mut ValidationResult) {
    if config.container_binary.trim().is_empty() {
        result.add_error("container_binary cannot be empty".to_string());
    }

    if !is_valid_name_component(&config.image_prefix) {
        result.add_error(format!(
            "image_prefix '{}' must be lowercase alphanumerics separated by '.', '_' or '-'",
            config.image_prefix
        ));
    }

    if let Some(root) = &config.context_root {
        if !root.is_absolute() {
            result.add_error(format!("context_root must be absolute path: {:?}", root));
        } else if !root.exists() {
            result.add_warning(format!("context_root does not exist yet: {:?}", root));
        }
    }
}

/// Image repository component: `[a-z0-9]+([._-][a-z0-9]+)*`
pub(crate) fn is_valid_name_component(name: &str) -> bool {
    if name.is_empty() || name.len() > 128 {
        return false;
    }
    let bytes = name.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes
        .windows(2)
        .all(|w| is_alnum(w[0]) || is_alnum(w[1]))
        && bytes
            .iter()
            .all(|&b| is_alnum(b) || b == b'.' || b == b'_' || b == b'-')
}
