/// Ecosystem presets
///
/// Each preset fixes the base image, the manifests copied ahead of the
/// dependency install, the install command and the default test runner for
/// one supported language family. Presets are immutable and selected by
/// `Language`; callers never supply images or install commands.
use crate::config::settings::UnknownLanguagePolicy;
use crate::config::types::{Result, SandboxError};
use std::fmt;

/// Supported language families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Go,
    JavaScript,
    Python,
}

impl Language {
    /// Parse the caller's free-form language string
    pub fn parse(language: &str) -> Option<Self> {
        match language.trim().to_ascii_lowercase().as_str() {
            "go" | "golang" => Some(Language::Go),
            "javascript" | "js" | "typescript" | "ts" => Some(Language::JavaScript),
            "python" | "py" => Some(Language::Python),
            _ => None,
        }
    }

    /// Resolve a language under the configured unknown-language policy
    pub fn resolve(language: &str, policy: UnknownLanguagePolicy) -> Result<Self> {
        match (Self::parse(language), policy) {
            (Some(lang), _) => Ok(lang),
            (None, UnknownLanguagePolicy::Fallback) => {
                log::warn!(
                    "Unsupported language '{}', falling back to the Go toolchain",
                    language
                );
                Ok(Language::Go)
            }
            (None, UnknownLanguagePolicy::Reject) => Err(SandboxError::Validation(format!(
                "unsupported language: {}",
                language
            ))),
        }
    }

    pub fn preset(self) -> &'static EcosystemPreset {
        match self {
            Language::Go => &GO,
            Language::JavaScript => &JAVASCRIPT,
            Language::Python => &PYTHON,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Go => "go",
            Language::JavaScript => "javascript",
            Language::Python => "python",
        };
        write!(f, "{}", name)
    }
}

/// Dependency install step for an ecosystem
#[derive(Debug, Clone)]
pub struct InstallStep {
    pub command: &'static str,
    /// Install failures do not fail the image build
    pub tolerate_failure: bool,
}

/// Build/run envelope for one language family
#[derive(Debug, Clone)]
pub struct EcosystemPreset {
    pub language: Language,
    pub base_image: &'static str,
    /// Manifest the install step reads; the step is skipped without it
    pub primary_manifest: &'static str,
    /// Files copied before the install step, in order
    pub cache_manifests: &'static [&'static str],
    pub install: InstallStep,
    pub test_command: &'static str,
}

impl EcosystemPreset {
    pub fn is_cache_manifest(&self, path: &str) -> bool {
        self.cache_manifests.contains(&path)
    }

    /// Custom command when supplied, otherwise the ecosystem's test runner
    pub fn command_for<'a>(&self, custom: Option<&'a str>) -> &'a str {
        match custom {
            Some(cmd) if !cmd.trim().is_empty() => cmd,
            _ => self.test_command,
        }
    }
}

static GO: EcosystemPreset = EcosystemPreset {
    language: Language::Go,
    base_image: "golang:1.21-alpine",
    primary_manifest: "go.mod",
    cache_manifests: &["go.mod", "go.sum"],
    install: InstallStep {
        command: "go mod download",
        tolerate_failure: false,
    },
    test_command: "go test -v ./...",
};

static JAVASCRIPT: EcosystemPreset = EcosystemPreset {
    language: Language::JavaScript,
    base_image: "node:20-alpine",
    primary_manifest: "package.json",
    cache_manifests: &["package.json", "package-lock.json"],
    install: InstallStep {
        command: "npm install",
        tolerate_failure: false,
    },
    test_command: "npm test",
};

static PYTHON: EcosystemPreset = EcosystemPreset {
    language: Language::Python,
    base_image: "python:3.11-alpine",
    primary_manifest: "requirements.txt",
    cache_manifests: &["requirements.txt"],
    install: InstallStep {
        command: "pip install --no-cache-dir -r requirements.txt",
        tolerate_failure: true,
    },
    test_command: "pytest -v",
};
