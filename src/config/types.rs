/// Core types and structures for the testbox system
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Dependency manifest supplied by the caller (go.mod, package.json, requirements.txt, ...)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyFile {
    /// Path relative to the build context root
    pub path: String,
    /// Raw file content
    pub content: String,
}

impl DependencyFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Source or test file placed into the build context
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            language: None,
        }
    }
}

/// Kind of execution requested by the caller
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Coverage,
    #[default]
    Validation,
    Mutation,
    Full,
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionKind::Coverage => "coverage",
            ExecutionKind::Validation => "validation",
            ExecutionKind::Mutation => "mutation",
            ExecutionKind::Full => "full",
        };
        write!(f, "{}", name)
    }
}

/// Immutable request to build and run a test suite
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub owner_id: String,
    #[serde(default)]
    pub execution_kind: ExecutionKind,
    pub language: String,
    #[serde(default)]
    pub test_files: Vec<SourceFile>,
    #[serde(default)]
    pub source_files: Vec<SourceFile>,
    #[serde(default)]
    pub dependencies: Vec<DependencyFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_command: Option<String>,
}

impl ExecutionRequest {
    /// Dependencies with duplicate paths collapsed, last occurrence wins.
    /// First-seen order is kept so manifests stay ahead of later files.
    pub fn effective_dependencies(&self) -> Vec<DependencyFile> {
        let mut deps: Vec<DependencyFile> = Vec::with_capacity(self.dependencies.len());
        for dep in &self.dependencies {
            match deps.iter_mut().find(|d| d.path == dep.path) {
                Some(existing) => existing.content = dep.content.clone(),
                None => deps.push(dep.clone()),
            }
        }
        deps
    }
}

/// Raw outcome of running the test command
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream hit the capture cap
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub output_truncated: bool,
}

/// Lifecycle state of an execution record
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Forward-only transitions. Validation and admission failures may
    /// terminate a record before it ever reaches `Running`.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (ExecutionStatus::Pending, ExecutionStatus::Running)
                | (ExecutionStatus::Pending, ExecutionStatus::Failed)
                | (ExecutionStatus::Running, ExecutionStatus::Completed)
                | (ExecutionStatus::Running, ExecutionStatus::Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Durable, pollable projection of one request's lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub owner_id: String,
    pub kind: ExecutionKind,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// New record in the initial `Pending` state
    pub fn pending(id: String, request: &ExecutionRequest) -> Self {
        Self {
            id,
            owner_id: request.owner_id.clone(),
            kind: request.execution_kind,
            status: ExecutionStatus::Pending,
            result: None,
            failure_reason: None,
            duration_ms: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Response of the trigger (synchronous) and poll operations
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ExecutionRecord> for ExecutionResponse {
    fn from(record: &ExecutionRecord) -> Self {
        let (exit_code, stdout, stderr) = match &record.result {
            Some(result) => (
                Some(result.exit_code),
                result.stdout.clone(),
                result.stderr.clone(),
            ),
            None => (None, String::new(), String::new()),
        };
        Self {
            execution_id: record.id.clone(),
            status: record.status,
            exit_code,
            stdout,
            stderr,
            duration_ms: record.duration_ms,
            message: record.failure_reason.clone(),
        }
    }
}

/// Response of the asynchronous trigger
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
}

/// Error types for the testbox system
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Infrastructure error: {message}")]
    Infrastructure { message: String, output: String },

    #[error("Test execution timed out after {} seconds", .after.as_secs())]
    Timeout { after: Duration },

    #[error("Execution cancelled by caller")]
    Cancelled,

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Sandbox capacity exhausted ({capacity} queued requests)")]
    Saturated { capacity: usize },

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub fn infrastructure(message: impl Into<String>) -> Self {
        SandboxError::Infrastructure {
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, SandboxError::Validation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout { .. })
    }

    /// Reason string persisted on a failed record. Build failures keep the
    /// captured tool output so the caller can diagnose them.
    pub fn failure_reason(&self) -> String {
        match self {
            SandboxError::Infrastructure { message, output } if !output.trim().is_empty() => {
                format!("{} (output: {})", message, output.trim_end())
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias for testbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
