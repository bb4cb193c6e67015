//! testbox: build and run untrusted test suites in throwaway containers
//!
//! A request carries source files, test files and optional dependency
//! manifests. testbox validates it, materializes a build context, builds a
//! uniquely named image, runs it under fixed resource and network limits and
//! records the outcome. Every context directory and image is torn down on
//! every exit path.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::settings`]: Runner configuration loading
//! - [`config::validator`]: Range and naming checks on the configuration
//! - [`config::presets`]: Per-language base images, install steps and test runners
//! - [`config::types`]: Requests, records, responses and the error type
//!
//! ## Validation ([`validate`])
//! - [`validate::manifest`]: Dependency manifest checks by file name
//! - [`validate::request`]: Required fields and path safety
//!
//! ## Build Contexts ([`context`])
//! - [`context::script`]: Typed build steps rendered to Dockerfile text
//! - [`context::workspace`]: Run-scoped context directory, removed on drop
//! - [`context::assembler`]: Request to context materialization
//!
//! ## Container Runtime ([`runtime`])
//! - [`runtime::ContainerRuntime`]: build/run/remove seam
//! - [`runtime::docker`]: Docker-compatible CLI implementation
//! - [`runtime::process`]: Deadline- and cancel-aware subprocess supervision
//! - [`runtime::policy`]: Network policy and resource limits
//! - [`runtime::driver`]: Build, run and guaranteed image teardown
//!
//! ## Execution ([`exec`])
//! - [`exec::coordinator`]: Synchronous and asynchronous request lifecycle
//! - [`exec::pool`]: Bounded worker pool with admission control
//! - [`exec::cancel`]: Caller cancellation token
//!
//! ## Records ([`store`])
//! - [`store::memory`]: In-process store
//! - [`store::file`]: Atomic JSON-file store
//!
//! ## Observability ([`observability`])
//! - [`observability::metrics`]: Prometheus metrics export

// Configuration & shared types
pub mod config;

// Input validation
pub mod validate;

// Build contexts
pub mod context;

// Container runtime
pub mod runtime;

// Execution control
pub mod exec;

// Execution records
pub mod store;

// Observability
pub mod observability;

// CLI entrypoint
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use exec::{CancelToken, Coordinator};
