//! Container runtime
//!
//! The `ContainerRuntime` trait is the narrow seam between the coordinator and
//! whatever builds and runs images. `DockerCli` shells out to a Docker-compatible
//! CLI; tests substitute a recording fake.

pub mod docker;
pub mod driver;
pub mod policy;
pub mod process;

use crate::config::types::{ExecutionResult, Result};
use crate::exec::cancel::CancelToken;
use std::path::Path;
use std::time::Duration;

pub use docker::DockerCli;
pub use driver::SandboxDriver;
pub use policy::{NetworkPolicy, ResourceLimits};

/// Everything needed to start one sandbox container
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub image: String,
    /// Unique container name, used to inspect and force-remove it
    pub container_name: String,
    pub network: NetworkPolicy,
    pub limits: ResourceLimits,
    pub deadline: Duration,
    pub max_output_bytes: usize,
}

/// Outcome of a run that did not fail at the infrastructure level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The test command exited; any exit code is a normal outcome
    Exited(ExecutionResult),
    TimedOut,
    Cancelled,
}

/// Build, run and remove sandbox images
pub trait ContainerRuntime: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Check the runtime is reachable
    fn probe(&self) -> Result<()>;

    /// Build `context_dir` into an image tagged `tag`
    fn build(&self, context_dir: &Path, tag: &str, deadline: Duration, cancel: &CancelToken)
        -> Result<()>;

    /// Run a built image to completion, deadline or cancellation
    fn run(&self, spec: &RunSpec, cancel: &CancelToken) -> Result<RunOutcome>;

    /// Remove a built image
    fn remove_image(&self, tag: &str) -> Result<()>;
}
