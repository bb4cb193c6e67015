/// Sandbox driver: build, pick the network policy, run, tear down
use crate::config::settings::RunnerConfig;
use crate::config::types::{ExecutionResult, Result, SandboxError};
use crate::context::BuildContext;
use crate::exec::cancel::CancelToken;
use crate::observability::get_metrics;
use crate::runtime::{ContainerRuntime, NetworkPolicy, ResourceLimits, RunOutcome, RunSpec};
use crate::validate::ValidatedRequest;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct SandboxDriver {
    runtime: Arc<dyn ContainerRuntime>,
    image_prefix: String,
    limits: ResourceLimits,
    run_timeout: Duration,
    build_timeout: Duration,
    max_output_bytes: usize,
}

impl SandboxDriver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &RunnerConfig) -> Self {
        Self {
            runtime,
            image_prefix: config.image_prefix.clone(),
            limits: ResourceLimits::from_config(config),
            run_timeout: config.run_timeout(),
            build_timeout: config.build_timeout(),
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Fresh image name from a random identifier, never from request content
    pub fn unique_image_name(&self) -> String {
        format!("{}-{}", self.image_prefix, Uuid::new_v4().simple())
    }

    /// Build and run an assembled context. A non-zero exit code is returned
    /// as a normal result; timeouts and cancellation are errors.
    pub fn execute(
        &self,
        ctx: &BuildContext,
        validated: &ValidatedRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        let image = self.unique_image_name();
        log::info!("Building {} from context {}", image, ctx.id());
        // Guarded before the build: a killed build client does not stop the
        // daemon from finishing and tagging the image
        let mut guard = ImageGuard {
            runtime: self.runtime.as_ref(),
            tag: &image,
            built: false,
        };
        self.runtime
            .build(ctx.dir(), &image, self.build_timeout, cancel)?;
        guard.built = true;

        let spec = RunSpec {
            container_name: format!("{}-run", image),
            image: image.clone(),
            network: NetworkPolicy::for_dependencies(validated.has_dependencies()),
            limits: self.limits,
            deadline: self.run_timeout,
            max_output_bytes: self.max_output_bytes,
        };
        log::info!(
            "Running {} (network {}, {}s deadline)",
            spec.image,
            spec.network,
            spec.deadline.as_secs()
        );

        match self.runtime.run(&spec, cancel)? {
            RunOutcome::Exited(result) => {
                log::info!("{} exited with code {}", spec.image, result.exit_code);
                Ok(result)
            }
            RunOutcome::TimedOut => {
                log::warn!("{} exceeded its {}s deadline", spec.image, spec.deadline.as_secs());
                Err(SandboxError::Timeout {
                    after: spec.deadline,
                })
            }
            RunOutcome::Cancelled => Err(SandboxError::Cancelled),
        }
    }
}

/// Removes the run's image tag when dropped, on every exit path
struct ImageGuard<'a> {
    runtime: &'a dyn ContainerRuntime,
    tag: &'a str,
    /// The build reported success, so the image is known to exist
    built: bool,
}

impl Drop for ImageGuard<'_> {
    fn drop(&mut self) {
        let outcome = self.runtime.remove_image(self.tag);
        if !self.built {
            match outcome {
                Ok(()) => log::debug!("Removed image {} left by an unfinished build", self.tag),
                Err(_) => log::debug!("No image {} to remove after failed build", self.tag),
            }
            return;
        }

        get_metrics().record_cleanup(outcome.is_ok());
        match outcome {
            Ok(()) => log::debug!("Removed image {}", self.tag),
            Err(e) => log::warn!("Failed to remove image {}: {}", self.tag, e.failure_reason()),
        }
    }
}
