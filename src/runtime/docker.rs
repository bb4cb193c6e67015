/// Docker-compatible CLI runtime
///
/// Every operation is a supervised subprocess. A run is `create`, then
/// `start -a`, then `inspect`: the exit code reported for the test command is
/// the one the daemon recorded for the container, so the client's own failure
/// codes never pass for a test result. The container is force-removed
/// afterwards on every path, which also stops it when the attached client was
/// killed on timeout or cancellation.
use crate::config::settings::RunnerConfig;
use crate::config::types::{ExecutionResult, Result, SandboxError};
use crate::exec::cancel::CancelToken;
use crate::runtime::process::{supervise, ProcessExit, Supervised};
use crate::runtime::{ContainerRuntime, RunOutcome, RunSpec};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// create, inspect, rm and rmi
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

/// Cap on build/probe diagnostics kept in error reports
const TOOL_OUTPUT_LIMIT: usize = 64 * 1024;

const STATE_FORMAT: &str = "{{.State.Status}} {{.State.ExitCode}}";

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.container_binary.clone())
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Best-effort forced removal of a named container
    fn force_remove_container(&self, name: &str) {
        let mut cmd = self.command();
        cmd.args(["rm", "-f", name]);

        match supervise(cmd, CONTROL_TIMEOUT, &CancelToken::new(), TOOL_OUTPUT_LIMIT) {
            Ok(out) if out.exit == ProcessExit::Exited(0) => {
                log::debug!("Force-removed container {}", name)
            }
            Ok(out) => log::warn!(
                "Failed to force-remove container {}: {}",
                name,
                out.combined_output().trim_end()
            ),
            Err(e) => log::warn!("Failed to force-remove container {}: {}", name, e),
        }
    }

    /// Exit code the daemon recorded for a container. A container that never
    /// reached `exited` did not run the test command, whatever `start`
    /// returned.
    fn container_exit_code(&self, name: &str, start: &Supervised) -> Result<i32> {
        let mut cmd = self.command();
        cmd.args(["inspect", "--format", STATE_FORMAT, name]);

        let out = supervise(cmd, CONTROL_TIMEOUT, &CancelToken::new(), TOOL_OUTPUT_LIMIT)?;
        if out.exit != ProcessExit::Exited(0) {
            return Err(SandboxError::Infrastructure {
                message: format!(
                    "failed to inspect container {}: {}",
                    name,
                    out.combined_output().trim_end()
                ),
                output: start.combined_output(),
            });
        }

        let state = out.stdout.text();
        let mut fields = state.split_whitespace();
        match (fields.next(), fields.next().and_then(|c| c.parse::<i32>().ok())) {
            (Some("exited"), Some(code)) => Ok(code),
            (status, _) => Err(SandboxError::Infrastructure {
                message: format!(
                    "container {} did not run (state {})",
                    name,
                    status.unwrap_or("unknown")
                ),
                output: start.combined_output(),
            }),
        }
    }
}

/// Force-removes a created container when dropped
struct CreatedContainer<'a> {
    cli: &'a DockerCli,
    name: &'a str,
}

impl Drop for CreatedContainer<'_> {
    fn drop(&mut self) {
        self.cli.force_remove_container(self.name);
    }
}

impl ContainerRuntime for DockerCli {
    fn name(&self) -> &str {
        &self.binary
    }

    fn probe(&self) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["version", "--format", "{{.Server.Version}}"]);

        let out = supervise(cmd, PROBE_TIMEOUT, &CancelToken::new(), TOOL_OUTPUT_LIMIT)
            .map_err(|e| match e {
                SandboxError::RuntimeUnavailable(_) => e,
                other => SandboxError::RuntimeUnavailable(other.to_string()),
            })?;

        match out.exit {
            ProcessExit::Exited(0) => {
                log::debug!(
                    "{} server version {}",
                    self.binary,
                    out.stdout.text().trim()
                );
                Ok(())
            }
            ProcessExit::Exited(code) => Err(SandboxError::RuntimeUnavailable(format!(
                "{} version exited with {}: {}",
                self.binary,
                code,
                out.combined_output().trim_end()
            ))),
            ProcessExit::TimedOut | ProcessExit::Cancelled => {
                Err(SandboxError::RuntimeUnavailable(format!(
                    "{} did not answer within {}s",
                    self.binary,
                    PROBE_TIMEOUT.as_secs()
                )))
            }
        }
    }

    fn build(
        &self,
        context_dir: &Path,
        tag: &str,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["build", "--force-rm", "-t", tag]).arg(context_dir);

        let out = supervise(cmd, deadline, cancel, TOOL_OUTPUT_LIMIT)?;
        match out.exit {
            ProcessExit::Exited(0) => Ok(()),
            ProcessExit::Exited(code) => Err(SandboxError::Infrastructure {
                message: format!("image build failed with exit code {}", code),
                output: out.combined_output(),
            }),
            ProcessExit::TimedOut => Err(SandboxError::Infrastructure {
                message: format!("image build exceeded {}s", deadline.as_secs()),
                output: out.combined_output(),
            }),
            ProcessExit::Cancelled => Err(SandboxError::Cancelled),
        }
    }

    fn run(&self, spec: &RunSpec, cancel: &CancelToken) -> Result<RunOutcome> {
        let name = spec.container_name.as_str();
        let mut create = self.command();
        create
            .args(["create", "--name", name])
            .args(spec.limits.docker_args())
            .arg(format!("--network={}", spec.network.as_docker_arg()))
            .arg(&spec.image);

        log::debug!(
            "Creating {} from {} (network {})",
            name,
            spec.image,
            spec.network
        );

        let created = supervise(create, CONTROL_TIMEOUT, cancel, TOOL_OUTPUT_LIMIT)?;
        match created.exit {
            ProcessExit::Exited(0) => {}
            ProcessExit::Exited(code) => {
                return Err(SandboxError::Infrastructure {
                    message: format!("container create failed with exit code {}", code),
                    output: created.combined_output(),
                })
            }
            ProcessExit::TimedOut => {
                self.force_remove_container(name);
                return Err(SandboxError::Infrastructure {
                    message: format!(
                        "container create exceeded {}s",
                        CONTROL_TIMEOUT.as_secs()
                    ),
                    output: created.combined_output(),
                });
            }
            ProcessExit::Cancelled => {
                self.force_remove_container(name);
                return Ok(RunOutcome::Cancelled);
            }
        }
        let _container = CreatedContainer { cli: self, name };

        let mut start = self.command();
        start.args(["start", "-a", name]);

        let out = supervise(start, spec.deadline, cancel, spec.max_output_bytes)?;
        match out.exit {
            ProcessExit::Exited(_) => {
                let code = self.container_exit_code(name, &out)?;
                Ok(RunOutcome::Exited(into_result(code, &out)))
            }
            ProcessExit::TimedOut => Ok(RunOutcome::TimedOut),
            ProcessExit::Cancelled => Ok(RunOutcome::Cancelled),
        }
    }

    fn remove_image(&self, tag: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["rmi", "-f", tag]);

        let out = supervise(cmd, CONTROL_TIMEOUT, &CancelToken::new(), TOOL_OUTPUT_LIMIT)?;
        match out.exit {
            ProcessExit::Exited(0) => Ok(()),
            _ => Err(SandboxError::Infrastructure {
                message: format!("failed to remove image {}", tag),
                output: out.combined_output(),
            }),
        }
    }
}

fn into_result(exit_code: i32, out: &Supervised) -> ExecutionResult {
    ExecutionResult {
        exit_code,
        stdout: out.stdout.text(),
        stderr: out.stderr.text(),
        output_truncated: out.stdout.truncated || out.stderr.truncated,
    }
}
