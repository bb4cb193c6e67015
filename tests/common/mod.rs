//! Shared fixtures for integration tests: a recording fake container runtime
//! and request/config builders.

#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use testbox::config::settings::RunnerConfig;
use testbox::runtime::{ContainerRuntime, RunOutcome, RunSpec};
use testbox::{
    CancelToken, Coordinator, DependencyFile, ExecutionKind, ExecutionRecord, ExecutionRequest,
    ExecutionResult, Result, SandboxError, SourceFile,
};

/// One observed runtime call
#[derive(Debug, Clone)]
pub enum Call {
    Probe,
    Build {
        context_dir: PathBuf,
        tag: String,
        script: String,
    },
    Run(RunSpec),
    RemoveImage(String),
}

/// What the fake does when asked to run an image
#[derive(Debug, Clone)]
pub enum RunBehavior {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    TimeOut,
    /// Block until `release()` or cancellation
    Block,
}

pub struct FakeRuntime {
    calls: Mutex<Vec<Call>>,
    live_images: Mutex<HashSet<String>>,
    reachable: bool,
    build_failure: Option<String>,
    behavior: RunBehavior,
    started_tx: Sender<String>,
    started_rx: Receiver<String>,
    release_tx: Sender<()>,
    release_rx: Receiver<()>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        Self {
            calls: Mutex::new(Vec::new()),
            live_images: Mutex::new(HashSet::new()),
            reachable: true,
            build_failure: None,
            behavior: RunBehavior::Exit {
                code: 0,
                stdout: "ok\n".to_string(),
                stderr: String::new(),
            },
            started_tx,
            started_rx,
            release_tx,
            release_rx,
        }
    }

    pub fn exiting(code: i32, stdout: &str) -> Self {
        Self::new().with_behavior(RunBehavior::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    pub fn with_behavior(mut self, behavior: RunBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn failing_build(mut self, output: &str) -> Self {
        self.build_failure = Some(output.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn builds(&self) -> Vec<(PathBuf, String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Build {
                    context_dir,
                    tag,
                    script,
                } => Some((context_dir, tag, script)),
                _ => None,
            })
            .collect()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Run(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn removed_images(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::RemoveImage(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    /// Images built and not yet removed
    pub fn live_images(&self) -> HashSet<String> {
        self.live_images.lock().unwrap().clone()
    }

    /// Wait until a run has started; returns its container name
    pub fn wait_for_run(&self, timeout: Duration) -> String {
        self.started_rx
            .recv_timeout(timeout)
            .expect("no run started in time")
    }

    /// Let one blocked run finish with exit code 0
    pub fn release(&self) {
        self.release_tx.send(()).unwrap();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    fn probe(&self) -> Result<()> {
        self.record(Call::Probe);
        if self.reachable {
            Ok(())
        } else {
            Err(SandboxError::RuntimeUnavailable(
                "fake daemon is down".to_string(),
            ))
        }
    }

    fn build(
        &self,
        context_dir: &Path,
        tag: &str,
        _deadline: Duration,
        _cancel: &CancelToken,
    ) -> Result<()> {
        let script = fs::read_to_string(context_dir.join("Dockerfile")).unwrap_or_default();
        self.record(Call::Build {
            context_dir: context_dir.to_path_buf(),
            tag: tag.to_string(),
            script,
        });

        if let Some(output) = &self.build_failure {
            return Err(SandboxError::Infrastructure {
                message: "image build failed with exit code 1".to_string(),
                output: output.clone(),
            });
        }
        self.live_images.lock().unwrap().insert(tag.to_string());
        Ok(())
    }

    fn run(&self, spec: &RunSpec, cancel: &CancelToken) -> Result<RunOutcome> {
        self.record(Call::Run(spec.clone()));
        let _ = self.started_tx.send(spec.container_name.clone());

        match &self.behavior {
            RunBehavior::Exit {
                code,
                stdout,
                stderr,
            } => Ok(RunOutcome::Exited(ExecutionResult {
                exit_code: *code,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
                output_truncated: false,
            })),
            RunBehavior::TimeOut => Ok(RunOutcome::TimedOut),
            RunBehavior::Block => loop {
                if cancel.is_cancelled() {
                    return Ok(RunOutcome::Cancelled);
                }
                match self.release_rx.recv_timeout(Duration::from_millis(10)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        return Ok(RunOutcome::Exited(ExecutionResult::default()))
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                }
            },
        }
    }

    fn remove_image(&self, tag: &str) -> Result<()> {
        self.record(Call::RemoveImage(tag.to_string()));
        if self.live_images.lock().unwrap().remove(tag) {
            Ok(())
        } else {
            Err(SandboxError::infrastructure(format!("no such image {}", tag)))
        }
    }
}

pub fn config(context_root: &Path) -> RunnerConfig {
    RunnerConfig {
        context_root: Some(context_root.to_path_buf()),
        workers: 2,
        queue_capacity: 4,
        ..RunnerConfig::default()
    }
}

pub fn go_request() -> ExecutionRequest {
    ExecutionRequest {
        owner_id: "project-42".to_string(),
        execution_kind: ExecutionKind::Validation,
        language: "go".to_string(),
        test_files: vec![SourceFile::new(
            "main_test.go",
            "package main\n\nimport \"testing\"\n\nfunc TestOk(t *testing.T) {}\n",
        )],
        source_files: vec![SourceFile::new("main.go", "package main\n\nfunc main() {}\n")],
        dependencies: Vec::new(),
        custom_command: None,
    }
}

pub fn with_dependency(mut request: ExecutionRequest, path: &str, content: &str) -> ExecutionRequest {
    request.dependencies.push(DependencyFile::new(path, content));
    request
}

/// Entries left under the context root
pub fn leftover_contexts(root: &Path) -> Vec<PathBuf> {
    fs::read_dir(root)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}

/// Poll until the record is terminal
pub fn wait_terminal(coordinator: &Coordinator, id: &str) -> ExecutionRecord {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let record = coordinator
            .poll(id)
            .unwrap()
            .expect("record disappeared");
        if record.status.is_terminal() {
            return record;
        }
        assert!(Instant::now() < deadline, "record {} never finished", id);
        std::thread::sleep(Duration::from_millis(10));
    }
}
