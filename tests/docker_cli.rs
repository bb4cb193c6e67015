//! DockerCli against a stub container CLI
//!
//! A shell script stands in for `docker`: it logs every invocation, plays back
//! a scripted `start -a` and reports a scripted container state to `inspect`.
//! This exercises argument construction, exit-code capture and the kill +
//! `rm -f` path on timeout without a daemon.

#![cfg(unix)]

mod common;

use common::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use testbox::runtime::{
    ContainerRuntime, DockerCli, NetworkPolicy, ResourceLimits, RunOutcome, RunSpec,
};
use testbox::store::MemoryStore;
use testbox::{CancelToken, Coordinator, ExecutionStatus, SandboxError};

// Writing an executable while another test thread forks can fail with
// ETXTBSY, so tests in this file run one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

const CREATED: &str = "echo 4f1c2a9e; exit 0";

struct Stub {
    binary: PathBuf,
    log: PathBuf,
}

impl Stub {
    /// `start` is the shell snippet run for `start -a`; `state` is what
    /// `inspect` prints, e.g. "exited 1"
    fn new(dir: &Path, start: &str, state: &str) -> Self {
        Self::scripted(dir, CREATED, start, state)
    }

    fn scripted(dir: &Path, create: &str, start: &str, state: &str) -> Self {
        let binary = dir.join("fake-docker");
        let log = dir.join("invocations.log");
        let script = format!(
            r#"#!/bin/sh
echo "$@" >> "{log}"
case "$1" in
  version) echo "24.0.7"; exit 0 ;;
  build) echo "Successfully built"; exit 0 ;;
  create) {create} ;;
  start) {start} ;;
  inspect) echo "{state}"; exit 0 ;;
  rm) exit 0 ;;
  rmi) exit 0 ;;
  *) echo "unknown command $1" >&2; exit 2 ;;
esac
"#,
            log = log.display(),
            create = create,
            start = start,
            state = state
        );
        fs::write(&binary, script).unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();
        Self { binary, log }
    }

    fn cli(&self) -> DockerCli {
        DockerCli::new(self.binary.to_string_lossy().into_owned())
    }

    fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn verbs(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(|c| c.split_whitespace().next().unwrap_or("").to_string())
            .collect()
    }
}

fn spec(deadline: Duration) -> RunSpec {
    RunSpec {
        image: "testbox-run-abc".to_string(),
        container_name: "testbox-run-abc-run".to_string(),
        network: NetworkPolicy::Isolated,
        limits: ResourceLimits {
            memory_mb: 512,
            cpus: 1.0,
        },
        deadline,
        max_output_bytes: 1024,
    }
}

#[test]
fn test_probe_and_missing_binary() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let stub = Stub::new(dir.path(), "exit 0", "exited 0");

    stub.cli().probe().unwrap();
    assert_eq!(
        stub.invocations(),
        vec!["version --format {{.Server.Version}}".to_string()]
    );

    let missing = DockerCli::new(dir.path().join("no-such-docker").to_string_lossy().into_owned());
    assert!(matches!(
        missing.probe().unwrap_err(),
        SandboxError::RuntimeUnavailable(_)
    ));
}

#[test]
fn test_run_arguments_and_exit_code() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let stub = Stub::new(
        dir.path(),
        "echo '--- FAIL: TestOk'; echo 'exit status 1' >&2; exit 1",
        "exited 1",
    );

    let outcome = stub
        .cli()
        .run(&spec(Duration::from_secs(10)), &CancelToken::new())
        .unwrap();

    match outcome {
        RunOutcome::Exited(result) => {
            assert_eq!(result.exit_code, 1);
            assert_eq!(result.stdout, "--- FAIL: TestOk\n");
            assert_eq!(result.stderr, "exit status 1\n");
            assert!(!result.output_truncated);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(
        stub.invocations(),
        vec![
            "create --name testbox-run-abc-run --memory=512m --cpus=1 --network=none testbox-run-abc"
                .to_string(),
            "start -a testbox-run-abc-run".to_string(),
            "inspect --format {{.State.Status}} {{.State.ExitCode}} testbox-run-abc-run"
                .to_string(),
            "rm -f testbox-run-abc-run".to_string(),
        ]
    );
}

#[test]
fn test_container_exit_125_is_a_test_result() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let stub = Stub::new(dir.path(), "echo '--- FAIL'; exit 125", "exited 125");

    let outcome = stub
        .cli()
        .run(&spec(Duration::from_secs(10)), &CancelToken::new())
        .unwrap();

    match outcome {
        RunOutcome::Exited(result) => {
            assert_eq!(result.exit_code, 125);
            assert_eq!(result.stdout, "--- FAIL\n");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_container_that_never_started_is_infrastructure() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let stub = Stub::new(
        dir.path(),
        "echo 'Cannot connect to the Docker daemon' >&2; exit 125",
        "created 0",
    );

    let err = stub
        .cli()
        .run(&spec(Duration::from_secs(10)), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, SandboxError::Infrastructure { .. }));
    assert!(err.failure_reason().contains("Cannot connect to the Docker daemon"));
    assert!(stub
        .invocations()
        .contains(&"rm -f testbox-run-abc-run".to_string()));
}

#[test]
fn test_create_failure_is_infrastructure() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let stub = Stub::scripted(
        dir.path(),
        "echo 'Error response from daemon: No such image' >&2; exit 125",
        "exit 0",
        "exited 0",
    );

    let err = stub
        .cli()
        .run(&spec(Duration::from_secs(10)), &CancelToken::new())
        .unwrap_err();
    assert!(err.failure_reason().contains("No such image"));
    assert_eq!(stub.verbs(), vec!["create"]);
}

#[test]
fn test_timeout_kills_client_and_removes_container() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let stub = Stub::new(dir.path(), "exec sleep 30", "running 0");

    let started = Instant::now();
    let outcome = stub
        .cli()
        .run(&spec(Duration::from_millis(300)), &CancelToken::new())
        .unwrap();

    assert_eq!(outcome, RunOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(stub.verbs(), vec!["create", "start", "rm"]);
    assert!(stub
        .invocations()
        .contains(&"rm -f testbox-run-abc-run".to_string()));
}

#[test]
fn test_coordinator_end_to_end_with_stub() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let contexts = tempfile::tempdir().unwrap();
    let stub = Stub::new(dir.path(), "echo PASS; exit 0", "exited 0");

    let coordinator = Coordinator::new(
        config(contexts.path()),
        Arc::new(stub.cli()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let request = with_dependency(go_request(), "go.mod", "module example.com/calc\n");
    let response = coordinator
        .execute_sync(&request, &CancelToken::new())
        .unwrap();
    coordinator.shutdown();

    assert_eq!(response.status, ExecutionStatus::Completed);
    assert_eq!(response.exit_code, Some(0));
    assert_eq!(response.stdout, "PASS\n");
    assert!(leftover_contexts(contexts.path()).is_empty());

    assert_eq!(
        stub.verbs(),
        vec!["version", "build", "create", "start", "inspect", "rm", "rmi"]
    );
    let calls = stub.invocations();
    assert!(calls[2].contains("--network=bridge"));

    // The image removed is the image that was built and run
    let built = calls[1].split_whitespace().nth(3).unwrap().to_string();
    assert!(calls[2].ends_with(&built));
    assert_eq!(calls[6], format!("rmi -f {}", built));
}

#[test]
fn test_coordinator_completes_suite_exiting_125() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let contexts = tempfile::tempdir().unwrap();
    let stub = Stub::new(dir.path(), "echo '--- FAIL'; exit 125", "exited 125");

    let coordinator = Coordinator::new(
        config(contexts.path()),
        Arc::new(stub.cli()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let response = coordinator
        .execute_sync(&go_request(), &CancelToken::new())
        .unwrap();
    coordinator.shutdown();

    assert_eq!(response.status, ExecutionStatus::Completed);
    assert_eq!(response.exit_code, Some(125));
    assert_eq!(response.stdout, "--- FAIL\n");
    assert_eq!(response.message, None);
}

#[test]
fn test_coordinator_timeout_with_stub() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let contexts = tempfile::tempdir().unwrap();
    let stub = Stub::new(dir.path(), "exec sleep 30", "running 0");

    let mut cfg = config(contexts.path());
    cfg.run_timeout_secs = 1;
    let coordinator =
        Coordinator::new(cfg, Arc::new(stub.cli()), Arc::new(MemoryStore::new())).unwrap();

    let response = coordinator
        .execute_sync(&go_request(), &CancelToken::new())
        .unwrap();
    coordinator.shutdown();

    assert_eq!(response.status, ExecutionStatus::Failed);
    assert_eq!(response.exit_code, None);
    assert!(response.message.unwrap().contains("timed out"));

    let calls = stub.invocations();
    assert!(calls.iter().any(|c| c.starts_with("rm -f ")));
    assert!(calls.last().unwrap().starts_with("rmi -f "));
    assert!(leftover_contexts(contexts.path()).is_empty());
}
