/// Subprocess supervision
///
/// Spawns a command with piped output, drains both streams on collector
/// threads and polls the child until it exits, its deadline passes or the
/// caller cancels. On deadline or cancellation the child is killed and reaped
/// before returning.
use crate::config::types::{Result, SandboxError};
use crate::exec::cancel::CancelToken;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long collectors may keep draining after the child is gone. A
/// grandchild that inherited the pipe can hold it open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Bytes captured from one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Output past the cap was read and discarded
    pub truncated: bool,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(i32),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Supervised {
    pub exit: ProcessExit,
    pub stdout: Captured,
    pub stderr: Captured,
    pub elapsed: Duration,
}

impl Supervised {
    /// Both streams, stderr first, for diagnostics
    pub fn combined_output(&self) -> String {
        let mut out = self.stderr.text();
        let stdout = self.stdout.text();
        if !out.is_empty() && !stdout.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&stdout);
        out
    }
}

/// Run `command` to completion under a deadline and a cancellation token
pub fn supervise(
    mut command: Command,
    deadline: Duration,
    cancel: &CancelToken,
    max_output_bytes: usize,
) -> Result<Supervised> {
    let program = command.get_program().to_string_lossy().into_owned();

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::RuntimeUnavailable(format!("{} not found", program))
            } else {
                SandboxError::infrastructure(format!("failed to start {}: {}", program, e))
            }
        })?;

    let started = Instant::now();
    let stdout_collector = child.stdout.take().map(|s| spawn_collector(s, max_output_bytes));
    let stderr_collector = child.stderr.take().map(|s| spawn_collector(s, max_output_bytes));

    let exit = loop {
        match child.try_wait() {
            Ok(Some(status)) => break ProcessExit::Exited(exit_code(status)),
            Ok(None) => {
                let stop = if cancel.is_cancelled() {
                    Some(ProcessExit::Cancelled)
                } else if started.elapsed() >= deadline {
                    Some(ProcessExit::TimedOut)
                } else {
                    None
                };

                if let Some(stop) = stop {
                    log::debug!("Stopping {} (pid {}): {:?}", program, child.id(), stop);
                    let _ = child.kill();
                    let _ = child.wait();
                    break stop;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SandboxError::infrastructure(format!(
                    "failed to wait for {}: {}",
                    program, e
                )));
            }
        }
    };

    // One grace period shared by both streams
    let grace_end = Instant::now() + DRAIN_GRACE;
    Ok(Supervised {
        exit,
        stdout: drain(stdout_collector, grace_end),
        stderr: drain(stderr_collector, grace_end),
        elapsed: started.elapsed(),
    })
}

/// A stream being read on its own thread. `sink` holds everything kept so
/// far; `done` fires at EOF.
struct Collector {
    sink: Arc<Mutex<Captured>>,
    done: Receiver<()>,
}

fn spawn_collector<R: Read + Send + 'static>(stream: R, limit: usize) -> Collector {
    let sink = Arc::new(Mutex::new(Captured::default()));
    let (tx, done) = bounded(1);
    let writer = Arc::clone(&sink);
    thread::spawn(move || {
        collect_stream(stream, limit, &writer);
        let _ = tx.send(());
    });
    Collector { sink, done }
}

/// Read to EOF, keeping at most `limit` bytes. Reading continues past the
/// cap so the writer never blocks on a full pipe.
fn collect_stream<R: Read>(mut stream: R, limit: usize, sink: &Mutex<Captured>) {
    let mut chunk = [0u8; 8192];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let mut captured = sink.lock().unwrap_or_else(|e| e.into_inner());
                let room = limit.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Take what a collector has gathered. A collector still reading at
/// `grace_end` is abandoned; its bytes so far are kept and marked truncated.
fn drain(collector: Option<Collector>, grace_end: Instant) -> Captured {
    let Some(collector) = collector else {
        return Captured::default();
    };

    let finished = match collector.done.recv_deadline(grace_end) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    };
    let mut captured = {
        let mut sink = collector.sink.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *sink)
    };
    if !finished {
        log::warn!(
            "Output collector still busy after exit, keeping {} bytes read so far",
            captured.bytes.len()
        );
        captured.truncated = true;
    }
    captured
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    // Shell convention for signal deaths
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
