/// Bounded worker pool
///
/// A fixed set of worker threads drains a bounded job queue. Admission never
/// blocks: when the queue is full the job is handed back as `Saturated`, so
/// the number of concurrent sandboxes and waiting requests stays bounded.
use crate::config::types::{Result, SandboxError};
use crate::observability::get_metrics;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self> {
        if workers == 0 || queue_capacity == 0 {
            return Err(SandboxError::Config(
                "worker pool needs at least one worker and one queue slot".to_string(),
            ));
        }

        let (sender, receiver) = bounded::<Job>(queue_capacity);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("testbox-worker-{}", index))
                .spawn(move || worker_loop(index, receiver))?;
            handles.push(handle);
        }

        log::info!(
            "Started worker pool ({} workers, queue capacity {})",
            workers,
            queue_capacity
        );
        Ok(Self {
            sender: Some(sender),
            workers: handles,
            capacity: queue_capacity,
        })
    }

    /// Queue a job without blocking
    pub fn try_submit(&self, job: Job) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SandboxError::infrastructure("worker pool is shut down"))?;

        // Counted before the send so a fast worker never decrements first
        let metrics = get_metrics();
        metrics.queued_executions.inc();
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                metrics.queued_executions.dec();
                Err(SandboxError::Saturated {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                metrics.queued_executions.dec();
                Err(SandboxError::infrastructure("worker pool is shut down"))
            }
        }
    }

    /// Jobs admitted but not yet picked up
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    /// No queue slot is free right now
    pub fn is_full(&self) -> bool {
        self.sender.as_ref().map(|s| s.is_full()).unwrap_or(false)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting jobs, let workers drain the queue and join them
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Worker thread panicked during shutdown");
            }
        }
        log::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, receiver: Receiver<Job>) {
    let metrics = get_metrics();
    while let Ok(job) = receiver.recv() {
        metrics.queued_executions.dec();
        metrics.active_executions.inc();
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!("Job panicked on worker {}", index);
        }
        metrics.active_executions.dec();
    }
    log::debug!("Worker {} exiting", index);
}
