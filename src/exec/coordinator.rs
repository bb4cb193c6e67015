/// Execution coordinator
///
/// Drives each request through Validate -> Assemble -> Build -> Run ->
/// Teardown -> Persist and owns every write to the record store. Requests are
/// admitted on the caller's thread (validation, probe, queue room, record
/// creation) and executed on the bounded worker pool in both invocation modes.
use crate::config::settings::RunnerConfig;
use crate::config::types::{
    ExecutionRecord, ExecutionRequest, ExecutionResponse, ExecutionResult, ExecutionStatus,
    Result, SandboxError, SubmitResponse,
};
use crate::config::validator::validate_config;
use crate::context::assemble;
use crate::exec::cancel::CancelToken;
use crate::exec::pool::{Job, WorkerPool};
use crate::observability::get_metrics;
use crate::runtime::{ContainerRuntime, SandboxDriver};
use crate::store::ExecutionStore;
use crate::validate::{validate_request, ValidatedRequest};
use chrono::Utc;
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub struct Coordinator {
    inner: Arc<Pipeline>,
    pool: WorkerPool,
}

/// State shared with worker threads
struct Pipeline {
    config: RunnerConfig,
    driver: SandboxDriver,
    store: Arc<dyn ExecutionStore>,
}

/// Outcome of admission on the caller's thread
enum Admission {
    Accepted(ExecutionRecord, ValidatedRequest),
    /// Record already persisted as failed
    Rejected(ExecutionRecord),
}

impl Coordinator {
    pub fn new(
        config: RunnerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn ExecutionStore>,
    ) -> Result<Self> {
        validate_config(&config)?;
        let pool = WorkerPool::new(config.workers, config.queue_capacity)?;
        let driver = SandboxDriver::new(runtime, &config);

        Ok(Self {
            inner: Arc::new(Pipeline {
                config,
                driver,
                store,
            }),
            pool,
        })
    }

    /// Run a request and block until it reaches a terminal state.
    ///
    /// Failures after admission (validation, build, timeout, cancellation)
    /// come back as a `failed` response with a message. `Err` is reserved for
    /// requests that could not be admitted at all.
    pub fn execute_sync(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionResponse> {
        let (record, validated) = match self.admit(request)? {
            Admission::Accepted(record, validated) => (record, validated),
            Admission::Rejected(record) => return Ok(ExecutionResponse::from(&record)),
        };

        let id = record.id.clone();
        let admitted = record.clone();
        let (reply_tx, reply_rx) = bounded(1);
        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();

        self.enqueue(
            &admitted,
            Box::new(move || {
                let finished = inner.process(record, validated, &cancel);
                let _ = reply_tx.send(finished);
            }),
        )?;

        match reply_rx.recv() {
            Ok(finished) => Ok(ExecutionResponse::from(&finished)),
            Err(_) => {
                // The job died without reporting; make sure the record is not left open
                let err = SandboxError::infrastructure("worker terminated without a result");
                let record = self
                    .inner
                    .store
                    .get(&id)?
                    .ok_or_else(|| SandboxError::Store(format!("unknown record {}", id)))?;
                let finished = self.inner.finish_failed(record, &err, None);
                Ok(ExecutionResponse::from(&finished))
            }
        }
    }

    /// Admit a request and return without waiting for it to run. Poll the
    /// returned id until the record is terminal.
    ///
    /// An admitted request is reported and recorded as `running` from the
    /// moment it is handed to the pool.
    pub fn submit_async(
        &self,
        request: &ExecutionRequest,
        cancel: CancelToken,
    ) -> Result<SubmitResponse> {
        let (mut record, validated) = match self.admit(request)? {
            Admission::Accepted(record, validated) => (record, validated),
            Admission::Rejected(record) => {
                return Ok(SubmitResponse {
                    execution_id: record.id,
                    status: record.status,
                })
            }
        };

        // Persisted before the hand-off so a fast worker never races it
        record.status = ExecutionStatus::Running;
        self.inner.persist(&record);

        let response = SubmitResponse {
            execution_id: record.id.clone(),
            status: record.status,
        };
        let admitted = record.clone();
        let inner = Arc::clone(&self.inner);
        self.enqueue(
            &admitted,
            Box::new(move || {
                inner.process(record, validated, &cancel);
            }),
        )?;

        Ok(response)
    }

    /// Current record for an execution id
    pub fn poll(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        self.inner.store.get(execution_id)
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.inner.store
    }

    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Stop admitting work, finish everything already queued and join workers
    pub fn shutdown(mut self) {
        self.pool.shutdown();
    }

    fn admit(&self, request: &ExecutionRequest) -> Result<Admission> {
        // Pure checks first: bad input is reported as bad input even when the
        // runtime is down, and never spawns a process
        let validated = validate_request(request, self.inner.config.unknown_language);

        if validated.is_ok() {
            self.inner.driver.runtime().probe()?;
            if self.pool.is_full() {
                let err = SandboxError::Saturated {
                    capacity: self.pool.capacity(),
                };
                log::warn!("Execution not admitted: {}", err);
                get_metrics().record_failure(&err);
                return Err(err);
            }
        }

        let record = ExecutionRecord::pending(Uuid::new_v4().to_string(), request);
        self.inner.store.create(&record)?;
        get_metrics().executions_submitted.inc();
        log::info!(
            "Execution {} submitted by {} ({}, {})",
            record.id,
            record.owner_id,
            record.kind,
            request.language
        );

        match validated {
            Ok(validated) => Ok(Admission::Accepted(record, validated)),
            Err(e) => {
                log::info!("Execution {} rejected: {}", record.id, e);
                Ok(Admission::Rejected(self.inner.finish_failed(record, &e, None)))
            }
        }
    }

    /// The queue can still fill between the room check in `admit` and this
    /// hand-off when callers submit concurrently; the record is failed then.
    fn enqueue(&self, record: &ExecutionRecord, job: Job) -> Result<()> {
        if let Err(e) = self.pool.try_submit(job) {
            log::warn!("Execution {} not admitted: {}", record.id, e);
            self.inner.finish_failed(record.clone(), &e, None);
            return Err(e);
        }
        Ok(())
    }
}

impl Pipeline {
    /// Worker side of a request; always returns a terminal record
    fn process(
        &self,
        mut record: ExecutionRecord,
        validated: ValidatedRequest,
        cancel: &CancelToken,
    ) -> ExecutionRecord {
        if cancel.is_cancelled() {
            return self.finish_failed(record, &SandboxError::Cancelled, None);
        }

        let started = Instant::now();
        record.status = ExecutionStatus::Running;
        self.persist(&record);

        let outcome = self.run(&validated, cancel);
        match outcome {
            Ok(result) => self.finish_completed(record, result, started),
            Err(e) => self.finish_failed(record, &e, Some(started)),
        }
    }

    fn run(&self, validated: &ValidatedRequest, cancel: &CancelToken) -> Result<ExecutionResult> {
        let mut ctx = assemble(validated, &self.config)?;
        let outcome = self.driver.execute(&ctx, validated, cancel);

        // Teardown happens before the outcome is persisted
        if let Err(e) = ctx.cleanup() {
            log::warn!("Build context cleanup failed: {}", e);
        }
        outcome
    }

    fn finish_completed(
        &self,
        mut record: ExecutionRecord,
        result: ExecutionResult,
        started: Instant,
    ) -> ExecutionRecord {
        let elapsed = started.elapsed();
        log::info!(
            "Execution {} completed with exit code {} in {:?}",
            record.id,
            result.exit_code,
            elapsed
        );
        get_metrics().record_completed(result.exit_code, elapsed);

        record.status = ExecutionStatus::Completed;
        record.result = Some(result);
        record.duration_ms = elapsed.as_millis() as u64;
        record.completed_at = Some(Utc::now());
        self.persist(&record);
        record
    }

    fn finish_failed(
        &self,
        mut record: ExecutionRecord,
        error: &SandboxError,
        started: Option<Instant>,
    ) -> ExecutionRecord {
        if record.status.is_terminal() {
            return record;
        }
        let reason = error.failure_reason();
        if !error.is_validation() {
            log::warn!("Execution {} failed: {}", record.id, reason);
        }
        get_metrics().record_failure(error);

        record.status = ExecutionStatus::Failed;
        record.failure_reason = Some(reason);
        record.duration_ms = started.map(|s| s.elapsed().as_millis() as u64).unwrap_or(0);
        record.completed_at = Some(Utc::now());
        self.persist(&record);
        record
    }

    /// Store writes after creation never change the request outcome
    fn persist(&self, record: &ExecutionRecord) {
        if let Err(e) = self.store.update(record) {
            get_metrics().store_write_errors.inc();
            log::error!(
                "Failed to persist execution {} as {}: {}",
                record.id,
                record.status,
                e
            );
        }
    }
}
