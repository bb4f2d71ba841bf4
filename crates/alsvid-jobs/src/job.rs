//! Job state machine: submit, poll, fetch results, persist.
//!
//! The job lifecycle:
//!
//! ```text
//!   Created ──submit()──→ Queued ──→ Running ──→ Finished
//!    (local)                 │           │
//!                            │           ├──→ Failed(reason)
//!                            │           │
//!                            └───────────┴──→ Cancelled
//! ```
//!
//! **Invariants:**
//! - Transitions are driven entirely by server-reported status; the client
//!   never infers one locally.
//! - A job never moves backward; terminal states are permanent.
//! - `submit()` is not repeatable — a second call fails without touching
//!   the network.
//! - A poll deadline or caller cancellation leaves the job re-pollable
//!   with no partially written results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use alsvid_api::{ApiClient, CircuitProgram, PageReader, RemoteJobStatus};

use crate::error::{JobError, JobResult};
use crate::result::ExecutionResult;

/// Client-observable job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Staged locally, not yet submitted.
    Created,
    /// Accepted by the service, waiting for the device.
    Queued,
    /// Executing on the device.
    Running,
    /// Completed successfully; results can be fetched.
    Finished,
    /// Stopped by the service before completion.
    Cancelled,
    /// Ended in an error; see the server-reported reason.
    Failed,
}

impl JobStatus {
    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    /// Whether the job is still queued or running.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl From<RemoteJobStatus> for JobStatus {
    fn from(remote: RemoteJobStatus) -> Self {
        match remote {
            // The service reserves and plans work before the device picks
            // it up; from the client's point of view all three are queued.
            RemoteJobStatus::Queued | RemoteJobStatus::Reserved | RemoteJobStatus::Planned => {
                JobStatus::Queued
            }
            RemoteJobStatus::Running => JobStatus::Running,
            RemoteJobStatus::Finished => JobStatus::Finished,
            RemoteJobStatus::Failed => JobStatus::Failed,
            RemoteJobStatus::Cancelled => JobStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Created => write!(f, "Created"),
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Finished => write!(f, "Finished"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// One circuit's slice of a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitExecutionData {
    /// The uploaded program.
    pub program: CircuitProgram,
    /// Remote per-circuit job id, assigned at submission.
    pub job_id: String,
    /// Decoded results, populated once the batch finishes.
    pub results: Option<ExecutionResult>,
}

/// Serializable identifying state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JobState {
    /// Remote batch-job id; `None` until submitted.
    id: Option<String>,
    backend_name: String,
    backend_type_id: String,
    shots: u32,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
    /// Uploaded circuits, in submission order.
    #[serde(default)]
    executions: Vec<CircuitExecutionData>,
    /// Programs staged before submission.
    #[serde(default)]
    pending: Vec<CircuitProgram>,
}

/// A batch of circuit executions submitted as one remote job.
///
/// A job handle can be serialized with [`Job::serialize`] and resumed in a
/// different process with [`Job::deserialize`]; polling continues where
/// the snapshot left off.
#[derive(Debug, Clone)]
pub struct Job {
    client: ApiClient,
    state: JobState,
}

impl Job {
    /// Stage a new local job for a backend.
    pub(crate) fn new(
        client: ApiClient,
        backend_name: impl Into<String>,
        backend_type_id: impl Into<String>,
        programs: Vec<CircuitProgram>,
        shots: u32,
    ) -> Self {
        Self {
            client,
            state: JobState {
                id: None,
                backend_name: backend_name.into(),
                backend_type_id: backend_type_id.into(),
                shots,
                submitted_at: None,
                executions: Vec::new(),
                pending: programs,
            },
        }
    }

    /// Remote batch-job id; `None` before submission.
    pub fn id(&self) -> Option<&str> {
        self.state.id.as_deref()
    }

    /// Name of the backend this job targets.
    pub fn backend_name(&self) -> &str {
        &self.state.backend_name
    }

    /// Shots requested per circuit.
    pub fn shots(&self) -> u32 {
        self.state.shots
    }

    /// When the job was submitted, if it was.
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.state.submitted_at
    }

    /// Uploaded circuits in submission order; empty before submission.
    pub fn executions(&self) -> &[CircuitExecutionData] {
        &self.state.executions
    }

    /// Submit the staged circuits: create the batch record, upload each
    /// program in order, then enqueue the batch.
    ///
    /// Submission is not idempotent and is never silently retried; a
    /// mid-submit failure leaves the job unsubmitted so the caller can
    /// decide whether to try again.
    #[instrument(skip(self), fields(backend = %self.state.backend_name))]
    pub async fn submit(&mut self) -> JobResult<String> {
        if self.state.id.is_some() {
            return Err(JobError::InvalidState(
                "job was already submitted".into(),
            ));
        }

        let batch = self
            .client
            .create_batch_job(&self.state.backend_type_id)
            .await?;

        let mut executions = Vec::with_capacity(self.state.pending.len());
        for program in &self.state.pending {
            let record = self
                .client
                .create_job(&batch.id, program, self.state.shots)
                .await?;
            executions.push(CircuitExecutionData {
                program: program.clone(),
                job_id: record.id,
                results: None,
            });
        }

        self.client.enqueue_batch_job(&batch.id).await?;

        self.state.executions = executions;
        self.state.pending.clear();
        self.state.id = Some(batch.id.clone());
        self.state.submitted_at = Some(Utc::now());
        debug!(job_id = %batch.id, circuits = self.state.executions.len(), "batch job enqueued");
        Ok(batch.id)
    }

    /// Current status. A single service call once submitted; never blocks.
    pub async fn status(&self) -> JobResult<JobStatus> {
        let Some(id) = &self.state.id else {
            return Ok(JobStatus::Created);
        };
        let batch = self.client.get_batch_job(id).await?;
        Ok(batch.status.into())
    }

    /// Poll until the job reaches a terminal state, then fetch and decode
    /// every circuit's results in submission order.
    ///
    /// On a deadline the job is untouched and remains pollable — a timeout
    /// is a client-side give-up, not a cancellation.
    pub async fn result(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> JobResult<Vec<ExecutionResult>> {
        self.result_with_cancel(timeout, poll_interval, &CancellationToken::new())
            .await
    }

    /// Like [`Job::result`], but also stops early when `cancel` fires,
    /// leaving the job consistent and re-pollable.
    #[instrument(skip(self, cancel), fields(job_id = self.state.id.as_deref().unwrap_or("-")))]
    pub async fn result_with_cancel(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> JobResult<Vec<ExecutionResult>> {
        let id = self.state.id.clone().ok_or_else(|| {
            JobError::InvalidState("job was not submitted".into())
        })?;

        // Results are immutable once fetched; never re-fetch them.
        if let Some(cached) = self.cached_results() {
            return Ok(cached);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let status = JobStatus::from(self.client.get_batch_job(&id).await?.status);
            match status {
                JobStatus::Finished => break,
                JobStatus::Failed | JobStatus::Cancelled => {
                    let reason = self.failure_reason(status).await?;
                    return Err(JobError::Execution { job_id: id, reason });
                }
                _ => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(JobError::Timeout { job_id: id });
            }
            let wait = poll_interval.min(deadline - now);
            tokio::select! {
                () = cancel.cancelled() => return Err(JobError::Cancelled { job_id: id }),
                () = sleep(wait) => {}
            }
        }

        self.fetch_results().await
    }

    /// Snapshot the job's identifying state for persistence.
    pub fn serialize(&self) -> JobResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.state)?)
    }

    /// Rebuild a job handle from a [`Job::serialize`] snapshot.
    ///
    /// A snapshot taken before results arrived leaves them unset; a
    /// subsequent [`Job::result`] call resumes polling.
    pub fn deserialize(client: ApiClient, bytes: &[u8]) -> JobResult<Self> {
        let state: JobState = serde_json::from_slice(bytes)?;
        Ok(Self { client, state })
    }

    fn cached_results(&self) -> Option<Vec<ExecutionResult>> {
        if self.state.executions.is_empty() {
            return None;
        }
        self.state
            .executions
            .iter()
            .map(|execution| execution.results.clone())
            .collect()
    }

    /// Collect the server-reported failure reasons from the per-circuit
    /// job records.
    async fn failure_reason(&self, status: JobStatus) -> JobResult<String> {
        let mut reasons = Vec::new();
        for execution in &self.state.executions {
            let record = self.client.get_job(&execution.job_id).await?;
            if let Some(message) = record.message {
                reasons.push(format!("{}: {message}", execution.program.name));
            }
        }
        if reasons.is_empty() {
            Ok(format!("job ended as {status} with no reason reported"))
        } else {
            Ok(reasons.join("; "))
        }
    }

    /// Fetch and decode all circuit results, in submission order.
    ///
    /// Decoded results are staged in full before any execution is mutated,
    /// so an error mid-fetch leaves the job re-pollable.
    async fn fetch_results(&mut self) -> JobResult<Vec<ExecutionResult>> {
        let mut decoded = Vec::with_capacity(self.state.executions.len());
        for execution in &self.state.executions {
            let records =
                PageReader::get_all(|page| self.client.list_results(&execution.job_id, page))
                    .await?;
            decoded.push(ExecutionResult::from_raw(&records));
        }

        for (execution, result) in self.state.executions.iter_mut().zip(decoded.iter()) {
            execution.results = Some(result.clone());
        }
        debug!(circuits = decoded.len(), "results fetched and decoded");
        Ok(decoded)
    }
}
