//! Error types for the job lifecycle layer.

use alsvid_api::ApiError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors that can occur while submitting and tracking jobs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobError {
    /// Underlying API failure (configuration, network, auth, protocol).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The server reported the job failed or was cancelled.
    #[error("Job {job_id} ended unsuccessfully: {reason}")]
    Execution {
        /// Remote batch-job id.
        job_id: String,
        /// Server-reported reason.
        reason: String,
    },

    /// The client-side poll deadline elapsed. The job is unaffected and
    /// remains pollable.
    #[error("Timed out waiting for job {job_id}")]
    Timeout {
        /// Remote batch-job id.
        job_id: String,
    },

    /// Result polling was cancelled by the caller. The job remains
    /// pollable.
    #[error("Result polling for job {job_id} was cancelled")]
    Cancelled {
        /// Remote batch-job id.
        job_id: String,
    },

    /// The operation is illegal in the job's current state.
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    /// The run request violates the backend's capabilities.
    #[error("Invalid run request: {0}")]
    InvalidRun(String),

    /// No backend with the requested name exists on the service.
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// Job handle (de)serialization failed.
    #[error("Job handle serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_display_carries_context() {
        let err = JobError::Execution {
            job_id: "b1".into(),
            reason: "compile error".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("b1"));
        assert!(msg.contains("compile error"));
    }

    #[test]
    fn test_timeout_display() {
        let err = JobError::Timeout { job_id: "b1".into() };
        assert!(err.to_string().contains("b1"));
    }

    #[test]
    fn test_api_error_is_transparent() {
        let inner = ApiError::HostNotConfigured("https://api.example.com".into());
        let err = JobError::from(inner);
        assert!(err.to_string().contains("https://api.example.com"));
    }

    #[test]
    fn test_backend_not_found_display() {
        let err = JobError::BackendNotFound("spin-2".into());
        assert!(err.to_string().contains("spin-2"));
    }
}
