//! A runnable target on the remote service.

use alsvid_api::{ApiClient, BackendStatus, BackendTypeResource, CircuitProgram};
use tracing::instrument;

use crate::error::{JobError, JobResult};
use crate::job::Job;

/// A backend the service can run circuits on.
///
/// Capability fields come verbatim from the remote descriptor and do not
/// change over the lifetime of this handle; re-list backends to observe
/// status changes.
#[derive(Debug, Clone)]
pub struct Backend {
    client: ApiClient,
    descriptor: BackendTypeResource,
}

impl Backend {
    pub(crate) fn new(client: ApiClient, descriptor: BackendTypeResource) -> Self {
        Self { client, descriptor }
    }

    /// Backend name, e.g. `"spin-2"`.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Remote descriptor id.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.descriptor.description
    }

    /// Operational status at the time the descriptor was fetched.
    pub fn status(&self) -> BackendStatus {
        self.descriptor.status
    }

    /// Whether this is a physical device rather than an emulator.
    pub fn is_hardware(&self) -> bool {
        self.descriptor.is_hardware
    }

    /// Feature flags advertised by the backend.
    pub fn features(&self) -> &[String] {
        &self.descriptor.features
    }

    /// Number of qubits on the device.
    pub fn num_qubits(&self) -> u32 {
        self.descriptor.nqubits
    }

    /// Shots used when the caller does not pick a count.
    pub fn default_shots(&self) -> u32 {
        self.descriptor.default_number_of_shots
    }

    /// Upper bound on shots per circuit.
    pub fn max_shots(&self) -> u32 {
        self.descriptor.max_number_of_shots
    }

    /// Upper bound on circuits per batch; `None` means unbounded.
    pub fn max_circuits(&self) -> Option<u32> {
        self.descriptor.max_number_of_circuits
    }

    /// Pairs of coupled qubits.
    pub fn topology(&self) -> &[[u32; 2]] {
        &self.descriptor.topology
    }

    /// The full remote descriptor.
    pub fn descriptor(&self) -> &BackendTypeResource {
        &self.descriptor
    }

    /// Construct and submit a job running `programs` at `shots`.
    ///
    /// Capability violations are rejected before any network call.
    #[instrument(skip(self, programs), fields(backend = %self.descriptor.name))]
    pub async fn run(&self, programs: Vec<CircuitProgram>, shots: u32) -> JobResult<Job> {
        if programs.is_empty() {
            return Err(JobError::InvalidRun("no circuits to run".into()));
        }
        if shots == 0 || shots > self.descriptor.max_number_of_shots {
            return Err(JobError::InvalidRun(format!(
                "shots must be in 1..={}, got {shots}",
                self.descriptor.max_number_of_shots
            )));
        }
        if let Some(max) = self.descriptor.max_number_of_circuits {
            if programs.len() as u32 > max {
                return Err(JobError::InvalidRun(format!(
                    "backend {} accepts at most {max} circuits per batch, got {}",
                    self.descriptor.name,
                    programs.len()
                )));
            }
        }

        let mut job = Job::new(
            self.client.clone(),
            self.descriptor.name.clone(),
            self.descriptor.id.clone(),
            programs,
            shots,
        );
        job.submit().await?;
        Ok(job)
    }

    /// Run a single program with the backend's default shot count.
    pub async fn run_one(&self, program: CircuitProgram) -> JobResult<Job> {
        let shots = self.descriptor.default_number_of_shots;
        self.run(vec![program], shots).await
    }
}
