//! Job lifecycle and backend discovery for the alsvid client SDK.
//!
//! Built on top of [`alsvid_api`], this crate provides:
//!
//! - [`Provider`] — lists the backends available on the configured host
//! - [`Backend`] — immutable capability surface plus [`Backend::run`]
//! - [`Job`] — the submit/poll/result state machine, with deadline-bounded
//!   cancellable polling and snapshot/resume across processes
//! - [`ExecutionResult`] / [`Counts`] — decoded measurement outcomes
//!
//! # Example: run a batch and wait for counts
//!
//! ```ignore
//! use std::time::Duration;
//! use alsvid_api::CircuitProgram;
//! use alsvid_jobs::{BackendFilter, Provider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::connect().await?;
//!     let backend = provider.get_backend("spin-2").await?;
//!
//!     let program = CircuitProgram::new("bell", "version 3.0\nqubit[2] q;\n...");
//!     let mut job = backend.run(vec![program], 1024).await?;
//!
//!     let results = job
//!         .result(Duration::from_secs(300), Duration::from_secs(2))
//!         .await?;
//!     for (i, result) in results.iter().enumerate() {
//!         println!("circuit {i}: {:?}", result.counts.most_frequent());
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod job;
pub mod provider;
pub mod result;

pub use backend::Backend;
pub use error::{JobError, JobResult};
pub use job::{CircuitExecutionData, Job, JobStatus};
pub use provider::{BackendFilter, Provider};
pub use result::{Counts, ExecutionResult};

// The opaque program blob crosses both crates; re-export for convenience.
pub use alsvid_api::CircuitProgram;
