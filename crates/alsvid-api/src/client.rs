//! Typed HTTP client for the compute service.
//!
//! Single point of outbound HTTP access: attaches bearer tokens, refreshes
//! them on expiry, retries idempotent reads on transient failures, and
//! exposes the typed resource operations the job lifecycle is built on.
//!
//! ## Refresh policy
//!
//! The settings object is shared behind a mutex and the lock is held across
//! a refresh round-trip, so at most one refresh is in flight per host. A
//! request rejected with 401 triggers exactly one refresh and one retry; a
//! second 401 surfaces as an authorisation error instead of looping.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::auth::IdentityProvider;
use crate::error::{ApiError, ApiResult};
use crate::pagination::Page;
use crate::program::CircuitProgram;
use crate::settings::ApiSettings;

/// Maximum attempts for an idempotent read hitting transient failures.
const MAX_READ_ATTEMPTS: u32 = 3;

/// Base delay for the read-retry backoff; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Page size requested from collection endpoints.
const PAGE_SIZE: u32 = 100;

/// Operational status of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    /// Accepting jobs, nothing running.
    Idle,
    /// Accepting jobs, currently executing.
    Utilizing,
    /// Not accepting jobs.
    Offline,
}

/// Remote status values shared by batch jobs and their circuit jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobStatus {
    Queued,
    Reserved,
    Planned,
    Running,
    Finished,
    Failed,
    Cancelled,
}

/// Backend descriptor as listed by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendTypeResource {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: BackendStatus,
    pub is_hardware: bool,
    #[serde(default)]
    pub features: Vec<String>,
    /// Number of qubits on the device.
    pub nqubits: u32,
    pub default_number_of_shots: u32,
    pub max_number_of_shots: u32,
    /// Per-batch circuit limit; absent means unbounded.
    #[serde(default)]
    pub max_number_of_circuits: Option<u32>,
    /// Pairs of coupled qubits.
    #[serde(default)]
    pub topology: Vec<[u32; 2]>,
}

/// A batch-job record: one remote submission grouping many circuits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchJobResource {
    pub id: String,
    pub backend_type_id: String,
    pub status: RemoteJobStatus,
}

/// One uploaded circuit within a batch job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobResource {
    pub id: String,
    pub batch_job_id: String,
    pub status: RemoteJobStatus,
    /// Server-side failure reason, set when the job failed.
    #[serde(default)]
    pub message: Option<String>,
}

/// One raw result record for a circuit execution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawResultResource {
    pub id: String,
    pub job_id: String,
    pub shots_requested: u32,
    pub shots_done: u32,
    /// Measured bitstring counts.
    pub results: std::collections::HashMap<String, u64>,
}

#[derive(Debug, Serialize)]
struct CreateBatchJobRequest<'a> {
    backend_type_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
    batch_job_id: &'a str,
    name: &'a str,
    program: &'a str,
    number_of_shots: u32,
}

/// Typed HTTP façade over the compute service for a single host.
///
/// Cheap to clone; clones share the connection pool and the settings
/// context, and therefore the single-flight refresh lock.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    host: String,
    settings: Arc<Mutex<ApiSettings>>,
    settings_path: PathBuf,
    provider: IdentityProvider,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("host", &self.host)
            .field("settings_path", &self.settings_path)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl ApiClient {
    /// Connect to `host`, discovering its identity provider from the
    /// configured well-known endpoint.
    pub async fn connect(
        settings: Arc<Mutex<ApiSettings>>,
        settings_path: impl Into<PathBuf>,
        host: impl Into<String>,
    ) -> ApiResult<Self> {
        let host = host.into();
        let well_known = {
            let guard = settings.lock().await;
            guard.auth_for(&host)?.well_known_endpoint.clone()
        };
        let provider = IdentityProvider::discover(&well_known).await?;
        Self::with_provider(settings, settings_path, host, provider)
    }

    /// Load the settings file at `path` and connect to its default host.
    pub async fn from_config_file(path: impl Into<PathBuf>) -> ApiResult<Self> {
        let path = path.into();
        let settings = ApiSettings::from_config_file(&path)?;
        let host = settings.default_host.clone();
        Self::connect(Arc::new(Mutex::new(settings)), path, host).await
    }

    /// Build a client with an already-discovered identity provider.
    pub fn with_provider(
        settings: Arc<Mutex<ApiSettings>>,
        settings_path: impl Into<PathBuf>,
        host: impl Into<String>,
        provider: IdentityProvider,
    ) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            host: host.into().trim_end_matches('/').to_string(),
            settings,
            settings_path: settings_path.into(),
            provider,
        })
    }

    /// Host this client talks to; also the key into the settings.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Shared settings context, for building clients against other hosts.
    pub fn settings(&self) -> &Arc<Mutex<ApiSettings>> {
        &self.settings
    }

    // ── Typed resource operations ───────────────────────────────────

    /// List backend descriptors, one page at a time.
    #[instrument(skip(self))]
    pub async fn list_backend_types(&self, page: u32) -> ApiResult<Page<BackendTypeResource>> {
        self.get_json(&format!("backend-types?page={page}&size={PAGE_SIZE}"))
            .await
    }

    /// Create an empty batch-job record on `backend_type_id`.
    #[instrument(skip(self))]
    pub async fn create_batch_job(&self, backend_type_id: &str) -> ApiResult<BatchJobResource> {
        self.post_json("batch-jobs", &CreateBatchJobRequest { backend_type_id })
            .await
    }

    /// Upload one circuit program as an item of `batch_job_id`.
    #[instrument(skip(self, program), fields(circuit = %program.name))]
    pub async fn create_job(
        &self,
        batch_job_id: &str,
        program: &CircuitProgram,
        shots: u32,
    ) -> ApiResult<JobResource> {
        self.post_json(
            "jobs",
            &CreateJobRequest {
                batch_job_id,
                name: &program.name,
                program: &program.content,
                number_of_shots: shots,
            },
        )
        .await
    }

    /// Finalize a batch job so the server may start scheduling it.
    #[instrument(skip(self))]
    pub async fn enqueue_batch_job(&self, batch_job_id: &str) -> ApiResult<BatchJobResource> {
        self.post_json(
            &format!("batch-jobs/{batch_job_id}/enqueue"),
            &serde_json::json!({}),
        )
        .await
    }

    /// Fetch a batch job's current record (status poll).
    #[instrument(skip(self))]
    pub async fn get_batch_job(&self, batch_job_id: &str) -> ApiResult<BatchJobResource> {
        self.get_json(&format!("batch-jobs/{batch_job_id}")).await
    }

    /// Fetch one circuit job's record, including any failure message.
    #[instrument(skip(self))]
    pub async fn get_job(&self, job_id: &str) -> ApiResult<JobResource> {
        self.get_json(&format!("jobs/{job_id}")).await
    }

    /// List the raw result records of one circuit job, one page at a time.
    #[instrument(skip(self))]
    pub async fn list_results(
        &self,
        job_id: &str,
        page: u32,
    ) -> ApiResult<Page<RawResultResource>> {
        self.get_json(&format!("results/job/{job_id}?page={page}&size={PAGE_SIZE}"))
            .await
    }

    // ── Token handling ──────────────────────────────────────────────

    /// Return a valid access token, refreshing (and persisting) if needed.
    ///
    /// The settings lock is held across the refresh round-trip: concurrent
    /// callers queue here, and whoever arrives after the winner sees a
    /// fresh token and skips the network call.
    async fn access_token(&self) -> ApiResult<String> {
        let mut guard = self.settings.lock().await;
        self.refresh_if_needed(&mut guard, None).await
    }

    /// Force-refresh path for a request rejected with 401.
    ///
    /// `stale` is the token the rejected request carried; if the stored
    /// token already differs, another task rotated it in the meantime and
    /// that token is reused instead of refreshing again.
    async fn refreshed_token(&self, stale: &str) -> ApiResult<String> {
        let mut guard = self.settings.lock().await;
        self.refresh_if_needed(&mut guard, Some(stale)).await
    }

    async fn refresh_if_needed(
        &self,
        settings: &mut ApiSettings,
        stale: Option<&str>,
    ) -> ApiResult<String> {
        let (client_id, tokens) = {
            let auth = settings.auth_for(&self.host)?;
            (auth.client_id.clone(), auth.tokens.clone())
        };
        let tokens = tokens.ok_or_else(|| {
            ApiError::Authorisation(format!(
                "no tokens stored for {}; log in with the device flow first",
                self.host
            ))
        })?;

        let must_refresh = match stale {
            Some(stale) => tokens.access_token == stale,
            None => tokens.needs_refresh(),
        };
        if !must_refresh {
            return Ok(tokens.access_token);
        }

        debug!(host = %self.host, "refreshing access token");
        let fresh = self
            .provider
            .refresh_token(&client_id, &tokens.refresh_token)
            .await?;
        let access = fresh.access_token.clone();
        settings.store_tokens(&self.host, fresh, &self.settings_path)?;
        Ok(access)
    }

    // ── Request plumbing ────────────────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host, path.trim_start_matches('/'))
    }

    /// Issue a request with the current bearer token; on a 401 response,
    /// refresh once and retry once.
    async fn send_authorized(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> ApiResult<reqwest::Response> {
        let token = self.access_token().await?;
        let response = build().bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let fresh = self.refreshed_token(&token).await?;
        let response = build().bearer_auth(&fresh).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Authorisation(format!(
                "request to {} rejected twice despite refresh: {message}",
                self.host
            )));
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        url: &str,
        response: reqwest::Response,
    ) -> ApiResult<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Protocol {
            endpoint: url.to_string(),
            message: e.to_string(),
        })
    }

    /// GET with auth and bounded retries for transient failures.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let response = self.send_authorized(|| self.http.get(&url)).await?;
                self.decode(&url, response).await
            }
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) if attempt < MAX_READ_ATTEMPTS && is_transient(&err) => {
                    warn!(%url, attempt, "transient failure, retrying: {err}");
                    tokio::time::sleep(RETRY_BASE_DELAY * 2_u32.pow(attempt - 1)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// POST with auth. Creates are not idempotent, so transient failures
    /// are surfaced instead of retried — the caller decides whether to
    /// resubmit.
    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> ApiResult<T> {
        let url = self.url(path);
        let response = self
            .send_authorized(|| self.http.post(&url).json(body))
            .await?;
        self.decode(&url, response).await
    }
}

/// Whether an error is worth retrying on an idempotent read.
fn is_transient(err: &ApiError) -> bool {
    match err {
        ApiError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        ApiError::Api { status, .. } => *status >= 500,
        _ => false,
    }
}
