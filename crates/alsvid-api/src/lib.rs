//! HTTP and authentication layer for the alsvid client SDK.
//!
//! This crate owns everything between the job lifecycle and the wire:
//!
//! - [`ApiSettings`] — per-host configuration and OAuth tokens, persisted
//!   as a single JSON file rewritten atomically on every token change
//! - [`IdentityProvider`] / [`OauthDeviceSession`] — OAuth2 device-flow
//!   login (RFC 8628, PKCE) and non-interactive token refresh
//! - [`PageReader`] — uniform walker for the service's paginated
//!   collection endpoints
//! - [`ApiClient`] — typed HTTP façade that attaches bearer tokens,
//!   refreshes them on expiry (single-flight per settings object), and
//!   retries idempotent reads on transient failures
//!
//! # Example: logging in and listing backends
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//! use alsvid_api::{ApiClient, ApiSettings, IdentityProvider, PageReader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let path = ApiSettings::config_path();
//!     let mut settings = ApiSettings::from_config_file(&path)?;
//!     let host = settings.default_host.clone();
//!
//!     // Interactive login (first run only)
//!     let auth = settings.auth_for(&host)?.clone();
//!     let provider = IdentityProvider::discover(&auth.well_known_endpoint).await?;
//!     let mut session = provider.start_device_session(&auth).await?;
//!     println!("Visit {} and enter {}", session.verification_uri, session.user_code);
//!     let tokens = session.poll_for_token().await?;
//!     settings.store_tokens(&host, tokens, &path)?;
//!
//!     // Authenticated, auto-refreshing client
//!     let client = ApiClient::with_provider(
//!         Arc::new(Mutex::new(settings)), path, host, provider,
//!     )?;
//!     let backends = PageReader::get_all(|page| client.list_backend_types(page)).await?;
//!     println!("{} backends available", backends.len());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod pagination;
pub mod program;
pub mod settings;

pub use auth::{IdentityProvider, OauthDeviceSession, PkceChallenge};
pub use client::{
    ApiClient, BackendStatus, BackendTypeResource, BatchJobResource, JobResource,
    RawResultResource, RemoteJobStatus,
};
pub use error::{ApiError, ApiResult};
pub use pagination::{Page, PageReader};
pub use program::CircuitProgram;
pub use settings::{ApiSettings, AuthSettings, CONFIG_FILE_ENV, TokenInfo};
