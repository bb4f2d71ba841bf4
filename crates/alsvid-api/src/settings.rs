//! Persistent per-host configuration and OAuth token storage.
//!
//! Settings live in a single JSON file (default `~/.alsvid/config.json`,
//! overridable through [`CONFIG_FILE_ENV`]) holding one [`AuthSettings`]
//! entry per API host plus the default host. Token updates rewrite the file
//! atomically: the new content is written next to the target and renamed
//! over it, so a crash mid-write never clobbers previously valid tokens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// Environment variable overriding the settings file location.
pub const CONFIG_FILE_ENV: &str = "ALSVID_CONFIG_FILE";

/// Seconds subtracted from the access-token expiry when deciding whether
/// to refresh, so a token is never sent moments before it lapses.
pub(crate) const REFRESH_BUFFER_SECS: u64 = 5;

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// OAuth access and refresh token pair with expiry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenInfo {
    /// Bearer token attached to API requests.
    pub access_token: String,
    /// Access-token lifetime in seconds, counted from `generated_at`.
    pub expires_in: u64,
    /// Token exchanged for a fresh pair once the access token lapses.
    pub refresh_token: String,
    /// Refresh-token lifetime in seconds, when the provider reports one.
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
    /// Unix timestamp at which the pair was issued.
    #[serde(default = "unix_now")]
    pub generated_at: u64,
}

impl TokenInfo {
    /// Unix timestamp at which the access token expires.
    pub fn access_expires_at(&self) -> u64 {
        self.generated_at + self.expires_in
    }

    /// Whether the access token is expired at `now` (unix seconds).
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.access_expires_at()
    }

    /// Whether the access token is expired right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    /// Whether the token should be refreshed before being sent.
    pub(crate) fn needs_refresh(&self) -> bool {
        unix_now() + REFRESH_BUFFER_SECS >= self.access_expires_at()
    }
}

fn default_client_id() -> String {
    "compute-job-manager".to_string()
}

fn default_code_challenge_method() -> String {
    "S256".to_string()
}

fn default_code_verifier_length() -> usize {
    64
}

/// OAuth client configuration for a single API host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSettings {
    /// OAuth client identifier registered with the identity provider.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// OIDC discovery document for the host's identity provider.
    pub well_known_endpoint: String,
    /// PKCE challenge method; the service only accepts S256.
    #[serde(default = "default_code_challenge_method")]
    pub code_challenge_method: String,
    /// Length of the generated PKCE code verifier.
    #[serde(default = "default_code_verifier_length")]
    pub code_verifier_length: usize,
    /// Team membership the account acts under, when applicable.
    #[serde(default)]
    pub team_member_id: Option<i64>,
    /// Persisted tokens; `None` until the first device-flow login.
    #[serde(default)]
    pub tokens: Option<TokenInfo>,
}

impl AuthSettings {
    /// Settings for a host that has not been logged into yet.
    pub fn new(well_known_endpoint: impl Into<String>) -> Self {
        Self {
            client_id: default_client_id(),
            well_known_endpoint: well_known_endpoint.into(),
            code_challenge_method: default_code_challenge_method(),
            code_verifier_length: default_code_verifier_length(),
            team_member_id: None,
            tokens: None,
        }
    }
}

/// The process-wide persistent configuration: one auth entry per host.
///
/// A single instance is shared (behind a lock) by every client that needs
/// per-host configuration; token refreshes mutate it in place and persist
/// it back to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSettings {
    /// Host used when the caller does not pick one explicitly.
    pub default_host: String,
    /// Per-host auth configuration, keyed by API host URL.
    pub auths: HashMap<String, AuthSettings>,
}

impl ApiSettings {
    /// Default settings file location (`~/.alsvid/config.json`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".alsvid")
            .join("config.json")
    }

    /// Settings file location, honoring the [`CONFIG_FILE_ENV`] override.
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path)
    }

    /// Read and validate the settings file at `path`.
    pub fn from_config_file(path: &Path) -> ApiResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ApiError::Config(format!("cannot read settings file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ApiError::Config(format!("malformed settings file {}: {e}", path.display()))
        })
    }

    /// Auth settings for `host`.
    pub fn auth_for(&self, host: &str) -> ApiResult<&AuthSettings> {
        self.auths
            .get(host)
            .ok_or_else(|| ApiError::HostNotConfigured(host.to_string()))
    }

    /// Store fresh tokens for `host` and rewrite the settings file.
    ///
    /// The file is replaced atomically; on failure the previous content
    /// stays intact.
    pub fn store_tokens(&mut self, host: &str, tokens: TokenInfo, path: &Path) -> ApiResult<()> {
        let auth = self
            .auths
            .get_mut(host)
            .ok_or_else(|| ApiError::HostNotConfigured(host.to_string()))?;
        auth.tokens = Some(tokens);
        self.write_atomic(path)
    }

    fn write_atomic(&self, path: &Path) -> ApiResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ApiError::Config(format!("cannot serialize settings: {e}")))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ApiError::Config(format!(
                    "cannot create settings directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        // Write next to the target so the rename stays on one filesystem.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            ApiError::Config(format!("cannot write settings file {}: {e}", tmp.display()))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&tmp, perms).map_err(|e| {
                ApiError::Config(format!("cannot restrict settings permissions: {e}"))
            })?;
        }

        std::fs::rename(&tmp, path).map_err(|e| {
            ApiError::Config(format!(
                "cannot replace settings file {}: {e}",
                path.display()
            ))
        })
    }
}
