//! OAuth2 device-flow authentication and token refresh.
//!
//! The identity provider is located through its OIDC discovery document.
//! Logging in follows RFC 8628: the client requests a device code, shows
//! the user code and verification URI to the human, and polls the token
//! endpoint until the grant is approved, denied, or expired. A PKCE
//! verifier/challenge pair (S256) protects the exchange.
//!
//! Refreshing is non-interactive: a stored refresh token is exchanged for
//! a new pair. A rejected refresh is terminal — the caller must restart
//! the device flow.

use std::time::Duration;

use base64::Engine as _;
use rand::Rng as _;
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::error::{ApiError, ApiResult};
use crate::settings::{AuthSettings, TokenInfo, unix_now};

/// Grant type for the device-code token request.
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Seconds added to the poll interval on a `slow_down` response (RFC 8628 §3.5).
const SLOW_DOWN_STEP_SECS: u64 = 5;

/// PKCE verifier/challenge pair (S256).
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Random secret the client keeps until the token exchange.
    pub verifier: String,
    /// URL-safe base64 of the verifier's SHA-256 digest.
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a verifier of `length` characters with its S256 challenge.
    pub fn generate(length: usize) -> Self {
        let verifier: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        Self {
            verifier,
            challenge,
        }
    }
}

/// Endpoints we need from the OIDC discovery document.
///
/// Discovery documents carry dozens of standard fields; only the two the
/// device flow uses are required here, the rest are ignored.
#[derive(Debug, Clone, Deserialize)]
struct DiscoveryDocument {
    token_endpoint: String,
    device_authorization_endpoint: String,
}

/// Successful token-endpoint response (device-code or refresh grant).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: String,
    #[serde(default)]
    refresh_expires_in: Option<u64>,
}

impl TokenResponse {
    fn into_token_info(self) -> TokenInfo {
        TokenInfo {
            access_token: self.access_token,
            expires_in: self.expires_in,
            refresh_token: self.refresh_token,
            refresh_expires_in: self.refresh_expires_in,
            generated_at: unix_now(),
        }
    }
}

/// RFC 6749 error body from the token endpoint.
#[derive(Debug, Deserialize)]
struct OauthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl OauthErrorResponse {
    fn description(&self, status: u16) -> String {
        self.error_description
            .clone()
            .unwrap_or_else(|| format!("{} (status {status})", self.error))
    }
}

/// Device-authorization endpoint response.
#[derive(Debug, Deserialize)]
struct DeviceAuthResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: u64,
    interval: u64,
}

/// Outcome of a single device-grant poll.
enum DevicePoll {
    Pending,
    SlowDown,
    Authorized(TokenInfo),
    Denied(String),
    Expired,
}

/// Client for the OAuth identity provider located via OIDC discovery.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    http: reqwest::Client,
    token_endpoint: String,
    device_endpoint: String,
}

impl IdentityProvider {
    /// Locate the token and device-authorization endpoints behind
    /// `well_known_endpoint`.
    #[instrument(skip_all, fields(well_known = %well_known_endpoint))]
    pub async fn discover(well_known_endpoint: &str) -> ApiResult<Self> {
        let http = http_client()?;

        let response = http.get(well_known_endpoint).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Api {
                status: response.status().as_u16(),
                message: format!("discovery failed for {well_known_endpoint}"),
            });
        }

        let doc: DiscoveryDocument = response.json().await.map_err(|e| ApiError::Protocol {
            endpoint: well_known_endpoint.to_string(),
            message: e.to_string(),
        })?;

        debug!(token_endpoint = %doc.token_endpoint, "identity provider discovered");
        Ok(Self {
            http,
            token_endpoint: doc.token_endpoint,
            device_endpoint: doc.device_authorization_endpoint,
        })
    }

    /// Build a provider from already-known endpoints (useful for testing).
    pub fn with_endpoints(
        token_endpoint: impl Into<String>,
        device_endpoint: impl Into<String>,
    ) -> ApiResult<Self> {
        Ok(Self {
            http: http_client()?,
            token_endpoint: token_endpoint.into(),
            device_endpoint: device_endpoint.into(),
        })
    }

    /// Start a device-authorization session for the given host settings.
    ///
    /// The returned session carries the `user_code` and `verification_uri`
    /// the caller must show to the human before polling.
    #[instrument(skip_all, fields(client_id = %auth.client_id))]
    pub async fn start_device_session(
        &self,
        auth: &AuthSettings,
    ) -> ApiResult<OauthDeviceSession> {
        let pkce = PkceChallenge::generate(auth.code_verifier_length);
        let params = [
            ("client_id", auth.client_id.as_str()),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", auth.code_challenge_method.as_str()),
        ];

        let response = self.http.post(&self.device_endpoint).form(&params).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Authorisation(format!(
                "device authorization failed ({status}): {message}"
            )));
        }

        let grant: DeviceAuthResponse =
            response.json().await.map_err(|e| ApiError::Protocol {
                endpoint: self.device_endpoint.clone(),
                message: e.to_string(),
            })?;

        debug!(user_code = %grant.user_code, "device code issued");
        Ok(OauthDeviceSession {
            provider: self.clone(),
            client_id: auth.client_id.clone(),
            verifier: pkce.verifier,
            device_code: grant.device_code,
            user_code: grant.user_code,
            verification_uri: grant.verification_uri,
            verification_uri_complete: grant.verification_uri_complete,
            interval: Duration::from_secs(grant.interval),
            expires_at: Instant::now() + Duration::from_secs(grant.expires_in),
        })
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// Any rejection is an [`ApiError::Authorisation`]: the refresh token is
    /// spent or revoked and retrying with it would never succeed.
    #[instrument(skip_all)]
    pub async fn refresh_token(
        &self,
        client_id: &str,
        refresh_token: &str,
    ) -> ApiResult<TokenInfo> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
        ];

        let response = self.http.post(&self.token_endpoint).form(&params).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Authorisation(format!(
                "token refresh rejected ({status}): {message}"
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| ApiError::Protocol {
            endpoint: self.token_endpoint.clone(),
            message: e.to_string(),
        })?;

        debug!("access token refreshed");
        Ok(token.into_token_info())
    }

    /// Poll the token endpoint once for a pending device grant.
    async fn poll_device_token(
        &self,
        client_id: &str,
        device_code: &str,
        verifier: &str,
    ) -> ApiResult<DevicePoll> {
        let params = [
            ("grant_type", DEVICE_CODE_GRANT),
            ("device_code", device_code),
            ("client_id", client_id),
            ("code_verifier", verifier),
        ];

        let response = self.http.post(&self.token_endpoint).form(&params).send().await?;

        if response.status().is_success() {
            let token: TokenResponse = response.json().await.map_err(|e| ApiError::Protocol {
                endpoint: self.token_endpoint.clone(),
                message: e.to_string(),
            })?;
            return Ok(DevicePoll::Authorized(token.into_token_info()));
        }

        let status = response.status().as_u16();
        let err: OauthErrorResponse =
            response.json().await.map_err(|e| ApiError::Protocol {
                endpoint: self.token_endpoint.clone(),
                message: e.to_string(),
            })?;

        match err.error.as_str() {
            "authorization_pending" => Ok(DevicePoll::Pending),
            "slow_down" => Ok(DevicePoll::SlowDown),
            "access_denied" => Ok(DevicePoll::Denied(err.description(status))),
            "expired_token" => Ok(DevicePoll::Expired),
            _ => Err(ApiError::Authorisation(format!(
                "token poll failed: {}",
                err.description(status)
            ))),
        }
    }
}

/// An in-progress device-authorization session.
///
/// Show [`user_code`](Self::user_code) and
/// [`verification_uri`](Self::verification_uri) to the user, then call
/// [`poll_for_token`](Self::poll_for_token). Polling is the only operation
/// in this crate allowed to block for human-timescale durations.
#[derive(Debug, Clone)]
pub struct OauthDeviceSession {
    provider: IdentityProvider,
    client_id: String,
    verifier: String,
    /// Opaque code identifying this grant at the token endpoint.
    pub device_code: String,
    /// Short code the user types at the verification URI.
    pub user_code: String,
    /// Where the user authorizes the grant.
    pub verification_uri: String,
    /// Verification URI with the user code pre-filled, when offered.
    pub verification_uri_complete: Option<String>,
    interval: Duration,
    expires_at: Instant,
}

impl OauthDeviceSession {
    /// Current interval between token polls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll the token endpoint until the user authorizes, the device code
    /// expires, or the grant is denied.
    ///
    /// `authorization_pending` responses are retried at the advertised
    /// interval; `slow_down` widens the interval by 5 seconds.
    #[instrument(skip(self), fields(user_code = %self.user_code))]
    pub async fn poll_for_token(&mut self) -> ApiResult<TokenInfo> {
        loop {
            if Instant::now() >= self.expires_at {
                return Err(ApiError::Authorisation(
                    "device code expired before the user authorized".into(),
                ));
            }

            tokio::time::sleep(self.interval).await;

            let poll = self
                .provider
                .poll_device_token(&self.client_id, &self.device_code, &self.verifier)
                .await?;

            match poll {
                DevicePoll::Authorized(token) => {
                    debug!("device grant authorized");
                    return Ok(token);
                }
                DevicePoll::Pending => {}
                DevicePoll::SlowDown => {
                    self.interval += Duration::from_secs(SLOW_DOWN_STEP_SECS);
                }
                DevicePoll::Denied(reason) => {
                    return Err(ApiError::Authorisation(format!(
                        "device grant denied: {reason}"
                    )));
                }
                DevicePoll::Expired => {
                    return Err(ApiError::Authorisation("device code expired".into()));
                }
            }
        }
    }
}

fn http_client() -> ApiResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn auth_settings() -> AuthSettings {
        AuthSettings::new("https://auth.example.com/.well-known/openid-configuration")
    }

    fn token_body() -> serde_json::Value {
        json!({
            "access_token": "fresh-access",
            "expires_in": 300,
            "refresh_token": "fresh-refresh",
            "refresh_expires_in": 1800
        })
    }

    async fn session_against(server: &MockServer, expires_in: u64, interval: u64) -> OauthDeviceSession {
        Mock::given(method("POST"))
            .and(path("/device"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_code": "dev-123",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://auth.example.com/device",
                "expires_in": expires_in,
                "interval": interval
            })))
            .mount(server)
            .await;

        let provider = IdentityProvider::with_endpoints(
            format!("{}/token", server.uri()),
            format!("{}/device", server.uri()),
        )
        .unwrap();
        provider.start_device_session(&auth_settings()).await.unwrap()
    }

    #[test]
    fn test_pkce_challenge_matches_verifier() {
        let pkce = PkceChallenge::generate(64);
        assert_eq!(pkce.verifier.len(), 64);

        let digest = Sha256::digest(pkce.verifier.as_bytes());
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        assert_eq!(pkce.challenge, expected);
        // URL-safe alphabet, no padding
        assert!(!pkce.challenge.contains('='));
        assert!(!pkce.challenge.contains('+'));
    }

    #[test]
    fn test_pkce_verifiers_are_unique() {
        let a = PkceChallenge::generate(43);
        let b = PkceChallenge::generate(43);
        assert_ne!(a.verifier, b.verifier);
    }

    #[tokio::test]
    async fn test_discover_reads_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": "https://auth.example.com",
                "token_endpoint": "https://auth.example.com/token",
                "device_authorization_endpoint": "https://auth.example.com/device",
                "jwks_uri": "https://auth.example.com/certs"
            })))
            .mount(&server)
            .await;

        let provider = IdentityProvider::discover(&format!(
            "{}/.well-known/openid-configuration",
            server.uri()
        ))
        .await
        .unwrap();

        assert_eq!(provider.token_endpoint, "https://auth.example.com/token");
        assert_eq!(provider.device_endpoint, "https://auth.example.com/device");
    }

    #[tokio::test]
    async fn test_discover_missing_endpoint_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": "https://auth.example.com"
            })))
            .mount(&server)
            .await;

        let err = IdentityProvider::discover(&format!(
            "{}/.well-known/openid-configuration",
            server.uri()
        ))
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_device_session_carries_grant_details() {
        let server = MockServer::start().await;
        let session = session_against(&server, 600, 5).await;

        assert_eq!(session.user_code, "ABCD-EFGH");
        assert_eq!(session.verification_uri, "https://auth.example.com/device");
        assert_eq!(session.interval(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_poll_authorized_on_third_attempt() {
        let server = MockServer::start().await;
        // First two polls: authorization pending. Third: tokens.
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": "authorization_pending"})),
            )
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = session_against(&server, 600, 0).await;
        let token = session.poll_for_token().await.unwrap();

        assert_eq!(token.access_token, "fresh-access");
        assert_eq!(token.refresh_token, "fresh-refresh");
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_poll_sends_pkce_verifier_and_device_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("device_code=dev-123"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = session_against(&server, 600, 0).await;
        session.poll_for_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_slow_down_widens_interval() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "slow_down"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .mount(&server)
            .await;

        let mut session = session_against(&server, 600, 0).await;
        session.poll_for_token().await.unwrap();

        assert_eq!(session.interval(), Duration::from_secs(SLOW_DOWN_STEP_SECS));
    }

    #[tokio::test]
    async fn test_poll_denied_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "access_denied",
                "error_description": "user declined the grant"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = session_against(&server, 600, 0).await;
        let err = session.poll_for_token().await.unwrap_err();

        match err {
            ApiError::Authorisation(msg) => assert!(msg.contains("user declined the grant")),
            other => panic!("expected Authorisation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_expired_device_code_without_network() {
        let server = MockServer::start().await;
        let mut session = session_against(&server, 0, 0).await;

        let err = session.poll_for_token().await.unwrap_err();
        assert!(matches!(err, ApiError::Authorisation(_)));

        // The deadline tripped before any token-endpoint call.
        let polls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/token")
            .count();
        assert_eq!(polls, 0);
    }

    #[tokio::test]
    async fn test_refresh_returns_new_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let provider = IdentityProvider::with_endpoints(
            format!("{}/token", server.uri()),
            format!("{}/device", server.uri()),
        )
        .unwrap();

        let token = provider
            .refresh_token("compute-job-manager", "old-refresh")
            .await
            .unwrap();
        assert_eq!(token.access_token, "fresh-access");
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_authorisation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "refresh token expired"
            })))
            .mount(&server)
            .await;

        let provider = IdentityProvider::with_endpoints(
            format!("{}/token", server.uri()),
            format!("{}/device", server.uri()),
        )
        .unwrap();

        let err = provider
            .refresh_token("compute-job-manager", "stale")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorisation(_)));
    }
}
