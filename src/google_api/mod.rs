//! Native Google API client.
//!
//! Direct HTTP via reqwest against the OAuth2 token endpoint and Calendar v3.
//!
//! Modules:
//! - auth: OAuth2 browser consent flow on the fixed loopback redirect
//! - calendar: Google Calendar API v3 (calendar list, events)

pub mod auth;
pub mod calendar;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::settings::{self, ClientCredentials, SettingsStore};

/// Read-only calendar access is all the dashboard needs.
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/calendar.readonly"];

pub const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens within this many seconds of expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

// ============================================================================
// Token types
// ============================================================================

/// OAuth2 token payload persisted in the settings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleToken {
    #[serde(alias = "access_token")]
    pub token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token expiry time (RFC 3339)
    #[serde(default)]
    pub expiry: Option<String>,
    /// Authenticated account (primary calendar id)
    #[serde(default, alias = "email")]
    pub account: Option<String>,
}

fn default_token_uri() -> String {
    TOKEN_URI.to_string()
}

/// Fields returned by the token endpoint for a code exchange or refresh.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

impl TokenGrant {
    /// Build a stored token. `previous` supplies the refresh token when a
    /// refresh response omits it.
    pub fn into_token(self, client_id: &str, previous: Option<&GoogleToken>) -> GoogleToken {
        let expiry = chrono::Utc::now() + chrono::Duration::seconds(self.expires_in as i64);
        GoogleToken {
            token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            token_uri: default_token_uri(),
            client_id: client_id.to_string(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            expiry: Some(expiry.to_rfc3339()),
            account: previous.and_then(|p| p.account.clone()),
        }
    }
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Google credentials not configured")]
    CredentialsNotFound,
    #[error("Not authenticated")]
    TokenNotFound,
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("OAuth flow cancelled")]
    FlowCancelled,
    #[error("OAuth flow timed out waiting for the browser redirect")]
    FlowTimedOut,
    #[error("Settings: {0}")]
    Storage(String),
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

fn retry_decision_for_status(status: reqwest::StatusCode) -> RetryDecision {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, GoogleApiError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(GoogleApiError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if retry_decision_for_status(status) == RetryDecision::Retryable
                    && attempt < attempts
                {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "google_api retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "google_api retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(GoogleApiError::Http(err));
            }
        }
    }

    Err(GoogleApiError::RefreshFailed(
        "request exhausted retries".to_string(),
    ))
}

// ============================================================================
// Token endpoint
// ============================================================================

/// OAuth2 token endpoint: code exchange and refresh.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(
        &self,
        creds: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, GoogleApiError>;

    async fn refresh(
        &self,
        creds: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenGrant, GoogleApiError>;
}

/// Google's production token endpoint.
pub struct GoogleTokenEndpoint {
    client: reqwest::Client,
    token_uri: String,
}

impl GoogleTokenEndpoint {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            token_uri: TOKEN_URI.to_string(),
        }
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenGrant, GoogleApiError> {
        let resp = self.client.post(&self.token_uri).form(form).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_refresh_error(status.as_u16(), &body));
        }
        let grant: TokenGrant = serde_json::from_str(&body).map_err(|_| {
            GoogleApiError::RefreshFailed("No access_token in response".to_string())
        })?;
        Ok(grant)
    }
}

#[async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    async fn exchange_code(
        &self,
        creds: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, GoogleApiError> {
        self.post_form(&[
            ("code", code),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh(
        &self,
        creds: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenGrant, GoogleApiError> {
        self.post_form(&[
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }
}

fn map_refresh_error(status: u16, body: &str) -> GoogleApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return GoogleApiError::AuthExpired;
    }
    GoogleApiError::RefreshFailed(format!("HTTP {}: {}", status, body))
}

// ============================================================================
// Token lifecycle
// ============================================================================

/// Check if a token is expired based on its expiry field.
///
/// A token without an expiry is assumed valid; an unreadable expiry is not.
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => false,
        Some(expiry_str) => match chrono::DateTime::parse_from_rfc3339(expiry_str) {
            Ok(expiry) => expiry <= chrono::Utc::now() + chrono::Duration::seconds(EXPIRY_SKEW_SECS),
            Err(_) => true,
        },
    }
}

/// Get a usable access token from the store.
///
/// Missing client credentials → `CredentialsNotFound`; missing token →
/// `TokenNotFound`. An expired token is refreshed once; if that fails the
/// stored token is discarded and `AuthExpired` is returned.
pub async fn ensure_access_token(
    store: &dyn SettingsStore,
    endpoint: &dyn TokenEndpoint,
) -> Result<String, GoogleApiError> {
    let creds = settings::load_client_credentials(store).ok_or(GoogleApiError::CredentialsNotFound)?;
    let token = settings::load_token(store).ok_or(GoogleApiError::TokenNotFound)?;

    if !is_token_expired(&token) {
        return Ok(token.token);
    }

    let refreshed = match token.refresh_token.as_deref() {
        Some(refresh_token) => endpoint.refresh(&creds, refresh_token).await,
        None => Err(GoogleApiError::AuthExpired),
    };

    match refreshed {
        Ok(grant) => {
            let new_token = grant.into_token(&creds.client_id, Some(&token));
            settings::save_token(store, &new_token)
                .map_err(|e| GoogleApiError::Storage(e.to_string()))?;
            log::info!("Refreshed Google access token");
            Ok(new_token.token)
        }
        Err(err) => {
            log::warn!("Token refresh failed, discarding stored token: {}", err);
            if let Err(e) = settings::delete_token(store) {
                log::warn!("Failed to delete stored token: {}", e);
            }
            Err(GoogleApiError::AuthExpired)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
