//! OAuth2 browser consent flow for Google Calendar.
//!
//! Opens the user's browser for consent, captures the redirect on the fixed
//! loopback listener, exchanges the auth code for tokens and stores them.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::calendar::CalendarProvider;
use super::{GoogleApiError, TokenEndpoint, AUTH_URI, SCOPES};
use crate::settings::{self, ClientCredentials, SettingsStore};

pub const REDIRECT_ADDR: &str = "127.0.0.1:8085";
pub const REDIRECT_PATH: &str = "/oauth2callback";
pub const REDIRECT_URI: &str = "http://127.0.0.1:8085/oauth2callback";

/// How long to wait for the browser redirect before giving up.
pub const CONSENT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// What the browser sent back to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Code(String),
    Denied(String),
    /// A request to some other path (favicon and the like).
    Unrelated,
}

/// Build the consent URL for the stored client.
pub fn authorization_url(creds: &ClientCredentials, redirect_uri: &str) -> String {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", &creds.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &SCOPES.join(" "))
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .finish();
    format!("{}?{}", AUTH_URI, query)
}

/// Parse the request line of the redirect, e.g.
/// `GET /oauth2callback?code=4%2F0Ab&scope=... HTTP/1.1`.
pub fn parse_callback(request: &str) -> Callback {
    let Some(target) = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
    else {
        return Callback::Unrelated;
    };

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != REDIRECT_PATH {
        return Callback::Unrelated;
    }

    let mut code = None;
    let mut error = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (Some(code), None) => Callback::Code(code),
        (_, Some(error)) => Callback::Denied(error),
        (None, None) => Callback::Denied("no authorization code".to_string()),
    }
}

/// Send an HTTP response to the browser.
async fn send_response(stream: &mut TcpStream, status: &str, message: &str) {
    let body = format!(
        "<html><body style=\"font-family: system-ui; text-align: center; padding: 40px;\">\
         <h2>{}</h2></body></html>",
        crate::util::html_escape(message)
    );
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

/// Accept connections until the redirect arrives, answering each one.
pub async fn wait_for_auth_code(listener: &TcpListener) -> Result<String, GoogleApiError> {
    loop {
        let (mut stream, _) = listener.accept().await?;

        let mut buffer = [0u8; 4096];
        let n = stream.read(&mut buffer).await?;
        let request = String::from_utf8_lossy(&buffer[..n]);

        match parse_callback(&request) {
            Callback::Code(code) => {
                send_response(
                    &mut stream,
                    "200 OK",
                    "Authorization successful! You can close this tab and return to dayglance.",
                )
                .await;
                return Ok(code);
            }
            Callback::Denied(reason) => {
                log::warn!("Google consent not granted: {}", reason);
                send_response(
                    &mut stream,
                    "200 OK",
                    "Authorization denied. You can close this tab.",
                )
                .await;
                return Err(GoogleApiError::FlowCancelled);
            }
            Callback::Unrelated => {
                send_response(&mut stream, "404 Not Found", "Not found").await;
            }
        }
    }
}

/// Exchange `code` and persist the resulting token.
pub async fn complete_consent(
    store: &dyn SettingsStore,
    endpoint: &dyn TokenEndpoint,
    creds: &ClientCredentials,
    code: &str,
    account: Option<String>,
) -> Result<super::GoogleToken, GoogleApiError> {
    let grant = endpoint.exchange_code(creds, code, REDIRECT_URI).await?;
    let mut token = grant.into_token(&creds.client_id, None);
    token.account = account;
    settings::save_token(store, &token).map_err(|e| GoogleApiError::Storage(e.to_string()))?;
    Ok(token)
}

/// Run the full consent flow and return the authenticated account.
///
/// 1. Load client credentials from the store
/// 2. Bind the loopback listener
/// 3. Open browser with the consent URL
/// 4. Wait (bounded) for the redirect with the auth code
/// 5. Exchange the code and save the token
/// 6. Record the primary calendar id as the account
pub async fn run_consent_flow(
    store: &dyn SettingsStore,
    endpoint: &dyn TokenEndpoint,
    calendar: &dyn CalendarProvider,
) -> Result<String, GoogleApiError> {
    let creds =
        settings::load_client_credentials(store).ok_or(GoogleApiError::CredentialsNotFound)?;

    let listener = TcpListener::bind(REDIRECT_ADDR).await?;
    let auth_url = authorization_url(&creds, REDIRECT_URI);

    log::info!("Opening browser for Google OAuth consent...");
    if let Err(e) = open::that(&auth_url) {
        log::warn!("Failed to open browser: {}. URL: {}", e, auth_url);
    }

    let code = tokio::time::timeout(CONSENT_TIMEOUT, wait_for_auth_code(&listener))
        .await
        .map_err(|_| GoogleApiError::FlowTimedOut)??;
    drop(listener);

    let mut token = complete_consent(store, endpoint, &creds, &code, None).await?;
    let account = match calendar.primary_calendar_id(&token.token).await {
        Ok(Some(id)) => id,
        Ok(None) => "authenticated".to_string(),
        Err(e) => {
            log::warn!("Could not look up primary calendar: {}", e);
            "authenticated".to_string()
        }
    };

    token.account = Some(account.clone());
    settings::save_token(store, &token).map_err(|e| GoogleApiError::Storage(e.to_string()))?;

    log::info!("Google account connected: {}", account);
    Ok(account)
}
