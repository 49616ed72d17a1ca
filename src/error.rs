//! Error types for dashboard operations
//!
//! Errors are classified by recoverability:
//! - Retryable: transient calendar fetch failures
//! - NonRetryable: malformed settings, unknown commands, storage failures
//! - RequiresUserAction: missing client credentials, expired sign-in, mail setup

use thiserror::Error;

use crate::google_api::GoogleApiError;

/// Error types surfaced by the dashboard backend
#[derive(Debug, Error)]
pub enum DashboardError {
    // Requires user action
    #[error("Google credentials not configured")]
    ConfigurationMissing,

    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("Failed to send email: {0}")]
    MailSend(String),

    // Retryable
    #[error("Calendar fetch failed: {0}")]
    Fetch(String),

    // Non-retryable
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Settings storage error: {0}")]
    Storage(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DashboardError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, DashboardError::Fetch(_))
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            DashboardError::ConfigurationMissing
                | DashboardError::AuthenticationRequired(_)
                | DashboardError::MailSend(_)
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            DashboardError::ConfigurationMissing => {
                "Enter your Google OAuth client ID and secret in Settings."
            }
            DashboardError::AuthenticationRequired(_) => "Connect your Google account again.",
            DashboardError::MailSend(_) => "Check the SMTP host, port, user and password.",
            DashboardError::Fetch(_) => "Check your internet connection and try again.",
            DashboardError::InvalidSettings(_) => "Correct the highlighted setting and save again.",
            DashboardError::Storage(_) => "Check permissions on the settings directory.",
            DashboardError::UnknownCommand(_) | DashboardError::InvalidRequest(_) => {
                "This is a bug in the calling interface."
            }
        }
    }
}

impl From<GoogleApiError> for DashboardError {
    fn from(err: GoogleApiError) -> Self {
        match err {
            GoogleApiError::AuthExpired | GoogleApiError::TokenNotFound => {
                DashboardError::AuthenticationRequired(err.to_string())
            }
            GoogleApiError::CredentialsNotFound => DashboardError::ConfigurationMissing,
            GoogleApiError::FlowCancelled | GoogleApiError::FlowTimedOut => {
                DashboardError::AuthenticationRequired(err.to_string())
            }
            GoogleApiError::Storage(msg) => DashboardError::Storage(msg),
            other => DashboardError::Fetch(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(err: serde_json::Error) -> Self {
        DashboardError::InvalidRequest(err.to_string())
    }
}

/// Serializable error representation for the command bridge
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&DashboardError> for CommandError {
    fn from(err: &DashboardError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        CommandError {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
