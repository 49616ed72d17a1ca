//! dayglance: personal calendar dashboard backend.
//!
//! Google Calendar events, categorized by title keywords, prepared for
//! week / month / agenda views, plus a twice-daily email digest. The UI talks
//! to this crate through the command table in [`commands`].

pub mod categorize;
pub mod commands;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod google_api;
pub mod mail;
pub mod scheduler;
pub mod settings;
pub mod types;
pub mod util;
pub mod views;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub use commands::{AppContext, CommandRequest, CommandResponse, CommandTable};
pub use error::DashboardError;

/// Decode one request line and run it.
pub async fn handle_line(table: &CommandTable, ctx: &AppContext, line: &str) -> CommandResponse {
    match serde_json::from_str::<CommandRequest>(line) {
        Ok(request) => table.dispatch(ctx, request).await,
        Err(e) => {
            let err = DashboardError::InvalidRequest(e.to_string());
            log::warn!("Rejected request line: {}", err);
            CommandResponse::Error {
                id: None,
                error: (&err).into(),
            }
        }
    }
}

/// Serve newline-delimited JSON requests on stdin, one response line each on
/// stdout, with the digest triggers armed from stored settings.
///
/// Requests run one at a time. When stdin closes, the process keeps running
/// for the armed triggers until Ctrl-C; with nothing armed it returns.
pub async fn serve(ctx: Arc<AppContext>) -> Result<(), DashboardError> {
    if let Err(e) = ctx.arm_from_store() {
        log::error!("Digest triggers not armed: {}", e);
    }

    let table = CommandTable::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    log::info!("dayglance ready ({} commands)", table.actions().len());

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
                ctx.scheduler.disarm();
                return Ok(());
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&table, &ctx, &line).await;
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout
            .write_all(out.as_bytes())
            .await
            .map_err(|e| DashboardError::Storage(format!("stdout: {}", e)))?;
        stdout
            .flush()
            .await
            .map_err(|e| DashboardError::Storage(format!("stdout: {}", e)))?;
    }

    if ctx.scheduler.armed().is_empty() {
        return Ok(());
    }

    log::info!("stdin closed, keeping digest triggers armed until Ctrl-C");
    let _ = tokio::signal::ctrl_c().await;
    ctx.scheduler.disarm();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_api::tests::FakeTokenEndpoint;
    use crate::fetch::tests::FakeProvider;
    use crate::mail::tests::RecordingMailer;
    use crate::settings::MemoryStore;

    fn context() -> AppContext {
        AppContext::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeTokenEndpoint::new(true)),
            Arc::new(FakeProvider::with_calendars(&["a"])),
            Arc::new(RecordingMailer::default()),
        )
    }

    #[tokio::test]
    async fn test_handle_line_round_trip() {
        let ctx = context();
        let table = CommandTable::new();
        let resp = handle_line(
            &table,
            &ctx,
            r#"{"id": "req-1", "action": "categorize", "args": {"title": "Beach getaway"}}"#,
        )
        .await;
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["id"], "req-1");
        assert_eq!(json["data"]["category"], "holiday");
    }

    #[tokio::test]
    async fn test_handle_line_rejects_garbage() {
        let ctx = context();
        let table = CommandTable::new();
        let resp = handle_line(&table, &ctx, "{not json").await;
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["errorType"], "nonRetryable");
        assert!(json.get("id").is_none());
    }
}
