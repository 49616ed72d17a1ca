//! Command bridge: action name → handler.
//!
//! The UI sends `{ "action": "...", "args": {...} }` and gets back either
//! `{ "status": "ok", "data": ... }` or `{ "status": "error", "error": ... }`.
//! Handlers are plain functions in one table built at startup.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::categorize::{self, CATEGORIES};
use crate::digest::DigestService;
use crate::error::{CommandError, DashboardError};
use crate::fetch::CalendarService;
use crate::google_api::calendar::{CalendarProvider, GoogleCalendarClient};
use crate::google_api::{self, GoogleTokenEndpoint, TokenEndpoint};
use crate::mail::{self, MailTransport, SmtpMailer};
use crate::scheduler::{self, DigestScheduler};
use crate::settings::{self, EmailSettings, SettingsStore};
use crate::types::{CalendarEvent, CalendarSelection, DateWindow, ManualCalendarEntry};
use crate::views::{self, ViewKind};

/// Everything a handler may touch. Built once and shared by every call.
pub struct AppContext {
    pub store: Arc<dyn SettingsStore>,
    pub tokens: Arc<dyn TokenEndpoint>,
    pub provider: Arc<dyn CalendarProvider>,
    pub mailer: Arc<dyn MailTransport>,
    pub calendars: CalendarService,
    pub digest: Arc<DigestService>,
    pub scheduler: DigestScheduler,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        tokens: Arc<dyn TokenEndpoint>,
        provider: Arc<dyn CalendarProvider>,
        mailer: Arc<dyn MailTransport>,
    ) -> Self {
        let calendars = CalendarService::new(store.clone(), tokens.clone(), provider.clone());
        let digest = Arc::new(DigestService::new(calendars.clone(), mailer.clone()));
        Self {
            store,
            tokens,
            provider,
            mailer,
            calendars,
            scheduler: DigestScheduler::new(digest.clone()),
            digest,
        }
    }

    /// Context backed by Google and SMTP.
    pub fn production(store: Arc<dyn SettingsStore>) -> Result<Self, DashboardError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DashboardError::Fetch(e.to_string()))?;
        Ok(Self::new(
            store,
            Arc::new(GoogleTokenEndpoint::new(client.clone())),
            Arc::new(GoogleCalendarClient::new(client)),
            Arc::new(SmtpMailer::new()),
        ))
    }

    /// Arm digest triggers from the stored reminder config.
    pub fn arm_from_store(&self) -> Result<(), DashboardError> {
        let config = settings::load_reminder_config(self.store.as_ref());
        self.scheduler.arm(&config).map(|_| ())
    }
}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, DashboardError>> + Send + 'a>>;
pub type Handler = for<'a> fn(&'a AppContext, Value) -> HandlerFuture<'a>;

/// One request from the UI.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub action: String,
    #[serde(default)]
    pub args: Value,
}

/// Result of one request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandResponse {
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        data: Value,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        error: CommandError,
    },
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandResponse::Ok { .. })
    }
}

/// Action name → handler.
pub struct CommandTable {
    handlers: HashMap<&'static str, Handler>,
}

impl CommandTable {
    pub fn new() -> Self {
        let entries: [(&'static str, Handler); 20] = [
            ("check-credentials", check_credentials),
            ("save-google-credentials", save_google_credentials),
            ("check-auth", check_auth),
            ("start-google-auth", start_google_auth),
            ("disconnect-google", disconnect_google),
            ("fetch-events", fetch_events),
            ("get-calendar-list", get_calendar_list),
            ("get-selected-calendars", get_selected_calendars),
            ("save-selected-calendars", save_selected_calendars),
            ("get-manual-calendars", get_manual_calendars),
            ("save-manual-calendars", save_manual_calendars),
            ("add-manual-calendar", add_manual_calendar),
            ("remove-manual-calendar", remove_manual_calendar),
            ("get-email-settings", get_email_settings),
            ("save-email-settings", save_email_settings),
            ("test-email", test_email),
            ("get-categories", get_categories),
            ("categorize", categorize_title),
            ("get-view", get_view),
            ("event-details", event_details),
        ];
        Self {
            handlers: entries.into_iter().collect(),
        }
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub async fn call(&self, ctx: &AppContext, action: &str, args: Value) -> Result<Value, DashboardError> {
        let handler = self
            .handlers
            .get(action)
            .ok_or_else(|| DashboardError::UnknownCommand(action.to_string()))?;
        handler(ctx, args).await
    }

    pub async fn dispatch(&self, ctx: &AppContext, request: CommandRequest) -> CommandResponse {
        let CommandRequest { id, action, args } = request;
        match self.call(ctx, &action, args).await {
            Ok(data) => CommandResponse::Ok { id, data },
            Err(err) => {
                log::warn!("Command {} failed: {}", action, err);
                CommandResponse::Error {
                    id,
                    error: CommandError::from(&err),
                }
            }
        }
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, DashboardError> {
    Ok(serde_json::from_value(args)?)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, DashboardError> {
    serde_json::to_value(value).map_err(|e| DashboardError::Storage(e.to_string()))
}

fn success() -> Value {
    json!({ "success": true })
}

// =============================================================================
// Google account
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsArgs {
    client_id: String,
    client_secret: String,
}

fn check_credentials(ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let configured = settings::load_client_credentials(ctx.store.as_ref()).is_some();
        Ok(json!({ "configured": configured }))
    })
}

fn save_google_credentials(ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let args: CredentialsArgs = parse_args(args)?;
        if args.client_id.trim().is_empty() || args.client_secret.trim().is_empty() {
            return Err(DashboardError::InvalidRequest(
                "Please enter both Client ID and Client Secret".to_string(),
            ));
        }
        settings::save_client_credentials(ctx.store.as_ref(), &args.client_id, &args.client_secret)?;
        Ok(success())
    })
}

fn check_auth(ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move { to_value(&ctx.calendars.auth_status().await) })
}

fn start_google_auth(ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let email = google_api::auth::run_consent_flow(
            ctx.store.as_ref(),
            ctx.tokens.as_ref(),
            ctx.provider.as_ref(),
        )
        .await?;
        Ok(json!({ "success": true, "email": email }))
    })
}

fn disconnect_google(ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        settings::delete_token(ctx.store.as_ref())?;
        log::info!("Google account disconnected");
        Ok(success())
    })
}

// =============================================================================
// Calendars and events
// =============================================================================

fn fetch_events(ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let window: DateWindow = parse_args(args)?;
        if window.end < window.start {
            return Err(DashboardError::InvalidRequest(
                "end must not be before start".to_string(),
            ));
        }
        let events = ctx.calendars.fetch_events(&window).await?;
        to_value(&events)
    })
}

fn get_calendar_list(ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move { to_value(&ctx.calendars.calendar_list().await?) })
}

fn selection_json(selection: &CalendarSelection) -> Value {
    let mode = match selection {
        CalendarSelection::Unset => "unset",
        CalendarSelection::All => "all",
        CalendarSelection::Subset(_) => "subset",
    };
    json!({ "mode": mode, "calendarIds": selection.ids() })
}

/// Accepts a bare id array (subset), `"all"` / `"unset"`, or
/// `{ "mode": ..., "calendarIds": [...] }`.
fn selection_from_args(args: &Value) -> Result<CalendarSelection, DashboardError> {
    let ids = |items: &Vec<Value>| -> Result<CalendarSelection, DashboardError> {
        items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    DashboardError::InvalidRequest("calendar ids must be strings".to_string())
                })
            })
            .collect::<Result<_, _>>()
            .map(CalendarSelection::Subset)
    };

    match args {
        Value::Array(items) => ids(items),
        Value::String(mode) if mode == "all" => Ok(CalendarSelection::All),
        Value::String(mode) if mode == "unset" => Ok(CalendarSelection::Unset),
        Value::Object(map) => match map.get("mode").and_then(Value::as_str) {
            Some("all") => Ok(CalendarSelection::All),
            Some("unset") => Ok(CalendarSelection::Unset),
            Some("subset") | None => match map.get("calendarIds") {
                Some(Value::Array(items)) => ids(items),
                None => Ok(CalendarSelection::Subset(Default::default())),
                Some(_) => Err(DashboardError::InvalidRequest(
                    "calendarIds must be an array".to_string(),
                )),
            },
            Some(other) => Err(DashboardError::InvalidRequest(format!(
                "unknown selection mode '{}'",
                other
            ))),
        },
        _ => Err(DashboardError::InvalidRequest(
            "expected a calendar selection".to_string(),
        )),
    }
}

fn get_selected_calendars(ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move { Ok(selection_json(&settings::load_selection(ctx.store.as_ref()))) })
}

fn save_selected_calendars(ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let selection = selection_from_args(&args)?;
        settings::save_selection(ctx.store.as_ref(), &selection)?;
        Ok(selection_json(&selection))
    })
}

#[derive(Deserialize)]
struct ManualCalendarArgs {
    id: String,
    #[serde(default)]
    name: String,
}

fn get_manual_calendars(ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move { to_value(&settings::load_manual_calendars(ctx.store.as_ref())) })
}

fn save_manual_calendars(ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let calendars: Vec<ManualCalendarEntry> = match args {
            Value::Object(mut map) => parse_args(map.remove("calendars").unwrap_or(Value::Null))?,
            other => parse_args(other)?,
        };
        to_value(&settings::save_manual_calendars(ctx.store.as_ref(), &calendars)?)
    })
}

fn add_manual_calendar(ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let args: ManualCalendarArgs = parse_args(args)?;
        to_value(&settings::add_manual_calendar(ctx.store.as_ref(), &args.id, &args.name)?)
    })
}

fn remove_manual_calendar(ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let args: ManualCalendarArgs = parse_args(args)?;
        to_value(&settings::remove_manual_calendar(ctx.store.as_ref(), &args.id)?)
    })
}

// =============================================================================
// Email
// =============================================================================

fn get_email_settings(ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move { to_value(&settings::load_email_settings(ctx.store.as_ref())) })
}

fn save_email_settings(ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let email: EmailSettings = parse_args(args)?;
        scheduler::validate_reminders(&email.reminders)?;
        settings::save_email_settings(ctx.store.as_ref(), &email)?;
        let armed = ctx.scheduler.arm(&email.reminders)?;
        Ok(json!({ "success": true, "armed": armed }))
    })
}

fn test_email(ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let mail_settings = settings::load_mail_settings(ctx.store.as_ref());
        mail::send_test_email(ctx.mailer.as_ref(), &mail_settings).await?;
        Ok(success())
    })
}

// =============================================================================
// Categories and views
// =============================================================================

#[derive(Deserialize)]
struct CategorizeArgs {
    #[serde(default)]
    title: Option<String>,
}

fn get_categories(_ctx: &AppContext, _args: Value) -> HandlerFuture<'_> {
    Box::pin(async move { to_value(&CATEGORIES) })
}

fn categorize_title(_ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let args: CategorizeArgs = match args {
            Value::Null => CategorizeArgs { title: None },
            Value::String(title) => CategorizeArgs { title: Some(title) },
            other => parse_args(other)?,
        };
        let category = categorize::categorize(args.title.as_deref().unwrap_or(""));
        Ok(json!({
            "category": category,
            "color": category.color(),
            "emoji": category.emoji(),
        }))
    })
}

#[derive(Deserialize)]
struct ViewArgs {
    view: String,
    #[serde(default)]
    anchor: Option<DateTime<chrono::FixedOffset>>,
}

fn get_view(ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let args: ViewArgs = parse_args(args)?;
        let kind = ViewKind::parse(&args.view)
            .ok_or_else(|| DashboardError::InvalidRequest(format!("unknown view '{}'", args.view)))?;
        let anchor = args
            .anchor
            .map(|a| a.with_timezone(&Local))
            .unwrap_or_else(Local::now);
        let window = views::view_window(kind, &anchor).ok_or_else(|| {
            DashboardError::InvalidRequest(format!("no {} window around {}", args.view, anchor))
        })?;

        let events = ctx.calendars.fetch_events(&window).await?;
        let body = match kind {
            ViewKind::Agenda => json!({
                "view": kind,
                "window": window,
                "months": views::agenda(events, &Local),
            }),
            ViewKind::Week | ViewKind::Month => json!({
                "view": kind,
                "window": window,
                "events": views::categorized(events, &Local),
            }),
        };
        Ok(body)
    })
}

fn event_details(_ctx: &AppContext, args: Value) -> HandlerFuture<'_> {
    Box::pin(async move {
        let event: CalendarEvent = parse_args(args)?;
        let details = views::event_details(&event, &Local);
        Ok(json!({ "details": details, "text": details.to_text() }))
    })
}
