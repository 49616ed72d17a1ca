//! Google Calendar API v3: calendar list and event fetching.

use async_trait::async_trait;
use serde::Deserialize;

use super::{send_with_retry, GoogleApiError, RetryPolicy};
use crate::types::{default_calendar_color, CalendarEvent, CalendarInfo, DateWindow, EventTime, NO_TITLE};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

// ============================================================================
// API response types (deserialized from Google Calendar JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    summary_override: Option<String>,
    #[serde(default)]
    background_color: Option<String>,
    #[serde(default)]
    primary: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsResponse {
    #[serde(default)]
    items: Vec<GoogleEventRaw>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

// ============================================================================
// Provider seam
// ============================================================================

/// Calendar provider queried by the fetch layer and the digest.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn list_calendars(&self, access_token: &str) -> Result<Vec<CalendarInfo>, GoogleApiError>;

    /// Events of one calendar inside `window`, recurring events expanded,
    /// ordered by start time. `calendar_name` is copied onto each event.
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        calendar_name: &str,
        window: &DateWindow,
    ) -> Result<Vec<CalendarEvent>, GoogleApiError>;

    /// Id of the primary calendar, which is the account's email address.
    async fn primary_calendar_id(&self, _access_token: &str) -> Result<Option<String>, GoogleApiError> {
        Ok(None)
    }
}

/// Google Calendar v3 over reqwest.
pub struct GoogleCalendarClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GoogleCalendarClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GoogleApiError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(GoogleApiError::AuthExpired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GoogleApiError::ApiError {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(resp)
}

#[async_trait]
impl CalendarProvider for GoogleCalendarClient {
    async fn primary_calendar_id(&self, access_token: &str) -> Result<Option<String>, GoogleApiError> {
        let resp = send_with_retry(
            self.client
                .get(format!("{}/calendars/primary", self.base_url))
                .bearer_auth(access_token),
            &self.retry,
        )
        .await?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let body: serde_json::Value = resp.json().await?;
        Ok(body["id"].as_str().map(str::to_string))
    }

    async fn list_calendars(&self, access_token: &str) -> Result<Vec<CalendarInfo>, GoogleApiError> {
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/users/me/calendarList", self.base_url))
                .bearer_auth(access_token);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let resp = check_status(send_with_retry(request, &self.retry).await?).await?;
            let body: CalendarListResponse = resp.json().await?;
            calendars.extend(body.items.into_iter().map(calendar_info));

            page_token = body.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(calendars)
    }

    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        calendar_name: &str,
        window: &DateWindow,
    ) -> Result<Vec<CalendarEvent>, GoogleApiError> {
        let (time_min, time_max) = window.to_query_bounds();
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            url::form_urlencoded::byte_serialize(calendar_id.as_bytes()).collect::<String>()
        );

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).bearer_auth(access_token).query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                ("maxResults", "250"),
            ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let resp = check_status(send_with_retry(request, &self.retry).await?).await?;
            let body: EventsResponse = resp.json().await?;
            events.extend(
                body.items
                    .into_iter()
                    .filter_map(|raw| normalize_event(raw, calendar_id, calendar_name)),
            );

            page_token = body.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(events)
    }
}

fn calendar_info(entry: CalendarListEntry) -> CalendarInfo {
    let name = entry
        .summary_override
        .or(entry.summary)
        .unwrap_or_else(|| entry.id.clone());
    CalendarInfo {
        id: entry.id,
        name,
        color: entry.background_color.unwrap_or_else(default_calendar_color),
        primary: entry.primary.unwrap_or(false),
    }
}

/// Convert a raw event. Cancelled events and events without a start are dropped.
fn normalize_event(
    raw: GoogleEventRaw,
    calendar_id: &str,
    calendar_name: &str,
) -> Option<CalendarEvent> {
    if raw.status.as_deref() == Some("cancelled") {
        return None;
    }

    let start_raw = raw.start?;
    let start = EventTime::from_parts(start_raw.date_time.as_deref(), start_raw.date.as_deref())?;
    let end = raw
        .end
        .and_then(|e| EventTime::from_parts(e.date_time.as_deref(), e.date.as_deref()))
        .unwrap_or(start);
    let all_day = start_raw.date_time.is_none();

    let title = raw
        .summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| NO_TITLE.to_string());

    Some(CalendarEvent {
        id: raw.id,
        calendar_id: calendar_id.to_string(),
        calendar_name: calendar_name.to_string(),
        title,
        description: raw.description.filter(|s| !s.is_empty()),
        start,
        end,
        all_day,
        location: raw.location.filter(|s| !s.is_empty()),
    })
}
