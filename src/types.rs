use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

// =============================================================================
// Events
// =============================================================================

/// Title used for events the provider returns without a summary.
pub const NO_TITLE: &str = "No Title";

/// Start or end of an event: a plain date for all-day events, otherwise a
/// date-time with the offset the provider reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
}

impl EventTime {
    /// Parse the provider's `dateTime` / `date` pair. `dateTime` wins when both are set.
    pub fn from_parts(date_time: Option<&str>, date: Option<&str>) -> Option<EventTime> {
        if let Some(dt) = date_time {
            return DateTime::parse_from_rfc3339(dt).ok().map(EventTime::DateTime);
        }
        date.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .map(EventTime::Date)
    }

    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// The moment this time denotes in `tz`. Dates resolve to local midnight.
    pub fn in_zone<Tz: TimeZone>(&self, tz: &Tz) -> Option<DateTime<Tz>> {
        match self {
            EventTime::DateTime(dt) => Some(dt.with_timezone(tz)),
            EventTime::Date(d) => tz
                .from_local_datetime(&d.and_hms_opt(0, 0, 0)?)
                .earliest(),
        }
    }

    /// Calendar day of this time as seen from `tz`.
    pub fn local_date<Tz: TimeZone>(&self, tz: &Tz) -> NaiveDate {
        match self {
            EventTime::Date(d) => *d,
            EventTime::DateTime(dt) => dt.with_timezone(tz).date_naive(),
        }
    }
}

/// A calendar event as fetched from the provider. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub calendar_id: String,
    pub calendar_name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub all_day: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A calendar as reported by the provider's calendar list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarInfo {
    pub id: String,
    pub name: String,
    #[serde(default = "default_calendar_color")]
    pub color: String,
    #[serde(default)]
    pub primary: bool,
}

pub fn default_calendar_color() -> String {
    "#007AFF".to_string()
}

// =============================================================================
// Date windows
// =============================================================================

/// Inclusive-start, inclusive-end time window used for event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl DateWindow {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self { start, end }
    }

    /// RFC 3339 bounds as the provider expects them (`timeMin`, `timeMax`).
    pub fn to_query_bounds(&self) -> (String, String) {
        (self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

// =============================================================================
// Calendar selection
// =============================================================================

/// Which provider calendars the user has opted into.
///
/// `Unset` (the user never touched the selection) and `All` both include
/// every provider calendar. `Subset` with no ids includes none; manual
/// calendars are added on top in every case.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CalendarSelection {
    #[default]
    Unset,
    All,
    Subset(BTreeSet<String>),
}

impl CalendarSelection {
    pub fn includes(&self, calendar_id: &str) -> bool {
        match self {
            CalendarSelection::Unset | CalendarSelection::All => true,
            CalendarSelection::Subset(ids) => ids.contains(calendar_id),
        }
    }

    /// Decode the persisted form. A bare array is the legacy encoding, where
    /// an empty array meant "never chosen".
    pub fn from_stored(value: &serde_json::Value) -> CalendarSelection {
        match value {
            serde_json::Value::Array(items) if items.is_empty() => CalendarSelection::Unset,
            serde_json::Value::Array(items) => CalendarSelection::Subset(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            serde_json::Value::String(s) if s == "all" => CalendarSelection::All,
            serde_json::Value::Object(map) => match map.get("subset") {
                Some(serde_json::Value::Array(items)) => CalendarSelection::Subset(
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                ),
                _ => CalendarSelection::Unset,
            },
            _ => CalendarSelection::Unset,
        }
    }

    pub fn to_stored(&self) -> serde_json::Value {
        match self {
            CalendarSelection::Unset => serde_json::Value::Array(Vec::new()),
            CalendarSelection::All => serde_json::Value::String("all".to_string()),
            CalendarSelection::Subset(ids) if ids.is_empty() => {
                serde_json::json!({ "subset": [] })
            }
            CalendarSelection::Subset(ids) => serde_json::json!(ids),
        }
    }

    /// Selected ids as a list for the UI; empty for `Unset` / `All`.
    pub fn ids(&self) -> Vec<String> {
        match self {
            CalendarSelection::Subset(ids) => ids.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// A calendar added by id rather than discovered through the calendar list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualCalendarEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl ManualCalendarEntry {
    pub fn new(id: &str, name: &str) -> Self {
        let id = id.trim().to_string();
        let name = match name.trim() {
            "" => id.clone(),
            n => n.to_string(),
        };
        Self { id, name }
    }

    /// Name shown in the UI and in event metadata.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Google authentication status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum GoogleAuthStatus {
    #[default]
    NotConfigured,
    Authenticated {
        email: String,
    },
    TokenExpired,
}
