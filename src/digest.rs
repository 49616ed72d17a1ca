//! Daily digest: fetch one day, categorize, render, send.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::categorize::{self, Category};
use crate::error::DashboardError;
use crate::fetch::CalendarService;
use crate::mail::{MailTransport, OutboundEmail};
use crate::settings;
use crate::types::{CalendarEvent, CalendarSelection, DateWindow};
use crate::util::html_escape;

pub const ALL_DAY: &str = "All day";

/// Which of the two daily digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestKind {
    /// Today's schedule.
    Morning,
    /// Tomorrow's appointments.
    Evening,
}

impl DigestKind {
    pub fn label(&self) -> &'static str {
        match self {
            DigestKind::Morning => "morning",
            DigestKind::Evening => "evening",
        }
    }

    /// `"today"` or `"tomorrow"`, as used in the email body.
    pub fn day_label(&self) -> &'static str {
        match self {
            DigestKind::Morning => "today",
            DigestKind::Evening => "tomorrow",
        }
    }

    /// The calendar day this digest covers, seen from `now`'s zone.
    pub fn target_date<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> NaiveDate {
        let today = now.date_naive();
        match self {
            DigestKind::Morning => today,
            DigestKind::Evening => today.succ_opt().unwrap_or(today),
        }
    }

    /// `[00:00, 23:59:59.999]` of the target day in `now`'s zone.
    ///
    /// `None` only when local midnight does not exist and no later instant of
    /// that hour does either.
    pub fn window<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateWindow> {
        let tz = now.timezone();
        let date = self.target_date(now);
        let start = tz.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).earliest()?;
        let end = tz
            .from_local_datetime(&date.and_hms_milli_opt(23, 59, 59, 999)?)
            .latest()?;
        Some(DateWindow::new(start.fixed_offset(), end.fixed_offset()))
    }

    /// e.g. `Today's Schedule - Monday, June 10`.
    pub fn subject(&self, date: NaiveDate) -> String {
        let day = date.format("%A, %B %-d");
        match self {
            DigestKind::Morning => format!("Today's Schedule - {}", day),
            DigestKind::Evening => format!("Tomorrow's Appointments - {}", day),
        }
    }
}

/// Start time as `h:mm AM`, or `All day`.
pub fn format_time<Tz: TimeZone>(event: &CalendarEvent, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    if event.all_day {
        return ALL_DAY.to_string();
    }
    match event.start.in_zone(tz) {
        Some(start) => start.format("%-I:%M %p").to_string(),
        None => ALL_DAY.to_string(),
    }
}

/// One rendered line of the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestItem {
    pub category: Category,
    pub title: String,
    pub time: String,
    pub location: Option<String>,
}

impl DigestItem {
    pub fn from_event<Tz: TimeZone>(event: &CalendarEvent, tz: &Tz) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            category: categorize::categorize(&event.title),
            title: event.title.clone(),
            time: format_time(event, tz),
            location: event.location.clone(),
        }
    }
}

/// Sort by start and build digest items.
pub fn digest_items<Tz: TimeZone>(events: &[CalendarEvent], tz: &Tz) -> Vec<DigestItem>
where
    Tz::Offset: std::fmt::Display,
{
    let mut sorted: Vec<&CalendarEvent> = events.iter().collect();
    sorted.sort_by_key(|e| e.start.in_zone(tz).map(|dt| dt.timestamp()).unwrap_or(i64::MIN));
    sorted.iter().map(|e| DigestItem::from_event(e, tz)).collect()
}

fn appointment_count(n: usize) -> String {
    if n == 1 {
        "1 appointment".to_string()
    } else {
        format!("{} appointments", n)
    }
}

pub fn render_digest_html(items: &[DigestItem], kind: DigestKind) -> String {
    let heading = match kind {
        DigestKind::Morning => "Today's",
        DigestKind::Evening => "Tomorrow's",
    };

    let mut rows = String::new();
    for item in items {
        let info = item.category.info();
        let location = item
            .location
            .as_deref()
            .map(|l| format!(" &bull; {}", html_escape(l)))
            .unwrap_or_default();
        rows.push_str(&format!(
            r#"
    <div style="padding: 12px; margin: 8px 0; background: #f8f8f8; border-left: 4px solid {color}; border-radius: 4px;">
      <div style="font-weight: 600; color: #333;">{emoji} {title}</div>
      <div style="color: #666; font-size: 14px; margin-top: 4px;">{time}{location}</div>
    </div>"#,
            color = info.color,
            emoji = info.emoji,
            title = html_escape(&item.title),
            time = html_escape(&item.time),
            location = location,
        ));
    }

    format!(
        r#"<div style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
  <h2 style="color: #333; border-bottom: 2px solid #007AFF; padding-bottom: 10px;">Your {heading} Schedule</h2>
  <p style="color: #666;">You have {count} {day}:</p>{rows}
  <p style="color: #999; font-size: 12px; margin-top: 20px; text-align: center;">Sent by dayglance</p>
</div>
"#,
        heading = heading,
        count = appointment_count(items.len()),
        day = kind.day_label(),
        rows = rows,
    )
}

pub fn render_digest_text(items: &[DigestItem], kind: DigestKind) -> String {
    let mut out = format!(
        "You have {} {}:\n\n",
        appointment_count(items.len()),
        kind.day_label()
    );
    for item in items {
        out.push_str(&format!("{} {} - {}", item.category.emoji(), item.time, item.title));
        if let Some(location) = &item.location {
            out.push_str(&format!(" ({})", location));
        }
        out.push('\n');
    }
    out.push_str("\nSent by dayglance\n");
    out
}

/// A composed digest and the number of events it lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub email: OutboundEmail,
    pub events: usize,
}

/// What a digest run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestOutcome {
    NotAuthenticated,
    MailIncomplete,
    NoEvents,
    Sent { events: usize },
    SendFailed,
}

/// Runs digests against the calendar service and mail transport.
pub struct DigestService {
    calendars: CalendarService,
    mailer: Arc<dyn MailTransport>,
}

impl DigestService {
    pub fn new(calendars: CalendarService, mailer: Arc<dyn MailTransport>) -> Self {
        Self { calendars, mailer }
    }

    /// Build the email for `kind` as of `now`, or the reason there is none.
    pub async fn compose<Tz>(
        &self,
        kind: DigestKind,
        now: &DateTime<Tz>,
    ) -> Result<Option<Digest>, DashboardError>
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: std::fmt::Display + Send + Sync,
    {
        let Some(window) = kind.window(now) else {
            log::warn!("No {} digest window for {}", kind.label(), now.date_naive());
            return Ok(None);
        };

        // Every accessible calendar, independent of the dashboard's selection.
        let events = self
            .calendars
            .fetch_events_for(&CalendarSelection::All, &window)
            .await?;
        if events.is_empty() {
            return Ok(None);
        }

        let tz = now.timezone();
        let items = digest_items(&events, &tz);
        Ok(Some(Digest {
            email: OutboundEmail {
                subject: kind.subject(kind.target_date(now)),
                html: render_digest_html(&items, kind),
                text: render_digest_text(&items, kind),
            },
            events: items.len(),
        }))
    }

    /// One scheduled firing. Never returns an error: every failure is logged.
    pub async fn run<Tz>(&self, kind: DigestKind, now: DateTime<Tz>) -> DigestOutcome
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: std::fmt::Display + Send + Sync,
    {
        let store = self.calendars.store().clone();
        let mail = settings::load_mail_settings(store.as_ref());
        if !mail.is_complete() {
            log::debug!("Skipping {} digest: email settings incomplete", kind.label());
            return DigestOutcome::MailIncomplete;
        }
        if settings::load_token(store.as_ref()).is_none() {
            log::debug!("Skipping {} digest: not authenticated", kind.label());
            return DigestOutcome::NotAuthenticated;
        }

        let digest = match self.compose(kind, &now).await {
            Ok(Some(digest)) => digest,
            Ok(None) => {
                log::info!("No events for the {} digest, nothing sent", kind.label());
                return DigestOutcome::NoEvents;
            }
            Err(DashboardError::AuthenticationRequired(_)) | Err(DashboardError::ConfigurationMissing) => {
                log::warn!("Skipping {} digest: Google sign-in required", kind.label());
                return DigestOutcome::NotAuthenticated;
            }
            Err(e) => {
                log::error!("Failed to prepare {} digest: {}", kind.label(), e);
                return DigestOutcome::SendFailed;
            }
        };

        match self.mailer.send(&mail, &digest.email).await {
            Ok(()) => {
                log::info!("Sent {} digest with {} events", kind.label(), digest.events);
                DigestOutcome::Sent {
                    events: digest.events,
                }
            }
            Err(e) => {
                log::error!("Failed to send {} digest: {}", kind.label(), e);
                DigestOutcome::SendFailed
            }
        }
    }
}
