//! Calendar view data: date windows for week / month / agenda and the
//! display fields the UI renders for each event.

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::categorize::{self, Category};
use crate::digest::{format_time, ALL_DAY};
use crate::types::{CalendarEvent, DateWindow};

/// Days shown in the month grid (six weeks).
const MONTH_GRID_DAYS: u64 = 42;
const AGENDA_MONTHS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Week,
    Month,
    Agenda,
}

impl ViewKind {
    pub fn parse(value: &str) -> Option<ViewKind> {
        match value.trim().to_lowercase().as_str() {
            "week" => Some(ViewKind::Week),
            "month" => Some(ViewKind::Month),
            "agenda" => Some(ViewKind::Agenda),
            _ => None,
        }
    }
}

/// Sunday on or before `date`. Weeks start on Sunday.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - chrono::Duration::days(date.weekday().num_days_from_sunday() as i64)
}

/// `days` whole local days starting at `first`, ending 23:59:59.999 on the last.
fn day_span<Tz: TimeZone>(tz: &Tz, first: NaiveDate, days: u64) -> Option<DateWindow> {
    let last = first.checked_add_days(chrono::Days::new(days.saturating_sub(1)))?;
    let start = tz.from_local_datetime(&first.and_hms_opt(0, 0, 0)?).earliest()?;
    let end = tz
        .from_local_datetime(&last.and_hms_milli_opt(23, 59, 59, 999)?)
        .latest()?;
    Some(DateWindow::new(start.fixed_offset(), end.fixed_offset()))
}

pub fn week_window<Tz: TimeZone>(anchor: &DateTime<Tz>) -> Option<DateWindow> {
    day_span(&anchor.timezone(), week_start(anchor.date_naive()), 7)
}

pub fn month_window<Tz: TimeZone>(anchor: &DateTime<Tz>) -> Option<DateWindow> {
    let first = anchor.date_naive().with_day(1)?;
    day_span(&anchor.timezone(), week_start(first), MONTH_GRID_DAYS)
}

pub fn agenda_window<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<DateWindow> {
    let end = now.clone().checked_add_months(Months::new(AGENDA_MONTHS))?;
    Some(DateWindow::new(now.fixed_offset(), end.fixed_offset()))
}

pub fn view_window<Tz: TimeZone>(kind: ViewKind, anchor: &DateTime<Tz>) -> Option<DateWindow> {
    match kind {
        ViewKind::Week => week_window(anchor),
        ViewKind::Month => month_window(anchor),
        ViewKind::Agenda => agenda_window(anchor),
    }
}

/// An event with its category and display attributes, for week/month grids.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizedEvent {
    #[serde(flatten)]
    pub event: CalendarEvent,
    pub category: Category,
    pub color: &'static str,
    pub emoji: &'static str,
}

impl CategorizedEvent {
    pub fn new(event: CalendarEvent) -> Self {
        let category = categorize::categorize(&event.title);
        Self {
            event,
            category,
            color: category.color(),
            emoji: category.emoji(),
        }
    }
}

/// Categorize and sort events by start.
pub fn categorized<Tz: TimeZone>(events: Vec<CalendarEvent>, tz: &Tz) -> Vec<CategorizedEvent> {
    let mut events = events;
    sort_by_start(&mut events, tz);
    events.into_iter().map(CategorizedEvent::new).collect()
}

fn sort_by_start<Tz: TimeZone>(events: &mut [CalendarEvent], tz: &Tz) {
    events.sort_by_key(|e| e.start.in_zone(tz).map(|dt| dt.timestamp()).unwrap_or(i64::MIN));
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItem {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub emoji: &'static str,
    pub color: &'static str,
    /// Short weekday, e.g. `Mon`.
    pub day_name: String,
    pub day_number: u32,
    /// `h:mm AM` or `All day`.
    pub time: String,
    pub location: Option<String>,
    pub calendar_name: String,
}

/// One month of the agenda. `key` is `YYYY-MM`, `label` is e.g. `June 2024`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaMonth {
    pub key: String,
    pub label: String,
    pub items: Vec<AgendaItem>,
}

/// Group events by month of their start, months and items in start order.
pub fn agenda<Tz: TimeZone>(events: Vec<CalendarEvent>, tz: &Tz) -> Vec<AgendaMonth>
where
    Tz::Offset: std::fmt::Display,
{
    let mut events = events;
    sort_by_start(&mut events, tz);

    let mut months: Vec<AgendaMonth> = Vec::new();
    for event in events {
        let date = event.start.local_date(tz);
        let key = date.format("%Y-%m").to_string();
        let category = categorize::categorize(&event.title);
        let item = AgendaItem {
            id: event.id.clone(),
            title: event.title.clone(),
            category,
            emoji: category.emoji(),
            color: category.color(),
            day_name: date.format("%a").to_string(),
            day_number: date.day(),
            time: format_time(&event, tz),
            location: event.location.clone(),
            calendar_name: event.calendar_name.clone(),
        };

        match months.last_mut() {
            Some(month) if month.key == key => month.items.push(item),
            _ => months.push(AgendaMonth {
                label: date.format("%B %Y").to_string(),
                key,
                items: vec![item],
            }),
        }
    }
    months
}

/// Everything the event popup shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    pub title: String,
    pub category: Category,
    pub emoji: &'static str,
    pub color: &'static str,
    /// `h:mm AM - h:mm PM`, just the start when the end equals it, or `All day`.
    pub time: String,
    pub location: Option<String>,
    pub calendar_name: String,
    pub description: Option<String>,
}

impl EventDetails {
    /// Plain-text rendering, one field per line.
    pub fn to_text(&self) -> String {
        let mut lines = vec![
            format!("{} {}", self.emoji, self.title),
            String::new(),
            format!("Time: {}", self.time),
        ];
        if let Some(location) = &self.location {
            lines.push(format!("Location: {}", location));
        }
        if !self.calendar_name.is_empty() {
            lines.push(format!("Calendar: {}", self.calendar_name));
        }
        if let Some(description) = &self.description {
            lines.push(format!("\nDescription: {}", description));
        }
        lines.join("\n")
    }
}

pub fn event_details<Tz: TimeZone>(event: &CalendarEvent, tz: &Tz) -> EventDetails
where
    Tz::Offset: std::fmt::Display,
{
    let category = categorize::categorize(&event.title);
    let time = if event.all_day {
        ALL_DAY.to_string()
    } else {
        let start = format_time(event, tz);
        match event.end.in_zone(tz) {
            Some(end) if event.end != event.start => {
                format!("{} - {}", start, end.format("%-I:%M %p"))
            }
            _ => start,
        }
    };

    EventDetails {
        title: event.title.clone(),
        category,
        emoji: category.emoji(),
        color: category.color(),
        time,
        location: event.location.clone(),
        calendar_name: event.calendar_name.clone(),
        description: event.description.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::sample_event;
    use crate::types::EventTime;
    use chrono::{FixedOffset, Utc};

    fn at(rfc3339: &str) -> EventTime {
        EventTime::from_parts(Some(rfc3339), None).unwrap()
    }

    #[test]
    fn test_week_window_starts_sunday() {
        // Wednesday
        let anchor = Utc.with_ymd_and_hms(2024, 6, 12, 15, 0, 0).unwrap();
        let window = week_window(&anchor).unwrap();
        assert_eq!(window.start.to_rfc3339(), "2024-06-09T00:00:00+00:00");
        assert_eq!(window.end.date_naive(), NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());

        // A Sunday anchors its own week
        let sunday = Utc.with_ymd_and_hms(2024, 6, 9, 0, 0, 0).unwrap();
        assert_eq!(week_window(&sunday).unwrap().start, window.start);
    }

    #[test]
    fn test_month_window_is_six_week_grid() {
        // June 1 2024 is a Saturday; grid starts Sunday May 26
        let anchor = Utc.with_ymd_and_hms(2024, 6, 20, 9, 0, 0).unwrap();
        let window = month_window(&anchor).unwrap();
        assert_eq!(window.start.date_naive(), NaiveDate::from_ymd_opt(2024, 5, 26).unwrap());
        assert_eq!(window.end.date_naive(), NaiveDate::from_ymd_opt(2024, 7, 6).unwrap());
    }

    #[test]
    fn test_agenda_window_six_months() {
        let now = Utc.with_ymd_and_hms(2024, 8, 31, 10, 0, 0).unwrap();
        let window = agenda_window(&now).unwrap();
        assert_eq!(window.start, now.fixed_offset());
        // Clamped to the last day of February
        assert_eq!(window.end.date_naive(), NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn test_agenda_groups_by_month() {
        let mut july = sample_event("a", "Work", "Flight to Lisbon");
        july.start = at("2024-07-02T08:15:00Z");
        july.location = Some("LHR".into());
        let mut june_late = sample_event("a", "Work", "Dinner");
        june_late.start = at("2024-06-28T19:00:00Z");
        let mut june_early = sample_event("b", "Family", "School pickup");
        june_early.start = EventTime::from_parts(None, Some("2024-06-03")).unwrap();
        june_early.all_day = true;

        let months = agenda(vec![july, june_late, june_early], &Utc);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].key, "2024-06");
        assert_eq!(months[0].label, "June 2024");
        assert_eq!(months[0].items.len(), 2);

        let first = &months[0].items[0];
        assert_eq!(first.title, "School pickup");
        assert_eq!(first.day_name, "Mon");
        assert_eq!(first.day_number, 3);
        assert_eq!(first.time, "All day");
        assert_eq!(first.category, Category::Childcare);
        assert_eq!(first.calendar_name, "Family");

        let flight = &months[1].items[0];
        assert_eq!(months[1].label, "July 2024");
        assert_eq!(flight.time, "8:15 AM");
        assert_eq!(flight.emoji, "🏖️");
        assert_eq!(flight.location.as_deref(), Some("LHR"));
    }

    #[test]
    fn test_agenda_empty() {
        assert!(agenda(Vec::new(), &Utc).is_empty());
    }

    #[test]
    fn test_agenda_uses_local_day() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let mut late = sample_event("a", "A", "Late call");
        late.start = at("2024-07-01T02:00:00Z");
        let months = agenda(vec![late], &tz);
        assert_eq!(months[0].key, "2024-06");
        assert_eq!(months[0].items[0].day_number, 30);
        assert_eq!(months[0].items[0].time, "9:00 PM");
    }

    #[test]
    fn test_event_details_time_range() {
        let mut event = sample_event("a", "Work", "Client review");
        event.end = at("2024-06-10T13:30:00Z");
        event.description = Some("Quarterly numbers".into());
        let details = event_details(&event, &Utc);
        assert_eq!(details.time, "9:00 AM - 1:30 PM");
        assert_eq!(details.category, Category::Work);

        let text = details.to_text();
        assert!(text.starts_with("💼 Client review"));
        assert!(text.contains("Time: 9:00 AM - 1:30 PM"));
        assert!(text.contains("Calendar: Work"));
        assert!(text.contains("Description: Quarterly numbers"));

        event.all_day = true;
        assert_eq!(event_details(&event, &Utc).time, "All day");
    }

    #[test]
    fn test_categorized_sorted() {
        let mut later = sample_event("a", "A", "Later");
        later.start = at("2024-06-10T12:00:00Z");
        let earlier = sample_event("a", "A", "Wine tasting");
        let out = categorized(vec![later, earlier], &Utc);
        assert_eq!(out[0].event.title, "Wine tasting");
        assert_eq!(out[0].category, Category::Date);
        assert_eq!(out[0].color, "#FF69B4");
    }

    #[test]
    fn test_view_kind_parse() {
        assert_eq!(ViewKind::parse("Month"), Some(ViewKind::Month));
        assert_eq!(ViewKind::parse("day"), None);
    }
}
