//! Daily digest triggers.
//!
//! Two wall-clock triggers (morning, evening) built from "HH:MM" strings as
//! daily cron schedules. Each trigger is a tokio task that sleeps until the
//! next fire time in the configured zone and then runs the digest. Arming
//! always cancels every existing trigger first.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use parking_lot::Mutex;
use regex::Regex;
use tokio::task::JoinHandle;

use crate::digest::{DigestKind, DigestService};
use crate::error::DashboardError;
use crate::settings::ReminderConfig;

/// Zone the reminder times are interpreted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderZone {
    Local,
    Named(Tz),
}

impl ReminderZone {
    pub fn from_config(timezone: Option<&str>) -> Result<Self, DashboardError> {
        match timezone.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(ReminderZone::Local),
            Some(name) => name.parse::<Tz>().map(ReminderZone::Named).map_err(|_| {
                DashboardError::InvalidSettings(format!("Invalid timezone: {}", name))
            }),
        }
    }

    /// First fire time of `schedule` strictly after `now`.
    pub fn next_fire_after(&self, schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ReminderZone::Local => schedule
                .after(&now.with_timezone(&Local))
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
            ReminderZone::Named(tz) => schedule
                .after(&now.with_timezone(tz))
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Parse "HH:MM" (24-hour, single-digit hour allowed) into (hour, minute).
pub fn parse_reminder_time(value: &str) -> Result<(u32, u32), DashboardError> {
    let re = Regex::new(r"^([01]?\d|2[0-3]):([0-5]\d)$")
        .map_err(|e| DashboardError::InvalidSettings(e.to_string()))?;
    let invalid = || DashboardError::InvalidSettings(format!("Invalid reminder time '{}'", value));

    let caps = re.captures(value.trim()).ok_or_else(invalid)?;
    let hour = caps[1].parse::<u32>().map_err(|_| invalid())?;
    let minute = caps[2].parse::<u32>().map_err(|_| invalid())?;
    Ok((hour, minute))
}

/// Parse a cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule, DashboardError> {
    // The cron crate expects 6 fields (with seconds), but we use 5-field format
    // Add "0" for seconds at the start
    let full_expr = format!("0 {}", expr);

    full_expr.parse::<Schedule>().map_err(|e| {
        DashboardError::InvalidSettings(format!("Invalid cron expression '{}': {}", expr, e))
    })
}

/// Daily schedule firing at `time` ("HH:MM").
pub fn daily_schedule(time: &str) -> Result<Schedule, DashboardError> {
    let (hour, minute) = parse_reminder_time(time)?;
    parse_cron(&format!("{} {} * * *", minute, hour))
}

type TriggerPlan = (ReminderZone, [(DigestKind, Schedule); 2]);

fn trigger_plan(config: &ReminderConfig) -> Result<TriggerPlan, DashboardError> {
    let zone = ReminderZone::from_config(config.timezone.as_deref())?;
    let plan = [
        (DigestKind::Morning, daily_schedule(&config.morning_reminder_time)?),
        (DigestKind::Evening, daily_schedule(&config.evening_reminder_time)?),
    ];
    Ok((zone, plan))
}

/// Check reminder times and zone without arming anything. Disabled
/// reminders are always valid.
pub fn validate_reminders(config: &ReminderConfig) -> Result<(), DashboardError> {
    if !config.reminders_enabled {
        return Ok(());
    }
    trigger_plan(config).map(|_| ())
}

struct Trigger {
    kind: DigestKind,
    handle: JoinHandle<()>,
}

/// Owns the armed digest triggers.
pub struct DigestScheduler {
    service: Arc<DigestService>,
    triggers: Mutex<Vec<Trigger>>,
}

impl DigestScheduler {
    pub fn new(service: Arc<DigestService>) -> Self {
        Self {
            service,
            triggers: Mutex::new(Vec::new()),
        }
    }

    /// Cancel existing triggers, then arm morning and evening per `config`.
    ///
    /// Disabled reminders leave nothing armed. A malformed time or zone is an
    /// error and also leaves nothing armed. Must be called inside a tokio
    /// runtime.
    pub fn arm(&self, config: &ReminderConfig) -> Result<Vec<DigestKind>, DashboardError> {
        // Held across cancel and re-arm.
        let mut triggers = self.triggers.lock();
        abort_all(&mut triggers);

        if !config.reminders_enabled {
            log::info!("Email reminders disabled, no digest triggers armed");
            return Ok(Vec::new());
        }

        let (zone, plan) = trigger_plan(config)?;
        for (kind, schedule) in plan {
            let service = self.service.clone();
            let handle = tokio::spawn(run_trigger(service, kind, schedule, zone));
            triggers.push(Trigger { kind, handle });
        }

        log::info!(
            "Digest triggers armed: morning {}, evening {} ({:?})",
            config.morning_reminder_time,
            config.evening_reminder_time,
            zone
        );
        Ok(triggers.iter().map(|t| t.kind).collect())
    }

    /// Cancel every armed trigger.
    pub fn disarm(&self) {
        abort_all(&mut self.triggers.lock());
    }

    #[cfg(test)]
    fn abort_handles(&self) -> Vec<tokio::task::AbortHandle> {
        self.triggers
            .lock()
            .iter()
            .map(|t| t.handle.abort_handle())
            .collect()
    }

    /// Kinds of the triggers currently armed.
    pub fn armed(&self) -> Vec<DigestKind> {
        self.triggers
            .lock()
            .iter()
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.kind)
            .collect()
    }
}

fn abort_all(triggers: &mut Vec<Trigger>) {
    for trigger in triggers.drain(..) {
        trigger.handle.abort();
    }
}

impl Drop for DigestScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}

async fn run_trigger(service: Arc<DigestService>, kind: DigestKind, schedule: Schedule, zone: ReminderZone) {
    loop {
        let now = Utc::now();
        let Some(next) = zone.next_fire_after(&schedule, now) else {
            log::warn!("No upcoming time for the {} digest, trigger stopped", kind.label());
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        log::debug!("Next {} digest at {} (in {:?})", kind.label(), next, wait);
        tokio::time::sleep(wait).await;

        let outcome = match zone {
            ReminderZone::Local => service.run(kind, Local::now()).await,
            ReminderZone::Named(tz) => service.run(kind, Utc::now().with_timezone(&tz)).await,
        };
        log::debug!("{} digest finished: {:?}", kind.label(), outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::FakeProvider;
    use crate::fetch::CalendarService;
    use crate::google_api::tests::FakeTokenEndpoint;
    use crate::mail::tests::RecordingMailer;
    use crate::settings::MemoryStore;
    use chrono::TimeZone;

    fn scheduler() -> DigestScheduler {
        let calendars = CalendarService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeTokenEndpoint::new(true)),
            Arc::new(FakeProvider::with_calendars(&["a"])),
        );
        let service = DigestService::new(calendars, Arc::new(RecordingMailer::default()));
        DigestScheduler::new(Arc::new(service))
    }

    fn enabled() -> ReminderConfig {
        ReminderConfig {
            reminders_enabled: true,
            ..ReminderConfig::default()
        }
    }

    #[test]
    fn test_parse_reminder_time() {
        assert_eq!(parse_reminder_time("07:00").unwrap(), (7, 0));
        assert_eq!(parse_reminder_time("7:05").unwrap(), (7, 5));
        assert_eq!(parse_reminder_time("23:59").unwrap(), (23, 59));
        assert!(parse_reminder_time("24:00").is_err());
        assert!(parse_reminder_time("12:60").is_err());
        assert!(parse_reminder_time("noon").is_err());
        assert!(parse_reminder_time("").is_err());
    }

    #[test]
    fn test_parse_cron_invalid() {
        assert!(parse_cron("0 8 * * 1-5").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn test_next_fire_in_named_zone() {
        let schedule = daily_schedule("07:00").unwrap();
        let zone = ReminderZone::from_config(Some("America/New_York")).unwrap();

        // 08:00 EDT on June 10 -> 07:00 EDT on June 11
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let next = zone.next_fire_after(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 11, 11, 0, 0).unwrap());

        // 06:00 EDT -> same day
        let early = Utc.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).unwrap();
        let next = zone.next_fire_after(&schedule, early).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 10, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_zone_rejected() {
        assert!(ReminderZone::from_config(Some("Mars/Olympus")).is_err());
        assert_eq!(ReminderZone::from_config(Some("  ")).unwrap(), ReminderZone::Local);
        assert_eq!(ReminderZone::from_config(None).unwrap(), ReminderZone::Local);
    }

    #[test]
    fn test_validate_reminders() {
        assert!(validate_reminders(&enabled()).is_ok());
        let bad = ReminderConfig {
            morning_reminder_time: "7am".into(),
            ..enabled()
        };
        assert!(validate_reminders(&bad).is_err());
        // Disabled config is not inspected
        let disabled = ReminderConfig {
            reminders_enabled: false,
            ..bad
        };
        assert!(validate_reminders(&disabled).is_ok());
    }

    #[tokio::test]
    async fn test_arm_twice_keeps_one_pair() {
        let scheduler = scheduler();
        scheduler.arm(&enabled()).unwrap();
        scheduler.arm(&enabled()).unwrap();

        let armed = scheduler.armed();
        assert_eq!(armed.len(), 2);
        assert!(armed.contains(&DigestKind::Morning));
        assert!(armed.contains(&DigestKind::Evening));
    }

    async fn wait_finished(handles: &[tokio::task::AbortHandle]) -> bool {
        for _ in 0..50 {
            if handles.iter().all(|h| h.is_finished()) {
                return true;
            }
            tokio::task::yield_now().await;
        }
        false
    }

    #[tokio::test]
    async fn test_rearm_stops_previous_tasks() {
        let scheduler = scheduler();
        scheduler.arm(&enabled()).unwrap();
        let first = scheduler.abort_handles();
        assert_eq!(first.len(), 2);

        scheduler.arm(&enabled()).unwrap();
        assert!(wait_finished(&first).await, "previous triggers still running");

        let second = scheduler.abort_handles();
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|h| !h.is_finished()));
    }

    #[tokio::test]
    async fn test_disarm_and_drop_stop_tasks() {
        let scheduler = scheduler();
        scheduler.arm(&enabled()).unwrap();
        let handles = scheduler.abort_handles();
        scheduler.disarm();
        assert!(wait_finished(&handles).await);

        scheduler.arm(&enabled()).unwrap();
        let handles = scheduler.abort_handles();
        drop(scheduler);
        assert!(wait_finished(&handles).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_arm_leaves_one_pair() {
        let scheduler = Arc::new(scheduler());
        let mut calls = Vec::new();
        for _ in 0..16 {
            let scheduler = scheduler.clone();
            calls.push(tokio::spawn(async move { scheduler.arm(&enabled()) }));
        }
        for call in calls {
            call.await.unwrap().unwrap();
        }
        assert_eq!(scheduler.abort_handles().len(), 2);
        assert_eq!(scheduler.armed().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_arms_nothing() {
        let scheduler = scheduler();
        scheduler.arm(&enabled()).unwrap();
        assert!(scheduler.arm(&ReminderConfig::default()).unwrap().is_empty());
        assert!(scheduler.armed().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_time_arms_nothing() {
        let scheduler = scheduler();
        scheduler.arm(&enabled()).unwrap();

        let bad = ReminderConfig {
            evening_reminder_time: "25:00".into(),
            ..enabled()
        };
        assert!(matches!(
            scheduler.arm(&bad),
            Err(DashboardError::InvalidSettings(_))
        ));
        assert!(scheduler.armed().is_empty());
    }
}
