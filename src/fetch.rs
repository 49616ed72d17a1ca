//! Calendar fetch across the user's effective calendar set.
//!
//! The effective set is the provider's calendar list filtered by the stored
//! selection, plus manually added calendars. Calendars are queried one at a
//! time; a calendar that fails is logged and skipped.

use std::sync::Arc;

use crate::error::DashboardError;
use crate::google_api::calendar::CalendarProvider;
use crate::google_api::{self, GoogleApiError, TokenEndpoint};
use crate::settings::{self, SettingsStore};
use crate::types::{
    default_calendar_color, CalendarEvent, CalendarInfo, CalendarSelection, DateWindow,
    GoogleAuthStatus, ManualCalendarEntry,
};

/// Resolve which calendars to query.
///
/// Manual entries whose id is already in the filtered provider list are not
/// added a second time.
pub fn resolve_calendars(
    selection: &CalendarSelection,
    provider_calendars: &[CalendarInfo],
    manual: &[ManualCalendarEntry],
) -> Vec<CalendarInfo> {
    let mut effective: Vec<CalendarInfo> = provider_calendars
        .iter()
        .filter(|cal| selection.includes(&cal.id))
        .cloned()
        .collect();

    for entry in manual {
        if effective.iter().any(|cal| cal.id == entry.id) {
            continue;
        }
        effective.push(CalendarInfo {
            id: entry.id.clone(),
            name: entry.display_name().to_string(),
            color: default_calendar_color(),
            primary: false,
        });
    }

    effective
}

/// Authenticated access to the user's calendars.
#[derive(Clone)]
pub struct CalendarService {
    store: Arc<dyn SettingsStore>,
    tokens: Arc<dyn TokenEndpoint>,
    provider: Arc<dyn CalendarProvider>,
}

impl CalendarService {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        tokens: Arc<dyn TokenEndpoint>,
        provider: Arc<dyn CalendarProvider>,
    ) -> Self {
        Self {
            store,
            tokens,
            provider,
        }
    }

    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    async fn access_token(&self) -> Result<String, DashboardError> {
        google_api::ensure_access_token(self.store.as_ref(), self.tokens.as_ref())
            .await
            .map_err(DashboardError::from)
    }

    /// Authentication state for the settings screen. Refreshes an expired
    /// token as a side effect.
    pub async fn auth_status(&self) -> GoogleAuthStatus {
        match google_api::ensure_access_token(self.store.as_ref(), self.tokens.as_ref()).await {
            Ok(_) => {
                let email = settings::load_token(self.store.as_ref())
                    .and_then(|t| t.account)
                    .unwrap_or_else(|| "authenticated".to_string());
                GoogleAuthStatus::Authenticated { email }
            }
            Err(GoogleApiError::AuthExpired) => GoogleAuthStatus::TokenExpired,
            Err(_) => GoogleAuthStatus::NotConfigured,
        }
    }

    /// Every calendar visible to the account.
    pub async fn calendar_list(&self) -> Result<Vec<CalendarInfo>, DashboardError> {
        let access_token = self.access_token().await?;
        Ok(self.provider.list_calendars(&access_token).await?)
    }

    /// Events in `window` from the stored selection plus manual calendars.
    pub async fn fetch_events(&self, window: &DateWindow) -> Result<Vec<CalendarEvent>, DashboardError> {
        let selection = settings::load_selection(self.store.as_ref());
        self.fetch_events_for(&selection, window).await
    }

    /// Events in `window` for an explicit selection plus manual calendars.
    /// The merge is unordered.
    pub async fn fetch_events_for(
        &self,
        selection: &CalendarSelection,
        window: &DateWindow,
    ) -> Result<Vec<CalendarEvent>, DashboardError> {
        let access_token = self.access_token().await?;
        let provider_calendars = self.provider.list_calendars(&access_token).await?;
        let manual = settings::load_manual_calendars(self.store.as_ref());
        let calendars = resolve_calendars(selection, &provider_calendars, &manual);

        let mut events = Vec::new();
        for cal in &calendars {
            match self
                .provider
                .list_events(&access_token, &cal.id, &cal.name, window)
                .await
            {
                Ok(mut batch) => {
                    log::debug!("Fetched {} events from {}", batch.len(), cal.id);
                    events.append(&mut batch);
                }
                Err(e) => {
                    log::warn!("Could not fetch events from calendar {}: {}", cal.id, e);
                }
            }
        }

        Ok(events)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{BTreeSet, HashSet};

    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone};
    use parking_lot::Mutex;

    use super::*;
    use crate::google_api::tests::{authenticated_store, token_expiring_in, FakeTokenEndpoint};
    use crate::settings::MemoryStore;
    use crate::types::EventTime;

    /// Provider fake: a fixed calendar list, one event per calendar, and a
    /// set of calendar ids that fail.
    pub(crate) struct FakeProvider {
        pub calendars: Vec<CalendarInfo>,
        pub failing: HashSet<String>,
        pub events_per_calendar: usize,
        pub queried: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        pub(crate) fn with_calendars(ids: &[&str]) -> Self {
            Self {
                calendars: ids
                    .iter()
                    .map(|id| CalendarInfo {
                        id: id.to_string(),
                        name: id.to_uppercase(),
                        color: default_calendar_color(),
                        primary: false,
                    })
                    .collect(),
                failing: HashSet::new(),
                events_per_calendar: 1,
                queried: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(mut self, id: &str) -> Self {
            self.failing.insert(id.to_string());
            self
        }

        pub(crate) fn empty(mut self) -> Self {
            self.events_per_calendar = 0;
            self
        }

        pub(crate) fn queried(&self) -> Vec<String> {
            self.queried.lock().clone()
        }
    }

    pub(crate) fn sample_event(calendar_id: &str, calendar_name: &str, title: &str) -> CalendarEvent {
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 10, 9, 0, 0)
            .unwrap();
        CalendarEvent {
            id: format!("{}-{}", calendar_id, title),
            calendar_id: calendar_id.to_string(),
            calendar_name: calendar_name.to_string(),
            title: title.to_string(),
            description: None,
            start: EventTime::DateTime(start),
            end: EventTime::DateTime(start + chrono::Duration::minutes(30)),
            all_day: false,
            location: None,
        }
    }

    #[async_trait]
    impl CalendarProvider for FakeProvider {
        async fn list_calendars(&self, _access_token: &str) -> Result<Vec<CalendarInfo>, GoogleApiError> {
            Ok(self.calendars.clone())
        }

        async fn list_events(
            &self,
            _access_token: &str,
            calendar_id: &str,
            calendar_name: &str,
            _window: &DateWindow,
        ) -> Result<Vec<CalendarEvent>, GoogleApiError> {
            self.queried.lock().push(calendar_id.to_string());
            if self.failing.contains(calendar_id) {
                return Err(GoogleApiError::ApiError {
                    status: 404,
                    message: "Not Found".into(),
                });
            }
            Ok((0..self.events_per_calendar)
                .map(|i| sample_event(calendar_id, calendar_name, &format!("Event {}", i)))
                .collect())
        }
    }

    pub(crate) fn june_10() -> DateWindow {
        let tz = FixedOffset::east_opt(0).unwrap();
        DateWindow::new(
            tz.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap(),
            tz.with_ymd_and_hms(2024, 6, 10, 23, 59, 59).unwrap(),
        )
    }

    fn service(store: MemoryStore, provider: Arc<FakeProvider>, refresh_ok: bool) -> CalendarService {
        CalendarService::new(
            Arc::new(store),
            Arc::new(FakeTokenEndpoint::new(refresh_ok)),
            provider,
        )
    }

    #[test]
    fn test_resolve_unset_selection_keeps_every_calendar() {
        let provider = FakeProvider::with_calendars(&["a", "b", "c"]);
        let resolved = resolve_calendars(&CalendarSelection::Unset, &provider.calendars, &[]);
        assert_eq!(resolved.len(), 3);
    }

    #[test]
    fn test_resolve_subset_plus_manual() {
        let provider = FakeProvider::with_calendars(&["a", "b", "c"]);
        let selection = CalendarSelection::Subset(BTreeSet::from(["b".to_string()]));
        let manual = vec![
            ManualCalendarEntry::new("family@group.calendar.google.com", "Family"),
            ManualCalendarEntry::new("b", "Duplicate of b"),
        ];
        let resolved = resolve_calendars(&selection, &provider.calendars, &manual);
        let ids: Vec<&str> = resolved.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "family@group.calendar.google.com"]);
        assert_eq!(resolved[1].name, "Family");
    }

    #[test]
    fn test_resolve_explicit_empty_subset_only_manual() {
        let provider = FakeProvider::with_calendars(&["a", "b"]);
        let manual = vec![ManualCalendarEntry::new("m", "")];
        let resolved = resolve_calendars(
            &CalendarSelection::Subset(BTreeSet::new()),
            &provider.calendars,
            &manual,
        );
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "m");
    }

    #[tokio::test]
    async fn test_fetch_with_default_selection_queries_all() {
        let provider = Arc::new(FakeProvider::with_calendars(&["a", "b", "c"]));
        let svc = service(authenticated_store(token_expiring_in(3600)), provider.clone(), true);

        let events = svc.fetch_events(&june_10()).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(provider.queried(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_fetch_selected_one_plus_manual() {
        let provider = Arc::new(FakeProvider::with_calendars(&["a", "b", "c"]));
        let store = authenticated_store(token_expiring_in(3600));
        settings::save_selection(
            &store,
            &CalendarSelection::Subset(BTreeSet::from(["a".to_string()])),
        )
        .unwrap();
        settings::add_manual_calendar(&store, "shared", "Shared").unwrap();
        let svc = service(store, provider.clone(), true);

        let events = svc.fetch_events(&june_10()).await.unwrap();
        assert_eq!(provider.queried(), vec!["a", "shared"]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].calendar_name, "Shared");
    }

    #[tokio::test]
    async fn test_failing_calendar_is_skipped() {
        let provider = Arc::new(FakeProvider::with_calendars(&["a", "b", "c"]).failing("b"));
        let svc = service(authenticated_store(token_expiring_in(3600)), provider.clone(), true);

        let events = svc.fetch_events(&june_10()).await.unwrap();
        let calendars: Vec<&str> = events.iter().map(|e| e.calendar_id.as_str()).collect();
        assert_eq!(calendars, vec!["a", "c"]);
        assert_eq!(provider.queried().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_requires_authentication() {
        let provider = Arc::new(FakeProvider::with_calendars(&["a"]));
        let svc = service(authenticated_store(token_expiring_in(-60)), provider.clone(), false);

        let err = svc.fetch_events(&june_10()).await.unwrap_err();
        assert!(matches!(err, DashboardError::AuthenticationRequired(_)));
        assert!(settings::load_token(svc.store().as_ref()).is_none());
        assert!(provider.queried().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credentials_is_configuration_error() {
        let provider = Arc::new(FakeProvider::with_calendars(&["a"]));
        let svc = service(MemoryStore::new(), provider, true);
        assert!(matches!(
            svc.fetch_events(&june_10()).await,
            Err(DashboardError::ConfigurationMissing)
        ));
        assert_eq!(svc.auth_status().await, GoogleAuthStatus::NotConfigured);
    }

    #[tokio::test]
    async fn test_auth_status_reports_account() {
        let provider = Arc::new(FakeProvider::with_calendars(&[]));
        let svc = service(authenticated_store(token_expiring_in(3600)), provider.clone(), true);
        assert_eq!(
            svc.auth_status().await,
            GoogleAuthStatus::Authenticated {
                email: "me@example.com".into()
            }
        );

        let expired = service(authenticated_store(token_expiring_in(-60)), provider, false);
        assert_eq!(expired.auth_status().await, GoogleAuthStatus::TokenExpired);
    }
}
