//! Named settings storage.
//!
//! - `JsonFileStore`: one JSON object on disk, rewritten atomically (0600).
//! - `MemoryStore`: same contract, nothing persisted.
//!
//! Typed accessors below read with defaults so an empty store is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::DashboardError;
use crate::google_api::GoogleToken;
use crate::types::{CalendarSelection, ManualCalendarEntry};

pub const KEY_CLIENT_ID: &str = "googleClientId";
pub const KEY_CLIENT_SECRET: &str = "googleClientSecret";
pub const KEY_TOKENS: &str = "googleTokens";
pub const KEY_SELECTED_CALENDARS: &str = "selectedCalendars";
pub const KEY_MANUAL_CALENDARS: &str = "manualCalendars";
pub const KEY_RECIPIENT: &str = "recipientEmail";
pub const KEY_SMTP_HOST: &str = "smtpHost";
pub const KEY_SMTP_PORT: &str = "smtpPort";
pub const KEY_SMTP_USER: &str = "smtpUser";
pub const KEY_SMTP_PASS: &str = "smtpPass";
pub const KEY_REMINDERS_ENABLED: &str = "remindersEnabled";
pub const KEY_MORNING_TIME: &str = "morningReminderTime";
pub const KEY_EVENING_TIME: &str = "eveningReminderTime";
pub const KEY_REMINDER_TZ: &str = "reminderTimezone";

const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_MORNING: &str = "07:00";
const DEFAULT_EVENING: &str = "19:00";

/// Key/value settings backend.
pub trait SettingsStore: Send + Sync {
    /// Read a value; `None` when absent.
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), DashboardError>;
    fn delete(&self, key: &str) -> Result<(), DashboardError>;
}

/// Read a typed value, falling back to `default` when absent or mistyped.
pub fn get_or<T: DeserializeOwned>(store: &dyn SettingsStore, key: &str, default: T) -> T {
    store
        .get(key)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(default)
}

/// Write a typed value.
pub fn put<T: Serialize>(store: &dyn SettingsStore, key: &str, value: &T) -> Result<(), DashboardError> {
    let value =
        serde_json::to_value(value).map_err(|e| DashboardError::Storage(e.to_string()))?;
    store.set(key, value)
}

// ============================================================================
// Backends
// ============================================================================

/// Settings persisted as a single JSON object.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DashboardError> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| DashboardError::Storage(format!("{}: {}", path.display(), e)))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    DashboardError::Storage(format!("{}: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Canonical store location under the app directory.
    pub fn default_path() -> PathBuf {
        crate::util::app_dir().join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, serde_json::Value>) -> Result<(), DashboardError> {
        let content = serde_json::to_string_pretty(values)
            .map_err(|e| DashboardError::Storage(e.to_string()))?;
        crate::util::atomic_write_str(&self.path, &content)
            .map_err(|e| DashboardError::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.lock().get(key).cloned()
    }

    // Memory only changes once the file write has succeeded.
    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), DashboardError> {
        let mut guard = self.values.lock();
        let mut next = guard.clone();
        next.insert(key.to_string(), value);
        self.flush(&next)?;
        *guard = next;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), DashboardError> {
        let mut guard = self.values.lock();
        if !guard.contains_key(key) {
            return Ok(());
        }
        let mut next = guard.clone();
        next.remove(key);
        self.flush(&next)?;
        *guard = next;
        Ok(())
    }
}

/// In-memory store, used by tests and one-shot invocations.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), DashboardError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), DashboardError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// Typed settings
// ============================================================================

/// OAuth client registered by the user in the Google Cloud console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

pub fn load_client_credentials(store: &dyn SettingsStore) -> Option<ClientCredentials> {
    let client_id: String = get_or(store, KEY_CLIENT_ID, String::new());
    let client_secret: String = get_or(store, KEY_CLIENT_SECRET, String::new());
    if client_id.trim().is_empty() || client_secret.trim().is_empty() {
        return None;
    }
    Some(ClientCredentials {
        client_id,
        client_secret,
    })
}

pub fn save_client_credentials(
    store: &dyn SettingsStore,
    client_id: &str,
    client_secret: &str,
) -> Result<(), DashboardError> {
    put(store, KEY_CLIENT_ID, &client_id.trim())?;
    put(store, KEY_CLIENT_SECRET, &client_secret.trim())
}

pub fn load_token(store: &dyn SettingsStore) -> Option<GoogleToken> {
    store
        .get(KEY_TOKENS)
        .and_then(|v| serde_json::from_value(v).ok())
}

pub fn save_token(store: &dyn SettingsStore, token: &GoogleToken) -> Result<(), DashboardError> {
    put(store, KEY_TOKENS, token)
}

pub fn delete_token(store: &dyn SettingsStore) -> Result<(), DashboardError> {
    store.delete(KEY_TOKENS)
}

pub fn load_selection(store: &dyn SettingsStore) -> CalendarSelection {
    store
        .get(KEY_SELECTED_CALENDARS)
        .map(|v| CalendarSelection::from_stored(&v))
        .unwrap_or_default()
}

pub fn save_selection(
    store: &dyn SettingsStore,
    selection: &CalendarSelection,
) -> Result<(), DashboardError> {
    store.set(KEY_SELECTED_CALENDARS, selection.to_stored())
}

pub fn load_manual_calendars(store: &dyn SettingsStore) -> Vec<ManualCalendarEntry> {
    get_or(store, KEY_MANUAL_CALENDARS, Vec::new())
}

/// Replace the manual calendar list. Later duplicates of an id are dropped.
pub fn save_manual_calendars(
    store: &dyn SettingsStore,
    calendars: &[ManualCalendarEntry],
) -> Result<Vec<ManualCalendarEntry>, DashboardError> {
    let mut unique: Vec<ManualCalendarEntry> = Vec::with_capacity(calendars.len());
    for cal in calendars {
        let cal = ManualCalendarEntry::new(&cal.id, &cal.name);
        if cal.id.is_empty() {
            return Err(DashboardError::InvalidSettings(
                "calendar ID must not be empty".to_string(),
            ));
        }
        if !unique.iter().any(|c| c.id == cal.id) {
            unique.push(cal);
        }
    }
    put(store, KEY_MANUAL_CALENDARS, &unique)?;
    Ok(unique)
}

/// Append a manual calendar. Fails if the id is already present.
pub fn add_manual_calendar(
    store: &dyn SettingsStore,
    id: &str,
    name: &str,
) -> Result<Vec<ManualCalendarEntry>, DashboardError> {
    let entry = ManualCalendarEntry::new(id, name);
    if entry.id.is_empty() {
        return Err(DashboardError::InvalidSettings(
            "Please enter a calendar ID".to_string(),
        ));
    }
    let mut calendars = load_manual_calendars(store);
    if calendars.iter().any(|c| c.id == entry.id) {
        return Err(DashboardError::InvalidSettings(format!(
            "Calendar {} is already added",
            entry.id
        )));
    }
    calendars.push(entry);
    put(store, KEY_MANUAL_CALENDARS, &calendars)?;
    Ok(calendars)
}

pub fn remove_manual_calendar(
    store: &dyn SettingsStore,
    id: &str,
) -> Result<Vec<ManualCalendarEntry>, DashboardError> {
    let mut calendars = load_manual_calendars(store);
    calendars.retain(|c| c.id != id);
    put(store, KEY_MANUAL_CALENDARS, &calendars)?;
    Ok(calendars)
}

/// Outbound SMTP settings plus the digest recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailSettings {
    pub recipient_email: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
}

impl MailSettings {
    /// Host, user, password and recipient are all required to send.
    pub fn is_complete(&self) -> bool {
        !self.smtp_host.trim().is_empty()
            && !self.smtp_user.trim().is_empty()
            && !self.smtp_pass.is_empty()
            && !self.recipient_email.trim().is_empty()
    }
}

/// Digest trigger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderConfig {
    pub reminders_enabled: bool,
    pub morning_reminder_time: String,
    pub evening_reminder_time: String,
    /// IANA zone name; system local time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            reminders_enabled: false,
            morning_reminder_time: DEFAULT_MORNING.to_string(),
            evening_reminder_time: DEFAULT_EVENING.to_string(),
            timezone: None,
        }
    }
}

/// The "email settings" form: mail transport plus reminder schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSettings {
    #[serde(flatten)]
    pub mail: MailSettings,
    #[serde(flatten)]
    pub reminders: ReminderConfig,
}

pub fn load_mail_settings(store: &dyn SettingsStore) -> MailSettings {
    let host: String = get_or(store, KEY_SMTP_HOST, String::new());
    MailSettings {
        recipient_email: get_or(store, KEY_RECIPIENT, String::new()),
        smtp_host: if host.is_empty() {
            DEFAULT_SMTP_HOST.to_string()
        } else {
            host
        },
        smtp_port: match get_or(store, KEY_SMTP_PORT, 0u16) {
            0 => DEFAULT_SMTP_PORT,
            p => p,
        },
        smtp_user: get_or(store, KEY_SMTP_USER, String::new()),
        smtp_pass: get_or(store, KEY_SMTP_PASS, String::new()),
    }
}

pub fn load_reminder_config(store: &dyn SettingsStore) -> ReminderConfig {
    let non_empty = |key: &str, default: &str| -> String {
        let value: String = get_or(store, key, String::new());
        if value.trim().is_empty() {
            default.to_string()
        } else {
            value
        }
    };
    ReminderConfig {
        reminders_enabled: get_or(store, KEY_REMINDERS_ENABLED, false),
        morning_reminder_time: non_empty(KEY_MORNING_TIME, DEFAULT_MORNING),
        evening_reminder_time: non_empty(KEY_EVENING_TIME, DEFAULT_EVENING),
        timezone: store
            .get(KEY_REMINDER_TZ)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.trim().is_empty()),
    }
}

pub fn load_email_settings(store: &dyn SettingsStore) -> EmailSettings {
    EmailSettings {
        mail: load_mail_settings(store),
        reminders: load_reminder_config(store),
    }
}

pub fn save_email_settings(
    store: &dyn SettingsStore,
    settings: &EmailSettings,
) -> Result<(), DashboardError> {
    let mail = &settings.mail;
    let reminders = &settings.reminders;
    put(store, KEY_RECIPIENT, &mail.recipient_email.trim())?;
    put(store, KEY_SMTP_HOST, &mail.smtp_host.trim())?;
    put(store, KEY_SMTP_PORT, &mail.smtp_port)?;
    put(store, KEY_SMTP_USER, &mail.smtp_user.trim())?;
    put(store, KEY_SMTP_PASS, &mail.smtp_pass)?;
    put(store, KEY_REMINDERS_ENABLED, &reminders.reminders_enabled)?;
    put(store, KEY_MORNING_TIME, &reminders.morning_reminder_time)?;
    put(store, KEY_EVENING_TIME, &reminders.evening_reminder_time)?;
    match &reminders.timezone {
        Some(tz) => put(store, KEY_REMINDER_TZ, tz),
        None => store.delete(KEY_REMINDER_TZ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_reads_defaults() {
        let store = MemoryStore::new();
        let email = load_email_settings(&store);
        assert_eq!(email.mail.smtp_host, "smtp.gmail.com");
        assert_eq!(email.mail.smtp_port, 587);
        assert!(!email.mail.is_complete());
        assert!(!email.reminders.reminders_enabled);
        assert_eq!(email.reminders.morning_reminder_time, "07:00");
        assert_eq!(email.reminders.evening_reminder_time, "19:00");
        assert_eq!(load_selection(&store), CalendarSelection::Unset);
        assert!(load_manual_calendars(&store).is_empty());
        assert!(load_client_credentials(&store).is_none());
        assert!(load_token(&store).is_none());
    }

    #[test]
    fn test_client_credentials_require_both_values() {
        let store = MemoryStore::new();
        save_client_credentials(&store, " id.apps.googleusercontent.com ", "").unwrap();
        assert!(load_client_credentials(&store).is_none());

        save_client_credentials(&store, "id", "secret").unwrap();
        let creds = load_client_credentials(&store).unwrap();
        assert_eq!(creds.client_id, "id");
        assert_eq!(creds.client_secret, "secret");
    }

    #[test]
    fn test_manual_calendar_uniqueness() {
        let store = MemoryStore::new();
        add_manual_calendar(&store, "family@group.calendar.google.com", "Family").unwrap();
        let err = add_manual_calendar(&store, "family@group.calendar.google.com", "Again");
        assert!(matches!(err, Err(DashboardError::InvalidSettings(_))));

        let saved = save_manual_calendars(
            &store,
            &[
                ManualCalendarEntry::new("a", "A"),
                ManualCalendarEntry::new("b", ""),
                ManualCalendarEntry::new("a", "A again"),
            ],
        )
        .unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].name, "A");
        assert_eq!(saved[1].name, "b");

        let remaining = remove_manual_calendar(&store, "a").unwrap();
        assert_eq!(remaining, vec![ManualCalendarEntry::new("b", "b")]);
    }

    #[test]
    fn test_add_manual_calendar_rejects_blank_id() {
        let store = MemoryStore::new();
        assert!(add_manual_calendar(&store, "   ", "Name").is_err());
    }

    #[test]
    fn test_email_settings_roundtrip() {
        let store = MemoryStore::new();
        let settings = EmailSettings {
            mail: MailSettings {
                recipient_email: "me@example.com".into(),
                smtp_host: "smtp.example.com".into(),
                smtp_port: 465,
                smtp_user: "bot@example.com".into(),
                smtp_pass: "app-password".into(),
            },
            reminders: ReminderConfig {
                reminders_enabled: true,
                morning_reminder_time: "06:30".into(),
                evening_reminder_time: "20:15".into(),
                timezone: Some("Europe/Berlin".into()),
            },
        };
        save_email_settings(&store, &settings).unwrap();
        assert_eq!(load_email_settings(&store), settings);
        assert!(settings.mail.is_complete());
    }

    #[test]
    fn test_email_settings_json_shape() {
        let json = serde_json::json!({
            "recipientEmail": "me@example.com",
            "smtpHost": "smtp.gmail.com",
            "smtpPort": 587,
            "smtpUser": "me@example.com",
            "smtpPass": "pw",
            "remindersEnabled": true,
            "morningReminderTime": "07:00",
            "eveningReminderTime": "19:00"
        });
        let parsed: EmailSettings = serde_json::from_value(json).unwrap();
        assert!(parsed.reminders.reminders_enabled);
        assert_eq!(parsed.mail.smtp_port, 587);
        assert!(parsed.reminders.timezone.is_none());
    }

    #[test]
    fn test_json_file_store_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set(KEY_RECIPIENT, serde_json::json!("me@example.com")).unwrap();
            store.set(KEY_SMTP_PORT, serde_json::json!(2525)).unwrap();
        }
        let reopened = JsonFileStore::open(&path).unwrap();
        let mail = load_mail_settings(&reopened);
        assert_eq!(mail.recipient_email, "me@example.com");
        assert_eq!(mail.smtp_port, 2525);

        reopened.delete(KEY_SMTP_PORT).unwrap();
        let again = JsonFileStore::open(&path).unwrap();
        assert_eq!(load_mail_settings(&again).smtp_port, 587);
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Parent is a regular file, so every write fails
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let store = JsonFileStore::open(blocker.join("settings.json")).unwrap();

        assert!(matches!(
            store.set(KEY_RECIPIENT, serde_json::json!("me@example.com")),
            Err(DashboardError::Storage(_))
        ));
        assert!(store.get(KEY_RECIPIENT).is_none());
        assert_eq!(load_mail_settings(&store).recipient_email, "");
    }

    #[test]
    fn test_json_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(DashboardError::Storage(_))
        ));
    }
}
