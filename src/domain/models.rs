use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

pub const EXTERNAL_SYNC_SOURCE: &str = "external-sync";
pub const DEFAULT_SYNC_INTERVAL_MINUTES: u32 = 30;
pub const MIN_SYNC_INTERVAL_MINUTES: u32 = 1;
pub const DEFAULT_SOURCE_NAME: &str = "Calendar";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Birthday,
    Anniversary,
    Holiday,
    Other,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Birthday => "birthday",
            Self::Anniversary => "anniversary",
            Self::Holiday => "holiday",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "birthday" => Some(Self::Birthday),
            "anniversary" => Some(Self::Anniversary),
            "holiday" => Some(Self::Holiday),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

pub type DedupKey = (NaiveDate, String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub date: NaiveDate,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring: Option<bool>,
}

impl CalendarEvent {
    pub fn dedup_key(&self) -> DedupKey {
        (self.date, self.name.clone())
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "event.id")?;
        validate_non_empty(&self.name, "event.name")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftEvent {
    pub event_type: EventType,
    pub date: NaiveDate,
    pub name: String,
}

impl DraftEvent {
    pub fn dedup_key(&self) -> DedupKey {
        (self.date, self.name.clone())
    }

    pub fn into_event(self, id: String, source: Option<&str>) -> CalendarEvent {
        CalendarEvent {
            id,
            event_type: self.event_type,
            date: self.date,
            name: self.name,
            source: source.map(ToOwned::to_owned),
            recurring: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarSource {
    pub id: String,
    pub url: String,
    pub name: String,
}

impl CalendarSource {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "source.id")?;
        validate_non_empty(&self.url, "source.url")?;
        validate_non_empty(&self.name, "source.name")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    pub enabled: bool,
    pub interval_minutes: u32,
    #[serde(default)]
    pub sources: Vec<CalendarSource>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            sources: Vec::new(),
            last_sync: None,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_minutes < MIN_SYNC_INTERVAL_MINUTES {
            return Err(format!(
                "sync.interval_minutes must be >= {MIN_SYNC_INTERVAL_MINUTES}"
            ));
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.id.as_str()) {
                return Err(format!("sync.sources[].id must be unique: {}", source.id));
            }
        }
        Ok(())
    }

    pub fn source_with_url(&self, url: &str) -> Option<&CalendarSource> {
        self.sources.iter().find(|source| source.url == url)
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_event() -> CalendarEvent {
        CalendarEvent {
            id: "evt-1".to_string(),
            event_type: EventType::Birthday,
            date: NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"),
            name: "Mom's Birthday".to_string(),
            source: Some(EXTERNAL_SYNC_SOURCE.to_string()),
            recurring: None,
        }
    }

    fn sample_settings() -> SyncSettings {
        SyncSettings {
            enabled: true,
            interval_minutes: 15,
            sources: vec![
                CalendarSource {
                    id: "src-1".to_string(),
                    url: "https://example.com/a.ics".to_string(),
                    name: "Family".to_string(),
                },
                CalendarSource {
                    id: "src-2".to_string(),
                    url: "https://example.com/b.ics".to_string(),
                    name: "Holidays".to_string(),
                },
            ],
            last_sync: None,
        }
    }

    #[test]
    fn event_serializes_date_as_bare_calendar_date() {
        let json = serde_json::to_value(sample_event()).expect("serialize event");
        assert_eq!(json["date"], "2026-02-16");
        assert_eq!(json["type"], "birthday");
        assert!(json.get("recurring").is_none());
    }

    #[test]
    fn event_rejects_timestamp_as_date() {
        let raw = r#"{"id":"x","type":"other","date":"2026-02-16T10:00:00Z","name":"n"}"#;
        assert!(serde_json::from_str::<CalendarEvent>(raw).is_err());
    }

    #[test]
    fn event_validate_rejects_blank_name() {
        let mut event = sample_event();
        event.name = "  ".to_string();
        assert!(event.validate().is_err());
    }

    #[test]
    fn source_lookup_matches_exact_url() {
        let settings = sample_settings();
        let found = settings.source_with_url("https://example.com/b.ics").expect("found");
        assert_eq!(found.id, "src-2");
        assert!(settings.source_with_url("https://example.com/B.ics").is_none());
    }

    #[test]
    fn settings_validate_rejects_duplicate_source_ids() {
        let mut settings = sample_settings();
        settings.sources[1].id = "src-1".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_validate_rejects_zero_interval() {
        let mut settings = sample_settings();
        settings.interval_minutes = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn default_settings_are_disabled_with_thirty_minute_interval() {
        let settings = SyncSettings::default();
        assert!(!settings.enabled);
        assert_eq!(settings.interval_minutes, 30);
        assert!(settings.sources.is_empty());
        assert!(settings.last_sync.is_none());
        assert!(settings.validate().is_ok());
    }

    proptest! {
        #[test]
        fn event_type_parse_roundtrips_through_as_str(index in 0usize..4) {
            let all = [EventType::Birthday, EventType::Anniversary, EventType::Holiday, EventType::Other];
            let value = all[index];
            prop_assert_eq!(EventType::parse(value.as_str()), Some(value));
            prop_assert_eq!(EventType::parse(&value.as_str().to_ascii_uppercase()), Some(value));
        }
    }

    #[test]
    fn next_id_is_unique_and_prefixed() {
        let first = next_id("evt");
        let second = next_id("evt");
        assert!(first.starts_with("evt-"));
        assert_ne!(first, second);
    }

    #[test]
    fn settings_support_serde_roundtrip() {
        let settings = sample_settings();
        let roundtrip: SyncSettings =
            serde_json::from_str(&serde_json::to_string(&settings).expect("serialize settings"))
                .expect("deserialize settings");
        assert_eq!(roundtrip, settings);
    }
}
