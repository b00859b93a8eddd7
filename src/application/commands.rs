use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::calendar_sync::{SyncOrchestrator, SyncSummary, WriteGate};
use crate::application::scheduler::{validate_interval, StatusSink, SyncScheduler};
use crate::domain::models::{
    next_id, CalendarEvent, CalendarSource, EventType, SyncSettings, DEFAULT_SOURCE_NAME,
};
use crate::infrastructure::bulk_import::{
    export_events_json, export_file_name, parse_import, plan_import, ImportFormat, ImportRecord,
};
use crate::infrastructure::command_log::{CommandLog, JsonLinesCommandLog};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_store::{EventStore, SqliteEventStore};
use crate::infrastructure::feed_client::ReqwestFeedClient;
use crate::infrastructure::ics_decoder::decode_feed;
use crate::infrastructure::settings_store::{SettingsStore, SqliteSettingsStore};
use crate::infrastructure::source_resolver::{FeedFetcher, SourceResolver};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

const INITIAL_STATUS: &str = "Not synced yet";
const SYNC_IN_PROGRESS: &str = "Sync already in progress";

type LiveOrchestrator = SyncOrchestrator<dyn FeedFetcher, SqliteEventStore, SqliteSettingsStore>;

pub struct AppState {
    logs_dir: PathBuf,
    config: AppConfig,
    event_store: Arc<SqliteEventStore>,
    settings_store: Arc<SqliteSettingsStore>,
    fetcher: Arc<dyn FeedFetcher>,
    write_gate: WriteGate,
    log: Arc<JsonLinesCommandLog>,
    scheduler: SyncScheduler,
    status: Arc<Mutex<String>>,
    arm_timer: bool,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let log = Arc::new(JsonLinesCommandLog::new(&bootstrap.logs_dir));
        let resolver = SourceResolver::new(Arc::new(ReqwestFeedClient::new()))
            .with_relays(bootstrap.config.feed.relays.clone())
            .with_timeout(bootstrap.config.feed.timeout())
            .with_log(log.clone());
        Ok(Self::assemble(bootstrap, log, Arc::new(resolver)))
    }

    pub fn with_fetcher(
        workspace_root: PathBuf,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let log = Arc::new(JsonLinesCommandLog::new(&bootstrap.logs_dir));
        Ok(Self::assemble(bootstrap, log, fetcher))
    }

    fn assemble(
        bootstrap: BootstrapResult,
        log: Arc<JsonLinesCommandLog>,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        let event_store = Arc::new(SqliteEventStore::new(&bootstrap.database_path));
        let settings_store = Arc::new(SqliteSettingsStore::new(&bootstrap.database_path));
        let write_gate: WriteGate = Arc::new(AsyncMutex::new(()));
        let status = Arc::new(Mutex::new(INITIAL_STATUS.to_string()));

        let orchestrator: Arc<LiveOrchestrator> = Arc::new(
            SyncOrchestrator::new(
                Arc::clone(&fetcher),
                Arc::clone(&event_store),
                Arc::clone(&settings_store),
            )
            .with_write_gate(Arc::clone(&write_gate))
            .with_log(log.clone()),
        );
        let sink_status = Arc::clone(&status);
        let sink: StatusSink = Arc::new(move |message: &str| {
            if let Ok(mut status) = sink_status.lock() {
                *status = message.to_string();
            }
        });
        let scheduler = SyncScheduler::new(orchestrator)
            .with_status_sink(sink)
            .with_log(log.clone());

        Self {
            logs_dir: bootstrap.logs_dir,
            config: bootstrap.config,
            event_store,
            settings_store,
            fetcher,
            write_gate,
            log,
            scheduler,
            status,
            arm_timer: true,
        }
    }

    // Without a timer, auto-sync settings are persisted but no pass is spawned.
    pub fn with_timer(mut self, armed: bool) -> Self {
        self.arm_timer = armed;
        self
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn status_message(&self) -> String {
        self.status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_else(|_| INITIAL_STATUS.to_string())
    }

    fn set_status(&self, message: &str) {
        if let Ok(mut status) = self.status.lock() {
            *status = message.to_string();
        }
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.log.info(command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.log.error(command, message);
    }

    fn apply_schedule(&self, settings: &SyncSettings) -> Result<(), InfraError> {
        if self.arm_timer && settings.enabled && !settings.sources.is_empty() {
            self.scheduler.start(settings.interval_minutes)
        } else {
            if self.scheduler.has_timer() {
                self.scheduler.stop();
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceErrorResponse {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualSyncResponse {
    pub message: String,
    pub added: usize,
    pub succeeded: Vec<String>,
    pub errors: Vec<SourceErrorResponse>,
    pub skipped: bool,
}

impl From<SyncSummary> for ManualSyncResponse {
    fn from(summary: SyncSummary) -> Self {
        Self {
            message: summary.status_message(),
            added: summary.added,
            succeeded: summary.succeeded,
            errors: summary
                .errors
                .into_iter()
                .map(|failure| SourceErrorResponse {
                    source: failure.source_name,
                    message: failure.message,
                })
                .collect(),
            skipped: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportOutcome {
    pub format: String,
    pub imported: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResponse {
    pub file_name: String,
    pub count: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddSourceResponse {
    pub source: CalendarSource,
    pub added: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusResponse {
    pub app_name: String,
    pub enabled: bool,
    pub interval_minutes: u32,
    pub source_count: usize,
    pub last_sync: Option<String>,
    pub last_sync_description: String,
    pub status_message: String,
    pub timer_active: bool,
    pub pass_running: bool,
}

pub async fn trigger_manual_sync_impl(state: &AppState) -> Result<ManualSyncResponse, InfraError> {
    match state.scheduler.run_now().await? {
        Some(summary) => {
            let response = ManualSyncResponse::from(summary);
            state.log_info("trigger_manual_sync", &response.message);
            Ok(response)
        }
        None => {
            state.log_info("trigger_manual_sync", SYNC_IN_PROGRESS);
            Ok(ManualSyncResponse {
                message: SYNC_IN_PROGRESS.to_string(),
                added: 0,
                succeeded: Vec::new(),
                errors: Vec::new(),
                skipped: true,
            })
        }
    }
}

pub async fn import_from_text_impl(
    state: &AppState,
    content: String,
    format_hint: String,
) -> Result<ImportOutcome, InfraError> {
    let format = ImportFormat::from_hint(&format_hint)?;
    let records = parse_import(&content, format)?;
    let outcome = commit_import(state, records, format).await?;
    state.log_info(
        "import_from_text",
        &format!(
            "imported {} {} event(s), skipped {} duplicate(s)",
            outcome.imported, outcome.format, outcome.duplicates
        ),
    );
    Ok(outcome)
}

pub async fn import_from_url_impl(state: &AppState, url: String) -> Result<ImportOutcome, InfraError> {
    let url = required_http_url(&url)?;
    let content = state.fetcher.fetch_feed(&url).await?;
    let records = decode_feed(&content)
        .into_iter()
        .map(|draft| ImportRecord {
            id: None,
            draft,
            source: None,
            recurring: None,
        })
        .collect::<Vec<_>>();
    if records.is_empty() {
        return Err(InfraError::Validation {
            valid: 0,
            rejected: 0,
            message: "No events found in the calendar".to_string(),
        });
    }

    let outcome = commit_import(state, records, ImportFormat::Ics).await?;
    state.log_info(
        "import_from_url",
        &format!("imported {} event(s) from {url}", outcome.imported),
    );
    Ok(outcome)
}

async fn commit_import(
    state: &AppState,
    records: Vec<ImportRecord>,
    format: ImportFormat,
) -> Result<ImportOutcome, InfraError> {
    let _gate = state.write_gate.lock().await;
    let existing = state.event_store.get_all()?;
    let plan = plan_import(records, &existing, || next_id("evt"));
    state.event_store.append_all(&plan.events)?;
    Ok(ImportOutcome {
        format: format.as_str().to_string(),
        imported: plan.events.len(),
        duplicates: plan.duplicates,
    })
}

pub fn export_events_impl(state: &AppState) -> Result<ExportResponse, InfraError> {
    let events = state.event_store.get_all()?;
    let today = Utc::now().with_timezone(&state.config.timezone).date_naive();
    let response = ExportResponse {
        file_name: export_file_name(today),
        count: events.len(),
        content: export_events_json(&events)?,
    };
    state.log_info(
        "export_events",
        &format!("exported {} event(s) as {}", response.count, response.file_name),
    );
    Ok(response)
}

pub async fn add_source_impl(
    state: &AppState,
    url: String,
    name: Option<String>,
) -> Result<AddSourceResponse, InfraError> {
    let url = required_http_url(&url)?;
    let name = name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_SOURCE_NAME)
        .to_string();

    let settings = {
        let _gate = state.write_gate.lock().await;
        let mut settings = state.settings_store.get()?;
        if let Some(existing) = settings.source_with_url(&url) {
            state.log_info("add_source", &format!("source already configured: {url}"));
            return Ok(AddSourceResponse {
                source: existing.clone(),
                added: false,
            });
        }
        let source = CalendarSource {
            id: next_id("src"),
            url,
            name,
        };
        settings.sources.push(source);
        state.settings_store.save(&settings)?;
        settings
    };

    state.apply_schedule(&settings)?;
    let source = settings
        .sources
        .last()
        .cloned()
        .ok_or_else(|| InfraError::InvalidConfig("source list unexpectedly empty".to_string()))?;
    state.log_info("add_source", &format!("added source {} ({})", source.name, source.id));
    Ok(AddSourceResponse {
        source,
        added: true,
    })
}

pub async fn remove_source_impl(state: &AppState, source_id: String) -> Result<bool, InfraError> {
    let source_id = source_id.trim();
    let settings = {
        let _gate = state.write_gate.lock().await;
        let mut settings = state.settings_store.get()?;
        let before = settings.sources.len();
        settings.sources.retain(|source| source.id != source_id);
        if settings.sources.len() == before {
            return Ok(false);
        }
        state.settings_store.save(&settings)?;
        settings
    };

    state.apply_schedule(&settings)?;
    state.log_info("remove_source", &format!("removed source {source_id}"));
    Ok(true)
}

pub fn list_sources_impl(state: &AppState) -> Result<Vec<CalendarSource>, InfraError> {
    Ok(state.settings_store.get()?.sources)
}

pub fn resume_auto_sync_impl(state: &AppState) -> Result<bool, InfraError> {
    let settings = state.settings_store.get()?;
    state.apply_schedule(&settings)?;
    Ok(state.scheduler.has_timer())
}

pub async fn set_auto_sync_impl(state: &AppState, enabled: bool) -> Result<SyncStatusResponse, InfraError> {
    let settings = {
        let _gate = state.write_gate.lock().await;
        let mut settings = state.settings_store.get()?;
        settings.enabled = enabled;
        state.settings_store.save(&settings)?;
        settings
    };

    if enabled {
        state.apply_schedule(&settings)?;
        if settings.sources.is_empty() {
            state.set_status("No calendars configured");
        }
    } else {
        state.scheduler.stop();
    }
    state.log_info(
        "set_auto_sync",
        &format!("auto-sync {}", if enabled { "enabled" } else { "disabled" }),
    );
    sync_status_impl(state)
}

pub async fn set_sync_interval_impl(state: &AppState, minutes: i64) -> Result<u32, InfraError> {
    let interval_minutes = validate_interval(minutes)?;
    {
        let _gate = state.write_gate.lock().await;
        let mut settings = state.settings_store.get()?;
        settings.interval_minutes = interval_minutes;
        state.settings_store.save(&settings)?;
    }
    state.scheduler.reschedule(i64::from(interval_minutes))?;
    state.log_info(
        "set_sync_interval",
        &format!("sync interval set to {interval_minutes} minute(s)"),
    );
    Ok(interval_minutes)
}

pub fn list_events_impl(state: &AppState) -> Result<Vec<CalendarEvent>, InfraError> {
    state.event_store.get_all()
}

pub async fn add_event_impl(
    state: &AppState,
    name: String,
    date: String,
    event_type: Option<String>,
    recurring: Option<bool>,
) -> Result<CalendarEvent, InfraError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(InfraError::InvalidConfig("event name must not be empty".to_string()));
    }
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|error| InfraError::InvalidConfig(format!("invalid event date '{date}': {error}")))?;
    let event_type = match event_type.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        None => EventType::Other,
        Some(raw) => EventType::parse(raw)
            .ok_or_else(|| InfraError::InvalidConfig(format!("unknown event type '{raw}'")))?,
    };

    let event = CalendarEvent {
        id: next_id("evt"),
        event_type,
        date,
        name: name.to_string(),
        source: None,
        recurring,
    };
    {
        let _gate = state.write_gate.lock().await;
        state.event_store.insert(&event)?;
    }
    state.log_info("add_event", &format!("added event {}", event.id));
    Ok(event)
}

pub async fn delete_event_impl(state: &AppState, event_id: String) -> Result<bool, InfraError> {
    let removed = {
        let _gate = state.write_gate.lock().await;
        state.event_store.remove(&event_id)?
    };
    if removed {
        state.log_info("delete_event", &format!("deleted event {}", event_id.trim()));
    }
    Ok(removed)
}

pub fn sync_status_impl(state: &AppState) -> Result<SyncStatusResponse, InfraError> {
    let settings = state.settings_store.get()?;
    Ok(SyncStatusResponse {
        app_name: state.config.app_name.clone(),
        enabled: settings.enabled,
        interval_minutes: settings.interval_minutes,
        source_count: settings.sources.len(),
        last_sync: settings.last_sync.map(|instant| instant.to_rfc3339()),
        last_sync_description: describe_last_sync(
            settings.last_sync,
            Utc::now(),
            state.config.timezone,
        ),
        status_message: state.status_message(),
        timer_active: state.scheduler.has_timer(),
        pass_running: state.scheduler.is_pass_running(),
    })
}

pub fn describe_last_sync(last_sync: Option<DateTime<Utc>>, now: DateTime<Utc>, timezone: Tz) -> String {
    let Some(last_sync) = last_sync else {
        return "Never".to_string();
    };
    let minutes = (now - last_sync).num_minutes();
    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{minutes} minute(s) ago")
    } else if minutes < 24 * 60 {
        format!("{} hour(s) ago", minutes / 60)
    } else {
        last_sync
            .with_timezone(&timezone)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }
}

fn required_http_url(url: &str) -> Result<String, InfraError> {
    let url = url.trim();
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
            Ok(url.to_string())
        }
        _ => Err(InfraError::InvalidConfig(format!(
            "calendar url must be an absolute http:// or https:// link: '{url}'"
        ))),
    }
}
