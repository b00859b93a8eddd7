use crate::domain::models::{next_id, CalendarEvent, DedupKey, DraftEvent, EXTERNAL_SYNC_SOURCE};
use crate::infrastructure::command_log::{CommandLog, NoopCommandLog};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_store::EventStore;
use crate::infrastructure::ics_decoder::decode_feed;
use crate::infrastructure::settings_store::SettingsStore;
use crate::infrastructure::source_resolver::FeedFetcher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;
pub type WriteGate = Arc<AsyncMutex<()>>;

const LOG_SCOPE: &str = "sync";
pub const NO_EVENTS_FOUND: &str = "No events found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub source_count: usize,
    pub succeeded: Vec<String>,
    pub errors: Vec<SourceFailure>,
    pub completed_at: DateTime<Utc>,
}

impl SyncSummary {
    pub fn status_message(&self) -> String {
        if self.source_count == 0 {
            return "No calendars configured".to_string();
        }
        if !self.succeeded.is_empty() {
            let mut message = format!(
                "Synced {} new event(s) from {} calendar(s)",
                self.added,
                self.succeeded.len()
            );
            if !self.errors.is_empty() {
                message.push_str(&format!(" ({} error(s))", self.errors.len()));
            }
            return message;
        }
        if self.errors.is_empty() {
            return "No new events found".to_string();
        }
        let details = self
            .errors
            .iter()
            .map(|failure| format!("{}: {}", failure.source_name, failure.message))
            .collect::<Vec<_>>()
            .join("; ");
        format!("Errors: {details}")
    }
}

#[async_trait]
pub trait SyncPass: Send + Sync {
    async fn run_pass(&self) -> Result<SyncSummary, InfraError>;
}

pub struct SyncOrchestrator<F, E, S>
where
    F: FeedFetcher + ?Sized,
    E: EventStore,
    S: SettingsStore,
{
    fetcher: Arc<F>,
    event_store: Arc<E>,
    settings_store: Arc<S>,
    write_gate: WriteGate,
    now_provider: NowProvider,
    id_generator: IdGenerator,
    log: Arc<dyn CommandLog>,
}

impl<F, E, S> SyncOrchestrator<F, E, S>
where
    F: FeedFetcher + ?Sized,
    E: EventStore,
    S: SettingsStore,
{
    pub fn new(fetcher: Arc<F>, event_store: Arc<E>, settings_store: Arc<S>) -> Self {
        Self {
            fetcher,
            event_store,
            settings_store,
            write_gate: Arc::new(AsyncMutex::new(())),
            now_provider: Arc::new(Utc::now),
            id_generator: Arc::new(|| next_id("evt")),
            log: Arc::new(NoopCommandLog),
        }
    }

    pub fn with_write_gate(mut self, write_gate: WriteGate) -> Self {
        self.write_gate = write_gate;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_id_generator(mut self, id_generator: IdGenerator) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_log(mut self, log: Arc<dyn CommandLog>) -> Self {
        self.log = log;
        self
    }

    /// Fetches every configured source in order, merges new events into the
    /// store and records the pass time. Per-source failures end up in the
    /// summary; only store failures are returned as errors.
    pub async fn sync_all(&self) -> Result<SyncSummary, InfraError> {
        let sources = self.settings_store.get()?.sources;
        let mut drafts = Vec::new();
        let mut succeeded = Vec::new();
        let mut errors = Vec::new();

        for source in &sources {
            match self.fetch_source(&source.url).await {
                Ok(mut decoded) => {
                    self.log.info(
                        LOG_SCOPE,
                        &format!("{}: decoded {} event(s)", source.name, decoded.len()),
                    );
                    drafts.append(&mut decoded);
                    succeeded.push(source.name.clone());
                }
                Err(message) => {
                    self.log
                        .error(LOG_SCOPE, &format!("{}: {message}", source.name));
                    errors.push(SourceFailure {
                        source_name: source.name.clone(),
                        message,
                    });
                }
            }
        }

        let _gate = self.write_gate.lock().await;
        let committed = self.commit(drafts);
        let completed_at = (self.now_provider)();
        let mut settings = self.settings_store.get()?;
        settings.last_sync = Some(completed_at);
        self.settings_store.save(&settings)?;
        let added = committed?;

        let summary = SyncSummary {
            added,
            source_count: sources.len(),
            succeeded,
            errors,
            completed_at,
        };
        self.log.info(LOG_SCOPE, &summary.status_message());
        Ok(summary)
    }

    async fn fetch_source(&self, url: &str) -> Result<Vec<DraftEvent>, String> {
        let content = self
            .fetcher
            .fetch_feed(url)
            .await
            .map_err(|error| error.to_string())?;
        let drafts = decode_feed(&content);
        if drafts.is_empty() {
            return Err(NO_EVENTS_FOUND.to_string());
        }
        Ok(drafts)
    }

    fn commit(&self, drafts: Vec<DraftEvent>) -> Result<usize, InfraError> {
        if drafts.is_empty() {
            return Ok(0);
        }
        let existing = self.event_store.get_all()?;
        let fresh = merge_drafts(&existing, drafts, || (self.id_generator)());
        self.event_store.append_all(&fresh)?;
        Ok(fresh.len())
    }
}

#[async_trait]
impl<F, E, S> SyncPass for SyncOrchestrator<F, E, S>
where
    F: FeedFetcher + ?Sized,
    E: EventStore,
    S: SettingsStore,
{
    async fn run_pass(&self) -> Result<SyncSummary, InfraError> {
        self.sync_all().await
    }
}

pub fn merge_drafts(
    existing: &[CalendarEvent],
    drafts: Vec<DraftEvent>,
    mut next_id: impl FnMut() -> String,
) -> Vec<CalendarEvent> {
    let mut keys: HashSet<DedupKey> = existing.iter().map(CalendarEvent::dedup_key).collect();
    drafts
        .into_iter()
        .filter(|draft| keys.insert(draft.dedup_key()))
        .map(|draft| draft.into_event(next_id(), Some(EXTERNAL_SYNC_SOURCE)))
        .collect()
}
