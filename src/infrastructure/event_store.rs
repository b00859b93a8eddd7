use crate::domain::models::{CalendarEvent, EventType};
use crate::infrastructure::error::InfraError;
use chrono::NaiveDate;
use rusqlite::{params, Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait EventStore: Send + Sync {
    fn get_all(&self) -> Result<Vec<CalendarEvent>, InfraError>;
    fn append_all(&self, events: &[CalendarEvent]) -> Result<(), InfraError>;
    fn replace_all(&self, events: &[CalendarEvent]) -> Result<(), InfraError>;
    fn insert(&self, event: &CalendarEvent) -> Result<(), InfraError> {
        self.append_all(std::slice::from_ref(event))
    }
    fn remove(&self, event_id: &str) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    db_path: PathBuf,
}

impl SqliteEventStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    fn insert_rows(transaction: &Transaction<'_>, events: &[CalendarEvent]) -> Result<(), InfraError> {
        let mut statement = transaction.prepare(
            "INSERT INTO calendar_events (id, event_type, date, name, source, recurring)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for event in events {
            event.validate().map_err(InfraError::InvalidConfig)?;
            statement.execute(params![
                event.id,
                event.event_type.as_str(),
                event.date.format("%Y-%m-%d").to_string(),
                event.name,
                event.source,
                event.recurring,
            ])?;
        }
        Ok(())
    }
}

impl EventStore for SqliteEventStore {
    fn get_all(&self) -> Result<Vec<CalendarEvent>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, event_type, date, name, source, recurring
             FROM calendar_events
             ORDER BY rowid ASC",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<bool>>(5)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, event_type_raw, date_raw, name, source, recurring) = row?;
            let event_type = EventType::parse(&event_type_raw).ok_or_else(|| {
                InfraError::InvalidConfig(format!(
                    "invalid calendar_events.event_type '{event_type_raw}' for {id}"
                ))
            })?;
            let date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d").map_err(|error| {
                InfraError::InvalidConfig(format!(
                    "invalid calendar_events.date '{date_raw}' for {id}: {error}"
                ))
            })?;
            events.push(CalendarEvent {
                id,
                event_type,
                date,
                name,
                source,
                recurring,
            });
        }
        Ok(events)
    }

    fn append_all(&self, events: &[CalendarEvent]) -> Result<(), InfraError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        Self::insert_rows(&transaction, events)?;
        transaction.commit()?;
        Ok(())
    }

    fn replace_all(&self, events: &[CalendarEvent]) -> Result<(), InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        transaction.execute("DELETE FROM calendar_events", [])?;
        Self::insert_rows(&transaction, events)?;
        transaction.commit()?;
        Ok(())
    }

    fn remove(&self, event_id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute(
            "DELETE FROM calendar_events WHERE id = ?1",
            params![event_id.trim()],
        )?;
        Ok(removed > 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Mutex<Vec<CalendarEvent>>,
}

impl InMemoryEventStore {
    pub fn with_events(events: Vec<CalendarEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<CalendarEvent>>, InfraError> {
        self.events
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("event store lock poisoned: {error}")))
    }

    fn check_batch(existing: &[CalendarEvent], incoming: &[CalendarEvent]) -> Result<(), InfraError> {
        let mut ids = existing
            .iter()
            .map(|event| event.id.as_str())
            .collect::<std::collections::HashSet<_>>();
        for event in incoming {
            event.validate().map_err(InfraError::InvalidConfig)?;
            if !ids.insert(event.id.as_str()) {
                return Err(InfraError::InvalidConfig(format!(
                    "duplicate event id: {}",
                    event.id
                )));
            }
        }
        Ok(())
    }
}

impl EventStore for InMemoryEventStore {
    fn get_all(&self) -> Result<Vec<CalendarEvent>, InfraError> {
        Ok(self.lock()?.clone())
    }

    fn append_all(&self, events: &[CalendarEvent]) -> Result<(), InfraError> {
        let mut stored = self.lock()?;
        Self::check_batch(&stored, events)?;
        stored.extend_from_slice(events);
        Ok(())
    }

    fn replace_all(&self, events: &[CalendarEvent]) -> Result<(), InfraError> {
        let mut stored = self.lock()?;
        Self::check_batch(&[], events)?;
        *stored = events.to_vec();
        Ok(())
    }

    fn remove(&self, event_id: &str) -> Result<bool, InfraError> {
        let mut stored = self.lock()?;
        let before = stored.len();
        stored.retain(|event| event.id != event_id.trim());
        Ok(stored.len() != before)
    }
}
