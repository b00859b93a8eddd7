use crate::domain::models::SyncSettings;
use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SettingsStore: Send + Sync {
    fn get(&self) -> Result<SyncSettings, InfraError>;
    fn save(&self, settings: &SyncSettings) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSettingsStore {
    db_path: PathBuf,
}

impl SqliteSettingsStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn get(&self) -> Result<SyncSettings, InfraError> {
        let connection = self.connect()?;
        let payload: Option<String> = connection
            .query_row("SELECT payload FROM sync_settings WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        let Some(payload) = payload else {
            return Ok(SyncSettings::default());
        };
        let settings: SyncSettings = serde_json::from_str(&payload)?;
        settings
            .validate()
            .map_err(|message| InfraError::InvalidConfig(format!("invalid sync_settings: {message}")))?;
        Ok(settings)
    }

    fn save(&self, settings: &SyncSettings) -> Result<(), InfraError> {
        settings.validate().map_err(InfraError::InvalidConfig)?;
        let payload = serde_json::to_string(settings)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO sync_settings (id, payload, updated_at)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            params![payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    settings: Mutex<Option<SyncSettings>>,
}

impl InMemorySettingsStore {
    pub fn with_settings(settings: SyncSettings) -> Self {
        Self {
            settings: Mutex::new(Some(settings)),
        }
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn get(&self) -> Result<SyncSettings, InfraError> {
        let settings = self
            .settings
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("settings lock poisoned: {error}")))?;
        Ok(settings.clone().unwrap_or_default())
    }

    fn save(&self, settings: &SyncSettings) -> Result<(), InfraError> {
        settings.validate().map_err(InfraError::InvalidConfig)?;
        let mut stored = self
            .settings
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("settings lock poisoned: {error}")))?;
        *stored = Some(settings.clone());
        Ok(())
    }
}
