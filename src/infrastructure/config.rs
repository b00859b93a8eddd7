use crate::infrastructure::error::InfraError;
use crate::infrastructure::source_resolver::{
    default_relays, RelayEndpoint, DEFAULT_FETCH_TIMEOUT_SECONDS, URL_PLACEHOLDER,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;
const DEFAULT_APP_NAME: &str = "PomBlock";
const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_relays")]
    pub relays: Vec<RelayEndpoint>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_FETCH_TIMEOUT_SECONDS,
            relays: default_relays(),
        }
    }
}

impl FeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_seconds == 0 {
            return Err("feed.timeoutSeconds must be >= 1".to_string());
        }
        if self.relays.is_empty() {
            return Err("feed.relays must not be empty".to_string());
        }
        for relay in &self.relays {
            if !relay.template.contains(URL_PLACEHOLDER) {
                return Err(format!(
                    "feed.relays[].template must contain {URL_PLACEHOLDER}: {}",
                    relay.template
                ));
            }
        }
        Ok(())
    }
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECONDS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppConfigFile {
    schema: u64,
    #[serde(default)]
    app_name: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    feed: FeedConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub app_name: String,
    pub timezone: Tz,
    pub feed: FeedConfig,
}

fn default_app_json() -> serde_json::Value {
    serde_json::json!({
        "schema": SUPPORTED_SCHEMA,
        "appName": DEFAULT_APP_NAME,
        "timezone": DEFAULT_TIMEZONE,
        "feed": FeedConfig::default(),
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let file: AppConfigFile = serde_json::from_value(read_config(&path)?)?;

    let app_name = file
        .app_name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_APP_NAME)
        .to_string();
    let timezone_raw = file
        .timezone
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_TIMEZONE);
    let timezone = timezone_raw.parse::<Tz>().map_err(|error| {
        InfraError::InvalidConfig(format!(
            "invalid timezone '{timezone_raw}' in {}: {error}",
            path.display()
        ))
    })?;
    file.feed
        .validate()
        .map_err(|message| InfraError::InvalidConfig(format!("{message} in {}", path.display())))?;

    Ok(AppConfig {
        app_name,
        timezone,
        feed: file.feed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::source_resolver::RelayUnwrap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_CONFIG_DIR: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "pomblock-config-tests-{}-{}",
                std::process::id(),
                NEXT_CONFIG_DIR.fetch_add(1, Ordering::Relaxed)
            ));
            fs::create_dir_all(&path).expect("create config dir");
            Self { path }
        }

        fn write(&self, value: serde_json::Value) {
            fs::write(self.path.join(APP_JSON), value.to_string()).expect("write app.json");
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn default_config_is_created_and_loads() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");

        let config = load_app_config(&dir.path).expect("load config");

        assert_eq!(config.app_name, "PomBlock");
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.feed.timeout(), Duration::from_secs(15));
        assert_eq!(config.feed.relays.len(), 3);
        assert_eq!(config.feed.relays[0].unwrap, RelayUnwrap::Envelope);
    }

    #[test]
    fn existing_config_is_not_overwritten() {
        let dir = TempConfigDir::new();
        dir.write(serde_json::json!({ "schema": 1, "appName": "Mine", "timezone": "Asia/Tokyo" }));
        ensure_default_configs(&dir.path).expect("ensure defaults");

        let config = load_app_config(&dir.path).expect("load config");

        assert_eq!(config.app_name, "Mine");
        assert_eq!(config.timezone, chrono_tz::Asia::Tokyo);
        assert_eq!(config.feed, FeedConfig::default());
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        dir.write(serde_json::json!({ "schema": 2 }));
        assert!(matches!(
            load_app_config(&dir.path),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unknown_timezone_and_bad_relays_are_rejected() {
        let dir = TempConfigDir::new();
        dir.write(serde_json::json!({ "schema": 1, "timezone": "Mars/Olympus" }));
        assert!(matches!(
            load_app_config(&dir.path),
            Err(InfraError::InvalidConfig(_))
        ));

        dir.write(serde_json::json!({
            "schema": 1,
            "feed": { "relays": [{ "template": "https://relay.example/", "unwrap": "raw" }] }
        }));
        assert!(matches!(
            load_app_config(&dir.path),
            Err(InfraError::InvalidConfig(_))
        ));
    }
}
