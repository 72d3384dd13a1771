use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::suppression::SuppressionPolicy;

const DEFAULT_DB_PATH: &str = "logs/detection.db";
const DEFAULT_NOTIFY_THRESHOLD: f64 = 0.75;
const DEFAULT_SUPPRESSION_MINUTES: u64 = 5;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOCK_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const DEFAULT_NOTIFY_CLASSES: &[&str] = &["chige", "motsu"];

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    db_path: Option<String>,
    lock_timeout_ms: Option<u64>,
    model: Option<ModelConfigFile>,
    suppression: Option<SuppressionConfigFile>,
    notification: Option<NotificationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SuppressionConfigFile {
    threshold: Option<f64>,
    minutes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct NotificationConfigFile {
    enabled: Option<bool>,
    classes: Option<Vec<String>>,
    lock_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

/// Validated configuration, built once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub store: StoreSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub db_path: String,
    /// Bounded wait for the exclusive write lock.
    pub lock_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Minimum confidence for a detection to be considered for notification at all.
    pub notify_threshold: f64,
    pub suppression: SuppressionPolicy,
    pub notify_classes: Vec<String>,
    pub notification_enabled: bool,
    pub lock_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

impl StoreSettings {
    pub fn at(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            notify_threshold: DEFAULT_NOTIFY_THRESHOLD,
            suppression: SuppressionPolicy::new(
                DEFAULT_NOTIFY_THRESHOLD,
                Duration::from_secs(DEFAULT_SUPPRESSION_MINUTES * 60),
            ),
            notify_classes: DEFAULT_NOTIFY_CLASSES
                .iter()
                .map(|class| class.to_string())
                .collect(),
            notification_enabled: true,
            lock_retries: DEFAULT_LOCK_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl DetectionConfig {
    /// File named by `DETECTION_CONFIG` (if any), then `DETECTION_*` overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECTION_CONFIG").ok();
        let mut file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => DetectionConfigFile::default(),
        };
        file_cfg.apply_env()?;
        let cfg = Self::from_file(file_cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads a config file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectionConfigFile) -> Self {
        let store = StoreSettings {
            db_path: file
                .db_path
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            lock_timeout: Duration::from_millis(
                file.lock_timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS),
            ),
        };

        let notify_threshold = file
            .model
            .and_then(|model| model.threshold)
            .unwrap_or(DEFAULT_NOTIFY_THRESHOLD);
        let suppression_threshold = file
            .suppression
            .as_ref()
            .and_then(|s| s.threshold)
            .unwrap_or(notify_threshold);
        let suppression_minutes = file
            .suppression
            .and_then(|s| s.minutes)
            .unwrap_or(DEFAULT_SUPPRESSION_MINUTES);

        let notification = file.notification.unwrap_or_default();
        let pipeline = PipelineSettings {
            notify_threshold,
            suppression: SuppressionPolicy::new(
                suppression_threshold,
                Duration::from_secs(suppression_minutes.saturating_mul(60)),
            ),
            notify_classes: notification.classes.unwrap_or_else(|| {
                DEFAULT_NOTIFY_CLASSES
                    .iter()
                    .map(|class| class.to_string())
                    .collect()
            }),
            notification_enabled: notification.enabled.unwrap_or(true),
            lock_retries: notification.lock_retries.unwrap_or(DEFAULT_LOCK_RETRIES),
            retry_backoff: Duration::from_millis(
                notification
                    .retry_backoff_ms
                    .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
        };

        Self { store, pipeline }
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.store.lock_timeout.is_zero() {
            return Err(anyhow!("lock timeout must be greater than zero"));
        }
        let threshold = self.pipeline.notify_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("model threshold must be within [0, 1], got {}", threshold));
        }
        self.pipeline
            .suppression
            .validate()
            .map_err(|e| anyhow!("invalid suppression settings: {}", e))?;
        Ok(())
    }
}

impl DetectionConfigFile {
    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("DETECTION_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = Some(path);
            }
        }
        if let Ok(threshold) = std::env::var("DETECTION_NOTIFY_THRESHOLD") {
            let value: f64 = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECTION_NOTIFY_THRESHOLD must be a number"))?;
            self.model.get_or_insert_with(Default::default).threshold = Some(value);
        }
        if let Ok(minutes) = std::env::var("DETECTION_SUPPRESSION_MINUTES") {
            let value: u64 = minutes.trim().parse().map_err(|_| {
                anyhow!("DETECTION_SUPPRESSION_MINUTES must be an integer number of minutes")
            })?;
            self.suppression.get_or_insert_with(Default::default).minutes = Some(value);
        }
        if let Ok(timeout) = std::env::var("DETECTION_LOCK_TIMEOUT_MS") {
            let value: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("DETECTION_LOCK_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.lock_timeout_ms = Some(value);
        }
        if let Ok(classes) = std::env::var("DETECTION_NOTIFY_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.notification.get_or_insert_with(Default::default).classes = Some(parsed);
            }
        }
        if let Ok(enabled) = std::env::var("DETECTION_NOTIFICATION_ENABLED") {
            let value = parse_bool(&enabled).ok_or_else(|| {
                anyhow!("DETECTION_NOTIFICATION_ENABLED must be true/false, got {:?}", enabled)
            })?;
            self.notification.get_or_insert_with(Default::default).enabled = Some(value);
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DetectionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Directory that will hold the database file, if it has one.
pub fn db_parent_dir(db_path: &str) -> Option<PathBuf> {
    if db_path == ":memory:" || db_path.starts_with("file:") {
        return None;
    }
    Path::new(db_path)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
