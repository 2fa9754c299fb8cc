//! Configuration module
//!
//! Settings for the ingestion service: database, storage layout, external tools and
//! the task queue. Values come from the environment (optionally a `.env` file) with
//! defaults for everything except the database URL.

use std::env;
use std::str::FromStr;

use crate::constants::{DEFAULT_THUMBNAIL_OFFSET_SECONDS, DEFAULT_THUMBNAIL_QUALITY};
use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const TASK_QUEUE_MAX_WORKERS: usize = 4;
const TASK_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const TASK_QUEUE_PROMOTION_RATE_LIMIT: f64 = 5.0;
const TASK_QUEUE_TOOL_RATE_LIMIT: f64 = 2.0;
const STALE_TASK_REAP_INTERVAL_SECS: u64 = 60;
const STALE_TASK_GRACE_PERIOD_SECS: i64 = 300;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Ingestion service configuration
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub environment: String,
    pub log_format: LogFormat,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub storage_backend: StorageBackend,
    pub local_storage_path: String,
    pub temp_folder: String,
    pub video_folder: String,
    pub thumbnail_folder: String,
    pub slider_folder: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub thumbnail_offset_seconds: f64,
    pub thumbnail_quality: u8,
    pub auto_activate_videos: bool,
    pub task_queue_max_workers: usize,
    pub task_queue_poll_interval_ms: u64,
    pub task_queue_promotion_rate_limit: f64,
    pub task_queue_tool_rate_limit: f64,
    /// Interval in seconds between runs of the stale task reaper. 0 = disabled.
    pub task_queue_stale_task_reap_interval_secs: u64,
    /// Grace period in seconds added to task timeout before reaping stale running tasks.
    pub task_queue_stale_task_grace_period_secs: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_format: LogFormat::Text,
            database_url: String::new(),
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            storage_backend: StorageBackend::Local,
            local_storage_path: "./storage".to_string(),
            temp_folder: "tmp".to_string(),
            video_folder: "videos".to_string(),
            thumbnail_folder: "thumbnails".to_string(),
            slider_folder: "sliders".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            thumbnail_offset_seconds: DEFAULT_THUMBNAIL_OFFSET_SECONDS,
            thumbnail_quality: DEFAULT_THUMBNAIL_QUALITY,
            auto_activate_videos: false,
            task_queue_max_workers: TASK_QUEUE_MAX_WORKERS,
            task_queue_poll_interval_ms: TASK_QUEUE_POLL_INTERVAL_MS,
            task_queue_promotion_rate_limit: TASK_QUEUE_PROMOTION_RATE_LIMIT,
            task_queue_tool_rate_limit: TASK_QUEUE_TOOL_RATE_LIMIT,
            task_queue_stale_task_reap_interval_secs: STALE_TASK_REAP_INTERVAL_SECS,
            task_queue_stale_task_grace_period_secs: STALE_TASK_GRACE_PERIOD_SECS,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable numeric values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or(defaults.environment);

        let log_format = match lookup("LOG_FORMAT") {
            Some(v) => v.parse()?,
            None => defaults.log_format,
        };

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let storage_backend = match lookup("STORAGE_BACKEND") {
            Some(v) => v.parse()?,
            None => defaults.storage_backend,
        };

        Ok(Self {
            environment,
            log_format,
            database_url,
            db_max_connections: parse_or(
                lookup("DB_MAX_CONNECTIONS"),
                defaults.db_max_connections,
            ),
            db_timeout_seconds: parse_or(
                lookup("DB_TIMEOUT_SECONDS"),
                defaults.db_timeout_seconds,
            ),
            storage_backend,
            local_storage_path: lookup("LOCAL_STORAGE_PATH")
                .unwrap_or(defaults.local_storage_path),
            temp_folder: lookup("TEMP_FOLDER").unwrap_or(defaults.temp_folder),
            video_folder: lookup("VIDEO_FOLDER").unwrap_or(defaults.video_folder),
            thumbnail_folder: lookup("THUMBNAIL_FOLDER").unwrap_or(defaults.thumbnail_folder),
            slider_folder: lookup("SLIDER_FOLDER").unwrap_or(defaults.slider_folder),
            ffmpeg_path: lookup("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: lookup("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            thumbnail_offset_seconds: parse_or(
                lookup("THUMBNAIL_OFFSET_SECONDS"),
                defaults.thumbnail_offset_seconds,
            ),
            thumbnail_quality: parse_or(lookup("THUMBNAIL_QUALITY"), defaults.thumbnail_quality),
            auto_activate_videos: parse_or(
                lookup("AUTO_ACTIVATE_VIDEOS"),
                defaults.auto_activate_videos,
            ),
            task_queue_max_workers: parse_or(
                lookup("TASK_QUEUE_MAX_WORKERS"),
                defaults.task_queue_max_workers,
            ),
            task_queue_poll_interval_ms: parse_or(
                lookup("TASK_QUEUE_POLL_INTERVAL_MS"),
                defaults.task_queue_poll_interval_ms,
            ),
            task_queue_promotion_rate_limit: parse_or(
                lookup("TASK_QUEUE_PROMOTION_RATE_LIMIT"),
                defaults.task_queue_promotion_rate_limit,
            ),
            task_queue_tool_rate_limit: parse_or(
                lookup("TASK_QUEUE_TOOL_RATE_LIMIT"),
                defaults.task_queue_tool_rate_limit,
            ),
            task_queue_stale_task_reap_interval_secs: parse_or(
                lookup("TASK_QUEUE_STALE_TASK_REAP_INTERVAL_SECS"),
                defaults.task_queue_stale_task_reap_interval_secs,
            ),
            task_queue_stale_task_grace_period_secs: parse_or(
                lookup("TASK_QUEUE_STALE_TASK_GRACE_PERIOD_SECS"),
                defaults.task_queue_stale_task_grace_period_secs,
            ),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.database_url.trim().is_empty() {
            return Err(anyhow::anyhow!("DATABASE_URL must not be empty"));
        }

        if self.thumbnail_offset_seconds.is_nan() || self.thumbnail_offset_seconds <= 0.0 {
            return Err(anyhow::anyhow!(
                "THUMBNAIL_OFFSET_SECONDS must be positive, got {}",
                self.thumbnail_offset_seconds
            ));
        }

        if !(1..=31).contains(&self.thumbnail_quality) {
            return Err(anyhow::anyhow!(
                "THUMBNAIL_QUALITY must be between 1 and 31, got {}",
                self.thumbnail_quality
            ));
        }

        if self.task_queue_max_workers == 0 {
            return Err(anyhow::anyhow!("TASK_QUEUE_MAX_WORKERS must be at least 1"));
        }

        if self.local_storage_path.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "LOCAL_STORAGE_PATH must be set when using local storage backend"
            ));
        }

        for (key, folder) in [
            ("TEMP_FOLDER", &self.temp_folder),
            ("VIDEO_FOLDER", &self.video_folder),
            ("THUMBNAIL_FOLDER", &self.thumbnail_folder),
            ("SLIDER_FOLDER", &self.slider_folder),
        ] {
            if folder.is_empty() || folder.starts_with('/') || folder.contains("..") {
                return Err(anyhow::anyhow!(
                    "{} must be a relative folder name without '..', got '{}'",
                    key,
                    folder
                ));
            }
        }

        Ok(())
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<IngestConfig>);

impl Config {
    fn as_ingest(&self) -> &IngestConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = IngestConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_ingest().validate()
    }

    pub fn is_production(&self) -> bool {
        let environment = self.as_ingest().environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn environment(&self) -> &str {
        &self.as_ingest().environment
    }

    pub fn log_format(&self) -> LogFormat {
        self.as_ingest().log_format
    }

    pub fn database_url(&self) -> &str {
        &self.as_ingest().database_url
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_ingest().db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_ingest().db_timeout_seconds
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_ingest().storage_backend
    }

    pub fn local_storage_path(&self) -> &str {
        &self.as_ingest().local_storage_path
    }

    pub fn temp_folder(&self) -> &str {
        &self.as_ingest().temp_folder
    }

    pub fn video_folder(&self) -> &str {
        &self.as_ingest().video_folder
    }

    pub fn thumbnail_folder(&self) -> &str {
        &self.as_ingest().thumbnail_folder
    }

    pub fn slider_folder(&self) -> &str {
        &self.as_ingest().slider_folder
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.as_ingest().ffmpeg_path
    }

    pub fn ffprobe_path(&self) -> &str {
        &self.as_ingest().ffprobe_path
    }

    pub fn thumbnail_offset_seconds(&self) -> f64 {
        self.as_ingest().thumbnail_offset_seconds
    }

    pub fn thumbnail_quality(&self) -> u8 {
        self.as_ingest().thumbnail_quality
    }

    pub fn auto_activate_videos(&self) -> bool {
        self.as_ingest().auto_activate_videos
    }

    pub fn task_queue_max_workers(&self) -> usize {
        self.as_ingest().task_queue_max_workers
    }

    pub fn task_queue_poll_interval_ms(&self) -> u64 {
        self.as_ingest().task_queue_poll_interval_ms
    }

    pub fn task_queue_promotion_rate_limit(&self) -> f64 {
        self.as_ingest().task_queue_promotion_rate_limit
    }

    pub fn task_queue_tool_rate_limit(&self) -> f64 {
        self.as_ingest().task_queue_tool_rate_limit
    }

    pub fn task_queue_stale_task_reap_interval_secs(&self) -> u64 {
        self.as_ingest().task_queue_stale_task_reap_interval_secs
    }

    pub fn task_queue_stale_task_grace_period_secs(&self) -> i64 {
        self.as_ingest().task_queue_stale_task_grace_period_secs
    }
}

impl From<IngestConfig> for Config {
    fn from(config: IngestConfig) -> Self {
        Config(Box::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid() -> IngestConfig {
        IngestConfig {
            database_url: "postgresql://localhost/vidora".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = IngestConfig::from_lookup(lookup_from(&[(
            "DATABASE_URL",
            "postgresql://localhost/vidora",
        )]))
        .unwrap();
        assert_eq!(config.temp_folder, "tmp");
        assert_eq!(config.video_folder, "videos");
        assert_eq!(config.thumbnail_quality, 2);
        assert_eq!(config.thumbnail_offset_seconds, 2.0);
        assert!(!config.auto_activate_videos);
        assert_eq!(config.task_queue_max_workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(IngestConfig::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = IngestConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgresql://db/vidora"),
            ("LOG_FORMAT", "json"),
            ("THUMBNAIL_QUALITY", "5"),
            ("AUTO_ACTIVATE_VIDEOS", "true"),
            ("TASK_QUEUE_MAX_WORKERS", "not-a-number"),
        ]))
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.thumbnail_quality, 5);
        assert!(config.auto_activate_videos);
        assert_eq!(config.task_queue_max_workers, 4);
    }

    #[test]
    fn unknown_storage_backend_is_rejected() {
        let result = IngestConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgresql://db/vidora"),
            ("STORAGE_BACKEND", "s3"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = valid();
        config.thumbnail_quality = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.thumbnail_offset_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.task_queue_max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.video_folder = "../outside".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.thumbnail_folder = "/abs".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.database_url = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn production_detection() {
        let mut inner = valid();
        inner.environment = "Production".to_string();
        let config = Config::from(inner);
        assert!(config.is_production());
        assert_eq!(config.video_folder(), "videos");
    }
}
