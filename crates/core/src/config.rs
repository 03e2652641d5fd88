use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::http::HttpCatalogConfig;
use crate::coordinator::DEFAULT_POOL_SIZE;
use crate::inventory::{DEFAULT_EXTENSIONS, ScanFilter};
use crate::retry::{
    DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MS, RetryPolicy,
};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.setpush.invalid/v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub upload: UploadSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub scan: ScanSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub concurrency: usize,
    pub public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub include_hidden: bool,
    pub extensions: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_POOL_SIZE,
            public: false,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            include_hidden: false,
            extensions: default_extensions(),
        }
    }
}

impl Settings {
    pub fn catalog_config(&self) -> HttpCatalogConfig {
        HttpCatalogConfig {
            base_url: self.catalog.base_url.trim().to_string(),
            request_timeout: Duration::from_secs(self.catalog.request_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            include_hidden: self.scan.include_hidden,
            extensions: self
                .scan
                .extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
        message: format!("config read failed: {e}"),
    })?;
    let settings = parse_settings(&text)?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn parse_settings(text: &str) -> Result<Settings> {
    toml::from_str(text).map_err(|e| Error::InvalidConfig {
        message: format!("config invalid: {e}"),
    })
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.catalog.base_url.trim().is_empty() {
        return Err(Error::InvalidConfig {
            message: "catalog.base_url must not be empty".to_string(),
        });
    }
    if settings.catalog.request_timeout_secs == 0 {
        return Err(Error::InvalidConfig {
            message: "catalog.request_timeout_secs must be >= 1".to_string(),
        });
    }
    if settings.retry.max_attempts == 0 {
        return Err(Error::InvalidConfig {
            message: "retry.max_attempts must be >= 1".to_string(),
        });
    }
    if settings.retry.initial_backoff_ms > settings.retry.max_backoff_ms {
        return Err(Error::InvalidConfig {
            message: "retry.initial_backoff_ms must be <= retry.max_backoff_ms".to_string(),
        });
    }
    if settings
        .scan
        .extensions
        .iter()
        .any(|e| e.trim().trim_start_matches('.').is_empty())
    {
        return Err(Error::InvalidConfig {
            message: "scan.extensions[] must not be blank".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let s = parse_settings("").unwrap();
        validate_settings(&s).unwrap();
        assert_eq!(s.upload.concurrency, DEFAULT_POOL_SIZE);
        assert_eq!(s.retry_policy(), RetryPolicy::default());
        assert_eq!(s.scan_filter().extensions.len(), DEFAULT_EXTENSIONS.len());
        assert!(!s.upload.public);
    }

    #[test]
    fn sections_override_defaults() {
        let input = r#"
[catalog]
base_url = "https://photos.example/api/"
request_timeout_secs = 30

[upload]
concurrency = 8
public = true

[retry]
max_attempts = 5
initial_backoff_ms = 10
max_backoff_ms = 100

[scan]
include_hidden = true
extensions = [".JPG", "heic"]
"#;
        let s = parse_settings(input).unwrap();
        validate_settings(&s).unwrap();
        assert_eq!(s.upload.concurrency, 8);
        assert!(s.upload.public);
        assert_eq!(s.catalog_config().request_timeout, Duration::from_secs(30));
        assert_eq!(s.retry_policy().attempts(), 5);
        let filter = s.scan_filter();
        assert!(filter.include_hidden);
        assert_eq!(filter.extensions, vec!["jpg", "heic"]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut s = Settings::default();
        s.retry.max_attempts = 0;
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.retry.initial_backoff_ms = 10_000;
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.catalog.base_url = "  ".to_string();
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.scan.extensions = vec![".".to_string()];
        assert!(validate_settings(&s).is_err());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let s = parse_settings("[catalog]\nbase_url = \"http://127.0.0.1:9000\"\n").unwrap();
        assert_eq!(s.catalog.request_timeout_secs, 120);
        assert_eq!(s.catalog_config().base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn zero_concurrency_is_accepted() {
        let s = parse_settings("[upload]\nconcurrency = 0\n").unwrap();
        validate_settings(&s).unwrap();
        assert_eq!(s.upload.concurrency, 0);
    }

    #[test]
    fn load_from_dir_handles_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let s = load_settings(temp.path()).unwrap();
        assert_eq!(s.catalog.base_url, DEFAULT_BASE_URL);

        std::fs::write(config_path(temp.path()), "[retry]\nmax_attempts = 0\n").unwrap();
        assert!(matches!(
            load_settings(temp.path()),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
