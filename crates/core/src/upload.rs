use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::coordinator::{
    CoordinatorConfig, DEFAULT_POOL_SIZE, SetContext, UploadOptions, run_work_items,
};
use crate::inventory::{ScanFilter, scan_directory};
use crate::plan::plan_uploads;
use crate::progress::UploadProgress;
use crate::remote_state::resolve_remote_state;
use crate::report::RunReport;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub source_path: PathBuf,
    /// Defaults to the directory's base name.
    pub set_name: Option<String>,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub scan: ScanFilter,
    pub pool_size: usize,
    pub retry: RetryPolicy,
}

impl UploadConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            set_name: None,
            tags: Vec::new(),
            is_public: false,
            scan: ScanFilter::default(),
            pool_size: DEFAULT_POOL_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn resolved_set_name(&self) -> Result<String> {
        let name = match &self.set_name {
            Some(name) => name.trim().to_string(),
            None => default_set_name(&self.source_path)?,
        };
        if name.is_empty() {
            return Err(Error::InvalidConfig {
                message: "set name must not be empty".to_string(),
            });
        }
        Ok(name)
    }
}

/// Splits a space-delimited tag string, collapsing repeated whitespace.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Base name of `dir`; `.`, `..` and trailing separators resolve through the
/// canonical path.
pub fn default_set_name(dir: &Path) -> Result<String> {
    let base = match dir.file_name() {
        Some(name) if name != "." && name != ".." => PathBuf::from(name),
        _ => {
            let canonical = std::fs::canonicalize(dir).map_err(|_| Error::NotADirectory {
                path: dir.to_path_buf(),
            })?;
            canonical
                .file_name()
                .map(PathBuf::from)
                .ok_or_else(|| Error::InvalidConfig {
                    message: format!("cannot derive a set name from {}", dir.display()),
                })?
        }
    };
    base.to_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| Error::NonUtf8Path { path: base.clone() })
}

pub async fn run_upload<C>(catalog: Arc<C>, config: UploadConfig) -> Result<RunReport>
where
    C: Catalog + ?Sized + 'static,
{
    run_upload_with(catalog, config, UploadOptions::default()).await
}

/// Scan, resolve remote state, plan, then coordinate the uploads.
///
/// Pre-flight failures (bad directory, nothing to upload, unreachable
/// catalog) return `Err` before any upload starts. Per-item failures are
/// carried in the returned report instead.
pub async fn run_upload_with<C>(
    catalog: Arc<C>,
    config: UploadConfig,
    options: UploadOptions<'_>,
) -> Result<RunReport>
where
    C: Catalog + ?Sized + 'static,
{
    let set_name = config.resolved_set_name()?;
    info!(
        event = "run.start",
        provider = catalog.provider(),
        source_path = %config.source_path.display(),
        set_name = %set_name,
        pool_size = config.pool_size,
        "run.start"
    );

    let scan_started = Instant::now();
    debug!(event = "phase.start", phase = "scan", "phase.start");
    let inventory = scan_directory(&config.source_path, &config.scan)?;
    debug!(
        event = "phase.finish",
        phase = "scan",
        duration_ms = scan_started.elapsed().as_millis() as u64,
        files_total = inventory.len() as u64,
        bytes_total = inventory.total_bytes(),
        "phase.finish"
    );

    if let Some(sink) = options.progress {
        sink.on_progress(UploadProgress {
            phase: "scan".to_string(),
            files_total: Some(inventory.len() as u64),
            bytes_total: Some(inventory.total_bytes()),
            ..UploadProgress::default()
        });
    }

    let remote = resolve_remote_state(catalog.as_ref(), &set_name).await?;
    let plan = plan_uploads(&inventory, remote.assets());
    for name in &plan.skipped {
        debug!(
            event = "plan.skip",
            file = %name,
            set_name = %set_name,
            "plan.skip"
        );
    }
    info!(
        event = "plan.ready",
        set_present = remote.set_id().is_some(),
        to_upload = plan.items.len() as u64,
        skipped = plan.skipped_count(),
        "{} to upload, {} already in set {set_name}",
        plan.items.len(),
        plan.skipped_count()
    );

    if let Some(sink) = options.progress {
        sink.on_progress(UploadProgress {
            phase: "plan".to_string(),
            files_total: Some(plan.items.len() as u64),
            files_done: Some(0),
            files_skipped: Some(plan.skipped_count()),
            files_failed: Some(0),
            bytes_total: Some(plan.bytes_planned()),
            bytes_uploaded: Some(0),
        });
    }

    let set = Arc::new(SetContext::from_state(
        set_name,
        config.tags.clone(),
        &remote,
    ));
    let report = run_work_items(
        catalog,
        plan,
        set,
        CoordinatorConfig {
            pool_size: config.pool_size,
            retry: config.retry.clone(),
            is_public: config.is_public,
        },
        options,
    )
    .await;

    if report.is_success() {
        info!(
            event = "run.finish",
            status = "succeeded",
            succeeded = report.succeeded,
            skipped = report.skipped,
            "run.finish"
        );
    } else {
        warn!(
            event = "run.finish",
            status = "failed",
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed_count(),
            not_attempted = report.not_attempted.len() as u64,
            "finished with {} errors",
            report.failed_count()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_collapse_whitespace() {
        assert_eq!(parse_tags("  trip   2024\tfamily "), vec!["trip", "2024", "family"]);
        assert!(parse_tags("   ").is_empty());
    }

    #[test]
    fn set_name_defaults_to_base_name() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("Summer 2024");
        std::fs::create_dir_all(&dir).unwrap();

        let mut cfg = UploadConfig::new(format!("{}/", dir.display()));
        assert_eq!(cfg.resolved_set_name().unwrap(), "Summer 2024");

        cfg.set_name = Some("  Holidays ".to_string());
        assert_eq!(cfg.resolved_set_name().unwrap(), "Holidays");

        cfg.set_name = Some("   ".to_string());
        assert!(matches!(
            cfg.resolved_set_name(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn dot_resolves_through_canonical_path() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("album");
        std::fs::create_dir_all(&dir).unwrap();
        assert_eq!(default_set_name(&dir.join(".")).unwrap(), "album");
    }
}
