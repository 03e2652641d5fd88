//! Per-run NDJSON logging.
//!
//! One global subscriber is installed per process. Its JSON layer writes into
//! whichever run log file is currently open and drops events otherwise, so
//! library code can log freely before or after a run.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "SETPUSH_LOG";
pub const LOG_DIR_ENV: &str = "SETPUSH_LOG_DIR";
/// Older `upload-*.ndjson` files beyond this count are removed when a new run
/// log starts.
pub const KEEP_RUN_LOGS: usize = 20;

static ACTIVE: Mutex<Option<BufWriter<File>>> = Mutex::new(None);
static SUBSCRIBER: OnceLock<()> = OnceLock::new();

/// Writes to the active run log, or nowhere.
#[derive(Clone, Copy, Default)]
struct ActiveFile;

impl Write for ActiveFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match ACTIVE.lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(w) => w.write(buf),
                None => Ok(buf.len()),
            },
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match ACTIVE.lock() {
            Ok(mut slot) => slot.as_mut().map_or(Ok(()), |w| w.flush()),
            Err(_) => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for ActiveFile {
    type Writer = ActiveFile;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

fn env_filter_from(setpush_log: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    setpush_log
        .or(rust_log)
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Installs the global subscriber once: the run-log JSON layer, plus a
/// human-readable stderr layer when `console` is set. Later calls are no-ops.
pub fn init_logging(console: bool) {
    SUBSCRIBER.get_or_init(|| {
        let filter = env_filter_from(
            std::env::var(LOG_ENV).ok().as_deref(),
            std::env::var("RUST_LOG").ok().as_deref(),
        );
        let json = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_current_span(false)
            .with_writer(ActiveFile);
        let stderr = console.then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr)
        });
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(json)
            .with(stderr)
            .try_init();
    });
}

/// Keeps the run log open; flushing and closing happen on drop.
#[derive(Debug)]
pub struct RunLogGuard {
    path: PathBuf,
}

impl RunLogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLogGuard {
    fn drop(&mut self) {
        let Ok(mut slot) = ACTIVE.lock() else {
            return;
        };
        if let Some(mut w) = slot.take() {
            let _ = w.flush();
            let _ = w.get_ref().sync_all();
        }
    }
}

/// Opens `upload-<utc>-<run_id>.ndjson` in the log directory and routes the
/// JSON layer into it until the guard drops. Only one run log may be open.
pub fn start_run_log(run_id: &str, data_dir: &Path) -> io::Result<RunLogGuard> {
    init_logging(false);

    let dir = log_dir(data_dir);
    std::fs::create_dir_all(&dir)?;
    prune_run_logs(&dir, KEEP_RUN_LOGS.saturating_sub(1))?;

    let path = dir.join(format!(
        "upload-{}-{}.ndjson",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        file_component(run_id)
    ));

    let mut slot = ACTIVE
        .lock()
        .map_err(|_| io::Error::other("run log lock poisoned"))?;
    if slot.is_some() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "a run log is already open",
        ));
    }
    let file = OpenOptions::new().create_new(true).write(true).open(&path)?;
    *slot = Some(BufWriter::new(file));
    Ok(RunLogGuard { path })
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("logs"))
}

/// Removes the oldest run logs so that at most `keep` remain. File names sort
/// chronologically.
fn prune_run_logs(dir: &Path, keep: usize) -> io::Result<()> {
    let mut logs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("upload-") && n.ends_with(".ndjson"))
        })
        .collect();
    if logs.len() <= keep {
        return Ok(());
    }
    logs.sort();
    let excess = logs.len() - keep;
    for old in logs.into_iter().take(excess) {
        std::fs::remove_file(old)?;
    }
    Ok(())
}

fn file_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
