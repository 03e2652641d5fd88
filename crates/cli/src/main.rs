use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use setpush_core::config::{Settings, load_settings};
use setpush_core::credential::save_token;
use setpush_core::run_log::{init_logging, start_run_log};
use setpush_core::{
    APP_NAME, HttpCatalog, ProgressSink, RunReport, UploadConfig, UploadOptions, UploadProgress,
    authenticate, parse_tags, run_upload_with,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "setpush")]
#[command(about = "Upload a directory of photos to a named remote set", long_about = None)]
struct Cli {
    /// Directory whose files are uploaded (not recursive).
    #[arg(required_unless_present = "save_token")]
    dir: Option<PathBuf>,

    /// Remote set name; defaults to the directory's base name.
    #[arg(short = 's', long = "setname")]
    set_name: Option<String>,

    /// Space-separated tags applied to the set and every upload.
    #[arg(short = 't', long)]
    tags: Option<String>,

    /// Worker pool size; overrides `upload.concurrency`.
    #[arg(long)]
    threads: Option<usize>,

    /// Mark uploaded assets public.
    #[arg(short = 'p', long)]
    public: bool,

    /// Read an API token from stdin and store it in the config dir.
    #[arg(long, conflicts_with = "dir")]
    save_token: bool,

    #[arg(long)]
    json: bool,

    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

struct NdjsonProgressSink {
    task_id: String,
}

impl ProgressSink for NdjsonProgressSink {
    fn on_progress(&self, p: UploadProgress) {
        let line = serde_json::json!({
            "type": "task.progress",
            "taskId": self.task_id,
            "phase": p.phase,
            "filesTotal": p.files_total,
            "filesDone": p.files_done,
            "filesSkipped": p.files_skipped,
            "filesFailed": p.files_failed,
            "bytesTotal": p.bytes_total,
            "bytesUploaded": p.bytes_uploaded,
        });
        println!("{line}");
    }
}

/// Exit status for a forced quit, as a shell reports SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Stop dispatching and let in-flight uploads finish.
    Drain,
    ForceExit,
}

fn interrupt_action(count: u32) -> Interrupt {
    if count <= 1 {
        Interrupt::Drain
    } else {
        Interrupt::ForceExit
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let config_dir = cli
        .config_dir
        .clone()
        .or_else(|| std::env::var("SETPUSH_CONFIG_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_config_dir);
    let data_dir = cli
        .data_dir
        .clone()
        .or_else(|| std::env::var("SETPUSH_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_data_dir);

    if cli.save_token {
        return token_save(&config_dir, cli.json).map(|()| 0);
    }

    let dir = cli
        .dir
        .clone()
        .ok_or_else(|| CliError::new("cli.usage", "a directory is required"))?;
    upload_run(&cli, &config_dir, &data_dir, dir).await
}

fn token_save(config_dir: &Path, json: bool) -> Result<(), CliError> {
    let mut token = String::new();
    std::io::stdin()
        .read_to_string(&mut token)
        .map_err(|e| CliError::new("token.read_failed", e.to_string()))?;
    save_token(config_dir, &token).map_err(map_core_err)?;

    if json {
        println!("{}", serde_json::json!({ "ok": true }));
    } else {
        println!("token saved");
    }
    Ok(())
}

async fn upload_run(
    cli: &Cli,
    config_dir: &Path,
    data_dir: &Path,
    dir: PathBuf,
) -> Result<i32, CliError> {
    init_logging(!cli.json && !cli.events);

    let settings = load_settings(config_dir).map_err(map_core_err)?;
    let credential = authenticate(config_dir).map_err(map_core_err)?;
    let catalog =
        Arc::new(HttpCatalog::new(settings.catalog_config(), credential).map_err(map_core_err)?);

    let task_id = format!("tsk_{}", uuid::Uuid::new_v4());
    let _log = start_run_log(&task_id, data_dir)
        .map_err(|e| CliError::new("log.init_failed", e.to_string()))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut count = 0;
            while tokio::signal::ctrl_c().await.is_ok() {
                count += 1;
                match interrupt_action(count) {
                    Interrupt::Drain => {
                        tracing::warn!(
                            event = "run.interrupt",
                            "interrupted; waiting for in-flight uploads (Ctrl-C again to quit)"
                        );
                        cancel.cancel();
                    }
                    Interrupt::ForceExit => {
                        tracing::warn!(event = "run.force_exit", "interrupted twice; exiting");
                        std::process::exit(INTERRUPTED_EXIT_CODE);
                    }
                }
            }
        });
    }

    if cli.events {
        println!(
            "{}",
            serde_json::json!({
                "type": "task.state",
                "taskId": task_id,
                "kind": "upload",
                "state": "running"
            })
        );
    }

    let sink = NdjsonProgressSink {
        task_id: task_id.clone(),
    };
    let opts = UploadOptions {
        cancel: Some(&cancel),
        progress: if cli.events { Some(&sink) } else { None },
    };
    let report = run_upload_with(catalog, upload_config(cli, &settings, dir), opts)
        .await
        .map_err(map_core_err)?;

    if cli.events {
        let state = if report.is_success() {
            "succeeded"
        } else {
            "failed"
        };
        println!(
            "{}",
            serde_json::json!({
                "type": "task.state",
                "taskId": task_id,
                "kind": "upload",
                "state": state,
                "report": report,
            })
        );
    } else if cli.json {
        println!(
            "{}",
            serde_json::to_string(&report)
                .map_err(|e| CliError::new("report.encode_failed", e.to_string()))?
        );
    } else {
        print_report(&report);
    }
    Ok(report.exit_code())
}

fn upload_config(cli: &Cli, settings: &Settings, dir: PathBuf) -> UploadConfig {
    UploadConfig {
        set_name: cli.set_name.clone(),
        tags: cli.tags.as_deref().map(parse_tags).unwrap_or_default(),
        is_public: cli.public || settings.upload.public,
        scan: settings.scan_filter(),
        pool_size: cli.threads.unwrap_or(settings.upload.concurrency),
        retry: settings.retry_policy(),
        ..UploadConfig::new(dir)
    }
}

fn print_report(report: &RunReport) {
    println!(
        "set={} setId={}",
        report.set_name,
        report.set_id.as_deref().unwrap_or("-")
    );
    println!(
        "succeeded={} skipped={} failed={}",
        report.succeeded,
        report.skipped,
        report.failed_count()
    );
    for f in &report.failed {
        println!("failed: {}: {}", f.display_name, f.reason);
    }
    if let Some(reason) = &report.aborted {
        println!(
            "aborted: {reason} ({} not attempted)",
            report.not_attempted.len()
        );
        for name in &report.not_attempted {
            println!("not attempted: {name}");
        }
    }
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join(APP_NAME.to_ascii_lowercase())
}

fn default_data_dir() -> PathBuf {
    default_config_dir()
}

fn map_core_err(e: setpush_core::Error) -> CliError {
    match e {
        setpush_core::Error::InvalidConfig { message } => {
            CliError::new("config.invalid", message)
        }
        setpush_core::Error::NotADirectory { path } => {
            CliError::new("source.not_a_directory", format!("not a directory: {}", path.display()))
                .with_details(serde_json::json!({ "path": path }))
        }
        setpush_core::Error::EmptyDirectory { path } => CliError::new(
            "source.empty",
            format!("no eligible files in {}", path.display()),
        )
        .with_details(serde_json::json!({ "path": path })),
        setpush_core::Error::AuthRequired { message } => {
            CliError::new("catalog.unauthorized", message)
        }
        setpush_core::Error::RemoteUnavailable { message } => {
            CliError::retryable("catalog.unavailable", message)
        }
        setpush_core::Error::NonUtf8Path { path } => CliError::new(
            "source.non_utf8",
            format!("unsupported path: {}", path.display()),
        ),
        setpush_core::Error::Cancelled => CliError::new("task.cancelled", "cancelled"),
        other => CliError::new("unknown", other.to_string()),
    }
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
