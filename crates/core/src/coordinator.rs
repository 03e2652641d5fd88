use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tokio::sync::{Mutex, OnceCell, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{AssetUpload, Catalog, SetLookup};
use crate::plan::{UploadPlan, WorkItem};
use crate::progress::{ProgressSink, UploadProgress};
use crate::remote_state::RemoteState;
use crate::report::{RunReport, UploadOutcome};
use crate::retry::RetryPolicy;
use crate::{Error, Result};

pub const DEFAULT_POOL_SIZE: usize = 4;

/// The target set as seen by the workers.
///
/// The remote id lives in a one-time cell: when the set is absent at run
/// start, the first worker to succeed creates it and every other worker waits
/// on the cell and then adds its asset to the created set.
#[derive(Debug)]
pub struct SetContext {
    name: String,
    tags: Vec<String>,
    set_id: OnceCell<String>,
}

impl SetContext {
    pub fn absent(name: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            tags,
            set_id: OnceCell::new(),
        }
    }

    pub fn existing(name: impl Into<String>, tags: Vec<String>, set_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags,
            set_id: OnceCell::new_with(Some(set_id.into())),
        }
    }

    pub fn from_state(name: impl Into<String>, tags: Vec<String>, state: &RemoteState) -> Self {
        match state.set_id() {
            Some(id) => Self::existing(name, tags, id),
            None => Self::absent(name, tags),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_id(&self) -> Option<&str> {
        self.set_id.get().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Worker count; values below 1 are treated as 1.
    pub pool_size: usize,
    pub retry: RetryPolicy,
    pub is_public: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            retry: RetryPolicy::default(),
            is_public: false,
        }
    }
}

#[derive(Default)]
pub struct UploadOptions<'a> {
    /// Cancelling stops dispatch; in-flight uploads still finish.
    pub cancel: Option<&'a CancellationToken>,
    pub progress: Option<&'a dyn ProgressSink>,
}

struct Dispatch<C: ?Sized> {
    catalog: Arc<C>,
    set: Arc<SetContext>,
    queue: Mutex<VecDeque<WorkItem>>,
    retry: RetryPolicy,
    is_public: bool,
    abort: CancellationToken,
    fatal: OnceLock<String>,
}

impl<C: Catalog + ?Sized> Dispatch<C> {
    async fn claim(&self) -> Option<WorkItem> {
        let mut queue = self.queue.lock().await;
        if self.abort.is_cancelled() {
            return None;
        }
        queue.pop_front()
    }

    fn abort_with(&self, reason: String) {
        if self.fatal.set(reason.clone()).is_ok() {
            error!(event = "run.abort", reason, "run.abort");
        }
        self.abort.cancel();
    }
}

enum WorkerEvent {
    Claimed {
        seq: usize,
        display_name: String,
    },
    Finished {
        seq: usize,
        display_name: String,
        size_bytes: u64,
        outcome: UploadOutcome,
    },
}

/// Uploads every planned item with a bounded pool of workers and aggregates
/// one terminal outcome per claimed item into a [`RunReport`].
///
/// Per-item failures never stop the run. A catalog-wide failure (or the
/// caller's cancel token) stops dispatch; items already in flight run to
/// completion and the rest are listed as not attempted.
pub async fn run_work_items<C>(
    catalog: Arc<C>,
    plan: UploadPlan,
    set: Arc<SetContext>,
    config: CoordinatorConfig,
    options: UploadOptions<'_>,
) -> RunReport
where
    C: Catalog + ?Sized + 'static,
{
    let mut report = RunReport::new(set.name(), plan.skipped_count());
    let files_total = plan.items.len() as u64;
    let bytes_total = plan.bytes_planned();

    if plan.items.is_empty() {
        report.set_id = set.set_id().map(str::to_string);
        return report.finalize();
    }

    let started = Instant::now();
    let pool_size = config.pool_size.max(1).min(plan.items.len());
    debug!(
        event = "phase.start",
        phase = "upload",
        files_total,
        bytes_total,
        pool_size,
        "phase.start"
    );

    let abort = options
        .cancel
        .map(CancellationToken::child_token)
        .unwrap_or_else(CancellationToken::new);
    let dispatch = Arc::new(Dispatch {
        catalog,
        set: set.clone(),
        queue: Mutex::new(plan.items.into_iter().collect()),
        retry: config.retry,
        is_public: config.is_public,
        abort,
        fatal: OnceLock::new(),
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut workers = JoinSet::new();
    for worker_id in 0..pool_size {
        workers.spawn(run_worker(worker_id, dispatch.clone(), tx.clone()));
    }
    drop(tx);

    let mut in_flight = BTreeMap::<usize, String>::new();
    let mut claimed = 0u64;
    let mut bytes_uploaded = 0u64;
    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Claimed { seq, display_name } => {
                claimed += 1;
                info!(
                    event = "upload.start",
                    index = claimed,
                    total = files_total,
                    file = %display_name,
                    "{claimed}/{files_total} uploading {display_name}"
                );
                in_flight.insert(seq, display_name);
            }
            WorkerEvent::Finished {
                seq,
                display_name,
                size_bytes,
                outcome,
            } => {
                in_flight.remove(&seq);
                if matches!(outcome, UploadOutcome::Success { .. }) {
                    bytes_uploaded += size_bytes;
                }
                report.record(seq, &display_name, outcome);

                if let Some(sink) = options.progress {
                    sink.on_progress(UploadProgress {
                        phase: "upload".to_string(),
                        files_total: Some(files_total),
                        files_done: Some(report.succeeded),
                        files_skipped: Some(report.skipped),
                        files_failed: Some(report.failed_count()),
                        bytes_total: Some(bytes_total),
                        bytes_uploaded: Some(bytes_uploaded),
                    });
                }
            }
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(event = "worker.join_failed", error = %e, "worker.join_failed");
        }
    }
    // A worker that died mid-item never reported; its item still needs a
    // terminal outcome.
    for (seq, display_name) in in_flight {
        report.record(
            seq,
            &display_name,
            UploadOutcome::Failed {
                reason: "upload worker terminated unexpectedly".to_string(),
            },
        );
    }

    report.not_attempted = dispatch
        .queue
        .lock()
        .await
        .drain(..)
        .map(|item| item.file.display_name)
        .collect();
    if dispatch.abort.is_cancelled() {
        report.aborted = Some(
            dispatch
                .fatal
                .get()
                .cloned()
                .unwrap_or_else(|| Error::Cancelled.to_string()),
        );
    }
    report.set_id = set.set_id().map(str::to_string);

    debug!(
        event = "phase.finish",
        phase = "upload",
        duration_ms = started.elapsed().as_millis() as u64,
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed_count(),
        not_attempted = report.not_attempted.len() as u64,
        bytes_uploaded,
        "phase.finish"
    );
    report.finalize()
}

async fn run_worker<C: Catalog + ?Sized>(
    worker_id: usize,
    dispatch: Arc<Dispatch<C>>,
    tx: mpsc::UnboundedSender<WorkerEvent>,
) {
    while let Some(mut item) = dispatch.claim().await {
        let _ = tx.send(WorkerEvent::Claimed {
            seq: item.seq,
            display_name: item.file.display_name.clone(),
        });
        let outcome = upload_with_retry(&dispatch, &mut item).await;
        let _ = tx.send(WorkerEvent::Finished {
            seq: item.seq,
            size_bytes: item.file.size_bytes,
            display_name: item.file.display_name,
            outcome,
        });
    }
    debug!(event = "worker.exit", worker_id, "worker.exit");
}

async fn upload_with_retry<C: Catalog + ?Sized>(
    dispatch: &Dispatch<C>,
    item: &mut WorkItem,
) -> UploadOutcome {
    let max_attempts = dispatch.retry.attempts();
    loop {
        item.attempts += 1;
        let err = match upload_once(dispatch, item).await {
            Ok(remote_id) => {
                debug!(
                    event = "upload.done",
                    file = %item.file.display_name,
                    remote_id,
                    attempts = item.attempts,
                    "upload.done"
                );
                return UploadOutcome::Success { remote_id };
            }
            Err(Error::AlreadyPresent { display_name }) => {
                info!(
                    event = "upload.already_present",
                    file = %display_name,
                    set_name = dispatch.set.name(),
                    "asset {display_name} already exists in set {}",
                    dispatch.set.name()
                );
                return UploadOutcome::Skipped;
            }
            Err(e) => e,
        };

        if err.is_fatal() {
            let reason = err.to_string();
            dispatch.abort_with(reason.clone());
            return UploadOutcome::Failed { reason };
        }

        if err.is_retryable() && item.attempts < max_attempts {
            let backoff = dispatch.retry.backoff_after(item.attempts);
            warn!(
                event = "upload.retry",
                file = %item.file.display_name,
                attempt = item.attempts,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "upload.retry"
            );
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            continue;
        }

        error!(
            event = "upload.failed",
            provider = dispatch.catalog.provider(),
            file = %item.file.display_name,
            attempts = item.attempts,
            error = %err,
            "upload.failed"
        );
        return UploadOutcome::Failed {
            reason: err.to_string(),
        };
    }
}

async fn read_asset<C: Catalog + ?Sized>(
    dispatch: &Dispatch<C>,
    item: &WorkItem,
) -> Result<AssetUpload> {
    let bytes = tokio::fs::read(&item.file.path).await?;
    Ok(AssetUpload {
        display_name: item.file.display_name.clone(),
        bytes,
        tags: dispatch.set.tags.clone(),
        is_public: dispatch.is_public,
    })
}

async fn upload_once<C: Catalog + ?Sized>(
    dispatch: &Dispatch<C>,
    item: &WorkItem,
) -> Result<String> {
    let asset = read_asset(dispatch, item).await?;

    if let Some(set_id) = dispatch.set.set_id.get() {
        return dispatch.catalog.add_asset_to_set(set_id, asset).await;
    }

    // Set absent so far: race to create it with this asset. Only one
    // initializer runs at a time; losers observe the id and add normally.
    let mut pending = Some(asset);
    let mut created_asset_id: Option<String> = None;
    let (pending_slot, created_slot) = (&mut pending, &mut created_asset_id);
    let catalog = &dispatch.catalog;
    let set = &dispatch.set;
    let set_id = dispatch
        .set
        .set_id
        .get_or_try_init(|| async move {
            let Some(first_asset) = pending_slot.take() else {
                return Err(Error::upload_permanent("asset consumed before set creation"));
            };
            match catalog.create_set(&set.name, &set.tags, first_asset).await {
                Ok(created) => {
                    info!(
                        event = "set.created",
                        set_name = %set.name,
                        set_id = %created.set_id,
                        "created set {} ({})",
                        set.name,
                        created.set_id
                    );
                    *created_slot = Some(created.asset_id);
                    Ok(created.set_id)
                }
                Err(Error::SetExists { name }) => existing_set_id(&**catalog, &name).await,
                Err(e) => Err(e),
            }
        })
        .await?;

    if let Some(asset_id) = created_asset_id {
        return Ok(asset_id);
    }
    // The initializer consumed this asset without creating the set.
    let asset = match pending {
        Some(asset) => asset,
        None => read_asset(dispatch, item).await?,
    };
    dispatch.catalog.add_asset_to_set(set_id, asset).await
}

/// The set appeared after the run-start snapshot (another client, or an
/// earlier create that timed out but landed). Adopt it.
async fn existing_set_id<C: Catalog + ?Sized>(catalog: &C, name: &str) -> Result<String> {
    match catalog.find_set_by_name(name).await? {
        SetLookup::Present(found) => {
            warn!(
                event = "set.adopted",
                set_name = name,
                set_id = %found.remote_id,
                "set {name} already exists ({}); adding to it",
                found.remote_id
            );
            Ok(found.remote_id)
        }
        SetLookup::Absent => Err(Error::upload_transient(format!(
            "set {name} reported as existing but not found"
        ))),
    }
}
