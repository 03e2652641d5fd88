use std::collections::HashSet;

use crate::catalog::RemoteAsset;
use crate::inventory::LocalFile;

/// One local file queued for upload in the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Position in scan order; used to report failures deterministically.
    pub seq: usize,
    pub file: LocalFile,
    pub attempts: u32,
}

impl WorkItem {
    pub fn display_name(&self) -> &str {
        &self.file.display_name
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadPlan {
    pub items: Vec<WorkItem>,
    /// Names of local files already present remotely, in scan order.
    pub skipped: Vec<String>,
}

impl UploadPlan {
    pub fn skipped_count(&self) -> u64 {
        self.skipped.len() as u64
    }

    pub fn bytes_planned(&self) -> u64 {
        self.items.iter().map(|i| i.file.size_bytes).sum()
    }
}

/// Diffs local files against the remote membership snapshot.
///
/// A file is skipped iff a remote asset has exactly the same display name.
/// Content is never compared: a changed file under an existing name stays
/// skipped until the remote asset is renamed or removed.
pub fn plan_uploads<'a, I>(files: I, remote: &[RemoteAsset]) -> UploadPlan
where
    I: IntoIterator<Item = &'a LocalFile>,
{
    let present: HashSet<&str> = remote.iter().map(|a| a.display_name.as_str()).collect();
    let mut plan = UploadPlan::default();

    for file in files {
        if present.contains(file.display_name.as_str()) {
            plan.skipped.push(file.display_name.clone());
            continue;
        }
        plan.items.push(WorkItem {
            seq: plan.items.len(),
            file: file.clone(),
            attempts: 0,
        });
    }
    plan
}
