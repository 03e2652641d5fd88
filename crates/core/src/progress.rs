use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadProgress {
    pub phase: String,
    pub files_total: Option<u64>,
    pub files_done: Option<u64>,
    pub files_skipped: Option<u64>,
    pub files_failed: Option<u64>,
    pub bytes_total: Option<u64>,
    pub bytes_uploaded: Option<u64>,
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: UploadProgress);
}
