use serde::{Deserialize, Serialize};

/// Terminal result of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UploadOutcome {
    Success { remote_id: String },
    Failed { reason: String },
    /// The catalog reported the asset as already present in the set.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    #[serde(skip)]
    pub seq: usize,
    pub display_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub set_name: String,
    pub set_id: Option<String>,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: Vec<FailedItem>,
    /// Planned items never claimed because dispatch stopped early.
    pub not_attempted: Vec<String>,
    /// Why dispatch stopped early, if it did.
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn new(set_name: impl Into<String>, skipped: u64) -> Self {
        Self {
            set_name: set_name.into(),
            skipped,
            ..Self::default()
        }
    }

    pub fn record(&mut self, seq: usize, display_name: &str, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Success { .. } => self.succeeded += 1,
            UploadOutcome::Skipped => self.skipped += 1,
            UploadOutcome::Failed { reason } => self.failed.push(FailedItem {
                seq,
                display_name: display_name.to_string(),
                reason,
            }),
        }
    }

    /// Outcomes arrive in completion order; failures are listed in plan order.
    pub fn finalize(mut self) -> Self {
        self.failed.sort_by_key(|f| f.seq);
        self
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.display_name.as_str()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_none()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}
