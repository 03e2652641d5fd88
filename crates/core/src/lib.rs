pub mod catalog;
pub mod config;
mod coordinator;
pub mod credential;
mod error;
mod inventory;
mod plan;
mod progress;
mod remote_state;
mod report;
mod retry;
pub mod run_log;
mod upload;

pub const APP_NAME: &str = "SetPush";

pub use catalog::http::{HttpCatalog, HttpCatalogConfig};
pub use catalog::{
    AssetUpload, Catalog, CatalogFuture, CreatedSet, InMemoryCatalog, RemoteAsset, RemoteSet,
    SetLookup,
};
pub use coordinator::{
    CoordinatorConfig, DEFAULT_POOL_SIZE, SetContext, UploadOptions, run_work_items,
};
pub use credential::{Credential, authenticate};
pub use error::{Error, Result};
pub use inventory::{DEFAULT_EXTENSIONS, LocalFile, LocalInventory, ScanFilter, scan_directory};
pub use plan::{UploadPlan, WorkItem, plan_uploads};
pub use progress::{ProgressSink, UploadProgress};
pub use remote_state::{RemoteState, resolve_remote_state};
pub use report::{FailedItem, RunReport, UploadOutcome};
pub use retry::RetryPolicy;
pub use upload::{
    UploadConfig, default_set_name, parse_tags, run_upload, run_upload_with,
};
