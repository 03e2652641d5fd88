use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use setpush_core::{
    AssetUpload, Catalog, CatalogFuture, CreatedSet, Error, InMemoryCatalog, RetryPolicy,
    SetLookup, UploadConfig, run_upload,
};
use tempfile::TempDir;
use tokio::sync::Mutex;

fn write_file(path: PathBuf, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

fn photo_dir(count: usize) -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("Trip");
    std::fs::create_dir_all(&source).unwrap();
    for i in 0..count {
        write_file(source.join(format!("img{i}.jpg")), &[i as u8; 512]);
    }
    (temp, source)
}

fn config(source: PathBuf) -> UploadConfig {
    UploadConfig {
        pool_size: 3,
        retry: RetryPolicy::immediate(3),
        ..UploadConfig::new(source)
    }
}

#[tokio::test]
async fn second_run_skips_everything() {
    let (_temp, source) = photo_dir(6);
    let catalog = Arc::new(InMemoryCatalog::new());

    let r1 = run_upload(catalog.clone(), config(source.clone()))
        .await
        .unwrap();
    assert_eq!(r1.succeeded, 6);
    assert_eq!(r1.skipped, 0);
    assert!(r1.failed.is_empty());
    assert!(r1.is_success());
    assert_eq!(catalog.create_call_count(), 1);
    assert_eq!(catalog.add_call_count(), 5);

    let set = catalog.set_by_name("Trip").await.unwrap();
    assert_eq!(r1.set_id.as_deref(), Some(set.remote_id.as_str()));
    assert_eq!(set.assets.len(), 6);

    let r2 = run_upload(catalog.clone(), config(source)).await.unwrap();
    assert_eq!(r2.succeeded, 0);
    assert_eq!(r2.skipped, 6);
    assert!(r2.is_success());
    assert_eq!(r2.exit_code(), 0);
    assert_eq!(catalog.create_call_count(), 1);
    assert_eq!(catalog.add_call_count(), 5);
    assert_eq!(catalog.set_count().await, 1);
}

#[tokio::test]
async fn existing_set_only_receives_missing_names() {
    let (_temp, source) = photo_dir(5);
    let catalog = Arc::new(InMemoryCatalog::new());
    let set_id = catalog
        .insert_set("Trip", &[], &["img1.jpg", "img3.jpg", "other.jpg"])
        .await;

    let report = run_upload(catalog.clone(), config(source)).await.unwrap();
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.set_id.as_deref(), Some(set_id.as_str()));
    assert_eq!(catalog.create_call_count(), 0);
    assert_eq!(catalog.add_call_count(), 3);

    let names: HashSet<String> = catalog
        .set_by_name("Trip")
        .await
        .unwrap()
        .assets
        .into_iter()
        .map(|a| a.display_name)
        .collect();
    for i in 0..5 {
        assert!(names.contains(&format!("img{i}.jpg")));
    }
    assert_eq!(names.len(), 6);
}

#[tokio::test]
async fn explicit_set_name_and_only_eligible_files() {
    let (_temp, source) = photo_dir(2);
    write_file(source.join(".DS_Store.jpg"), b"hidden");
    write_file(source.join("notes.txt"), b"text");
    write_file(source.join("sub").join("deep.jpg"), b"nested");

    let catalog = Arc::new(InMemoryCatalog::new());
    let mut cfg = config(source);
    cfg.set_name = Some(" Holidays ".to_string());

    let report = run_upload(catalog.clone(), cfg).await.unwrap();
    assert_eq!(report.set_name, "Holidays");
    assert_eq!(report.succeeded, 2);

    let set = catalog.set_by_name("Holidays").await.unwrap();
    let mut names: Vec<String> = set.assets.into_iter().map(|a| a.display_name).collect();
    names.sort();
    assert_eq!(names, vec!["img0.jpg", "img1.jpg"]);
}

#[tokio::test]
async fn preflight_errors_touch_nothing_remote() {
    let catalog = Arc::new(InMemoryCatalog::new());

    let err = run_upload(
        catalog.clone(),
        UploadConfig::new("/nonexistent/path/that/does/not/exist"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::NotADirectory { .. }));

    let temp = TempDir::new().unwrap();
    let empty = temp.path().join("empty");
    std::fs::create_dir_all(&empty).unwrap();
    write_file(empty.join("readme.txt"), b"not a photo");
    let err = run_upload(catalog.clone(), UploadConfig::new(empty))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyDirectory { .. }));

    assert_eq!(catalog.create_call_count(), 0);
    assert_eq!(catalog.add_call_count(), 0);
}

/// Delegates to an in-memory catalog but permanently rejects listed names
/// until `heal` is called.
struct FlakyCatalog {
    inner: InMemoryCatalog,
    rejecting: Mutex<HashSet<String>>,
    rejected: AtomicUsize,
}

impl FlakyCatalog {
    fn new(rejecting: &[&str]) -> Self {
        Self {
            inner: InMemoryCatalog::new(),
            rejecting: Mutex::new(rejecting.iter().map(|s| s.to_string()).collect()),
            rejected: AtomicUsize::new(0),
        }
    }

    async fn heal(&self) {
        self.rejecting.lock().await.clear();
    }

    async fn check(&self, name: &str) -> setpush_core::Result<()> {
        if self.rejecting.lock().await.contains(name) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::UploadFailed {
                message: format!("rejected {name}"),
                retryable: false,
            });
        }
        Ok(())
    }
}

impl Catalog for FlakyCatalog {
    fn provider(&self) -> &'static str {
        "test.flaky"
    }

    fn find_set_by_name<'a>(&'a self, name: &'a str) -> CatalogFuture<'a, SetLookup> {
        self.inner.find_set_by_name(name)
    }

    fn create_set<'a>(
        &'a self,
        name: &'a str,
        tags: &'a [String],
        first_asset: AssetUpload,
    ) -> CatalogFuture<'a, CreatedSet> {
        Box::pin(async move {
            self.check(&first_asset.display_name).await?;
            self.inner.create_set(name, tags, first_asset).await
        })
    }

    fn add_asset_to_set<'a>(
        &'a self,
        set_id: &'a str,
        asset: AssetUpload,
    ) -> CatalogFuture<'a, String> {
        Box::pin(async move {
            self.check(&asset.display_name).await?;
            self.inner.add_asset_to_set(set_id, asset).await
        })
    }
}

#[tokio::test]
async fn rerun_uploads_only_previously_failed_files() {
    let (_temp, source) = photo_dir(5);
    let catalog = Arc::new(FlakyCatalog::new(&["img0.jpg", "img3.jpg"]));

    let r1 = run_upload(catalog.clone(), config(source.clone()))
        .await
        .unwrap();
    assert_eq!(r1.succeeded, 3);
    assert_eq!(r1.failed_names(), vec!["img0.jpg", "img3.jpg"]);
    assert_eq!(r1.exit_code(), 1);
    // Permanent failures are not retried.
    assert_eq!(catalog.rejected.load(Ordering::Relaxed), 2);
    assert_eq!(catalog.inner.create_call_count(), 1);

    catalog.heal().await;
    let r2 = run_upload(catalog.clone(), config(source)).await.unwrap();
    assert_eq!(r2.succeeded, 2);
    assert_eq!(r2.skipped, 3);
    assert!(r2.is_success());
    assert_eq!(catalog.inner.create_call_count(), 1);
    assert_eq!(catalog.inner.add_call_count(), 4);
    assert_eq!(
        catalog.inner.set_by_name("Trip").await.unwrap().assets.len(),
        5
    );
}

/// Records the tags and visibility every upload carried.
#[derive(Default)]
struct RecordingCatalog {
    set_tags: Mutex<Vec<Vec<String>>>,
    uploads: Mutex<Vec<(String, Vec<String>, bool, usize)>>,
}

impl Catalog for RecordingCatalog {
    fn provider(&self) -> &'static str {
        "test.recording"
    }

    fn find_set_by_name<'a>(&'a self, _name: &'a str) -> CatalogFuture<'a, SetLookup> {
        Box::pin(async { Ok(SetLookup::Absent) })
    }

    fn create_set<'a>(
        &'a self,
        _name: &'a str,
        tags: &'a [String],
        first_asset: AssetUpload,
    ) -> CatalogFuture<'a, CreatedSet> {
        Box::pin(async move {
            self.set_tags.lock().await.push(tags.to_vec());
            self.uploads.lock().await.push((
                first_asset.display_name,
                first_asset.tags,
                first_asset.is_public,
                first_asset.bytes.len(),
            ));
            Ok(CreatedSet {
                set_id: "set-1".to_string(),
                asset_id: "asset-0".to_string(),
            })
        })
    }

    fn add_asset_to_set<'a>(
        &'a self,
        _set_id: &'a str,
        asset: AssetUpload,
    ) -> CatalogFuture<'a, String> {
        Box::pin(async move {
            let mut uploads = self.uploads.lock().await;
            uploads.push((
                asset.display_name,
                asset.tags,
                asset.is_public,
                asset.bytes.len(),
            ));
            Ok(format!("asset-{}", uploads.len()))
        })
    }
}

#[tokio::test]
async fn tags_visibility_and_bytes_reach_the_catalog() {
    let (_temp, source) = photo_dir(3);
    let catalog = Arc::new(RecordingCatalog::default());
    let mut cfg = config(source);
    cfg.tags = setpush_core::parse_tags("trip  2024");
    cfg.is_public = true;

    let report = run_upload(catalog.clone(), cfg).await.unwrap();
    assert_eq!(report.succeeded, 3);

    let set_tags = catalog.set_tags.lock().await.clone();
    assert_eq!(set_tags, vec![vec!["trip".to_string(), "2024".to_string()]]);

    let uploads = catalog.uploads.lock().await.clone();
    assert_eq!(uploads.len(), 3);
    for (_, tags, is_public, len) in uploads {
        assert_eq!(tags, vec!["trip", "2024"]);
        assert!(is_public);
        assert_eq!(len, 512);
    }
}
