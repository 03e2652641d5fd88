use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Error, Result};

pub mod http;

pub type CatalogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// An asset already present in a remote set. Matched against local files by
/// `display_name` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub remote_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSet {
    pub remote_id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub assets: Vec<RemoteAsset>,
}

#[derive(Debug, Clone)]
pub enum SetLookup {
    Present(RemoteSet),
    Absent,
}

/// One asset payload handed to the catalog.
#[derive(Debug, Clone)]
pub struct AssetUpload {
    pub display_name: String,
    pub bytes: Vec<u8>,
    pub tags: Vec<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSet {
    pub set_id: String,
    pub asset_id: String,
}

/// Remote photo catalog: set lookup plus the two upload calls.
///
/// `create_set` uploads its first asset as part of creating the set, so a set
/// never exists remotely without at least one member.
pub trait Catalog: Send + Sync {
    fn provider(&self) -> &'static str;

    fn find_set_by_name<'a>(&'a self, name: &'a str) -> CatalogFuture<'a, SetLookup>;

    fn create_set<'a>(
        &'a self,
        name: &'a str,
        tags: &'a [String],
        first_asset: AssetUpload,
    ) -> CatalogFuture<'a, CreatedSet>;

    fn add_asset_to_set<'a>(
        &'a self,
        set_id: &'a str,
        asset: AssetUpload,
    ) -> CatalogFuture<'a, String>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    pub create_calls: AtomicUsize,
    pub add_calls: AtomicUsize,
    sets: Mutex<BTreeMap<String, RemoteSet>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a set with assets named `titles`; returns the new set id.
    pub async fn insert_set(&self, name: &str, tags: &[String], titles: &[&str]) -> String {
        let set_id = format!("mem-set:{}", uuid::Uuid::new_v4());
        let assets = titles
            .iter()
            .map(|t| RemoteAsset {
                remote_id: format!("mem-asset:{}", uuid::Uuid::new_v4()),
                display_name: t.to_string(),
            })
            .collect();
        self.sets.lock().await.insert(
            set_id.clone(),
            RemoteSet {
                remote_id: set_id.clone(),
                name: name.to_string(),
                tags: tags.to_vec(),
                assets,
            },
        );
        set_id
    }

    pub async fn set_by_name(&self, name: &str) -> Option<RemoteSet> {
        self.sets
            .lock()
            .await
            .values()
            .find(|s| s.name == name)
            .cloned()
    }

    pub async fn set_count(&self) -> usize {
        self.sets.lock().await.len()
    }

    pub fn create_call_count(&self) -> usize {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub fn add_call_count(&self) -> usize {
        self.add_calls.load(Ordering::Relaxed)
    }
}

impl Catalog for InMemoryCatalog {
    fn provider(&self) -> &'static str {
        "test.mem"
    }

    fn find_set_by_name<'a>(&'a self, name: &'a str) -> CatalogFuture<'a, SetLookup> {
        Box::pin(async move {
            Ok(match self.set_by_name(name).await {
                Some(set) => SetLookup::Present(set),
                None => SetLookup::Absent,
            })
        })
    }

    fn create_set<'a>(
        &'a self,
        name: &'a str,
        tags: &'a [String],
        first_asset: AssetUpload,
    ) -> CatalogFuture<'a, CreatedSet> {
        Box::pin(async move {
            self.create_calls.fetch_add(1, Ordering::Relaxed);
            let mut sets = self.sets.lock().await;
            if sets.values().any(|s| s.name == name) {
                return Err(Error::SetExists {
                    name: name.to_string(),
                });
            }
            let set_id = format!("mem-set:{}", uuid::Uuid::new_v4());
            let asset_id = format!("mem-asset:{}", uuid::Uuid::new_v4());
            sets.insert(
                set_id.clone(),
                RemoteSet {
                    remote_id: set_id.clone(),
                    name: name.to_string(),
                    tags: tags.to_vec(),
                    assets: vec![RemoteAsset {
                        remote_id: asset_id.clone(),
                        display_name: first_asset.display_name,
                    }],
                },
            );
            Ok(CreatedSet { set_id, asset_id })
        })
    }

    fn add_asset_to_set<'a>(
        &'a self,
        set_id: &'a str,
        asset: AssetUpload,
    ) -> CatalogFuture<'a, String> {
        Box::pin(async move {
            self.add_calls.fetch_add(1, Ordering::Relaxed);
            let mut sets = self.sets.lock().await;
            let set = sets
                .get_mut(set_id)
                .ok_or_else(|| Error::upload_permanent(format!("set not found: {set_id}")))?;
            if set
                .assets
                .iter()
                .any(|a| a.display_name == asset.display_name)
            {
                return Err(Error::AlreadyPresent {
                    display_name: asset.display_name,
                });
            }
            let asset_id = format!("mem-asset:{}", uuid::Uuid::new_v4());
            set.assets.push(RemoteAsset {
                remote_id: asset_id.clone(),
                display_name: asset.display_name,
            });
            Ok(asset_id)
        })
    }
}
