//! In-memory collaborators for dry runs and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{AssetRecordUpdate, AssetResolver, AssetSource, AssetStore};
use crate::Result;

/// Asset sources registered up front.
#[derive(Debug, Default)]
pub struct InMemoryAssetRegistry {
    sources: RwLock<HashMap<String, AssetSource>>,
}

impl InMemoryAssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, asset_id: impl Into<String>, source: AssetSource) {
        self.sources.write().insert(asset_id.into(), source);
    }

    pub fn remove(&self, asset_id: &str) -> Option<AssetSource> {
        self.sources.write().remove(asset_id)
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }
}

#[async_trait]
impl AssetResolver for InMemoryAssetRegistry {
    async fn resolve(&self, asset_id: &str) -> Result<Option<AssetSource>> {
        Ok(self.sources.read().get(asset_id).cloned())
    }
}

/// Keeps every record update it receives, in order.
#[derive(Debug, Default)]
pub struct InMemoryAssetStore {
    records: RwLock<Vec<(String, AssetRecordUpdate)>>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All updates received so far.
    pub fn records(&self) -> Vec<(String, AssetRecordUpdate)> {
        self.records.read().clone()
    }

    /// Most recent update for an asset.
    pub fn latest(&self, asset_id: &str) -> Option<AssetRecordUpdate> {
        self.records
            .read()
            .iter()
            .rev()
            .find(|(id, _)| id == asset_id)
            .map(|(_, update)| update.clone())
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn update_asset_record(&self, asset_id: &str, update: &AssetRecordUpdate) -> Result<()> {
        self.records
            .write()
            .push((asset_id.to_string(), update.clone()));
        Ok(())
    }
}
