//! Cache-first watermark reads.

use quire_store::{LogStore, StoreError};
use quire_model::Watermark;

/// In-memory copy of `lastAdded`/`lastSynced`, filled from the store on miss.
///
/// The outer `Option` is "not loaded yet"; the inner one is the empty watermark.
#[derive(Debug, Default, Clone)]
pub struct WatermarkCache {
    last_added: Option<Option<Watermark>>,
    last_synced: Option<Option<Watermark>>,
}

impl WatermarkCache {
    /// A cache primed from the store.
    pub fn load(store: &LogStore) -> Result<Self, StoreError> {
        Ok(Self {
            last_added: Some(store.last_added()?),
            last_synced: Some(store.last_synced()?),
        })
    }

    pub fn last_added(&mut self, store: &LogStore) -> Result<Option<Watermark>, StoreError> {
        if let Some(cached) = &self.last_added {
            return Ok(cached.clone());
        }
        let loaded = store.last_added()?;
        self.last_added = Some(loaded.clone());
        Ok(loaded)
    }

    pub fn last_synced(&mut self, store: &LogStore) -> Result<Option<Watermark>, StoreError> {
        if let Some(cached) = &self.last_synced {
            return Ok(cached.clone());
        }
        let loaded = store.last_synced()?;
        self.last_synced = Some(loaded.clone());
        Ok(loaded)
    }

    pub fn set_last_added(&mut self, watermark: Watermark) {
        self.last_added = Some(Some(watermark));
    }

    pub fn set_last_synced(&mut self, watermark: Watermark) {
        self.last_synced = Some(Some(watermark));
    }

    /// Forget both values; the next read goes to the store.
    pub fn invalidate(&mut self) {
        self.last_added = None;
        self.last_synced = None;
    }
}
