use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use crate::store::Store;

/// A memory-backed [Store]. Clones share the same entries.
///
/// Useful for tokens that should not outlive the process, and for testing.
#[derive(Clone, Default, Debug)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    /// The number of keys currently held
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// True if nothing has been stored (or everything was removed)
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Clones this store without sharing the underlying data
    pub async fn fork(&self) -> Self {
        MemoryStore {
            entries: Arc::new(Mutex::new(self.entries.lock().await.clone())),
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Store for MemoryStore {
    async fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned())
    }

    async fn write(&mut self, key: &[u8], bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        trace!("Writing {} bytes to memory", bytes.len());
        Ok(entries.insert(key.to_vec(), bytes.to_vec()))
    }

    async fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key))
    }
}
