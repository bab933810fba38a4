use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::store::Store;

/// A [Store] whose every operation fails, standing in for a host where
/// durable storage is disabled or full
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableStore;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Store for UnavailableStore {
    async fn read(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
        Err(anyhow!("Storage not available"))
    }

    async fn write(&mut self, _key: &[u8], _bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        Err(anyhow!("Storage not available"))
    }

    async fn remove(&mut self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
        Err(anyhow!("Storage not available"))
    }
}
