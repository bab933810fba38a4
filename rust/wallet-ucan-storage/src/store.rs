use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use wallet_ucan_common::{ConditionalSend, ConditionalSync};

use crate::key_value::KeyValueStore;

/// A primitive interface for storage backends. Implementing [Store] is enough
/// to get a [KeyValueStore] for free; values are encoded as JSON, which keeps
/// persisted records human-inspectable and matches the shape the browser
/// build keeps in IndexedDB.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Store: Clone + ConditionalSync {
    /// Read the bytes stored against a given key
    async fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Writes bytes to storage against a given key, and returns the previous
    /// value stored against that key if any
    async fn write(&mut self, key: &[u8], bytes: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a value given a key, returning the removed value if any
    async fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Flushes pending writes if there are any
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<S> KeyValueStore for S
where
    S: Store,
{
    async fn set_key<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]> + ConditionalSend,
        V: Serialize + ConditionalSend,
    {
        let bytes = serde_json::to_vec(&value)?;
        let key_bytes = K::as_ref(&key);
        self.write(key_bytes, &bytes).await?;
        Ok(())
    }

    async fn get_key<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]> + ConditionalSend,
        V: DeserializeOwned + ConditionalSend,
    {
        let key_bytes = K::as_ref(&key);
        match self.read(key_bytes).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|error| {
                anyhow!(
                    "Could not decode value stored at '{}': {}",
                    String::from_utf8_lossy(key_bytes),
                    error
                )
            })?)),
            None => Ok(None),
        }
    }

    async fn unset_key<K>(&mut self, key: K) -> Result<()>
    where
        K: AsRef<[u8]> + ConditionalSend,
    {
        let key_bytes = K::as_ref(&key);
        self.remove(key_bytes).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Store::flush(self).await
    }
}
