use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use wallet_ucan_common::{ConditionalSend, ConditionalSync};

/// Typed records addressed by key, such as the bearer token under
/// `authToken` or a session under `ucan-sessions/<id>`. Clones share the
/// same records. A single write is atomic; there are no multi-key
/// transactions.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait KeyValueStore: Clone + ConditionalSync {
    /// Replace whatever is stored under `key` with `value`
    async fn set_key<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]> + ConditionalSend,
        V: Serialize + ConditionalSend;

    /// The record under `key`; [None] if nothing is stored there, an error
    /// if what is stored does not decode as `V`
    async fn get_key<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]> + ConditionalSend,
        V: DeserializeOwned + ConditionalSend;

    /// Remove the record under `key`, if any
    async fn unset_key<K>(&mut self, key: K) -> Result<()>
    where
        K: AsRef<[u8]> + ConditionalSend;

    /// Make previous writes durable. A no-op for stores that are durable
    /// on every write, or never durable at all.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
