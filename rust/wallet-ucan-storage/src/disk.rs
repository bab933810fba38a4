use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use sled::{Db, Tree};

use crate::store::Store;

/// The tree that session and token records are kept in unless another is
/// requested
pub const DEFAULT_SLED_TREE: &str = "wallet-ucan";

/// A disk-persisted [Store] backed by a named sled tree. This is the native
/// stand-in for the per-origin durable storage a browser offers.
#[derive(Clone, Debug)]
pub struct SledStore {
    tree: Tree,
    db: Db,
    path: PathBuf,
}

impl SledStore {
    /// Open or create a database at directory `path`, using the
    /// [DEFAULT_SLED_TREE]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_tree(path, DEFAULT_SLED_TREE)
    }

    /// Open or create a database at directory `path`, scoped to the tree
    /// `name`
    pub fn open_tree<P: AsRef<Path>>(path: P, name: &str) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let path = path.as_ref().canonicalize()?;
        let db = sled::open(&path)?;
        let tree = db.open_tree(name)?;

        debug!("Opened sled tree '{}' at {}", name, path.display());

        Ok(SledStore { tree, db, path })
    }

    /// The directory this store persists to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Store for SledStore {
    async fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|entry| entry.to_vec()))
    }

    async fn write(&mut self, key: &[u8], bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .tree
            .insert(key, bytes)?
            .map(|old_entry| old_entry.to_vec()))
    }

    async fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.remove(key)?.map(|entry| entry.to_vec()))
    }

    async fn flush(&self) -> Result<()> {
        // `flush_async()` can deadlock when simultaneous calls are performed,
        // see https://github.com/spacejam/sled/issues/1308
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::SledStore;
    use crate::KeyValueStore;

    #[tokio::test]
    async fn it_persists_values_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;

        {
            let mut store = SledStore::open(dir.path())?;
            store.set_key("authToken", "jwt-xyz").await?;
            store.flush().await?;
        }

        let store = SledStore::open(dir.path())?;
        let token: Option<String> = store.get_key("authToken").await?;

        assert_eq!(token.as_deref(), Some("jwt-xyz"));
        Ok(())
    }

    #[tokio::test]
    async fn it_isolates_trees() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut first = SledStore::open_tree(dir.path(), "first")?;
        first.set_key("authToken", "a").await?;

        let second = SledStore::open_tree(dir.path().join("other"), "second")?;
        let token: Option<String> = second.get_key("authToken").await?;

        assert_eq!(token, None);
        Ok(())
    }
}
