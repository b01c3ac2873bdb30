//! [`KeyValueStore`] on a sled database

use std::path::Path;

use crate::{
    store::{StoreError, WriteBatch},
    traits::KeyValueStore,
};

const TREE_NAME: &str = "contracts";

/// Sled tree flushed after every write
#[derive(Debug, Clone)]
pub struct SledStore {
    tree: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { tree })
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush()?;
        Ok(())
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.get(key)?.map(|value| value.to_vec()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tree.insert(key, value)?;
        self.flush()
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.tree.remove(key)?;
        self.flush()
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch.into_puts() {
            sled_batch.insert(key, value);
        }
        self.tree.apply_batch(sled_batch)?;
        self.flush()
    }
}
