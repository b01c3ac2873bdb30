//! Traits for interfacing the sync engine with storage and the upstream node

use std::future::Future;

use crate::client::ClientError;
use crate::primitives::{Block, BlockTopology, Multihash};
use crate::store::{StoreError, WriteBatch};

/// Ordered byte key value storage backing [`crate::store::ContractDb`]
pub trait KeyValueStore {
    /// Returns the value stored under `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Removes `key`. Removing a missing key is not an error
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Applies every write of `batch` or none of them
    fn apply(&mut self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// Source of finalized chain data
pub trait BlockSource {
    /// Topology of the current chain head
    fn head_topology(&self) -> impl Future<Output = Result<BlockTopology, ClientError>> + Send;

    /// Up to `count` consecutive blocks from `start` on the chain ending at `head`.
    /// The current chain head is used when `head` is `None`.
    fn blocks_by_height(
        &self,
        head: Option<&Multihash>,
        start: u64,
        count: u64,
    ) -> impl Future<Output = Result<Vec<Block>, ClientError>> + Send;
}
