//! Durable store of finalized contracts and the finality cursor
//!
//! Key layout:
//! - `H`: height of the last finalized block
//! - `T`: number of contracts recorded
//! - `N<n>`: id of the contract recorded at position `n`, from 0
//! - `C<id>`: latest record of contract `id`
//!
//! Values are json, except `N<n>` which holds the raw contract id.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    primitives::{ContractRecord, ContractUploadCandidate},
    traits::KeyValueStore,
};

pub mod sled_store;

pub use sled_store::SledStore;

/// Errors associated with the durable store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Sled failed
    #[error("Database error. {0}")]
    Db(#[from] sled::Error),
    /// Any other backend failure
    #[error("Storage backend failure. {0}")]
    Backend(String),
    /// Stored bytes could not be decoded
    #[error("Corrupt value under key '{key}'. {reason}")]
    Corrupt { key: String, reason: String },
    /// Value could not be encoded
    #[error("Failed to encode value for key '{key}'. {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
    /// No contract at this position
    #[error("Contract number {number} not found. Total contracts: {total}")]
    ContractNumberNotFound { number: u64, total: u64 },
    /// Cursor write would move it backwards
    #[error("Block height cannot move back from {current} to {requested}")]
    CursorRegression { current: u64, requested: u64 },
}

pub(crate) mod keys {
    pub const BLOCK_HEIGHT: &[u8] = b"H";
    pub const TOTAL_CONTRACTS: &[u8] = b"T";

    pub fn contract(id: &str) -> Vec<u8> {
        format!("C{id}").into_bytes()
    }

    pub fn contract_number(number: u64) -> Vec<u8> {
        format!("N{number}").into_bytes()
    }
}

/// Writes applied together by [`KeyValueStore::apply`]
#[derive(Debug, Default)]
pub struct WriteBatch {
    puts: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.puts.push((key.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.puts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty()
    }

    pub fn into_puts(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.puts
    }
}

/// In memory store, for tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        self.entries.extend(batch.into_puts());
        Ok(())
    }
}

fn encode<T: Serialize + ?Sized>(key: &[u8], value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|source| StoreError::Encode {
        key: String::from_utf8_lossy(key).into_owned(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: e.to_string(),
    })
}

/// Contract records and the finality cursor over a [`KeyValueStore`]
#[derive(Debug)]
pub struct ContractDb<S> {
    store: S,
    block_height: u64,
    total_contracts: u64,
}

impl<S: KeyValueStore> ContractDb<S> {
    /// Loads the cursor and the contract count. Missing counters are written as zero.
    pub fn open(mut store: S) -> Result<Self, StoreError> {
        let mut batch = WriteBatch::new();
        let mut counter = |key: &'static [u8]| -> Result<u64, StoreError> {
            match Self::read(&store, key)? {
                Some(value) => Ok(value),
                None => {
                    batch.put(key, encode(key, &0u64)?);
                    Ok(0)
                }
            }
        };
        let block_height = counter(keys::BLOCK_HEIGHT)?;
        let total_contracts = counter(keys::TOTAL_CONTRACTS)?;
        if !batch.is_empty() {
            store.apply(batch)?;
        }
        Ok(ContractDb {
            store,
            block_height,
            total_contracts,
        })
    }

    fn read<T: DeserializeOwned>(store: &S, key: &[u8]) -> Result<Option<T>, StoreError> {
        store
            .get(key)?
            .map(|bytes| decode(key, &bytes))
            .transpose()
    }

    /// Height of the last finalized block
    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    pub fn total_contracts(&self) -> u64 {
        self.total_contracts
    }

    /// Moves the cursor to `height`. Writing the current height again is a no-op.
    pub fn put_block_height(&mut self, height: u64) -> Result<(), StoreError> {
        if height < self.block_height {
            return Err(StoreError::CursorRegression {
                current: self.block_height,
                requested: height,
            });
        }
        if height == self.block_height {
            return Ok(());
        }
        self.store
            .put(keys::BLOCK_HEIGHT, &encode(keys::BLOCK_HEIGHT, &height)?)?;
        self.block_height = height;
        Ok(())
    }

    /// Records a finalized upload under the next contract number.
    ///
    /// Returns `None` when the latest record of this contract already covers the upload, so
    /// replaying a promotion does not number an upload twice.
    pub fn append_contract(
        &mut self,
        candidate: &ContractUploadCandidate,
    ) -> Result<Option<ContractRecord>, StoreError> {
        if let Some(existing) = self.get_contract_by_id(candidate.contract_id())? {
            if existing.covers(candidate) {
                return Ok(None);
            }
        }

        let number = self.total_contracts;
        let total = number + 1;
        let record = ContractRecord::from_candidate(candidate, number);
        let contract_key = keys::contract(candidate.contract_id());

        let mut batch = WriteBatch::new();
        batch.put(contract_key.clone(), encode(&contract_key, &record)?);
        batch.put(
            keys::contract_number(number),
            candidate.contract_id().as_bytes(),
        );
        batch.put(keys::TOTAL_CONTRACTS, encode(keys::TOTAL_CONTRACTS, &total)?);
        self.store.apply(batch)?;

        self.total_contracts = total;
        Ok(Some(record))
    }

    pub fn get_contract_by_id(
        &self,
        contract_id: &str,
    ) -> Result<Option<ContractRecord>, StoreError> {
        Self::read(&self.store, &keys::contract(contract_id))
    }

    /// Record of the contract recorded at position `number`, counting from 0.
    pub fn get_contract_by_number(&self, number: u64) -> Result<ContractRecord, StoreError> {
        let not_found = || StoreError::ContractNumberNotFound {
            number,
            total: self.total_contracts,
        };
        if number >= self.total_contracts {
            return Err(not_found());
        }
        let key = keys::contract_number(number);
        let contract_id = self.store.get(&key)?.ok_or_else(not_found)?;
        let contract_id = String::from_utf8(contract_id).map_err(|e| StoreError::Corrupt {
            key: String::from_utf8_lossy(&key).into_owned(),
            reason: e.to_string(),
        })?;
        self.get_contract_by_id(&contract_id)?.ok_or_else(not_found)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
