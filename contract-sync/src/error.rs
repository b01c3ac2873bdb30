//! Top level error module for the crate

use crate::{client::ClientError, store::StoreError};

/// Top level error enum encapsulating any error that may occur during sync
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Errors associated with the durable store
    #[error("Store error. {0}")]
    StoreError(#[from] StoreError),
    /// Errors associated with fetching from the node
    #[error("Client error. {0}")]
    ClientError(#[from] ClientError),
    /// Promotion asked for a height that does not continue the cursor
    #[error("Cannot promote height {height} with block height at {cursor}")]
    NonSequentialPromotion {
        /// Height of the last finalized block
        cursor: u64,
        /// Height asked for
        height: u64,
    },
    /// Node returned no blocks for a catch-up batch
    #[error("Node returned no blocks from height {0}")]
    EmptyBatch(u64),
    /// Node returned a block out of sequence
    #[error("Node returned block at height {received} while expecting {expected}")]
    UnexpectedBlock {
        /// Height that continues the cursor
        expected: u64,
        /// Height received
        received: u64,
    },
    /// The sync worker task panicked or was cancelled
    #[error("Sync worker failed. {0}")]
    WorkerError(String),
}

impl SyncError {
    /// Errors that stop the service. Everything else is logged and the next notification retries.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::StoreError(_) | SyncError::WorkerError(_))
    }
}
