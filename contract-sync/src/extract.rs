//! Extraction of contract upload candidates from accepted blocks

use tracing::{debug, warn};

use crate::{
    pending::PendingLedger,
    primitives::{
        Block, ContractUploadCandidate, Operation, OriginTransaction, Transaction,
        UploadContractOperation,
    },
    signer::recover_signer,
};

/// Adds the contract uploads of `block` to `pending`, returning how many were added.
///
/// Transactions already extracted from this block are skipped. A transaction whose signer cannot
/// be recovered is skipped with a warning.
pub fn extract_block(block: &Block, pending: &mut PendingLedger) -> usize {
    let topology = block.topology();
    let mut added = 0;

    for transaction in &block.transactions {
        let uploads: Vec<(u32, &UploadContractOperation)> = transaction
            .operations
            .iter()
            .zip(0u32..)
            .filter_map(|(operation, index)| match operation {
                Operation::UploadContract(upload) => Some((index, upload)),
                Operation::Other(_) => None,
            })
            .collect();
        if uploads.is_empty() || pending.contains(&topology.id, &transaction.id) {
            continue;
        }

        let Some(origin) = origin(transaction) else {
            continue;
        };
        let candidates: Vec<ContractUploadCandidate> = uploads
            .into_iter()
            .map(|(index, upload)| {
                ContractUploadCandidate::from_parts(
                    upload.contract_id.clone(),
                    upload.bytecode.clone(),
                    upload.extensions.clone(),
                    topology.clone(),
                    origin.clone(),
                    index,
                )
            })
            .collect();

        let count = candidates.len();
        if pending.insert_transaction(&topology.id, &transaction.id, candidates) {
            debug!(
                "{} contract uploads from transaction {} pending in block {}",
                count, transaction.id, topology
            );
            added += count;
        }
    }

    added
}

fn origin(transaction: &Transaction) -> Option<OriginTransaction> {
    match recover_signer(transaction.signature.as_bytes(), &transaction.id) {
        Ok(signer) => Some(OriginTransaction {
            id: transaction.id.clone(),
            signer,
        }),
        Err(e) => {
            warn!(
                "Skipping contract uploads of transaction {}: signer not recoverable. {}",
                transaction.id, e
            );
            None
        }
    }
}
