//! Contract uploads from accepted blocks awaiting finality

use crate::primitives::{BlockTopology, ContractUploadCandidate, Multihash};

/// Candidates in extraction order.
///
/// Each (block id, transaction id) pair is extracted at most once, so re-delivering an accepted
/// block adds nothing.
#[derive(Debug, Default)]
pub struct PendingLedger {
    candidates: Vec<ContractUploadCandidate>,
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContractUploadCandidate> {
        self.candidates.iter()
    }

    /// Whether uploads from this transaction of this block were already extracted
    pub fn contains(&self, block_id: &Multihash, transaction_id: &Multihash) -> bool {
        self.candidates
            .iter()
            .any(|c| &c.block().id == block_id && &c.transaction().id == transaction_id)
    }

    /// Adds every upload of one transaction. Returns false and adds nothing when the
    /// transaction was already extracted from this block.
    pub fn insert_transaction(
        &mut self,
        block_id: &Multihash,
        transaction_id: &Multihash,
        candidates: Vec<ContractUploadCandidate>,
    ) -> bool {
        if self.contains(block_id, transaction_id) {
            return false;
        }
        self.candidates.extend(candidates);
        true
    }

    /// Removes candidates at the height of `topology` that belong to another block.
    pub fn discard_orphans(&mut self, topology: &BlockTopology) -> Vec<ContractUploadCandidate> {
        self.take_where(|c| c.block().height == topology.height && c.block().id != topology.id)
    }

    /// Removes and returns the candidates of one block, in extraction order.
    pub fn take_block(&mut self, block_id: &Multihash) -> Vec<ContractUploadCandidate> {
        self.take_where(|c| &c.block().id == block_id)
    }

    /// Puts candidates taken by [`Self::take_block`] back in front, keeping their order.
    pub fn restore(&mut self, candidates: impl IntoIterator<Item = ContractUploadCandidate>) {
        let mut restored: Vec<_> = candidates.into_iter().collect();
        restored.append(&mut self.candidates);
        self.candidates = restored;
    }

    /// Removes candidates whose block height is at or below `height`.
    pub fn discard_at_or_below(&mut self, height: u64) -> Vec<ContractUploadCandidate> {
        self.take_where(|c| c.block().height <= height)
    }

    /// Distinct heights holding candidates, ascending
    pub fn heights(&self) -> Vec<u64> {
        let mut heights: Vec<u64> = self.candidates.iter().map(|c| c.block().height).collect();
        heights.sort_unstable();
        heights.dedup();
        heights
    }

    fn take_where(
        &mut self,
        predicate: impl Fn(&ContractUploadCandidate) -> bool,
    ) -> Vec<ContractUploadCandidate> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.candidates)
            .into_iter()
            .partition(|c| predicate(c));
        self.candidates = kept;
        taken
    }
}

#[cfg(test)]
mod tests {
    use crate::primitives::{Blob, OriginTransaction};

    use super::*;

    fn candidate(contract: &str, height: u64, block: &str, tx: &str) -> ContractUploadCandidate {
        ContractUploadCandidate::from_parts(
            contract.to_string(),
            Blob::new(vec![1, 2, 3]),
            serde_json::Value::Null,
            BlockTopology::new(Multihash::sha256(block.as_bytes()), height),
            OriginTransaction {
                id: Multihash::sha256(tx.as_bytes()),
                signer: "1Signer".to_string(),
            },
            0,
        )
    }

    fn insert(ledger: &mut PendingLedger, candidates: Vec<ContractUploadCandidate>) -> bool {
        let block = candidates[0].block().id.clone();
        let tx = candidates[0].transaction().id.clone();
        ledger.insert_transaction(&block, &tx, candidates)
    }

    #[test]
    fn transaction_is_extracted_once() {
        let mut ledger = PendingLedger::new();
        let uploads = vec![candidate("A", 5, "b5", "t1"), candidate("B", 5, "b5", "t1")];

        assert!(insert(&mut ledger, uploads.clone()));
        assert!(!insert(&mut ledger, uploads));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn same_transaction_in_another_block_is_separate() {
        let mut ledger = PendingLedger::new();
        assert!(insert(&mut ledger, vec![candidate("A", 5, "b5", "t1")]));
        assert!(insert(&mut ledger, vec![candidate("A", 5, "b5'", "t1")]));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn orphans_at_same_height_are_discarded() {
        let mut ledger = PendingLedger::new();
        insert(&mut ledger, vec![candidate("X", 5, "b5", "t1")]);
        insert(&mut ledger, vec![candidate("Y", 5, "b5'", "t2")]);
        insert(&mut ledger, vec![candidate("Z", 6, "b6", "t3")]);

        let final_topology = BlockTopology::new(Multihash::sha256(b"b5'"), 5);
        let orphans = ledger.discard_orphans(&final_topology);

        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].contract_id(), "X");
        assert_eq!(ledger.heights(), vec![5, 6]);
    }

    #[test]
    fn restore_puts_candidates_back_in_order() {
        let mut ledger = PendingLedger::new();
        insert(
            &mut ledger,
            vec![candidate("A", 5, "b5", "t1"), candidate("B", 5, "b5", "t1")],
        );
        insert(&mut ledger, vec![candidate("C", 6, "b6", "t2")]);

        let mut taken = ledger.take_block(&Multihash::sha256(b"b5")).into_iter();
        assert_eq!(taken.next().unwrap().contract_id(), "A");
        ledger.restore(taken);

        let order: Vec<_> = ledger.iter().map(|c| c.contract_id().as_str()).collect();
        assert_eq!(order, vec!["B", "C"]);
    }

    #[test]
    fn discard_at_or_below_keeps_higher() {
        let mut ledger = PendingLedger::new();
        insert(&mut ledger, vec![candidate("A", 4, "b4", "t1")]);
        insert(&mut ledger, vec![candidate("B", 5, "b5", "t2")]);
        insert(&mut ledger, vec![candidate("C", 6, "b6", "t3")]);

        assert_eq!(ledger.discard_at_or_below(5).len(), 2);
        assert_eq!(ledger.heights(), vec![6]);
    }
}
