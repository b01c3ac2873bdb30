//! Entrypoint for the sync engine
//!
//! [`SyncController`] owns the pending ledger, the backlog and the contract database. Accepted
//! blocks feed the pending ledger; irreversible notifications promote pending candidates into the
//! database, fetching missed blocks from the node when the notification is ahead of the cursor.

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use contract_config::{CatchUpAnchor, SyncConfig};

use crate::{
    backlog::Backlog,
    error::SyncError,
    extract::extract_block,
    pending::PendingLedger,
    primitives::{Block, BlockTopology, Multihash, Notification, SyncMode, SyncStatus},
    store::ContractDb,
    traits::{BlockSource, KeyValueStore},
};

/// Log target of events that should not happen with a well behaved node
pub const ANOMALY_TARGET: &str = "contract_sync::anomaly";

// outcome of filtering an irreversible notification against the cursor
enum Admission {
    Stale,
    Next(BlockTopology),
    Queued,
}

/// Single owner of sync state
pub struct SyncController<S, B> {
    db: ContractDb<S>,
    source: B,
    pending: PendingLedger,
    backlog: Backlog,
    mode: SyncMode,
    batch_size: u64,
    anchor: CatchUpAnchor,
    inbox: Option<UnboundedReceiver<Notification>>,
}

impl<S, B> SyncController<S, B>
where
    S: KeyValueStore,
    B: BlockSource,
{
    pub fn new(db: ContractDb<S>, source: B, config: &SyncConfig) -> Self {
        SyncController {
            db,
            source,
            pending: PendingLedger::new(),
            backlog: Backlog::new(),
            mode: SyncMode::Idle,
            batch_size: config.effective_batch_size(),
            anchor: config.catch_up_anchor,
            inbox: None,
        }
    }

    pub fn db(&self) -> &ContractDb<S> {
        &self.db
    }

    pub fn pending(&self) -> &PendingLedger {
        &self.pending
    }

    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus::from_parts(
            self.mode,
            self.db.block_height(),
            self.db.total_contracts(),
            self.pending.len(),
            self.pending.heights(),
            self.backlog.heights(),
        )
    }

    /// Receives notifications until every sender of `inbox` is dropped.
    ///
    /// Only store failures end the loop early. Any other error is logged and the next
    /// irreversible notification picks up from the persisted cursor.
    pub async fn run(
        &mut self,
        inbox: UnboundedReceiver<Notification>,
    ) -> Result<(), SyncError> {
        self.inbox = Some(inbox);
        let result = self.receive_all().await;
        self.inbox = None;
        result
    }

    async fn receive_all(&mut self) -> Result<(), SyncError> {
        while let Some(notification) = self.next_notification().await {
            if let Err(e) = self.handle(notification).await {
                if e.is_fatal() {
                    error!("Sync stopped. {}", e);
                    return Err(e);
                }
                error!("{}", e);
            }
        }
        info!("Notification channel closed. Block height {}", self.db.block_height());
        Ok(())
    }

    async fn next_notification(&mut self) -> Option<Notification> {
        self.inbox.as_mut()?.recv().await
    }

    /// Dispatches one notification
    pub async fn handle(&mut self, notification: Notification) -> Result<(), SyncError> {
        match notification {
            Notification::BlockAccepted(block) => {
                self.on_accepted(&block);
                Ok(())
            }
            Notification::BlockIrreversible(topology) => self.on_irreversible(topology).await,
        }
    }

    /// Extracts contract uploads of an accepted block into the pending ledger.
    ///
    /// Blocks at or below the cursor are already final and are ignored.
    pub fn on_accepted(&mut self, block: &Block) -> usize {
        info!("Block accepted: {}", block.height);
        if block.height <= self.db.block_height() {
            debug!(
                "Accepted block {} is at or below block height {}",
                block.height,
                self.db.block_height()
            );
            return 0;
        }
        extract_block(block, &mut self.pending)
    }

    /// Finalizes `topology`, catching up first when it is ahead of the cursor.
    pub async fn on_irreversible(&mut self, topology: BlockTopology) -> Result<(), SyncError> {
        info!("Block irreversible: {}", topology.height);
        match self.admit(topology) {
            Admission::Stale => Ok(()),
            Admission::Next(topology) => self.promote(&topology),
            Admission::Queued if self.mode == SyncMode::Idle => self.catch_up().await,
            Admission::Queued => Ok(()),
        }
    }

    fn admit(&mut self, topology: BlockTopology) -> Admission {
        self.discard_orphans(&topology);
        if !self.pending.is_empty() {
            debug!(
                "There are {} contracts accepted in the queue from blocks: {:?}",
                self.pending.len(),
                self.pending.heights()
            );
        }

        let cursor = self.db.block_height();
        if topology.height <= cursor {
            warn!(
                "Irreversible block {} already in the database (block height: {}). Ignoring block",
                topology, cursor
            );
            return Admission::Stale;
        }
        if topology.height == cursor + 1 && self.mode == SyncMode::Idle {
            return Admission::Next(topology);
        }

        info!(
            "Queueing irreversible block {} with block height at {}",
            topology.height, cursor
        );
        if let Some(replaced) = self.backlog.insert(topology.clone()) {
            if replaced.id != topology.id {
                error!(
                    target: ANOMALY_TARGET,
                    "Irreversible block {} replaces conflicting {} in the backlog", topology, replaced
                );
            }
        }
        Admission::Queued
    }

    fn discard_orphans(&mut self, topology: &BlockTopology) {
        for orphan in self.pending.discard_orphans(topology) {
            debug!(
                "Discarding contract {} from orphaned block {}",
                orphan.contract_id(),
                orphan.block()
            );
        }
    }

    async fn catch_up(&mut self) -> Result<(), SyncError> {
        self.mode = SyncMode::CatchingUp;
        let result = self.run_catch_up().await;
        self.mode = SyncMode::Idle;
        result
    }

    async fn run_catch_up(&mut self) -> Result<(), SyncError> {
        let mut chain_head: Option<Multihash> = None;

        loop {
            self.drain_inbox();
            self.drop_stale_backlog();

            let Some(target) = self.backlog.first().cloned() else {
                break;
            };
            let next = self.db.block_height() + 1;
            if target.height == next {
                self.backlog.remove(target.height);
                self.promote(&target)?;
                continue;
            }

            let count = self.batch_size.min(target.height - next);
            let head = match (self.anchor, &chain_head) {
                (CatchUpAnchor::IrreversibleTarget, _) => target.id.clone(),
                (CatchUpAnchor::ChainHead, Some(head)) => head.clone(),
                (CatchUpAnchor::ChainHead, None) => {
                    let head = self.source.head_topology().await?;
                    info!("Catching up against chain head {}", head);
                    chain_head = Some(head.id.clone());
                    head.id
                }
            };

            info!(
                "Calling block store because block height is {} and irreversible block is {}",
                next - 1,
                target.height
            );
            let blocks = self.source.blocks_by_height(Some(&head), next, count).await?;
            if blocks.is_empty() {
                return Err(SyncError::EmptyBatch(next));
            }
            for block in blocks {
                let expected = self.db.block_height() + 1;
                if block.height != expected {
                    return Err(SyncError::UnexpectedBlock {
                        expected,
                        received: block.height,
                    });
                }
                extract_block(&block, &mut self.pending);
                self.promote(&block.topology())?;
                self.drain_inbox();
            }
        }

        Ok(())
    }

    fn drop_stale_backlog(&mut self) {
        let cursor = self.db.block_height();
        for stale in self.backlog.drain_at_or_below(cursor) {
            error!(
                target: ANOMALY_TARGET,
                "Irreversible block {} is behind block height {}. Dropping it", stale, cursor
            );
        }
    }

    // applies notifications that arrived while a catch-up pass was fetching
    fn drain_inbox(&mut self) {
        let Some(inbox) = self.inbox.as_mut() else {
            return;
        };
        let mut received = Vec::new();
        while let Ok(notification) = inbox.try_recv() {
            received.push(notification);
        }

        for notification in received {
            match notification {
                Notification::BlockAccepted(block) => {
                    self.on_accepted(&block);
                }
                Notification::BlockIrreversible(topology) => {
                    info!("Block irreversible: {}", topology.height);
                    self.admit(topology);
                }
            }
        }
    }

    /// Moves the pending candidates of `topology` into the database and sets the cursor to its
    /// height.
    ///
    /// `topology` must be at the cursor or right after it. Promoting the topology at the cursor
    /// again only rewrites the cursor. On a store failure the unwritten candidates stay pending
    /// and the cursor is unchanged.
    pub fn promote(&mut self, topology: &BlockTopology) -> Result<(), SyncError> {
        let cursor = self.db.block_height();
        if topology.height != cursor && topology.height != cursor + 1 {
            return Err(SyncError::NonSequentialPromotion {
                cursor,
                height: topology.height,
            });
        }

        self.discard_orphans(topology);
        if let Some(queued) = self.backlog.remove(topology.height) {
            if queued.id != topology.id {
                error!(
                    target: ANOMALY_TARGET,
                    "Finalized block {} conflicts with queued irreversible block {}",
                    topology,
                    queued
                );
            }
        }

        let mut finalized = self.pending.take_block(&topology.id).into_iter();
        while let Some(candidate) = finalized.next() {
            match self.db.append_contract(&candidate) {
                Ok(Some(record)) => info!(
                    "Contract {} appended to the database as number {}",
                    record.contract_id(),
                    record.number()
                ),
                Ok(None) => debug!(
                    "Contract {} from block {} already in the database",
                    candidate.contract_id(),
                    topology
                ),
                Err(e) => {
                    self.pending
                        .restore(std::iter::once(candidate).chain(finalized));
                    return Err(e.into());
                }
            }
        }

        let leftovers = self.pending.discard_at_or_below(topology.height);
        if !leftovers.is_empty() {
            error!(
                target: ANOMALY_TARGET,
                "{} contracts are still pending at or below finalized block {}. They will be removed: {:?}",
                leftovers.len(),
                topology,
                leftovers.iter().map(|c| c.contract_id()).collect::<Vec<_>>()
            );
        }

        self.db.put_block_height(topology.height)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };

    use proptest::prelude::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

    use crate::{
        client::ClientError,
        extract::tests::{signed_transaction, upload},
        keys::SigningKey,
        primitives::{Blob, ContractUploadCandidate, OriginTransaction},
        store::{MemoryStore, StoreError, WriteBatch},
    };

    use super::*;

    pub(crate) fn block_id(height: u64) -> Multihash {
        Multihash::sha256(format!("B{height}").as_bytes())
    }

    pub(crate) fn topology(height: u64) -> BlockTopology {
        BlockTopology::new(block_id(height), height)
    }

    pub(crate) fn empty_block(height: u64) -> Block {
        Block {
            id: block_id(height),
            height,
            transactions: Vec::new(),
        }
    }

    pub(crate) fn upload_block(height: u64, key: &SigningKey, contracts: &[&str]) -> Block {
        Block {
            id: block_id(height),
            height,
            transactions: vec![signed_transaction(
                key,
                &format!("T{height}"),
                contracts.iter().map(|c| upload(c)).collect(),
            )],
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct FetchCall {
        pub head: Option<Multihash>,
        pub start: u64,
        pub count: u64,
    }

    /// Canonical chain served from memory
    #[derive(Clone, Default)]
    pub(crate) struct MockBlockSource {
        chain: Arc<Mutex<BTreeMap<u64, Block>>>,
        calls: Arc<Mutex<Vec<FetchCall>>>,
        head_calls: Arc<Mutex<usize>>,
        fail: Arc<Mutex<bool>>,
        // sent into the controller's inbox on the next fetch
        deliver_on_fetch: Arc<Mutex<Vec<(UnboundedSender<Notification>, Notification)>>>,
    }

    impl MockBlockSource {
        pub(crate) fn with_chain(blocks: impl IntoIterator<Item = Block>) -> Self {
            let source = Self::default();
            source
                .chain
                .lock()
                .unwrap()
                .extend(blocks.into_iter().map(|b| (b.height, b)));
            source
        }

        pub(crate) fn empty_chain(heights: std::ops::RangeInclusive<u64>) -> Self {
            Self::with_chain(heights.map(empty_block))
        }

        pub(crate) fn calls(&self) -> Vec<FetchCall> {
            self.calls.lock().unwrap().clone()
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        fn deliver_on_fetch(&self, inbox: &UnboundedSender<Notification>, n: Notification) {
            self.deliver_on_fetch
                .lock()
                .unwrap()
                .push((inbox.clone(), n));
        }

        fn head(&self) -> Option<BlockTopology> {
            self.chain
                .lock()
                .unwrap()
                .values()
                .next_back()
                .map(Block::topology)
        }
    }

    impl BlockSource for MockBlockSource {
        async fn head_topology(&self) -> Result<BlockTopology, ClientError> {
            *self.head_calls.lock().unwrap() += 1;
            if *self.fail.lock().unwrap() {
                return Err(ClientError::FetcherClosed);
            }
            self.head().ok_or(ClientError::FetcherClosed)
        }

        async fn blocks_by_height(
            &self,
            head: Option<&Multihash>,
            start: u64,
            count: u64,
        ) -> Result<Vec<Block>, ClientError> {
            self.calls.lock().unwrap().push(FetchCall {
                head: head.cloned(),
                start,
                count,
            });
            for (inbox, notification) in self.deliver_on_fetch.lock().unwrap().drain(..) {
                let _ = inbox.send(notification);
            }
            if *self.fail.lock().unwrap() {
                return Err(ClientError::FetcherClosed);
            }
            Ok(self
                .chain
                .lock()
                .unwrap()
                .range(start..start + count)
                .map(|(_, block)| block.clone())
                .collect())
        }
    }

    /// Memory store that can be told to fail its next writes
    #[derive(Debug, Default)]
    pub(crate) struct FlakyStore {
        inner: MemoryStore,
        failing: Arc<Mutex<bool>>,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if *self.failing.lock().unwrap() {
                return Err(StoreError::Backend("disk unplugged".to_string()));
            }
            Ok(())
        }
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }

        fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put(key, value)
        }

        fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
            self.check()?;
            self.inner.delete(key)
        }

        fn apply(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
            self.check()?;
            self.inner.apply(batch)
        }
    }

    fn config(anchor: CatchUpAnchor) -> SyncConfig {
        let mut config = SyncConfig::create_unconnected(None);
        config.catch_up_anchor = anchor;
        config
    }

    pub(crate) fn controller_at<S: KeyValueStore>(
        store: S,
        cursor: u64,
        source: MockBlockSource,
    ) -> SyncController<S, MockBlockSource> {
        let mut db = ContractDb::open(store).unwrap();
        db.put_block_height(cursor).unwrap();
        SyncController::new(db, source, &config(CatchUpAnchor::ChainHead))
    }

    fn key() -> SigningKey {
        SigningKey::from_seed_phrase("deployer").unwrap()
    }

    #[tokio::test]
    async fn next_block_is_promoted_with_its_contracts() {
        let mut controller = controller_at(MemoryStore::new(), 9, MockBlockSource::default());
        let block = upload_block(10, &key(), &["1Token"]);

        assert_eq!(controller.on_accepted(&block), 1);
        controller.on_irreversible(topology(10)).await.unwrap();

        assert_eq!(controller.db().block_height(), 10);
        assert_eq!(controller.db().total_contracts(), 1);
        let record = controller.db().get_contract_by_number(0).unwrap();
        assert_eq!(record.contract_id(), "1Token");
        assert_eq!(record.block(), &topology(10));
        assert_eq!(record.transaction().signer, key().address());
        assert!(controller.pending().is_empty());
    }

    #[tokio::test]
    async fn same_contract_uploaded_twice_in_one_transaction_is_recorded_twice() {
        let mut controller = controller_at(MemoryStore::new(), 9, MockBlockSource::default());
        let block = upload_block(10, &key(), &["1Twice", "1Twice"]);

        assert_eq!(controller.on_accepted(&block), 2);
        controller.on_irreversible(topology(10)).await.unwrap();

        assert_eq!(controller.db().total_contracts(), 2);
        let store = controller.db().store();
        assert_eq!(store.get(b"N0").unwrap(), Some(b"1Twice".to_vec()));
        assert_eq!(store.get(b"N1").unwrap(), Some(b"1Twice".to_vec()));
        let latest = controller.db().get_contract_by_id("1Twice").unwrap().unwrap();
        assert_eq!((latest.number(), latest.operation_index()), (1, 1));
    }

    #[tokio::test]
    async fn replay_after_crash_before_cursor_write_numbers_nothing_twice() {
        let mut controller = controller_at(MemoryStore::new(), 9, MockBlockSource::default());
        let block = upload_block(10, &key(), &["1A", "1B", "1A"]);
        controller.on_accepted(&block);
        controller.on_irreversible(topology(10)).await.unwrap();
        assert_eq!(controller.db().total_contracts(), 3);

        // contracts written, cursor write lost
        let mut store = controller.db().store().clone();
        store.put(b"H", b"9").unwrap();
        let mut restarted = controller_at(store, 9, MockBlockSource::default());
        restarted.on_accepted(&block);
        restarted.on_irreversible(topology(10)).await.unwrap();

        assert_eq!(restarted.db().block_height(), 10);
        assert_eq!(restarted.db().total_contracts(), 3);
    }

    #[tokio::test]
    async fn orphaned_candidates_are_never_recorded() {
        let mut controller = controller_at(MemoryStore::new(), 9, MockBlockSource::default());
        controller.on_accepted(&upload_block(10, &key(), &["1Orphan"]));

        let winner = BlockTopology::new(Multihash::sha256(b"B10prime"), 10);
        controller.on_irreversible(winner).await.unwrap();

        assert_eq!(controller.db().block_height(), 10);
        assert_eq!(controller.db().total_contracts(), 0);
        assert!(controller.db().get_contract_by_id("1Orphan").unwrap().is_none());
        assert!(controller.pending().is_empty());
    }

    #[tokio::test]
    async fn gap_is_fetched_then_target_promoted_from_backlog() {
        let source = MockBlockSource::with_chain([
            empty_block(6),
            upload_block(7, &key(), &["1Seven"]),
            empty_block(8),
            empty_block(9),
        ]);
        let mut controller = controller_at(MemoryStore::new(), 5, source.clone());
        controller.on_accepted(&upload_block(9, &key(), &["1Nine"]));

        controller.on_irreversible(topology(9)).await.unwrap();

        assert_eq!(
            source.calls(),
            vec![FetchCall {
                head: Some(block_id(9)),
                start: 6,
                count: 3
            }]
        );
        assert_eq!(controller.db().block_height(), 9);
        assert_eq!(controller.db().get_contract_by_number(0).unwrap().contract_id(), "1Seven");
        assert_eq!(controller.db().get_contract_by_number(1).unwrap().contract_id(), "1Nine");
        assert_eq!(controller.mode(), SyncMode::Idle);
        assert!(controller.backlog().is_empty());
    }

    #[tokio::test]
    async fn duplicate_irreversible_is_stale() {
        let mut controller = controller_at(MemoryStore::new(), 10, MockBlockSource::default());
        let before = controller.status();

        controller.on_irreversible(topology(10)).await.unwrap();

        assert_eq!(controller.status(), before);
        assert!(controller.backlog().is_empty());
    }

    #[tokio::test]
    async fn accepted_block_behind_cursor_is_ignored() {
        let mut controller = controller_at(MemoryStore::new(), 10, MockBlockSource::default());
        assert_eq!(controller.on_accepted(&upload_block(10, &key(), &["1Late"])), 0);
        assert!(controller.pending().is_empty());
    }

    #[tokio::test]
    async fn large_gap_is_fetched_in_batches() {
        let source = MockBlockSource::empty_chain(1..=450);
        let mut controller = controller_at(MemoryStore::new(), 0, source.clone());

        controller.on_irreversible(topology(450)).await.unwrap();

        let batches: Vec<(u64, u64)> = source.calls().iter().map(|c| (c.start, c.count)).collect();
        assert_eq!(batches, vec![(1, 200), (201, 200), (401, 49)]);
        assert_eq!(*source.head_calls.lock().unwrap(), 1);
        assert_eq!(controller.db().block_height(), 450);
    }

    #[tokio::test]
    async fn irreversible_target_anchor_skips_head_lookup() {
        let source = MockBlockSource::empty_chain(1..=20);
        let mut db = ContractDb::open(MemoryStore::new()).unwrap();
        db.put_block_height(3).unwrap();
        let mut controller =
            SyncController::new(db, source.clone(), &config(CatchUpAnchor::IrreversibleTarget));

        controller.on_irreversible(topology(8)).await.unwrap();

        assert_eq!(*source.head_calls.lock().unwrap(), 0);
        assert_eq!(source.calls()[0].head, Some(block_id(8)));
        assert_eq!(controller.db().block_height(), 8);
    }

    #[tokio::test]
    async fn notifications_during_catch_up_are_applied_before_idle() {
        let source = MockBlockSource::empty_chain(1..=7);
        let (inbox_sender, inbox) = unbounded_channel();
        let mut controller = controller_at(MemoryStore::new(), 0, source.clone());
        controller.inbox = Some(inbox);

        // arrives while blocks 1..=4 are being fetched
        source.deliver_on_fetch(
            &inbox_sender,
            Notification::BlockAccepted(upload_block(6, &key(), &["1Six"])),
        );
        source.deliver_on_fetch(&inbox_sender, Notification::BlockIrreversible(topology(6)));
        source.deliver_on_fetch(&inbox_sender, Notification::BlockIrreversible(topology(2)));

        controller.on_irreversible(topology(5)).await.unwrap();

        assert_eq!(controller.db().block_height(), 6);
        assert_eq!(controller.db().get_contract_by_number(0).unwrap().contract_id(), "1Six");
        assert!(controller.backlog().is_empty());
        assert_eq!(controller.mode(), SyncMode::Idle);
    }

    #[tokio::test]
    async fn upstream_failure_leaves_state_resumable() {
        let source = MockBlockSource::empty_chain(1..=6);
        source.set_failing(true);
        let mut controller = controller_at(MemoryStore::new(), 2, source.clone());

        assert!(matches!(
            controller.on_irreversible(topology(6)).await,
            Err(SyncError::ClientError(_))
        ));
        assert_eq!(controller.db().block_height(), 2);
        assert_eq!(controller.mode(), SyncMode::Idle);
        assert_eq!(controller.backlog().heights(), vec![6]);

        source.set_failing(false);
        controller.on_irreversible(topology(6)).await.unwrap();
        assert_eq!(controller.db().block_height(), 6);
    }

    #[tokio::test]
    async fn empty_batch_is_an_error() {
        let source = MockBlockSource::empty_chain(1..=3);
        let mut controller = controller_at(MemoryStore::new(), 3, source);

        assert!(matches!(
            controller.on_irreversible(topology(9)).await,
            Err(SyncError::EmptyBatch(4))
        ));
        assert_eq!(controller.db().block_height(), 3);
    }

    #[tokio::test]
    async fn out_of_sequence_block_is_an_error() {
        let source = MockBlockSource::with_chain([empty_block(4), empty_block(6)]);
        let mut controller = controller_at(MemoryStore::new(), 3, source);

        assert!(matches!(
            controller.on_irreversible(topology(8)).await,
            Err(SyncError::UnexpectedBlock {
                expected: 5,
                received: 6
            })
        ));
        assert_eq!(controller.db().block_height(), 4);
    }

    #[test]
    fn promotion_is_idempotent() {
        let mut controller = controller_at(MemoryStore::new(), 9, MockBlockSource::default());
        controller.on_accepted(&upload_block(10, &key(), &["1Once"]));

        controller.promote(&topology(10)).unwrap();
        let after_first = controller.status();
        let store_after_first = controller.db().store().clone();

        controller.promote(&topology(10)).unwrap();
        assert_eq!(controller.status(), after_first);
        assert_eq!(
            format!("{:?}", controller.db().store()),
            format!("{:?}", store_after_first)
        );
    }

    #[test]
    fn promotion_must_continue_the_cursor() {
        let mut controller = controller_at(MemoryStore::new(), 9, MockBlockSource::default());
        for height in [8, 11] {
            assert!(matches!(
                controller.promote(&topology(height)),
                Err(SyncError::NonSequentialPromotion { cursor: 9, .. })
            ));
        }
        assert_eq!(controller.db().block_height(), 9);
    }

    #[test]
    fn leftover_candidates_at_final_height_are_dropped() {
        let mut controller = controller_at(MemoryStore::new(), 9, MockBlockSource::default());
        // extracted while the cursor was lower, never finalized
        controller.pending.insert_transaction(
            &block_id(10),
            &Multihash::sha256(b"stray"),
            vec![ContractUploadCandidate::from_parts(
                "1Stray".to_string(),
                Blob::default(),
                serde_json::Value::Null,
                BlockTopology::new(Multihash::sha256(b"unseen"), 8),
                OriginTransaction {
                    id: Multihash::sha256(b"stray"),
                    signer: "1Signer".to_string(),
                },
                0,
            )],
        );

        controller.promote(&topology(10)).unwrap();
        assert!(controller.pending().is_empty());
        assert_eq!(controller.db().total_contracts(), 0);
    }

    #[test]
    fn store_failure_keeps_candidates_pending() {
        let store = FlakyStore::default();
        let failing = store.failing.clone();
        let mut controller = controller_at(store, 9, MockBlockSource::default());
        controller.on_accepted(&upload_block(10, &key(), &["1A", "1B"]));

        *failing.lock().unwrap() = true;
        assert!(matches!(
            controller.promote(&topology(10)),
            Err(SyncError::StoreError(StoreError::Backend(_)))
        ));
        assert_eq!(controller.pending().len(), 2);
        assert_eq!(controller.db().block_height(), 9);

        *failing.lock().unwrap() = false;
        controller.promote(&topology(10)).unwrap();
        assert_eq!(controller.db().total_contracts(), 2);
        assert_eq!(controller.db().block_height(), 10);
    }

    #[tokio::test]
    async fn run_stops_on_store_failure() {
        let store = FlakyStore::default();
        let failing = store.failing.clone();
        let mut controller = controller_at(store, 0, MockBlockSource::default());
        let (sender, inbox) = unbounded_channel();

        *failing.lock().unwrap() = true;
        sender
            .send(Notification::BlockIrreversible(topology(1)))
            .unwrap();
        drop(sender);

        assert!(matches!(
            controller.run(inbox).await,
            Err(SyncError::StoreError(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Accept(u64),
        AcceptFork(u64),
        Irreversible(u64),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (1u64..40).prop_map(Step::Accept),
            (1u64..40).prop_map(Step::AcceptFork),
            (1u64..40).prop_map(Step::Irreversible),
        ]
    }

    fn canonical_block(height: u64, key: &SigningKey) -> Block {
        upload_block(height, key, &[&format!("1C{height}")])
    }

    fn fork_block(height: u64, key: &SigningKey) -> Block {
        Block {
            id: Multihash::sha256(format!("F{height}").as_bytes()),
            height,
            transactions: vec![signed_transaction(
                key,
                &format!("FT{height}"),
                vec![upload(&format!("1F{height}"))],
            )],
        }
    }

    proptest! {
        #[test]
        fn records_follow_the_finalized_chain(steps in proptest::collection::vec(step(), 1..30)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let key = key();
            let source =
                MockBlockSource::with_chain((1..=40).map(|height| canonical_block(height, &key)));
            let mut controller = controller_at(MemoryStore::new(), 0, source);

            let mut previous = 0;
            let mut accepted_ahead = std::collections::BTreeSet::new();
            for step in steps {
                let cursor = controller.db().block_height();
                match step {
                    Step::Accept(height) => {
                        if height > cursor {
                            accepted_ahead.insert(height);
                        }
                        controller.on_accepted(&canonical_block(height, &key));
                    }
                    Step::AcceptFork(height) => {
                        controller.on_accepted(&fork_block(height, &key));
                    }
                    Step::Irreversible(height) => {
                        runtime.block_on(controller.on_irreversible(topology(height))).unwrap();
                    }
                }
                let cursor = controller.db().block_height();
                prop_assert!(cursor >= previous);
                previous = cursor;
                prop_assert!(controller.pending().iter().all(|c| c.block().height > cursor));
            }

            let cursor = controller.db().block_height();
            let mut recorded_heights = Vec::new();
            for number in 0..controller.db().total_contracts() {
                let record = controller.db().get_contract_by_number(number).unwrap();
                let height = record.block().height;
                prop_assert!(height <= cursor);
                prop_assert_eq!(record.block(), &topology(height));
                prop_assert_eq!(record.contract_id(), &format!("1C{height}"));
                recorded_heights.push(height);
            }
            // numbered in finalization order, one record per finalized block
            prop_assert!(recorded_heights.windows(2).all(|pair| pair[0] < pair[1]));
            for height in accepted_ahead.range(..=cursor) {
                prop_assert!(recorded_heights.contains(height));
            }
            for height in 1..=40 {
                let fork = format!("1F{height}");
                prop_assert!(controller.db().get_contract_by_id(&fork).unwrap().is_none());
            }
        }
    }
}
