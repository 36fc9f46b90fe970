//! End-to-end deposit lifecycle tests
//!
//! Drives the service and watcher against simulated chains:
//! create → detect → confirm → payout, plus restart and funding edge cases.
//!
//! To run: cargo test --test lifecycle

use async_trait::async_trait;
use hdbridge::chain::MemoryChain;
use hdbridge::derivation::{derive_public_extended_key, verify_deposit_address, BridgeSeed};
use hdbridge::service::{DepositService, ServiceError};
use hdbridge::storage::{
    DepositFilter, DepositStore, MemoryDepositStore, SqliteDepositStore, StorageError,
    StorageResult,
};
use hdbridge::types::{
    Address, CreateDepositRequest, CreateDepositResponse, Deposit, DepositStatus, PayoutStatus,
    TxHash,
};
use hdbridge::watcher::{DepositWatcher, ManualClock, PayoutOutcome, WatcherConfig};
use primitive_types::U256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MNEMONIC: &str = "test test test test test test test test test test test junk";
const DESTINATION: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";
const ONE_ETHER: u64 = 1_000_000_000_000_000_000;

struct Bridge {
    source: MemoryChain,
    payout: MemoryChain,
    store: Arc<dyn DepositStore>,
    clock: Arc<ManualClock>,
    seed: BridgeSeed,
    service: DepositService,
}

impl Bridge {
    fn new(store: Arc<dyn DepositStore>) -> Self {
        let seed = BridgeSeed::from_mnemonic(MNEMONIC, "").unwrap();
        let xpub = derive_public_extended_key(&seed).unwrap();
        let source = MemoryChain::new();
        let service = DepositService::new(
            store.clone(),
            Arc::new(source.clone()),
            seed.clone(),
            xpub,
        );

        Self {
            source,
            payout: MemoryChain::new(),
            store,
            clock: Arc::new(ManualClock::new(1_700_000_000)),
            seed,
            service,
        }
    }

    fn watcher(&self, id: &str) -> DepositWatcher {
        DepositWatcher::new(
            self.store.clone(),
            Arc::new(self.source.clone()),
            Arc::new(self.payout.clone()),
            Arc::new(self.payout.clone()),
            self.seed.clone(),
            WatcherConfig {
                poll_interval: Duration::from_secs(5),
                ..WatcherConfig::default()
            },
            self.clock.clone(),
        )
        .with_id(id)
    }

    async fn create(&self, nonce: u64, amount: u64) -> CreateDepositResponse {
        self.service
            .create_deposit(&CreateDepositRequest {
                destination_address: DESTINATION.to_string(),
                amount: serde_json::json!(amount.to_string()),
                nonce: Some(serde_json::json!(nonce)),
            })
            .await
            .unwrap()
    }

    async fn deposit_id(&self, address: &Address) -> String {
        self.store.get_by_address(address).await.unwrap().unwrap().id
    }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let bridge = Bridge::new(Arc::new(MemoryDepositStore::new()));
    let watcher = bridge.watcher("watcher-1");
    bridge.source.mine_empty(100).await;

    let created = bridge.create(0, ONE_ETHER).await;
    let xpub = bridge.service.xpub().to_string();
    assert!(verify_deposit_address(
        &xpub,
        DESTINATION,
        0,
        &created.deposit_address.to_string()
    ));

    // Nothing funded yet
    watcher.tick().await;
    let status = bridge
        .service
        .get_deposit_status(&created.deposit_address.to_string())
        .await
        .unwrap();
    assert_eq!(status.deposit.status, DepositStatus::Waiting);

    // User funds the deposit address at height H
    let (deposit_tx, height) = bridge
        .source
        .transfer_to(created.deposit_address, U256::from(ONE_ETHER))
        .await;
    watcher.tick().await;
    let status = bridge
        .service
        .get_deposit_status(&created.deposit_address.to_string())
        .await
        .unwrap();
    assert_eq!(status.deposit.status, DepositStatus::Confirming);
    assert_eq!(status.deposit.tx_hash, Some(deposit_tx));
    assert_eq!(status.deposit.block_number, Some(height));

    // Payout wallet (same derived key on the payout chain) is funded
    bridge
        .payout
        .set_balance(created.deposit_address, U256::from(2 * ONE_ETHER))
        .await;

    // H+6: still confirming
    bridge.source.mine_empty(6).await;
    watcher.tick().await;
    let status = bridge
        .service
        .get_deposit_status(&created.deposit_address.to_string())
        .await
        .unwrap();
    assert_eq!(status.deposit.status, DepositStatus::Confirming);
    assert_eq!(status.payout.status, PayoutStatus::Pending);

    // H+7: confirmed and paid in the same tick
    bridge.source.mine_empty(1).await;
    let report = watcher.tick().await;
    let id = bridge.deposit_id(&created.deposit_address).await;
    let payout_hash = match report.payout_outcome(&id) {
        Some(PayoutOutcome::Sent(hash)) => *hash,
        other => panic!("unexpected outcome {:?}", other),
    };

    let status = bridge
        .service
        .get_deposit_status(&created.deposit_address.to_string())
        .await
        .unwrap();
    assert_eq!(status.deposit.status, DepositStatus::Confirmed);
    assert_eq!(status.payout.status, PayoutStatus::Sent);
    assert_eq!(status.payout.tx_hash, Some(payout_hash));
    assert_eq!(status.payout.amount, Some(U256::from(ONE_ETHER)));

    let destination: Address = DESTINATION.parse().unwrap();
    assert_eq!(bridge.payout.balance(&destination).await, U256::from(ONE_ETHER));

    let stats = bridge.service.stats().await.unwrap();
    assert_eq!(stats.payout_sent, 1);
    assert_eq!(stats.total_paid_out_wei, U256::from(ONE_ETHER));
}

#[tokio::test]
async fn test_restart_after_broadcast_settles_without_resend() {
    let bridge = Bridge::new(Arc::new(MemoryDepositStore::new()));
    let created = bridge.create(1, 500).await;
    bridge.payout.set_balance(created.deposit_address, U256::from(500u64)).await;

    bridge.source.transfer_to(created.deposit_address, U256::from(500u64)).await;
    bridge.source.mine_empty(7).await;

    // First watcher broadcasts, then loses sight of the receipt
    bridge.payout.set_withhold_receipts(true).await;
    let crashed = bridge.watcher("watcher-crashed");
    crashed.tick().await;
    let report = crashed.tick().await;
    let id = bridge.deposit_id(&created.deposit_address).await;
    assert!(report.payout_outcome(&id).is_none());
    drop(crashed);

    let in_flight = bridge.store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(in_flight.payout_status, PayoutStatus::Pending);
    assert!(in_flight.payout_tx_hash.is_some());

    // Receipt lands while no watcher runs; a fresh process settles it
    bridge.payout.release_receipts().await;
    let restarted = bridge.watcher("watcher-restarted");
    let report = restarted.tick().await;
    assert_eq!(report.recovery.advanced, 1);

    let settled = bridge.store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(settled.payout_status, PayoutStatus::Sent);
    assert_eq!(settled.payout_tx_hash, in_flight.payout_tx_hash);
    assert_eq!(bridge.payout.sent_transfers().await.len(), 1);
}

#[tokio::test]
async fn test_insufficient_funds_retried_on_later_tick() {
    let bridge = Bridge::new(Arc::new(MemoryDepositStore::new()));
    let watcher = bridge.watcher("watcher-1");
    let created = bridge.create(2, 750).await;

    bridge.source.transfer_to(created.deposit_address, U256::from(750u64)).await;
    watcher.tick().await;
    bridge.source.mine_empty(7).await;

    let report = watcher.tick().await;
    let id = bridge.deposit_id(&created.deposit_address).await;
    assert!(matches!(
        report.payout_outcome(&id),
        Some(PayoutOutcome::InsufficientFunds { .. })
    ));

    let deferred = bridge.store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(deferred.deposit_status, DepositStatus::Confirmed);
    assert_eq!(deferred.payout_status, PayoutStatus::Pending);
    assert!(deferred.claimed_by.is_none());

    bridge.payout.set_balance(created.deposit_address, U256::from(750u64)).await;
    let report = watcher.tick().await;
    assert!(matches!(
        report.payout_outcome(&id),
        Some(PayoutOutcome::Sent(_))
    ));
}

#[tokio::test]
async fn test_lifecycle_on_sqlite() {
    let path = std::env::temp_dir().join(format!(
        "hdbridge-lifecycle-{}-{}.db",
        std::process::id(),
        rand::random::<u32>()
    ));
    let bridge = Bridge::new(Arc::new(SqliteDepositStore::new(&path).unwrap()));
    let first = bridge.watcher("watcher-a");
    let second = bridge.watcher("watcher-b");

    let created = bridge.create(3, 900).await;
    bridge.payout.set_balance(created.deposit_address, U256::from(10_000u64)).await;
    bridge.source.transfer_to(created.deposit_address, U256::from(900u64)).await;
    first.tick().await;
    bridge.source.mine_empty(7).await;

    // Two watchers race for the same confirmed deposit
    let (a, b) = tokio::join!(first.tick(), second.tick());
    let id = bridge.deposit_id(&created.deposit_address).await;
    let sent = [a, b]
        .iter()
        .filter(|r| matches!(r.payout_outcome(&id), Some(PayoutOutcome::Sent(_))))
        .count();
    assert_eq!(sent, 1);
    assert_eq!(bridge.payout.sent_transfers().await.len(), 1);

    let _ = std::fs::remove_file(&path);
}

/// Memory store whose next `record_payout_hash` fails with a connection error
struct FlakyRecordStore {
    inner: MemoryDepositStore,
    fail_next_record: AtomicBool,
}

impl FlakyRecordStore {
    fn new() -> Self {
        Self {
            inner: MemoryDepositStore::new(),
            fail_next_record: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl DepositStore for FlakyRecordStore {
    async fn insert(&self, deposit: &Deposit) -> StorageResult<()> {
        self.inner.insert(deposit).await
    }
    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Deposit>> {
        self.inner.get_by_id(id).await
    }
    async fn get_by_address(&self, address: &Address) -> StorageResult<Option<Deposit>> {
        self.inner.get_by_address(address).await
    }
    async fn get_by_destination(
        &self,
        destination: &Address,
        nonce: u64,
    ) -> StorageResult<Option<Deposit>> {
        self.inner.get_by_destination(destination, nonce).await
    }
    async fn list(&self, filter: DepositFilter) -> StorageResult<Vec<Deposit>> {
        self.inner.list(filter).await
    }
    async fn get_all(&self) -> StorageResult<Vec<Deposit>> {
        self.inner.get_all().await
    }
    async fn count_by_status(&self) -> StorageResult<HashMap<String, u64>> {
        self.inner.count_by_status().await
    }
    async fn count_by_payout_status(&self) -> StorageResult<HashMap<String, u64>> {
        self.inner.count_by_payout_status().await
    }
    async fn total_paid_out(&self) -> StorageResult<U256> {
        self.inner.total_paid_out().await
    }
    async fn mark_confirming(
        &self,
        id: &str,
        tx_hash: &TxHash,
        block_number: u64,
        now: u64,
    ) -> StorageResult<bool> {
        self.inner.mark_confirming(id, tx_hash, block_number, now).await
    }
    async fn mark_confirmed(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.inner.mark_confirmed(id, now).await
    }
    async fn claim_deposit_for_processing(
        &self,
        id: &str,
        claimant: &str,
        now: u64,
    ) -> StorageResult<bool> {
        self.inner.claim_deposit_for_processing(id, claimant, now).await
    }
    async fn release_claim(&self, id: &str, claimant: &str, now: u64) -> StorageResult<bool> {
        self.inner.release_claim(id, claimant, now).await
    }
    async fn record_payout_hash(
        &self,
        id: &str,
        claimant: &str,
        tx_hash: &TxHash,
        amount: U256,
        now: u64,
    ) -> StorageResult<bool> {
        if self.fail_next_record.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Connection("connection reset".to_string()));
        }
        self.inner
            .record_payout_hash(id, claimant, tx_hash, amount, now)
            .await
    }
    async fn mark_payout_sent(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.inner.mark_payout_sent(id, now).await
    }
    async fn mark_payout_failed(&self, id: &str, error: &str, now: u64) -> StorageResult<bool> {
        self.inner.mark_payout_failed(id, error, now).await
    }
    async fn fail_claimed_payout(
        &self,
        id: &str,
        claimant: &str,
        broadcast: Option<&TxHash>,
        error: &str,
        now: u64,
    ) -> StorageResult<bool> {
        self.inner
            .fail_claimed_payout(id, claimant, broadcast, error, now)
            .await
    }
    async fn reset_payout(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.inner.reset_payout(id, now).await
    }
}

#[tokio::test]
async fn test_unrecorded_broadcast_never_paid_twice() {
    let bridge = Bridge::new(Arc::new(FlakyRecordStore::new()));
    let watcher = bridge.watcher("watcher-1");
    let created = bridge.create(4, 600).await;
    bridge.payout.set_balance(created.deposit_address, U256::from(10_000u64)).await;

    bridge.source.transfer_to(created.deposit_address, U256::from(600u64)).await;
    watcher.tick().await;
    bridge.source.mine_empty(7).await;

    // Transfer goes out, then the hash write fails
    let report = watcher.tick().await;
    let id = bridge.deposit_id(&created.deposit_address).await;
    assert!(matches!(
        report.payout_outcome(&id),
        Some(PayoutOutcome::Failed(message)) if message.contains("connection reset")
    ));
    let transfers = bridge.payout.sent_transfers().await;
    assert_eq!(transfers.len(), 1);

    let failed = bridge.store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(failed.payout_status, PayoutStatus::Failed);
    assert_eq!(failed.payout_tx_hash, Some(transfers[0].hash));

    // Admin retry refuses a payout that already went out
    let err = bridge.service.retry_payout(&id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    watcher.tick().await;
    assert_eq!(bridge.payout.sent_transfers().await.len(), 1);
    let stored = bridge.store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(stored.payout_status, PayoutStatus::Failed);
}
