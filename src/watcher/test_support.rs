//! Shared fixtures for watcher tests

use primitive_types::U256;
use std::sync::Arc;

use super::{DepositWatcher, ManualClock, WatcherConfig};
use crate::chain::{ChainWriter, MemoryChain};
use crate::derivation::{calculate_index, derive_deposit_address, BridgeSeed, DepositKey};
use crate::storage::{DepositStore, MemoryDepositStore};
use crate::types::{Address, Deposit};

pub const START_TIME: u64 = 1_700_000_000;

pub fn seed() -> BridgeSeed {
    BridgeSeed::from_bytes(&[7u8; 32]).unwrap()
}

pub fn destination() -> Address {
    Address::from_bytes([0xd5; 20])
}

pub struct Harness {
    pub source: MemoryChain,
    pub payout: MemoryChain,
    pub store: MemoryDepositStore,
    pub clock: Arc<ManualClock>,
    pub watcher: DepositWatcher,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(WatcherConfig::default()).await
    }

    pub async fn with_config(config: WatcherConfig) -> Self {
        let payout = MemoryChain::new();
        Self::with_writer(config, Arc::new(payout.clone()), payout).await
    }

    /// Harness whose payout transfers go through `writer`
    pub async fn with_writer(
        config: WatcherConfig,
        writer: Arc<dyn ChainWriter>,
        payout: MemoryChain,
    ) -> Self {
        let source = MemoryChain::new();
        let store = MemoryDepositStore::new();
        let clock = Arc::new(ManualClock::new(START_TIME));
        let watcher = DepositWatcher::new(
            Arc::new(store.clone()),
            Arc::new(source.clone()),
            Arc::new(payout.clone()),
            writer,
            seed(),
            config,
            clock.clone(),
        )
        .with_id("watcher-test");

        Self {
            source,
            payout,
            store,
            clock,
            watcher,
        }
    }

    /// A second watcher over the same store and chains
    pub fn sibling(&self, id: &str) -> DepositWatcher {
        DepositWatcher::new(
            Arc::new(self.store.clone()),
            Arc::new(self.source.clone()),
            Arc::new(self.payout.clone()),
            Arc::new(self.payout.clone()),
            seed(),
            self.watcher.config().clone(),
            self.clock.clone(),
        )
        .with_id(id)
    }

    pub fn key_for(&self, deposit: &Deposit) -> DepositKey {
        derive_deposit_address(&seed(), deposit.index).unwrap()
    }

    /// Build a deposit for `destination()` without storing it
    pub async fn new_deposit(&self, nonce: u64, amount: u64) -> Deposit {
        let index = calculate_index(&destination(), nonce);
        let key = derive_deposit_address(&seed(), index).unwrap();
        Deposit::new(
            key.address,
            destination(),
            index,
            nonce,
            U256::from(amount),
            Some(self.source.height().await),
        )
    }

    pub async fn create_deposit(&self, nonce: u64, amount: u64) -> Deposit {
        let deposit = self.new_deposit(nonce, amount).await;
        self.store.insert(&deposit).await.unwrap();
        deposit
    }

    /// Fund, detect and confirm a deposit; the payout wallet stays empty
    pub async fn confirmed_deposit(&self, nonce: u64, amount: u64) -> Deposit {
        let deposit = self.create_deposit(nonce, amount).await;
        self.source
            .transfer_to(deposit.deposit_address, U256::from(amount))
            .await;
        self.watcher.tick().await;
        self.source
            .mine_empty(self.watcher.config().required_confirmations)
            .await;
        self.watcher.tick().await;
        self.get(&deposit.id).await
    }

    pub async fn fund_payout(&self, deposit: &Deposit, amount: u64) {
        self.payout
            .set_balance(deposit.deposit_address, U256::from(amount))
            .await;
    }

    pub async fn get(&self, id: &str) -> Deposit {
        self.store.get_by_id(id).await.unwrap().unwrap()
    }
}
