use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    engine::WalletError,
    store::LedgerStore,
    wallet::{NewTransaction, Origin, Wallet, WalletId},
};

/// Memo of the ledger entry recorded for a settled mining reward.
pub const MINING_USAGE: &str = "mining reward";

#[derive(Debug, Error)]
pub enum MinerError {
    #[error("Miner service unavailable: {0}")]
    Unavailable(String),
}

/// Client of the external miner service.
pub trait Miner: Send + Sync {
    /// Claims every coin mined for the wallet since the last claim.
    fn collect(&self, wallet_id: WalletId) -> Result<u64, MinerError>;

    fn stop(&self, wallet_id: WalletId) -> Result<(), MinerError>;
}

/// Nothing is ever mined.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMiner;

impl Miner for NoMiner {
    fn collect(&self, _wallet_id: WalletId) -> Result<u64, MinerError> {
        Ok(0)
    }

    fn stop(&self, _wallet_id: WalletId) -> Result<(), MinerError> {
        Ok(())
    }
}

/// Moves pending mining rewards into wallet balances.
///
/// [`collect`](Self::collect) is an outbound call and must happen before the
/// caller takes the wallet lock; [`credit`](Self::credit) runs under it.
pub struct MinerSettlement {
    miner: Arc<dyn Miner>,
}

impl MinerSettlement {
    pub fn new(miner: Arc<dyn Miner>) -> Self {
        Self { miner }
    }

    /// A miner failure counts as nothing pending.
    pub fn collect(&self, wallet_id: WalletId) -> u64 {
        match self.miner.collect(wallet_id) {
            Ok(coins) => coins,
            Err(err) => {
                warn!(wallet = %wallet_id, "Mining settlement skipped: {err}");
                0
            }
        }
    }

    /// Adds collected coins to `wallet` and commits right away, together with
    /// a [`Origin::MINING`] ledger entry, independent of whatever the caller
    /// does next.
    pub fn credit(
        &self,
        store: &dyn LedgerStore,
        wallet: &mut Wallet,
        coins: u64,
    ) -> Result<(), WalletError> {
        if coins == 0 {
            return Ok(());
        }
        let evt = wallet.handle_credit(coins).inspect_err(|err| {
            error!(wallet = %wallet.id, coins, "Collected mining reward dropped: {err}");
        })?;
        let mut settled = wallet.clone();
        settled.apply(&evt);

        let record = NewTransaction {
            source_wallet_id: None,
            destination_wallet_id: Some(settled.id),
            amount: coins,
            usage: MINING_USAGE.to_owned(),
            origin: Origin::MINING,
        };
        let transaction = store
            .commit_with_transaction(&[(settled.id, settled.balance)], record)
            .inspect_err(|err| {
                error!(wallet = %wallet.id, coins, "Collected mining reward could not be stored: {err}");
            })?;
        info!(
            wallet = %settled.id,
            coins,
            balance = settled.balance,
            transaction = transaction.id,
            "Mining reward settled"
        );
        *wallet = settled;
        Ok(())
    }

    pub fn stop(&self, wallet_id: WalletId) {
        if let Err(err) = self.miner.stop(wallet_id) {
            warn!(wallet = %wallet_id, "Could not stop mining: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::store::{Page, in_memory_store::InMemoryLedgerStore};

    use super::*;

    struct FailingMiner;

    impl Miner for FailingMiner {
        fn collect(&self, _wallet_id: WalletId) -> Result<u64, MinerError> {
            Err(MinerError::Unavailable("connection refused".to_owned()))
        }

        fn stop(&self, _wallet_id: WalletId) -> Result<(), MinerError> {
            Err(MinerError::Unavailable("connection refused".to_owned()))
        }
    }

    #[test]
    fn failing_miner_settles_nothing() {
        let settlement = MinerSettlement::new(Arc::new(FailingMiner));
        let id = Uuid::new_v4();
        assert_eq!(settlement.collect(id), 0);
        settlement.stop(id);
    }

    #[test]
    fn credit_commits_immediately() {
        let store = InMemoryLedgerStore::new();
        let mut wallet = Wallet::new(Uuid::new_v4());
        store.insert_wallet(wallet.clone()).unwrap();

        let settlement = MinerSettlement::new(Arc::new(NoMiner));
        settlement.credit(&store, &mut wallet, 31).unwrap();
        assert_eq!(wallet.balance, 31);
        assert_eq!(store.wallet(wallet.id).unwrap().unwrap().balance, 31);

        let history = store.transactions(wallet.id, Page::all()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source_wallet_id, None);
        assert_eq!(history[0].destination_wallet_id, Some(wallet.id));
        assert_eq!(history[0].amount, 31);
        assert_eq!(history[0].origin, Origin::MINING);
        assert_eq!(history[0].usage, MINING_USAGE);
    }

    #[test]
    fn nothing_collected_records_nothing() {
        let store = InMemoryLedgerStore::new();
        let mut wallet = Wallet::new(Uuid::new_v4());
        store.insert_wallet(wallet.clone()).unwrap();

        let settlement = MinerSettlement::new(Arc::new(NoMiner));
        settlement.credit(&store, &mut wallet, 0).unwrap();
        assert_eq!(store.transaction_count(), 0);
    }

    #[test]
    fn overflowing_reward_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let mut wallet = Wallet {
            balance: u64::MAX,
            ..Wallet::new(Uuid::new_v4())
        };
        store.insert_wallet(wallet.clone()).unwrap();

        let settlement = MinerSettlement::new(Arc::new(NoMiner));
        let err = settlement.credit(&store, &mut wallet, 1).unwrap_err();
        assert!(matches!(err, WalletError::BalanceOverflow(id) if id == wallet.id));
        assert_eq!(wallet.balance, u64::MAX);
        assert_eq!(store.transaction_count(), 0);
    }

    #[test]
    fn credit_to_vanished_wallet_keeps_local_state() {
        let store = InMemoryLedgerStore::new();
        let mut wallet = Wallet::new(Uuid::new_v4());

        let settlement = MinerSettlement::new(Arc::new(NoMiner));
        let err = settlement.credit(&store, &mut wallet, 5).unwrap_err();
        assert!(matches!(err, WalletError::Store(_)));
        assert_eq!(wallet.balance, 0);
    }
}
