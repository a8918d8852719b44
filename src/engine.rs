use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    auth,
    command::{DumpCoins, HistoryQuery, PutCoins, SendCoins, WalletAccess},
    locks::WalletLocks,
    miner::{Miner, MinerSettlement},
    notify::{BalanceNotification, NotificationKind, NotificationOrigin, Notifier},
    store::{LedgerStore, Page, StoreError},
    wallet::{BalanceError, NewTransaction, Origin, Transaction, UserId, Wallet, WalletId},
};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Caller already owns a wallet")]
    AlreadyOwnAWallet,
    #[error("Unknown source or destination wallet")]
    UnknownSourceOrDestination,
    #[error("Not enough coins")]
    NotEnoughCoins,
    #[error("Amount must be positive")]
    ZeroAmount,
    #[error("Balance of wallet {0} would overflow")]
    BalanceOverflow(WalletId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WalletError {
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::PermissionDenied => "permission_denied",
            WalletError::AlreadyOwnAWallet => "already_own_a_wallet",
            WalletError::UnknownSourceOrDestination => "unknown_source_or_destination",
            WalletError::NotEnoughCoins => "not_enough_coins",
            WalletError::ZeroAmount => "invalid_input_data",
            WalletError::BalanceOverflow(_) | WalletError::Store(_) => "internal_error",
        }
    }

    /// Faults of the service itself, as opposed to expected outcomes.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            WalletError::BalanceOverflow(_) | WalletError::Store(_)
        )
    }
}

impl From<BalanceError> for WalletError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::InsufficientFunds { .. } => WalletError::NotEnoughCoins,
            BalanceError::Overflow { wallet_id, .. } => WalletError::BalanceOverflow(wallet_id),
        }
    }
}

/// A wallet together with every transaction touching it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletHistory {
    #[serde(flatten)]
    pub wallet: Wallet,
    pub transactions: Vec<Transaction>,
}

/// Balance-mutating operations of the service.
///
/// Every read-modify-write of a balance happens under the wallet's stripe
/// lock and re-reads the wallet after locking. Outbound calls (mining
/// collection, notifications) never run under a lock.
pub struct TransferEngine {
    store: Arc<dyn LedgerStore>,
    settlement: MinerSettlement,
    notifier: Arc<dyn Notifier>,
    locks: WalletLocks,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        miner: Arc<dyn Miner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            settlement: MinerSettlement::new(miner),
            notifier,
            locks: WalletLocks::default(),
        }
    }

    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.locks = WalletLocks::new(stripes);
        self
    }

    fn load(&self, wallet_id: WalletId) -> Result<Wallet, WalletError> {
        self.store
            .wallet(wallet_id)?
            .ok_or(WalletError::UnknownSourceOrDestination)
    }

    /// Re-reads a wallet that `coins` were collected for. If it is gone the
    /// coins are lost.
    fn load_collected(&self, wallet_id: WalletId, coins: u64) -> Result<Wallet, WalletError> {
        self.load(wallet_id).inspect_err(|err| {
            if coins > 0 {
                warn!(wallet = %wallet_id, coins, "Collected mining reward dropped: {err}");
            }
        })
    }

    fn commit(
        &self,
        balances: &[(WalletId, u64)],
        record: Option<NewTransaction>,
    ) -> Result<Option<Transaction>, StoreError> {
        match record {
            Some(transaction) => self
                .store
                .commit_with_transaction(balances, transaction)
                .map(Some),
            None => self.store.commit_balances(balances).map(|()| None),
        }
    }

    fn notify(&self, wallet: &Wallet, kind: NotificationKind, origin: NotificationOrigin) {
        let notification = BalanceNotification {
            kind,
            origin,
            wallet_id: wallet.id,
            balance: wallet.balance,
        };
        if let Err(err) = self.notifier.notify(wallet.owner_id, &notification) {
            warn!(user = %wallet.owner_id, wallet = %wallet.id, "Notification dropped: {err}");
        }
    }

    /// Pulls pending mining credit into the wallet and returns its settled state.
    fn settle(&self, wallet_id: WalletId) -> Result<Wallet, WalletError> {
        let coins = self.settlement.collect(wallet_id);
        let _guard = self.locks.lock(&[wallet_id]);
        let mut wallet = self.load_collected(wallet_id, coins)?;
        self.settlement
            .credit(self.store.as_ref(), &mut wallet, coins)?;
        Ok(wallet)
    }

    pub fn create(&self, owner_id: UserId) -> Result<Wallet, WalletError> {
        if !self.store.wallets_of_owner(owner_id)?.is_empty() {
            return Err(WalletError::AlreadyOwnAWallet);
        }
        let wallet = Wallet::new(owner_id);
        match self.store.insert_wallet(wallet.clone()) {
            Ok(()) => {}
            // lost a race against a concurrent create for the same owner
            Err(StoreError::DuplicateOwner(_)) => return Err(WalletError::AlreadyOwnAWallet),
            Err(err) => return Err(err.into()),
        }
        info!(wallet = %wallet.id, user = %owner_id, "Wallet created");
        Ok(wallet)
    }

    pub fn get(&self, access: &WalletAccess) -> Result<WalletHistory, WalletError> {
        auth::authorize(self.store.as_ref(), access.wallet_id, access.key.as_str())?;
        let wallet = self.settle(access.wallet_id)?;
        let transactions = self.store.transactions(wallet.id, Page::all())?;
        debug!(wallet = %wallet.id, transactions = transactions.len(), "Wallet read");
        Ok(WalletHistory {
            wallet,
            transactions,
        })
    }

    pub fn transactions(&self, query: &HistoryQuery) -> Result<Vec<Transaction>, WalletError> {
        auth::authorize(self.store.as_ref(), query.wallet_id, query.key.as_str())?;
        let page = Page {
            offset: query.offset,
            count: query.count,
        };
        Ok(self.store.transactions(query.wallet_id, page)?)
    }

    pub fn list(&self, owner_id: UserId) -> Result<Vec<WalletId>, WalletError> {
        Ok(self
            .store
            .wallets_of_owner(owner_id)?
            .into_iter()
            .map(|w| w.id)
            .collect())
    }

    pub fn send(&self, cmd: &SendCoins) -> Result<Transaction, WalletError> {
        if cmd.amount == 0 {
            return Err(WalletError::ZeroAmount);
        }
        auth::authorize(self.store.as_ref(), cmd.source, cmd.key.as_str())?;
        self.load(cmd.destination)?;
        let coins = self.settlement.collect(cmd.source);

        let (source, destination, transaction) = {
            let _guard = self.locks.lock(&[cmd.source, cmd.destination]);

            let mut source = self.load_collected(cmd.source, coins)?;
            self.settlement
                .credit(self.store.as_ref(), &mut source, coins)?;
            let debit = source.handle_debit(cmd.amount)?;
            source.apply(&debit);

            let mut destination = if cmd.destination == cmd.source {
                source.clone()
            } else {
                self.load(cmd.destination)?
            };
            let credit = destination.handle_credit(cmd.amount)?;
            destination.apply(&credit);
            if destination.id == source.id {
                source = destination.clone();
            }

            let transaction = self.store.commit_with_transaction(
                &[
                    (source.id, source.balance),
                    (destination.id, destination.balance),
                ],
                NewTransaction {
                    source_wallet_id: Some(source.id),
                    destination_wallet_id: Some(destination.id),
                    amount: cmd.amount,
                    usage: cmd.usage.clone(),
                    origin: Origin::USER_TRANSFER,
                },
            )?;
            (source, destination, transaction)
        };

        info!(
            source = %source.id,
            destination = %destination.id,
            amount = cmd.amount,
            transaction = transaction.id,
            "Coins sent"
        );
        self.notify(
            &source,
            NotificationKind::OutgoingTransaction,
            NotificationOrigin::Send,
        );
        self.notify(
            &destination,
            NotificationKind::IncomingTransaction,
            NotificationOrigin::Send,
        );
        Ok(transaction)
    }

    pub fn reset(&self, owner_id: UserId, wallet_id: WalletId) -> Result<(), WalletError> {
        let wallet = self.load(wallet_id)?;
        auth::require_owner(&wallet, owner_id)?;
        self.remove(wallet_id)
    }

    pub fn delete(&self, access: &WalletAccess) -> Result<(), WalletError> {
        auth::authorize(self.store.as_ref(), access.wallet_id, access.key.as_str())?;
        self.remove(access.wallet_id)
    }

    fn remove(&self, wallet_id: WalletId) -> Result<(), WalletError> {
        {
            let _guard = self.locks.lock(&[wallet_id]);
            if !self.store.delete_wallet(wallet_id)? {
                return Err(WalletError::UnknownSourceOrDestination);
            }
        }
        info!(wallet = %wallet_id, "Wallet deleted");
        self.settlement.stop(wallet_id);
        Ok(())
    }

    pub fn exists(&self, wallet_id: WalletId) -> Result<bool, WalletError> {
        Ok(self.store.wallet(wallet_id)?.is_some())
    }

    pub fn owner(&self, wallet_id: WalletId) -> Result<UserId, WalletError> {
        Ok(self.load(wallet_id)?.owner_id)
    }

    /// Credits a wallet on behalf of a service.
    pub fn put(&self, cmd: &PutCoins) -> Result<Option<Transaction>, WalletError> {
        if cmd.amount == 0 {
            return Err(WalletError::ZeroAmount);
        }
        let (destination, transaction) = {
            let _guard = self.locks.lock(&[cmd.destination]);
            let mut destination = self.load(cmd.destination)?;
            let credit = destination.handle_credit(cmd.amount)?;
            destination.apply(&credit);

            let record = cmd.create_transaction.then(|| NewTransaction {
                source_wallet_id: cmd.source,
                destination_wallet_id: Some(destination.id),
                amount: cmd.amount,
                usage: cmd.usage.clone(),
                origin: cmd.origin,
            });
            let transaction = self.commit(&[(destination.id, destination.balance)], record)?;
            (destination, transaction)
        };

        info!(wallet = %destination.id, amount = cmd.amount, balance = destination.balance, "Coins put");
        self.notify(
            &destination,
            NotificationKind::IncomingTransaction,
            NotificationOrigin::Put,
        );
        Ok(transaction)
    }

    /// Debits a wallet on behalf of a service holding its key.
    pub fn dump(&self, cmd: &DumpCoins) -> Result<Option<Transaction>, WalletError> {
        if cmd.amount == 0 {
            return Err(WalletError::ZeroAmount);
        }
        auth::authorize(self.store.as_ref(), cmd.source, cmd.key.as_str())?;
        let coins = self.settlement.collect(cmd.source);

        let (source, transaction) = {
            let _guard = self.locks.lock(&[cmd.source]);
            let mut source = self.load_collected(cmd.source, coins)?;
            self.settlement
                .credit(self.store.as_ref(), &mut source, coins)?;
            let debit = source.handle_debit(cmd.amount)?;
            source.apply(&debit);

            let record = cmd.create_transaction.then(|| NewTransaction {
                source_wallet_id: Some(source.id),
                destination_wallet_id: cmd.destination,
                amount: cmd.amount,
                usage: cmd.usage.clone(),
                origin: cmd.origin,
            });
            let transaction = self.commit(&[(source.id, source.balance)], record)?;
            (source, transaction)
        };

        info!(wallet = %source.id, amount = cmd.amount, balance = source.balance, "Coins dumped");
        self.notify(
            &source,
            NotificationKind::OutgoingTransaction,
            NotificationOrigin::Dump,
        );
        Ok(transaction)
    }

    /// Removes every wallet of the user. Returns the removed ids.
    pub fn delete_user(&self, owner_id: UserId) -> Result<Vec<WalletId>, WalletError> {
        let ids: Vec<WalletId> = self
            .store
            .wallets_of_owner(owner_id)?
            .into_iter()
            .map(|w| w.id)
            .collect();
        let _guard = self.locks.lock(&ids);
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if self.store.delete_wallet(id)? {
                removed.push(id);
            }
        }
        info!(user = %owner_id, wallets = removed.len(), "User wallets deleted");
        Ok(removed)
    }
}
