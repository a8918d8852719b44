use thiserror::Error;

use crate::wallet::{NewTransaction, Transaction, UserId, Wallet, WalletId};

pub mod in_memory_store;
pub mod sqlite_store;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Wallet {0} already exists")]
    DuplicateWallet(WalletId),
    #[error("User {0} already owns a wallet")]
    DuplicateOwner(UserId),
    #[error("Wallet {0} not found")]
    WalletNotFound(WalletId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt row, {0}")]
    Corrupt(String),
    #[error("Value {0} does not fit a database integer")]
    OutOfRange(u64),
}

/// Window over a wallet's history, ordered by transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    pub offset: usize,
    pub count: Option<usize>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }
}

/// Wallet and transaction tables.
///
/// Each mutating call is one durable unit: it is either applied completely
/// or not at all. Balance read-modify-write cycles are serialized by the
/// caller (see [`crate::locks`]), the store only guarantees atomicity of a
/// single call.
pub trait LedgerStore: Send + Sync {
    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError>;

    fn wallets_of_owner(&self, owner_id: UserId) -> Result<Vec<Wallet>, StoreError>;

    /// Fails with [`StoreError::DuplicateOwner`] if the owner already has a wallet.
    fn insert_wallet(&self, wallet: Wallet) -> Result<(), StoreError>;

    /// Returns whether a wallet was removed.
    fn delete_wallet(&self, id: WalletId) -> Result<bool, StoreError>;

    /// Writes new balances. Every listed wallet must exist.
    fn commit_balances(&self, balances: &[(WalletId, u64)]) -> Result<(), StoreError>;

    /// Writes new balances and appends a transaction in the same unit.
    fn commit_with_transaction(
        &self,
        balances: &[(WalletId, u64)],
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError>;

    /// Transactions where the wallet is source or destination.
    fn transactions(&self, wallet_id: WalletId, page: Page) -> Result<Vec<Transaction>, StoreError>;
}
