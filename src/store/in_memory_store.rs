use std::collections::HashMap;

use parking_lot::RwLock;

use crate::wallet::{NewTransaction, Transaction, UserId, Wallet, WalletId};

use super::{LedgerStore, Page, StoreError};

#[derive(Debug, Default)]
struct LedgerTables {
    wallets: HashMap<WalletId, Wallet>,
    owners: HashMap<UserId, WalletId>,
    transactions: Vec<Transaction>,
}

impl LedgerTables {
    fn wallet(&self, id: WalletId) -> Option<Wallet> {
        self.wallets.get(&id).cloned()
    }

    fn wallets_of_owner(&self, owner_id: UserId) -> Vec<Wallet> {
        self.owners
            .get(&owner_id)
            .and_then(|id| self.wallets.get(id))
            .cloned()
            .into_iter()
            .collect()
    }

    fn insert_wallet(&mut self, wallet: Wallet) -> Result<(), StoreError> {
        if self.wallets.contains_key(&wallet.id) {
            return Err(StoreError::DuplicateWallet(wallet.id));
        }
        if self.owners.contains_key(&wallet.owner_id) {
            return Err(StoreError::DuplicateOwner(wallet.owner_id));
        }
        self.owners.insert(wallet.owner_id, wallet.id);
        self.wallets.insert(wallet.id, wallet);
        Ok(())
    }

    fn delete_wallet(&mut self, id: WalletId) -> bool {
        match self.wallets.remove(&id) {
            Some(wallet) => {
                self.owners.remove(&wallet.owner_id);
                true
            }
            None => false,
        }
    }

    fn commit_balances(
        &mut self,
        balances: &[(WalletId, u64)],
    ) -> Result<(), StoreError> {
        // validate everything before touching anything
        if let Some((missing, _)) = balances
            .iter()
            .find(|(id, _)| !self.wallets.contains_key(id))
        {
            return Err(StoreError::WalletNotFound(*missing));
        }
        for (id, balance) in balances {
            if let Some(wallet) = self.wallets.get_mut(id) {
                wallet.balance = *balance;
            }
        }
        Ok(())
    }

    fn commit_with_transaction(
        &mut self,
        balances: &[(WalletId, u64)],
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        self.commit_balances(balances)?;
        let next_id = self.transactions.last().map_or(1, |tx| tx.id + 1);
        let transaction = transaction.into_transaction(next_id);
        self.transactions.push(transaction.clone());
        Ok(transaction)
    }

    fn transactions(&self, wallet_id: WalletId, page: Page) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter(|tx| tx.touches(wallet_id))
            .skip(page.offset)
            .take(page.count.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Volatile store, used by tests and by the binary when persistence is off.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<LedgerTables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wallet_count(&self) -> usize {
        self.tables.read().wallets.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.tables.read().transactions.len()
    }

    /// Sum of all balances. Wide enough that it cannot overflow.
    pub fn total_balance(&self) -> u128 {
        self.tables
            .read()
            .wallets
            .values()
            .map(|w| u128::from(w.balance))
            .sum()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        Ok(self.tables.read().wallet(id))
    }

    fn wallets_of_owner(&self, owner_id: UserId) -> Result<Vec<Wallet>, StoreError> {
        Ok(self.tables.read().wallets_of_owner(owner_id))
    }

    fn insert_wallet(&self, wallet: Wallet) -> Result<(), StoreError> {
        self.tables.write().insert_wallet(wallet)
    }

    fn delete_wallet(&self, id: WalletId) -> Result<bool, StoreError> {
        Ok(self.tables.write().delete_wallet(id))
    }

    fn commit_balances(&self, balances: &[(WalletId, u64)]) -> Result<(), StoreError> {
        self.tables.write().commit_balances(balances)
    }

    fn commit_with_transaction(
        &self,
        balances: &[(WalletId, u64)],
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        self.tables
            .write()
            .commit_with_transaction(balances, transaction)
    }

    fn transactions(&self, wallet_id: WalletId, page: Page) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.tables.read().transactions(wallet_id, page))
    }
}
