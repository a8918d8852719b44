//! SQLite backed ledger: a `wallets` table and an append-only
//! `transactions` table in `wallet.db` under the storage directory.

use std::{fs, path::Path};

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::wallet::{
    NewTransaction, Origin, Transaction, UserId, Wallet, WalletId, WalletKey, timestamp,
};

use super::{LedgerStore, Page, StoreError};

pub const DATABASE_FILE: &str = "wallet.db";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS wallets (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL UNIQUE,
        key TEXT NOT NULL,
        balance INTEGER NOT NULL CHECK (balance >= 0),
        time_stamp TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY,
        time_stamp TEXT NOT NULL,
        source_uuid TEXT,
        destination_uuid TEXT,
        amount INTEGER NOT NULL CHECK (amount > 0),
        usage TEXT NOT NULL,
        origin INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_transactions_source ON transactions(source_uuid);
    CREATE INDEX IF NOT EXISTS idx_transactions_destination ON transactions(destination_uuid);
"#;

const WALLET_COLUMNS: &str = "id, owner_id, key, balance, time_stamp";

/// Durable store. Every mutating call runs inside one SQL transaction.
#[derive(Debug)]
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
}

impl SqliteLedgerStore {
    /// Opens (or creates) `wallet.db` inside `directory`.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, StoreError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        let path = directory.join(DATABASE_FILE);
        let store = Self::with_connection(Connection::open(&path)?)?;
        info!(path = %path.display(), "Opened wallet database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn corrupt(column: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{column}: {err}"))
}

fn parse_uuid(column: &str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|err| corrupt(column, err))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(raw, timestamp::FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|err| corrupt("time_stamp", err))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(timestamp::FORMAT).to_string()
}

fn to_sql_integer(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(value))
}

fn from_sql_integer(column: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|err| corrupt(column, err))
}

struct WalletRow {
    id: String,
    owner_id: String,
    key: String,
    balance: i64,
    created_at: String,
}

impl WalletRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            key: row.get(2)?,
            balance: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_wallet(self) -> Result<Wallet, StoreError> {
        Ok(Wallet {
            created_at: parse_timestamp(&self.created_at)?,
            id: parse_uuid("id", &self.id)?,
            key: WalletKey::try_from(self.key).map_err(|err| corrupt("key", err))?,
            balance: from_sql_integer("balance", self.balance)?,
            owner_id: parse_uuid("owner_id", &self.owner_id)?,
        })
    }
}

struct TransactionRow {
    id: i64,
    timestamp: String,
    source: Option<String>,
    destination: Option<String>,
    amount: i64,
    usage: String,
    origin: i64,
}

impl TransactionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            source: row.get(2)?,
            destination: row.get(3)?,
            amount: row.get(4)?,
            usage: row.get(5)?,
            origin: row.get(6)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction, StoreError> {
        Ok(Transaction {
            id: from_sql_integer("id", self.id)?,
            timestamp: parse_timestamp(&self.timestamp)?,
            source_wallet_id: self
                .source
                .as_deref()
                .map(|raw| parse_uuid("source_uuid", raw))
                .transpose()?,
            amount: from_sql_integer("amount", self.amount)?,
            destination_wallet_id: self
                .destination
                .as_deref()
                .map(|raw| parse_uuid("destination_uuid", raw))
                .transpose()?,
            usage: self.usage,
            origin: Origin(u16::try_from(self.origin).map_err(|err| corrupt("origin", err))?),
        })
    }
}

fn update_balances(conn: &Connection, balances: &[(WalletId, u64)]) -> Result<(), StoreError> {
    for (id, balance) in balances {
        let updated = conn.execute(
            "UPDATE wallets SET balance = ?1 WHERE id = ?2",
            params![to_sql_integer(*balance)?, id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::WalletNotFound(*id));
        }
    }
    Ok(())
}

impl LedgerStore for SqliteLedgerStore {
    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = ?1"),
            params![id.to_string()],
            WalletRow::read,
        )
        .optional()?
        .map(WalletRow::into_wallet)
        .transpose()
    }

    fn wallets_of_owner(&self, owner_id: UserId) -> Result<Vec<Wallet>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE owner_id = ?1"
        ))?;
        let rows = stmt
            .query_map(params![owner_id.to_string()], WalletRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(WalletRow::into_wallet).collect()
    }

    fn insert_wallet(&self, wallet: Wallet) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let taken: Option<(String, String)> = tx
            .query_row(
                "SELECT id, owner_id FROM wallets WHERE id = ?1 OR owner_id = ?2",
                params![wallet.id.to_string(), wallet.owner_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((id, _)) = taken {
            return Err(if id == wallet.id.to_string() {
                StoreError::DuplicateWallet(wallet.id)
            } else {
                StoreError::DuplicateOwner(wallet.owner_id)
            });
        }
        tx.execute(
            &format!("INSERT INTO wallets ({WALLET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                wallet.id.to_string(),
                wallet.owner_id.to_string(),
                wallet.key.as_str(),
                to_sql_integer(wallet.balance)?,
                format_timestamp(&wallet.created_at),
            ],
        )?;
        tx.commit()?;
        debug!(wallet = %wallet.id, "Wallet row inserted");
        Ok(())
    }

    fn delete_wallet(&self, id: WalletId) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM wallets WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    fn commit_balances(&self, balances: &[(WalletId, u64)]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        update_balances(&tx, balances)?;
        tx.commit()?;
        Ok(())
    }

    fn commit_with_transaction(
        &self,
        balances: &[(WalletId, u64)],
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        update_balances(&tx, balances)?;

        let last: i64 = tx.query_row("SELECT COALESCE(MAX(id), 0) FROM transactions", [], |row| {
            row.get(0)
        })?;
        let record = transaction.into_transaction(from_sql_integer("id", last)? + 1);
        tx.execute(
            "INSERT INTO transactions \
             (id, time_stamp, source_uuid, destination_uuid, amount, usage, origin) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                to_sql_integer(record.id)?,
                format_timestamp(&record.timestamp),
                record.source_wallet_id.map(|id| id.to_string()),
                record.destination_wallet_id.map(|id| id.to_string()),
                to_sql_integer(record.amount)?,
                record.usage,
                i64::from(record.origin.0),
            ],
        )?;
        tx.commit()?;
        Ok(record)
    }

    fn transactions(&self, wallet_id: WalletId, page: Page) -> Result<Vec<Transaction>, StoreError> {
        let limit = match page.count {
            Some(count) => i64::try_from(count).unwrap_or(i64::MAX),
            // negative LIMIT means no limit in SQLite
            None => -1,
        };
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, time_stamp, source_uuid, destination_uuid, amount, usage, origin \
             FROM transactions WHERE source_uuid = ?1 OR destination_uuid = ?1 \
             ORDER BY id LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(
                params![wallet_id.to_string(), limit, offset],
                TransactionRow::read,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(TransactionRow::into_transaction)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(destination: WalletId, amount: u64, usage: &str) -> NewTransaction {
        NewTransaction {
            source_wallet_id: None,
            destination_wallet_id: Some(destination),
            amount,
            usage: usage.to_owned(),
            origin: Origin(2),
        }
    }

    #[test]
    fn reopen_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let owner = Uuid::new_v4();
        let wallet = Wallet::new(owner);
        let id = wallet.id;

        {
            let store = SqliteLedgerStore::open(dir.path()).unwrap();
            store.insert_wallet(wallet.clone()).unwrap();
            store
                .commit_with_transaction(&[(id, 100)], credit(id, 100, "welcome"))
                .unwrap();
            assert!(dir.path().join(DATABASE_FILE).exists());
        }

        let store = SqliteLedgerStore::open(dir.path()).unwrap();
        let restored = store.wallet(id).unwrap().unwrap();
        assert_eq!(restored.balance, 100);
        assert_eq!(restored.key, wallet.key);
        assert_eq!(restored.created_at, wallet.created_at);
        assert_eq!(store.wallets_of_owner(owner).unwrap(), vec![restored]);

        let history = store.transactions(id, Page::all()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, 1);
        assert_eq!(history[0].usage, "welcome");
        assert_eq!(history[0].origin, Origin(2));
        assert_eq!(history[0].source_wallet_id, None);
    }

    #[test]
    fn duplicates_are_rejected() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let wallet = Wallet::new(Uuid::new_v4());
        store.insert_wallet(wallet.clone()).unwrap();

        assert!(matches!(
            store.insert_wallet(wallet.clone()),
            Err(StoreError::DuplicateWallet(id)) if id == wallet.id
        ));
        assert!(matches!(
            store.insert_wallet(Wallet::new(wallet.owner_id)),
            Err(StoreError::DuplicateOwner(owner)) if owner == wallet.owner_id
        ));
    }

    #[test]
    fn failed_commit_rolls_back() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let wallet = Wallet::new(Uuid::new_v4());
        store.insert_wallet(wallet.clone()).unwrap();
        let missing = Uuid::new_v4();

        let err = store
            .commit_with_transaction(
                &[(wallet.id, 70), (missing, 30)],
                credit(wallet.id, 70, ""),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::WalletNotFound(id) if id == missing));
        assert_eq!(store.wallet(wallet.id).unwrap().unwrap().balance, 0);
        assert!(store.transactions(wallet.id, Page::all()).unwrap().is_empty());
        assert!(!store.delete_wallet(missing).unwrap());
    }

    #[test]
    fn history_is_paged_in_id_order() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let a = Wallet::new(Uuid::new_v4());
        let b = Wallet::new(Uuid::new_v4());
        store.insert_wallet(a.clone()).unwrap();
        store.insert_wallet(b.clone()).unwrap();

        for amount in 1..=4 {
            store
                .commit_with_transaction(&[(a.id, amount)], credit(a.id, amount, ""))
                .unwrap();
        }
        store
            .commit_with_transaction(&[(b.id, 9)], credit(b.id, 9, ""))
            .unwrap();

        let page = store
            .transactions(
                a.id,
                Page {
                    offset: 1,
                    count: Some(2),
                },
            )
            .unwrap();
        let amounts: Vec<u64> = page.iter().map(|tx| tx.amount).collect();
        assert_eq!(amounts, vec![2, 3]);

        let b_history = store.transactions(b.id, Page::all()).unwrap();
        assert_eq!(b_history.len(), 1);
        assert_eq!(b_history[0].id, 5);
    }

    #[test]
    fn balance_commit_touches_only_listed_wallets() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let a = Wallet::new(Uuid::new_v4());
        let b = Wallet::new(Uuid::new_v4());
        store.insert_wallet(a.clone()).unwrap();
        store.insert_wallet(b.clone()).unwrap();

        store.commit_balances(&[(a.id, 12)]).unwrap();
        assert_eq!(store.wallet(a.id).unwrap().unwrap().balance, 12);
        assert_eq!(store.wallet(b.id).unwrap().unwrap().balance, 0);

        assert!(store.delete_wallet(a.id).unwrap());
        assert!(store.wallet(a.id).unwrap().is_none());
        assert!(store.wallets_of_owner(a.owner_id).unwrap().is_empty());
    }
}
