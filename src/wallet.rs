use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

pub type WalletId = Uuid;
pub type UserId = Uuid;
pub type TransactionId = u64;

pub const KEY_LENGTH: usize = 10;

/// Wire format of every persisted timestamp: `YYYY-MM-DD HH:MM:SS`.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

/// Authorization secret of a wallet, always ten lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletKey(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Wallet key must be {KEY_LENGTH} lowercase hex characters")]
pub struct InvalidWalletKey;

impl WalletKey {
    pub fn generate() -> Self {
        let mut key = Uuid::new_v4().simple().to_string();
        key.truncate(KEY_LENGTH);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented key.
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl TryFrom<String> for WalletKey {
    type Error = InvalidWalletKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let well_formed = value.len() == KEY_LENGTH
            && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if well_formed {
            Ok(Self(value))
        } else {
            Err(InvalidWalletKey)
        }
    }
}

impl From<WalletKey> for String {
    fn from(key: WalletKey) -> Self {
        key.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceEventKind {
    Credited,
    Debited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceEvent {
    pub wallet_id: WalletId,
    pub amount: u64,
    pub kind: BalanceEventKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalanceError {
    #[error("Insufficient funds: balance is {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },
    #[error("Crediting {credit} would overflow the balance of wallet {wallet_id}")]
    Overflow { wallet_id: WalletId, credit: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(rename = "time_stamp", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "source_uuid")]
    pub id: WalletId,
    pub key: WalletKey,
    #[serde(rename = "amount")]
    pub balance: u64,
    #[serde(rename = "user_uuid")]
    pub owner_id: UserId,
}

impl Wallet {
    /// Fresh empty wallet with a random id and key.
    pub fn new(owner_id: UserId) -> Self {
        Self {
            // the wire format has second precision
            created_at: Utc::now().trunc_subsecs(0),
            id: Uuid::new_v4(),
            key: WalletKey::generate(),
            balance: 0,
            owner_id,
        }
    }

    pub fn apply(&mut self, event: &BalanceEvent) {
        debug_assert_eq!(event.wallet_id, self.id);
        match event.kind {
            BalanceEventKind::Credited => {
                self.balance = self.balance.saturating_add(event.amount);
            }
            BalanceEventKind::Debited => {
                self.balance = self.balance.saturating_sub(event.amount);
            }
        }
    }

    pub fn handle_credit(&self, amount: u64) -> Result<BalanceEvent, BalanceError> {
        if self.balance.checked_add(amount).is_none() {
            return Err(BalanceError::Overflow {
                wallet_id: self.id,
                credit: amount,
            });
        }
        Ok(BalanceEvent {
            wallet_id: self.id,
            amount,
            kind: BalanceEventKind::Credited,
        })
    }

    pub fn handle_debit(&self, amount: u64) -> Result<BalanceEvent, BalanceError> {
        if self.balance < amount {
            return Err(BalanceError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        Ok(BalanceEvent {
            wallet_id: self.id,
            amount,
            kind: BalanceEventKind::Debited,
        })
    }
}

/// Small integer classifying why a transaction was recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin(pub u16);

impl Origin {
    pub const USER_TRANSFER: Origin = Origin(0);
    /// Settled mining reward, recorded without a source wallet.
    pub const MINING: Origin = Origin(1);
}

/// Immutable ledger entry. Only the store assigns `id` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(rename = "time_stamp", with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "source_uuid")]
    pub source_wallet_id: Option<WalletId>,
    #[serde(rename = "send_amount")]
    pub amount: u64,
    #[serde(rename = "destination_uuid")]
    pub destination_wallet_id: Option<WalletId>,
    pub usage: String,
    pub origin: Origin,
}

impl Transaction {
    pub fn touches(&self, wallet_id: WalletId) -> bool {
        self.source_wallet_id == Some(wallet_id) || self.destination_wallet_id == Some(wallet_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub source_wallet_id: Option<WalletId>,
    pub destination_wallet_id: Option<WalletId>,
    pub amount: u64,
    pub usage: String,
    pub origin: Origin,
}

impl NewTransaction {
    pub fn into_transaction(self, id: TransactionId) -> Transaction {
        Transaction {
            id,
            timestamp: Utc::now().trunc_subsecs(0),
            source_wallet_id: self.source_wallet_id,
            amount: self.amount,
            destination_wallet_id: self.destination_wallet_id,
            usage: self.usage,
            origin: self.origin,
        }
    }
}
