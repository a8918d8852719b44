use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::wallet::{UserId, WalletId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    IncomingTransaction,
    OutgoingTransaction,
}

/// Operation that changed the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationOrigin {
    Send,
    Put,
    Dump,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceNotification {
    #[serde(rename = "notify-id")]
    pub kind: NotificationKind,
    pub origin: NotificationOrigin,
    #[serde(rename = "wallet_uuid")]
    pub wallet_id: WalletId,
    /// Balance after the committed mutation.
    #[serde(rename = "amount")]
    pub balance: u64,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("User {0} is not reachable")]
    Unreachable(UserId),
}

/// Push channel to end users. Delivery is best effort.
pub trait Notifier: Send + Sync {
    fn notify(&self, owner_id: UserId, notification: &BalanceNotification)
    -> Result<(), NotifyError>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        owner_id: UserId,
        notification: &BalanceNotification,
    ) -> Result<(), NotifyError> {
        info!(
            user = %owner_id,
            wallet = %notification.wallet_id,
            kind = ?notification.kind,
            origin = ?notification.origin,
            balance = notification.balance,
            "Balance notification"
        );
        Ok(())
    }
}

/// Queues notifications until the transport drains them.
#[derive(Debug, Default)]
pub struct OutboxNotifier {
    outbox: Mutex<Vec<(UserId, BalanceNotification)>>,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<(UserId, BalanceNotification)> {
        std::mem::take(&mut *self.outbox.lock())
    }
}

impl Notifier for OutboxNotifier {
    fn notify(
        &self,
        owner_id: UserId,
        notification: &BalanceNotification,
    ) -> Result<(), NotifyError> {
        self.outbox.lock().push((owner_id, notification.clone()));
        Ok(())
    }
}
