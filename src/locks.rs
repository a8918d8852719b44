use parking_lot::{Mutex, MutexGuard};

use crate::wallet::WalletId;

pub const DEFAULT_STRIPES: usize = 64;

/// Striped per-wallet mutexes.
///
/// A wallet id always maps to the same stripe. Multi-wallet operations lock
/// their stripes in ascending index order, which is the single global order
/// every caller follows.
#[derive(Debug)]
pub struct WalletLocks {
    stripes: Box<[Mutex<()>]>,
}

/// Held stripes, released on drop.
#[must_use = "the wallets are unlocked as soon as the guard is dropped"]
pub struct WalletGuard<'a> {
    _stripes: Vec<MutexGuard<'a, ()>>,
}

impl WalletLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_of(&self, id: &WalletId) -> usize {
        (id.as_u128() % self.stripes.len() as u128) as usize
    }

    pub fn lock(&self, ids: &[WalletId]) -> WalletGuard<'_> {
        let mut indices: Vec<usize> = ids.iter().map(|id| self.stripe_of(id)).collect();
        indices.sort_unstable();
        indices.dedup();
        WalletGuard {
            _stripes: indices.into_iter().map(|i| self.stripes[i].lock()).collect(),
        }
    }
}

impl Default for WalletLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use uuid::Uuid;

    use super::*;

    #[test]
    fn same_wallet_twice_does_not_self_deadlock() {
        let locks = WalletLocks::new(4);
        let id = Uuid::new_v4();
        let _guard = locks.lock(&[id, id]);
    }

    #[test]
    fn zero_stripes_is_clamped() {
        assert_eq!(WalletLocks::new(0).stripe_count(), 1);
    }

    #[test]
    fn opposite_order_locking_completes() {
        let locks = Arc::new(WalletLocks::new(8));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let counter = Arc::new(Mutex::new(0u32));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = locks.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let ids = if i % 2 == 0 { [a, b] } else { [b, a] };
                        let _guard = locks.lock(&ids);
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8 * 500);
    }
}
