use crate::{
    engine::WalletError,
    store::LedgerStore,
    wallet::{UserId, Wallet, WalletId},
};

/// Loads the wallet and checks the presented key against it.
pub fn authorize(
    store: &dyn LedgerStore,
    wallet_id: WalletId,
    presented_key: &str,
) -> Result<Wallet, WalletError> {
    let wallet = store
        .wallet(wallet_id)?
        .ok_or(WalletError::UnknownSourceOrDestination)?;
    if !wallet.key.matches(presented_key) {
        return Err(WalletError::PermissionDenied);
    }
    Ok(wallet)
}

pub fn require_owner(wallet: &Wallet, caller: UserId) -> Result<(), WalletError> {
    if wallet.owner_id != caller {
        return Err(WalletError::PermissionDenied);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::store::in_memory_store::InMemoryLedgerStore;

    use super::*;

    #[test]
    fn authorize_checks_existence_then_key() {
        let store = InMemoryLedgerStore::new();
        let wallet = Wallet::new(Uuid::new_v4());
        store.insert_wallet(wallet.clone()).unwrap();

        assert!(matches!(
            authorize(&store, Uuid::new_v4(), wallet.key.as_str()),
            Err(WalletError::UnknownSourceOrDestination)
        ));
        assert!(matches!(
            authorize(&store, wallet.id, "0000000000"),
            Err(WalletError::PermissionDenied)
        ));
        assert_eq!(
            authorize(&store, wallet.id, wallet.key.as_str()).unwrap(),
            wallet
        );
    }

    #[test]
    fn only_the_owner_passes() {
        let owner = Uuid::new_v4();
        let wallet = Wallet::new(owner);
        assert!(require_owner(&wallet, owner).is_ok());
        assert!(matches!(
            require_owner(&wallet, Uuid::new_v4()),
            Err(WalletError::PermissionDenied)
        ));
    }
}
