// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Per-member wallet balances.
//!
//! Balances change only by signed deltas staged on a [`Transaction`]. The
//! commit re-reads each wallet under the store's write lock and adds the
//! delta, so concurrent credits to one member never lose an update.

use std::sync::Arc;

use crate::error::{StoreError, WalletError};
use crate::store::{Store, Transaction};
use crate::types::{MemberId, Money, Points, WalletBalance};

#[derive(Clone)]
pub struct WalletAccount {
    store: Arc<Store>,
}

impl WalletAccount {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Stage a points delta and return the balance projected from the
    /// committed balance at staging time. `commit` re-reads and re-checks
    /// the live balance, so a transaction committed in between is not lost
    /// but is not reflected in the returned figure either. Debits below
    /// zero fail with `InsufficientFunds`.
    pub fn apply_delta(
        &self,
        tx: &mut Transaction<'_>,
        member: &MemberId,
        delta: Points,
    ) -> Result<Points, WalletError> {
        let current = tx
            .points_balance(member)
            .ok_or_else(|| WalletError::UnknownWallet(member.clone()))?;
        let next = current + delta;
        if next.is_negative() {
            return Err(WalletError::InsufficientFunds {
                member: member.clone(),
                available: current.0,
                requested: -delta.0,
            });
        }
        tx.stage_points(member, delta);
        Ok(next)
    }

    /// Currency counterpart of [`apply_delta`](Self::apply_delta); the
    /// returned balance is the same staging-time projection.
    pub fn apply_currency_delta(
        &self,
        tx: &mut Transaction<'_>,
        member: &MemberId,
        delta: Money,
    ) -> Result<Money, WalletError> {
        let current = tx
            .currency_balance(member)
            .ok_or_else(|| WalletError::UnknownWallet(member.clone()))?;
        let next = current + delta;
        if next.is_negative() {
            return Err(WalletError::InsufficientFunds {
                member: member.clone(),
                available: current.0,
                requested: -delta.0,
            });
        }
        tx.stage_currency(member, delta);
        Ok(next)
    }

    /// Top up or withdraw currency in a transaction of its own.
    pub fn adjust_currency(&self, member: &MemberId, delta: Money) -> Result<Money, StoreError> {
        let mut tx = self.store.begin();
        self.apply_currency_delta(&mut tx, member, delta)?;
        tx.commit()?;
        tracing::debug!(member = %member, delta = %delta, "currency balance adjusted");
        Ok(self.balance(member)?.currency_balance)
    }

    pub fn balance(&self, member: &MemberId) -> Result<WalletBalance, WalletError> {
        self.store
            .wallet(member)
            .ok_or_else(|| WalletError::UnknownWallet(member.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HouseAccount;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<Store>, WalletAccount, MemberId) {
        let store = Arc::new(Store::new(&HouseAccount::default(), dec!(0.01)));
        let house = store.house().clone();
        (Arc::clone(&store), WalletAccount::new(store), house)
    }

    #[test]
    fn deltas_accumulate_within_transaction() {
        let (store, wallets, house) = setup();
        let mut tx = store.begin();
        let first = wallets
            .apply_currency_delta(&mut tx, &house, Money(dec!(100)))
            .expect("test: credit");
        let second = wallets
            .apply_currency_delta(&mut tx, &house, Money(dec!(-30)))
            .expect("test: debit");
        assert_eq!(first, Money(dec!(100)));
        assert_eq!(second, Money(dec!(70)));
        // Nothing visible before commit.
        assert_eq!(
            wallets.balance(&house).expect("test: wallet").currency_balance,
            Money::zero()
        );
        tx.commit().expect("test: commit");
        assert_eq!(
            wallets.balance(&house).expect("test: wallet").currency_balance,
            Money(dec!(70))
        );
    }

    #[test]
    fn interleaved_commit_is_kept_but_not_projected() {
        let (store, wallets, house) = setup();
        let mut slow = store.begin();
        let projected = wallets
            .apply_currency_delta(&mut slow, &house, Money(dec!(40)))
            .expect("test: stage");
        assert_eq!(projected, Money(dec!(40)));

        wallets
            .adjust_currency(&house, Money(dec!(25)))
            .expect("test: interleaved top up");
        slow.commit().expect("test: commit");

        assert_eq!(
            wallets.balance(&house).expect("test: wallet").currency_balance,
            Money(dec!(65))
        );
    }

    #[test]
    fn debit_beyond_balance_is_insufficient_funds() {
        let (store, wallets, house) = setup();
        let mut tx = store.begin();
        let err = wallets.apply_delta(&mut tx, &house, Points::from(-1));
        assert!(
            matches!(err, Err(WalletError::InsufficientFunds { .. })),
            "expected InsufficientFunds, got {err:?}"
        );
        let err = wallets.apply_currency_delta(&mut tx, &house, Money(dec!(-0.01)));
        assert!(matches!(err, Err(WalletError::InsufficientFunds { .. })));
    }

    #[test]
    fn unknown_wallet_rejected() {
        let (store, wallets, _) = setup();
        let mut tx = store.begin();
        let ghost = MemberId::from("ghost");
        assert_eq!(
            wallets.apply_delta(&mut tx, &ghost, Points::from(5)),
            Err(WalletError::UnknownWallet(ghost.clone()))
        );
        assert!(wallets.balance(&ghost).is_err());
    }

    #[test]
    fn adjust_currency_commits_immediately() {
        let (_store, wallets, house) = setup();
        let balance = wallets
            .adjust_currency(&house, Money(dec!(500)))
            .expect("test: top up");
        assert_eq!(balance, Money(dec!(500)));
        let err = wallets.adjust_currency(&house, Money(dec!(-600)));
        assert!(matches!(
            err,
            Err(StoreError::Wallet(WalletError::InsufficientFunds { .. }))
        ));
    }
}
