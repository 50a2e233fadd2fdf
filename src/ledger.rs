// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Append-only reward ledger.
//!
//! A grant row and its paired wallet credit are staged together on the same
//! [`Transaction`]. `(reference_id, receiver)` is the idempotence key: a
//! second grant for the same pair is rejected, never silently re-credited.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::store::{Store, Transaction};
use crate::types::{
    EventKind, GrantId, GrantStatus, MemberId, Points, ReferenceId, RewardGrant,
};
use crate::wallet::WalletAccount;

/// A grant to be recorded.
#[derive(Debug, Clone)]
pub struct NewGrant {
    pub source_type: EventKind,
    pub giver: MemberId,
    pub receiver: MemberId,
    pub points: Points,
    pub title: String,
    pub description: String,
    pub reference_id: ReferenceId,
    pub status: GrantStatus,
}

/// Committed grants to one member with their total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRewards {
    pub receiver: MemberId,
    pub total: Points,
    pub grants: Vec<RewardGrant>,
}

#[derive(Clone)]
pub struct RewardLedger {
    store: Arc<Store>,
    wallets: WalletAccount,
}

impl RewardLedger {
    pub fn new(store: Arc<Store>) -> Self {
        let wallets = WalletAccount::new(Arc::clone(&store));
        Self { store, wallets }
    }

    /// Stage a grant row plus the receiver's wallet credit.
    pub fn record_grant(
        &self,
        tx: &mut Transaction<'_>,
        grant: NewGrant,
    ) -> Result<GrantId, LedgerError> {
        if grant.points.is_negative() {
            return Err(LedgerError::NegativeGrant(grant.points));
        }
        if !tx.member_exists(&grant.receiver) {
            return Err(LedgerError::UnknownReceiver(grant.receiver));
        }
        if tx.grant_key_taken(&grant.reference_id, &grant.receiver) {
            return Err(LedgerError::DuplicateGrant {
                reference_id: grant.reference_id,
                receiver: grant.receiver,
            });
        }

        // Credits never overdraw; the only failure left is a missing wallet.
        self.wallets
            .apply_delta(tx, &grant.receiver, grant.points)
            .map_err(|_| LedgerError::UnknownReceiver(grant.receiver.clone()))?;

        let id = GrantId::new();
        let now = Utc::now();
        tracing::debug!(
            grant = %id,
            receiver = %grant.receiver,
            reference = %grant.reference_id,
            points = %grant.points,
            "grant staged"
        );
        tx.stage_grant(RewardGrant {
            id,
            source_type: grant.source_type,
            points: grant.points,
            giver: grant.giver,
            receiver: grant.receiver,
            title: grant.title,
            description: grant.description,
            status: grant.status,
            reference_id: grant.reference_id,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    pub fn grants_for(&self, receiver: &MemberId) -> MemberRewards {
        let grants = self.store.grants_for(receiver);
        MemberRewards {
            receiver: receiver.clone(),
            total: grants.iter().map(|g| g.points).sum(),
            grants,
        }
    }

    pub fn all_grants(&self) -> Vec<RewardGrant> {
        self.store.grants()
    }

    pub fn grants_by_reference(&self, reference: &ReferenceId) -> Vec<RewardGrant> {
        self.store.grants_by_reference(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HouseAccount;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<Store>, RewardLedger) {
        let store = Arc::new(Store::new(&HouseAccount::default(), dec!(0.01)));
        (Arc::clone(&store), RewardLedger::new(store))
    }

    fn grant(reference: &str, points: i64) -> NewGrant {
        NewGrant {
            source_type: EventKind::Activation,
            giver: MemberId::from("a"),
            receiver: MemberId::from("house"),
            points: Points::from(points),
            title: "Unilevel Third Level Reward".into(),
            description: "fallback level".into(),
            reference_id: ReferenceId::from(reference),
            status: GrantStatus::Completed,
        }
    }

    #[test]
    fn recorded_grant_credits_wallet_on_commit() {
        let (store, ledger) = setup();
        let mut tx = store.begin();
        ledger.record_grant(&mut tx, grant("ref-1", 5)).expect("test: record");
        assert_eq!(tx.staged_grants().len(), 1);
        tx.commit().expect("test: commit");

        let rewards = ledger.grants_for(store.house());
        assert_eq!(rewards.total, Points::from(5));
        assert_eq!(rewards.grants.len(), 1);
        assert_eq!(
            store.wallet(store.house()).map(|w| w.reward_points),
            Some(Points::from(5))
        );
    }

    #[test]
    fn duplicate_in_same_transaction_rejected() {
        let (store, ledger) = setup();
        let mut tx = store.begin();
        ledger.record_grant(&mut tx, grant("ref-1", 5)).expect("test: record");
        let err = ledger.record_grant(&mut tx, grant("ref-1", 5));
        assert!(matches!(err, Err(LedgerError::DuplicateGrant { .. })));
    }

    #[test]
    fn duplicate_across_transactions_rejected() {
        let (store, ledger) = setup();
        let mut tx = store.begin();
        ledger.record_grant(&mut tx, grant("ref-1", 5)).expect("test: record");
        tx.commit().expect("test: commit");

        let mut tx = store.begin();
        let err = ledger.record_grant(&mut tx, grant("ref-1", 7));
        assert!(matches!(err, Err(LedgerError::DuplicateGrant { .. })));
        // A fresh reference is fine.
        ledger.record_grant(&mut tx, grant("ref-2", 7)).expect("test: new reference");
        tx.commit().expect("test: commit");
        assert_eq!(ledger.grants_for(store.house()).total, Points::from(12));
        assert_eq!(ledger.grants_by_reference(&ReferenceId::from("ref-2")).len(), 1);
    }

    #[test]
    fn negative_and_unknown_receiver_rejected() {
        let (store, ledger) = setup();
        let mut tx = store.begin();
        assert!(matches!(
            ledger.record_grant(&mut tx, grant("ref-1", -1)),
            Err(LedgerError::NegativeGrant(_))
        ));
        let mut ghost = grant("ref-1", 1);
        ghost.receiver = MemberId::from("ghost");
        assert_eq!(
            ledger.record_grant(&mut tx, ghost),
            Err(LedgerError::UnknownReceiver(MemberId::from("ghost")))
        );
        assert!(tx.staged_grants().is_empty());
        assert!(ledger.all_grants().is_empty());
    }

    #[test]
    fn zero_point_grant_is_recorded() {
        let (store, ledger) = setup();
        let mut tx = store.begin();
        ledger
            .record_grant(&mut tx, grant("ref-0", 0))
            .expect("test: zero grant");
        tx.commit().expect("test: commit");
        assert_eq!(ledger.all_grants().len(), 1);
    }
}
