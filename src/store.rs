// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! In-process relational store.
//!
//! Tables: members, merchants, activation records (one live record per
//! member plus archived attempts), reward grants and wallet balances.
//!
//! Writes go through a [`Transaction`]: callers stage grants, balance
//! deltas and activation completions, and [`Transaction::commit`] applies
//! all of them under one write lock after validating duplicates, overdrafts,
//! activation transitions and the ledger/balance invariant. A transaction
//! dropped without commit leaves no trace.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditReport, LedgerAudit, Mismatch};
use crate::config::{EngineConfig, HouseAccount};
use crate::error::{LedgerError, StoreError, ValidationError, WalletError};
use crate::referral_graph::{ensure_acyclic, MemberDirectory};
use crate::types::{
    ActivationRecord, ActivationStatus, ActorRole, Member, MemberId, Merchant, MerchantId, Money,
    Points, ReferenceId, RewardGrant, WalletBalance,
};

/// Referral code reserved for the house account.
pub const HOUSE_REFERRAL_CODE: &str = "HOUSE";

type GrantKey = (ReferenceId, MemberId);

// ---------------------------------------------------------------------------
// StoreState
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreState {
    members: BTreeMap<MemberId, Member>,
    merchants: BTreeMap<MerchantId, Merchant>,
    /// Live activation record per member.
    activations: BTreeMap<MemberId, ActivationRecord>,
    /// Superseded attempts, oldest first.
    activation_history: Vec<ActivationRecord>,
    grants: Vec<RewardGrant>,
    wallets: BTreeMap<MemberId, WalletBalance>,

    #[serde(skip)]
    referral_codes: HashMap<String, MemberId>,
    #[serde(skip)]
    grant_keys: HashSet<GrantKey>,
    #[serde(skip)]
    grant_totals: HashMap<MemberId, Points>,
}

impl StoreState {
    /// Rebuild derived indexes after deserialization.
    fn reindex(&mut self) {
        self.referral_codes = self
            .members
            .values()
            .map(|m| (m.referral_code.clone(), m.id.clone()))
            .collect();
        self.grant_keys.clear();
        self.grant_totals.clear();
        for grant in &self.grants {
            self.grant_keys
                .insert((grant.reference_id.clone(), grant.receiver.clone()));
            *self.grant_totals.entry(grant.receiver.clone()).or_default() += grant.points;
        }
    }

    fn insert_member(&mut self, member: Member) -> Result<(), ValidationError> {
        if self.members.contains_key(&member.id) {
            return Err(ValidationError::DuplicateMember(member.id));
        }
        if self.referral_codes.contains_key(&member.referral_code) {
            return Err(ValidationError::DuplicateReferralCode(member.referral_code));
        }
        if let Some(sponsor) = &member.sponsor {
            if !self.members.contains_key(sponsor) {
                return Err(ValidationError::UnknownMember(sponsor.clone()));
            }
            ensure_acyclic(&*self, &member.id, sponsor)?;
        }

        self.referral_codes
            .insert(member.referral_code.clone(), member.id.clone());
        self.wallets
            .insert(member.id.clone(), WalletBalance::empty(member.id.clone()));
        self.members.insert(member.id.clone(), member);
        Ok(())
    }
}

impl MemberDirectory for StoreState {
    fn member(&self, id: &MemberId) -> Option<Member> {
        self.members.get(id).cloned()
    }

    fn member_by_referral_code(&self, code: &str) -> Option<Member> {
        self.referral_codes
            .get(code)
            .and_then(|id| self.members.get(id))
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Input for [`Store::claim_activation`].
#[derive(Debug, Clone)]
pub struct ActivationClaim {
    pub member: MemberId,
    pub actor: MemberId,
    pub role: ActorRole,
    pub amount: Money,
    pub currency: String,
}

pub struct Store {
    state: RwLock<StoreState>,
    audit: Mutex<LedgerAudit>,
    house: MemberId,
}

impl Store {
    /// Empty store seeded with the house account.
    pub fn new(house: &HouseAccount, audit_threshold: Decimal) -> Self {
        let mut state = StoreState::default();
        Self::seed_house(&mut state, house);
        Self {
            state: RwLock::new(state),
            audit: Mutex::new(LedgerAudit::new(audit_threshold)),
            house: house.member_id.clone(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.house, config.audit_threshold)
    }

    fn seed_house(state: &mut StoreState, house: &HouseAccount) {
        if state.members.contains_key(&house.member_id) {
            return;
        }
        let member = Member {
            id: house.member_id.clone(),
            referral_code: HOUSE_REFERRAL_CODE.to_string(),
            sponsor: None,
            is_activated: true,
            role: ActorRole::Admin,
            external_account_id: house.external_account.clone(),
            created_at: Utc::now(),
        };
        state
            .referral_codes
            .insert(member.referral_code.clone(), member.id.clone());
        state
            .wallets
            .insert(member.id.clone(), WalletBalance::empty(member.id.clone()));
        state.members.insert(member.id.clone(), member);
    }

    pub fn house(&self) -> &MemberId {
        &self.house
    }

    /// Start staging writes.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            grants: Vec::new(),
            point_deltas: BTreeMap::new(),
            currency_deltas: BTreeMap::new(),
            completions: Vec::new(),
        }
    }

    // ---- Members ----

    pub(crate) fn insert_member(&self, member: Member) -> Result<(), ValidationError> {
        self.state.write().insert_member(member)
    }

    pub fn member_count(&self) -> usize {
        self.state.read().members.len()
    }

    pub fn members(&self) -> Vec<Member> {
        self.state.read().members.values().cloned().collect()
    }

    // ---- Merchants ----

    pub(crate) fn insert_merchant(&self, merchant: Merchant) -> Result<(), ValidationError> {
        let mut state = self.state.write();
        if state.merchants.contains_key(&merchant.id) {
            return Err(ValidationError::DuplicateMerchant(merchant.id));
        }
        for id in [&merchant.owner, &merchant.referred_by] {
            if !state.members.contains_key(id) {
                return Err(ValidationError::UnknownMember(id.clone()));
            }
        }
        state.merchants.insert(merchant.id.clone(), merchant);
        Ok(())
    }

    pub fn merchant(&self, id: &MerchantId) -> Option<Merchant> {
        self.state.read().merchants.get(id).cloned()
    }

    // ---- Wallets ----

    pub fn wallet(&self, member: &MemberId) -> Option<WalletBalance> {
        self.state.read().wallets.get(member).cloned()
    }

    // ---- Activations ----

    /// Live activation record for `member`.
    pub fn activation(&self, member: &MemberId) -> Option<ActivationRecord> {
        self.state.read().activations.get(member).cloned()
    }

    /// Every attempt for `member`, newest first.
    pub fn activation_history(&self, member: &MemberId) -> Vec<ActivationRecord> {
        let state = self.state.read();
        state
            .activations
            .get(member)
            .into_iter()
            .chain(state.activation_history.iter().rev())
            .filter(|r| &r.member_id == member)
            .cloned()
            .collect()
    }

    /// Reserve the activation of `claim.member` by inserting a PENDING
    /// record. A member already activated, in flight, or refunded cannot be
    /// claimed; a FAILED attempt is archived and may be retried.
    pub fn claim_activation(&self, claim: ActivationClaim) -> Result<ActivationRecord, StoreError> {
        let mut state = self.state.write();

        let member = state
            .members
            .get(&claim.member)
            .ok_or_else(|| StoreError::UnknownMember(claim.member.clone()))?;
        if member.is_activated {
            return Err(StoreError::AlreadyActivated(claim.member));
        }

        match state.activations.get(&claim.member).map(|r| r.status) {
            Some(ActivationStatus::Failed) => {
                if let Some(previous) = state.activations.remove(&claim.member) {
                    state.activation_history.push(previous);
                }
            }
            Some(_) => return Err(StoreError::AlreadyActivated(claim.member)),
            None => {}
        }

        let now = Utc::now();
        let record = ActivationRecord {
            id: Uuid::new_v4(),
            member_id: claim.member.clone(),
            amount: claim.amount,
            currency: claim.currency,
            status: ActivationStatus::Pending,
            reference_id: None,
            activated_by: claim.actor,
            activated_by_role: claim.role,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.activations.insert(claim.member, record.clone());
        Ok(record)
    }

    /// Move the live PENDING record of `member` to FAILED.
    pub fn fail_activation(
        &self,
        member: &MemberId,
        reference: Option<ReferenceId>,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let record = state
            .activations
            .get_mut(member)
            .ok_or_else(|| StoreError::MissingActivation(member.clone()))?;
        if !record.status.can_transition_to(ActivationStatus::Failed) {
            return Err(StoreError::IllegalTransition {
                member: member.clone(),
                from: record.status,
                to: ActivationStatus::Failed,
            });
        }
        record.status = ActivationStatus::Failed;
        if reference.is_some() {
            record.reference_id = reference;
        }
        record.failure_reason = Some(reason.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    // ---- Grants ----

    pub fn grants(&self) -> Vec<RewardGrant> {
        self.state.read().grants.clone()
    }

    pub fn grants_for(&self, receiver: &MemberId) -> Vec<RewardGrant> {
        self.state
            .read()
            .grants
            .iter()
            .filter(|g| &g.receiver == receiver)
            .cloned()
            .collect()
    }

    pub fn grants_by_reference(&self, reference: &ReferenceId) -> Vec<RewardGrant> {
        self.state
            .read()
            .grants
            .iter()
            .filter(|g| &g.reference_id == reference)
            .cloned()
            .collect()
    }

    pub fn grant_count(&self) -> usize {
        self.state.read().grants.len()
    }

    /// Sum of committed grants to `receiver`.
    pub fn ledger_total(&self, receiver: &MemberId) -> Points {
        self.state
            .read()
            .grant_totals
            .get(receiver)
            .copied()
            .unwrap_or_default()
    }

    // ---- Audit ----

    /// Full scan comparing every wallet against the sum of its grants.
    /// Totals are recomputed from the grant rows, not the cached index.
    pub fn audit_all(&self) -> AuditReport {
        let state = self.state.read();
        let mut sums: HashMap<&MemberId, Points> = HashMap::new();
        for grant in &state.grants {
            *sums.entry(&grant.receiver).or_default() += grant.points;
        }

        let mut report = AuditReport {
            members_checked: state.wallets.len(),
            total_points: state.wallets.values().map(|w| w.reward_points).sum(),
            total_granted: state.grants.iter().map(|g| g.points).sum(),
            mismatches: Vec::new(),
        };
        for (member, wallet) in &state.wallets {
            let ledger_total = sums.get(member).copied().unwrap_or_default();
            if wallet.reward_points != ledger_total {
                tracing::error!(
                    member = %member,
                    balance = %wallet.reward_points,
                    ledger_total = %ledger_total,
                    "audit scan found ledger/balance mismatch"
                );
                report.mismatches.push(Mismatch {
                    member: member.clone(),
                    balance: wallet.reward_points,
                    ledger_total,
                });
            }
        }
        report
    }

    /// Whether the audit breaker is refusing commits.
    pub fn is_halted(&self) -> bool {
        self.audit.lock().is_circuit_breaker_tripped()
    }

    pub fn reset_audit(&self) {
        self.audit.lock().reset_circuit_breaker();
    }

    // ---- Snapshots ----

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&*self.state.read())?)
    }

    /// Restore a snapshot. The house account is seeded if absent.
    pub fn from_json(
        raw: &str,
        house: &HouseAccount,
        audit_threshold: Decimal,
    ) -> Result<Self, StoreError> {
        let mut state: StoreState = serde_json::from_str(raw)?;
        state.reindex();
        Self::seed_house(&mut state, house);
        Ok(Self {
            state: RwLock::new(state),
            audit: Mutex::new(LedgerAudit::new(audit_threshold)),
            house: house.member_id.clone(),
        })
    }
}

impl MemberDirectory for Store {
    fn member(&self, id: &MemberId) -> Option<Member> {
        self.state.read().member(id)
    }

    fn member_by_referral_code(&self, code: &str) -> Option<Member> {
        self.state.read().member_by_referral_code(code)
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Staged writes against a [`Store`]. Nothing is visible until
/// [`commit`](Transaction::commit); dropping the transaction discards it.
pub struct Transaction<'s> {
    store: &'s Store,
    grants: Vec<RewardGrant>,
    point_deltas: BTreeMap<MemberId, Points>,
    currency_deltas: BTreeMap<MemberId, Money>,
    completions: Vec<(MemberId, ReferenceId)>,
}

impl<'s> Transaction<'s> {
    pub fn store(&self) -> &'s Store {
        self.store
    }

    pub fn member_exists(&self, id: &MemberId) -> bool {
        self.store.state.read().members.contains_key(id)
    }

    /// Whether `(reference, receiver)` is committed or already staged.
    pub fn grant_key_taken(&self, reference: &ReferenceId, receiver: &MemberId) -> bool {
        self.grants
            .iter()
            .any(|g| &g.reference_id == reference && &g.receiver == receiver)
            || self
                .store
                .state
                .read()
                .grant_keys
                .contains(&(reference.clone(), receiver.clone()))
    }

    /// Committed points balance plus staged deltas.
    pub fn points_balance(&self, member: &MemberId) -> Option<Points> {
        let committed = self.store.state.read().wallets.get(member)?.reward_points;
        Some(committed + self.point_deltas.get(member).copied().unwrap_or_default())
    }

    /// Committed currency balance plus staged deltas.
    pub fn currency_balance(&self, member: &MemberId) -> Option<Money> {
        let committed = self.store.state.read().wallets.get(member)?.currency_balance;
        Some(committed + self.currency_deltas.get(member).copied().unwrap_or_default())
    }

    pub(crate) fn stage_grant(&mut self, grant: RewardGrant) {
        self.grants.push(grant);
    }

    pub(crate) fn stage_points(&mut self, member: &MemberId, delta: Points) {
        *self.point_deltas.entry(member.clone()).or_default() += delta;
    }

    pub(crate) fn stage_currency(&mut self, member: &MemberId, delta: Money) {
        let entry = self.currency_deltas.entry(member.clone()).or_default();
        *entry = *entry + delta;
    }

    /// Stage PENDING -> COMPLETED for the live record of `member` together
    /// with the activation flag flip.
    pub fn complete_activation(&mut self, member: &MemberId, reference: ReferenceId) {
        self.completions.push((member.clone(), reference));
    }

    pub fn staged_grants(&self) -> &[RewardGrant] {
        &self.grants
    }

    /// Validate and apply every staged write atomically. On error nothing
    /// is applied.
    pub fn commit(self) -> Result<Vec<RewardGrant>, StoreError> {
        let mut state = self.store.state.write();
        let mut audit = self.store.audit.lock();
        audit.ensure_open()?;

        // ---- Grants: idempotence key, receiver, sign ----
        let mut batch_keys: HashSet<GrantKey> = HashSet::new();
        let mut batch_totals: HashMap<&MemberId, Points> = HashMap::new();
        for grant in &self.grants {
            if grant.points.is_negative() {
                return Err(LedgerError::NegativeGrant(grant.points).into());
            }
            if !state.members.contains_key(&grant.receiver) {
                return Err(LedgerError::UnknownReceiver(grant.receiver.clone()).into());
            }
            let key = (grant.reference_id.clone(), grant.receiver.clone());
            if state.grant_keys.contains(&key) || !batch_keys.insert(key) {
                return Err(LedgerError::DuplicateGrant {
                    reference_id: grant.reference_id.clone(),
                    receiver: grant.receiver.clone(),
                }
                .into());
            }
            *batch_totals.entry(&grant.receiver).or_default() += grant.points;
        }

        // ---- Prospective wallets ----
        let touched: BTreeSet<&MemberId> = self
            .point_deltas
            .keys()
            .chain(self.currency_deltas.keys())
            .chain(batch_totals.keys().copied())
            .collect();

        let mut updates: Vec<(MemberId, Points, Money)> = Vec::with_capacity(touched.len());
        for member in touched {
            let wallet = state
                .wallets
                .get(member)
                .ok_or_else(|| WalletError::UnknownWallet(member.clone()))?;
            let point_delta = self.point_deltas.get(member).copied().unwrap_or_default();
            let currency_delta = self.currency_deltas.get(member).copied().unwrap_or_default();

            let points = wallet.reward_points + point_delta;
            if points.is_negative() {
                return Err(WalletError::InsufficientFunds {
                    member: member.clone(),
                    available: wallet.reward_points.0,
                    requested: -point_delta.0,
                }
                .into());
            }
            let currency = wallet.currency_balance + currency_delta;
            if currency.is_negative() {
                return Err(WalletError::InsufficientFunds {
                    member: member.clone(),
                    available: wallet.currency_balance.0,
                    requested: -currency_delta.0,
                }
                .into());
            }

            let ledger_total = state.grant_totals.get(member).copied().unwrap_or_default()
                + batch_totals.get(member).copied().unwrap_or_default();
            audit.verify_member(member, points, ledger_total)?;

            updates.push((member.clone(), points, currency));
        }

        // ---- Activation transitions ----
        for (member, _) in &self.completions {
            let record = state
                .activations
                .get(member)
                .ok_or_else(|| StoreError::MissingActivation(member.clone()))?;
            if !record.status.can_transition_to(ActivationStatus::Completed) {
                return Err(StoreError::IllegalTransition {
                    member: member.clone(),
                    from: record.status,
                    to: ActivationStatus::Completed,
                });
            }
            if !state.members.contains_key(member) {
                return Err(StoreError::UnknownMember(member.clone()));
            }
        }

        // ---- Apply ----
        let now = Utc::now();
        for (member, points, currency) in updates {
            if let Some(wallet) = state.wallets.get_mut(&member) {
                wallet.reward_points = points;
                wallet.currency_balance = currency;
                wallet.updated_at = now;
            }
        }
        for grant in &self.grants {
            state
                .grant_keys
                .insert((grant.reference_id.clone(), grant.receiver.clone()));
            *state.grant_totals.entry(grant.receiver.clone()).or_default() += grant.points;
        }
        state.grants.extend(self.grants.iter().cloned());
        for (member, reference) in &self.completions {
            if let Some(record) = state.activations.get_mut(member) {
                record.status = ActivationStatus::Completed;
                record.reference_id = Some(reference.clone());
                record.updated_at = now;
            }
            if let Some(m) = state.members.get_mut(member) {
                m.is_activated = true;
            }
        }

        tracing::debug!(
            grants = self.grants.len(),
            completions = self.completions.len(),
            "transaction committed"
        );
        Ok(self.grants)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
