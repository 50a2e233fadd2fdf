// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Member activation workflow.
//!
//! ```text
//! INITIATED -> FUNDS_CHECKED -> TRANSFER_PENDING -> TRANSFER_CONFIRMED
//!           -> REWARDS_DISTRIBUTED
//! ```
//!
//! Any non-terminal state may exit to FAILED. The activation claim (a
//! PENDING record, unique per member) is taken at INITIATED, so concurrent
//! requests for one member serialize and the loser sees `AlreadyActivated`.
//! Grants, wallet credits, the COMPLETED transition and the activation flag
//! commit in one store transaction; a failure or a dropped future before
//! that commit leaves only a FAILED attempt in the history.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{Actor, Authorizer, RoleAuthorizer};
use crate::config::EngineConfig;
use crate::distribution::{coalesce, Allocation, DistributionPolicy, Slot};
use crate::error::{ActivationError, ConfigError, ErrorKind, ValidationError};
use crate::ledger::{NewGrant, RewardLedger};
use crate::provider::{bounded, require_reference, require_success, WalletProvider};
use crate::referral_graph::{MemberDirectory, ReferralGraph};
use crate::store::{ActivationClaim, Store};
use crate::types::{
    ActivationRecord, EventKind, GrantStatus, Member, MemberId, Money, Points, ReferenceId,
    RewardGrant,
};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationState {
    Initiated,
    FundsChecked,
    TransferPending,
    TransferConfirmed,
    RewardsDistributed,
    Failed,
}

impl ActivationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RewardsDistributed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::FundsChecked => "FUNDS_CHECKED",
            Self::TransferPending => "TRANSFER_PENDING",
            Self::TransferConfirmed => "TRANSFER_CONFIRMED",
            Self::RewardsDistributed => "REWARDS_DISTRIBUTED",
            Self::Failed => "FAILED",
        }
    }
}

fn enter(member: &MemberId, state: ActivationState) {
    tracing::info!(member = %member, state = state.as_str(), "activation state");
}

// ---------------------------------------------------------------------------
// Request / receipt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub actor: Actor,
    pub member: MemberId,
    /// One-time password confirming the provider transfer.
    pub otp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationReceipt {
    pub member: MemberId,
    pub reference_id: ReferenceId,
    pub state: ActivationState,
    pub grants: Vec<RewardGrant>,
    pub total_points: Points,
    pub record: Option<ActivationRecord>,
}

/// Everything resolved before money moves.
struct Prepared {
    activator: Member,
    ancestors: Vec<MemberId>,
    allocation: Allocation,
}

// ---------------------------------------------------------------------------
// Claim guard
// ---------------------------------------------------------------------------

/// Marks the PENDING claim FAILED unless disarmed after a successful
/// commit. Runs on error returns and when the workflow future is dropped.
struct ClaimGuard<'a> {
    store: &'a Store,
    member: MemberId,
    reference: Option<ReferenceId>,
    armed: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(store: &'a Store, member: MemberId) -> Self {
        Self {
            store,
            member,
            reference: None,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn fail(mut self, reason: &str) {
        self.armed = false;
        self.release(reason);
    }

    fn release(&self, reason: &str) {
        if let Err(err) = self
            .store
            .fail_activation(&self.member, self.reference.clone(), reason)
        {
            tracing::error!(member = %self.member, error = %err, "could not release activation claim");
        }
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(member = %self.member, "activation abandoned before commit");
            self.release("activation abandoned before commit");
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

pub struct ActivationWorkflow<P: WalletProvider + ?Sized> {
    store: Arc<Store>,
    graph: ReferralGraph<Store>,
    ledger: RewardLedger,
    policy: DistributionPolicy,
    provider: Arc<P>,
    authorizer: Arc<dyn Authorizer>,
    fee: Money,
    currency: String,
    house_account: String,
    timeout: Duration,
}

impl<P: WalletProvider + ?Sized> ActivationWorkflow<P> {
    pub fn new(config: &EngineConfig, store: Arc<Store>, provider: Arc<P>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            graph: ReferralGraph::for_store(Arc::clone(&store)),
            ledger: RewardLedger::new(Arc::clone(&store)),
            policy: config.policy()?,
            store,
            provider,
            authorizer: Arc::new(RoleAuthorizer),
            fee: config.activation.fee,
            currency: config.activation.currency.clone(),
            house_account: config.house.external_account.clone(),
            timeout: config.provider_timeout(),
        })
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn fee(&self) -> Money {
        self.fee
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run one activation to REWARDS_DISTRIBUTED or FAILED.
    pub async fn activate(
        &self,
        request: ActivationRequest,
    ) -> Result<ActivationReceipt, ActivationError> {
        tracing::debug!(
            member = %request.member,
            actor = %request.actor.id,
            role = %request.actor.role,
            "activation requested"
        );
        let result = self.run(&request).await;
        if let Err(err) = &result {
            match err.kind() {
                ErrorKind::Integrity => tracing::error!(
                    member = %request.member,
                    state = ActivationState::Failed.as_str(),
                    error = %err,
                    "activation failed on integrity error"
                ),
                _ => tracing::warn!(
                    member = %request.member,
                    state = ActivationState::Failed.as_str(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "activation failed"
                ),
            }
        }
        result
    }

    async fn run(&self, request: &ActivationRequest) -> Result<ActivationReceipt, ActivationError> {
        let member = &request.member;
        enter(member, ActivationState::Initiated);
        let prepared = self.prepare(request)?;

        self.store.claim_activation(ActivationClaim {
            member: member.clone(),
            actor: request.actor.id.clone(),
            role: request.actor.role,
            amount: self.fee,
            currency: self.currency.clone(),
        })?;
        let mut guard = ClaimGuard::new(&self.store, member.clone());

        match self.transfer_and_distribute(request, &prepared, &mut guard).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                guard.fail(&err.to_string());
                Err(err)
            }
        }
    }

    /// INITIATED checks: known parties, authorization, not yet activated,
    /// resolvable upline and a valid schedule.
    fn prepare(&self, request: &ActivationRequest) -> Result<Prepared, ActivationError> {
        let target = self
            .store
            .member(&request.member)
            .ok_or_else(|| ValidationError::UnknownMember(request.member.clone()))?;
        let activator = self
            .store
            .member(&request.actor.id)
            .ok_or_else(|| ValidationError::UnknownActor(request.actor.id.clone()))?;

        self.authorizer.authorize_activation(&request.actor, &target)?;
        if target.is_activated {
            return Err(ActivationError::AlreadyActivated(target.id));
        }

        let allocation = self.policy.allocate(EventKind::Activation, self.fee.0)?;
        let ancestors = self
            .graph
            .resolve_ancestors(&target.id, self.policy.activation.depth())?;

        Ok(Prepared {
            activator,
            ancestors,
            allocation,
        })
    }

    async fn transfer_and_distribute(
        &self,
        request: &ActivationRequest,
        prepared: &Prepared,
        guard: &mut ClaimGuard<'_>,
    ) -> Result<ActivationReceipt, ActivationError> {
        let member = &request.member;
        let account = prepared.activator.external_account_id.as_str();

        // ---- FUNDS_CHECKED ----
        let available = bounded(
            "get_balance",
            self.timeout,
            self.provider.get_balance(account),
        )
        .await?;
        if available < self.fee {
            return Err(ActivationError::InsufficientFunds {
                available,
                required: self.fee,
            });
        }
        enter(member, ActivationState::FundsChecked);

        // ---- TRANSFER_PENDING ----
        let receipt = bounded(
            "initiate_transfer",
            self.timeout,
            self.provider
                .initiate_transfer(account, &self.house_account, self.fee, &self.currency),
        )
        .await?;
        let reference = require_reference(receipt)?;
        guard.reference = Some(reference.clone());
        tracing::info!(
            member = %member,
            reference = %reference,
            state = ActivationState::TransferPending.as_str(),
            "activation state"
        );

        // ---- TRANSFER_CONFIRMED ----
        let confirmation = bounded(
            "confirm_transfer",
            self.timeout,
            self.provider.confirm_transfer(&reference, &request.otp),
        )
        .await?;
        require_success(&confirmation)?;
        enter(member, ActivationState::TransferConfirmed);

        // ---- REWARDS_DISTRIBUTED ----
        let grants = self
            .distribute(member, &request.actor.id, prepared, &reference)
            .map_err(|err| {
                tracing::error!(
                    member = %member,
                    reference = %reference,
                    error = %err,
                    "transfer confirmed but rewards not committed; needs reconciliation"
                );
                err
            })?;
        guard.disarm();
        enter(member, ActivationState::RewardsDistributed);

        Ok(ActivationReceipt {
            member: member.clone(),
            reference_id: reference,
            state: ActivationState::RewardsDistributed,
            total_points: grants.iter().map(|g| g.points).sum(),
            grants,
            record: self.store.activation(member),
        })
    }

    /// Stage every grant plus the COMPLETED transition, then commit once.
    fn distribute(
        &self,
        member: &MemberId,
        activator: &MemberId,
        prepared: &Prepared,
        reference: &ReferenceId,
    ) -> Result<Vec<RewardGrant>, ActivationError> {
        let resolved = prepared.allocation.awards.iter().filter_map(|award| {
            let receiver = match award.slot {
                Slot::Upline(level) => prepared
                    .ancestors
                    .get(usize::from(level).checked_sub(1)?)?
                    .clone(),
                Slot::Activator => activator.clone(),
                _ => return None,
            };
            Some((receiver, *award))
        });
        let beneficiaries = coalesce(resolved);

        let mut tx = self.store.begin();
        for beneficiary in &beneficiaries {
            self.ledger.record_grant(
                &mut tx,
                NewGrant {
                    source_type: EventKind::Activation,
                    giver: member.clone(),
                    receiver: beneficiary.receiver.clone(),
                    points: beneficiary.points,
                    title: beneficiary.title(),
                    description: format!("Reward for the activation of member {member}"),
                    reference_id: reference.clone(),
                    status: GrantStatus::Completed,
                },
            )?;
        }
        tx.complete_activation(member, reference.clone());
        Ok(tx.commit()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HouseAccount;
    use crate::types::{ActivationStatus, ActorRole};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_states() {
        assert!(ActivationState::RewardsDistributed.is_terminal());
        assert!(ActivationState::Failed.is_terminal());
        assert!(!ActivationState::TransferPending.is_terminal());
    }

    fn claimed_store() -> Store {
        let store = Store::new(&HouseAccount::default(), dec!(0.01));
        store
            .insert_member(Member {
                id: MemberId::from("a"),
                referral_code: "CODEA".into(),
                sponsor: None,
                is_activated: false,
                role: ActorRole::Member,
                external_account_id: "ext-a".into(),
                created_at: Utc::now(),
            })
            .expect("test: member");
        store
            .claim_activation(ActivationClaim {
                member: MemberId::from("a"),
                actor: MemberId::from("house"),
                role: ActorRole::Admin,
                amount: Money(dec!(175)),
                currency: "peso".into(),
            })
            .expect("test: claim");
        store
    }

    #[test]
    fn dropped_guard_fails_claim() {
        let store = claimed_store();
        {
            let mut guard = ClaimGuard::new(&store, MemberId::from("a"));
            guard.reference = Some(ReferenceId::from("TW-1"));
        }
        let record = store.activation(&MemberId::from("a")).expect("test: record");
        assert_eq!(record.status, ActivationStatus::Failed);
        assert_eq!(record.reference_id, Some(ReferenceId::from("TW-1")));
    }

    #[test]
    fn disarmed_guard_leaves_claim_pending() {
        let store = claimed_store();
        {
            let mut guard = ClaimGuard::new(&store, MemberId::from("a"));
            guard.disarm();
        }
        let record = store.activation(&MemberId::from("a")).expect("test: record");
        assert_eq!(record.status, ActivationStatus::Pending);
    }

    #[test]
    fn explicit_failure_records_reason() {
        let store = claimed_store();
        ClaimGuard::new(&store, MemberId::from("a")).fail("confirm_transfer timed out");
        let record = store.activation(&MemberId::from("a")).expect("test: record");
        assert_eq!(record.failure_reason.as_deref(), Some("confirm_transfer timed out"));
    }
}
