// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Merchant purchase reward split.
//!
//! A purchase carries a reward pool that is split by the purchase schedule
//! across hub, community, the merchant's referrer and that referrer's
//! sponsor, the purchaser's rebate, the investor pool and the purchaser's
//! five-level unilevel chain. The house account takes the platform share and
//! any slot with no concrete receiver. No external calls are made, so the
//! whole split is a single synchronous store transaction.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::distribution::{coalesce, DistributionPolicy, Slot};
use crate::error::{ConfigError, ErrorKind, PurchaseError, ValidationError};
use crate::ledger::{NewGrant, RewardLedger};
use crate::referral_graph::{MemberDirectory, ReferralGraph};
use crate::store::Store;
use crate::types::{
    EventKind, GrantStatus, MemberId, Merchant, MerchantId, Points, ReferenceId, RewardGrant,
};

/// Registration request for a merchant.
#[derive(Debug, Clone)]
pub struct NewMerchant {
    pub id: Option<MerchantId>,
    pub owner: MemberId,
    /// Referral code of the member who brought the merchant in.
    pub referrer_code: String,
    pub business_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub purchaser: MemberId,
    pub merchant: MerchantId,
    pub pool: Decimal,
    pub hub: Option<MemberId>,
    pub community: Option<MemberId>,
    pub investor: Option<MemberId>,
    pub reference_id: ReferenceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub reference_id: ReferenceId,
    pub pool: Decimal,
    pub grants: Vec<RewardGrant>,
    /// Points that landed on the house account.
    pub house_points: Points,
}

pub struct PurchaseWorkflow {
    store: Arc<Store>,
    graph: ReferralGraph<Store>,
    ledger: RewardLedger,
    policy: DistributionPolicy,
}

impl PurchaseWorkflow {
    pub fn new(config: &EngineConfig, store: Arc<Store>) -> Result<Self, ConfigError> {
        Ok(Self {
            graph: ReferralGraph::for_store(Arc::clone(&store)),
            ledger: RewardLedger::new(Arc::clone(&store)),
            policy: config.policy()?,
            store,
        })
    }

    pub fn register_merchant(&self, request: NewMerchant) -> Result<Merchant, ValidationError> {
        let referrer = self
            .store
            .member_by_referral_code(&request.referrer_code)
            .ok_or_else(|| ValidationError::UnknownReferralCode(request.referrer_code.clone()))?;
        let merchant = Merchant {
            id: request.id.unwrap_or_else(MerchantId::generate),
            owner: request.owner,
            referred_by: referrer.id,
            business_name: request.business_name,
            created_at: Utc::now(),
        };
        self.store.insert_merchant(merchant.clone())?;
        tracing::info!(
            merchant = %merchant.id,
            referred_by = %merchant.referred_by,
            "merchant registered"
        );
        Ok(merchant)
    }

    fn known_or_house(&self, member: &Option<MemberId>) -> Result<MemberId, ValidationError> {
        match member {
            Some(id) if self.store.member(id).is_some() => Ok(id.clone()),
            Some(id) => Err(ValidationError::UnknownMember(id.clone())),
            None => Ok(self.graph.house().clone()),
        }
    }

    /// Split `event.pool` and commit one grant per beneficiary.
    pub fn distribute(&self, event: &PurchaseEvent) -> Result<PurchaseReceipt, PurchaseError> {
        let result = self.split(event);
        if let Err(err) = &result {
            match err.kind() {
                ErrorKind::Integrity => tracing::error!(
                    reference = %event.reference_id,
                    purchaser = %event.purchaser,
                    merchant = %event.merchant,
                    error = %err,
                    "purchase split failed on integrity error"
                ),
                _ => tracing::warn!(
                    reference = %event.reference_id,
                    purchaser = %event.purchaser,
                    error = %err,
                    "purchase split rejected"
                ),
            }
        }
        result
    }

    fn split(&self, event: &PurchaseEvent) -> Result<PurchaseReceipt, PurchaseError> {
        if event.pool <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(event.pool).into());
        }
        if self.store.member(&event.purchaser).is_none() {
            return Err(ValidationError::UnknownMember(event.purchaser.clone()).into());
        }
        let merchant = self
            .store
            .merchant(&event.merchant)
            .ok_or_else(|| ValidationError::UnknownMerchant(event.merchant.clone()))?;
        let hub = self.known_or_house(&event.hub)?;
        let community = self.known_or_house(&event.community)?;
        let investor = self.known_or_house(&event.investor)?;

        let merchant_upline = self
            .graph
            .resolve_ancestors(&merchant.referred_by, 1)?
            .remove(0);
        let unilevel = self
            .graph
            .resolve_ancestors(&event.purchaser, self.policy.purchase.depth())?;
        let allocation = self.policy.allocate(EventKind::Purchase, event.pool)?;

        let house = self.graph.house().clone();
        let resolved = allocation.awards.iter().filter_map(|award| {
            let receiver = match award.slot {
                Slot::Hub => hub.clone(),
                Slot::Community => community.clone(),
                Slot::Investor => investor.clone(),
                Slot::MerchantReferrer => merchant.referred_by.clone(),
                Slot::MerchantUpline => merchant_upline.clone(),
                Slot::Purchaser => event.purchaser.clone(),
                Slot::Unilevel(level) => unilevel
                    .get(usize::from(level).checked_sub(1)?)?
                    .clone(),
                Slot::Platform => house.clone(),
                // Activation-only slots.
                Slot::Upline(_) | Slot::Activator => return None,
            };
            Some((receiver, *award))
        });
        let beneficiaries = coalesce(resolved);

        let mut tx = self.store.begin();
        for beneficiary in &beneficiaries {
            self.ledger.record_grant(
                &mut tx,
                NewGrant {
                    source_type: EventKind::Purchase,
                    giver: event.purchaser.clone(),
                    receiver: beneficiary.receiver.clone(),
                    points: beneficiary.points,
                    title: beneficiary.title(),
                    description: format!(
                        "Reward from purchase {} at {}",
                        event.reference_id, merchant.business_name
                    ),
                    reference_id: event.reference_id.clone(),
                    status: GrantStatus::Completed,
                },
            )?;
        }
        let grants = tx.commit()?;

        let house_points = grants
            .iter()
            .filter(|g| g.receiver == house)
            .map(|g| g.points)
            .sum();
        tracing::info!(
            reference = %event.reference_id,
            purchaser = %event.purchaser,
            merchant = %merchant.id,
            pool = %event.pool,
            grants = grants.len(),
            "purchase rewards distributed"
        );

        Ok(PurchaseReceipt {
            reference_id: event.reference_id.clone(),
            pool: event.pool,
            grants,
            house_points,
        })
    }
}
