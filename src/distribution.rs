// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Distribution policy -- splitting an economic event into reward shares.
//!
//! No value creation occurs here. Two independent schedules exist:
//!
//! - **Activation**: flat point awards to the first three upline levels and
//!   to the activator, regardless of the fee paid.
//! - **Purchase**: percentage-of-pool split across hub, community, merchant
//!   referrers, the purchaser, the investor pool and five unilevel tiers.
//!   The platform account absorbs whatever the explicit shares leave,
//!   including the unilevel damping remainder and every rounding remainder,
//!   so an allocation always sums to the pool exactly.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::types::{EventKind, MemberId, Points};

/// Deepest referral level any schedule may pay.
pub const MAX_LEVELS: usize = 5;

// ---------------------------------------------------------------------------
// Slots and shares
// ---------------------------------------------------------------------------

/// Beneficiary role within a distribution. Levels are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// Activation upline level.
    Upline(u8),
    Activator,
    Hub,
    Community,
    /// Member who referred the merchant onto the platform.
    MerchantReferrer,
    /// Purchasing member's personal rebate.
    Purchaser,
    /// Sponsor of the merchant's referrer.
    MerchantUpline,
    Investor,
    /// Purchase unilevel level.
    Unilevel(u8),
    Platform,
}

fn ordinal(level: u8) -> &'static str {
    match level {
        1 => "First",
        2 => "Second",
        3 => "Third",
        4 => "Fourth",
        5 => "Fifth",
        _ => "Nth",
    }
}

impl Slot {
    /// Human-readable grant title.
    pub fn title(&self) -> String {
        match self {
            Self::Upline(level) | Self::Unilevel(level) => {
                format!("Unilevel {} Level Reward", ordinal(*level))
            }
            Self::Activator => "Activator Reward".to_string(),
            Self::Hub => "Hub Reward".to_string(),
            Self::Community => "Community Reward".to_string(),
            Self::MerchantReferrer => "Merchant Direct Referrer Reward".to_string(),
            Self::Purchaser => "Personal Rebate".to_string(),
            Self::MerchantUpline => "Referrer of Merchant Reward".to_string(),
            Self::Investor => "Investor Pool Reward".to_string(),
            Self::Platform => "Platform Share".to_string(),
        }
    }
}

/// One entry of a computed distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Share {
    /// Fraction of the event amount.
    Fraction(Decimal),
    /// Flat award independent of the event amount.
    Flat(Points),
}

/// A concrete award for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    pub slot: Slot,
    pub points: Points,
}

/// Concrete, rounded awards for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub event: EventKind,
    pub awards: Vec<Award>,
}

impl Allocation {
    pub fn total(&self) -> Points {
        self.awards.iter().map(|a| a.points).sum()
    }

    pub fn points_for(&self, slot: Slot) -> Option<Points> {
        self.awards.iter().find(|a| a.slot == slot).map(|a| a.points)
    }
}

/// Resolved receiver of one or more slots within a single event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub receiver: MemberId,
    pub points: Points,
    pub slots: Vec<Slot>,
}

impl Beneficiary {
    pub fn title(&self) -> String {
        self.slots
            .iter()
            .map(Slot::title)
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

/// Merge slots that resolve to the same receiver so each receiver gets one
/// grant per event. Receivers keep the order of their first slot; zero-point
/// awards are dropped.
pub fn coalesce<I>(resolved: I) -> Vec<Beneficiary>
where
    I: IntoIterator<Item = (MemberId, Award)>,
{
    let mut out: Vec<Beneficiary> = Vec::new();
    for (receiver, award) in resolved {
        if award.points.is_zero() {
            continue;
        }
        match out.iter_mut().find(|b| b.receiver == receiver) {
            Some(existing) => {
                existing.points += award.points;
                existing.slots.push(award.slot);
            }
            None => out.push(Beneficiary {
                receiver,
                points: award.points,
                slots: vec![award.slot],
            }),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// ActivationSchedule
// ---------------------------------------------------------------------------

/// Flat activation awards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationSchedule {
    /// Points per upline level, index 0 = direct sponsor.
    pub level_points: Vec<Points>,
    /// Points for the member who performed the activation.
    pub activator_points: Points,
}

impl Default for ActivationSchedule {
    fn default() -> Self {
        Self {
            level_points: vec![Points::from(40), Points::from(10), Points::from(5)],
            activator_points: Points::from(25),
        }
    }
}

impl ActivationSchedule {
    /// Number of upline levels paid.
    pub fn depth(&self) -> usize {
        self.level_points.len()
    }

    /// Total points granted per activation.
    pub fn total(&self) -> Points {
        self.level_points.iter().sum::<Points>() + self.activator_points
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.depth() == 0 || self.depth() > MAX_LEVELS {
            return Err(PolicyError::InvalidDepth(self.depth()));
        }
        if let Some(neg) = self
            .level_points
            .iter()
            .chain(std::iter::once(&self.activator_points))
            .find(|p| p.is_negative())
        {
            return Err(PolicyError::NegativeShare(neg.0));
        }
        Ok(())
    }

    fn awards(&self) -> Vec<Award> {
        let mut awards: Vec<Award> = self
            .level_points
            .iter()
            .enumerate()
            .map(|(i, points)| Award {
                slot: Slot::Upline((i + 1) as u8),
                points: *points,
            })
            .collect();
        awards.push(Award {
            slot: Slot::Activator,
            points: self.activator_points,
        });
        awards
    }
}

// ---------------------------------------------------------------------------
// PurchaseSchedule
// ---------------------------------------------------------------------------

/// Percentage-of-pool purchase split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchaseSchedule {
    pub hub: Decimal,
    pub community: Decimal,
    pub merchant_referrer: Decimal,
    pub purchaser: Decimal,
    pub merchant_upline: Decimal,
    pub investor: Decimal,
    /// Nominal unilevel rates, index 0 = level 1.
    pub unilevel_rates: Vec<Decimal>,
    /// Multiplier applied to every nominal unilevel rate (default 0.8).
    pub unilevel_damping: Decimal,
    /// Platform share before the damping remainder is added (default 0.30).
    pub platform_base: Decimal,
}

impl Default for PurchaseSchedule {
    fn default() -> Self {
        Self {
            hub: dec!(0.05),
            community: dec!(0.05),
            merchant_referrer: dec!(0.15),
            purchaser: dec!(0.10),
            merchant_upline: dec!(0.10),
            investor: dec!(0.05),
            unilevel_rates: vec![dec!(0.06), dec!(0.05), dec!(0.04), dec!(0.03), dec!(0.02)],
            unilevel_damping: dec!(0.8),
            platform_base: dec!(0.30),
        }
    }
}

impl PurchaseSchedule {
    pub fn depth(&self) -> usize {
        self.unilevel_rates.len()
    }

    /// Effective unilevel rates after damping.
    pub fn effective_unilevel_rates(&self) -> Vec<Decimal> {
        self.unilevel_rates
            .iter()
            .map(|rate| *rate * self.unilevel_damping)
            .collect()
    }

    /// Fraction of the pool per slot. The platform fraction is the
    /// remainder and must equal `platform_base` plus the damping remainder;
    /// the fractions therefore sum to exactly one.
    pub fn fractions(&self) -> Result<BTreeMap<Slot, Decimal>, PolicyError> {
        if self.depth() == 0 || self.depth() > MAX_LEVELS {
            return Err(PolicyError::InvalidDepth(self.depth()));
        }

        let mut shares = BTreeMap::new();
        shares.insert(Slot::Hub, self.hub);
        shares.insert(Slot::Community, self.community);
        shares.insert(Slot::MerchantReferrer, self.merchant_referrer);
        shares.insert(Slot::Purchaser, self.purchaser);
        shares.insert(Slot::MerchantUpline, self.merchant_upline);
        shares.insert(Slot::Investor, self.investor);
        for (i, rate) in self.effective_unilevel_rates().into_iter().enumerate() {
            shares.insert(Slot::Unilevel((i + 1) as u8), rate);
        }

        if let Some(neg) = shares.values().find(|v| v.is_sign_negative() && !v.is_zero()) {
            return Err(PolicyError::NegativeShare(*neg));
        }

        let explicit: Decimal = shares.values().copied().sum();
        let nominal: Decimal = self.unilevel_rates.iter().copied().sum();
        let damping_remainder = nominal - nominal * self.unilevel_damping;
        let expected_platform = self.platform_base + damping_remainder;
        let platform = Decimal::ONE - explicit;

        if platform != expected_platform || platform.is_sign_negative() {
            return Err(PolicyError::Unbalanced {
                total: explicit + expected_platform,
            });
        }

        shares.insert(Slot::Platform, platform);
        Ok(shares)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        self.fractions().map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// DistributionPolicy
// ---------------------------------------------------------------------------

/// Stateless policy holding both schedules and the grant rounding scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPolicy {
    pub activation: ActivationSchedule,
    pub purchase: PurchaseSchedule,
    /// Decimal places kept on each purchase grant.
    pub grant_scale: u32,
}

impl Default for DistributionPolicy {
    fn default() -> Self {
        Self {
            activation: ActivationSchedule::default(),
            purchase: PurchaseSchedule::default(),
            grant_scale: 2,
        }
    }
}

impl DistributionPolicy {
    pub fn new(
        activation: ActivationSchedule,
        purchase: PurchaseSchedule,
        grant_scale: u32,
    ) -> Result<Self, PolicyError> {
        activation.validate()?;
        purchase.validate()?;
        Ok(Self {
            activation,
            purchase,
            grant_scale,
        })
    }

    /// Shares for an event of `amount`. Activation shares are flat and
    /// ignore the amount.
    pub fn compute_distribution(
        &self,
        event: EventKind,
        amount: Decimal,
    ) -> Result<BTreeMap<Slot, Share>, PolicyError> {
        match event {
            EventKind::Activation => {
                self.activation.validate()?;
                Ok(self
                    .activation
                    .awards()
                    .into_iter()
                    .map(|a| (a.slot, Share::Flat(a.points)))
                    .collect())
            }
            EventKind::Purchase => {
                if amount <= Decimal::ZERO {
                    return Err(PolicyError::NonPositivePool(amount));
                }
                Ok(self
                    .purchase
                    .fractions()?
                    .into_iter()
                    .map(|(slot, frac)| (slot, Share::Fraction(frac)))
                    .collect())
            }
        }
    }

    /// Concrete awards for an event. Purchase awards are rounded half-up
    /// to `grant_scale`; the platform slot takes the exact remainder.
    pub fn allocate(&self, event: EventKind, amount: Decimal) -> Result<Allocation, PolicyError> {
        let shares = self.compute_distribution(event, amount)?;

        let mut awards = Vec::with_capacity(shares.len());
        let mut distributed = Points::zero();
        for (slot, share) in &shares {
            let points = match share {
                Share::Flat(points) => *points,
                Share::Fraction(_) if *slot == Slot::Platform => continue,
                Share::Fraction(frac) => {
                    Points::from_decimal(amount * *frac).round_half_up(self.grant_scale)
                }
            };
            distributed += points;
            awards.push(Award { slot: *slot, points });
        }

        if event == EventKind::Purchase {
            awards.push(Award {
                slot: Slot::Platform,
                points: Points::from_decimal(amount) - distributed,
            });
        }

        Ok(Allocation { event, awards })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> DistributionPolicy {
        DistributionPolicy::default()
    }

    #[test]
    fn purchase_fractions_sum_to_one() {
        let fractions = PurchaseSchedule::default()
            .fractions()
            .expect("test: default schedule is balanced");
        let total: Decimal = fractions.values().copied().sum();
        assert_eq!(total, Decimal::ONE);
        assert_eq!(fractions[&Slot::Platform], dec!(0.34));
    }

    #[test]
    fn unilevel_rates_are_damped() {
        let rates = PurchaseSchedule::default().effective_unilevel_rates();
        assert_eq!(
            rates,
            vec![dec!(0.048), dec!(0.040), dec!(0.032), dec!(0.024), dec!(0.016)]
        );
    }

    #[test]
    fn activation_distribution_is_flat() {
        let low = policy()
            .compute_distribution(EventKind::Activation, dec!(150))
            .expect("test: activation shares");
        let high = policy()
            .compute_distribution(EventKind::Activation, dec!(175))
            .expect("test: activation shares");
        assert_eq!(low, high);
        assert_eq!(low[&Slot::Upline(1)], Share::Flat(Points::from(40)));
        assert_eq!(low[&Slot::Upline(2)], Share::Flat(Points::from(10)));
        assert_eq!(low[&Slot::Upline(3)], Share::Flat(Points::from(5)));
        assert_eq!(low[&Slot::Activator], Share::Flat(Points::from(25)));
    }

    #[test]
    fn activation_allocation_totals_eighty() {
        let alloc = policy()
            .allocate(EventKind::Activation, dec!(175))
            .expect("test: activation allocation");
        assert_eq!(alloc.total(), Points::from(80));
        assert_eq!(alloc.awards.len(), 4);
        assert_eq!(alloc.points_for(Slot::Platform), None);
    }

    #[test]
    fn purchase_allocation_of_round_pool() {
        let alloc = policy()
            .allocate(EventKind::Purchase, dec!(1000))
            .expect("test: purchase allocation");
        assert_eq!(alloc.points_for(Slot::Hub), Some(Points(dec!(50))));
        assert_eq!(alloc.points_for(Slot::MerchantReferrer), Some(Points(dec!(150))));
        assert_eq!(alloc.points_for(Slot::Purchaser), Some(Points(dec!(100))));
        assert_eq!(alloc.points_for(Slot::Unilevel(1)), Some(Points(dec!(48))));
        assert_eq!(alloc.points_for(Slot::Unilevel(5)), Some(Points(dec!(16))));
        assert_eq!(alloc.points_for(Slot::Platform), Some(Points(dec!(340))));
        assert_eq!(alloc.total(), Points(dec!(1000)));
    }

    #[test]
    fn rounding_remainder_goes_to_platform() {
        // 0.10 pool: ties at 0.005 round up, sub-cent unilevel shares round to zero.
        let alloc = policy()
            .allocate(EventKind::Purchase, dec!(0.10))
            .expect("test: tiny pool");
        assert_eq!(alloc.points_for(Slot::Investor), Some(Points(dec!(0.01))));
        assert_eq!(alloc.points_for(Slot::MerchantReferrer), Some(Points(dec!(0.02))));
        assert_eq!(alloc.points_for(Slot::Unilevel(1)), Some(Points(dec!(0.00))));
        assert_eq!(alloc.points_for(Slot::Platform), Some(Points(dec!(0.03))));
        assert_eq!(alloc.total(), Points(dec!(0.10)));
    }

    #[test]
    fn non_positive_pool_rejected() {
        let err = policy().allocate(EventKind::Purchase, Decimal::ZERO);
        assert!(
            matches!(err, Err(PolicyError::NonPositivePool(_))),
            "expected NonPositivePool, got {err:?}"
        );
    }

    #[test]
    fn overcommitted_schedule_rejected() {
        let schedule = PurchaseSchedule {
            hub: dec!(0.50),
            ..PurchaseSchedule::default()
        };
        assert!(matches!(schedule.fractions(), Err(PolicyError::Unbalanced { .. })));
    }

    #[test]
    fn custom_damping_must_move_platform_share() {
        // Changing damping alone shifts the remainder; platform_base stays put,
        // so the schedule still balances.
        let schedule = PurchaseSchedule {
            unilevel_damping: dec!(1.0),
            ..PurchaseSchedule::default()
        };
        let fractions = schedule.fractions().expect("test: undamped schedule");
        assert_eq!(fractions[&Slot::Unilevel(1)], dec!(0.06));
        assert_eq!(fractions[&Slot::Platform], dec!(0.30));
    }

    #[test]
    fn activation_depth_bounds() {
        let schedule = ActivationSchedule {
            level_points: vec![Points::from(1); 6],
            activator_points: Points::zero(),
        };
        assert_eq!(schedule.validate(), Err(PolicyError::InvalidDepth(6)));
    }

    #[test]
    fn coalesce_merges_repeated_receivers() {
        let alloc = policy()
            .allocate(EventKind::Activation, dec!(175))
            .expect("test: activation allocation");
        // Root sponsor B also performs the activation: L1 and activator
        // collapse into one grant, L2 and L3 both fall back to house.
        let receivers = ["b", "house", "house", "b"];
        let merged = coalesce(
            receivers
                .iter()
                .map(|r| MemberId::from(*r))
                .zip(alloc.awards.iter().copied()),
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].receiver, MemberId::from("b"));
        assert_eq!(merged[0].points, Points::from(65));
        assert_eq!(
            merged[0].title(),
            "Unilevel First Level Reward + Activator Reward"
        );
        assert_eq!(merged[1].points, Points::from(15));
    }

    #[test]
    fn coalesce_drops_zero_awards() {
        let merged = coalesce(vec![(
            MemberId::from("x"),
            Award {
                slot: Slot::Unilevel(5),
                points: Points::zero(),
            },
        )]);
        assert!(merged.is_empty());
    }

    proptest! {
        #[test]
        fn purchase_allocation_balances_exactly(cents in 1i64..1_000_000_000) {
            let pool = Decimal::new(cents, 2);
            let alloc = policy().allocate(EventKind::Purchase, pool).expect("test: allocation");
            prop_assert_eq!(alloc.total(), Points(pool));
            prop_assert!(alloc.awards.iter().all(|a| !a.points.is_negative()));
        }

        #[test]
        fn purchase_fractions_sum_to_one_for_any_damping(damping_pct in 0u32..=100) {
            let schedule = PurchaseSchedule {
                unilevel_damping: Decimal::new(damping_pct as i64, 2),
                ..PurchaseSchedule::default()
            };
            let fractions = schedule.fractions().expect("test: balanced");
            let total: Decimal = fractions.values().copied().sum();
            prop_assert_eq!(total, Decimal::ONE);
        }
    }
}
