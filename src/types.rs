// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Domain types shared by the reward engine.
//!
//! Identifiers are string newtypes so they can key JSON maps in snapshots.
//! Reward points and currency amounts are both backed by
//! `rust_decimal::Decimal`; nothing in the money path touches `f64`.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self { $name(s) }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self { $name(s.to_string()) }
        }
    };
}

string_id!(
    /// Internal member identifier.
    MemberId
);
string_id!(
    /// Internal merchant identifier.
    MerchantId
);
string_id!(
    /// External reference for a triggering event (provider transaction id
    /// for activations, purchase reference for merchant purchases).
    ReferenceId
);

impl MemberId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl MerchantId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Reward grant identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantId(pub Uuid);

impl GrantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Points
// ---------------------------------------------------------------------------

/// Reward-point amount backed by `rust_decimal::Decimal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Points(pub Decimal);

impl Points {
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn from_decimal(d: Decimal) -> Self {
        Self(d)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Round half-up (away from zero on ties) to `scale` decimal places.
    pub fn round_half_up(self, scale: u32) -> Self {
        Self(self.0.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero))
    }
}

impl From<i64> for Points {
    fn from(n: i64) -> Self {
        Self(Decimal::from(n))
    }
}

impl Add for Points {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Points {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Points {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Points {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Sum for Points {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Points::zero(), |acc, p| acc + p)
    }
}

impl<'a> Sum<&'a Points> for Points {
    fn sum<I: Iterator<Item = &'a Points>>(iter: I) -> Self {
        iter.fold(Points::zero(), |acc, p| acc + *p)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pts", self.0)
    }
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Currency amount. The currency code travels separately (see config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub Decimal);

impl Money {
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn from_decimal(d: Decimal) -> Self {
        Self(d)
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ActorRole
// ---------------------------------------------------------------------------

/// Account role, parsed once from the session's role string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Member,
    Merchant,
    Leader,
    Hub,
    Investor,
    CustomerSupport,
    Admin,
}

/// Which members an actor of a given role may activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationScope {
    /// Any non-activated member.
    Any,
    /// Only members the actor directly sponsors.
    DirectReferrals,
    /// Not permitted to activate.
    None,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "MEMBER",
            Self::Merchant => "MERCHANT",
            Self::Leader => "LEADER",
            Self::Hub => "HUB",
            Self::Investor => "INVESTOR",
            Self::CustomerSupport => "CUSTOMER_SUPPORT",
            Self::Admin => "ADMIN",
        }
    }

    pub fn activation_scope(&self) -> ActivationScope {
        match self {
            Self::Leader | Self::CustomerSupport | Self::Admin => ActivationScope::Any,
            Self::Member => ActivationScope::DirectReferrals,
            Self::Merchant | Self::Hub | Self::Investor => ActivationScope::None,
        }
    }
}

impl FromStr for ActorRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(|c: char| c == ' ' || c == '-', "_");
        match normalized.as_str() {
            "MEMBER" => Ok(Self::Member),
            "MERCHANT" => Ok(Self::Merchant),
            "LEADER" => Ok(Self::Leader),
            "HUB" => Ok(Self::Hub),
            "INVESTOR" => Ok(Self::Investor),
            "CUSTOMER_SUPPORT" => Ok(Self::CustomerSupport),
            "ADMIN" | "SUPERADMIN" => Ok(Self::Admin),
            _ => Err(ValidationError::UnknownRole(s.to_string())),
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event / status enums
// ---------------------------------------------------------------------------

/// Economic event that triggers a reward distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Activation,
    Purchase,
}

impl EventKind {
    /// Source-type tag stored on every grant.
    pub fn source_type(&self) -> &'static str {
        match self {
            Self::Activation => "Member Activation",
            Self::Purchase => "Merchant Purchase",
        }
    }
}

/// Activation record lifecycle.
///
/// Born at `Pending`; `Completed`, `Failed` and `Refunded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl ActivationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn can_transition_to(&self, next: ActivationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed) | (Self::Pending, Self::Failed)
        )
    }
}

/// Grant status, mirrored from the triggering transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantStatus {
    Completed,
    Pending,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Member as seen by the reward engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub referral_code: String,
    pub sponsor: Option<MemberId>,
    pub is_activated: bool,
    pub role: ActorRole,
    /// Account id at the external wallet provider.
    pub external_account_id: String,
    pub created_at: DateTime<Utc>,
}

/// Merchant with the member who referred it onto the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merchant {
    pub id: MerchantId,
    pub owner: MemberId,
    pub referred_by: MemberId,
    pub business_name: String,
    pub created_at: DateTime<Utc>,
}

/// One activation attempt for a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub id: Uuid,
    pub member_id: MemberId,
    pub amount: Money,
    pub currency: String,
    pub status: ActivationStatus,
    pub reference_id: Option<ReferenceId>,
    pub activated_by: MemberId,
    pub activated_by_role: ActorRole,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only reward ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardGrant {
    pub id: GrantId,
    pub source_type: EventKind,
    pub points: Points,
    /// Member whose event produced the reward.
    pub giver: MemberId,
    pub receiver: MemberId,
    pub title: String,
    pub description: String,
    pub status: GrantStatus,
    pub reference_id: ReferenceId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-member balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub member_id: MemberId,
    pub currency_balance: Money,
    pub reward_points: Points,
    pub updated_at: DateTime<Utc>,
}

impl WalletBalance {
    pub fn empty(member_id: MemberId) -> Self {
        Self {
            member_id,
            currency_balance: Money::zero(),
            reward_points: Points::zero(),
            updated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
