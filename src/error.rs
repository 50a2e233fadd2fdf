// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Error taxonomy.
//!
//! Each component raises its own error enum. Only the workflows
//! (`activation`, `purchase`) translate component errors into a rollback and
//! a caller-facing [`ErrorKind`].

use rust_decimal::Decimal;

use crate::types::{ActivationStatus, ActorRole, MemberId, MerchantId, Money, Points, ReferenceId};

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Caller-facing classification of a workflow failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; 4xx-equivalent, not retried.
    Validation,
    /// Expected business-rule rejection.
    BusinessRule,
    /// External dependency failure; retryable.
    Dependency,
    /// Data-integrity failure; fatal to the request, needs an operator.
    Integrity,
}

// ---------------------------------------------------------------------------
// Component errors
// ---------------------------------------------------------------------------

/// Bad input from the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("unknown referral code: {0}")]
    UnknownReferralCode(String),

    #[error("unknown actor: {0}")]
    UnknownActor(MemberId),

    #[error("unknown member: {0}")]
    UnknownMember(MemberId),

    #[error("unknown merchant: {0}")]
    UnknownMerchant(MerchantId),

    #[error("member {0} already exists")]
    DuplicateMember(MemberId),

    #[error("referral code {0} already in use")]
    DuplicateReferralCode(String),

    #[error("merchant {0} already registered")]
    DuplicateMerchant(MerchantId),

    #[error("member {0} cannot sponsor itself")]
    SelfReferral(MemberId),

    #[error("sponsoring {member} under {sponsor} would create a cycle")]
    ReferralCycle { member: MemberId, sponsor: MemberId },

    #[error("{actor} ({role}) is not authorized to activate {target}")]
    Unauthorized {
        actor: MemberId,
        role: ActorRole,
        target: MemberId,
    },

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
}

/// Referral-graph integrity failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("unknown member: {0}")]
    UnknownMember(MemberId),

    #[error("sponsor {sponsor} of {member} does not exist")]
    DanglingSponsor { member: MemberId, sponsor: MemberId },

    #[error("referral cycle detected walking from {start} (revisited {revisited})")]
    CycleDetected { start: MemberId, revisited: MemberId },

    #[error("requested depth {requested} exceeds limit {limit}")]
    DepthLimit { requested: usize, limit: usize },
}

/// Distribution schedule problems.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("schedule fractions sum to {total}, expected exactly 1")]
    Unbalanced { total: Decimal },

    #[error("schedule has a negative share: {0}")]
    NegativeShare(Decimal),

    #[error("schedule depth {0} is outside 1..=5")]
    InvalidDepth(usize),

    #[error("reward pool must be positive, got {0}")]
    NonPositivePool(Decimal),
}

/// Reward-ledger rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("grant for ({reference_id}, {receiver}) already recorded")]
    DuplicateGrant {
        reference_id: ReferenceId,
        receiver: MemberId,
    },

    #[error("unknown grant receiver: {0}")]
    UnknownReceiver(MemberId),

    #[error("grant amount must not be negative: {0}")]
    NegativeGrant(Points),
}

/// Wallet balance failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("insufficient funds for {member}: available {available}, requested {requested}")]
    InsufficientFunds {
        member: MemberId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("no wallet for member {0}")]
    UnknownWallet(MemberId),
}

/// Failures of the external wallet/payment provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: &'static str, after_ms: u64 },

    #[error("{operation} returned non-success status {status:?}")]
    Rejected { operation: &'static str, status: String },

    #[error("{operation} response carried no transfer reference")]
    MissingReference { operation: &'static str },

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Conservation violations caught by the ledger audit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConservationError {
    #[error("circuit breaker tripped, distributions halted (cumulative error: {0})")]
    CircuitBreakerTripped(Decimal),

    #[error("balance mismatch for {member}: wallet {balance}, ledger {ledger_total}")]
    BalanceMismatch {
        member: MemberId,
        balance: Decimal,
        ledger_total: Decimal,
    },
}

/// Store-level failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Conservation(#[from] ConservationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("member {0} is already activated or has an activation in flight")]
    AlreadyActivated(MemberId),

    #[error("no activation record for {0}")]
    MissingActivation(MemberId),

    #[error("illegal activation transition {from:?} -> {to:?} for {member}")]
    IllegalTransition {
        member: MemberId,
        from: ActivationStatus,
        to: ActivationStatus,
    },

    #[error("unknown member: {0}")]
    UnknownMember(MemberId),

    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: String, value: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Workflow errors
// ---------------------------------------------------------------------------

/// Outcome of a failed activation. Every variant leaves the member
/// non-activated and all balances untouched.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("member {0} is already activated")]
    AlreadyActivated(MemberId),

    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Money, required: Money },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("transfer provider failure: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Conservation(#[from] ConservationError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ActivationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyActivated(member) => Self::AlreadyActivated(member),
            StoreError::Ledger(e) => Self::Ledger(e),
            StoreError::Wallet(e) => Self::Wallet(e),
            StoreError::Conservation(e) => Self::Conservation(e),
            StoreError::Validation(e) => Self::Validation(e),
            StoreError::UnknownMember(m) => Self::Graph(GraphError::UnknownMember(m)),
            other => Self::Store(other),
        }
    }
}

impl ActivationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::AlreadyActivated(_)
            | Self::InsufficientFunds { .. }
            | Self::Ledger(LedgerError::DuplicateGrant { .. })
            | Self::Wallet(WalletError::InsufficientFunds { .. }) => ErrorKind::BusinessRule,
            Self::Provider(_) => ErrorKind::Dependency,
            _ => ErrorKind::Integrity,
        }
    }

    /// Whether the caller may safely retry the same activation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientFunds { .. } | Self::Provider(_))
    }
}

/// Outcome of a failed purchase distribution.
#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Conservation(#[from] ConservationError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PurchaseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Ledger(e) => Self::Ledger(e),
            StoreError::Conservation(e) => Self::Conservation(e),
            StoreError::Validation(e) => Self::Validation(e),
            StoreError::UnknownMember(m) => Self::Graph(GraphError::UnknownMember(m)),
            other => Self::Store(other),
        }
    }
}

impl PurchaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Policy(PolicyError::NonPositivePool(_)) => {
                ErrorKind::Validation
            }
            Self::Ledger(LedgerError::DuplicateGrant { .. }) => ErrorKind::BusinessRule,
            _ => ErrorKind::Integrity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn store_already_activated_maps_to_business_rule() {
        let err = ActivationError::from(StoreError::AlreadyActivated(MemberId::from("a")));
        assert!(matches!(err, ActivationError::AlreadyActivated(_)));
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert!(!err.is_retryable());
    }

    #[test]
    fn provider_failures_are_retryable() {
        let err = ActivationError::from(ProviderError::Timeout {
            operation: "confirm_transfer",
            after_ms: 10,
        });
        assert_eq!(err.kind(), ErrorKind::Dependency);
        assert!(err.is_retryable());
    }

    #[test]
    fn insufficient_funds_is_retryable_business_rule() {
        let err = ActivationError::InsufficientFunds {
            available: Money(dec!(10)),
            required: Money(dec!(175)),
        };
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert!(err.is_retryable());
    }

    #[test]
    fn graph_errors_are_integrity_failures() {
        let err = ActivationError::from(GraphError::UnknownMember(MemberId::from("ghost")));
        assert_eq!(err.kind(), ErrorKind::Integrity);
        let err = PurchaseError::from(GraphError::UnknownMember(MemberId::from("ghost")));
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }
}
