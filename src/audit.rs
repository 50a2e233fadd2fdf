// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Ledger conservation audit.
//!
//! Enforces the ledger/balance invariant of the reward engine:
//!
//! ```text
//! wallet.reward_points(member) = sum(grant.points where receiver == member)
//! ```
//!
//! The store checks every member touched by a commit before applying it. A
//! mismatching commit is rejected and its absolute error accumulated; once
//! the cumulative error exceeds the configured threshold the circuit breaker
//! trips and every further commit is refused until an operator resets it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConservationError;
use crate::types::{MemberId, Points};

/// Tracks cumulative conservation error and the circuit breaker state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAudit {
    cumulative_error: Decimal,
    circuit_breaker_threshold: Decimal,
    circuit_breaker_tripped: bool,
    checks: u64,
}

impl LedgerAudit {
    pub fn new(threshold: Decimal) -> Self {
        Self {
            cumulative_error: Decimal::ZERO,
            circuit_breaker_threshold: threshold,
            circuit_breaker_tripped: false,
            checks: 0,
        }
    }

    /// Refuse work while the breaker is tripped.
    pub fn ensure_open(&self) -> Result<(), ConservationError> {
        if self.circuit_breaker_tripped {
            return Err(ConservationError::CircuitBreakerTripped(self.cumulative_error));
        }
        Ok(())
    }

    /// Verify one member's prospective balance against its ledger total.
    /// Decimal arithmetic is exact, so there is no per-check tolerance.
    pub fn verify_member(
        &mut self,
        member: &MemberId,
        balance: Points,
        ledger_total: Points,
    ) -> Result<(), ConservationError> {
        self.ensure_open()?;
        self.checks += 1;

        let error = (balance.0 - ledger_total.0).abs();
        if error.is_zero() {
            return Ok(());
        }

        self.cumulative_error += error;
        tracing::error!(
            member = %member,
            balance = %balance.0,
            ledger_total = %ledger_total.0,
            cumulative = %self.cumulative_error,
            "ledger/balance mismatch"
        );

        if self.cumulative_error > self.circuit_breaker_threshold {
            self.circuit_breaker_tripped = true;
            return Err(ConservationError::CircuitBreakerTripped(self.cumulative_error));
        }

        Err(ConservationError::BalanceMismatch {
            member: member.clone(),
            balance: balance.0,
            ledger_total: ledger_total.0,
        })
    }

    pub fn is_circuit_breaker_tripped(&self) -> bool {
        self.circuit_breaker_tripped
    }

    pub fn cumulative_error(&self) -> Decimal {
        self.cumulative_error
    }

    pub fn checks(&self) -> u64 {
        self.checks
    }

    /// Operator reset after investigation clears the breaker and error.
    pub fn reset_circuit_breaker(&mut self) {
        tracing::warn!(cumulative = %self.cumulative_error, "audit circuit breaker reset");
        self.circuit_breaker_tripped = false;
        self.cumulative_error = Decimal::ZERO;
    }
}

/// Result of a full-store scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub members_checked: usize,
    pub total_points: Points,
    pub total_granted: Points,
    pub mismatches: Vec<Mismatch>,
}

impl AuditReport {
    pub fn is_balanced(&self) -> bool {
        self.mismatches.is_empty() && self.total_points == self.total_granted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mismatch {
    pub member: MemberId,
    pub balance: Points,
    pub ledger_total: Points,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn member() -> MemberId {
        MemberId::from("m-1")
    }

    #[test]
    fn balanced_member_passes() {
        let mut audit = LedgerAudit::new(dec!(0.01));
        let result = audit.verify_member(&member(), Points::from(80), Points::from(80));
        assert!(result.is_ok(), "balanced member should pass");
        assert_eq!(audit.checks(), 1);
    }

    #[test]
    fn small_mismatch_rejected_without_tripping() {
        let mut audit = LedgerAudit::new(dec!(100));
        let err = audit
            .verify_member(&member(), Points::from(45), Points::from(40))
            .expect_err("test: should be BalanceMismatch");
        assert!(
            matches!(err, ConservationError::BalanceMismatch { .. }),
            "expected BalanceMismatch, got: {err}"
        );
        assert!(!audit.is_circuit_breaker_tripped());
        assert_eq!(audit.cumulative_error(), dec!(5));
    }

    #[test]
    fn breaker_trips_and_blocks() {
        let mut audit = LedgerAudit::new(dec!(0.01));
        let _ = audit.verify_member(&member(), Points::from(41), Points::from(40));
        assert!(audit.is_circuit_breaker_tripped());

        let result = audit.verify_member(&member(), Points::from(40), Points::from(40));
        assert!(
            matches!(result, Err(ConservationError::CircuitBreakerTripped(_))),
            "tripped breaker should block balanced checks, got {result:?}"
        );
    }

    #[test]
    fn reset_reopens_breaker() {
        let mut audit = LedgerAudit::new(dec!(0.01));
        let _ = audit.verify_member(&member(), Points::from(41), Points::from(40));
        audit.reset_circuit_breaker();
        assert!(!audit.is_circuit_breaker_tripped());
        assert_eq!(audit.cumulative_error(), Decimal::ZERO);
        assert!(audit.ensure_open().is_ok());
    }
}
