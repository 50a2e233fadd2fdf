// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! External wallet/payment provider.
//!
//! The provider is untrusted: a call can succeed at the transport level and
//! still report a non-success status, so every response goes through
//! [`require_reference`] or [`require_success`]. Every call is bounded by
//! [`bounded`]; a call that outlives its limit becomes
//! [`ProviderError::Timeout`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::types::{Money, ReferenceId};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Success,
    Pending,
    Failed,
    Rejected,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Pending => "PENDING",
            Self::Failed => "FAILED",
            Self::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub status: TransferStatus,
    pub reference_id: Option<ReferenceId>,
    /// Provider's free-form reason on non-success.
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationReceipt {
    pub status: TransferStatus,
    pub message: Option<String>,
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn get_balance(&self, account: &str) -> Result<Money, ProviderError>;

    async fn initiate_transfer(
        &self,
        from: &str,
        to: &str,
        amount: Money,
        currency: &str,
    ) -> Result<TransferReceipt, ProviderError>;

    async fn confirm_transfer(
        &self,
        reference: &ReferenceId,
        otp: &str,
    ) -> Result<ConfirmationReceipt, ProviderError>;
}

/// Await `call`, failing with `Timeout` once `limit` elapses.
pub async fn bounded<F, T>(operation: &'static str, limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            operation,
            after_ms: limit.as_millis() as u64,
        }),
    }
}

/// An initiated transfer must be accepted and carry a reference.
pub fn require_reference(receipt: TransferReceipt) -> Result<ReferenceId, ProviderError> {
    match receipt.status {
        TransferStatus::Success | TransferStatus::Pending => {
            receipt.reference_id.ok_or(ProviderError::MissingReference {
                operation: "initiate_transfer",
            })
        }
        status => Err(ProviderError::Rejected {
            operation: "initiate_transfer",
            status: status.as_str().to_string(),
        }),
    }
}

/// A confirmation counts only with an explicit success status.
pub fn require_success(receipt: &ConfirmationReceipt) -> Result<(), ProviderError> {
    if receipt.status == TransferStatus::Success {
        return Ok(());
    }
    Err(ProviderError::Rejected {
        operation: "confirm_transfer",
        status: receipt.status.as_str().to_string(),
    })
}

// ---------------------------------------------------------------------------
// SandboxProvider
// ---------------------------------------------------------------------------

/// Provider operation, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Balance,
    Initiate,
    Confirm,
}

/// One-shot fault consumed by the next call of its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxFault {
    /// Respond with a `FAILED` status.
    Reject(Operation),
    /// Accept the initiate call but omit the reference.
    MissingReference,
    /// Fail at the transport level.
    Transport(Operation),
    /// Never respond.
    Hang(Operation),
}

impl SandboxFault {
    fn operation(&self) -> Operation {
        match self {
            Self::Reject(op) | Self::Transport(op) | Self::Hang(op) => *op,
            Self::MissingReference => Operation::Initiate,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTransfer {
    from: String,
    to: String,
    amount: Money,
}

#[derive(Debug, Default)]
struct SandboxState {
    balances: HashMap<String, Money>,
    pending: HashMap<ReferenceId, PendingTransfer>,
    faults: VecDeque<SandboxFault>,
    next_reference: u64,
    completed: u64,
}

/// In-memory provider with OTP confirmation, latency and fault injection.
pub struct SandboxProvider {
    state: Mutex<SandboxState>,
    otp: String,
    latency: Duration,
}

impl SandboxProvider {
    pub fn new(otp: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(SandboxState::default()),
            otp: otp.into(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fund(&self, account: &str, amount: Money) {
        let mut state = self.state.lock();
        let balance = state.balances.entry(account.to_string()).or_default();
        *balance = *balance + amount;
    }

    pub fn balance_of(&self, account: &str) -> Money {
        self.state
            .lock()
            .balances
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    /// Queue a fault for the next call of its operation.
    pub fn inject(&self, fault: SandboxFault) {
        self.state.lock().faults.push_back(fault);
    }

    pub fn transfers_completed(&self) -> u64 {
        self.state.lock().completed
    }

    pub fn transfers_pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn take_fault(&self, operation: Operation) -> Option<SandboxFault> {
        let mut state = self.state.lock();
        match state.faults.front() {
            Some(fault) if fault.operation() == operation => state.faults.pop_front(),
            _ => None,
        }
    }

    /// Latency, then any transport-level fault queued for `operation`.
    /// Returns the fault when it shapes the response instead.
    async fn preamble(&self, operation: Operation) -> Result<Option<SandboxFault>, ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.take_fault(operation) {
            Some(SandboxFault::Hang(_)) => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            Some(SandboxFault::Transport(op)) => Err(ProviderError::Transport(format!(
                "sandbox connection reset during {op:?}"
            ))),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl WalletProvider for SandboxProvider {
    async fn get_balance(&self, account: &str) -> Result<Money, ProviderError> {
        self.preamble(Operation::Balance).await?;
        Ok(self.balance_of(account))
    }

    async fn initiate_transfer(
        &self,
        from: &str,
        to: &str,
        amount: Money,
        currency: &str,
    ) -> Result<TransferReceipt, ProviderError> {
        let fault = self.preamble(Operation::Initiate).await?;
        if matches!(fault, Some(SandboxFault::Reject(_))) {
            return Ok(TransferReceipt {
                status: TransferStatus::Failed,
                reference_id: None,
                message: Some("transfer declined".into()),
            });
        }

        let mut state = self.state.lock();
        let available = state.balances.get(from).copied().unwrap_or_default();
        if available < amount {
            return Ok(TransferReceipt {
                status: TransferStatus::Rejected,
                reference_id: None,
                message: Some(format!("insufficient {currency} balance")),
            });
        }

        state.next_reference += 1;
        let reference = ReferenceId::from(format!("TW-{:08}", state.next_reference));
        state.pending.insert(
            reference.clone(),
            PendingTransfer {
                from: from.to_string(),
                to: to.to_string(),
                amount,
            },
        );
        tracing::debug!(reference = %reference, from, to, amount = %amount, "sandbox transfer initiated");

        Ok(TransferReceipt {
            status: TransferStatus::Pending,
            reference_id: (fault != Some(SandboxFault::MissingReference)).then_some(reference),
            message: None,
        })
    }

    async fn confirm_transfer(
        &self,
        reference: &ReferenceId,
        otp: &str,
    ) -> Result<ConfirmationReceipt, ProviderError> {
        let fault = self.preamble(Operation::Confirm).await?;
        let mut state = self.state.lock();

        if matches!(fault, Some(SandboxFault::Reject(_))) {
            state.pending.remove(reference);
            return Ok(ConfirmationReceipt {
                status: TransferStatus::Failed,
                message: Some("transfer declined".into()),
            });
        }
        if otp != self.otp {
            return Ok(ConfirmationReceipt {
                status: TransferStatus::Rejected,
                message: Some("invalid otp".into()),
            });
        }
        let Some(transfer) = state.pending.remove(reference) else {
            return Ok(ConfirmationReceipt {
                status: TransferStatus::Failed,
                message: Some(format!("unknown transfer {reference}")),
            });
        };

        let source = state.balances.entry(transfer.from.clone()).or_default();
        if *source < transfer.amount {
            return Ok(ConfirmationReceipt {
                status: TransferStatus::Rejected,
                message: Some("insufficient balance at confirmation".into()),
            });
        }
        *source = *source - transfer.amount;
        let dest = state.balances.entry(transfer.to).or_default();
        *dest = *dest + transfer.amount;
        state.completed += 1;

        Ok(ConfirmationReceipt {
            status: TransferStatus::Success,
            message: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const OTP: &str = "123456";

    fn funded() -> SandboxProvider {
        let provider = SandboxProvider::new(OTP);
        provider.fund("alice", Money(dec!(500)));
        provider
    }

    #[tokio::test]
    async fn transfer_moves_funds_after_confirmation() {
        let provider = funded();
        let receipt = provider
            .initiate_transfer("alice", "mother", Money(dec!(175)), "peso")
            .await
            .expect("test: initiate");
        let reference = require_reference(receipt).expect("test: reference");
        assert_eq!(provider.balance_of("mother"), Money::zero());

        let confirmation = provider
            .confirm_transfer(&reference, OTP)
            .await
            .expect("test: confirm");
        require_success(&confirmation).expect("test: success");
        assert_eq!(provider.balance_of("alice"), Money(dec!(325)));
        assert_eq!(provider.balance_of("mother"), Money(dec!(175)));
        assert_eq!(provider.transfers_completed(), 1);
    }

    #[tokio::test]
    async fn wrong_otp_is_non_success_status() {
        let provider = funded();
        let receipt = provider
            .initiate_transfer("alice", "mother", Money(dec!(175)), "peso")
            .await
            .expect("test: initiate");
        let reference = require_reference(receipt).expect("test: reference");
        let confirmation = provider
            .confirm_transfer(&reference, "000000")
            .await
            .expect("test: transport ok");
        let err = require_success(&confirmation);
        assert!(
            matches!(err, Err(ProviderError::Rejected { ref status, .. }) if status == "REJECTED"),
            "got {err:?}"
        );
        assert_eq!(provider.balance_of("alice"), Money(dec!(500)));
    }

    #[tokio::test]
    async fn underfunded_initiate_is_rejected() {
        let provider = SandboxProvider::new(OTP);
        let receipt = provider
            .initiate_transfer("bob", "mother", Money(dec!(175)), "peso")
            .await
            .expect("test: transport ok");
        assert!(matches!(
            require_reference(receipt),
            Err(ProviderError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn missing_reference_is_detected() {
        let provider = funded();
        provider.inject(SandboxFault::MissingReference);
        let receipt = provider
            .initiate_transfer("alice", "mother", Money(dec!(175)), "peso")
            .await
            .expect("test: transport ok");
        assert_eq!(receipt.status, TransferStatus::Pending);
        assert_eq!(
            require_reference(receipt),
            Err(ProviderError::MissingReference {
                operation: "initiate_transfer"
            })
        );
    }

    #[tokio::test]
    async fn faults_target_their_operation_only() {
        let provider = funded();
        provider.inject(SandboxFault::Transport(Operation::Confirm));
        // Balance and initiate are unaffected by a confirm fault.
        assert_eq!(
            provider.get_balance("alice").await.expect("test: balance"),
            Money(dec!(500))
        );
        let receipt = provider
            .initiate_transfer("alice", "mother", Money(dec!(175)), "peso")
            .await
            .expect("test: initiate");
        let reference = require_reference(receipt).expect("test: reference");
        let err = provider.confirm_transfer(&reference, OTP).await;
        assert!(matches!(err, Err(ProviderError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        let provider = funded();
        provider.inject(SandboxFault::Hang(Operation::Balance));
        let err = bounded(
            "get_balance",
            Duration::from_millis(250),
            provider.get_balance("alice"),
        )
        .await;
        assert_eq!(
            err,
            Err(ProviderError::Timeout {
                operation: "get_balance",
                after_ms: 250
            })
        );
    }
}
