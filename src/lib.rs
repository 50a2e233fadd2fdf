// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Unilevel reward engine.
//!
//! Referral forest, reward ledger, wallets and the activation and purchase
//! workflows that split an economic event across a member's upline.

pub mod types;
pub mod error;
pub mod config;
pub mod store;
pub mod referral_graph;
pub mod distribution;
pub mod ledger;
pub mod wallet;
pub mod audit;
pub mod provider;
pub mod auth;
pub mod activation;
pub mod purchase;

pub use types::*;
pub use activation::{ActivationReceipt, ActivationRequest, ActivationState, ActivationWorkflow};
pub use auth::{Actor, Authorizer, RoleAuthorizer};
pub use config::{EngineConfig, HouseAccount};
pub use distribution::{DistributionPolicy, Slot};
pub use error::{ActivationError, ErrorKind, PurchaseError};
pub use ledger::RewardLedger;
pub use provider::{SandboxProvider, WalletProvider};
pub use purchase::{NewMerchant, PurchaseEvent, PurchaseReceipt, PurchaseWorkflow};
pub use referral_graph::{MemberDirectory, NewMember, ReferralGraph};
pub use store::Store;
pub use wallet::WalletAccount;
