// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Engine configuration.
//!
//! Loaded once by the process entry point (TOML file plus `UNILEVEL_*`
//! environment overrides) and passed explicitly into every constructor.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::distribution::{ActivationSchedule, DistributionPolicy, PurchaseSchedule};
use crate::error::{ConfigError, PolicyError};
use crate::types::{MemberId, Money};

const ENV_PREFIX: &str = "UNILEVEL_";

/// Platform ("mother wallet") account: fallback beneficiary and activation
/// fee destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseAccount {
    pub member_id: MemberId,
    pub external_account: String,
}

impl Default for HouseAccount {
    fn default() -> Self {
        Self {
            member_id: MemberId::from("house"),
            external_account: "motherwallet".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub fee: Money,
    pub currency: String,
    pub schedule: ActivationSchedule,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            fee: Money(dec!(175)),
            currency: "peso".to_string(),
            schedule: ActivationSchedule::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Upper bound on every external wallet call.
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub house: HouseAccount,
    pub activation: ActivationConfig,
    pub purchase: PurchaseSchedule,
    pub provider: ProviderConfig,
    /// Decimal places kept on purchase grants.
    pub grant_scale: u32,
    /// Cumulative ledger/balance error that trips the audit breaker.
    pub audit_threshold: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            house: HouseAccount::default(),
            activation: ActivationConfig::default(),
            purchase: PurchaseSchedule::default(),
            provider: ProviderConfig::default(),
            grant_scale: 2,
            audit_threshold: dec!(0.01),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, apply `UNILEVEL_*` environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let invalid = || ConfigError::Env {
                var: key.clone(),
                value: value.clone(),
            };
            match name {
                "HOUSE_ACCOUNT" => self.house.member_id = MemberId::from(value.as_str()),
                "HOUSE_EXTERNAL_ACCOUNT" => self.house.external_account = value.clone(),
                "ACTIVATION_FEE" => {
                    self.activation.fee = Money(value.parse::<Decimal>().map_err(|_| invalid())?)
                }
                "CURRENCY" => self.activation.currency = value.clone(),
                "PROVIDER_TIMEOUT_MS" => {
                    self.provider.timeout_ms = value.parse().map_err(|_| invalid())?
                }
                "AUDIT_THRESHOLD" => {
                    self.audit_threshold = value.parse().map_err(|_| invalid())?
                }
                _ => tracing::debug!(var = %key, "ignoring unknown config override"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.activation.schedule.validate()?;
        self.purchase.validate()?;
        if self.house.member_id.as_str().is_empty() {
            return Err(ConfigError::Invalid("house member id is empty".into()));
        }
        if self.activation.fee.0 <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "activation fee must be positive, got {}",
                self.activation.fee
            )));
        }
        if self.provider.timeout_ms == 0 {
            return Err(ConfigError::Invalid("provider timeout must be non-zero".into()));
        }
        if self.grant_scale > 8 {
            return Err(ConfigError::Invalid(format!(
                "grant scale {} exceeds 8 decimal places",
                self.grant_scale
            )));
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider.timeout_ms)
    }

    pub fn policy(&self) -> Result<DistributionPolicy, PolicyError> {
        DistributionPolicy::new(
            self.activation.schedule.clone(),
            self.purchase.clone(),
            self.grant_scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Points;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        config.validate().expect("test: defaults are valid");
        assert_eq!(config.activation.fee, Money(dec!(175)));
        assert_eq!(config.activation.schedule.total(), Points::from(80));
        assert_eq!(config.provider_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn toml_overrides_merge_with_defaults() {
        let raw = r#"
            grant_scale = 4

            [house]
            member_id = "platform"
            external_account = "tw-mother"

            [activation]
            fee = "150"
            currency = "peso"

            [provider]
            timeout_ms = 2500
        "#;
        let config = EngineConfig::from_toml_str(raw).expect("test: parse");
        assert_eq!(config.house.member_id, MemberId::from("platform"));
        assert_eq!(config.activation.fee, Money(dec!(150)));
        assert_eq!(config.grant_scale, 4);
        assert_eq!(config.provider.timeout_ms, 2500);
        // Untouched sections keep their defaults.
        assert_eq!(config.purchase, PurchaseSchedule::default());
        assert_eq!(config.activation.schedule, ActivationSchedule::default());
    }

    #[test]
    fn unbalanced_purchase_schedule_rejected() {
        let raw = r#"
            [purchase]
            hub = "0.40"
        "#;
        let err = EngineConfig::from_toml_str(raw);
        assert!(
            matches!(err, Err(ConfigError::Policy(PolicyError::Unbalanced { .. }))),
            "expected Unbalanced, got {err:?}"
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = EngineConfig::default();
        config
            .apply_env(vec![
                ("UNILEVEL_ACTIVATION_FEE".to_string(), "200".to_string()),
                ("UNILEVEL_PROVIDER_TIMEOUT_MS".to_string(), "500".to_string()),
                ("UNILEVEL_HOUSE_ACCOUNT".to_string(), "mother".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ])
            .expect("test: env overrides");
        assert_eq!(config.activation.fee, Money(dec!(200)));
        assert_eq!(config.provider.timeout_ms, 500);
        assert_eq!(config.house.member_id, MemberId::from("mother"));
    }

    #[test]
    fn bad_env_value_rejected() {
        let mut config = EngineConfig::default();
        let err = config.apply_env(vec![(
            "UNILEVEL_PROVIDER_TIMEOUT_MS".to_string(),
            "soon".to_string(),
        )]);
        assert!(matches!(err, Err(ConfigError::Env { .. })), "got {err:?}");
    }

    #[test]
    fn zero_fee_rejected() {
        let mut config = EngineConfig::default();
        config.activation.fee = Money::zero();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
