// 7.0 config.rs: all settings in one place. ticks, thresholds, liquidation, oracle, limits.
// 7.1 each section has its own Default. validate() checks they agree with each other.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::health::HealthParams;
use crate::interest::InterestParams;
use crate::liquidation::{LiquidationMode, LiquidationParams};
use crate::types::{Bps, Quote, Units, DAY_MS};

// Price feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    // Quotes older than this are treated as unavailable
    pub max_staleness_ms: i64,
    // Quotes stamped further ahead of the ledger clock than this are rejected
    pub max_future_skew_ms: i64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_staleness_ms: 5 * 60 * 1000, // 5 minutes
            max_future_skew_ms: 5_000,
        }
    }
}

/** 7.2: request validation limits. anything outside these is rejected up front */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    // Smallest offer or borrow amount accepted
    pub min_principal: Quote,
    // Largest offer or borrow amount accepted
    pub max_principal: Quote,
    // Largest collateral deposit accepted in one request
    pub max_collateral: Units,
    // Longest loan term an offer may allow
    pub max_duration_days: u32,
    // Highest LTV an offer may set
    pub max_ltv: Bps,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_principal: Quote::new(dec!(1)),
            max_principal: Quote::new(dec!(1_000_000_000)),
            max_collateral: Units::new(dec!(1_000_000_000_000)),
            max_duration_days: 365,
            max_ltv: Bps::new(9000), // 90%
        }
    }
}

// The complete ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub interest: InterestParams,
    pub health: HealthParams,
    pub liquidation: LiquidationParams,
    pub oracle: OracleConfig,
    pub limits: LimitsConfig,
    // Optimistic commits retried this many times before giving up
    pub max_commit_attempts: u32,
    // Event log retention
    pub max_events: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            interest: InterestParams::default(),
            health: HealthParams::default(),
            liquidation: LiquidationParams::default(),
            oracle: OracleConfig::default(),
            limits: LimitsConfig::default(),
            max_commit_attempts: 8,
            max_events: 10_000,
        }
    }
}

impl LedgerConfig {
    // Testnet: short ticks so interest is visible quickly, loose limits
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.interest.tick_interval_ms = 60_000; // every minute
        config.limits.min_principal = Quote::new(dec!(0.01));
        config.oracle.max_staleness_ms = 60 * 60 * 1000; // 1 hour
        config
    }

    // Mainnet: a grace window before seizing, tighter LTV cap, fresher prices
    pub fn mainnet_conservative() -> Self {
        let mut config = Self::default();
        config.liquidation.grace_period_ms = 10 * 60 * 1000; // 10 minutes
        config.liquidation.mode = LiquidationMode::Partial;
        config.health.at_risk_threshold = dec!(1.25);
        config.limits.max_ltv = Bps::new(8000);
        config.limits.min_principal = Quote::new(dec!(10));
        config.oracle.max_staleness_ms = 60 * 1000;
        config
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        // tick checks
        // ticks must divide a day so boundaries line up across days
        let tick = self.interest.tick_interval_ms;
        if tick <= 0 || DAY_MS % tick != 0 {
            return Err(ConfigError::InvalidInterest {
                reason: format!("tick interval {tick}ms must be positive and divide a day"),
            });
        }
        if self.interest.max_apy <= Decimal::ZERO {
            return Err(ConfigError::InvalidInterest {
                reason: "max APY must be positive".to_string(),
            });
        }

        if self.health.at_risk_threshold < Decimal::ONE {
            return Err(ConfigError::InvalidHealth {
                reason: "at-risk threshold must be at least 1.0".to_string(),
            });
        }

        // liquidation checks
        if self.liquidation.penalty.value() > 2_000 {
            return Err(ConfigError::InvalidLiquidation {
                reason: "penalty above 20%".to_string(),
            });
        }
        if self.liquidation.grace_period_ms < 0 {
            return Err(ConfigError::InvalidLiquidation {
                reason: "grace period cannot be negative".to_string(),
            });
        }
        if self.liquidation.target_health <= Decimal::ONE {
            return Err(ConfigError::InvalidLiquidation {
                reason: "partial target health must exceed 1.0".to_string(),
            });
        }

        if self.oracle.max_staleness_ms <= 0 {
            return Err(ConfigError::InvalidOracle {
                reason: "max staleness must be positive".to_string(),
            });
        }
        if self.oracle.max_future_skew_ms < 0 {
            return Err(ConfigError::InvalidOracle {
                reason: "future skew cannot be negative".to_string(),
            });
        }

        // limit checks
        if !self.limits.min_principal.is_positive() {
            return Err(ConfigError::InvalidLimits {
                reason: "min principal must be positive".to_string(),
            });
        }
        if self.limits.max_principal < self.limits.min_principal {
            return Err(ConfigError::InvalidLimits {
                reason: "max principal below min principal".to_string(),
            });
        }
        if !self.limits.max_collateral.is_positive() {
            return Err(ConfigError::InvalidLimits {
                reason: "max collateral must be positive".to_string(),
            });
        }
        if self.limits.max_duration_days == 0 {
            return Err(ConfigError::InvalidLimits {
                reason: "max duration must be at least one day".to_string(),
            });
        }
        if self.limits.max_ltv.value() == 0 || self.limits.max_ltv.value() > Bps::MAX {
            return Err(ConfigError::InvalidLimits {
                reason: "max LTV must be in (0, 10000] bps".to_string(),
            });
        }

        if self.max_commit_attempts == 0 {
            return Err(ConfigError::InvalidLimits {
                reason: "need at least one commit attempt".to_string(),
            });
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid interest config: {reason}")]
    InvalidInterest { reason: String },
    #[error("Invalid health config: {reason}")]
    InvalidHealth { reason: String },
    #[error("Invalid liquidation config: {reason}")]
    InvalidLiquidation { reason: String },
    #[error("Invalid oracle config: {reason}")]
    InvalidOracle { reason: String },
    #[error("Invalid limits: {reason}")]
    InvalidLimits { reason: String },
    #[error("Config parse error: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> LedgerConfig {
        match self {
            Environment::Development => LedgerConfig::default(),
            Environment::Testnet => LedgerConfig::testnet(),
            Environment::Mainnet => LedgerConfig::mainnet_conservative(),
        }
    }
}
