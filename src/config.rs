// src/config.rs
use crate::error::{LedgerError, Result};
use crate::ledger::{CostBasis, LedgerPolicy, UnitPolicy, DEFAULT_BOOKING_THRESHOLD};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Scylla,
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub node: String,
    pub keyspace: String,
    pub sheet: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub store: StoreConfig,
    pub policy: LedgerPolicy,
    pub alpha_vantage_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let bind = get("PKP_BIND_ADDR", "127.0.0.1:3030");
        let bind_addr = SocketAddr::from_str(&bind).map_err(|e| {
            LedgerError::Config(format!("PKP_BIND_ADDR '{}' is not an address: {}", bind, e))
        })?;

        let backend = match get("PKP_STORE", "scylla").as_str() {
            "scylla" => StoreBackend::Scylla,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(LedgerError::Config(format!(
                    "PKP_STORE must be 'scylla' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let units = match get("PKP_UNIT_POLICY", "whole").as_str() {
            "whole" => UnitPolicy::WholeUnits,
            "fractional" => UnitPolicy::Fractional,
            other => {
                return Err(LedgerError::Config(format!(
                    "PKP_UNIT_POLICY must be 'whole' or 'fractional', got '{}'",
                    other
                )))
            }
        };

        let cost_basis = match get("PKP_COST_BASIS", "gross").as_str() {
            "gross" => CostBasis::GrossInvested,
            "net" => CostBasis::NetOfBookedProfit,
            other => {
                return Err(LedgerError::Config(format!(
                    "PKP_COST_BASIS must be 'gross' or 'net', got '{}'",
                    other
                )))
            }
        };

        let threshold = get(
            "PKP_BOOKING_THRESHOLD",
            &DEFAULT_BOOKING_THRESHOLD.to_string(),
        );
        let booking_threshold = Decimal::from_str(&threshold).map_err(|e| {
            LedgerError::Config(format!(
                "PKP_BOOKING_THRESHOLD '{}' is not a decimal: {}",
                threshold, e
            ))
        })?;

        let config = Config {
            bind_addr,
            store: StoreConfig {
                backend,
                node: get("PKP_SCYLLA_NODE", "127.0.0.1:9042"),
                keyspace: get("PKP_KEYSPACE", "pkp_tracker"),
                sheet: get("PKP_SHEET", "PKP_Tracker"),
            },
            policy: LedgerPolicy {
                units,
                cost_basis,
                booking_threshold,
            },
            alpha_vantage_api_key: lookup("ALPHA_VANTAGE_API_KEY")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        };
        validate_config(&config)?;
        Ok(config)
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.policy.booking_threshold <= Decimal::ZERO {
        return Err(LedgerError::Config(format!(
            "Booking threshold must be positive, got {}",
            config.policy.booking_threshold
        )));
    }

    // The keyspace is spliced into CQL text, so keep it to identifier characters.
    let keyspace = &config.store.keyspace;
    if !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || keyspace.starts_with(|c: char| c.is_ascii_digit())
    {
        return Err(LedgerError::Config(format!(
            "Keyspace '{}' must be an identifier",
            keyspace
        )));
    }

    Ok(())
}
