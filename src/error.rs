// src/error.rs
use thiserror::Error;
use warp::reject::Reject;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),

    /// Recoverable: the caller should ask the operator for a manual price.
    #[error("Price lookup failed for {instrument}: {reason}")]
    PriceLookupFailed { instrument: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        LedgerError::InvalidInput(message.into())
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        LedgerError::StoreUnavailable(err.to_string())
    }
}

impl Reject for LedgerError {}
