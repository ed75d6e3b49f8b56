//! PKP tracker: an append-only SIP ledger for exchange-traded funds with a
//! running average cost per instrument and threshold-based profit booking.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod prices;
