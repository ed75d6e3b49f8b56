// src/models.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Buy,
    Sell,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Buy => "BUY",
            TransactionKind::Sell => "SELL",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" | "Buy" | "buy" => Ok(TransactionKind::Buy),
            "SELL" | "Sell" | "sell" => Ok(TransactionKind::Sell),
            _ => Err(format!("'{}' is not a valid transaction kind", s)),
        }
    }
}

/// One ledger row. Rows are immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub instrument: String,
    pub price: Decimal,
    /// Cash invested; always zero on SELL rows.
    pub amount: Decimal,
    pub units: Decimal,
    pub kind: TransactionKind,
    /// Profit booked by a SELL; always zero on BUY rows.
    pub realized_profit: Decimal,
}

impl Transaction {
    pub fn is_sell(&self) -> bool {
        self.kind == TransactionKind::Sell
    }
}

/// Per-instrument aggregate derived from the ledger on every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub net_units: Decimal,
    pub invested: Decimal,
    pub booked_profit: Decimal,
    pub average_cost: Decimal,
}
