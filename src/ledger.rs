// src/ledger.rs
//! Ledger accounting: BUY rows, the PKP average cost and profit booking.
//!
//! Aggregates are never stored. Every query recomputes them from the full row
//! set returned by the store, so the ledger stays the single source of truth.

use crate::db::LedgerStore;
use crate::error::{LedgerError, Result};
use crate::models::{Position, Transaction, TransactionKind};
use chrono::NaiveDate;
use log::info;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_BOOKING_THRESHOLD: Decimal = dec!(5000);

const AVERAGE_COST_DP: u32 = 8;
const MONEY_DP: u32 = 2;

/// How a purchase amount is converted into units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPolicy {
    /// `units = amount / price`, kept exact.
    Fractional,
    /// Units are floored and the invested amount shrinks to `units * price`.
    WholeUnits,
}

/// Which cost the PKP average divides by the units still held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostBasis {
    /// Invested amount minus profit already booked.
    NetOfBookedProfit,
    /// Invested amount only.
    GrossInvested,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerPolicy {
    pub units: UnitPolicy,
    pub cost_basis: CostBasis,
    pub booking_threshold: Decimal,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            units: UnitPolicy::WholeUnits,
            cost_basis: CostBasis::GrossInvested,
            booking_threshold: DEFAULT_BOOKING_THRESHOLD,
        }
    }
}

/// Mark-to-market figures for one instrument at a given LTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub instrument: String,
    pub ltp: Decimal,
    pub held_units: Decimal,
    pub total_cost: Decimal,
    pub market_value: Decimal,
    pub profit: Decimal,
}

/// A triggered booking waiting for the operator to commit or decline it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingProposal {
    pub date: NaiveDate,
    pub valuation: Valuation,
    pub units_to_sell: Decimal,
    pub estimated_profit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BookingEvaluation {
    NoTrigger { valuation: Valuation, threshold: Decimal },
    Triggered { proposal: BookingProposal },
}

impl BookingEvaluation {
    pub fn proposal(&self) -> Option<&BookingProposal> {
        match self {
            BookingEvaluation::Triggered { proposal } => Some(proposal),
            BookingEvaluation::NoTrigger { .. } => None,
        }
    }
}

/// Result of a booking attempt; `(0, 0)` when nothing was booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingOutcome {
    pub realized_profit: Decimal,
    pub units_sold: Decimal,
}

impl BookingOutcome {
    pub fn none() -> Self {
        Self {
            realized_profit: Decimal::ZERO,
            units_sold: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    bought_units: Decimal,
    sold_units: Decimal,
    invested: Decimal,
    booked_profit: Decimal,
}

impl Totals {
    fn net_units(&self) -> Decimal {
        self.bought_units - self.sold_units
    }

    fn net_cost(&self, basis: CostBasis) -> Decimal {
        match basis {
            CostBasis::NetOfBookedProfit => self.invested - self.booked_profit,
            CostBasis::GrossInvested => self.invested,
        }
    }
}

fn totals(rows: &[Transaction], instrument: &str) -> Totals {
    rows.iter()
        .filter(|row| row.instrument == instrument)
        .fold(Totals::default(), |mut t, row| {
            match row.kind {
                TransactionKind::Buy => {
                    t.bought_units += row.units;
                    t.invested += row.amount;
                }
                TransactionKind::Sell => {
                    t.sold_units += row.units;
                    t.booked_profit += row.realized_profit;
                }
            }
            t
        })
}

fn normalize_instrument(instrument: &str) -> Result<String> {
    let trimmed = instrument.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::invalid("instrument must not be blank"));
    }
    Ok(trimmed.to_string())
}

/// Builds the BUY row for a purchase without touching any store.
pub fn buy_transaction(
    date: NaiveDate,
    instrument: &str,
    price: Decimal,
    amount: Decimal,
    policy: UnitPolicy,
) -> Result<Transaction> {
    let instrument = normalize_instrument(instrument)?;
    if price <= Decimal::ZERO {
        return Err(LedgerError::invalid(format!(
            "price must be positive, got {}",
            price
        )));
    }
    if amount <= Decimal::ZERO {
        return Err(LedgerError::invalid(format!(
            "amount must be positive, got {}",
            amount
        )));
    }

    let exact = amount
        .checked_div(price)
        .ok_or_else(|| LedgerError::invalid("amount / price is out of range"))?;
    let (units, amount) = match policy {
        UnitPolicy::Fractional => (exact, amount),
        UnitPolicy::WholeUnits => {
            let whole = exact.floor();
            if whole.is_zero() {
                return Err(LedgerError::invalid(format!(
                    "amount {} buys no whole units at price {}",
                    amount, price
                )));
            }
            let adjusted = whole
                .checked_mul(price)
                .ok_or_else(|| LedgerError::invalid("units * price is out of range"))?;
            (whole, adjusted)
        }
    };

    Ok(Transaction {
        date,
        instrument,
        price,
        amount,
        units,
        kind: TransactionKind::Buy,
        realized_profit: Decimal::ZERO,
    })
}

/// PKP average for `instrument`: net cost over net units, zero when nothing is held.
pub fn average_cost(rows: &[Transaction], instrument: &str, basis: CostBasis) -> Decimal {
    let t = totals(rows, instrument.trim());
    let net_units = t.net_units();
    if net_units.is_zero() {
        return Decimal::ZERO;
    }
    t.net_cost(basis)
        .checked_div(net_units)
        .map(|cost| cost.round_dp(AVERAGE_COST_DP))
        .unwrap_or(Decimal::ZERO)
}

pub fn position(rows: &[Transaction], instrument: &str, basis: CostBasis) -> Position {
    let instrument = instrument.trim();
    let t = totals(rows, instrument);
    Position {
        instrument: instrument.to_string(),
        net_units: t.net_units(),
        invested: t.invested,
        booked_profit: t.booked_profit,
        average_cost: average_cost(rows, instrument, basis),
    }
}

/// One position per instrument, in order of first appearance in the ledger.
pub fn positions(rows: &[Transaction], basis: CostBasis) -> Vec<Position> {
    let mut seen: Vec<&str> = Vec::new();
    for row in rows {
        if !seen.contains(&row.instrument.as_str()) {
            seen.push(&row.instrument);
        }
    }
    seen.into_iter()
        .map(|instrument| position(rows, instrument, basis))
        .collect()
}

/// Values the holding at `ltp` and proposes a sale once profit reaches the threshold.
pub fn evaluate_profit_booking(
    rows: &[Transaction],
    date: NaiveDate,
    instrument: &str,
    ltp: Decimal,
    policy: &LedgerPolicy,
) -> Result<BookingEvaluation> {
    let instrument = normalize_instrument(instrument)?;
    if ltp <= Decimal::ZERO {
        return Err(LedgerError::invalid(format!(
            "last traded price must be positive, got {}",
            ltp
        )));
    }

    let t = totals(rows, &instrument);
    let held_units = t.net_units();
    let total_cost = t.invested;
    let market_value = held_units
        .checked_mul(ltp)
        .ok_or_else(|| LedgerError::invalid("market value is out of range"))?;
    let profit = market_value - total_cost;
    let valuation = Valuation {
        instrument,
        ltp,
        held_units,
        total_cost,
        market_value,
        profit,
    };

    if profit < policy.booking_threshold {
        return Ok(BookingEvaluation::NoTrigger {
            valuation,
            threshold: policy.booking_threshold,
        });
    }

    let exact = profit
        .checked_div(ltp)
        .ok_or_else(|| LedgerError::invalid("profit / ltp is out of range"))?;
    let units_to_sell = match policy.units {
        UnitPolicy::Fractional => exact,
        UnitPolicy::WholeUnits => exact.floor(),
    };
    // Profit worth less than one whole unit leaves nothing to sell.
    if units_to_sell.is_zero() {
        return Ok(BookingEvaluation::NoTrigger {
            valuation,
            threshold: policy.booking_threshold,
        });
    }
    let estimated_profit = (units_to_sell * ltp).round_dp(MONEY_DP);

    Ok(BookingEvaluation::Triggered {
        proposal: BookingProposal {
            date,
            valuation,
            units_to_sell,
            estimated_profit,
        },
    })
}

/// Ledger accounting over an injected store.
///
/// Mutations hold `write_lock` across their read-then-append cycle so one
/// process never interleaves two of them.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    policy: LedgerPolicy,
    write_lock: Mutex<()>,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>, policy: LedgerPolicy) -> Self {
        Self {
            store,
            policy,
            write_lock: Mutex::new(()),
        }
    }

    pub fn preview_buy(
        &self,
        date: NaiveDate,
        instrument: &str,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Transaction> {
        buy_transaction(date, instrument, price, amount, self.policy.units)
    }

    pub async fn append_buy(
        &self,
        date: NaiveDate,
        instrument: &str,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Transaction> {
        let row = self.preview_buy(date, instrument, price, amount)?;
        let _guard = self.write_lock.lock().await;
        self.store.append_row(&row).await?;
        info!(
            "Recorded BUY of {} {} at {} for {}",
            row.units, row.instrument, row.price, row.amount
        );
        Ok(row)
    }

    pub async fn average_cost(&self, instrument: &str) -> Result<Decimal> {
        let rows = self.store.read_all_rows().await?;
        Ok(average_cost(&rows, instrument, self.policy.cost_basis))
    }

    pub async fn position(&self, instrument: &str) -> Result<Position> {
        let rows = self.store.read_all_rows().await?;
        Ok(position(&rows, instrument, self.policy.cost_basis))
    }

    /// All rows with their positions, taken from a single read of the store.
    pub async fn ledger_view(&self) -> Result<(Vec<Transaction>, Vec<Position>)> {
        let rows = self.store.read_all_rows().await?;
        let positions = positions(&rows, self.policy.cost_basis);
        Ok((rows, positions))
    }

    /// Estimate only; never writes to the ledger.
    pub async fn evaluate_profit_booking(
        &self,
        date: NaiveDate,
        instrument: &str,
        ltp: Decimal,
    ) -> Result<BookingEvaluation> {
        let rows = self.store.read_all_rows().await?;
        evaluate_profit_booking(&rows, date, instrument, ltp, &self.policy)
    }

    /// Appends the SELL row for an accepted proposal.
    ///
    /// `final_profit` is the operator's edited figure and defaults to the
    /// estimate. The proposal must still match the ledger: if the held units
    /// moved since it was evaluated, the caller has to evaluate again.
    pub async fn commit(
        &self,
        proposal: &BookingProposal,
        final_profit: Option<Decimal>,
    ) -> Result<BookingOutcome> {
        if proposal.units_to_sell <= Decimal::ZERO {
            return Err(LedgerError::invalid(format!(
                "proposal for {} has no units to sell",
                proposal.valuation.instrument
            )));
        }
        let realized_profit = final_profit.unwrap_or(proposal.estimated_profit);
        if realized_profit < Decimal::ZERO {
            return Err(LedgerError::invalid(format!(
                "booked profit must not be negative, got {}",
                realized_profit
            )));
        }

        let _guard = self.write_lock.lock().await;
        let rows = self.store.read_all_rows().await?;
        let instrument = proposal.valuation.instrument.as_str();
        let held_units = totals(&rows, instrument).net_units();
        if held_units != proposal.valuation.held_units {
            return Err(LedgerError::invalid(format!(
                "ledger changed since evaluation ({} held, proposal saw {}); evaluate again",
                held_units, proposal.valuation.held_units
            )));
        }

        let row = Transaction {
            date: proposal.date,
            instrument: instrument.to_string(),
            price: proposal.valuation.ltp,
            amount: Decimal::ZERO,
            units: proposal.units_to_sell,
            kind: TransactionKind::Sell,
            realized_profit,
        };
        self.store.append_row(&row).await?;
        info!(
            "Booked profit of {} on {} by selling {} units at {}",
            realized_profit, instrument, row.units, row.price
        );

        Ok(BookingOutcome {
            realized_profit,
            units_sold: row.units,
        })
    }

    pub fn decline(&self, proposal: &BookingProposal) -> BookingOutcome {
        info!(
            "Profit booking on {} declined (estimated {}, {} units)",
            proposal.valuation.instrument, proposal.estimated_profit, proposal.units_to_sell
        );
        BookingOutcome::none()
    }
}
