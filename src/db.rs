// src/db.rs
use crate::config::StoreConfig;
use crate::error::{LedgerError, Result};
use crate::models::{Transaction, TransactionKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{error, info};
use rust_decimal::Decimal;
use scylla::{frame::response::result::CqlValue, query::Query, Session, SessionBuilder};
use std::str::FromStr;
use std::sync::Mutex;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Append-only ledger storage. Rows come back in insertion order.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn read_all_rows(&self) -> Result<Vec<Transaction>>;
    async fn append_row(&self, row: &Transaction) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    rows: Mutex<Vec<Transaction>>,
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn read_all_rows(&self) -> Result<Vec<Transaction>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| LedgerError::store("in-memory ledger lock poisoned"))?;
        Ok(rows.clone())
    }

    async fn append_row(&self, row: &Transaction) -> Result<()> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| LedgerError::store("in-memory ledger lock poisoned"))?;
        rows.push(row.clone());
        Ok(())
    }
}

/// Ledger rows in one Scylla partition per sheet, clustered by an ascending
/// sequence number so reads return insertion order.
pub struct ScyllaLedgerStore {
    session: Session,
    keyspace: String,
    sheet: String,
}

impl ScyllaLedgerStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let session = SessionBuilder::new()
            .known_node(&config.node)
            .build()
            .await
            .map_err(|e| {
                error!("Failed to connect to ScyllaDB at {}: {}", config.node, e);
                LedgerError::store(e)
            })?;

        let store = ScyllaLedgerStore {
            session,
            keyspace: config.keyspace.clone(),
            sheet: config.sheet.clone(),
        };
        store.init_schema().await?;

        info!(
            "Successfully connected to ScyllaDB, ledger {}.{}",
            store.keyspace, store.sheet
        );
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let keyspace = format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
            self.keyspace
        );
        let table = format!(
            "CREATE TABLE IF NOT EXISTS {}.ledger (sheet TEXT, seq BIGINT, date TEXT, instrument TEXT, price TEXT, amount TEXT, units TEXT, kind TEXT, realized_profit TEXT, PRIMARY KEY (sheet, seq)) WITH CLUSTERING ORDER BY (seq ASC)",
            self.keyspace
        );
        self.session
            .query(keyspace, &[])
            .await
            .map_err(LedgerError::store)?;
        self.session
            .query(table, &[])
            .await
            .map_err(LedgerError::store)?;
        Ok(())
    }

    async fn next_seq(&self) -> Result<i64> {
        let query = Query::new(format!(
            "SELECT seq FROM {}.ledger WHERE sheet = ? ORDER BY seq DESC LIMIT 1",
            self.keyspace
        ));
        let result = self
            .session
            .query(query, (self.sheet.as_str(),))
            .await
            .map_err(LedgerError::store)?;
        let last = result
            .rows
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|row| row.columns.into_iter().next().flatten())
            .and_then(|value| value.as_bigint());
        Ok(last.map_or(0, |seq| seq + 1))
    }
}

#[async_trait]
impl LedgerStore for ScyllaLedgerStore {
    async fn read_all_rows(&self) -> Result<Vec<Transaction>> {
        let query = Query::new(format!(
            "SELECT seq, date, instrument, price, amount, units, kind, realized_profit FROM {}.ledger WHERE sheet = ?",
            self.keyspace
        ));
        let result = self
            .session
            .query(query, (self.sheet.as_str(),))
            .await
            .map_err(|e| {
                error!("Failed to read ledger {}: {}", self.sheet, e);
                LedgerError::store(e)
            })?;

        result
            .rows
            .unwrap_or_default()
            .into_iter()
            .map(|row| parse_row(&row.columns))
            .collect()
    }

    async fn append_row(&self, row: &Transaction) -> Result<()> {
        let seq = self.next_seq().await?;
        let query = Query::new(format!(
            "INSERT INTO {}.ledger (sheet, seq, date, instrument, price, amount, units, kind, realized_profit) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.keyspace
        ));
        self.session
            .query(
                query,
                (
                    self.sheet.as_str(),
                    seq,
                    row.date.format(DATE_FORMAT).to_string(),
                    row.instrument.as_str(),
                    row.price.to_string(),
                    row.amount.to_string(),
                    row.units.to_string(),
                    row.kind.as_str(),
                    row.realized_profit.to_string(),
                ),
            )
            .await
            .map_err(|e| {
                error!("Failed to append row {} to ledger {}: {}", seq, self.sheet, e);
                LedgerError::store(e)
            })?;
        Ok(())
    }
}

fn text_column<'a>(columns: &'a [Option<CqlValue>], idx: usize, name: &str) -> Result<&'a str> {
    columns
        .get(idx)
        .and_then(|col| col.as_ref())
        .and_then(|value| value.as_text())
        .map(|text| text.as_str())
        .ok_or_else(|| LedgerError::store(format!("ledger row is missing column {}", name)))
}

fn decimal_column(columns: &[Option<CqlValue>], idx: usize, name: &str) -> Result<Decimal> {
    let text = text_column(columns, idx, name)?;
    Decimal::from_str(text)
        .map_err(|e| LedgerError::store(format!("malformed {} '{}': {}", name, text, e)))
}

/// Columns: seq, date, instrument, price, amount, units, kind, realized_profit.
fn parse_row(columns: &[Option<CqlValue>]) -> Result<Transaction> {
    let date_text = text_column(columns, 1, "date")?;
    let date = NaiveDate::parse_from_str(date_text, DATE_FORMAT)
        .map_err(|e| LedgerError::store(format!("malformed date '{}': {}", date_text, e)))?;
    let kind_text = text_column(columns, 6, "kind")?;
    let kind = TransactionKind::from_str(kind_text).map_err(LedgerError::store)?;

    Ok(Transaction {
        date,
        instrument: text_column(columns, 2, "instrument")?.to_string(),
        price: decimal_column(columns, 3, "price")?,
        amount: decimal_column(columns, 4, "amount")?,
        units: decimal_column(columns, 5, "units")?,
        kind,
        realized_profit: decimal_column(columns, 7, "realized_profit")?,
    })
}
