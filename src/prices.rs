// src/prices.rs
//! Last traded price lookup with manual entry as the fallback.

use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

/// Instruments with a known exchange ticker.
const TICKER_MAP: &[(&str, &str)] = &[
    ("NiftyBEES", "NIFTYBEES.BSE"),
    ("BankBEES", "BANKBEES.BSE"),
];

pub fn ticker_for(instrument: &str) -> Option<&'static str> {
    let instrument = instrument.trim();
    TICKER_MAP
        .iter()
        .find(|(name, _)| *name == instrument)
        .map(|(_, ticker)| *ticker)
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn last_traded_price(&self, ticker: &str) -> Result<Decimal>;
}

#[derive(Deserialize)]
struct TimeSeriesData {
    #[serde(rename = "4. close")]
    close: String,
}

#[derive(Deserialize)]
struct AlphaVantageResponse {
    #[serde(rename = "Time Series (Daily)")]
    time_series: Option<HashMap<String, TimeSeriesData>>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

/// Close of the most recent trading day in a TIME_SERIES_DAILY payload.
fn latest_close(ticker: &str, response: AlphaVantageResponse) -> Result<Decimal> {
    let failed = |reason: String| LedgerError::PriceLookupFailed {
        instrument: ticker.to_string(),
        reason,
    };

    if let Some(message) = response
        .error_message
        .or(response.note)
        .or(response.information)
    {
        return Err(failed(message));
    }

    let series = response
        .time_series
        .ok_or_else(|| failed("response has no daily time series".to_string()))?;
    // ISO dates order lexically.
    let (date, day) = series
        .iter()
        .max_by(|a, b| a.0.cmp(b.0))
        .ok_or_else(|| failed("daily time series is empty".to_string()))?;
    Decimal::from_str(day.close.trim())
        .map_err(|e| failed(format!("close '{}' on {} is not a number: {}", day.close, date, e)))
}

pub struct AlphaVantageSource {
    client: Client,
    api_key: String,
}

impl AlphaVantageSource {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl PriceSource for AlphaVantageSource {
    async fn last_traded_price(&self, ticker: &str) -> Result<Decimal> {
        let failed = |reason: String| LedgerError::PriceLookupFailed {
            instrument: ticker.to_string(),
            reason,
        };

        let response = self
            .client
            .get(ALPHA_VANTAGE_URL)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", ticker),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let body = response
            .json::<AlphaVantageResponse>()
            .await
            .map_err(|e| failed(e.to_string()))?;
        latest_close(ticker, body)
    }
}

/// Resolves the LTP for an instrument from the live source when one applies,
/// falling back to the operator's manual price.
pub struct PriceService {
    source: Option<Arc<dyn PriceSource>>,
}

impl PriceService {
    pub fn new(source: Option<Arc<dyn PriceSource>>) -> Self {
        Self { source }
    }

    pub fn manual_only() -> Self {
        Self { source: None }
    }

    pub async fn resolve_ltp(&self, instrument: &str, manual: Option<Decimal>) -> Result<Decimal> {
        let manual = manual.filter(|price| *price > Decimal::ZERO);
        let instrument = instrument.trim();

        let (ticker, source) = match (ticker_for(instrument), &self.source) {
            (Some(ticker), Some(source)) => (ticker, source),
            _ => {
                return manual.ok_or_else(|| LedgerError::PriceLookupFailed {
                    instrument: instrument.to_string(),
                    reason: "no live price for this instrument; enter LTP manually".to_string(),
                })
            }
        };

        let fetched = match source.last_traded_price(ticker).await {
            Ok(price) if price > Decimal::ZERO => Ok(price),
            Ok(price) => Err(LedgerError::PriceLookupFailed {
                instrument: instrument.to_string(),
                reason: format!("source returned non-positive price {}", price),
            }),
            Err(e) => Err(e),
        };

        match fetched {
            Ok(price) => {
                info!("Latest LTP for {} ({}) fetched: {}", instrument, ticker, price);
                Ok(price)
            }
            Err(e) => match manual {
                Some(price) => {
                    warn!("Could not fetch LTP for {}: {}. Using manual {}", instrument, e, price);
                    Ok(price)
                }
                None => {
                    warn!("Could not fetch LTP for {}: {}", instrument, e);
                    Err(LedgerError::PriceLookupFailed {
                        instrument: instrument.to_string(),
                        reason: format!("{}; enter LTP manually", e),
                    })
                }
            },
        }
    }
}
