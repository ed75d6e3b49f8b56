// src/api.rs
use crate::error::LedgerError;
use crate::ledger::{BookingEvaluation, BookingOutcome, LedgerEngine};
use crate::models::{Position, Transaction};
use crate::prices::PriceService;
use chrono::{Local, NaiveDate};
use log::{error, info};
use percent_encoding::percent_decode_str;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

#[derive(Debug, Deserialize)]
pub struct BuyRequest {
    pub date: Option<NaiveDate>,
    pub instrument: String,
    pub price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub instrument: String,
    pub ltp: Option<Decimal>,
    pub date: Option<NaiveDate>,
}

/// The confirm gate: `confirm = false` declines a triggered booking.
#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub instrument: String,
    pub ltp: Option<Decimal>,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub confirm: bool,
    pub final_profit: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct LedgerView {
    pub rows: Vec<Transaction>,
    pub positions: Vec<Position>,
}

/// An evaluation shown next to the instrument's current PKP average.
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    #[serde(flatten)]
    pub evaluation: BookingEvaluation,
    pub average_cost: Decimal,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub evaluation: BookingEvaluation,
    pub committed: bool,
    pub outcome: BookingOutcome,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// All routes with rejections recovered into JSON error bodies.
pub fn app(
    engine: Arc<LedgerEngine>,
    prices: Arc<PriceService>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    routes(engine, prices).recover(handle_rejection)
}

pub fn routes(
    engine: Arc<LedgerEngine>,
    prices: Arc<PriceService>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let add = warp::path("transactions")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_engine(engine.clone()))
        .and(warp::body::json())
        .and_then(add_buy_handler);

    let preview = warp::path!("transactions" / "preview")
        .and(warp::post())
        .and(with_engine(engine.clone()))
        .and(warp::body::json())
        .and_then(preview_buy_handler);

    let ledger = warp::path("ledger")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_engine(engine.clone()))
        .and_then(ledger_handler);

    let position = warp::path!("positions" / String)
        .and(warp::get())
        .and(with_engine(engine.clone()))
        .and_then(position_handler);

    let evaluate = warp::path!("profit-booking" / "evaluate")
        .and(warp::post())
        .and(with_engine(engine.clone()))
        .and(with_prices(prices.clone()))
        .and(warp::body::json())
        .and_then(evaluate_handler);

    let book = warp::path("profit-booking")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_engine(engine))
        .and(with_prices(prices))
        .and(warp::body::json())
        .and_then(booking_handler);

    add.or(preview)
        .or(ledger)
        .or(position)
        .or(evaluate)
        .or(book)
}

fn with_engine(
    engine: Arc<LedgerEngine>,
) -> impl Filter<Extract = (Arc<LedgerEngine>,), Error = Infallible> + Clone {
    warp::any().map(move || engine.clone())
}

fn with_prices(
    prices: Arc<PriceService>,
) -> impl Filter<Extract = (Arc<PriceService>,), Error = Infallible> + Clone {
    warp::any().map(move || prices.clone())
}

fn reject(context: &str, e: LedgerError) -> Rejection {
    match &e {
        LedgerError::StoreUnavailable(_) => error!("{}: {}", context, e),
        _ => info!("{}: {}", context, e),
    }
    warp::reject::custom(e)
}

async fn add_buy_handler(
    engine: Arc<LedgerEngine>,
    request: BuyRequest,
) -> Result<impl Reply, Rejection> {
    let date = request.date.unwrap_or_else(today);
    match engine
        .append_buy(date, &request.instrument, request.price, request.amount)
        .await
    {
        Ok(row) => Ok(warp::reply::with_status(
            warp::reply::json(&row),
            StatusCode::CREATED,
        )),
        Err(e) => Err(reject("Failed to add transaction", e)),
    }
}

async fn preview_buy_handler(
    engine: Arc<LedgerEngine>,
    request: BuyRequest,
) -> Result<impl Reply, Rejection> {
    let date = request.date.unwrap_or_else(today);
    engine
        .preview_buy(date, &request.instrument, request.price, request.amount)
        .map(|row| warp::reply::json(&row))
        .map_err(|e| reject("Failed to preview transaction", e))
}

async fn ledger_handler(engine: Arc<LedgerEngine>) -> Result<impl Reply, Rejection> {
    let (rows, positions) = engine
        .ledger_view()
        .await
        .map_err(|e| reject("Failed to load ledger", e))?;
    Ok(warp::reply::json(&LedgerView { rows, positions }))
}

async fn position_handler(
    instrument: String,
    engine: Arc<LedgerEngine>,
) -> Result<impl Reply, Rejection> {
    let instrument = percent_decode_str(&instrument)
        .decode_utf8()
        .map_err(|e| {
            reject(
                "Failed to load position",
                LedgerError::invalid(format!("instrument is not valid UTF-8: {}", e)),
            )
        })?;
    engine
        .position(&instrument)
        .await
        .map(|position| warp::reply::json(&position))
        .map_err(|e| reject("Failed to load position", e))
}

async fn evaluate_handler(
    engine: Arc<LedgerEngine>,
    prices: Arc<PriceService>,
    request: EvaluateRequest,
) -> Result<impl Reply, Rejection> {
    let ltp = prices
        .resolve_ltp(&request.instrument, request.ltp)
        .await
        .map_err(|e| reject("Failed to resolve LTP", e))?;
    let date = request.date.unwrap_or_else(today);
    let evaluation = engine
        .evaluate_profit_booking(date, &request.instrument, ltp)
        .await
        .map_err(|e| reject("Failed to evaluate profit booking", e))?;
    let average_cost = engine
        .average_cost(&request.instrument)
        .await
        .map_err(|e| reject("Failed to load PKP average", e))?;
    Ok(warp::reply::json(&EvaluateResponse {
        evaluation,
        average_cost,
    }))
}

async fn booking_handler(
    engine: Arc<LedgerEngine>,
    prices: Arc<PriceService>,
    request: BookingRequest,
) -> Result<impl Reply, Rejection> {
    let ltp = prices
        .resolve_ltp(&request.instrument, request.ltp)
        .await
        .map_err(|e| reject("Failed to resolve LTP", e))?;
    let date = request.date.unwrap_or_else(today);
    let evaluation = engine
        .evaluate_profit_booking(date, &request.instrument, ltp)
        .await
        .map_err(|e| reject("Failed to evaluate profit booking", e))?;

    let (committed, outcome) = match evaluation.proposal() {
        Some(proposal) if request.confirm => {
            let outcome = engine
                .commit(proposal, request.final_profit)
                .await
                .map_err(|e| reject("Failed to book profit", e))?;
            (true, outcome)
        }
        Some(proposal) => (false, engine.decline(proposal)),
        None => (false, BookingOutcome::none()),
    };

    Ok(warp::reply::json(&BookingResponse {
        evaluation,
        committed,
        outcome,
    }))
}

fn status_for(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        LedgerError::PriceLookupFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<LedgerError>() {
        (status_for(e), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": message })),
        status,
    ))
}
