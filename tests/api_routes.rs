use async_trait::async_trait;
use pkp_tracker::api;
use pkp_tracker::db::{LedgerStore, MemoryLedgerStore};
use pkp_tracker::error::{LedgerError, Result};
use pkp_tracker::ledger::{LedgerEngine, LedgerPolicy};
use pkp_tracker::models::Transaction;
use pkp_tracker::prices::{PriceService, PriceSource};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use warp::http::StatusCode;

struct FixedSource(Decimal);

#[async_trait]
impl PriceSource for FixedSource {
    async fn last_traded_price(&self, _ticker: &str) -> Result<Decimal> {
        Ok(self.0)
    }
}

struct DownStore;

#[async_trait]
impl LedgerStore for DownStore {
    async fn read_all_rows(&self) -> Result<Vec<Transaction>> {
        Err(LedgerError::StoreUnavailable("sheet offline".to_string()))
    }

    async fn append_row(&self, _row: &Transaction) -> Result<()> {
        Err(LedgerError::StoreUnavailable("sheet offline".to_string()))
    }
}

fn setup(prices: PriceService) -> (Arc<MemoryLedgerStore>, Arc<LedgerEngine>, Arc<PriceService>) {
    let store = Arc::new(MemoryLedgerStore::default());
    let engine = Arc::new(LedgerEngine::new(store.clone(), LedgerPolicy::default()));
    (store, engine, Arc::new(prices))
}

async fn post(
    engine: &Arc<LedgerEngine>,
    prices: &Arc<PriceService>,
    path: &str,
    body: Value,
) -> (StatusCode, Value) {
    let filter = api::app(engine.clone(), prices.clone());
    let response = warp::test::request()
        .method("POST")
        .path(path)
        .json(&body)
        .reply(&filter)
        .await;
    let status = response.status();
    (status, serde_json::from_slice(response.body()).unwrap())
}

async fn get(engine: &Arc<LedgerEngine>, prices: &Arc<PriceService>, path: &str) -> (StatusCode, Value) {
    let filter = api::app(engine.clone(), prices.clone());
    let response = warp::test::request().method("GET").path(path).reply(&filter).await;
    let status = response.status();
    (status, serde_json::from_slice(response.body()).unwrap())
}

fn num(value: &Value) -> f64 {
    value
        .as_str()
        .and_then(|text| text.parse().ok())
        .or_else(|| value.as_f64())
        .unwrap_or_else(|| panic!("not a number: {}", value))
}

#[tokio::test]
async fn record_purchase_rounds_to_whole_units() {
    let (store, engine, prices) = setup(PriceService::manual_only());
    let (status, body) = post(
        &engine,
        &prices,
        "/transactions",
        json!({"date": "2024-03-04", "instrument": "NiftyBEES", "price": 23.45, "amount": 1000}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(num(&body["units"]), 42.0);
    assert_eq!(num(&body["amount"]), 984.9);
    assert_eq!(body["kind"], "BUY");

    let rows = store.read_all_rows().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].amount, dec!(984.90));
}

#[tokio::test]
async fn preview_does_not_append() {
    let (store, engine, prices) = setup(PriceService::manual_only());
    let (status, body) = post(
        &engine,
        &prices,
        "/transactions/preview",
        json!({"instrument": "NiftyBEES", "price": 250, "amount": 20000}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&body["units"]), 80.0);
    assert!(store.read_all_rows().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_purchase_is_bad_request() {
    let (store, engine, prices) = setup(PriceService::manual_only());
    let (status, body) = post(
        &engine,
        &prices,
        "/transactions",
        json!({"instrument": "NiftyBEES", "price": 0, "amount": 1000}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("price"));
    assert!(store.read_all_rows().await.unwrap().is_empty());

    let (status, _) = post(&engine, &prices, "/transactions", json!({"instrument": "X"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ledger_view_lists_rows_and_positions() {
    let (_, engine, prices) = setup(PriceService::manual_only());
    for (instrument, price, amount) in [("NiftyBEES", 50, 5000), ("BankBEES", 400, 2000), ("NiftyBEES", 100, 1000)] {
        let (status, _) = post(
            &engine,
            &prices,
            "/transactions",
            json!({"instrument": instrument, "price": price, "amount": amount}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = get(&engine, &prices, "/ledger").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"].as_array().unwrap().len(), 3);

    let positions = body["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 2);
    assert_eq!(positions[0]["instrument"], "NiftyBEES");
    assert_eq!(num(&positions[0]["net_units"]), 110.0);
    assert_eq!(num(&positions[0]["invested"]), 6000.0);
    assert_eq!(positions[1]["instrument"], "BankBEES");
    assert_eq!(num(&positions[1]["average_cost"]), 400.0);

    let (status, body) = get(&engine, &prices, "/positions/BankBEES").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&body["net_units"]), 5.0);

    let (status, body) = get(&engine, &prices, "/positions/GoldBEES").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&body["average_cost"]), 0.0);
}

#[tokio::test]
async fn evaluate_is_estimate_only() {
    let (store, engine, prices) = setup(PriceService::manual_only());
    engine
        .append_buy(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "NiftyBEES", dec!(50), dec!(5000))
        .await
        .unwrap();

    let (status, body) = post(
        &engine,
        &prices,
        "/profit-booking/evaluate",
        json!({"instrument": "NiftyBEES", "ltp": 100}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "triggered");
    assert_eq!(num(&body["proposal"]["units_to_sell"]), 50.0);
    assert_eq!(num(&body["proposal"]["estimated_profit"]), 5000.0);
    assert_eq!(num(&body["proposal"]["valuation"]["profit"]), 5000.0);
    assert_eq!(num(&body["average_cost"]), 50.0);
    assert_eq!(store.read_all_rows().await.unwrap().len(), 1);
}

#[tokio::test]
async fn declined_booking_returns_zero_and_keeps_ledger() {
    let (store, engine, prices) = setup(PriceService::manual_only());
    engine
        .append_buy(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "NiftyBEES", dec!(50), dec!(5000))
        .await
        .unwrap();

    let (status, body) = post(
        &engine,
        &prices,
        "/profit-booking",
        json!({"instrument": "NiftyBEES", "ltp": 100, "confirm": false}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], false);
    assert_eq!(num(&body["outcome"]["realized_profit"]), 0.0);
    assert_eq!(num(&body["outcome"]["units_sold"]), 0.0);
    assert_eq!(store.read_all_rows().await.unwrap().len(), 1);
}

#[tokio::test]
async fn confirmed_booking_appends_sell_with_live_price() {
    let (store, engine, prices) = setup(PriceService::new(Some(Arc::new(FixedSource(dec!(120))))));
    engine
        .append_buy(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "NiftyBEES", dec!(50), dec!(5000))
        .await
        .unwrap();

    let (status, body) = post(
        &engine,
        &prices,
        "/profit-booking",
        json!({"instrument": "NiftyBEES", "confirm": true, "final_profit": 6900, "date": "2024-06-03"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], true);
    // profit 7000 at 120 floors to 58 units
    assert_eq!(num(&body["outcome"]["units_sold"]), 58.0);
    assert_eq!(num(&body["outcome"]["realized_profit"]), 6900.0);

    let rows = store.read_all_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[1].is_sell());
    assert_eq!(rows[1].price, dec!(120));
    assert_eq!(rows[1].units, dec!(58));
    assert_eq!(rows[1].realized_profit, dec!(6900));
}

#[tokio::test]
async fn below_threshold_is_a_no_op() {
    let (store, engine, prices) = setup(PriceService::manual_only());
    engine
        .append_buy(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "NiftyBEES", dec!(50), dec!(5000))
        .await
        .unwrap();

    let (status, body) = post(
        &engine,
        &prices,
        "/profit-booking",
        json!({"instrument": "NiftyBEES", "ltp": 90, "confirm": true}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evaluation"]["status"], "no_trigger");
    assert_eq!(body["committed"], false);
    assert_eq!(num(&body["outcome"]["units_sold"]), 0.0);
    assert_eq!(store.read_all_rows().await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_price_asks_for_manual_entry() {
    let (_, engine, prices) = setup(PriceService::manual_only());
    let (status, body) = post(
        &engine,
        &prices,
        "/profit-booking/evaluate",
        json!({"instrument": "NiftyBEES"}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("manually"));
}

#[tokio::test]
async fn store_failure_is_reported_not_fatal() {
    let engine = Arc::new(LedgerEngine::new(Arc::new(DownStore), LedgerPolicy::default()));
    let prices = Arc::new(PriceService::manual_only());

    let (status, body) = get(&engine, &prices, "/ledger").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("sheet offline"));

    let (status, _) = post(
        &engine,
        &prices,
        "/transactions",
        json!({"instrument": "NiftyBEES", "price": 10, "amount": 100}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let (_, engine, prices) = setup(PriceService::manual_only());
    let (status, body) = get(&engine, &prices, "/portfolio").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");
}

#[tokio::test]
async fn profit_under_one_unit_resolves_to_zero_outcome() {
    let (store, engine, prices) = setup(PriceService::manual_only());
    engine
        .append_buy(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "X", dec!(100), dec!(100))
        .await
        .unwrap();

    let (status, body) = post(
        &engine,
        &prices,
        "/profit-booking/evaluate",
        json!({"instrument": "X", "ltp": 6000}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_trigger");

    let (status, body) = post(
        &engine,
        &prices,
        "/profit-booking",
        json!({"instrument": "X", "ltp": 6000, "confirm": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], false);
    assert_eq!(num(&body["outcome"]["realized_profit"]), 0.0);
    assert_eq!(num(&body["outcome"]["units_sold"]), 0.0);
    assert_eq!(store.read_all_rows().await.unwrap().len(), 1);
}

#[tokio::test]
async fn position_path_is_percent_decoded() {
    let (_, engine, prices) = setup(PriceService::manual_only());
    let (status, _) = post(
        &engine,
        &prices,
        "/transactions",
        json!({"instrument": "Nifty BEES", "price": 25, "amount": 1000}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = get(&engine, &prices, "/positions/Nifty%20BEES").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instrument"], "Nifty BEES");
    assert_eq!(num(&body["net_units"]), 40.0);
    assert_eq!(num(&body["average_cost"]), 25.0);

    let (status, _) = get(&engine, &prices, "/positions/%FF").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn fractional_units_serialize_exactly() {
    let store = Arc::new(MemoryLedgerStore::default());
    let policy = LedgerPolicy {
        units: pkp_tracker::ledger::UnitPolicy::Fractional,
        ..LedgerPolicy::default()
    };
    let engine = Arc::new(LedgerEngine::new(store.clone(), policy));
    let prices = Arc::new(PriceService::manual_only());

    let (status, body) = post(
        &engine,
        &prices,
        "/transactions",
        json!({"instrument": "X", "price": 23.45, "amount": 1000}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let stored = store.read_all_rows().await.unwrap()[0].units;
    assert_eq!(body["units"], Value::String(stored.to_string()));
}
