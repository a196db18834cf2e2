//! REST client for Binance-compatible public market data.
//!
//! Endpoints used:
//! - `GET /api/v3/klines` for candles (`startTime` in milliseconds)
//! - `GET /api/v3/ticker/24hr` for one symbol or a `symbols` batch
//! - `GET /api/v3/ping` for connectivity
//!
//! Exchange timestamps are milliseconds; everything returned from here is
//! converted to Unix seconds.

use std::collections::HashMap;
use std::time::Duration;

use kline_core::{PriceTick, RawCandle, Timeframe};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{BoxFuture, ExchangeClient, TickerBatch};
use crate::error::{ExchangeError, ExchangeResult};

/// Binance error code for an unknown symbol.
const INVALID_SYMBOL_CODE: i64 = -1121;

/// REST client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestClientConfig {
    /// Default: "https://api.binance.com".
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout (ms). Default: 10,000.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    #[serde(default)]
    volume: Option<String>,
    #[serde(default)]
    price_change: Option<String>,
    #[serde(default)]
    price_change_percent: Option<String>,
    #[serde(default)]
    close_time: Option<i64>,
}

/// Convert `BTC/USDT` to the exchange form `BTCUSDT`.
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_uppercase()
}

/// Market-data client over the exchange REST API.
pub struct RestExchangeClient {
    client: Client,
    base_url: String,
}

impl RestExchangeClient {
    pub fn new(config: &RestClientConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ExchangeError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        info!(base_url = %config.base_url, "REST exchange client created");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> ExchangeResult<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, body));
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::BadResponse(format!("Failed to parse response: {e}")))
    }
}

fn map_transport_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout(e.to_string())
    } else {
        ExchangeError::Network(e.to_string())
    }
}

fn map_status_error(status: StatusCode, body: String) -> ExchangeError {
    let api_code = serde_json::from_str::<ApiErrorBody>(&body).ok();

    match status.as_u16() {
        429 | 418 => ExchangeError::RateLimited(format!("HTTP {status}: {body}")),
        401 | 403 => ExchangeError::Auth(format!("HTTP {status}: {body}")),
        s if s >= 500 => ExchangeError::Server { status: s, body },
        s => match api_code {
            Some(err) if err.code == INVALID_SYMBOL_CODE => ExchangeError::InvalidSymbol(err.msg),
            _ => ExchangeError::Rejected { status: s, body },
        },
    }
}

fn parse_f64(value: &str, field: &str) -> ExchangeResult<f64> {
    value
        .parse()
        .map_err(|_| ExchangeError::BadResponse(format!("{field}: '{value}' is not numeric")))
}

fn parse_opt_f64(value: Option<&String>) -> Option<f64> {
    value.and_then(|v| v.parse().ok())
}

/// Convert one kline row to a raw candle with the open time in seconds.
fn kline_to_raw(row: serde_json::Value) -> ExchangeResult<RawCandle> {
    let serde_json::Value::Array(mut fields) = row else {
        return Err(ExchangeError::BadResponse("kline row is not an array".to_string()));
    };
    if let Some(open_time) = fields.first().and_then(serde_json::Value::as_i64) {
        fields[0] = serde_json::Value::from(open_time.div_euclid(1000));
    }
    Ok(RawCandle(fields))
}

fn ticker_to_tick(symbol: &str, ticker: Ticker24h) -> ExchangeResult<PriceTick> {
    let timestamp = ticker
        .close_time
        .map(|ms| ms.div_euclid(1000))
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    Ok(PriceTick {
        symbol: symbol.to_string(),
        price: parse_f64(&ticker.last_price, "lastPrice")?,
        volume_24h: parse_opt_f64(ticker.volume.as_ref()),
        change_24h: parse_opt_f64(ticker.price_change.as_ref()),
        change_pct_24h: parse_opt_f64(ticker.price_change_percent.as_ref()),
        timestamp,
    })
}

impl ExchangeClient for RestExchangeClient {
    fn name(&self) -> &str {
        "rest"
    }

    fn fetch_candles<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<RawCandle>>> {
        Box::pin(async move {
            let mut query = vec![
                ("symbol", exchange_symbol(symbol)),
                ("interval", timeframe.as_str().to_string()),
                ("limit", limit.to_string()),
            ];
            if let Some(since) = since {
                query.push(("startTime", (since * 1000).to_string()));
            }

            let body = self.get_json("/api/v3/klines", &query).await?;
            let serde_json::Value::Array(rows) = body else {
                return Err(ExchangeError::BadResponse("klines response is not an array".to_string()));
            };

            debug!(%symbol, %timeframe, rows = rows.len(), "Fetched klines");
            rows.into_iter().map(kline_to_raw).collect()
        })
    }

    fn fetch_ticker<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<PriceTick>> {
        Box::pin(async move {
            let body = self
                .get_json("/api/v3/ticker/24hr", &[("symbol", exchange_symbol(symbol))])
                .await?;
            let ticker: Ticker24h = serde_json::from_value(body)
                .map_err(|e| ExchangeError::BadResponse(format!("ticker: {e}")))?;
            ticker_to_tick(symbol, ticker)
        })
    }

    fn fetch_tickers<'a>(
        &'a self,
        symbols: &'a [String],
    ) -> BoxFuture<'a, ExchangeResult<TickerBatch>> {
        Box::pin(async move {
            let by_exchange: HashMap<String, &String> =
                symbols.iter().map(|s| (exchange_symbol(s), s)).collect();
            let names: Vec<&String> = by_exchange.keys().collect();
            let symbols_param = serde_json::to_string(&names)
                .map_err(|e| ExchangeError::HttpClient(format!("symbols param: {e}")))?;

            let body = self
                .get_json("/api/v3/ticker/24hr", &[("symbols", symbols_param)])
                .await?;
            let tickers: Vec<Ticker24h> = serde_json::from_value(body)
                .map_err(|e| ExchangeError::BadResponse(format!("tickers: {e}")))?;

            let mut batch = TickerBatch::default();
            for ticker in tickers {
                let Some(&symbol) = by_exchange.get(&ticker.symbol) else {
                    warn!(symbol = %ticker.symbol, "Ticker for unrequested symbol ignored");
                    continue;
                };
                match ticker_to_tick(symbol, ticker) {
                    Ok(tick) => {
                        batch.ticks.insert(symbol.clone(), tick);
                    }
                    Err(e) => {
                        batch.errors.insert(symbol.clone(), e.to_string());
                    }
                }
            }
            for symbol in symbols {
                if !batch.ticks.contains_key(symbol) && !batch.errors.contains_key(symbol) {
                    batch
                        .errors
                        .insert(symbol.clone(), "missing from ticker response".to_string());
                }
            }
            Ok(batch)
        })
    }

    fn ping(&self) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move {
            self.get_json("/api/v3/ping", &[]).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exchange_symbol() {
        assert_eq!(exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(exchange_symbol("eth/btc"), "ETHBTC");
    }

    #[test]
    fn test_kline_row_converted_to_seconds() {
        let row = json!([1_700_000_040_000i64, "1.0", "2.0", "0.5", "1.5", "10.0", 1_700_000_099_999i64, "15.0", 12]);
        let raw = kline_to_raw(row).unwrap();
        assert_eq!(raw.fields()[0], json!(1_700_000_040i64));
        assert_eq!(raw.fields().len(), 9);
    }

    #[test]
    fn test_status_mapping() {
        let invalid = map_status_error(
            StatusCode::BAD_REQUEST,
            r#"{"code":-1121,"msg":"Invalid symbol."}"#.to_string(),
        );
        assert_eq!(invalid, ExchangeError::InvalidSymbol("Invalid symbol.".to_string()));

        assert!(matches!(
            map_status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ExchangeError::RateLimited(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            ExchangeError::Server { status: 503, .. }
        ));
        assert!(matches!(
            map_status_error(StatusCode::FORBIDDEN, String::new()),
            ExchangeError::Auth(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::BAD_REQUEST, r#"{"code":-1100,"msg":"bad"}"#.to_string()),
            ExchangeError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn test_ticker_to_tick() {
        let ticker: Ticker24h = serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "lastPrice": "50000.5",
            "volume": "1234.5",
            "priceChange": "-100.0",
            "priceChangePercent": "-0.2",
            "closeTime": 1_700_000_000_123i64
        }))
        .unwrap();
        let tick = ticker_to_tick("BTC/USDT", ticker).unwrap();
        assert_eq!(tick.symbol, "BTC/USDT");
        assert_eq!(tick.price, 50_000.5);
        assert_eq!(tick.volume_24h, Some(1234.5));
        assert_eq!(tick.change_pct_24h, Some(-0.2));
        assert_eq!(tick.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_client_builds() {
        let client = RestExchangeClient::new(&RestClientConfig {
            base_url: "http://localhost:1/".to_string(),
            request_timeout_ms: 100,
        })
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:1");
        assert_eq!(client.name(), "rest");
    }
}
