//! Bybit v5 REST client for USDT linear perpetuals.
//!
//! Private endpoints are signed with HMAC-SHA256 over
//! `timestamp + api_key + recv_window + payload`, where the payload is the
//! raw query string for GET and the JSON body for POST.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ExchangeError;
use crate::models::{
    Bracket, Candle, Direction, InstrumentSpec, KlineInterval, OrderAck, PositionSnapshot,
};

use super::exchange::Exchange;
use super::retry::with_retry;
use super::types::*;

pub const MAINNET_URL: &str = "https://api.bybit.com";
pub const TESTNET_URL: &str = "https://api-testnet.bybit.com";

const RECV_WINDOW: &str = "5000";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// "leverage not modified": the requested leverage is already set.
const LEVERAGE_UNCHANGED: i64 = 110043;

type HmacSha256 = Hmac<Sha256>;

/// API key pair for private endpoints.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    /// Read `BYBIT_API_KEY` / `BYBIT_API_SECRET`.
    pub fn from_env() -> Result<Self, ExchangeError> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ExchangeError::Credentials(format!("{} is not set", name)))
        };
        Ok(Self {
            api_key: read("BYBIT_API_KEY")?,
            api_secret: read("BYBIT_API_SECRET")?,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Bybit v5 client. Without credentials only market data is available.
pub struct BybitClient {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl BybitClient {
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            credentials,
        })
    }

    pub fn base_url_for(testnet: bool) -> &'static str {
        if testnet {
            TESTNET_URL
        } else {
            MAINNET_URL
        }
    }

    /// Market-data-only client.
    pub fn public(testnet: bool) -> Result<Self> {
        Self::new(Self::base_url_for(testnet), None)
    }

    fn credentials(&self) -> Result<&Credentials, ExchangeError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::Credentials("private endpoint needs an API key".into()))
    }

    async fn get_public(&self, path: &str, query: &[(&str, String)]) -> Result<ApiResponse, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, query_string(query));
        debug!(url = %url, "GET");
        self.send(self.http.get(&url)).await
    }

    async fn get_signed(&self, path: &str, query: &[(&str, String)]) -> Result<ApiResponse, ExchangeError> {
        let qs = query_string(query);
        let url = format!("{}{}?{}", self.base_url, path, qs);
        debug!(url = %url, "GET (signed)");
        let req = self.authorize(self.http.get(&url), &qs)?;
        self.send(req).await
    }

    async fn post_signed<B: Serialize>(&self, path: &str, body: &B) -> Result<ApiResponse, ExchangeError> {
        let json = serde_json::to_string(body)
            .map_err(|e| ExchangeError::malformed(format!("cannot encode request: {}", e)))?;
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, body = %json, "POST");

        let req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .body(json.clone());
        let req = self.authorize(req, &json)?;
        self.send(req).await
    }

    fn authorize(&self, req: RequestBuilder, payload: &str) -> Result<RequestBuilder, ExchangeError> {
        let creds = self.credentials()?;
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign(&creds.api_secret, &timestamp, &creds.api_key, RECV_WINDOW, payload)?;

        Ok(req
            .header("X-BAPI-API-KEY", &creds.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature))
    }

    async fn send(&self, req: RequestBuilder) -> Result<ApiResponse, ExchangeError> {
        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Status { status, body });
        }

        Ok(response.json().await?)
    }

    async fn place(&self, request: CreateOrderRequest) -> Result<OrderAck, ExchangeError> {
        info!(
            symbol = %request.symbol,
            side = ?request.side,
            qty = %request.qty,
            reduce_only = request.reduce_only,
            link_id = %request.order_link_id,
            "Submitting market order"
        );
        let created: OrderCreated = self.post_signed("/v5/order/create", &request).await?.into_result()?;
        Ok(created.into())
    }
}

#[async_trait]
impl Exchange for BybitClient {
    fn name(&self) -> &str {
        if self.base_url == TESTNET_URL {
            "bybit-testnet"
        } else {
            "bybit"
        }
    }

    async fn candles(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let query = [
            ("category", LINEAR.to_string()),
            ("symbol", symbol.to_string()),
            ("interval", interval.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let resp = with_retry("kline", || self.get_public("/v5/market/kline", &query)).await?;
        resp.into_result::<KlineResult>()?.into_candles()
    }

    async fn position(&self, symbol: &str) -> Result<PositionSnapshot, ExchangeError> {
        let query = [("category", LINEAR.to_string()), ("symbol", symbol.to_string())];
        let resp = with_retry("position", || self.get_signed("/v5/position/list", &query)).await?;
        resp.into_result::<PositionList>()?.into_snapshot(symbol)
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec, ExchangeError> {
        let query = [("category", LINEAR.to_string()), ("symbol", symbol.to_string())];
        let resp = with_retry("instruments-info", || {
            self.get_public("/v5/market/instruments-info", &query)
        })
        .await?;
        resp.into_result::<InstrumentsResult>()?.into_spec(symbol)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let body = SetLeverageRequest {
            category: LINEAR.to_string(),
            symbol: symbol.to_string(),
            buy_leverage: leverage.to_string(),
            sell_leverage: leverage.to_string(),
        };
        let resp = self.post_signed("/v5/position/set-leverage", &body).await?;
        if resp.ret_code == LEVERAGE_UNCHANGED {
            debug!(symbol = %symbol, leverage, "Leverage already set");
            return Ok(());
        }
        resp.check()
    }

    async fn close_position(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        let side = OrderSide::exiting(direction)
            .ok_or_else(|| ExchangeError::malformed("cannot close a flat position"))?;
        self.place(CreateOrderRequest::market(symbol, side, quantity).reduce_only())
            .await
    }

    async fn cancel_open_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let body = CancelAllRequest {
            category: LINEAR.to_string(),
            symbol: symbol.to_string(),
        };
        self.post_signed("/v5/order/cancel-all", &body).await?.check()
    }

    async fn open_position(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
        bracket: Option<&Bracket>,
    ) -> Result<OrderAck, ExchangeError> {
        let side = OrderSide::entering(direction)
            .ok_or_else(|| ExchangeError::malformed("cannot open a flat position"))?;
        let mut request = CreateOrderRequest::market(symbol, side, quantity);
        if let Some(b) = bracket {
            request = request.with_bracket(b.take_profit, b.stop_loss);
        }
        self.place(request).await
    }
}

/// `key=value&...` in the given order. Values are plain symbols and numbers.
fn query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex HMAC-SHA256 request signature.
pub fn sign(
    secret: &str,
    timestamp: &str,
    api_key: &str,
    recv_window: &str,
    payload: &str,
) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Credentials(format!("unusable API secret: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature() {
        let sig = sign("secret", "1700000000000", "key", "5000", "category=linear&symbol=SUIUSDT").unwrap();
        assert_eq!(sig, "a5354313a589d36301d399cf39406d3a75810ae77562ed8812cd8cb4bf2fcfb2");
    }

    #[test]
    fn test_query_string_keeps_order() {
        let qs = query_string(&[
            ("category", "linear".to_string()),
            ("symbol", "SUIUSDT".to_string()),
            ("interval", "5".to_string()),
        ]);
        assert_eq!(qs, "category=linear&symbol=SUIUSDT&interval=5");
    }

    #[tokio::test]
    async fn test_private_endpoint_needs_credentials() {
        let client = BybitClient::public(true).unwrap();
        assert_eq!(client.name(), "bybit-testnet");
        let err = client.cancel_open_orders("SUIUSDT").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Credentials(_)));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials {
            api_key: "abc".into(),
            api_secret: "very-secret".into(),
        };
        assert!(!format!("{:?}", creds).contains("very-secret"));
    }
}
