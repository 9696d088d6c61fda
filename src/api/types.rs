//! Bybit v5 wire types and their conversion into domain models.
//!
//! Every v5 response shares the `{retCode, retMsg, result, time}` envelope;
//! `result` is only parsed after `retCode` has been checked. Numbers arrive
//! as strings and are parsed into `Decimal` here, never as floats.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ExchangeError;
use crate::models::{Candle, Direction, InstrumentSpec, OrderAck, PositionSnapshot};

/// Product category for USDT-margined perpetuals.
pub const LINEAR: &str = "linear";

/// Response envelope shared by every v5 endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl ApiResponse {
    /// Fail on a non-zero `retCode`, otherwise parse `result` as `T`.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, ExchangeError> {
        self.check()?;
        serde_json::from_value(self.result)
            .map_err(|e| ExchangeError::malformed(format!("unexpected result shape: {}", e)))
    }

    pub fn check(&self) -> Result<(), ExchangeError> {
        if self.ret_code != 0 {
            return Err(ExchangeError::Api {
                code: self.ret_code,
                message: self.ret_msg.clone(),
            });
        }
        Ok(())
    }
}

/// `GET /v5/market/kline` result. Rows are newest first:
/// `[startTime, open, high, low, close, volume, turnover]`.
#[derive(Debug, Clone, Deserialize)]
pub struct KlineResult {
    pub list: Vec<Vec<String>>,
}

impl KlineResult {
    pub fn into_candles(self) -> Result<Vec<Candle>, ExchangeError> {
        self.list.iter().map(|row| parse_kline_row(row)).collect()
    }
}

fn parse_kline_row(row: &[String]) -> Result<Candle, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::malformed(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let start_ms: i64 = row[0]
        .parse()
        .map_err(|_| ExchangeError::malformed(format!("bad kline start time {:?}", row[0])))?;

    Ok(Candle {
        start: millis_to_utc(start_ms)?,
        open: parse_decimal("open", &row[1])?,
        high: parse_decimal("high", &row[2])?,
        low: parse_decimal("low", &row[3])?,
        close: parse_decimal("close", &row[4])?,
        volume: parse_decimal("volume", &row[5])?,
    })
}

/// `GET /v5/position/list` result.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionList {
    pub list: Vec<PositionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub symbol: String,
    /// "Buy", "Sell", or "" when flat
    #[serde(default)]
    pub side: String,
    pub size: String,
    /// "" or "0" when there is no entry
    pub avg_price: String,
    #[serde(default)]
    pub position_idx: i32,
}

impl PositionList {
    /// Collapse the entries for `symbol` into one one-way snapshot.
    ///
    /// A non-flat entry on a hedge-mode slot (`positionIdx` 1 or 2) is
    /// rejected: orders are always sent for the one-way slot.
    pub fn into_snapshot(self, symbol: &str) -> Result<PositionSnapshot, ExchangeError> {
        let mut open = Vec::new();
        for info in self.list.into_iter().filter(|p| p.symbol == symbol) {
            let size = parse_decimal("size", &info.size)?;
            if size > Decimal::ZERO {
                if info.position_idx != 0 {
                    return Err(ExchangeError::malformed(format!(
                        "{} position on positionIdx {} (hedge mode is not supported)",
                        symbol, info.position_idx
                    )));
                }
                open.push((info, size));
            }
        }

        if open.len() > 1 {
            return Err(ExchangeError::malformed(format!(
                "{} non-flat entries for {} (hedge mode is not supported)",
                open.len(),
                symbol
            )));
        }

        let Some((info, size)) = open.pop() else {
            return Ok(PositionSnapshot::flat(symbol));
        };

        let direction = match info.side.as_str() {
            "Buy" => Direction::Long,
            "Sell" => Direction::Short,
            other => {
                return Err(ExchangeError::malformed(format!(
                    "position side {:?} with size {}",
                    other, size
                )))
            }
        };
        let entry = match info.avg_price.trim() {
            "" => None,
            raw => Some(parse_decimal("avgPrice", raw)?).filter(|p| !p.is_zero()),
        };

        PositionSnapshot::new(symbol, direction, size, entry)
    }
}

/// `GET /v5/market/instruments-info` result.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentsResult {
    pub list: Vec<InstrumentInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub symbol: String,
    pub price_scale: String,
    pub price_filter: PriceFilter,
    pub lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    pub tick_size: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    pub qty_step: String,
    pub min_order_qty: String,
}

impl InstrumentsResult {
    pub fn into_spec(self, symbol: &str) -> Result<InstrumentSpec, ExchangeError> {
        let info = self
            .list
            .into_iter()
            .find(|i| i.symbol == symbol)
            .ok_or_else(|| ExchangeError::malformed(format!("instrument {} not listed", symbol)))?;

        let price_scale = info
            .price_scale
            .parse()
            .map_err(|_| ExchangeError::malformed(format!("bad priceScale {:?}", info.price_scale)))?;

        Ok(InstrumentSpec {
            symbol: info.symbol,
            price_scale,
            tick_size: parse_decimal("tickSize", &info.price_filter.tick_size)?,
            qty_step: parse_decimal("qtyStep", &info.lot_size_filter.qty_step)?,
            min_order_qty: parse_decimal("minOrderQty", &info.lot_size_filter.min_order_qty)?,
        })
    }
}

/// Order side as Bybit spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that opens or adds to `direction`.
    pub fn entering(direction: Direction) -> Option<Self> {
        match direction {
            Direction::Long => Some(OrderSide::Buy),
            Direction::Short => Some(OrderSide::Sell),
            Direction::Flat => None,
        }
    }

    /// Side that reduces a position held in `direction`.
    pub fn exiting(direction: Direction) -> Option<Self> {
        Self::entering(direction.opposite())
    }
}

/// `POST /v5/order/create` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub category: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: String,
    pub qty: String,
    /// One-way mode
    pub position_idx: u8,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reduce_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_trigger_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_trigger_by: Option<String>,
    pub order_link_id: String,
}

impl CreateOrderRequest {
    pub fn market(symbol: &str, side: OrderSide, qty: Decimal) -> Self {
        Self {
            category: LINEAR.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: "Market".to_string(),
            qty: qty.normalize().to_string(),
            position_idx: 0,
            reduce_only: false,
            take_profit: None,
            stop_loss: None,
            tp_trigger_by: None,
            sl_trigger_by: None,
            order_link_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    /// Attach TP/SL legs, triggered on last traded price.
    pub fn with_bracket(mut self, take_profit: Option<Decimal>, stop_loss: Option<Decimal>) -> Self {
        if let Some(tp) = take_profit {
            self.take_profit = Some(tp.to_string());
            self.tp_trigger_by = Some("LastPrice".to_string());
        }
        if let Some(sl) = stop_loss {
            self.stop_loss = Some(sl.to_string());
            self.sl_trigger_by = Some("LastPrice".to_string());
        }
        self
    }
}

/// `POST /v5/order/cancel-all` body.
#[derive(Debug, Clone, Serialize)]
pub struct CancelAllRequest {
    pub category: String,
    pub symbol: String,
}

/// `POST /v5/position/set-leverage` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLeverageRequest {
    pub category: String,
    pub symbol: String,
    pub buy_leverage: String,
    pub sell_leverage: String,
}

/// `POST /v5/order/create` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}

impl From<OrderCreated> for OrderAck {
    fn from(created: OrderCreated) -> Self {
        OrderAck {
            order_id: created.order_id,
            order_link_id: created.order_link_id,
        }
    }
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw)
        .map_err(|_| ExchangeError::malformed(format!("{} is not a number: {:?}", field, raw)))
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, ExchangeError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ExchangeError::malformed(format!("timestamp {} out of range", ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn envelope(json: &str) -> ApiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_kline_parsing() {
        let resp = envelope(
            r#"{"retCode":0,"retMsg":"OK","result":{"symbol":"SUIUSDT","category":"linear","list":[
                ["1709251500000","1.6010","1.6050","1.5990","1.6020","120340","192830.1"],
                ["1709251200000","1.5980","1.6030","1.5960","1.6010","98000","156800.0"]
            ]},"time":1709251620000}"#,
        );
        let candles = resp.into_result::<KlineResult>().unwrap().into_candles().unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, dec!(1.6020));
        assert_eq!(candles[0].start.timestamp_millis(), 1709251500000);
        assert!(candles[0].start > candles[1].start);
    }

    #[test]
    fn test_error_envelope_is_not_parsed() {
        let resp = envelope(r#"{"retCode":10001,"retMsg":"params error","result":{},"time":1}"#);
        match resp.into_result::<KlineResult>() {
            Err(ExchangeError::Api { code, message }) => {
                assert_eq!(code, 10001);
                assert_eq!(message, "params error");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn test_flat_position() {
        let resp = envelope(
            r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                {"symbol":"SUIUSDT","side":"","size":"0","avgPrice":"0","positionIdx":0}
            ]}}"#,
        );
        let snapshot = resp.into_result::<PositionList>().unwrap().into_snapshot("SUIUSDT").unwrap();
        assert!(snapshot.is_flat());
        assert_eq!(snapshot.size, Decimal::ZERO);
    }

    #[test]
    fn test_short_position() {
        let resp = envelope(
            r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                {"symbol":"SUIUSDT","side":"Sell","size":"10","avgPrice":"1.6012","positionIdx":0}
            ]}}"#,
        );
        let snapshot = resp.into_result::<PositionList>().unwrap().into_snapshot("SUIUSDT").unwrap();
        assert_eq!(snapshot.direction, Direction::Short);
        assert_eq!(snapshot.size, dec!(10));
        assert_eq!(snapshot.entry_price, Some(dec!(1.6012)));
    }

    #[test]
    fn test_hedge_mode_is_malformed() {
        let list = PositionList {
            list: vec![
                PositionInfo {
                    symbol: "SUIUSDT".into(),
                    side: "Buy".into(),
                    size: "5".into(),
                    avg_price: "1.6".into(),
                    position_idx: 1,
                },
                PositionInfo {
                    symbol: "SUIUSDT".into(),
                    side: "Sell".into(),
                    size: "3".into(),
                    avg_price: "1.7".into(),
                    position_idx: 2,
                },
            ],
        };
        assert!(matches!(list.into_snapshot("SUIUSDT"), Err(ExchangeError::Malformed(_))));
    }

    #[test]
    fn test_single_hedge_leg_is_malformed() {
        let resp = envelope(
            r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                {"symbol":"SUIUSDT","side":"Buy","size":"5","avgPrice":"1.6","positionIdx":1},
                {"symbol":"SUIUSDT","side":"","size":"0","avgPrice":"0","positionIdx":2}
            ]}}"#,
        );
        let result = resp.into_result::<PositionList>().unwrap().into_snapshot("SUIUSDT");
        assert!(matches!(result, Err(ExchangeError::Malformed(_))));
    }

    #[test]
    fn test_bad_avg_price_is_malformed() {
        let resp = envelope(
            r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                {"symbol":"SUIUSDT","side":"Buy","size":"5","avgPrice":"not-a-number","positionIdx":0}
            ]}}"#,
        );
        let result = resp.into_result::<PositionList>().unwrap().into_snapshot("SUIUSDT");
        assert!(matches!(result, Err(ExchangeError::Malformed(_))));
    }

    #[test]
    fn test_missing_avg_price_is_malformed() {
        let resp = envelope(
            r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                {"symbol":"SUIUSDT","side":"Buy","size":"5","positionIdx":0}
            ]}}"#,
        );
        assert!(matches!(
            resp.into_result::<PositionList>(),
            Err(ExchangeError::Malformed(_))
        ));
    }

    #[test]
    fn test_zero_avg_price_means_no_entry() {
        let resp = envelope(
            r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                {"symbol":"SUIUSDT","side":"Buy","size":"5","avgPrice":"0","positionIdx":0}
            ]}}"#,
        );
        let snapshot = resp.into_result::<PositionList>().unwrap().into_snapshot("SUIUSDT").unwrap();
        assert_eq!(snapshot.entry_price, None);
    }

    #[test]
    fn test_sideless_position_is_malformed() {
        let list = PositionList {
            list: vec![PositionInfo {
                symbol: "SUIUSDT".into(),
                side: "".into(),
                size: "5".into(),
                avg_price: String::new(),
                position_idx: 0,
            }],
        };
        assert!(list.into_snapshot("SUIUSDT").is_err());
    }

    #[test]
    fn test_instrument_spec() {
        let resp = envelope(
            r#"{"retCode":0,"retMsg":"OK","result":{"category":"linear","list":[{
                "symbol":"SUIUSDT","priceScale":"4",
                "priceFilter":{"minPrice":"0.0001","maxPrice":"199.9998","tickSize":"0.0001"},
                "lotSizeFilter":{"maxOrderQty":"1000000","minOrderQty":"10","qtyStep":"10"}
            }]}}"#,
        );
        let spec = resp.into_result::<InstrumentsResult>().unwrap().into_spec("SUIUSDT").unwrap();
        assert_eq!(spec.price_scale, 4);
        assert_eq!(spec.qty_step, dec!(10));
        assert_eq!(spec.min_order_qty, dec!(10));
    }

    #[test]
    fn test_order_request_body() {
        let req = CreateOrderRequest::market("SUIUSDT", OrderSide::Buy, dec!(10.0))
            .with_bracket(Some(dec!(1.65)), Some(dec!(1.58)));
        let body = serde_json::to_value(&req).unwrap();

        assert_eq!(body["category"], "linear");
        assert_eq!(body["side"], "Buy");
        assert_eq!(body["orderType"], "Market");
        assert_eq!(body["qty"], "10");
        assert_eq!(body["takeProfit"], "1.65");
        assert_eq!(body["slTriggerBy"], "LastPrice");
        assert!(body.get("reduceOnly").is_none());

        let close = CreateOrderRequest::market("SUIUSDT", OrderSide::Sell, dec!(10)).reduce_only();
        let body = serde_json::to_value(&close).unwrap();
        assert_eq!(body["reduceOnly"], true);
        assert!(body.get("takeProfit").is_none());
    }

    #[test]
    fn test_order_sides() {
        assert_eq!(OrderSide::entering(Direction::Long), Some(OrderSide::Buy));
        assert_eq!(OrderSide::exiting(Direction::Long), Some(OrderSide::Sell));
        assert_eq!(OrderSide::exiting(Direction::Flat), None);
    }
}
