//! OHLCV candles and the kline intervals the exchange accepts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kline interval as spelled by the Bybit v5 API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
    W1,
}

impl KlineInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::M1 => "1",
            KlineInterval::M3 => "3",
            KlineInterval::M5 => "5",
            KlineInterval::M15 => "15",
            KlineInterval::M30 => "30",
            KlineInterval::H1 => "60",
            KlineInterval::H2 => "120",
            KlineInterval::H4 => "240",
            KlineInterval::H6 => "360",
            KlineInterval::H12 => "720",
            KlineInterval::D1 => "D",
            KlineInterval::W1 => "W",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            KlineInterval::M1 => Duration::minutes(1),
            KlineInterval::M3 => Duration::minutes(3),
            KlineInterval::M5 => Duration::minutes(5),
            KlineInterval::M15 => Duration::minutes(15),
            KlineInterval::M30 => Duration::minutes(30),
            KlineInterval::H1 => Duration::hours(1),
            KlineInterval::H2 => Duration::hours(2),
            KlineInterval::H4 => Duration::hours(4),
            KlineInterval::H6 => Duration::hours(6),
            KlineInterval::H12 => Duration::hours(12),
            KlineInterval::D1 => Duration::days(1),
            KlineInterval::W1 => Duration::weeks(1),
        }
    }
}

impl FromStr for KlineInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "1" | "1M" => Ok(KlineInterval::M1),
            "3" | "3M" => Ok(KlineInterval::M3),
            "5" | "5M" => Ok(KlineInterval::M5),
            "15" | "15M" => Ok(KlineInterval::M15),
            "30" | "30M" => Ok(KlineInterval::M30),
            "60" | "1H" => Ok(KlineInterval::H1),
            "120" | "2H" => Ok(KlineInterval::H2),
            "240" | "4H" => Ok(KlineInterval::H4),
            "360" | "6H" => Ok(KlineInterval::H6),
            "720" | "12H" => Ok(KlineInterval::H12),
            "D" | "1D" => Ok(KlineInterval::D1),
            "W" | "1W" => Ok(KlineInterval::W1),
            other => Err(format!("unsupported kline interval: {}", other)),
        }
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time
    pub start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Whether the bar has fully closed at `now`.
    pub fn is_closed(&self, interval: KlineInterval, now: DateTime<Utc>) -> bool {
        self.start + interval.duration() <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_interval_parsing() {
        assert_eq!("5".parse::<KlineInterval>().unwrap(), KlineInterval::M5);
        assert_eq!("4h".parse::<KlineInterval>().unwrap(), KlineInterval::H4);
        assert_eq!(KlineInterval::H4.as_str(), "240");
        assert!("7".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn test_cli_interval_codes() {
        for code in ["1", "3", "5", "15", "30", "60", "120", "240", "360", "720", "D", "W"] {
            let interval = code.parse::<KlineInterval>().unwrap();
            assert_eq!(interval.as_str(), code);
        }
        // Monthly bars are not offered
        assert!("M".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn test_candle_closed() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let candle = Candle {
            start,
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: dec!(0),
        };

        assert!(!candle.is_closed(KlineInterval::M5, start + Duration::minutes(4)));
        assert!(candle.is_closed(KlineInterval::M5, start + Duration::minutes(5)));
    }
}
