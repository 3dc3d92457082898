use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lookback window accepted by the quotes source. Closed set: anything else
/// is rejected at parse time and the caller observes an absent value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "10y")]
    TenYears,
    Ytd,
    Max,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneDay => "1d",
            Period::FiveDays => "5d",
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
            Period::TenYears => "10y",
            Period::Ytd => "ytd",
            Period::Max => "max",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" => Ok(Period::OneDay),
            "5d" => Ok(Period::FiveDays),
            "1mo" => Ok(Period::OneMonth),
            "3mo" => Ok(Period::ThreeMonths),
            "6mo" => Ok(Period::SixMonths),
            "1y" => Ok(Period::OneYear),
            "2y" => Ok(Period::TwoYears),
            "5y" => Ok(Period::FiveYears),
            "10y" => Ok(Period::TenYears),
            "ytd" => Ok(Period::Ytd),
            "max" => Ok(Period::Max),
            _ => Err(()),
        }
    }
}

/// Current price snapshot for one ticker.
///
/// Every data field is optional: the upstream source routinely omits
/// fields, and absence is signalled by None rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSnapshot {
    pub ticker: String,
    pub current_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub volume: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fundamentals {
    pub ticker: String,
    pub company_name: Option<String>,
    pub market_cap: Option<u64>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub fifty_day_avg: Option<f64>,
    pub two_hundred_day_avg: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub date: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceHistory {
    pub ticker: String,
    pub period: Period,
    pub prices: Vec<PricePoint>,
}

impl PriceHistory {
    /// Non-missing closes in chronological order.
    pub fn closes(&self) -> Vec<f64> {
        self.prices.iter().filter_map(|p| p.close).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceChange {
    pub ticker: String,
    pub period: Period,
    pub current_price: Option<f64>,
    pub previous_price: Option<f64>,
    pub change_amount: Option<f64>,
    pub change_percent: Option<f64>,
}

/// One computed technical indicator value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechnicalReading {
    pub ticker: String,
    pub indicator: String,
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Parameters the value was computed with (window, period, ...).
    pub parameters: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceEntry {
    pub ticker: String,
    pub metric: String,
    pub value: Option<f64>,
}

/// Cross-ticker comparison, results sorted by value descending with
/// missing values last.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceComparison {
    pub tickers: Vec<String>,
    pub metric: String,
    pub period: Period,
    pub results: Vec<PerformanceEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parse_known_values() {
        for s in [
            "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
        ] {
            let period: Period = s.parse().unwrap();
            assert_eq!(period.as_str(), s);
        }
    }

    #[test]
    fn period_parse_unknown_is_err() {
        assert!("7d".parse::<Period>().is_err());
        assert!("".parse::<Period>().is_err());
        assert!("1D".parse::<Period>().is_err());
    }

    #[test]
    fn period_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Period::OneMonth).unwrap(), "\"1mo\"");
        assert_eq!(serde_json::to_string(&Period::Ytd).unwrap(), "\"ytd\"");
        let p: Period = serde_json::from_str("\"5d\"").unwrap();
        assert_eq!(p, Period::FiveDays);
    }

    #[test]
    fn snapshot_with_missing_fields_roundtrips() {
        let snapshot = PriceSnapshot {
            ticker: "AAPL".to_string(),
            current_price: Some(189.95),
            previous_close: None,
            day_high: None,
            day_low: None,
            volume: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: PriceSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, parsed);
    }

    #[test]
    fn history_closes_skip_gaps() {
        let history = PriceHistory {
            ticker: "AAPL".to_string(),
            period: Period::FiveDays,
            prices: vec![
                PricePoint {
                    date: Utc::now(),
                    open: None,
                    high: None,
                    low: None,
                    close: Some(100.0),
                    volume: None,
                },
                PricePoint {
                    date: Utc::now(),
                    open: None,
                    high: None,
                    low: None,
                    close: None,
                    volume: None,
                },
                PricePoint {
                    date: Utc::now(),
                    open: None,
                    high: None,
                    low: None,
                    close: Some(102.5),
                    volume: None,
                },
            ],
        };
        assert_eq!(history.closes(), vec![100.0, 102.5]);
    }
}
