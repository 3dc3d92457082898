//! Deterministic in-memory quote source for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use entropy_models::{Fundamentals, Period, PriceHistory, PricePoint, PriceSnapshot};

use crate::provider::QuoteProvider;

/// HashMap-backed provider: returns whatever was seeded, absent otherwise.
#[derive(Default)]
pub struct StaticQuotes {
    prices: HashMap<String, PriceSnapshot>,
    fundamentals: HashMap<String, Fundamentals>,
    closes: HashMap<String, Vec<f64>>,
}

impl StaticQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, ticker: &str, price: f64) -> Self {
        self.prices.insert(
            ticker.to_uppercase(),
            PriceSnapshot {
                ticker: ticker.to_uppercase(),
                current_price: Some(price),
                previous_close: Some(price * 0.99),
                day_high: Some(price * 1.01),
                day_low: Some(price * 0.98),
                volume: Some(1_000_000),
                timestamp: Utc::now(),
            },
        );
        self
    }

    pub fn with_fundamentals(mut self, fundamentals: Fundamentals) -> Self {
        self.fundamentals
            .insert(fundamentals.ticker.clone(), fundamentals);
        self
    }

    /// Seed a daily close series, oldest first. All periods serve the same
    /// series; signal helpers only care about the tail.
    pub fn with_closes(mut self, ticker: &str, closes: &[f64]) -> Self {
        self.closes.insert(ticker.to_uppercase(), closes.to_vec());
        self
    }
}

#[async_trait]
impl QuoteProvider for StaticQuotes {
    fn name(&self) -> &str {
        "static"
    }

    async fn quote(&self, ticker: &str) -> Option<PriceSnapshot> {
        self.prices.get(&ticker.to_uppercase()).cloned()
    }

    async fn fundamentals(&self, ticker: &str) -> Option<Fundamentals> {
        self.fundamentals.get(&ticker.to_uppercase()).cloned()
    }

    async fn history(&self, ticker: &str, period: Period) -> Option<PriceHistory> {
        let closes = self.closes.get(&ticker.to_uppercase())?;
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 21, 0, 0).unwrap();
        let prices: Vec<PricePoint> = closes
            .iter()
            .enumerate()
            .map(|(i, close)| PricePoint {
                date: base + Duration::days(i as i64),
                open: Some(close - 0.5),
                high: Some(close + 0.5),
                low: Some(close - 1.0),
                close: Some(*close),
                volume: Some(1_000_000),
            })
            .collect();
        if prices.is_empty() {
            return None;
        }
        Some(PriceHistory {
            ticker: ticker.to_uppercase(),
            period,
            prices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals;

    #[tokio::test]
    async fn seeded_quote_is_served() {
        let provider = StaticQuotes::new().with_price("AAPL", 189.95);
        let snapshot = provider.quote("aapl").await.unwrap();
        assert_eq!(snapshot.current_price, Some(189.95));
    }

    #[tokio::test]
    async fn unseeded_ticker_is_absent() {
        let provider = StaticQuotes::new();
        assert!(provider.quote("ZZZZ").await.is_none());
        assert!(provider.history("ZZZZ", Period::OneDay).await.is_none());
    }

    #[tokio::test]
    async fn signal_wrappers_work_against_static_history() {
        let closes: Vec<f64> = (1..=60).map(|i| 100.0 + i as f64).collect();
        let provider = StaticQuotes::new().with_closes("NVDA", &closes);

        let rsi = signals::calculate_rsi(&provider, "NVDA", 14).await.unwrap();
        assert_eq!(rsi.indicator, "RSI");
        assert_eq!(rsi.value, Some(100.0)); // strictly rising series

        let macd = signals::calculate_macd(&provider, "NVDA").await.unwrap();
        assert!(macd.value.unwrap() > 0.0);

        // Not enough closes for a 200-day view.
        assert!(signals::detect_golden_cross(&provider, "NVDA").await.is_none());
    }
}
