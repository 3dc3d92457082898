use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use entropy_models::{Fundamentals, Period, PriceHistory, PricePoint, PriceSnapshot};

use crate::error::MarketError;

/// External quotes source. Implementations never raise: an invalid ticker,
/// insufficient history, or a transport failure all surface as `None`.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn quote(&self, ticker: &str) -> Option<PriceSnapshot>;

    async fn fundamentals(&self, ticker: &str) -> Option<Fundamentals>;

    async fn history(&self, ticker: &str, period: Period) -> Option<PriceHistory>;
}

/// Quotes source backed by the public Yahoo Finance chart API.
pub struct YahooQuotes {
    client: reqwest::Client,
    base_url: String,
}

impl YahooQuotes {
    pub fn new() -> Self {
        Self::with_base_url("https://query1.finance.yahoo.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("entropy/0.1")
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn fetch_chart(&self, ticker: &str, range: &str) -> Result<ChartResult, MarketError> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval=1d",
            self.base_url, ticker, range
        );
        debug!(ticker, range, "Fetching chart data");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MarketError::Transport(format!(
                "chart request returned {}",
                response.status()
            )));
        }

        let envelope: ChartEnvelope = response.json().await?;
        envelope
            .chart
            .result
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            })
            .ok_or_else(|| MarketError::Payload("empty chart result".to_string()))
    }

    async fn fetch_summary(&self, ticker: &str) -> Result<serde_json::Value, MarketError> {
        let url = format!(
            "{}/v10/finance/quoteSummary/{}?modules=summaryDetail,assetProfile,price",
            self.base_url, ticker
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MarketError::Transport(format!(
                "summary request returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response.json().await?;
        body.pointer("/quoteSummary/result/0")
            .cloned()
            .ok_or_else(|| MarketError::Payload("empty summary result".to_string()))
    }
}

impl Default for YahooQuotes {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteProvider for YahooQuotes {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn quote(&self, ticker: &str) -> Option<PriceSnapshot> {
        match self.fetch_chart(ticker, "1d").await {
            Ok(chart) => {
                let meta = chart.meta;
                Some(PriceSnapshot {
                    ticker: ticker.to_uppercase(),
                    current_price: meta.regular_market_price,
                    previous_close: meta
                        .regular_market_previous_close
                        .or(meta.chart_previous_close),
                    day_high: meta.regular_market_day_high,
                    day_low: meta.regular_market_day_low,
                    volume: meta.regular_market_volume,
                    timestamp: Utc::now(),
                })
            }
            Err(e) => {
                warn!(ticker, error = %e, "Quote lookup failed");
                None
            }
        }
    }

    async fn fundamentals(&self, ticker: &str) -> Option<Fundamentals> {
        match self.fetch_summary(ticker).await {
            Ok(summary) => {
                let raw_f64 = |path: &str| summary.pointer(path).and_then(|v| v.as_f64());
                let raw_u64 = |path: &str| summary.pointer(path).and_then(|v| v.as_u64());
                let raw_str = |path: &str| {
                    summary
                        .pointer(path)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                Some(Fundamentals {
                    ticker: ticker.to_uppercase(),
                    company_name: raw_str("/price/longName"),
                    market_cap: raw_u64("/price/marketCap/raw"),
                    sector: raw_str("/assetProfile/sector"),
                    industry: raw_str("/assetProfile/industry"),
                    fifty_day_avg: raw_f64("/summaryDetail/fiftyDayAverage/raw"),
                    two_hundred_day_avg: raw_f64("/summaryDetail/twoHundredDayAverage/raw"),
                    fifty_two_week_high: raw_f64("/summaryDetail/fiftyTwoWeekHigh/raw"),
                    fifty_two_week_low: raw_f64("/summaryDetail/fiftyTwoWeekLow/raw"),
                })
            }
            Err(e) => {
                warn!(ticker, error = %e, "Fundamentals lookup failed");
                None
            }
        }
    }

    async fn history(&self, ticker: &str, period: Period) -> Option<PriceHistory> {
        match self.fetch_chart(ticker, period.as_str()).await {
            Ok(chart) => {
                let quote = chart.indicators.quote.into_iter().next()?;
                let timestamps = chart.timestamp.unwrap_or_default();
                let prices: Vec<PricePoint> = timestamps
                    .iter()
                    .enumerate()
                    .filter_map(|(i, ts)| {
                        let date: DateTime<Utc> = DateTime::from_timestamp(*ts, 0)?;
                        Some(PricePoint {
                            date,
                            open: quote.open.get(i).copied().flatten(),
                            high: quote.high.get(i).copied().flatten(),
                            low: quote.low.get(i).copied().flatten(),
                            close: quote.close.get(i).copied().flatten(),
                            volume: quote.volume.get(i).copied().flatten(),
                        })
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
            Err(e) => {
                warn!(ticker, period = %period, error = %e, "History lookup failed");
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
}

#[derive(Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    regular_market_previous_close: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_volume: Option<u64>,
}

#[derive(Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ChartQuote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}
