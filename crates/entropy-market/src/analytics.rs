use chrono::NaiveDate;
use tracing::debug;

use entropy_models::{PerformanceComparison, PerformanceEntry, Period, PriceChange};

use crate::provider::QuoteProvider;

/// Price movement over a period: first close vs. latest close.
pub async fn price_change(
    provider: &dyn QuoteProvider,
    ticker: &str,
    period: Period,
) -> Option<PriceChange> {
    let history = provider.history(ticker, period).await?;
    let closes = history.closes();
    if closes.len() < 2 {
        return None;
    }
    let previous = closes[0];
    let current = *closes.last()?;
    let change_amount = current - previous;
    let change_percent = if previous != 0.0 {
        Some(change_amount / previous * 100.0)
    } else {
        None
    };

    Some(PriceChange {
        ticker: ticker.to_uppercase(),
        period,
        current_price: Some(current),
        previous_price: Some(previous),
        change_amount: Some(change_amount),
        change_percent,
    })
}

/// Compare a metric across tickers. Results sort descending; tickers the
/// source had no data for sort last with an absent value.
pub async fn compare_performance(
    provider: &dyn QuoteProvider,
    tickers: &[String],
    metric: &str,
    period: Period,
) -> Option<PerformanceComparison> {
    let mut results = Vec::with_capacity(tickers.len());

    for ticker in tickers {
        let value = match metric {
            "price_change_percent" => price_change(provider, ticker, period)
                .await
                .and_then(|c| c.change_percent),
            "price_change_amount" => price_change(provider, ticker, period)
                .await
                .and_then(|c| c.change_amount),
            "current_price" => provider
                .quote(ticker)
                .await
                .and_then(|q| q.current_price),
            "volume" => provider
                .quote(ticker)
                .await
                .and_then(|q| q.volume.map(|v| v as f64)),
            _ => {
                debug!(metric, "Unknown comparison metric");
                return None;
            }
        };
        results.push(PerformanceEntry {
            ticker: ticker.to_uppercase(),
            metric: metric.to_string(),
            value,
        });
    }

    results.sort_by(|a, b| {
        let av = a.value.unwrap_or(f64::NEG_INFINITY);
        let bv = b.value.unwrap_or(f64::NEG_INFINITY);
        bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
    });

    Some(PerformanceComparison {
        tickers: tickers.iter().map(|t| t.to_uppercase()).collect(),
        metric: metric.to_string(),
        period,
        results,
    })
}

/// Top `n` tickers by a metric.
pub async fn top_performers(
    provider: &dyn QuoteProvider,
    tickers: &[String],
    metric: &str,
    period: Period,
    n: usize,
) -> Vec<PerformanceEntry> {
    match compare_performance(provider, tickers, metric, period).await {
        Some(comparison) => comparison.results.into_iter().take(n).collect(),
        None => Vec::new(),
    }
}

/// Percent return between two dates, using the closest available closes
/// inside a one-year window (falls back to the window edges when a date
/// has no bar).
pub async fn returns(
    provider: &dyn QuoteProvider,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Option<f64> {
    let history = provider.history(ticker, Period::OneYear).await?;
    if history.prices.len() < 2 {
        return None;
    }

    let close_on = |date: NaiveDate| -> Option<f64> {
        history
            .prices
            .iter()
            .find(|p| p.date.date_naive() == date)
            .and_then(|p| p.close)
    };

    let start_price = close_on(start).or_else(|| history.prices.first().and_then(|p| p.close))?;
    let end_price = close_on(end).or_else(|| history.prices.last().and_then(|p| p.close))?;

    if start_price == 0.0 {
        return None;
    }
    Some((end_price - start_price) / start_price * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticQuotes;

    fn provider() -> StaticQuotes {
        StaticQuotes::new()
            .with_closes("AAPL", &[180.0, 182.0, 185.0, 189.95])
            .with_closes("MSFT", &[400.0, 398.0, 396.0, 390.0])
            .with_price("AAPL", 189.95)
            .with_price("MSFT", 390.0)
    }

    #[tokio::test]
    async fn price_change_computes_span() {
        let provider = provider();
        let change = price_change(&provider, "AAPL", Period::FiveDays)
            .await
            .unwrap();
        assert_eq!(change.previous_price, Some(180.0));
        assert_eq!(change.current_price, Some(189.95));
        let pct = change.change_percent.unwrap();
        assert!((pct - 5.527).abs() < 0.01, "pct was {pct}");
    }

    #[tokio::test]
    async fn price_change_unknown_ticker_is_absent() {
        let provider = provider();
        assert!(price_change(&provider, "ZZZZ", Period::OneDay).await.is_none());
    }

    #[tokio::test]
    async fn compare_sorts_descending_with_missing_last() {
        let provider = provider();
        let tickers = vec![
            "MSFT".to_string(),
            "ZZZZ".to_string(),
            "AAPL".to_string(),
        ];
        let comparison =
            compare_performance(&provider, &tickers, "price_change_percent", Period::FiveDays)
                .await
                .unwrap();

        assert_eq!(comparison.results[0].ticker, "AAPL"); // up ~5.5%
        assert_eq!(comparison.results[1].ticker, "MSFT"); // down
        assert_eq!(comparison.results[2].ticker, "ZZZZ");
        assert!(comparison.results[2].value.is_none());
    }

    #[tokio::test]
    async fn compare_unknown_metric_is_absent() {
        let provider = provider();
        let tickers = vec!["AAPL".to_string()];
        assert!(
            compare_performance(&provider, &tickers, "sharpe", Period::OneDay)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn top_performers_truncates() {
        let provider = provider();
        let tickers = vec!["AAPL".to_string(), "MSFT".to_string()];
        let top = top_performers(&provider, &tickers, "current_price", Period::OneDay, 1).await;
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].ticker, "MSFT"); // 390 < 189.95 is false; highest price first
    }

    #[tokio::test]
    async fn returns_falls_back_to_window_edges() {
        let provider = provider();
        let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2000, 2, 1).unwrap();
        // Neither date exists in the fixture history: falls back to
        // first/last closes.
        let value = returns(&provider, "AAPL", start, end).await.unwrap();
        assert!((value - 5.527).abs() < 0.01, "returns was {value}");
    }
}
