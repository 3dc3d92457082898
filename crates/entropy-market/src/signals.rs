use std::collections::HashMap;

use chrono::Utc;

use entropy_models::{Period, TechnicalReading};

use crate::provider::QuoteProvider;

/// Simple moving average of the final `window` closes.
pub fn sma(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.len() < window {
        return None;
    }
    let tail = &closes[closes.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// Exponential moving average, alpha = 2 / (span + 1), seeded from the
/// first close (no adjustment), evaluated over the whole series.
pub fn ema(closes: &[f64], span: usize) -> Option<f64> {
    if span == 0 || closes.len() < span {
        return None;
    }
    Some(ema_series(closes, span).pop()?)
}

fn ema_series(closes: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(closes.len());
    let mut current = match closes.first() {
        Some(first) => *first,
        None => return out,
    };
    out.push(current);
    for close in &closes[1..] {
        current = alpha * close + (1.0 - alpha) * current;
        out.push(current);
    }
    out
}

/// Relative Strength Index over the final `period` deltas, 0-100.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let tail = &deltas[deltas.len() - period..];
    let avg_gain = tail.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let avg_loss = -tail.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        // Flat or monotonically rising window.
        return if avg_gain == 0.0 {
            None
        } else {
            Some(100.0)
        };
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line: 12-period EMA minus 26-period EMA, final value.
pub fn macd(closes: &[f64]) -> Option<f64> {
    if closes.len() < 26 {
        return None;
    }
    let fast = ema_series(closes, 12);
    let slow = ema_series(closes, 26);
    Some(fast.last()? - slow.last()?)
}

/// Whether the 50-day SMA crossed above the 200-day SMA between the last
/// two points of the series.
pub fn golden_cross(closes: &[f64]) -> Option<bool> {
    if closes.len() < 201 {
        return None;
    }
    let now = closes;
    let prev = &closes[..closes.len() - 1];
    let (sma50_now, sma200_now) = (sma(now, 50)?, sma(now, 200)?);
    let (sma50_prev, sma200_prev) = (sma(prev, 50)?, sma(prev, 200)?);
    Some(sma50_prev <= sma200_prev && sma50_now > sma200_now)
}

fn reading(ticker: &str, indicator: &str, value: f64, parameters: &[(&str, i64)]) -> TechnicalReading {
    TechnicalReading {
        ticker: ticker.to_uppercase(),
        indicator: indicator.to_string(),
        value: Some(value),
        timestamp: Utc::now(),
        parameters: parameters
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<HashMap<_, _>>(),
    }
}

async fn closes_for(
    provider: &dyn QuoteProvider,
    ticker: &str,
    period: Period,
    min_len: usize,
) -> Option<Vec<f64>> {
    let history = provider.history(ticker, period).await?;
    let closes = history.closes();
    if closes.len() < min_len {
        return None;
    }
    Some(closes)
}

/// SMA for a ticker. Windows over 50 need a year of history.
pub async fn calculate_sma(
    provider: &dyn QuoteProvider,
    ticker: &str,
    window: usize,
) -> Option<TechnicalReading> {
    let period = if window <= 50 {
        Period::SixMonths
    } else {
        Period::OneYear
    };
    let closes = closes_for(provider, ticker, period, window).await?;
    let value = sma(&closes, window)?;
    Some(reading(ticker, "SMA", value, &[("window", window as i64)]))
}

pub async fn calculate_ema(
    provider: &dyn QuoteProvider,
    ticker: &str,
    window: usize,
) -> Option<TechnicalReading> {
    let period = if window <= 50 {
        Period::SixMonths
    } else {
        Period::OneYear
    };
    let closes = closes_for(provider, ticker, period, window).await?;
    let value = ema(&closes, window)?;
    Some(reading(ticker, "EMA", value, &[("window", window as i64)]))
}

pub async fn calculate_rsi(
    provider: &dyn QuoteProvider,
    ticker: &str,
    period: usize,
) -> Option<TechnicalReading> {
    let closes = closes_for(provider, ticker, Period::ThreeMonths, period + 1).await?;
    let value = rsi(&closes, period)?;
    Some(reading(ticker, "RSI", value, &[("period", period as i64)]))
}

pub async fn calculate_macd(
    provider: &dyn QuoteProvider,
    ticker: &str,
) -> Option<TechnicalReading> {
    let closes = closes_for(provider, ticker, Period::SixMonths, 26).await?;
    let value = macd(&closes)?;
    Some(reading(
        ticker,
        "MACD",
        value,
        &[("fast_period", 12), ("slow_period", 26)],
    ))
}

pub async fn detect_golden_cross(provider: &dyn QuoteProvider, ticker: &str) -> Option<bool> {
    let closes = closes_for(provider, ticker, Period::OneYear, 201).await?;
    golden_cross(&closes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_simple_window() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&closes, 2), Some(4.5));
        assert_eq!(sma(&closes, 5), Some(3.0));
        assert_eq!(sma(&closes, 6), None);
        assert_eq!(sma(&closes, 0), None);
    }

    #[test]
    fn ema_converges_toward_recent_values() {
        // Constant series: EMA equals the constant.
        let flat = vec![10.0; 30];
        assert!((ema(&flat, 12).unwrap() - 10.0).abs() < 1e-9);

        // Rising series: EMA sits between the mean and the last value.
        let rising: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let value = ema(&rising, 12).unwrap();
        assert!(value > 15.5 && value < 30.0, "ema was {value}");
    }

    #[test]
    fn rsi_extremes() {
        let rising: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (1..=20).rev().map(|i| i as f64).collect();
        let value = rsi(&falling, 14).unwrap();
        assert!(value < 1.0, "rsi was {value}");

        let flat = vec![5.0; 20];
        assert_eq!(rsi(&flat, 14), None);
    }

    #[test]
    fn rsi_requires_period_plus_one() {
        let closes = vec![1.0; 14];
        assert_eq!(rsi(&closes, 14), None);
    }

    #[test]
    fn macd_sign_follows_trend() {
        let rising: Vec<f64> = (1..=60).map(|i| i as f64).collect();
        assert!(macd(&rising).unwrap() > 0.0);

        let falling: Vec<f64> = (1..=60).rev().map(|i| i as f64).collect();
        assert!(macd(&falling).unwrap() < 0.0);

        assert_eq!(macd(&[1.0; 10]), None);
    }

    #[test]
    fn golden_cross_detects_crossover() {
        // 200 flat closes, then a spike large enough to push the 50-day
        // average above the 200-day average on the final point.
        let mut closes = vec![100.0; 210];
        let len = closes.len();
        closes[len - 1] = 400.0;
        assert_eq!(golden_cross(&closes), Some(true));

        // Flat series never crosses.
        assert_eq!(golden_cross(&vec![100.0; 210]), Some(false));

        // Too little history.
        assert_eq!(golden_cross(&vec![100.0; 100]), None);
    }
}
