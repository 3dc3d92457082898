pub mod analytics;
pub mod error;
pub mod provider;
pub mod signals;
pub mod test_support;

pub use analytics::{compare_performance, price_change, returns, top_performers};
pub use error::MarketError;
pub use provider::{QuoteProvider, YahooQuotes};
pub use signals::{
    calculate_ema, calculate_macd, calculate_rsi, calculate_sma, detect_golden_cross,
};
