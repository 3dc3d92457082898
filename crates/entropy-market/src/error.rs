use thiserror::Error;

/// Internal errors from the quotes source. These never cross the
/// `QuoteProvider` boundary: callers observe an absent value instead.
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("quote transport error: {0}")]
    Transport(String),

    #[error("unexpected quote payload: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for MarketError {
    fn from(e: reqwest::Error) -> Self {
        MarketError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(e: serde_json::Error) -> Self {
        MarketError::Payload(e.to_string())
    }
}
