use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use entropy_market::{analytics, signals, QuoteProvider};
use entropy_models::Period;
use entropy_retrieval::HybridRetriever;

/// The equity universe ENTROPY tracks. Used for ticker extraction from
/// free text and as the default comparison set.
pub const TRACKED_TICKERS: [&str; 20] = [
    "AAPL", "MSFT", "GOOGL", "NVDA", "META", "AMZN", "JPM", "V", "BRK-B", "XOM", "CVX", "JNJ",
    "UNH", "PG", "KO", "NKE", "BA", "GE", "TSLA", "F",
];

/// Tool surface exposed to the model, in provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Outcome of executing one tool. Tools never raise: failures and absent
/// data come back as a value the agent can read and adapt to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn absent(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Uniform tool facade shared across agents. Stateless beyond the
/// underlying indexes and quote source.
pub struct ToolBelt {
    retriever: Arc<HybridRetriever>,
    quotes: Arc<dyn QuoteProvider>,
}

/// Tool names available to the generalist.
pub const GENERALIST_TOOLS: [&str; 3] = ["search_news", "get_price", "get_fundamentals"];

/// Full market-data surface for the market specialist.
pub const MARKET_TOOLS: [&str; 12] = [
    "get_price",
    "get_fundamentals",
    "get_price_change",
    "get_history",
    "compare_performance",
    "top_performers",
    "calculate_returns",
    "calculate_sma",
    "calculate_ema",
    "calculate_rsi",
    "calculate_macd",
    "detect_golden_cross",
];

/// Retrieval surface for the news specialist.
pub const NEWS_TOOLS: [&str; 1] = ["search_news"];

impl ToolBelt {
    pub fn new(retriever: Arc<HybridRetriever>, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { retriever, quotes }
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        &self.retriever
    }

    pub fn quotes(&self) -> &Arc<dyn QuoteProvider> {
        &self.quotes
    }

    /// Definitions for a named subset of tools, in declaration order.
    pub fn definitions_for(&self, names: &[&str]) -> Vec<ToolDefinition> {
        all_definitions()
            .into_iter()
            .filter(|d| names.contains(&d.name.as_str()))
            .collect()
    }

    /// Dispatch a tool call by name. Unknown tools and malformed arguments
    /// come back as unsuccessful results, never errors.
    pub async fn execute(&self, name: &str, args: &Value) -> ToolResult {
        match name {
            "search_news" => self.search_news(args).await,
            "get_price" => self.get_price(args).await,
            "get_fundamentals" => self.get_fundamentals(args).await,
            "get_price_change" => self.get_price_change(args).await,
            "get_history" => self.get_history(args).await,
            "compare_performance" => self.compare_performance(args).await,
            "top_performers" => self.top_performers(args).await,
            "calculate_returns" => self.calculate_returns(args).await,
            "calculate_sma" => self.indicator_window(args, "sma").await,
            "calculate_ema" => self.indicator_window(args, "ema").await,
            "calculate_rsi" => self.calculate_rsi(args).await,
            "calculate_macd" => self.calculate_macd(args).await,
            "detect_golden_cross" => self.detect_golden_cross(args).await,
            _ => ToolResult::absent(format!("Unknown tool: {name}")),
        }
    }

    async fn search_news(&self, args: &Value) -> ToolResult {
        let query = str_arg(args, "query").unwrap_or_default();
        let k = args.get("k").and_then(Value::as_u64).unwrap_or(5) as usize;
        let tickers: Option<BTreeSet<String>> = args
            .get("tickers")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(|t| t.to_uppercase())
                    .collect()
            });

        debug!(
            "[BOUNDARY: Generation→Retrieval] Query: '{}', k={}, tickers={:?}",
            query, k, tickers
        );

        let hits = self.retriever.search(&query, k, tickers.as_ref()).await;
        let articles: Vec<Value> = hits
            .iter()
            .filter_map(|hit| {
                let doc = self.retriever.document(&hit.doc_id)?;
                let text: String = doc.body.chars().take(500).collect();
                Some(json!({
                    "title": doc.title,
                    "text": text,
                    "tickers": doc.tickers,
                    "publisher": doc.publisher,
                    "link": doc.link,
                    "published_at": doc.published_at.to_rfc3339(),
                    "relevance_score": hit.score,
                }))
            })
            .collect();

        debug!(
            "[BOUNDARY: Retrieval→Generation] Returning {} articles",
            articles.len()
        );
        ToolResult::ok(json!({ "articles": articles, "count": articles.len() }))
    }

    async fn get_price(&self, args: &Value) -> ToolResult {
        let Some(ticker) = str_arg(args, "ticker") else {
            return ToolResult::absent("missing ticker argument");
        };
        debug!("[BOUNDARY: Generation→MarketData] Fetching price for ticker: {ticker}");

        match self.quotes.quote(&ticker).await {
            Some(snapshot) => {
                debug!(
                    "[BOUNDARY: MarketData→Generation] Price for {}: {:?}",
                    ticker, snapshot.current_price
                );
                ToolResult::ok(json!({
                    "ticker": snapshot.ticker,
                    "current_price": snapshot.current_price,
                    "previous_close": snapshot.previous_close,
                    "day_high": snapshot.day_high,
                    "day_low": snapshot.day_low,
                    "volume": snapshot.volume,
                }))
            }
            None => {
                debug!("[BOUNDARY: MarketData→Generation] No price data for {ticker}");
                ToolResult::absent(format!("no price data for {ticker}"))
            }
        }
    }

    async fn get_fundamentals(&self, args: &Value) -> ToolResult {
        let Some(ticker) = str_arg(args, "ticker") else {
            return ToolResult::absent("missing ticker argument");
        };
        match self.quotes.fundamentals(&ticker).await {
            Some(f) => ToolResult::ok(json!({
                "ticker": f.ticker,
                "company_name": f.company_name,
                "market_cap": f.market_cap,
                "sector": f.sector,
                "industry": f.industry,
                "fifty_day_avg": f.fifty_day_avg,
                "two_hundred_day_avg": f.two_hundred_day_avg,
            })),
            None => ToolResult::absent(format!("no fundamentals for {ticker}")),
        }
    }

    async fn get_price_change(&self, args: &Value) -> ToolResult {
        let Some(ticker) = str_arg(args, "ticker") else {
            return ToolResult::absent("missing ticker argument");
        };
        let Some(period) = period_arg(args) else {
            return ToolResult::absent("unknown period");
        };
        match analytics::price_change(self.quotes.as_ref(), &ticker, period).await {
            Some(change) => ToolResult::ok(json!({
                "ticker": change.ticker,
                "period": change.period,
                "current_price": change.current_price,
                "previous_price": change.previous_price,
                "change_amount": change.change_amount,
                "change_percent": change.change_percent,
            })),
            None => ToolResult::absent(format!("no price change data for {ticker}")),
        }
    }

    async fn get_history(&self, args: &Value) -> ToolResult {
        let Some(ticker) = str_arg(args, "ticker") else {
            return ToolResult::absent("missing ticker argument");
        };
        let Some(period) = period_arg(args) else {
            return ToolResult::absent("unknown period");
        };
        match self.quotes.history(&ticker, period).await {
            Some(history) => {
                let closes = history.closes();
                ToolResult::ok(json!({
                    "ticker": history.ticker,
                    "period": history.period,
                    "points": history.prices.len(),
                    "first_close": closes.first(),
                    "last_close": closes.last(),
                    "closes": closes,
                }))
            }
            None => ToolResult::absent(format!("no history for {ticker}")),
        }
    }

    async fn compare_performance(&self, args: &Value) -> ToolResult {
        let tickers = tickers_arg(args);
        let metric = str_arg(args, "metric").unwrap_or_else(|| "price_change_percent".to_string());
        let Some(period) = period_arg(args) else {
            return ToolResult::absent("unknown period");
        };
        match analytics::compare_performance(self.quotes.as_ref(), &tickers, &metric, period).await
        {
            Some(comparison) => match serde_json::to_value(&comparison.results) {
                Ok(results) => ToolResult::ok(json!({ "metric": metric, "results": results })),
                Err(e) => ToolResult::absent(e.to_string()),
            },
            None => ToolResult::absent("comparison unavailable"),
        }
    }

    async fn top_performers(&self, args: &Value) -> ToolResult {
        let tickers = tickers_arg(args);
        let metric = str_arg(args, "metric").unwrap_or_else(|| "price_change_percent".to_string());
        let n = args.get("n").and_then(Value::as_u64).unwrap_or(5) as usize;
        let Some(period) = period_arg(args) else {
            return ToolResult::absent("unknown period");
        };
        let top =
            analytics::top_performers(self.quotes.as_ref(), &tickers, &metric, period, n).await;
        match serde_json::to_value(&top) {
            Ok(results) => ToolResult::ok(json!({ "metric": metric, "results": results })),
            Err(e) => ToolResult::absent(e.to_string()),
        }
    }

    async fn calculate_returns(&self, args: &Value) -> ToolResult {
        let Some(ticker) = str_arg(args, "ticker") else {
            return ToolResult::absent("missing ticker argument");
        };
        let parse_date = |key: &str| {
            str_arg(args, key).and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
        };
        let (Some(start), Some(end)) = (parse_date("start_date"), parse_date("end_date")) else {
            return ToolResult::absent("dates must be YYYY-MM-DD");
        };
        match analytics::returns(self.quotes.as_ref(), &ticker, start, end).await {
            Some(value) => ToolResult::ok(json!({ "ticker": ticker, "return_percent": value })),
            None => ToolResult::absent(format!("no return data for {ticker}")),
        }
    }

    async fn indicator_window(&self, args: &Value, which: &str) -> ToolResult {
        let Some(ticker) = str_arg(args, "ticker") else {
            return ToolResult::absent("missing ticker argument");
        };
        let window = args.get("window").and_then(Value::as_u64).unwrap_or(50) as usize;
        let reading = match which {
            "sma" => signals::calculate_sma(self.quotes.as_ref(), &ticker, window).await,
            _ => signals::calculate_ema(self.quotes.as_ref(), &ticker, window).await,
        };
        reading_result(reading, &ticker)
    }

    async fn calculate_rsi(&self, args: &Value) -> ToolResult {
        let Some(ticker) = str_arg(args, "ticker") else {
            return ToolResult::absent("missing ticker argument");
        };
        let period = args.get("period").and_then(Value::as_u64).unwrap_or(14) as usize;
        reading_result(
            signals::calculate_rsi(self.quotes.as_ref(), &ticker, period).await,
            &ticker,
        )
    }

    async fn calculate_macd(&self, args: &Value) -> ToolResult {
        let Some(ticker) = str_arg(args, "ticker") else {
            return ToolResult::absent("missing ticker argument");
        };
        reading_result(
            signals::calculate_macd(self.quotes.as_ref(), &ticker).await,
            &ticker,
        )
    }

    async fn detect_golden_cross(&self, args: &Value) -> ToolResult {
        let Some(ticker) = str_arg(args, "ticker") else {
            return ToolResult::absent("missing ticker argument");
        };
        match signals::detect_golden_cross(self.quotes.as_ref(), &ticker).await {
            Some(crossed) => {
                ToolResult::ok(json!({ "ticker": ticker, "golden_cross": crossed }))
            }
            None => ToolResult::absent(format!("insufficient history for {ticker}")),
        }
    }
}

fn reading_result(
    reading: Option<entropy_models::TechnicalReading>,
    ticker: &str,
) -> ToolResult {
    match reading {
        Some(reading) => ToolResult::ok(json!({
            "ticker": reading.ticker,
            "indicator": reading.indicator,
            "value": reading.value,
            "parameters": reading.parameters,
        })),
        None => {
            warn!(ticker, "Indicator unavailable");
            ToolResult::absent(format!("insufficient history for {ticker}"))
        }
    }
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn period_arg(args: &Value) -> Option<Period> {
    match args.get("period").and_then(Value::as_str) {
        Some(raw) => Period::from_str(raw).ok(),
        None => Some(Period::OneDay),
    }
}

fn tickers_arg(args: &Value) -> Vec<String> {
    args.get("tickers")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(|t| t.to_uppercase())
                .collect()
        })
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| TRACKED_TICKERS.iter().map(|t| t.to_string()).collect())
}

fn ticker_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ticker": {"type": "string", "description": "Stock ticker symbol, e.g. AAPL"}
        },
        "required": ["ticker"]
    })
}

fn ticker_period_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ticker": {"type": "string", "description": "Stock ticker symbol"},
            "period": {"type": "string", "description": "Lookback window: 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, ytd, max"}
        },
        "required": ["ticker"]
    })
}

fn all_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "search_news".to_string(),
            description: "Search recent financial news articles using hybrid retrieval. \
                          Optionally restrict to specific tickers."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Free-text search query"},
                    "k": {"type": "integer", "description": "Number of articles to return (default 5)"},
                    "tickers": {"type": "array", "items": {"type": "string"}, "description": "Restrict results to these tickers"}
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "get_price".to_string(),
            description: "Get the current price snapshot for a ticker.".to_string(),
            input_schema: ticker_schema(),
        },
        ToolDefinition {
            name: "get_fundamentals".to_string(),
            description: "Get company fundamentals (market cap, sector, moving averages)."
                .to_string(),
            input_schema: ticker_schema(),
        },
        ToolDefinition {
            name: "get_price_change".to_string(),
            description: "Price change over a period.".to_string(),
            input_schema: ticker_period_schema(),
        },
        ToolDefinition {
            name: "get_history".to_string(),
            description: "Daily price history for a ticker over a period.".to_string(),
            input_schema: ticker_period_schema(),
        },
        ToolDefinition {
            name: "compare_performance".to_string(),
            description: "Compare a metric across multiple tickers, sorted best to worst."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tickers": {"type": "array", "items": {"type": "string"}},
                    "metric": {"type": "string", "description": "price_change_percent, price_change_amount, current_price, or volume"},
                    "period": {"type": "string"}
                },
                "required": ["tickers"]
            }),
        },
        ToolDefinition {
            name: "top_performers".to_string(),
            description: "Top N tickers by a metric; defaults to the tracked universe."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tickers": {"type": "array", "items": {"type": "string"}},
                    "metric": {"type": "string"},
                    "period": {"type": "string"},
                    "n": {"type": "integer"}
                },
                "required": []
            }),
        },
        ToolDefinition {
            name: "calculate_returns".to_string(),
            description: "Percent return for a ticker between two dates.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ticker": {"type": "string"},
                    "start_date": {"type": "string", "description": "YYYY-MM-DD"},
                    "end_date": {"type": "string", "description": "YYYY-MM-DD"}
                },
                "required": ["ticker", "start_date", "end_date"]
            }),
        },
        ToolDefinition {
            name: "calculate_sma".to_string(),
            description: "Simple moving average (default 50-day window).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ticker": {"type": "string"},
                    "window": {"type": "integer", "description": "Window in trading days (default 50)"}
                },
                "required": ["ticker"]
            }),
        },
        ToolDefinition {
            name: "calculate_ema".to_string(),
            description: "Exponential moving average (default 50-day window).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ticker": {"type": "string"},
                    "window": {"type": "integer", "description": "Window in trading days (default 50)"}
                },
                "required": ["ticker"]
            }),
        },
        ToolDefinition {
            name: "calculate_rsi".to_string(),
            description: "Relative Strength Index, 0-100 (default 14-day period)."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ticker": {"type": "string"},
                    "period": {"type": "integer", "description": "Period in trading days (default 14)"}
                },
                "required": ["ticker"]
            }),
        },
        ToolDefinition {
            name: "calculate_macd".to_string(),
            description: "MACD line (12-day EMA minus 26-day EMA).".to_string(),
            input_schema: ticker_schema(),
        },
        ToolDefinition {
            name: "detect_golden_cross".to_string(),
            description: "Whether the 50-day average just crossed above the 200-day average."
                .to_string(),
            input_schema: ticker_schema(),
        },
    ]
}

/// Extract the first tracked ticker mentioned in free text, `$AAPL` style
/// first, then bare symbols.
pub fn extract_tickers(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let mut found = Vec::new();
    for ticker in TRACKED_TICKERS {
        let dollar = format!("${ticker}");
        let hit = upper.contains(&dollar)
            || upper
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                .any(|word| word == ticker);
        if hit {
            found.push(ticker.to_string());
        }
    }
    found
}
