//! Scripted doubles for the LLM transport and the specialist runner, plus
//! a small fixture corpus. Tests drive the whole orchestration flow
//! through these without touching a provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use entropy_market::test_support::StaticQuotes;
use entropy_models::{Document, SpecialistResult, Task};
use entropy_retrieval::{HashingEmbedder, HybridRetriever, LexicalIndex, SemanticIndex};

use crate::error::AgentError;
use crate::llm::{ContentBlock, LlmClient, LlmTransport, ProviderRequest, ProviderResponse, Usage};
use crate::pool::SpecialistRunner;
use crate::toolbelt::ToolBelt;

/// Transport that replays queued responses and records every request.
/// An empty queue serves a plain fallback answer.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<serde_json::Value>>,
    delay: Option<Duration>,
    always_fail: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
            always_fail: false,
        }
    }

    /// Transport that fails every call (for retry tests).
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new()
        }
    }

    /// Transport that sleeps before each response (for timeout tests).
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn push_text(&self, text: &str, tokens_in: u32, tokens_out: u32) {
        self.push_response(ProviderResponse {
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            model: None,
            stop_reason: Some("end_turn".to_string()),
            usage: Usage {
                input_tokens: tokens_in,
                output_tokens: tokens_out,
                ..Usage::default()
            },
        });
    }

    pub fn push_tool_call(
        &self,
        name: &str,
        input: serde_json::Value,
        tokens_in: u32,
        tokens_out: u32,
    ) {
        self.push_response(ProviderResponse {
            content: vec![ContentBlock::ToolUse {
                id: format!("toolu_{name}"),
                name: name.to_string(),
                input,
            }],
            model: None,
            stop_reason: Some("tool_use".to_string()),
            usage: Usage {
                input_tokens: tokens_in,
                output_tokens: tokens_out,
                ..Usage::default()
            },
        });
    }

    pub fn push_response(&self, response: ProviderResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// The nth request, serialized to JSON for assertions.
    pub fn request(&self, n: usize) -> serde_json::Value {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(n)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(serde_json::to_value(request).unwrap_or_default());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail {
            return Err(AgentError::Provider("scripted failure".to_string()));
        }

        let scripted = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(scripted.unwrap_or_else(|| ProviderResponse {
            content: vec![ContentBlock::Text {
                text: "I do not have enough information to answer that.".to_string(),
            }],
            model: None,
            stop_reason: Some("end_turn".to_string()),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 20,
                ..Usage::default()
            },
        }))
    }
}

/// Specialist runner that returns canned content after an optional delay.
pub struct CannedRunner {
    content: String,
    cost_usd: Decimal,
    delay: Duration,
    runs: AtomicUsize,
}

impl CannedRunner {
    pub fn instant(content: &str) -> Arc<Self> {
        Self::slow(content, Duration::ZERO)
    }

    pub fn slow(content: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            content: content.to_string(),
            cost_usd: dec!(0.02),
            delay,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpecialistRunner for CannedRunner {
    async fn run(&self, task: &Task) -> Result<SpecialistResult, AgentError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(SpecialistResult {
            kind: task.kind,
            content: self.content.clone(),
            cost_usd: self.cost_usd,
            tokens_in: 900,
            tokens_out: 250,
            created_at: Utc::now(),
            fingerprint: task.fingerprint(),
        })
    }
}

fn fixture_doc(id: &str, title: &str, body: &str, tickers: &[&str]) -> Document {
    Document {
        id: id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        published_at: Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
        tickers: tickers.iter().map(|t| t.to_string()).collect(),
        publisher: "Newswire".to_string(),
        link: format!("https://example.com/{id}"),
    }
}

/// Small corpus spanning a few tracked tickers.
pub fn fixture_corpus() -> Vec<Document> {
    vec![
        fixture_doc(
            "art-001",
            "Apple beats earnings expectations",
            "Apple reported record quarterly revenue on strong iPhone sales.",
            &["AAPL"],
        ),
        fixture_doc(
            "art-002",
            "Tesla deliveries miss estimates",
            "Tesla delivered fewer vehicles than analysts expected, pressuring the stock.",
            &["TSLA"],
        ),
        fixture_doc(
            "art-003",
            "Nvidia data center demand surges",
            "Nvidia revenue jumped as AI demand for data center chips accelerated.",
            &["NVDA"],
        ),
        fixture_doc(
            "art-004",
            "Microsoft earnings preview",
            "Analysts expect Microsoft cloud growth to continue into earnings.",
            &["MSFT"],
        ),
    ]
}

/// ToolBelt over the fixture corpus and a seeded static quote source.
pub fn test_toolbelt() -> Arc<ToolBelt> {
    let docs = fixture_corpus();
    let lexical = Arc::new(LexicalIndex::build(docs.clone()));
    let semantic = Arc::new(
        SemanticIndex::build(docs, Arc::new(HashingEmbedder::new(128)))
            .expect("fixture corpus embeds"),
    );
    let retriever = Arc::new(HybridRetriever::new(Some(lexical), Some(semantic)));

    let rising: Vec<f64> = (1..=60).map(|i| 150.0 + i as f64).collect();
    let quotes = Arc::new(
        StaticQuotes::new()
            .with_price("AAPL", 189.95)
            .with_price("TSLA", 171.05)
            .with_price("NVDA", 903.5)
            .with_closes("AAPL", &rising)
            .with_closes("NVDA", &rising)
            .with_closes("TSLA", &[180.0, 176.4, 172.9, 171.05]),
    );
    Arc::new(ToolBelt::new(retriever, quotes))
}

/// LlmClient over a scripted transport with a single retry, matching the
/// production wiring.
pub fn scripted_client(transport: Arc<ScriptedTransport>) -> Arc<LlmClient> {
    Arc::new(LlmClient::new(transport, 1))
}
