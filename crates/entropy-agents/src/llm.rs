use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::toolbelt::ToolDefinition;

/// One conversation message in the provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// A tool invocation requested by the model. The client returns these
/// without executing them; execution is the agent loop's responsibility.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Client-level request, before provider encoding.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system: Option<String>,
    /// Flag the system prefix for provider-side prompt caching. Subsequent
    /// calls on the same prefix within the provider TTL pay the cache-read
    /// rate (~10% of normal input cost).
    pub cache_system: bool,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Wire request for the Messages API.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<Vec<SystemBlock>>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse {
    pub content: Vec<ContentBlock>,
    pub model: Option<String>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

/// Result of one LLM call with deterministic cost accounting.
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub cost_usd: Decimal,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Per-model $/Mtok rates.
#[derive(Debug, Clone, Copy)]
pub struct ModelRates {
    pub input: Decimal,
    pub output: Decimal,
    pub cache_write: Decimal,
    pub cache_read: Decimal,
}

/// Cost table for the model tiers in use. Unknown models fall back to the
/// cheap tier so accounting never silently zeroes out.
#[derive(Debug, Clone)]
pub struct CostTable {
    rates: HashMap<String, ModelRates>,
    fallback: ModelRates,
}

impl CostTable {
    pub fn standard() -> Self {
        let haiku = ModelRates {
            input: dec!(0.80),
            output: dec!(4.00),
            cache_write: dec!(1.00),
            cache_read: dec!(0.08),
        };
        let sonnet = ModelRates {
            input: dec!(3.00),
            output: dec!(15.00),
            cache_write: dec!(3.75),
            cache_read: dec!(0.30),
        };
        let opus = ModelRates {
            input: dec!(15.00),
            output: dec!(75.00),
            cache_write: dec!(18.75),
            cache_read: dec!(1.50),
        };

        let mut rates = HashMap::new();
        rates.insert("claude-3-5-haiku-latest".to_string(), haiku);
        rates.insert("claude-sonnet-4-20250514".to_string(), sonnet);
        rates.insert("claude-opus-4-20250514".to_string(), opus);

        Self {
            rates,
            fallback: haiku,
        }
    }

    pub fn cost(&self, model: &str, usage: &Usage) -> Decimal {
        let rates = self.rates.get(model).unwrap_or(&self.fallback);
        let per_million = dec!(1000000);

        let regular_input = usage.input_tokens.saturating_sub(usage.cache_read_input_tokens);
        let input_cost = Decimal::from(regular_input) * rates.input / per_million;
        let cache_write_cost =
            Decimal::from(usage.cache_creation_input_tokens) * rates.cache_write / per_million;
        let cache_read_cost =
            Decimal::from(usage.cache_read_input_tokens) * rates.cache_read / per_million;
        let output_cost = Decimal::from(usage.output_tokens) * rates.output / per_million;

        input_cost + cache_write_cost + cache_read_cost + output_cost
    }
}

/// Transport seam between the client and the provider. Mockable in tests.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse, AgentError>;
}

/// HTTP transport for an Anthropic-compatible Messages API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderErrorBody {
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderErrorDetail {
    message: Option<String>,
}

#[async_trait]
impl LlmTransport for HttpTransport {
    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse, AgentError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %request.model, messages = request.messages.len(), "Sending LLM request");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.and_then(|e| e.message))
                .unwrap_or_else(|| body.clone());
            return Err(AgentError::Provider(format!("{status}: {message}")));
        }

        serde_json::from_str(&body).map_err(|e| AgentError::Parse(e.to_string()))
    }
}

/// Provider wrapper with prompt-prefix caching, retry, and cost accounting.
pub struct LlmClient {
    transport: std::sync::Arc<dyn LlmTransport>,
    costs: CostTable,
    max_retries: u32,
    cumulative_cost: Mutex<Decimal>,
}

impl LlmClient {
    pub fn new(transport: std::sync::Arc<dyn LlmTransport>, max_retries: u32) -> Self {
        Self {
            transport,
            costs: CostTable::standard(),
            max_retries,
            cumulative_cost: Mutex::new(Decimal::ZERO),
        }
    }

    /// Total cost of every call made through this client.
    pub fn cumulative_cost(&self) -> Decimal {
        *self
            .cumulative_cost
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// One provider call. The model's tool requests are returned, not
    /// executed. Retries the transport once on failure, then surfaces the
    /// error.
    pub async fn chat(&self, request: &ChatRequest) -> Result<LlmOutcome, AgentError> {
        let wire = self.encode(request);

        let mut attempt = 0;
        let response = loop {
            match self.transport.send(&wire).await {
                Ok(response) => break response,
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "LLM call failed, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        if response.content.is_empty() {
            return Err(AgentError::Provider("empty response content".to_string()));
        }

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in &response.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text.clone()),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                ContentBlock::ToolResult { .. } => {}
            }
        }

        let cost = self.costs.cost(&request.model, &response.usage);
        {
            let mut cumulative = self
                .cumulative_cost
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *cumulative += cost;
        }

        info!(
            model = %request.model,
            tokens_in = response.usage.input_tokens,
            tokens_out = response.usage.output_tokens,
            cache_read = response.usage.cache_read_input_tokens,
            cost = %cost,
            tool_calls = tool_calls.len(),
            "LLM response received"
        );

        Ok(LlmOutcome {
            text: text_parts.join(""),
            tool_calls,
            cost_usd: cost,
            tokens_in: response.usage.input_tokens,
            tokens_out: response.usage.output_tokens,
        })
    }

    fn encode(&self, request: &ChatRequest) -> ProviderRequest {
        let system = request.system.as_ref().map(|text| {
            vec![SystemBlock {
                kind: "text",
                text: text.clone(),
                cache_control: request
                    .cache_system
                    .then_some(CacheControl { kind: "ephemeral" }),
            }]
        });

        ProviderRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system,
            messages: request.messages.clone(),
            tools: request.tools.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;
    use std::sync::Arc;

    fn chat_request(model: &str, cache: bool) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            temperature: 0.4,
            max_tokens: 1024,
            system: Some("You are a financial assistant.".to_string()),
            cache_system: cache,
            messages: vec![Message::user_text("What is AAPL trading at?")],
            tools: vec![],
        }
    }

    #[test]
    fn cost_table_basic_math() {
        let costs = CostTable::standard();
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 500,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        };
        // haiku: 1000 * 0.80/1M + 500 * 4.00/1M = 0.0008 + 0.002
        let cost = costs.cost("claude-3-5-haiku-latest", &usage);
        assert_eq!(cost, dec!(0.0028));
    }

    #[test]
    fn cache_read_tokens_cost_a_tenth() {
        let costs = CostTable::standard();
        let cold = Usage {
            input_tokens: 10_000,
            output_tokens: 0,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        };
        let warm = Usage {
            input_tokens: 10_000,
            output_tokens: 0,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 10_000,
        };
        let cold_cost = costs.cost("claude-3-5-haiku-latest", &cold);
        let warm_cost = costs.cost("claude-3-5-haiku-latest", &warm);
        assert_eq!(warm_cost, cold_cost / dec!(10));
    }

    #[test]
    fn unknown_model_uses_fallback_rates() {
        let costs = CostTable::standard();
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 0,
            ..Usage::default()
        };
        assert_eq!(
            costs.cost("mystery-model", &usage),
            costs.cost("claude-3-5-haiku-latest", &usage)
        );
    }

    #[test]
    fn encode_marks_system_cacheable() {
        let client = LlmClient::new(Arc::new(ScriptedTransport::new()), 1);
        let wire = client.encode(&chat_request("claude-3-5-haiku-latest", true));
        let system = wire.system.unwrap();
        assert!(system[0].cache_control.is_some());

        let wire = client.encode(&chat_request("claude-3-5-haiku-latest", false));
        assert!(wire.system.unwrap()[0].cache_control.is_none());
    }

    #[test]
    fn provider_request_serializes_to_wire_shape() {
        let client = LlmClient::new(Arc::new(ScriptedTransport::new()), 1);
        let wire = client.encode(&chat_request("claude-3-5-haiku-latest", true));
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        // Empty tool list is omitted entirely.
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn provider_response_deserializes_tool_use() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_price", "input": {"ticker": "AAPL"}}
            ],
            "model": "claude-3-5-haiku-latest",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 320, "output_tokens": 40}
        }"#;
        let response: ProviderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.content.len(), 2);
        assert_eq!(response.usage.input_tokens, 320);
    }

    #[tokio::test]
    async fn chat_accumulates_cumulative_cost() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_text("$189.95", 100, 20);
        transport.push_text("$390.00", 100, 20);

        let client = LlmClient::new(transport, 1);
        let request = chat_request("claude-3-5-haiku-latest", false);
        let first = client.chat(&request).await.unwrap();
        let second = client.chat(&request).await.unwrap();

        assert_eq!(client.cumulative_cost(), first.cost_usd + second.cost_usd);
    }

    #[tokio::test]
    async fn chat_retries_once_then_errors() {
        let transport = Arc::new(ScriptedTransport::failing());
        let client = LlmClient::new(transport.clone(), 1);
        let result = client.chat(&chat_request("claude-3-5-haiku-latest", false)).await;
        assert!(result.is_err());
        assert_eq!(transport.call_count(), 2); // initial + one retry
    }
}
