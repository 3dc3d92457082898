use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use entropy_models::{LlmConfig, SpecialistKind, ToolRecord};

use crate::error::AgentError;
use crate::llm::{ChatRequest, ContentBlock, LlmClient, Message, Role};
use crate::prompts;
use crate::toolbelt::{ToolBelt, GENERALIST_TOOLS, MARKET_TOOLS, NEWS_TOOLS};

/// Maximum tool rounds before the loop returns its best text so far.
pub const MAX_STEPS: usize = 6;

/// Static configuration for one agent kind.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: &'static str,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Whether the system prefix is flagged for provider-side caching.
    pub cache_system: bool,
    pub tools: Vec<&'static str>,
}

impl AgentSpec {
    /// Cheap tier, full session history, cached system prompt.
    pub fn generalist(config: &LlmConfig) -> Self {
        Self {
            name: "generalist",
            model: config.generalist_model.clone(),
            temperature: 0.4,
            max_tokens: 1024,
            cache_system: true,
            tools: GENERALIST_TOOLS.to_vec(),
        }
    }

    /// Expensive tier, minimal context, all market tools.
    pub fn market_specialist(config: &LlmConfig) -> Self {
        Self {
            name: "market_specialist",
            model: config.market_model.clone(),
            temperature: 0.1,
            max_tokens: 1536,
            cache_system: false,
            tools: MARKET_TOOLS.to_vec(),
        }
    }

    /// Mid tier, minimal context, retrieval tools.
    pub fn news_specialist(config: &LlmConfig) -> Self {
        Self {
            name: "news_specialist",
            model: config.news_model.clone(),
            temperature: 0.6,
            max_tokens: 1536,
            cache_system: false,
            tools: NEWS_TOOLS.to_vec(),
        }
    }

    pub fn specialist(kind: SpecialistKind, config: &LlmConfig) -> Self {
        match kind {
            SpecialistKind::Market => Self::market_specialist(config),
            SpecialistKind::News => Self::news_specialist(config),
        }
    }

    /// Synthesis turn: generalist model, low temperature, tools disabled.
    pub fn synthesis(config: &LlmConfig) -> Self {
        Self {
            name: "synthesis",
            model: config.generalist_model.clone(),
            temperature: 0.3,
            max_tokens: 1024,
            cache_system: false,
            tools: Vec::new(),
        }
    }
}

/// Accumulated result of one agent run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub text: String,
    pub cost_usd: Decimal,
    pub tokens_in: u32,
    pub tokens_out: u32,
    /// Tool invocations in execution order.
    pub tool_records: Vec<ToolRecord>,
    pub budget_exceeded: bool,
}

/// Tool-using loop shared by every agent kind: call the model, execute any
/// requested tools, feed results back, repeat until a final answer or the
/// step budget runs out.
pub struct Agent {
    spec: AgentSpec,
    client: Arc<LlmClient>,
    toolbelt: Arc<ToolBelt>,
}

impl Agent {
    pub fn new(spec: AgentSpec, client: Arc<LlmClient>, toolbelt: Arc<ToolBelt>) -> Self {
        Self {
            spec,
            client,
            toolbelt,
        }
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub async fn run(
        &self,
        system: String,
        mut messages: Vec<Message>,
    ) -> Result<AgentRun, AgentError> {
        let tools = self.toolbelt.definitions_for(&self.spec.tools);

        let mut total_cost = Decimal::ZERO;
        let mut tokens_in = 0u32;
        let mut tokens_out = 0u32;
        let mut tool_records = Vec::new();
        let mut last_text = String::new();

        for step in 0..MAX_STEPS {
            let outcome = self
                .client
                .chat(&ChatRequest {
                    model: self.spec.model.clone(),
                    temperature: self.spec.temperature,
                    max_tokens: self.spec.max_tokens,
                    system: Some(system.clone()),
                    cache_system: self.spec.cache_system,
                    messages: messages.clone(),
                    tools: tools.clone(),
                })
                .await?;

            total_cost += outcome.cost_usd;
            tokens_in += outcome.tokens_in;
            tokens_out += outcome.tokens_out;
            if !outcome.text.trim().is_empty() {
                last_text = outcome.text.clone();
            }

            if outcome.tool_calls.is_empty() {
                debug!(agent = self.spec.name, steps = step + 1, "Agent run complete");
                return Ok(AgentRun {
                    text: last_text,
                    cost_usd: total_cost,
                    tokens_in,
                    tokens_out,
                    tool_records,
                    budget_exceeded: false,
                });
            }

            // Echo the assistant turn (text + tool_use blocks), then answer
            // each call with a tool_result block in a single user turn.
            let mut assistant_blocks = Vec::new();
            if !outcome.text.is_empty() {
                assistant_blocks.push(ContentBlock::Text {
                    text: outcome.text.clone(),
                });
            }
            let mut result_blocks = Vec::new();
            for call in &outcome.tool_calls {
                assistant_blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });

                let result = self.toolbelt.execute(&call.name, &call.input).await;
                let result_json = serde_json::to_value(&result)?;
                tool_records.push(ToolRecord {
                    tool_name: call.name.clone(),
                    arguments: call.input.clone(),
                    result: result_json.clone(),
                });
                result_blocks.push(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: result_json.to_string(),
                });
            }

            messages.push(Message {
                role: Role::Assistant,
                content: assistant_blocks,
            });
            messages.push(Message {
                role: Role::User,
                content: result_blocks,
            });
        }

        warn!(agent = self.spec.name, "Step budget exceeded");
        let text = if last_text.is_empty() {
            "step budget exceeded".to_string()
        } else {
            format!("{last_text}\n\n(step budget exceeded; analysis may be incomplete)")
        };
        Ok(AgentRun {
            text,
            cost_usd: total_cost,
            tokens_in,
            tokens_out,
            tool_records,
            budget_exceeded: true,
        })
    }
}

/// Build the single user message a specialist receives: recent context plus
/// its focused brief.
pub fn specialist_messages(task: &entropy_models::Task) -> Vec<Message> {
    let context = if task.context_window.is_empty() {
        "No prior conversation".to_string()
    } else {
        task.context_window
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    entropy_models::TurnRole::User => "User",
                    entropy_models::TurnRole::Agent => "Assistant",
                    entropy_models::TurnRole::Tool => "Tool",
                };
                let mut content = turn.content.as_prompt_text();
                if content.len() > 300 {
                    content.truncate(300);
                    content.push_str("...");
                }
                format!("{role}: {content}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    vec![Message::user_text(format!(
        "Recent conversation context:\n{context}\n\n---\n\nYour task:\n{}\n\n\
         Execute this task using your available tools and provide a comprehensive response.",
        task.focused_brief
    ))]
}

pub use crate::prompts::specialist_system_prompt;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{scripted_client, test_toolbelt, ScriptedTransport};
    use entropy_models::Task;
    use serde_json::json;

    fn generalist(transport: Arc<ScriptedTransport>) -> Agent {
        let config = LlmConfig::default();
        Agent::new(
            AgentSpec::generalist(&config),
            scripted_client(transport),
            test_toolbelt(),
        )
    }

    #[tokio::test]
    async fn plain_answer_needs_one_step() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_text("AAPL closed at $189.95.", 200, 30);

        let agent = generalist(transport.clone());
        let run = agent
            .run(
                prompts::generalist_system_prompt(),
                vec![Message::user_text("What is AAPL's price?")],
            )
            .await
            .unwrap();

        assert_eq!(run.text, "AAPL closed at $189.95.");
        assert!(run.tool_records.is_empty());
        assert!(!run.budget_exceeded);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn tool_round_executes_and_feeds_back() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_tool_call("get_price", json!({"ticker": "AAPL"}), 300, 25);
        transport.push_text("AAPL is trading at $189.95.", 500, 40);

        let agent = generalist(transport.clone());
        let run = agent
            .run(
                prompts::generalist_system_prompt(),
                vec![Message::user_text("What is AAPL's price?")],
            )
            .await
            .unwrap();

        assert_eq!(run.tool_records.len(), 1);
        assert_eq!(run.tool_records[0].tool_name, "get_price");
        assert!(run.text.contains("189.95"));
        assert_eq!(transport.call_count(), 2);

        // The second request must carry the tool_result block back.
        let second = transport.request(1);
        let blocks = second["messages"].as_array().unwrap().last().unwrap();
        assert_eq!(blocks["content"][0]["type"], "tool_result");
    }

    #[tokio::test]
    async fn step_budget_bounds_tool_rounds() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..MAX_STEPS + 2 {
            transport.push_tool_call("get_price", json!({"ticker": "AAPL"}), 100, 10);
        }

        let agent = generalist(transport.clone());
        let run = agent
            .run(
                prompts::generalist_system_prompt(),
                vec![Message::user_text("loop forever")],
            )
            .await
            .unwrap();

        assert!(run.budget_exceeded);
        assert!(run.text.contains("step budget exceeded"));
        assert_eq!(transport.call_count(), MAX_STEPS);
        assert_eq!(run.tool_records.len(), MAX_STEPS);
    }

    #[tokio::test]
    async fn cost_accumulates_across_steps() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_tool_call("get_price", json!({"ticker": "AAPL"}), 1000, 100);
        transport.push_text("done", 1000, 100);

        let agent = generalist(transport);
        let run = agent
            .run(
                prompts::generalist_system_prompt(),
                vec![Message::user_text("price?")],
            )
            .await
            .unwrap();

        assert_eq!(run.tokens_in, 2000);
        assert_eq!(run.tokens_out, 200);
        assert!(run.cost_usd > Decimal::ZERO);
    }

    #[test]
    fn specialist_message_includes_context_and_brief() {
        let task = Task {
            kind: SpecialistKind::News,
            focused_brief: "news specialist: price-moving events; tickers: TSLA".to_string(),
            context_window: vec![
                entropy_models::Turn::user("What moved TSLA today?"),
                entropy_models::Turn::agent("TSLA fell 4%.", Decimal::ZERO, 0, 0),
            ],
            session_id: "s1".to_string(),
        };
        let messages = specialist_messages(&task);
        assert_eq!(messages.len(), 1);
        let text = match &messages[0].content[0] {
            ContentBlock::Text { text } => text,
            _ => panic!("expected text"),
        };
        assert!(text.contains("What moved TSLA today?"));
        assert!(text.contains("price-moving events"));
    }

    #[test]
    fn agent_specs_follow_tier_table() {
        let config = LlmConfig::default();
        let generalist = AgentSpec::generalist(&config);
        assert!(generalist.cache_system);
        assert_eq!(generalist.temperature, 0.4);

        let market = AgentSpec::market_specialist(&config);
        assert_eq!(market.temperature, 0.1);
        assert!(!market.cache_system);
        assert_eq!(market.model, config.market_model);

        let news = AgentSpec::news_specialist(&config);
        assert_eq!(news.temperature, 0.6);

        let synthesis = AgentSpec::synthesis(&config);
        assert!(synthesis.tools.is_empty());
        assert_eq!(synthesis.temperature, 0.3);
    }
}
