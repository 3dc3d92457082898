use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use entropy_models::{
    LlmConfig, PoolConfig, Session, SpecialistKind, SpecialistResult, Task, ToolRecord, Turn,
    TurnRole,
};

use crate::agent::{specialist_messages, Agent, AgentRun, AgentSpec};
use crate::error::AgentError;
use crate::llm::{ContentBlock, LlmClient, Message, Role};
use crate::policy::{build_task, Decision, DecisionPolicy, PREFETCH_CONFIDENCE_THRESHOLD};
use crate::pool::{Priority, SpecialistPool, SpecialistRunner, SpecialistStatus};
use crate::prompts;
use crate::session_store::SessionStore;
use crate::toolbelt::ToolBelt;

/// Which path produced the response, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgentTag {
    #[serde(rename = "generalist")]
    Generalist,
    #[serde(rename = "generalist+market_data")]
    GeneralistMarket,
    #[serde(rename = "generalist+news")]
    GeneralistNews,
}

impl AgentTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentTag::Generalist => "generalist",
            AgentTag::GeneralistMarket => "generalist+market_data",
            AgentTag::GeneralistNews => "generalist+news",
        }
    }

    fn for_kind(kind: SpecialistKind) -> Self {
        match kind {
            SpecialistKind::Market => AgentTag::GeneralistMarket,
            SpecialistKind::News => AgentTag::GeneralistNews,
        }
    }
}

/// Final answer for one query plus its accounting.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub response: String,
    pub cost_usd: Decimal,
    pub agent: AgentTag,
    pub session_id: String,
    pub prefetch_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub query_count: u32,
    pub turn_count: usize,
}

/// Production specialist runner: executes the kind-specific agent loop.
pub struct AgentSpecialistRunner {
    client: Arc<LlmClient>,
    toolbelt: Arc<ToolBelt>,
    llm_config: LlmConfig,
}

impl AgentSpecialistRunner {
    pub fn new(client: Arc<LlmClient>, toolbelt: Arc<ToolBelt>, llm_config: LlmConfig) -> Self {
        Self {
            client,
            toolbelt,
            llm_config,
        }
    }
}

#[async_trait]
impl SpecialistRunner for AgentSpecialistRunner {
    async fn run(&self, task: &Task) -> Result<SpecialistResult, AgentError> {
        let spec = AgentSpec::specialist(task.kind, &self.llm_config);
        let agent = Agent::new(spec, Arc::clone(&self.client), Arc::clone(&self.toolbelt));
        let run = agent
            .run(prompts::specialist_system_prompt(task.kind), specialist_messages(task))
            .await?;

        Ok(SpecialistResult {
            kind: task.kind,
            content: run.text,
            cost_usd: run.cost_usd,
            tokens_in: run.tokens_in,
            tokens_out: run.tokens_out,
            created_at: Utc::now(),
            fingerprint: task.fingerprint(),
        })
    }
}

/// Top-level flow: consult the policy, run the generalist, optionally
/// await and synthesize a specialist, schedule pre-fetches, and keep the
/// session log and profile current.
pub struct Orchestrator {
    client: Arc<LlmClient>,
    toolbelt: Arc<ToolBelt>,
    pool: SpecialistPool,
    sessions: Arc<SessionStore>,
    llm_config: LlmConfig,
    immediate_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        client: Arc<LlmClient>,
        toolbelt: Arc<ToolBelt>,
        sessions: Arc<SessionStore>,
        llm_config: LlmConfig,
        pool_config: &PoolConfig,
    ) -> Self {
        let runner = Arc::new(AgentSpecialistRunner::new(
            Arc::clone(&client),
            Arc::clone(&toolbelt),
            llm_config.clone(),
        ));
        Self::with_runner(client, toolbelt, sessions, llm_config, pool_config, runner)
    }

    /// Wire with an explicit runner (tests inject scripted specialists).
    pub fn with_runner(
        client: Arc<LlmClient>,
        toolbelt: Arc<ToolBelt>,
        sessions: Arc<SessionStore>,
        llm_config: LlmConfig,
        pool_config: &PoolConfig,
        runner: Arc<dyn SpecialistRunner>,
    ) -> Self {
        let pool = SpecialistPool::new(
            pool_config.max_workers,
            Duration::from_secs(pool_config.result_ttl_seconds),
            pool_config.queue_depth,
            runner,
        );
        Self {
            client,
            toolbelt,
            pool,
            sessions,
            llm_config,
            immediate_timeout: Duration::from_secs(pool_config.immediate_timeout_seconds),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn pool_active(&self) -> bool {
        self.pool.is_accepting()
    }

    pub fn session_stats(&self, session_id: &str) -> SessionStats {
        let snapshot = self.sessions.snapshot(session_id);
        SessionStats {
            session_id: session_id.to_string(),
            query_count: snapshot.as_ref().map(|s| s.profile.query_count).unwrap_or(0),
            turn_count: snapshot.map(|s| s.turns.len()).unwrap_or(0),
        }
    }

    pub async fn process_query(
        &self,
        query: &str,
        session_id: &str,
    ) -> Result<QueryOutcome, AgentError> {
        let snapshot = self.sessions.get_or_create(session_id);
        let decision = DecisionPolicy::classify(query, &snapshot);
        info!(session_id, decision = %decision.label(), "Classified query");

        self.sessions.append_turn(session_id, Turn::user(query));

        let outcome = match decision {
            Decision::ImmediateSpecialist(kind) => {
                self.run_with_specialist(query, kind, session_id, &snapshot)
                    .await?
            }
            _ => self.run_generalist_path(query, session_id, &snapshot, decision).await?,
        };

        self.sessions.update_profile_after(
            session_id,
            &decision.label(),
            outcome_tokens_out(&outcome),
            DecisionPolicy::is_dissatisfied(query),
        );

        info!(
            session_id,
            agent = outcome.agent.as_str(),
            cost = %outcome.cost_usd,
            "Query complete"
        );
        Ok(outcome)
    }

    /// Steps 4-5 of the flow: generalist answer, then maybe a background
    /// pre-fetch for the predicted follow-up.
    async fn run_generalist_path(
        &self,
        query: &str,
        session_id: &str,
        snapshot: &Session,
        decision: Decision,
    ) -> Result<QueryOutcome, AgentError> {
        let run = self.run_generalist(snapshot, query, None).await?;

        for record in &run.tool_records {
            self.sessions
                .append_turn(session_id, Turn::tool(record.clone()));
        }
        self.sessions.append_turn(
            session_id,
            Turn::agent(run.text.clone(), run.cost_usd, run.tokens_in, run.tokens_out),
        );

        let mut prefetch_active = false;
        if let Decision::GeneralistThenPrefetch { kind, confidence } = decision {
            if confidence >= PREFETCH_CONFIDENCE_THRESHOLD {
                // Fire-and-forget; a later query with the same fingerprint
                // consumes the result from cache.
                let updated = self.sessions.get_or_create(session_id);
                let task = build_task(kind, query, &updated);
                info!(session_id, kind = %kind, fingerprint = %task.fingerprint(), "Scheduling pre-fetch");
                let _ = self.pool.submit(task, Priority::Prefetch).await;
                prefetch_active = true;
            }
        }

        Ok(QueryOutcome {
            response: run.text,
            cost_usd: run.cost_usd,
            agent: AgentTag::Generalist,
            session_id: session_id.to_string(),
            prefetch_active,
        })
    }

    /// Step 3 of the flow: immediate specialist with a concurrent anchor
    /// answer, a cache fast path, and a timeout fallback.
    async fn run_with_specialist(
        &self,
        query: &str,
        kind: SpecialistKind,
        session_id: &str,
        snapshot: &Session,
    ) -> Result<QueryOutcome, AgentError> {
        let task = build_task(kind, query, snapshot);
        let fingerprint = task.fingerprint();

        // A pre-fetch may already have produced this exact analysis.
        if let SpecialistStatus::Ready(result) = self.pool.try_get(fingerprint).await {
            info!(session_id, %fingerprint, "Serving specialist from pre-fetch cache");
            return self
                .synthesize_and_log(query, kind, session_id, None, &result)
                .await;
        }

        let mut future = self.pool.submit(task, Priority::Immediate).await;
        let anchor_system = Some(prompts::anchor_addition());
        let (anchor, specialist) = tokio::join!(
            self.run_generalist(snapshot, query, anchor_system),
            future.wait(self.immediate_timeout),
        );
        let anchor = anchor?;

        for record in &anchor.tool_records {
            self.sessions
                .append_turn(session_id, Turn::tool(record.clone()));
        }

        match specialist {
            Some(result) => {
                self.sessions.append_turn(
                    session_id,
                    Turn::agent(
                        anchor.text.clone(),
                        anchor.cost_usd,
                        anchor.tokens_in,
                        anchor.tokens_out,
                    ),
                );
                let mut outcome = self
                    .synthesize_and_log(query, kind, session_id, Some(&anchor.text), &result)
                    .await?;
                outcome.cost_usd += anchor.cost_usd;
                Ok(outcome)
            }
            None => {
                // Timed out (or failed): the anchor carries the response.
                // If the task still completes, its result stays cached for
                // a follow-up until TTL; that cost is sunk, not billed here.
                warn!(session_id, %fingerprint, "Specialist unavailable, returning anchor answer");
                let response = format!(
                    "{}\n\n(Deeper {kind} analysis is still running and was not ready in time.)",
                    anchor.text
                );
                self.sessions.append_turn(
                    session_id,
                    Turn::agent(
                        response.clone(),
                        anchor.cost_usd,
                        anchor.tokens_in,
                        anchor.tokens_out,
                    ),
                );
                Ok(QueryOutcome {
                    response,
                    cost_usd: anchor.cost_usd,
                    agent: AgentTag::Generalist,
                    session_id: session_id.to_string(),
                    prefetch_active: false,
                })
            }
        }
    }

    /// Synthesis turn over a consumed specialist result; appends the
    /// specialist record and the final agent turn.
    async fn synthesize_and_log(
        &self,
        query: &str,
        kind: SpecialistKind,
        session_id: &str,
        anchor: Option<&str>,
        result: &SpecialistResult,
    ) -> Result<QueryOutcome, AgentError> {
        let synthesis_spec = AgentSpec::synthesis(&self.llm_config);
        let agent = Agent::new(
            synthesis_spec,
            Arc::clone(&self.client),
            Arc::clone(&self.toolbelt),
        );
        let synthesis = agent
            .run(
                prompts::synthesis_system_prompt(),
                vec![Message::user_text(prompts::synthesis_prompt(
                    query,
                    anchor,
                    kind,
                    &result.content,
                ))],
            )
            .await?;

        // The specialist's output was surfaced, so its turn (and cost)
        // lands in the log.
        self.sessions.append_turn(
            session_id,
            Turn::tool(ToolRecord {
                tool_name: format!("specialist:{kind}"),
                arguments: serde_json::json!({ "fingerprint": result.fingerprint.to_string() }),
                result: serde_json::json!({ "content": result.content }),
            })
            .with_cost(result.cost_usd, result.tokens_in, result.tokens_out),
        );
        self.sessions.append_turn(
            session_id,
            Turn::agent(
                synthesis.text.clone(),
                synthesis.cost_usd,
                synthesis.tokens_in,
                synthesis.tokens_out,
            ),
        );

        Ok(QueryOutcome {
            response: synthesis.text,
            cost_usd: result.cost_usd + synthesis.cost_usd,
            agent: AgentTag::for_kind(kind),
            session_id: session_id.to_string(),
            prefetch_active: false,
        })
    }

    async fn run_generalist(
        &self,
        snapshot: &Session,
        query: &str,
        system_addition: Option<String>,
    ) -> Result<AgentRun, AgentError> {
        let spec = AgentSpec::generalist(&self.llm_config);
        let agent = Agent::new(spec, Arc::clone(&self.client), Arc::clone(&self.toolbelt));

        let mut system = prompts::generalist_system_prompt();
        if let Some(addition) = system_addition {
            system.push_str(&addition);
        }

        let mut messages = history_messages(&snapshot.turns);
        messages.push(Message::user_text(query));
        agent.run(system, messages).await
    }

    /// Cooperative shutdown; queued specialist work is cancelled and
    /// running tasks get a grace period.
    pub async fn shutdown(&self) {
        self.pool.shutdown(Duration::from_secs(10)).await;
        info!("Orchestrator shut down");
    }
}

fn outcome_tokens_out(outcome: &QueryOutcome) -> u32 {
    // Rough brevity signal: word count of the final response. Token-exact
    // counts live on the turns; the profile only needs the order of
    // magnitude.
    outcome.response.split_whitespace().count() as u32
}

/// Replay the session log as alternating provider messages; tool turns
/// are internal and stay out of the transcript.
fn history_messages(turns: &[Turn]) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    for turn in turns {
        let role = match turn.role {
            TurnRole::User => Role::User,
            TurnRole::Agent => Role::Assistant,
            TurnRole::Tool => continue,
        };
        let text = turn.content.as_prompt_text();
        match messages.last_mut() {
            Some(last) if last.role == role => {
                if let Some(ContentBlock::Text { text: existing }) = last.content.first_mut() {
                    existing.push_str("\n\n");
                    existing.push_str(&text);
                }
            }
            _ => messages.push(Message {
                role,
                content: vec![ContentBlock::Text { text }],
            }),
        }
    }
    messages
}
