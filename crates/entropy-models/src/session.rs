use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Responses shorter than this many output tokens count as "brief" for the
/// rolling user profile.
pub const BRIEF_RESPONSE_TOKENS: u32 = 60;

/// How many recent query classifications the profile remembers.
pub const PROFILE_DECISION_WINDOW: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
    Tool,
}

/// Structured record of one tool invocation, kept verbatim in the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRecord {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TurnContent {
    Text { text: String },
    ToolCall(ToolRecord),
}

impl TurnContent {
    /// Plain-text view used when replaying history into a prompt.
    pub fn as_prompt_text(&self) -> String {
        match self {
            TurnContent::Text { text } => text.clone(),
            TurnContent::ToolCall(record) => {
                format!("[tool {}] {}", record.tool_name, record.result)
            }
        }
    }
}

/// One append-only entry in a session's conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub id: Uuid,
    pub role: TurnRole,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
    /// LLM cost attributed to producing this turn. Zero for user and
    /// plain tool turns.
    pub cost_usd: Decimal,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(TurnRole::User, text, Decimal::ZERO, 0, 0)
    }

    pub fn agent(
        text: impl Into<String>,
        cost_usd: Decimal,
        tokens_in: u32,
        tokens_out: u32,
    ) -> Self {
        Self::text(TurnRole::Agent, text, cost_usd, tokens_in, tokens_out)
    }

    pub fn tool(record: ToolRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: TurnRole::Tool,
            content: TurnContent::ToolCall(record),
            timestamp: Utc::now(),
            cost_usd: Decimal::ZERO,
            tokens_in: 0,
            tokens_out: 0,
        }
    }

    fn text(
        role: TurnRole,
        text: impl Into<String>,
        cost_usd: Decimal,
        tokens_in: u32,
        tokens_out: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: TurnContent::Text { text: text.into() },
            timestamp: Utc::now(),
            cost_usd,
            tokens_in,
            tokens_out,
        }
    }

    /// Attach an explicit cost to a tool turn (used for specialist records,
    /// whose content was produced by an LLM).
    pub fn with_cost(mut self, cost_usd: Decimal, tokens_in: u32, tokens_out: u32) -> Self {
        self.cost_usd = cost_usd;
        self.tokens_in = tokens_in;
        self.tokens_out = tokens_out;
        self
    }
}

/// Rolling aggregate over a session used by the decision policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub query_count: u32,
    /// Labels of the last few classifications, newest last.
    pub recent_decisions: Vec<String>,
    /// Whether the most recent assistant response was brief.
    pub last_response_brief: bool,
    /// Whether the most recent user turn expressed dissatisfaction.
    pub last_turn_dissatisfied: bool,
}

impl UserProfile {
    pub fn record_decision(&mut self, label: impl Into<String>) {
        self.recent_decisions.push(label.into());
        if self.recent_decisions.len() > PROFILE_DECISION_WINDOW {
            let excess = self.recent_decisions.len() - PROFILE_DECISION_WINDOW;
            self.recent_decisions.drain(..excess);
        }
    }
}

/// One user thread: ordered turn log plus the rolling profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub turns: Vec<Turn>,
    pub profile: UserProfile,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
            profile: UserProfile::default(),
            created_at: Utc::now(),
        }
    }

    /// The last `n` turns in chronological order.
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn last_user_turns(&self, n: usize) -> Vec<&Turn> {
        let mut user_turns: Vec<&Turn> = self
            .turns
            .iter()
            .rev()
            .filter(|t| t.role == TurnRole::User)
            .take(n)
            .collect();
        user_turns.reverse();
        user_turns
    }

    pub fn last_agent_turn(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == TurnRole::Agent)
    }

    /// Tool records emitted after the most recent user turn, i.e. the tools
    /// the most recent assistant response relied on.
    pub fn tools_since_last_user_turn(&self) -> Vec<&ToolRecord> {
        let mut records = Vec::new();
        for turn in self.turns.iter().rev() {
            match (&turn.role, &turn.content) {
                (TurnRole::User, _) => break,
                (TurnRole::Tool, TurnContent::ToolCall(record)) => records.push(record),
                _ => {}
            }
        }
        records.reverse();
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn roundtrip_turn_with_tool_record() {
        let turn = Turn::tool(ToolRecord {
            tool_name: "get_price".to_string(),
            arguments: serde_json::json!({"ticker": "AAPL"}),
            result: serde_json::json!({"current_price": 189.95}),
        });
        let json = serde_json::to_string(&turn).unwrap();
        let parsed: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(turn, parsed);
    }

    #[test]
    fn agent_turn_carries_cost() {
        let turn = Turn::agent("AAPL is trading at $189.95.", dec!(0.0021), 420, 55);
        assert_eq!(turn.cost_usd, dec!(0.0021));
        assert_eq!(turn.tokens_out, 55);
    }

    #[test]
    fn recent_turns_window() {
        let mut session = Session::new("s1");
        for i in 0..5 {
            session.turns.push(Turn::user(format!("query {i}")));
        }
        let recent = session.recent_turns(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(
            recent[0].content.as_prompt_text(),
            "query 2".to_string()
        );

        // Asking for more than exists returns everything.
        assert_eq!(session.recent_turns(50).len(), 5);
    }

    #[test]
    fn last_user_turns_ordering() {
        let mut session = Session::new("s1");
        session.turns.push(Turn::user("first"));
        session
            .turns
            .push(Turn::agent("reply", Decimal::ZERO, 0, 0));
        session.turns.push(Turn::user("second"));

        let users = session.last_user_turns(2);
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].content.as_prompt_text(), "first");
        assert_eq!(users[1].content.as_prompt_text(), "second");
    }

    #[test]
    fn tools_since_last_user_turn_stops_at_user() {
        let mut session = Session::new("s1");
        session.turns.push(Turn::user("price of AAPL?"));
        session.turns.push(Turn::tool(ToolRecord {
            tool_name: "get_price".to_string(),
            arguments: serde_json::json!({"ticker": "AAPL"}),
            result: serde_json::json!({"current_price": 189.95}),
        }));
        session
            .turns
            .push(Turn::agent("$189.95", Decimal::ZERO, 0, 0));

        let tools = session.tools_since_last_user_turn();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_name, "get_price");
    }

    #[test]
    fn profile_decision_window_is_bounded() {
        let mut profile = UserProfile::default();
        for i in 0..20 {
            profile.record_decision(format!("d{i}"));
        }
        assert_eq!(profile.recent_decisions.len(), PROFILE_DECISION_WINDOW);
        assert_eq!(profile.recent_decisions.last().unwrap(), "d19");
    }
}
