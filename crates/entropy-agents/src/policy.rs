use tracing::debug;

use entropy_models::{Session, SpecialistKind, Task};

use crate::toolbelt::extract_tickers;

/// Minimum predicted-hit confidence before background work is scheduled.
pub const PREFETCH_CONFIDENCE_THRESHOLD: f64 = 0.80;

/// Sessions at or past this many queries get the power-user rules.
pub const POWER_USER_THRESHOLD: u32 = 10;

/// Routing outcome for one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    GeneralistOnly,
    ImmediateSpecialist(SpecialistKind),
    GeneralistThenPrefetch {
        kind: SpecialistKind,
        confidence: f64,
    },
}

impl Decision {
    pub fn label(&self) -> String {
        match self {
            Decision::GeneralistOnly => "generalist".to_string(),
            Decision::ImmediateSpecialist(kind) => format!("immediate_{kind}"),
            Decision::GeneralistThenPrefetch { kind, .. } => format!("prefetch_{kind}"),
        }
    }
}

/// Every string pattern the classifier matches on, in one place. These are
/// part of the routing contract; tests depend on them.
pub mod patterns {
    use regex::Regex;
    use std::sync::LazyLock;

    pub static TECHNICAL_JARGON: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)\b(rsi|macd|ema|sma|bollinger|support|resistance|momentum|oscillator|overbought|oversold|moving average|golden cross|death cross|technical indicator|technical analysis|relative strength)\b",
        )
        .unwrap()
    });

    pub static DEPTH_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)\b(detailed analysis|comprehensive report|in[- ]depth|dive deeper|deep dive|full breakdown|complete analysis)\b",
        )
        .unwrap()
    });

    pub static DISSATISFACTION: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(not enough detail|not enough|tell me more|elaborate|more detail|why)\b")
            .unwrap()
    });

    pub static ANALYTICAL: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(compare|versus|vs|top|best|worst|performance|analyze|evaluate|assess)\b")
            .unwrap()
    });

    pub static WHAT_MOVED: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)(what moved|why did .* move|what happened to|what caused)").unwrap()
    });

    pub static FOLLOWUP: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(why|how|what about|tell me|more)\b|\?").unwrap()
    });

    pub static NEWS_MENTION: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(news|latest|recent|update|headline|article)\b").unwrap()
    });

    pub static NEWS_TOPIC: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(news|article|story|narrative|sentiment|headline|coverage)\b").unwrap()
    });
}

/// Conservative routing policy: eight ordered rules, first match wins.
/// Pure and deterministic over `(query, session snapshot)`.
pub struct DecisionPolicy;

impl DecisionPolicy {
    pub fn classify(query: &str, session: &Session) -> Decision {
        // 1. Technical jargon goes straight to the market specialist.
        if patterns::TECHNICAL_JARGON.is_match(query) {
            debug!("Routing: technical jargon detected");
            return Decision::ImmediateSpecialist(SpecialistKind::Market);
        }

        // 2. Explicit depth request; topic follows the last assistant turn.
        if patterns::DEPTH_REQUEST.is_match(query) {
            let kind = if last_agent_turn_mentions_news(session) {
                SpecialistKind::News
            } else {
                SpecialistKind::Market
            };
            debug!(kind = %kind, "Routing: depth request");
            return Decision::ImmediateSpecialist(kind);
        }

        // 3. Dissatisfaction follow-up; topic follows the prior response's
        //    tool usage. A bare "why?" with nothing to point at gets news.
        let has_prior_user_turn = !session.last_user_turns(1).is_empty();
        if has_prior_user_turn && patterns::DISSATISFACTION.is_match(query) {
            let kind = if session.last_agent_turn().is_none()
                || previous_response_used_search_news(session)
            {
                SpecialistKind::News
            } else {
                SpecialistKind::Market
            };
            debug!(kind = %kind, "Routing: dissatisfaction follow-up");
            return Decision::ImmediateSpecialist(kind);
        }

        // 4. Power users asking analytical questions.
        if session.profile.query_count >= POWER_USER_THRESHOLD
            && patterns::ANALYTICAL.is_match(query)
        {
            debug!("Routing: power-user analytical query");
            return Decision::ImmediateSpecialist(SpecialistKind::Market);
        }

        // 5. "What moved X": the generalist answer will be brief; pre-fetch
        //    the news narrative behind it.
        if patterns::WHAT_MOVED.is_match(query) && !resolve_tickers(query, session).is_empty() {
            debug!("Routing: what-moved pre-fetch");
            return Decision::GeneralistThenPrefetch {
                kind: SpecialistKind::News,
                confidence: 0.85,
            };
        }

        // 6. Two consecutive follow-ups predict another one.
        if has_followup_pattern(session) {
            debug!("Routing: follow-up pattern pre-fetch");
            return Decision::GeneralistThenPrefetch {
                kind: SpecialistKind::Market,
                confidence: 0.80,
            };
        }

        // 7. Power users asking about news.
        if session.profile.query_count >= POWER_USER_THRESHOLD
            && patterns::NEWS_MENTION.is_match(query)
        {
            debug!("Routing: power-user news pre-fetch");
            return Decision::GeneralistThenPrefetch {
                kind: SpecialistKind::News,
                confidence: 0.80,
            };
        }

        Decision::GeneralistOnly
    }

    /// Whether a query reads as dissatisfaction with the previous answer.
    /// Used when updating the rolling profile.
    pub fn is_dissatisfied(query: &str) -> bool {
        patterns::DISSATISFACTION.is_match(query)
    }
}

fn last_agent_turn_mentions_news(session: &Session) -> bool {
    session
        .last_agent_turn()
        .map(|turn| patterns::NEWS_TOPIC.is_match(&turn.content.as_prompt_text()))
        .unwrap_or(false)
}

fn previous_response_used_search_news(session: &Session) -> bool {
    session
        .tools_since_last_user_turn()
        .iter()
        .any(|record| record.tool_name == "search_news")
}

fn has_followup_pattern(session: &Session) -> bool {
    let recent_users = session.last_user_turns(2);
    recent_users.len() == 2
        && recent_users
            .iter()
            .all(|turn| patterns::FOLLOWUP.is_match(&turn.content.as_prompt_text()))
}

/// Tickers named in the query, falling back to the last three turns of
/// conversation. Order follows the tracked universe, so equivalent
/// contexts produce identical lists.
pub fn resolve_tickers(query: &str, session: &Session) -> Vec<String> {
    let from_query = extract_tickers(query);
    if !from_query.is_empty() {
        return from_query;
    }
    let recent_text: String = session
        .recent_turns(3)
        .iter()
        .map(|t| t.content.as_prompt_text())
        .collect::<Vec<_>>()
        .join(" ");
    extract_tickers(&recent_text)
}

/// Build the specialist task for a query. The focused brief is derived
/// from stable features of the query (focus + tickers), not its raw text,
/// so a pre-fetch and the follow-up that consumes it share a fingerprint.
pub fn build_task(
    kind: SpecialistKind,
    query: &str,
    session: &Session,
) -> Task {
    let tickers = resolve_tickers(query, session);
    let tickers_part = if tickers.is_empty() {
        "unspecified".to_string()
    } else {
        tickers.join(",")
    };
    let focus = match kind {
        SpecialistKind::News => news_focus(query).to_string(),
        SpecialistKind::Market => market_requirements(query),
    };
    Task {
        kind,
        focused_brief: format!("{} analysis; focus: {focus}; tickers: {tickers_part}", kind.as_str()),
        context_window: session.recent_turns(3).to_vec(),
        session_id: session.id.clone(),
    }
}

/// First-match focus selection keeps re-phrasings of the same follow-up on
/// the same brief.
fn news_focus(query: &str) -> &'static str {
    if patterns::WHAT_MOVED.is_match(query)
        || regex_match(query, r"(?i)\b(moved|cause|caused|driven|impact)\b")
    {
        "price-moving events and catalysts"
    } else if regex_match(query, r"(?i)\b(sentiment|mood|perception)\b") {
        "sentiment and tone of coverage"
    } else if regex_match(query, r"(?i)\b(earnings|results|report)\b") {
        "earnings and financial results"
    } else if regex_match(query, r"(?i)\b(recent|latest|today|this week|update)\b") {
        "most recent coverage"
    } else {
        "comprehensive coverage and synthesis"
    }
}

fn market_requirements(query: &str) -> String {
    let mut requirements = Vec::new();
    if regex_match(query, r"(?i)\b(price|trading at|current)\b") {
        requirements.push("current price and changes");
    }
    if patterns::TECHNICAL_JARGON.is_match(query) {
        requirements.push("technical indicators (RSI, MACD, moving averages)");
    }
    if regex_match(query, r"(?i)\b(compare|vs|versus|compared to)\b") {
        requirements.push("cross-stock comparison");
    }
    if regex_match(query, r"(?i)\b(momentum|trend|direction)\b") {
        requirements.push("momentum and trend analysis");
    }
    if regex_match(query, r"(?i)\b(fundamental|valuation|metrics)\b") {
        requirements.push("fundamental metrics and valuation");
    }
    if requirements.is_empty() {
        requirements.push("comprehensive analysis");
    }
    requirements.join("; ")
}

fn regex_match(text: &str, pattern: &str) -> bool {
    regex::Regex::new(pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
