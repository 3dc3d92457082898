use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::session::Turn;

/// Which specialist a task is routed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    Market,
    News,
}

impl SpecialistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialistKind::Market => "market_data",
            SpecialistKind::News => "news",
        }
    }
}

impl fmt::Display for SpecialistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic identity for a specialist submission. Used to coalesce
/// duplicate submits and to key the result cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Collapse formatting noise so that equivalent briefs share a fingerprint.
fn normalize_brief(brief: &str) -> String {
    brief
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn fingerprint(kind: SpecialistKind, brief: &str, session_id: &str) -> Fingerprint {
    let mut hasher = DefaultHasher::new();
    kind.as_str().hash(&mut hasher);
    normalize_brief(brief).hash(&mut hasher);
    session_id.hash(&mut hasher);
    Fingerprint(hasher.finish())
}

/// Input handed to a specialist worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub kind: SpecialistKind,
    /// Focused description of what the specialist should analyze.
    pub focused_brief: String,
    /// At most the last three turns of the originating session.
    pub context_window: Vec<Turn>,
    pub session_id: String,
}

impl Task {
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(self.kind, &self.focused_brief, &self.session_id)
    }
}

/// Output of one specialist run, as stored in the result cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecialistResult {
    pub kind: SpecialistKind,
    pub content: String,
    pub cost_usd: Decimal,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub created_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint(SpecialistKind::News, "Why did TSLA move?", "s1");
        let b = fingerprint(SpecialistKind::News, "Why did TSLA move?", "s1");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_normalizes_whitespace_and_case() {
        let a = fingerprint(SpecialistKind::News, "Why did  TSLA move?", "s1");
        let b = fingerprint(SpecialistKind::News, "why did tsla move?", "s1");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_separates_kind_and_session() {
        let base = fingerprint(SpecialistKind::News, "brief", "s1");
        assert_ne!(base, fingerprint(SpecialistKind::Market, "brief", "s1"));
        assert_ne!(base, fingerprint(SpecialistKind::News, "brief", "s2"));
    }

    #[test]
    fn task_fingerprint_matches_free_function() {
        let task = Task {
            kind: SpecialistKind::Market,
            focused_brief: "Analyze: show me AAPL RSI".to_string(),
            context_window: vec![],
            session_id: "default".to_string(),
        };
        assert_eq!(
            task.fingerprint(),
            fingerprint(SpecialistKind::Market, "Analyze: show me AAPL RSI", "default")
        );
    }

    #[test]
    fn roundtrip_specialist_result() {
        let result = SpecialistResult {
            kind: SpecialistKind::News,
            content: "TSLA fell on delivery numbers.".to_string(),
            cost_usd: dec!(0.0134),
            tokens_in: 900,
            tokens_out: 260,
            created_at: Utc::now(),
            fingerprint: fingerprint(SpecialistKind::News, "brief", "s1"),
        };
        let json = serde_json::to_string(&result).unwrap();
        let parsed: SpecialistResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, parsed);
    }
}
