use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use entropy_models::{Session, Turn, UserProfile, BRIEF_RESPONSE_TOKENS};

/// Process-wide session map, created on first use and never evicted
/// in-process (sessions are small and short-lived). All turn and profile
/// access happens under the mutex.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of a session, creating it if needed.
    pub fn get_or_create(&self, session_id: &str) -> Session {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "Created session");
                Session::new(session_id)
            })
            .clone()
    }

    pub fn snapshot(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned()
    }

    /// Append a turn, clamping its timestamp so the log stays monotonic
    /// even when turns were constructed out of order.
    pub fn append_turn(&self, session_id: &str, mut turn: Turn) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        if let Some(last) = session.turns.last() {
            if turn.timestamp < last.timestamp {
                turn.timestamp = last.timestamp;
            }
        }
        session.turns.push(turn);
    }

    pub fn append_turns(&self, session_id: &str, turns: Vec<Turn>) {
        for turn in turns {
            self.append_turn(session_id, turn);
        }
    }

    pub fn recent_turns(&self, session_id: &str, n: usize) -> Vec<Turn> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .map(|s| s.recent_turns(n).to_vec())
            .unwrap_or_default()
    }

    pub fn profile(&self, session_id: &str) -> UserProfile {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .map(|s| s.profile.clone())
            .unwrap_or_default()
    }

    /// Roll the profile forward after a completed query.
    pub fn update_profile_after(
        &self,
        session_id: &str,
        decision_label: &str,
        response_tokens_out: u32,
        dissatisfied: bool,
    ) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        let profile = &mut session.profile;
        profile.query_count += 1;
        profile.record_decision(decision_label);
        profile.last_response_brief = response_tokens_out < BRIEF_RESPONSE_TOKENS;
        profile.last_turn_dissatisfied = dissatisfied;
        debug!(
            session_id,
            query_count = profile.query_count,
            turns = session.turns.len(),
            "Updated session profile"
        );
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn create_on_first_use() {
        let store = SessionStore::new();
        assert_eq!(store.session_count(), 0);
        let session = store.get_or_create("s1");
        assert_eq!(session.id, "s1");
        assert_eq!(store.session_count(), 1);

        // Same id returns the same session.
        store.append_turn("s1", Turn::user("hello"));
        let again = store.get_or_create("s1");
        assert_eq!(again.turns.len(), 1);
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn timestamps_stay_monotonic() {
        let store = SessionStore::new();
        let mut early = Turn::user("first");
        let mut late = Turn::user("second");
        // Deliberately construct out-of-order timestamps.
        late.timestamp = Utc::now();
        early.timestamp = late.timestamp + Duration::seconds(5);

        store.append_turn("s1", early);
        store.append_turn("s1", late);

        let session = store.snapshot("s1").unwrap();
        assert!(session.turns[1].timestamp >= session.turns[0].timestamp);
    }

    #[test]
    fn profile_rolls_forward() {
        let store = SessionStore::new();
        store.get_or_create("s1");
        store.update_profile_after("s1", "generalist", 20, false);
        store.update_profile_after("s1", "immediate_market_data", 500, true);

        let profile = store.profile("s1");
        assert_eq!(profile.query_count, 2);
        assert_eq!(
            profile.recent_decisions,
            vec!["generalist", "immediate_market_data"]
        );
        assert!(!profile.last_response_brief); // 500 tokens is not brief
        assert!(profile.last_turn_dissatisfied);
    }

    #[test]
    fn brief_response_flag_uses_token_threshold() {
        let store = SessionStore::new();
        store.update_profile_after("s1", "generalist", BRIEF_RESPONSE_TOKENS - 1, false);
        assert!(store.profile("s1").last_response_brief);
    }

    #[test]
    fn recent_turns_from_store() {
        let store = SessionStore::new();
        for i in 0..5 {
            store.append_turn("s1", Turn::user(format!("q{i}")));
        }
        let recent = store.recent_turns("s1", 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].content.as_prompt_text(), "q4");

        assert!(store.recent_turns("missing", 3).is_empty());
    }

    #[test]
    fn unknown_session_has_default_profile() {
        let store = SessionStore::new();
        let profile = store.profile("nope");
        assert_eq!(profile.query_count, 0);
    }
}
