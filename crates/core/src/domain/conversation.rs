use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::TimedEntry;
use crate::domain::snapshot::SystemSnapshot;
use crate::domain::workflow::WorkflowId;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: TurnRole::User, content: content.into(), timestamp: Utc::now() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, content: content.into(), timestamp: Utc::now() }
    }
}

/// Per-session state. History is kept in chronological order and bounded by
/// `history_limit`; the oldest turns are evicted first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub user_id: String,
    history: VecDeque<ConversationTurn>,
    history_limit: usize,
    pub snapshot: Option<TimedEntry<SystemSnapshot>>,
    pub active_workflow: Option<WorkflowId>,
    /// Set by the runtime after each request; never written from caller metadata.
    #[serde(default)]
    pub last_request_failed: bool,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_limit(session_id, user_id, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_limit(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        history_limit: usize,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
            snapshot: None,
            active_workflow: None,
            last_request_failed: false,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.history.push_back(turn);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history.iter().cloned().collect()
    }

    /// The last `count` turns, still in chronological order.
    pub fn recent_history(&self, count: usize) -> Vec<ConversationTurn> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn merge_metadata(&mut self, fields: &BTreeMap<String, Value>) {
        for (key, value) in fields {
            self.metadata.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::Value;

    use super::{ConversationContext, ConversationTurn, TurnRole};

    #[test]
    fn history_is_capped_with_oldest_evicted_first() {
        let mut context = ConversationContext::new("session-1", "user-1");
        for index in 0..25 {
            context.push_turn(ConversationTurn::user(format!("message {index}")));
        }

        let history = context.history();
        assert_eq!(history.len(), 20);
        assert_eq!(history.first().map(|turn| turn.content.as_str()), Some("message 5"));
        assert_eq!(history.last().map(|turn| turn.content.as_str()), Some("message 24"));
    }

    #[test]
    fn caller_metadata_cannot_set_the_failure_flag() {
        let mut context = ConversationContext::new("session-1", "user-1");
        let fields = BTreeMap::from([("last_request_failed".to_string(), Value::Bool(true))]);
        context.merge_metadata(&fields);

        assert!(!context.last_request_failed);
        assert_eq!(context.metadata["last_request_failed"], true);
    }

    #[test]
    fn recent_history_returns_tail_in_order() {
        let mut context = ConversationContext::new("session-1", "user-1");
        context.push_turn(ConversationTurn::user("hello"));
        context.push_turn(ConversationTurn::assistant("hi"));
        context.push_turn(ConversationTurn::user("find deals"));

        let recent = context.recent_history(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].role, TurnRole::Assistant);
        assert_eq!(recent[1].content, "find deals");
        assert_eq!(context.recent_history(10).len(), 3);
    }
}
