//! Session table.
//!
//! Conversation contexts live in a [`KeyValueStore`] keyed by session id. Requests
//! for one session are serialised through a per-session async lock so history is
//! appended in request order; different sessions never wait on each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dealpilot_core::domain::conversation::{
    ConversationContext, ConversationTurn, DEFAULT_HISTORY_LIMIT,
};
use dealpilot_core::store::{InMemoryStore, KeyValueStore};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub type SessionGuard = OwnedMutexGuard<()>;

pub struct SessionStore {
    sessions: Arc<dyn KeyValueStore<String, ConversationContext>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    history_limit: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), DEFAULT_HISTORY_LIMIT)
    }
}

impl SessionStore {
    pub fn new(
        sessions: Arc<dyn KeyValueStore<String, ConversationContext>>,
        history_limit: usize,
    ) -> Self {
        Self { sessions, locks: DashMap::new(), history_limit: history_limit.max(1) }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Waits until no other request holds `session_id`. Hold the guard for the whole
    /// request.
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let lock = Arc::clone(&self.locks.entry(session_id.to_string()).or_default());
        lock.lock_owned().await
    }

    /// Returns the stored context, creating an empty one on first use, and merges
    /// caller-supplied fields into its metadata.
    pub fn open(
        &self,
        session_id: &str,
        user_id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> ConversationContext {
        let history_limit = self.history_limit;
        let mut opened = None;
        self.sessions.modify(session_id.to_string(), &mut |current| {
            let mut context = current.unwrap_or_else(|| {
                tracing::debug!(
                    event_name = "session.created",
                    session_id,
                    user_id,
                    "created conversation context"
                );
                ConversationContext::with_limit(session_id, user_id, history_limit)
            });
            context.merge_metadata(fields);
            opened = Some(context.clone());
            Some(context)
        });
        opened.unwrap_or_else(|| ConversationContext::with_limit(session_id, user_id, history_limit))
    }

    pub fn get(&self, session_id: &str) -> Option<ConversationContext> {
        self.sessions.get(&session_id.to_string())
    }

    /// Applies `apply` to a stored context. Returns false for unknown sessions.
    pub fn update(&self, session_id: &str, apply: impl FnOnce(&mut ConversationContext)) -> bool {
        let mut apply = Some(apply);
        let mut found = false;
        self.sessions.modify(session_id.to_string(), &mut |current| {
            let mut context = current?;
            if let Some(apply) = apply.take() {
                apply(&mut context);
                found = true;
            }
            Some(context)
        });
        found
    }

    pub fn append_exchange(&self, session_id: &str, user: ConversationTurn, reply: ConversationTurn) {
        let mut turns = Some((user, reply));
        self.sessions.modify(session_id.to_string(), &mut |current| {
            let mut context = current?;
            if let Some((user, reply)) = turns.take() {
                context.push_turn(user);
                context.push_turn(reply);
            }
            Some(context)
        });
    }

    /// Chronological history, empty for unknown sessions.
    pub fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.get(session_id).map(|context| context.history()).unwrap_or_default()
    }

    pub fn remove(&self, session_id: &str) -> Option<ConversationContext> {
        self.locks.remove(session_id);
        self.sessions.delete(&session_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
