//! Conversation Store
//!
//! Bounded, per-session history of completed turns.

use crate::config::MAX_RESULT_IDENTIFIERS;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One completed question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub statement: Option<String>,
    pub target_entity_type: Option<String>,
    #[serde(default)]
    pub result_identifiers: Vec<String>,
    #[serde(default)]
    pub result_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        question: impl Into<String>,
        statement: Option<String>,
        target_entity_type: Option<String>,
        mut result_identifiers: Vec<String>,
        result_count: u64,
    ) -> Self {
        result_identifiers.truncate(MAX_RESULT_IDENTIFIERS);
        Self {
            question: question.into(),
            statement,
            target_entity_type,
            result_identifiers,
            result_count,
            timestamp: Utc::now(),
        }
    }
}

/// Holds at most `capacity` turns, evicting the oldest first.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    turns: Vec<ConversationTurn>,
    capacity: usize,
}

impl ConversationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Seed a store from caller-supplied history, keeping only the newest turns.
    pub fn from_turns(capacity: usize, turns: impl IntoIterator<Item = ConversationTurn>) -> Self {
        let mut store = Self::new(capacity);
        for turn in turns {
            store.append(turn);
        }
        store
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        while self.turns.len() > self.capacity {
            self.turns.remove(0);
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Session-keyed stores. Each session has its own lock so appends are
/// serialized per conversation rather than globally.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Mutex<ConversationStore>>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity,
        }
    }

    pub fn session(&self, session_id: &str) -> Arc<Mutex<ConversationStore>> {
        let capacity = self.capacity;
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationStore::new(capacity))))
            .value()
            .clone()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
