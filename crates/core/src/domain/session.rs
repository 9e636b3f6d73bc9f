use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::payment::{PaymentAttempt, PaymentState};

pub const MAX_CONVERSATION_TURNS: usize = 15;
pub const MAX_PAST_SEARCHES: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn for_user(user_id: &str, at: DateTime<Utc>) -> Self {
        Self(format!("{user_id}_{}", at.timestamp()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub timestamp: DateTime<Utc>,
    pub request_text: String,
    pub response_text: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl TurnRecord {
    pub fn new(request_text: impl Into<String>, response_text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            request_text: request_text.into(),
            response_text: response_text.into(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub timestamp: DateTime<Utc>,
    pub term: String,
    pub result_count: u32,
}

/// Everything remembered about one negotiation.
///
/// The bounded lists evict their oldest entries; payment attempts are never
/// evicted because they are the only evidence that money already moved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub user_id: Option<String>,
    pub conversation_history: Vec<TurnRecord>,
    pub user_preferences: BTreeMap<String, String>,
    pub past_searches: Vec<SearchRecord>,
    pub payment_attempts: Vec<PaymentAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: SessionId, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            conversation_history: Vec::new(),
            user_preferences: BTreeMap::new(),
            past_searches: Vec::new(),
            payment_attempts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_turn(&mut self, turn: TurnRecord) {
        self.conversation_history.push(turn);
        trim_front(&mut self.conversation_history, MAX_CONVERSATION_TURNS);
        self.touch();
    }

    pub fn push_search(&mut self, search: SearchRecord) {
        self.past_searches.push(search);
        trim_front(&mut self.past_searches, MAX_PAST_SEARCHES);
        self.touch();
    }

    pub fn set_preference(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.user_preferences.insert(key.into(), value.into());
        self.touch();
    }

    /// Appends a new attempt, or replaces the state of one already recorded.
    pub fn upsert_payment_attempt(&mut self, attempt: PaymentAttempt) {
        match self.payment_attempts.iter_mut().find(|existing| existing.id == attempt.id) {
            Some(existing) => *existing = attempt,
            None => self.payment_attempts.push(attempt),
        }
        self.touch();
    }

    pub fn latest_confirmed(&self) -> Option<&PaymentAttempt> {
        self.payment_attempts
            .iter()
            .rev()
            .find(|attempt| matches!(attempt.state, PaymentState::Confirmed { .. }))
    }

    pub fn in_flight_attempt(&self) -> Option<&PaymentAttempt> {
        self.payment_attempts.iter().rev().find(|attempt| attempt.state.is_in_flight())
    }

    pub fn blocking_attempt(&self) -> Option<&PaymentAttempt> {
        self.latest_confirmed().or_else(|| self.in_flight_attempt())
    }

    pub fn latest_timed_out(&self) -> Option<&PaymentAttempt> {
        self.payment_attempts.iter().rev().find(|attempt| attempt.state == PaymentState::TimedOut)
    }

    pub fn has_confirmed_payment(&self) -> bool {
        self.latest_confirmed().is_some()
    }

    /// Reference of the transfer the counterparty should be pointed at.
    pub fn known_transaction_reference(&self) -> Option<&str> {
        self.blocking_attempt().and_then(|attempt| attempt.transaction_reference.as_deref())
    }

    /// Counterparty messages from the last `window` turns, newest first, one per line.
    pub fn recent_counterparty_text(&self, window: usize) -> String {
        let start = self.conversation_history.len().saturating_sub(window);
        self.conversation_history[start..]
            .iter()
            .map(|turn| turn.request_text.as_str())
            .filter(|text| !text.is_empty())
            .rev()
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn trim_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}
