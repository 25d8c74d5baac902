//! Session id allocation and per-session completion tracking.
//!
//! Several logical sessions can share one physical connection. Each is
//! keyed by a random id whose prefix names its role, and owns the set of
//! series it expects the remote to complete.

use std::collections::{HashMap, HashSet};
use std::fmt;

use rand::Rng;

/// Length of the random suffix appended to the role prefix.
const SUFFIX_LEN: usize = 12;

/// What a session is used for; decides the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// Chart and one-shot quote sessions (`cs_`).
    Create,
    /// Push-mode quote subscriptions (`qs_`).
    Subscribe,
}

impl SessionRole {
    pub fn prefix(&self) -> &'static str {
        match self {
            SessionRole::Create => "cs_",
            SessionRole::Subscribe => "qs_",
        }
    }
}

/// Identifier of a logical session, e.g. `cs_qwertyuiopas`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for SessionId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Generates a fresh id: the role prefix followed by 12 random lowercase
/// ASCII letters.
pub fn new_session_id(role: SessionRole) -> SessionId {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| rng.random_range('a'..='z'))
        .collect();
    SessionId(format!("{}{suffix}", role.prefix()))
}

#[derive(Debug, Default)]
struct SessionState {
    expected: HashSet<String>,
    completed: HashSet<String>,
}

/// In-flight sessions of one connection and the series each one waits on.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id for `role` that no in-flight session of this registry
    /// already uses, and starts tracking it.
    pub fn open(&mut self, role: SessionRole) -> SessionId {
        let id = loop {
            let candidate = new_session_id(role);
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        self.sessions.insert(id.clone(), SessionState::default());
        id
    }

    /// Declares that `session` will not be complete until `series_id` is.
    pub fn register_series(&mut self, session: &SessionId, series_id: impl Into<String>) {
        self.sessions
            .entry(session.clone())
            .or_default()
            .expected
            .insert(series_id.into());
    }

    /// Records a completion marker. Returns `false` when the session or the
    /// series is unknown, in which case nothing changes.
    pub fn mark_completed(&mut self, session: &str, series_id: &str) -> bool {
        let Some(state) = self.sessions.get_mut(&SessionId::from(session)) else {
            return false;
        };
        if !state.expected.contains(series_id) {
            return false;
        }
        state.completed.insert(series_id.to_string());
        true
    }

    /// True iff every series registered for `session` has completed.
    ///
    /// A session with no registered series is never complete.
    pub fn is_complete(&self, session: &SessionId) -> bool {
        self.sessions.get(session).is_some_and(|state| {
            !state.expected.is_empty() && state.expected.is_subset(&state.completed)
        })
    }

    /// Series of `session` still waiting for their completion marker, sorted.
    pub fn pending(&self, session: &SessionId) -> Vec<String> {
        let Some(state) = self.sessions.get(session) else {
            return Vec::new();
        };
        let mut pending: Vec<String> = state
            .expected
            .difference(&state.completed)
            .cloned()
            .collect();
        pending.sort();
        pending
    }

    /// Stops tracking `session`.
    pub fn close(&mut self, session: &SessionId) {
        self.sessions.remove(session);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
