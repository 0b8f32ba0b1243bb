//! Session records, their storage and lifecycle.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use sentinel_auth::Subject;
use sentinel_core::SessionId;

pub mod manager;
pub mod store;

pub use manager::{Resolved, SessionManager, SessionSettings};
pub use store::{InMemorySessionStore, SessionStore};

/// Server-side session record.
///
/// # Invariants
/// - `last_access_at >= created_at`, and `last_access_at` never moves
///   backwards.
/// - `expires_at == last_access_at + max_lifetime`.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// `None` until the session authenticates.
    pub subject: Option<Subject>,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(id: SessionId, now: DateTime<Utc>, max_lifetime: Duration) -> Self {
        Self {
            id,
            created_at: now,
            last_access_at: now,
            expires_at: now + max_lifetime,
            subject: None,
            attributes: HashMap::new(),
        }
    }

    /// Record activity. Clock readings older than the last access are
    /// ignored so the access time stays monotonic under racing requests.
    pub fn touch(&mut self, now: DateTime<Utc>, max_lifetime: Duration) {
        if now > self.last_access_at {
            self.last_access_at = now;
        }
        self.expires_at = self.last_access_at + max_lifetime;
    }

    /// Expired once more than `max_lifetime` has passed since the last access.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject.as_ref().is_some_and(Subject::is_authenticated)
    }
}
