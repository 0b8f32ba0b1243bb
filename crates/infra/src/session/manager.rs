use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use sentinel_auth::Subject;
use sentinel_core::SessionId;

use super::{InMemorySessionStore, Session, SessionStore};
use crate::config::ConfigError;

const DEFAULT_GC_INTERVAL_SECS: u64 = 3600;
const DEFAULT_MAX_LIFETIME_SECS: u64 = 3600;
const MAX_LIFETIME_CEILING_SECS: u64 = 365 * 24 * 3600;

/// Timing knobs for session handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Period between background sweeps.
    pub gc_interval: std::time::Duration,
    /// Idle time after which a session is expired.
    pub max_lifetime: Duration,
}

impl SessionSettings {
    pub fn from_secs(gc_interval_secs: u64, max_lifetime_secs: u64) -> Result<Self, ConfigError> {
        if gc_interval_secs == 0 {
            return Err(ConfigError::invalid("session.gc_interval_secs must be positive"));
        }
        if max_lifetime_secs == 0 {
            return Err(ConfigError::invalid("session.max_lifetime_secs must be positive"));
        }
        if max_lifetime_secs > MAX_LIFETIME_CEILING_SECS {
            return Err(ConfigError::invalid(format!(
                "session.max_lifetime_secs must not exceed {MAX_LIFETIME_CEILING_SECS}"
            )));
        }

        Ok(Self {
            gc_interval: std::time::Duration::from_secs(gc_interval_secs),
            // Bounded by the ceiling above, so the cast cannot wrap.
            max_lifetime: Duration::seconds(max_lifetime_secs as i64),
        })
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            gc_interval: std::time::Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            max_lifetime: Duration::seconds(DEFAULT_MAX_LIFETIME_SECS as i64),
        }
    }
}

/// Result of [`SessionManager::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub session: Session,
    /// `true` when no live session matched and a fresh one was issued; the
    /// caller must hand the new id back to the client.
    pub created: bool,
}

/// Issues, resolves and expires sessions.
///
/// All timing decisions take an explicit `now` so behavior is reproducible.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    settings: SessionSettings,
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("settings", &self.settings)
            .field("live", &self.store.len())
            .finish()
    }
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, settings: SessionSettings) -> Self {
        Self { store, settings }
    }

    pub fn in_memory(settings: SessionSettings) -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()), settings)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Find the live session named by `raw_id`, touching it, or issue a new
    /// one. Malformed, unknown and expired ids all yield a fresh session;
    /// an expired record is removed on the spot.
    pub fn resolve(&self, raw_id: Option<&str>, now: DateTime<Utc>) -> Resolved {
        if let Some(id) = raw_id.and_then(|raw| raw.parse::<SessionId>().ok()) {
            if let Some(session) = self.touch(&id, now) {
                return Resolved {
                    session,
                    created: false,
                };
            }
        }

        Resolved {
            session: self.create(now),
            created: true,
        }
    }

    /// Record activity on a live session. Returns `None` when the session is
    /// unknown or already expired; an expired record is removed.
    pub fn touch(&self, id: &SessionId, now: DateTime<Utc>) -> Option<Session> {
        let ttl = self.settings.max_lifetime;
        let mut expired = false;
        let session = self.store.update(id, &mut |s| {
            expired = s.is_expired(now);
            if !expired {
                s.touch(now, ttl);
            }
        })?;

        if expired {
            self.store.remove(id);
            debug!(session = id.fingerprint(), "expired session dropped on access");
            return None;
        }
        Some(session)
    }

    /// Remove a session. Returns `false` if it did not exist.
    pub fn invalidate(&self, id: &SessionId) -> bool {
        let removed = self.store.remove(id).is_some();
        if removed {
            debug!(session = id.fingerprint(), "session invalidated");
        }
        removed
    }

    /// Bind `subject` to the session under a fresh id.
    ///
    /// The previous id stops resolving immediately. Attributes of a live
    /// previous session carry over; a missing or expired one is ignored.
    pub fn authenticate(&self, previous: &SessionId, subject: Subject, now: DateTime<Utc>) -> Session {
        let carried = self
            .store
            .remove(previous)
            .filter(|s| !s.is_expired(now))
            .map(|s| s.attributes)
            .unwrap_or_default();

        let session = self.create_with(now, |s| {
            s.subject = Some(subject.clone());
            s.attributes = carried.clone();
        });

        info!(
            session = session.id.fingerprint(),
            subject = %session.subject.as_ref().map(Subject::name).unwrap_or_default(),
            "session authenticated"
        );
        session
    }

    pub fn set_attribute(
        &self,
        id: &SessionId,
        key: impl Into<String>,
        value: serde_json::Value,
        now: DateTime<Utc>,
    ) -> bool {
        let ttl = self.settings.max_lifetime;
        let key = key.into();
        let mut applied = false;
        self.store.update(id, &mut |s| {
            if !s.is_expired(now) {
                s.attributes.insert(key.clone(), value.clone());
                s.touch(now, ttl);
                applied = true;
            }
        });
        applied
    }

    pub fn attribute(&self, id: &SessionId, key: &str) -> Option<serde_json::Value> {
        self.store.load(id)?.attributes.get(key).cloned()
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.store.load(id)
    }

    /// Whether a record exists for `id`, expired or not.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.store.load(id).is_some()
    }

    /// Remove every session expired at `now`. Safe to run concurrently with
    /// request handling.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let removed = self.store.remove_expired(now);
        debug!(removed = removed.len(), remaining = self.store.len(), "session sweep");
        removed
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn create(&self, now: DateTime<Utc>) -> Session {
        self.create_with(now, |_| {})
    }

    fn create_with(&self, now: DateTime<Utc>, init: impl Fn(&mut Session)) -> Session {
        loop {
            let mut session = Session::new(SessionId::generate(), now, self.settings.max_lifetime);
            init(&mut session);
            if self.store.insert(session.clone()) {
                debug!(session = session.id.fingerprint(), "session issued");
                return session;
            }
        }
    }
}
