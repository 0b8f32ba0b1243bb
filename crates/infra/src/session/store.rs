use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use sentinel_core::SessionId;

use super::Session;

/// Concurrency-safe session storage.
///
/// Every method is a short, self-contained critical section: implementations
/// must never hold a lock across calls, so a sweep cannot remove a record
/// while another operation is in the middle of reading or updating it.
pub trait SessionStore: Send + Sync {
    fn load(&self, id: &SessionId) -> Option<Session>;

    /// Insert a new record. Returns `false` (and leaves the store untouched)
    /// when the id is already taken.
    fn insert(&self, session: Session) -> bool;

    /// Mutate a record in place and return the updated copy.
    fn update(&self, id: &SessionId, f: &mut dyn FnMut(&mut Session)) -> Option<Session>;

    fn remove(&self, id: &SessionId) -> Option<Session>;

    /// Remove every record expired at `now`, returning the removed ids.
    fn remove_expired(&self, now: DateTime<Utc>) -> Vec<SessionId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    fn load(&self, id: &SessionId) -> Option<Session> {
        (**self).load(id)
    }

    fn insert(&self, session: Session) -> bool {
        (**self).insert(session)
    }

    fn update(&self, id: &SessionId, f: &mut dyn FnMut(&mut Session)) -> Option<Session> {
        (**self).update(id, f)
    }

    fn remove(&self, id: &SessionId) -> Option<Session> {
        (**self).remove(id)
    }

    fn remove_expired(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        (**self).remove_expired(now)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// In-memory store backed by a sharded concurrent map.
///
/// Reads and writes only lock the shard owning the key; sweeps walk the shards
/// one at a time, so request handling is never paused globally.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: DashMap<SessionId, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn load(&self, id: &SessionId) -> Option<Session> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    fn insert(&self, session: Session) -> bool {
        match self.inner.entry(session.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    fn update(&self, id: &SessionId, f: &mut dyn FnMut(&mut Session)) -> Option<Session> {
        let mut entry = self.inner.get_mut(id)?;
        f(entry.value_mut());
        Some(entry.value().clone())
    }

    fn remove(&self, id: &SessionId) -> Option<Session> {
        self.inner.remove(id).map(|(_, session)| session)
    }

    fn remove_expired(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let mut removed = Vec::new();
        self.inner.retain(|id, session| {
            if session.is_expired(now) {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
