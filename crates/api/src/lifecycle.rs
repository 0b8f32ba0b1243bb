//! Login and logout transitions.
//!
//! Login moves a session from anonymous to authenticated under a new id and
//! a new CSRF token; logout drops both. Nothing issued before a transition
//! is accepted after it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use sentinel_auth::Subject;
use sentinel_core::SessionId;
use sentinel_infra::{CsrfGuard, CsrfToken, Session, SessionManager};

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub csrf_token: CsrfToken,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    sessions: Arc<SessionManager>,
    csrf: Arc<CsrfGuard>,
}

impl Lifecycle {
    pub fn new(sessions: Arc<SessionManager>, csrf: Arc<CsrfGuard>) -> Self {
        Self { sessions, csrf }
    }

    pub fn login(&self, previous: &SessionId, subject: Subject, now: DateTime<Utc>) -> LoginOutcome {
        let name = subject.name().to_string();
        let session = self.sessions.authenticate(previous, subject, now);
        self.csrf.revoke(previous);
        let csrf_token = self.csrf.issue(&session.id, now);

        info!(
            subject = %name,
            session = session.id.fingerprint(),
            "login"
        );
        LoginOutcome {
            session,
            csrf_token,
        }
    }

    /// Returns `false` when the session was already gone.
    pub fn logout(&self, id: &SessionId) -> bool {
        let subject = self
            .sessions
            .get(id)
            .and_then(|s| s.subject)
            .map(|s| s.name().to_string());
        let existed = self.sessions.invalidate(id);
        self.csrf.revoke(id);

        if existed {
            info!(
                subject = subject.as_deref().unwrap_or_default(),
                session = id.fingerprint(),
                "logout"
            );
        }
        existed
    }
}
