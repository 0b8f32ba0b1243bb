//! Per-session CSRF tokens.
//!
//! A token is bound to exactly one session and stays stable for that
//! session's lifetime. Only state-changing methods are checked.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::warn;

use sentinel_core::{SessionId, constant_time_eq, random_token};

/// Random bytes per token before base64url encoding.
pub const TOKEN_BYTES: usize = 32;

/// Methods that never carry a CSRF check.
pub const SAFE_METHODS: [&str; 4] = ["GET", "HEAD", "OPTIONS", "TRACE"];

pub fn is_safe_method(method: &str) -> bool {
    SAFE_METHODS.contains(&method)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("request carries no CSRF token")]
    Missing,

    #[error("no CSRF token was issued for this session")]
    NoTokenIssued,

    #[error("CSRF token does not match the session token")]
    Mismatch,

    #[error("session expired before the CSRF check")]
    SessionExpired,
}

#[derive(Clone, PartialEq, Eq)]
pub struct CsrfToken {
    value: String,
    session_id: SessionId,
    issued_at: DateTime<Utc>,
}

impl CsrfToken {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

impl core::fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CsrfToken")
            .field("value", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Token registry keyed by session.
#[derive(Debug, Default)]
pub struct CsrfGuard {
    tokens: DashMap<SessionId, CsrfToken>,
}

impl CsrfGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `session`, replacing any previous one.
    pub fn issue(&self, session: &SessionId, now: DateTime<Utc>) -> CsrfToken {
        let token = new_token(session, now);
        self.tokens.insert(session.clone(), token.clone());
        token
    }

    /// The session's token, issuing one on first use.
    pub fn token_for(&self, session: &SessionId, now: DateTime<Utc>) -> CsrfToken {
        self.tokens
            .entry(session.clone())
            .or_insert_with(|| new_token(session, now))
            .value()
            .clone()
    }

    pub fn current(&self, session: &SessionId) -> Option<CsrfToken> {
        self.tokens.get(session).map(|t| t.value().clone())
    }

    /// Compare a submitted token against the session's token.
    pub fn check(&self, session: &SessionId, submitted: Option<&str>) -> Result<(), CsrfError> {
        let submitted = submitted.filter(|s| !s.is_empty()).ok_or(CsrfError::Missing)?;
        let expected = self.tokens.get(session).ok_or(CsrfError::NoTokenIssued)?;

        if constant_time_eq(expected.value.as_bytes(), submitted.as_bytes()) {
            Ok(())
        } else {
            Err(CsrfError::Mismatch)
        }
    }

    /// Method-aware check: safe methods always pass.
    pub fn validate(
        &self,
        method: &str,
        session: &SessionId,
        submitted: Option<&str>,
    ) -> Result<(), CsrfError> {
        if is_safe_method(method) {
            return Ok(());
        }

        self.check(session, submitted).inspect_err(|err| {
            warn!(
                method,
                session = session.fingerprint(),
                error = %err,
                "csrf check failed"
            );
        })
    }

    pub fn revoke(&self, session: &SessionId) -> bool {
        self.tokens.remove(session).is_some()
    }

    /// Revoke the tokens of every listed session. Returns how many existed.
    pub fn revoke_all<'a>(&self, sessions: impl IntoIterator<Item = &'a SessionId>) -> usize {
        sessions
            .into_iter()
            .filter(|id| self.revoke(id))
            .count()
    }

    /// Drop every token whose session `is_live` rejects. Returns how many
    /// were dropped.
    pub fn retain_live(&self, mut is_live: impl FnMut(&SessionId) -> bool) -> usize {
        let mut dropped = 0;
        self.tokens.retain(|session, _| {
            let keep = is_live(session);
            if !keep {
                dropped += 1;
            }
            keep
        });
        dropped
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn new_token(session: &SessionId, now: DateTime<Utc>) -> CsrfToken {
    CsrfToken {
        value: random_token(TOKEN_BYTES),
        session_id: session.clone(),
        issued_at: now,
    }
}
