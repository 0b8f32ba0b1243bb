//! The three standard pipeline stages.

use std::sync::Arc;

use tracing::debug;

use sentinel_auth::{DecisionReason, Enforcer, Subject};
use sentinel_infra::csrf::is_safe_method;
use sentinel_infra::{CsrfError, CsrfGuard, SessionManager};

use crate::pipeline::{ForbiddenReason, Next, Outcome, Rejection, Stage};
use crate::request::RequestContext;

/// Resolves (or creates) the session and derives the subject. Never rejects.
pub struct SessionStage {
    sessions: Arc<SessionManager>,
    anonymous_subject: String,
}

impl SessionStage {
    pub fn new(sessions: Arc<SessionManager>, anonymous_subject: impl Into<String>) -> Self {
        Self {
            sessions,
            anonymous_subject: anonymous_subject.into(),
        }
    }
}

impl Stage for SessionStage {
    fn name(&self) -> &'static str {
        "session"
    }

    fn call(&self, ctx: &mut RequestContext, next: Next<'_>) -> Outcome {
        let resolved = self
            .sessions
            .resolve(ctx.request.session_id.as_deref(), ctx.now);

        ctx.subject = resolved
            .session
            .subject
            .clone()
            .unwrap_or_else(|| Subject::anonymous(self.anonymous_subject.clone()));
        ctx.session_created = resolved.created;
        ctx.session = Some(resolved.session);

        next.run(ctx)
    }
}

/// Checks the CSRF token on state-changing methods and exposes the session's
/// token to later stages and handlers.
pub struct CsrfStage {
    csrf: Arc<CsrfGuard>,
}

impl CsrfStage {
    pub fn new(csrf: Arc<CsrfGuard>) -> Self {
        Self { csrf }
    }
}

impl Stage for CsrfStage {
    fn name(&self) -> &'static str {
        "csrf"
    }

    fn call(&self, ctx: &mut RequestContext, next: Next<'_>) -> Outcome {
        let Some(session_id) = ctx.session_id().cloned() else {
            return Outcome::Reject(Rejection::Forbidden(ForbiddenReason::Csrf(
                CsrfError::SessionExpired,
            )));
        };

        let method = ctx.request.method.as_str();
        if !is_safe_method(method) {
            // Checked before any token is issued, so a brand-new session has
            // nothing to match against.
            if let Err(err) =
                self.csrf
                    .validate(method, &session_id, ctx.request.csrf_token.as_deref())
            {
                return Outcome::Reject(Rejection::Forbidden(ForbiddenReason::Csrf(err)));
            }
        }

        ctx.csrf_token = Some(self.csrf.token_for(&session_id, ctx.now));
        next.run(ctx)
    }
}

/// Enforces `(subject, path, method)` against the policy.
pub struct PolicyStage {
    enforcer: Arc<Enforcer>,
    login_path: String,
}

impl PolicyStage {
    pub fn new(enforcer: Arc<Enforcer>, login_path: impl Into<String>) -> Self {
        Self {
            enforcer,
            login_path: login_path.into(),
        }
    }

    /// A deny written for `/x/` also covers `/x`, and the reverse. Allows
    /// still have to match the path as spelled.
    fn denied_as_twin(&self, subject: &Subject, path: &str, action: &str) -> bool {
        let twin = match path.strip_suffix('/') {
            Some("") => return false,
            Some(bare) => bare.to_string(),
            None => format!("{path}/"),
        };
        self.enforcer.explain(subject, &twin, action).reason == DecisionReason::ExplicitDeny
    }

    fn login_redirect(&self, path: &str) -> String {
        match serde_urlencoded::to_string([("next", path)]) {
            Ok(query) => format!("{}?{query}", self.login_path),
            Err(_) => self.login_path.clone(),
        }
    }
}

impl Stage for PolicyStage {
    fn name(&self) -> &'static str {
        "policy"
    }

    fn call(&self, ctx: &mut RequestContext, next: Next<'_>) -> Outcome {
        let path = ctx.request.path.as_str();
        let action = ctx.request.method.as_str();
        let allowed = self.enforcer.enforce(&ctx.subject, path, action)
            && !self.denied_as_twin(&ctx.subject, path, action);
        if allowed {
            return next.run(ctx);
        }

        if !ctx.subject.is_authenticated() && ctx.request.accepts_html {
            debug!(path = %ctx.request.path, "anonymous browser sent to login");
            return Outcome::Reject(Rejection::Redirect {
                location: self.login_redirect(&ctx.request.path),
            });
        }

        Outcome::Reject(Rejection::Forbidden(ForbiddenReason::Policy))
    }
}
