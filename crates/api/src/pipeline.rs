//! Fixed-order request pipeline.
//!
//! A request flows through an explicit list of [`Stage`]s. Each stage gets
//! the shared [`RequestContext`] and a [`Next`] continuation: it either
//! calls `next.run(ctx)` to continue, or returns a rejection to stop the
//! chain. The standard order is session → csrf → policy; dispatch to the
//! route handler happens only after every stage allowed the request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::{HeaderValue, Response, StatusCode, header};
use serde_json::json;
use tracing::debug;

use sentinel_auth::{ANONYMOUS, Enforcer};
use sentinel_infra::{CsrfError, CsrfGuard, SessionManager, Settings};

use crate::request::{GuardRequest, RequestContext, canonical_path};
use crate::routes::RouteTable;
use crate::stages::{CsrfStage, PolicyStage, SessionStage};

/// One step of the pipeline.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn call(&self, ctx: &mut RequestContext, next: Next<'_>) -> Outcome;
}

/// The remaining stages after the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Box<dyn Stage>],
}

impl Next<'_> {
    /// Run the rest of the chain. An exhausted chain allows the request.
    pub fn run(self, ctx: &mut RequestContext) -> Outcome {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                ctx.trace.push(stage.name());
                stage.call(ctx, Next { stages: rest })
            }
            None => Outcome::Allow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Reject(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// 403 with a stable error code.
    Forbidden(ForbiddenReason),
    /// 302 to the login entry point.
    Redirect { location: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForbiddenReason {
    Csrf(CsrfError),
    Policy,
}

impl ForbiddenReason {
    /// Code sent to the client. Never carries internal detail.
    pub fn code(&self) -> &'static str {
        match self {
            ForbiddenReason::Csrf(_) => "csrf_failed",
            ForbiddenReason::Policy => "forbidden",
        }
    }
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Forbidden(_) => StatusCode::FORBIDDEN,
            Rejection::Redirect { .. } => StatusCode::FOUND,
        }
    }

    pub fn to_response(&self) -> Response<String> {
        match self {
            Rejection::Forbidden(reason) => {
                let body = json!({ "error": reason.code() }).to_string();
                let mut res = Response::new(body);
                *res.status_mut() = self.status();
                res.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                res
            }
            Rejection::Redirect { location } => {
                let mut res = Response::new(String::new());
                *res.status_mut() = self.status();
                let location = HeaderValue::from_str(location)
                    .unwrap_or_else(|_| HeaderValue::from_static("/"));
                res.headers_mut().insert(header::LOCATION, location);
                res
            }
        }
    }
}

/// Result of running the pipeline over one request.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub context: RequestContext,
    pub outcome: Outcome,
    /// Stages that ran, in order.
    pub trace: Vec<&'static str>,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }
}

/// Pipeline output after the route handler ran (or the rejection was rendered).
#[derive(Debug)]
pub struct Dispatched {
    pub verdict: Verdict,
    pub response: Response<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub login_path: String,
    pub anonymous_subject: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            login_path: "/admin/login/".to_string(),
            anonymous_subject: ANONYMOUS.to_string(),
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            login_path: settings.auth.login_path.clone(),
            anonymous_subject: settings.auth.anonymous_subject.clone(),
        }
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl core::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// session → csrf → policy, wired to the given instances.
    pub fn standard(
        sessions: Arc<SessionManager>,
        csrf: Arc<CsrfGuard>,
        enforcer: Arc<Enforcer>,
        options: PipelineOptions,
    ) -> Self {
        Self::new(vec![
            Box::new(SessionStage::new(sessions, options.anonymous_subject)),
            Box::new(CsrfStage::new(csrf)),
            Box::new(PolicyStage::new(enforcer, options.login_path)),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over `request`. The path is put in canonical form
    /// first, so stages and the route table see the same spelling.
    pub fn run(&self, mut request: GuardRequest, now: DateTime<Utc>) -> Verdict {
        request.path = canonical_path(&request.path);
        let mut ctx = RequestContext::new(request, now);
        let outcome = Next {
            stages: &self.stages,
        }
        .run(&mut ctx);

        debug!(
            method = %ctx.request.method,
            path = %ctx.request.path,
            subject = ctx.subject.name(),
            stages = ?ctx.trace,
            outcome = ?outcome,
            "pipeline verdict"
        );

        Verdict {
            trace: ctx.trace.clone(),
            context: ctx,
            outcome,
        }
    }

    /// Run the pipeline, then hand allowed requests to the matching route.
    pub fn dispatch(&self, request: GuardRequest, now: DateTime<Utc>, routes: &RouteTable) -> Dispatched {
        let verdict = self.run(request, now);
        let response = match &verdict.outcome {
            Outcome::Allow => routes.handle(&verdict.context),
            Outcome::Reject(rejection) => rejection.to_response(),
        };
        Dispatched { verdict, response }
    }
}
