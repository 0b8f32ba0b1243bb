//! Route table for [`Pipeline::dispatch`](crate::pipeline::Pipeline::dispatch).
//!
//! This is the dispatch path for callers that own their transport loop and
//! hand the pipeline plain [`GuardRequest`](crate::request::GuardRequest)s.
//! The bundled HTTP server does not use it: there the guard runs as axum
//! middleware and the axum router picks the handler (see [`crate::app`]).
//!
//! Patterns use the `key_match2` syntax: `:name` matches one path segment
//! and `*` matches any remainder. The first registered match wins.

use http::{HeaderValue, Method, Response, StatusCode, header};
use serde_json::json;

use sentinel_auth::key_match2;

use crate::request::RequestContext;

pub type Handler = Box<dyn Fn(&RequestContext) -> Response<String> + Send + Sync>;

struct Route {
    /// `None` matches every method.
    method: Option<Method>,
    pattern: String,
    handler: Handler,
}

#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl core::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|r| (r.method.as_ref().map(Method::as_str), &r.pattern)))
            .finish()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F>(mut self, method: Method, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&RequestContext) -> Response<String> + Send + Sync + 'static,
    {
        self.routes.push(Route {
            method: Some(method),
            pattern: pattern.into(),
            handler: Box::new(handler),
        });
        self
    }

    pub fn any<F>(mut self, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&RequestContext) -> Response<String> + Send + Sync + 'static,
    {
        self.routes.push(Route {
            method: None,
            pattern: pattern.into(),
            handler: Box::new(handler),
        });
        self
    }

    pub fn find(&self, method: &Method, path: &str) -> Option<&Handler> {
        self.routes
            .iter()
            .find(|r| r.method.as_ref().is_none_or(|m| m == method) && key_match2(path, &r.pattern))
            .map(|r| &r.handler)
    }

    /// Call the matching handler, or answer 404.
    pub fn handle(&self, ctx: &RequestContext) -> Response<String> {
        match self.find(&ctx.request.method, &ctx.request.path) {
            Some(handler) => handler(ctx),
            None => not_found(),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn not_found() -> Response<String> {
    let mut res = Response::new(json!({ "error": "not_found" }).to_string());
    *res.status_mut() = StatusCode::NOT_FOUND;
    res.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    res
}
