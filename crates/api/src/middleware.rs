use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use sentinel_infra::Settings;
use sentinel_infra::csrf::is_safe_method;

use crate::app::errors::json_error;
use crate::pipeline::{Outcome, Pipeline};
use crate::request::{GuardRequest, canonical_path};

/// Largest form body buffered to look for the CSRF field.
pub const MAX_FORM_BYTES: usize = 64 * 1024;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Cookie and token carrier names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieConfig {
    pub session_cookie: String,
    pub csrf_cookie: String,
    pub csrf_header: String,
    pub csrf_form_field: String,
    pub secure: bool,
}

impl CookieConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            session_cookie: settings.session.cookie_name.clone(),
            csrf_cookie: settings.csrf.cookie_name.clone(),
            csrf_header: settings.csrf.header.clone(),
            csrf_form_field: settings.csrf.form_field.clone(),
            secure: settings.session.secure_cookie,
        }
    }

    /// `Set-Cookie` value for the session id. Not readable from scripts.
    pub fn session_cookie(&self, value: &str) -> String {
        self.cookie(&self.session_cookie, value, true)
    }

    /// `Set-Cookie` value exposing the CSRF token to scripts.
    pub fn csrf_cookie(&self, value: &str) -> String {
        self.cookie(&self.csrf_cookie, value, false)
    }

    pub fn expired(&self, name: &str) -> String {
        format!("{name}=; Path=/; Max-Age=0; SameSite=Lax")
    }

    fn cookie(&self, name: &str, value: &str, http_only: bool) -> String {
        let mut cookie = format!("{name}={value}; Path=/; SameSite=Lax");
        if http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

#[derive(Clone)]
pub struct GuardState {
    pub pipeline: Arc<Pipeline>,
    pub cookies: CookieConfig,
}

/// Run every request through the pipeline before the router sees it.
///
/// Allowed requests reach the inner router with the [`RequestContext`]
/// (and the session's CSRF token) in their extensions.
///
/// [`RequestContext`]: crate::request::RequestContext
pub async fn guard_middleware(
    State(state): State<GuardState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = Uuid::now_v7();
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut res = guard(state, req, next).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        res.headers_mut().insert("x-request-id", value);
    }
    res
}

async fn guard(state: GuardState, req: Request<Body>, next: Next) -> Response {
    // The router matched the path as sent; send other spellings to the one
    // the policy was written for instead of serving them.
    let path = canonical_path(req.uri().path());
    if path != req.uri().path() {
        let location = match req.uri().query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };
        debug!(%location, "redirecting to canonical path");
        return permanent_redirect(&location);
    }

    let cookies = &state.cookies;
    let method = req.method().clone();
    let presented_session = cookie_value(req.headers(), &cookies.session_cookie);
    let presented_csrf_cookie = cookie_value(req.headers(), &cookies.csrf_cookie);
    let accepts_html = accepts_html(req.headers());

    let mut csrf_token = req
        .headers()
        .get(cookies.csrf_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // The token may sit in a form body instead of a header. Buffer the body,
    // read the field, then hand the same bytes on to the handler.
    let mut req = req;
    if csrf_token.is_none() && !is_safe_method(method.as_str()) && is_form(req.headers()) {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_FORM_BYTES).await {
            Ok(bytes) => bytes,
            Err(_) => {
                return json_error(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "payload_too_large",
                    "form body too large",
                );
            }
        };
        csrf_token = form_field(&bytes, &cookies.csrf_form_field);
        req = Request::from_parts(parts, Body::from(bytes));
    }

    let guard_request = GuardRequest {
        method,
        path,
        session_id: presented_session,
        csrf_token,
        accepts_html,
    };

    let verdict = state.pipeline.run(guard_request, Utc::now());
    let ctx = verdict.context;

    let mut res = match verdict.outcome {
        Outcome::Allow => {
            if let Some(token) = ctx.csrf_token.clone() {
                req.extensions_mut().insert(token);
            }
            req.extensions_mut().insert(ctx.clone());
            next.run(req).await
        }
        Outcome::Reject(rejection) => {
            debug!(status = rejection.status().as_u16(), "request rejected");
            rejection.to_response().map(Body::from)
        }
    };

    // Handlers that rotate or end the session set their own cookies.
    let headers = res.headers_mut();
    if !sets_cookie(headers, &cookies.session_cookie) {
        if let Some(session) = ctx.session.as_ref().filter(|_| ctx.session_created) {
            append_cookie(headers, &cookies.session_cookie(session.id.as_str()));
        }
    }
    if !sets_cookie(headers, &cookies.csrf_cookie) {
        if let Some(token) = ctx.csrf_token.as_ref() {
            if presented_csrf_cookie.as_deref() != Some(token.value()) {
                append_cookie(headers, &cookies.csrf_cookie(token.value()));
            }
        }
    }

    res
}

/// 308 keeps the method and body, so a redirected POST stays a POST.
fn permanent_redirect(location: &str) -> Response {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = StatusCode::PERMANENT_REDIRECT;
    if let Ok(value) = HeaderValue::from_str(location) {
        res.headers_mut().insert(header::LOCATION, value);
    }
    res
}

pub(crate) fn append_cookie(headers: &mut HeaderMap, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        headers.append(header::SET_COOKIE, value);
    }
}

/// First value of the named cookie across all `Cookie` headers.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

fn sets_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split_once('=').is_some_and(|(k, _)| k == name))
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/html"))
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with(FORM_CONTENT_TYPE))
}

fn form_field(body: &[u8], field: &str) -> Option<String> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
        .ok()?
        .into_iter()
        .find(|(k, _)| k == field)
        .map(|(_, v)| v)
}
