use std::sync::Arc;

use axum::{
    Form, Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::app::ConsoleServices;
use crate::app::errors::json_error;
use crate::middleware::append_cookie;
use crate::request::RequestContext;

const AFTER_LOGIN: &str = "/admin/";

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    /// Where to go after a browser login; only local paths are honored.
    #[serde(default)]
    pub next: Option<String>,
}

/// Hands out the CSRF token the login form must echo back.
pub async fn login_form(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    Json(json!({
        "csrf_token": ctx.csrf_token.as_ref().map(|t| t.value()),
        "authenticated": ctx.subject.is_authenticated(),
    }))
}

pub async fn login(
    Extension(services): Extension<Arc<ConsoleServices>>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(subject) = services.accounts.authenticate(&form.username, &form.password) else {
        info!(username = %form.username, "login rejected");
        return json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "unknown user or wrong password",
        );
    };
    let Some(previous) = ctx.session_id() else {
        return json_error(StatusCode::FORBIDDEN, "forbidden", "no session");
    };

    let outcome = services.lifecycle.login(previous, subject, ctx.now);
    let cookies = &services.cookies;

    let mut res = if ctx.request.accepts_html {
        let target = form
            .next
            .as_deref()
            .filter(|n| is_local_path(n))
            .unwrap_or(AFTER_LOGIN);
        Redirect::to(target).into_response()
    } else {
        Json(json!({
            "subject": outcome.session.subject.as_ref().map(|s| s.name()),
            "csrf_token": outcome.csrf_token.value(),
        }))
        .into_response()
    };

    let headers = res.headers_mut();
    append_cookie(headers, &cookies.session_cookie(outcome.session.id.as_str()));
    append_cookie(headers, &cookies.csrf_cookie(outcome.csrf_token.value()));
    res
}

pub async fn logout(
    Extension(services): Extension<Arc<ConsoleServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    let ended = ctx
        .session_id()
        .is_some_and(|id| services.lifecycle.logout(id));

    let mut res = if ctx.request.accepts_html {
        Redirect::to(&services.login_path).into_response()
    } else {
        Json(json!({ "logged_out": ended })).into_response()
    };

    let cookies = &services.cookies;
    let headers: &mut HeaderMap = res.headers_mut();
    append_cookie(headers, &cookies.expired(&cookies.session_cookie));
    append_cookie(headers, &cookies.expired(&cookies.csrf_cookie));
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"));
    res
}

/// Blocks open redirects: only `/path` style targets, never `//host`.
/// Browsers drop tabs and newlines from URLs, so `/\t/host` is `//host` to
/// them; control characters are refused outright.
fn is_local_path(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control)
}
