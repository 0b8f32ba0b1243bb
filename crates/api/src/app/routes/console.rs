//! Stand-ins for the console's business handlers.
//!
//! They only run after the guard allowed the request, and echo what they
//! were asked to do.

use axum::{
    Json,
    extract::{Extension, Path},
    response::IntoResponse,
};
use serde_json::json;

use crate::app::errors;
use crate::request::RequestContext;

pub async fn index(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    Json(json!({
        "page": "index",
        "subject": ctx.subject.name(),
    }))
}

pub async fn section(
    Extension(ctx): Extension<RequestContext>,
    Path(section): Path<String>,
) -> impl IntoResponse {
    Json(json!({
        "section": section,
        "subject": ctx.subject.name(),
    }))
}

pub async fn action(
    Extension(ctx): Extension<RequestContext>,
    Path((section, action)): Path<(String, String)>,
) -> impl IntoResponse {
    Json(json!({
        "section": section,
        "action": action,
        "method": ctx.request.method.as_str(),
        "subject": ctx.subject.name(),
    }))
}

pub async fn not_found() -> axum::response::Response {
    errors::not_found()
}
