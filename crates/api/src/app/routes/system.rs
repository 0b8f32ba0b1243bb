use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::request::RequestContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "subject": ctx.subject.name(),
        "authenticated": ctx.subject.is_authenticated(),
        "roles": ctx.subject.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
    }))
}
