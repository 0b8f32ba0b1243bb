use axum::{
    Router,
    routing::{any, get},
};

pub mod auth;
pub mod console;
pub mod system;

/// Router for every guarded endpoint.
pub fn router(login_path: &str) -> Router {
    Router::new()
        .route(login_path, get(auth::login_form).post(auth::login))
        .route("/admin/logout/", get(auth::logout).post(auth::logout))
        .route("/whoami", get(system::whoami))
        .route("/admin", get(console::index))
        .route("/admin/", get(console::index))
        .route("/admin/:section/", get(console::section))
        .route("/admin/:section/*action", any(console::action))
        .fallback(console::not_found)
}
