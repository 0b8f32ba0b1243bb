//! HTTP application wiring (Axum router + shared services).
//!
//! - `routes/`: login/logout, console placeholders, health and whoami
//! - `errors.rs`: consistent error responses
//!
//! Every route except `/health` sits behind the guard middleware.

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use sentinel_auth::Enforcer;
use sentinel_infra::{CsrfGuard, SessionManager, Settings};

use crate::accounts::{Authenticator, StaticAccounts};
use crate::lifecycle::Lifecycle;
use crate::middleware::{self, CookieConfig, GuardState};
use crate::pipeline::{Pipeline, PipelineOptions};

pub mod errors;
pub mod routes;

/// Shared state for handlers.
#[derive(Clone)]
pub struct ConsoleServices {
    pub lifecycle: Lifecycle,
    pub accounts: Arc<dyn Authenticator>,
    pub cookies: CookieConfig,
    pub login_path: String,
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// The session manager and CSRF guard are passed in so the caller can also
/// hand them to the sweeper.
pub fn build_app(
    settings: &Settings,
    enforcer: Arc<Enforcer>,
    sessions: Arc<SessionManager>,
    csrf: Arc<CsrfGuard>,
) -> Router {
    let accounts: Arc<dyn Authenticator> = Arc::new(StaticAccounts::new(settings.users.clone()));
    build_app_with(settings, enforcer, sessions, csrf, accounts)
}

pub fn build_app_with(
    settings: &Settings,
    enforcer: Arc<Enforcer>,
    sessions: Arc<SessionManager>,
    csrf: Arc<CsrfGuard>,
    accounts: Arc<dyn Authenticator>,
) -> Router {
    let cookies = CookieConfig::from_settings(settings);
    let pipeline = Arc::new(Pipeline::standard(
        Arc::clone(&sessions),
        Arc::clone(&csrf),
        enforcer,
        PipelineOptions::from_settings(settings),
    ));
    let guard_state = GuardState {
        pipeline,
        cookies: cookies.clone(),
    };
    let services = Arc::new(ConsoleServices {
        lifecycle: Lifecycle::new(sessions, csrf),
        accounts,
        cookies,
        login_path: settings.auth.login_path.clone(),
    });

    // Guarded routes: session, CSRF and policy checks run first.
    let guarded = routes::router(&settings.auth.login_path)
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            guard_state,
            middleware::guard_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(guarded)
        .layer(ServiceBuilder::new())
}
