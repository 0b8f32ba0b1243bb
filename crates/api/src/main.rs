use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use sentinel_auth::Enforcer;
use sentinel_infra::config::ENV_CONFIG;
use sentinel_infra::{CsrfGuard, SessionManager, SessionSweeper, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sentinel_observability::init();

    let config_path = std::env::var(ENV_CONFIG)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("conf/sentinel.toml"));
    let mut settings = if config_path.exists() {
        Settings::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        tracing::warn!(path = %config_path.display(), "config file not found; using defaults");
        Settings::default()
    };
    settings
        .apply_env_overrides(|k| std::env::var(k).ok())
        .context("applying environment overrides")?;

    if !settings.users.is_empty() && !settings.session.secure_cookie {
        tracing::warn!("static accounts with non-secure cookies; development setup only");
    }

    let enforcer = Enforcer::from_files(&settings.policy.model_path, &settings.policy.policy_path)
        .context("loading access-control policy")?;

    let session_settings = settings.session_settings()?;
    let sessions = Arc::new(SessionManager::in_memory(session_settings));
    let csrf = Arc::new(CsrfGuard::new());
    let sweeper = SessionSweeper::spawn(
        Arc::clone(&sessions),
        Arc::clone(&csrf),
        session_settings.gc_interval,
    )
    .context("starting session sweeper")?;

    let app = sentinel_api::app::build_app(&settings, Arc::new(enforcer), sessions, csrf);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tokio::task::spawn_blocking(move || sweeper.shutdown()).await?;
    tracing::info!("shut down");
    Ok(())
}
