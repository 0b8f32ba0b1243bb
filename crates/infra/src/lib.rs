//! Infrastructure layer: session storage, CSRF token storage, background
//! workers and configuration.

pub mod config;
pub mod csrf;
pub mod session;
pub mod workers;

mod integration_tests;

pub use config::{ConfigError, Settings};
pub use csrf::{CsrfError, CsrfGuard, CsrfToken};
pub use session::{
    InMemorySessionStore, Resolved, Session, SessionManager, SessionSettings, SessionStore,
};
pub use workers::session_sweeper::{SessionSweeper, SweepReport, SweeperHandle};
