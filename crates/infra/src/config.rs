//! Configuration loading and validation.
//!
//! Settings come from a TOML file; every field has a default so an empty
//! file (or no file) yields a working development setup. A handful of
//! environment variables override the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::session::SessionSettings;

pub const ENV_CONFIG: &str = "SENTINEL_CONFIG";
pub const ENV_BIND: &str = "SENTINEL_BIND";
pub const ENV_GC_INTERVAL: &str = "SENTINEL_SESSION_GC_INTERVAL";
pub const ENV_MAX_LIFETIME: &str = "SENTINEL_SESSION_MAX_LIFETIME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: ServerConfig,
    pub policy: PolicyConfig,
    pub session: SessionConfig,
    pub csrf: CsrfConfig,
    pub auth: AuthConfig,
    /// Static accounts for the built-in login form. Development only.
    pub users: Vec<UserAccount>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Locations of the access-control model and policy rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub model_path: PathBuf,
    pub policy_path: PathBuf,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("conf/auth_model.conf"),
            policy_path: PathBuf::from("conf/policy.csv"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub gc_interval_secs: u64,
    pub max_lifetime_secs: u64,
    pub cookie_name: String,
    /// Add `Secure` to the session cookie. Enable behind TLS.
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: 3600,
            max_lifetime_secs: 3600,
            cookie_name: "sentinel_session".to_string(),
            secure_cookie: false,
        }
    }
}

/// Where CSRF tokens are read from and exposed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsrfConfig {
    pub header: String,
    pub form_field: String,
    pub cookie_name: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            header: "X-CSRFToken".to_string(),
            form_field: "_csrf".to_string(),
            cookie_name: "_csrf".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Redirect target for anonymous browsers that hit a denied page.
    pub login_path: String,
    /// Subject name used for requests without an authenticated session.
    pub anonymous_subject: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_path: "/admin/login/".to_string(),
            anonymous_subject: sentinel_auth::ANONYMOUS.to_string(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserAccount {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl core::fmt::Debug for UserAccount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserAccount")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .field("roles", &self.roles)
            .finish()
    }
}

impl Settings {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `SENTINEL_*` overrides. `lookup` is usually `std::env::var(..).ok()`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = bind;
        }
        if let Some(raw) = lookup(ENV_GC_INTERVAL) {
            self.session.gc_interval_secs = parse_secs(ENV_GC_INTERVAL, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_LIFETIME) {
            self.session.max_lifetime_secs = parse_secs(ENV_MAX_LIFETIME, &raw)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session_settings()?;

        if self.session.cookie_name.trim().is_empty() {
            return Err(ConfigError::invalid("session.cookie_name must not be empty"));
        }
        if self.session.cookie_name == self.csrf.cookie_name {
            return Err(ConfigError::invalid(
                "session.cookie_name and csrf.cookie_name must differ",
            ));
        }
        if self.csrf.header.trim().is_empty() || self.csrf.form_field.trim().is_empty() {
            return Err(ConfigError::invalid("csrf.header and csrf.form_field must be set"));
        }
        if !self.auth.login_path.starts_with('/') {
            return Err(ConfigError::invalid("auth.login_path must be an absolute path"));
        }
        if self.auth.anonymous_subject.trim().is_empty() {
            return Err(ConfigError::invalid("auth.anonymous_subject must not be empty"));
        }
        if let Some(user) = self
            .users
            .iter()
            .find(|u| u.name == self.auth.anonymous_subject)
        {
            return Err(ConfigError::invalid(format!(
                "user `{}` collides with the anonymous subject",
                user.name
            )));
        }
        Ok(())
    }

    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        SessionSettings::from_secs(self.session.gc_interval_secs, self.session.max_lifetime_secs)
    }
}

fn parse_secs(var: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(format!("{var} must be a whole number of seconds, got `{raw}`")))
}
