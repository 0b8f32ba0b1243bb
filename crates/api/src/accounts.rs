//! Credential check for the built-in login form.
//!
//! The console's real user store is external; [`StaticAccounts`] serves the
//! accounts listed in the config file and is meant for development only.

use std::collections::HashMap;

use tracing::warn;

use sentinel_auth::{Role, Subject};
use sentinel_core::constant_time_eq;
use sentinel_infra::config::UserAccount;

/// Turns a username/password pair into an authenticated subject.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Option<Subject>;
}

#[derive(Debug, Default)]
pub struct StaticAccounts {
    accounts: HashMap<String, UserAccount>,
}

impl StaticAccounts {
    pub fn new(accounts: impl IntoIterator<Item = UserAccount>) -> Self {
        let accounts: HashMap<String, UserAccount> = accounts
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();
        if !accounts.is_empty() {
            warn!(
                accounts = accounts.len(),
                "static login accounts configured; use only for development"
            );
        }
        Self { accounts }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl Authenticator for StaticAccounts {
    fn authenticate(&self, username: &str, password: &str) -> Option<Subject> {
        let account = self.accounts.get(username)?;
        if !constant_time_eq(account.password.as_bytes(), password.as_bytes()) {
            return None;
        }
        let roles = account.roles.iter().cloned().map(Role::new).collect();
        Some(Subject::authenticated(account.name.clone(), roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> StaticAccounts {
        let settings = sentinel_infra::Settings::from_toml_str(
            r#"
[[users]]
name = "alice"
password = "wonderland"
roles = ["admin", "auditor"]
"#,
        )
        .unwrap();
        StaticAccounts::new(settings.users)
    }

    #[test]
    fn valid_credentials_yield_subject() {
        let subject = accounts().authenticate("alice", "wonderland").unwrap();
        assert_eq!(subject.name(), "alice");
        assert!(subject.is_authenticated());
        assert_eq!(subject.roles(), &[Role::new("admin"), Role::new("auditor")]);
    }

    #[test]
    fn wrong_password_or_user_fails() {
        let accounts = accounts();
        assert!(accounts.authenticate("alice", "wonder").is_none());
        assert!(accounts.authenticate("mallory", "wonderland").is_none());
        assert!(StaticAccounts::default().authenticate("alice", "wonderland").is_none());
    }
}
