//! Request identities and the role names they carry.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Name carried by requests that have not authenticated.
pub const ANONYMOUS: &str = "anonymous";

/// A role name as it appears in policy rules and `g` edges.
///
/// What a role may do lives entirely in the loaded policy; a role unknown to
/// the policy simply grants nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Role {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identity a request is attributed to.
///
/// Created at login and attached to a session; every other request runs as
/// an anonymous subject. Policies can address anonymous access by naming the
/// anonymous subject explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    name: String,
    roles: Vec<Role>,
    authenticated: bool,
}

impl Subject {
    /// An authenticated subject with its directly assigned roles.
    pub fn authenticated(name: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            name: name.into(),
            roles,
            authenticated: true,
        }
    }

    /// An unauthenticated subject under the given name.
    pub fn anonymous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
            authenticated: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

impl Default for Subject {
    fn default() -> Self {
        Self::anonymous(ANONYMOUS)
    }
}

impl core::fmt::Display for Subject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_subject_is_anonymous() {
        let s = Subject::default();
        assert_eq!(s.name(), ANONYMOUS);
        assert!(!s.is_authenticated());
        assert!(s.roles().is_empty());
    }

    #[test]
    fn roles_serialize_as_plain_strings() {
        let s = Subject::authenticated("alice", vec!["admin".into(), Role::new("auditor".to_string())]);
        assert!(s.has_role("auditor"));
        assert!(!s.has_role("root"));

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["roles"], serde_json::json!(["admin", "auditor"]));
        let back: Subject = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }
}
