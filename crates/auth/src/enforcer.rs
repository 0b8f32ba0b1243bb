use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::matcher::{SubjectMatcher, WILDCARD};
use crate::model::{EffectPolicy, Model, ModelError};
use crate::policy::{Effect, PolicyError, PolicyRule, PolicySet};
use crate::Subject;

/// Failure to load the access-control state. Always fatal at startup.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed model: {0}")]
    Model(#[from] ModelError),

    #[error("malformed policy: {0}")]
    Policy(#[from] PolicyError),
}

/// Evaluates `(subject, object, action)` triples against a loaded model and
/// policy.
///
/// The enforcer is immutable once built: share it behind an `Arc` and call
/// [`Enforcer::enforce`] from any number of threads without locking.
#[derive(Debug, Clone)]
pub struct Enforcer {
    model: Model,
    rules: Vec<PolicyRule>,
    inherits: HashMap<String, Vec<String>>,
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// No rule matched the request (default deny).
    NoMatchingRule,
    /// At least one allow rule matched and no effective deny did.
    Allowed,
    /// A deny rule matched and the model lets deny override allow.
    ExplicitDeny,
    /// Only rules the effect policy ignores matched.
    NoAllowingRule,
}

/// A rule that matched, as reported by [`Enforcer::explain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub line: usize,
    pub subject: String,
    pub object: String,
    pub action: String,
    pub effect: Effect,
}

/// Detailed, auditable explanation of one enforcement decision.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub subject: String,
    pub object: String,
    pub action: String,
    /// Names the subject acts as: its own name, assigned roles and every
    /// transitively inherited role, sorted.
    pub effective_roles: Vec<String>,
    /// Matching rules in source order.
    pub matched: Vec<MatchedRule>,
}

impl Enforcer {
    /// Build an enforcer from already parsed parts.
    pub fn new(model: Model, policy: PolicySet) -> Self {
        let mut inherits: HashMap<String, Vec<String>> = HashMap::new();
        for edge in policy.edges {
            inherits.entry(edge.member).or_default().push(edge.role);
        }

        if model.effect == EffectPolicy::AllowOverride {
            let inert = policy
                .rules
                .iter()
                .filter(|r| r.effect == Effect::Deny)
                .count();
            if inert > 0 {
                warn!(
                    deny_rules = inert,
                    "policy contains deny rules but the model effect ignores them"
                );
            }
        }

        Self {
            model,
            rules: policy.rules,
            inherits,
        }
    }

    /// Parse both sources. Any syntax error is returned, never skipped.
    pub fn load(model_text: &str, policy_text: &str) -> Result<Self, LoadError> {
        let model = Model::parse(model_text)?;
        let policy = PolicySet::parse(policy_text, &model.layout, model.roles_enabled)?;
        Ok(Self::new(model, policy))
    }

    /// Read and parse both sources from disk.
    pub fn from_files(model_path: &Path, policy_path: &Path) -> Result<Self, LoadError> {
        let read = |path: &Path| {
            std::fs::read_to_string(path).map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        let enforcer = Self::load(&read(model_path)?, &read(policy_path)?)?;
        info!(
            model = %model_path.display(),
            policy = %policy_path.display(),
            rules = enforcer.rules.len(),
            "access-control policy loaded"
        );
        Ok(enforcer)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Resolve every name the subject acts as by following `g` edges to a
    /// fixed point. Cycles in the role graph are harmless.
    pub fn effective_roles(&self, subject: &Subject) -> BTreeSet<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(subject.name());
        queue.extend(subject.roles().iter().map(|r| r.as_str()));

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.to_string()) {
                continue;
            }
            if let Some(parents) = self.inherits.get(name) {
                queue.extend(parents.iter().map(String::as_str));
            }
        }
        seen
    }

    /// Allow/deny decision. Pure given the loaded state; an unmatched request
    /// is always denied.
    pub fn enforce(&self, subject: &Subject, object: &str, action: &str) -> bool {
        self.explain(subject, object, action).allowed
    }

    /// Same decision as [`Enforcer::enforce`], with the reasoning attached.
    pub fn explain(&self, subject: &Subject, object: &str, action: &str) -> Decision {
        let matcher = self.model.matcher;
        let roles = match matcher.subject {
            SubjectMatcher::Roles => self.effective_roles(subject),
            SubjectMatcher::Exact => BTreeSet::from([subject.name().to_string()]),
        };

        let matched: Vec<MatchedRule> = self
            .rules
            .iter()
            .filter(|rule| {
                let subject_ok = rule.subject == WILDCARD || roles.contains(&rule.subject);
                subject_ok
                    && matcher.object.matches(object, &rule.object)
                    && matcher.action.matches(action, &rule.action)
            })
            .map(|rule| MatchedRule {
                line: rule.line,
                subject: rule.subject.clone(),
                object: rule.object.clone(),
                action: rule.action.clone(),
                effect: rule.effect,
            })
            .collect();

        let any_allow = matched.iter().any(|m| m.effect == Effect::Allow);
        let any_deny = matched.iter().any(|m| m.effect == Effect::Deny);

        let (allowed, reason) = match (self.model.effect, any_allow, any_deny) {
            (_, false, false) => (false, DecisionReason::NoMatchingRule),
            (EffectPolicy::DenyOverride, _, true) => (false, DecisionReason::ExplicitDeny),
            (_, true, _) => (true, DecisionReason::Allowed),
            (EffectPolicy::AllowOverride, false, true) => (false, DecisionReason::NoAllowingRule),
        };

        debug!(
            subject = subject.name(),
            object,
            action,
            allowed,
            reason = ?reason,
            matched = matched.len(),
            "policy decision"
        );

        Decision {
            allowed,
            reason,
            subject: subject.name().to_string(),
            object: object.to_string(),
            action: action.to_string(),
            effective_roles: roles.into_iter().collect(),
            matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::Role;

    const MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && (r.act == p.act || p.act == "*")
"#;

    fn user(name: &str, roles: &[&'static str]) -> Subject {
        Subject::authenticated(name, roles.iter().map(|r| Role::new(*r)).collect())
    }

    fn enforcer(policy: &str) -> Enforcer {
        Enforcer::load(MODEL, policy).unwrap()
    }

    #[test]
    fn admin_scenario() {
        let e = enforcer("p, admin, /admin/users/*, GET");
        assert!(e.enforce(&user("alice", &["admin"]), "/admin/users/list/", "GET"));
        assert!(!e.enforce(&user("bob", &["guest"]), "/admin/users/list/", "GET"));
    }

    #[test]
    fn no_rules_means_deny() {
        let e = enforcer("");
        let decision = e.explain(&user("alice", &["admin"]), "/", "GET");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::NoMatchingRule);
    }

    #[test]
    fn deny_overrides_allow() {
        let e = enforcer(
            "p, operator, /admin/assets/*, *\np, operator, /admin/assets/del_all/, GET, deny",
        );
        let op = user("carol", &["operator"]);
        assert!(e.enforce(&op, "/admin/assets/list/", "GET"));
        let decision = e.explain(&op, "/admin/assets/del_all/", "GET");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::ExplicitDeny);
        assert_eq!(decision.matched.len(), 2);
    }

    #[test]
    fn allow_override_ignores_deny_rules() {
        let model = MODEL.replace(
            "some(where (p.eft == allow)) && !some(where (p.eft == deny))",
            "some(where (p.eft == allow))",
        );
        let e = Enforcer::load(&model, "p, ops, /x/*, GET, deny").unwrap();
        let decision = e.explain(&user("dave", &["ops"]), "/x/y", "GET");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::NoAllowingRule);

        let e = Enforcer::load(&model, "p, ops, /x/*, GET\np, ops, /x/*, GET, deny").unwrap();
        assert!(e.enforce(&user("dave", &["ops"]), "/x/y", "GET"));
    }

    #[test]
    fn role_inheritance_is_transitive() {
        let e = enforcer(
            "p, auditor, /admin/reports/*, GET\ng, operator, auditor\ng, lead, operator",
        );
        let lead = user("erin", &["lead"]);
        assert!(e.enforce(&lead, "/admin/reports/github/", "GET"));
        assert_eq!(
            e.effective_roles(&lead).into_iter().collect::<Vec<_>>(),
            vec!["auditor", "erin", "lead", "operator"]
        );
    }

    #[test]
    fn user_edges_grant_roles_without_session_roles() {
        let e = enforcer("p, admin, /admin/*, *\ng, alice, admin");
        assert!(e.enforce(&user("alice", &[]), "/admin/users/new/", "POST"));
        assert!(!e.enforce(&user("mallory", &[]), "/admin/users/new/", "POST"));
    }

    #[test]
    fn role_cycles_terminate() {
        let e = enforcer("p, a, /x, GET\ng, a, b\ng, b, a");
        assert!(e.enforce(&user("u", &["b"]), "/x", "GET"));
    }

    #[test]
    fn wildcard_subject_covers_anonymous() {
        let e = enforcer("p, *, /, GET\np, anonymous, /admin/login/, *");
        let anon = Subject::default();
        assert!(e.enforce(&anon, "/", "GET"));
        assert!(e.enforce(&anon, "/admin/login/", "POST"));
        assert!(!e.enforce(&anon, "/admin/", "GET"));
    }

    #[test]
    fn action_is_case_insensitive_and_wildcard_aware() {
        let e = enforcer("p, admin, /admin/*, *\np, viewer, /admin/*, GET");
        assert!(e.enforce(&user("a", &["admin"]), "/admin/x", "delete"));
        assert!(e.enforce(&user("v", &["viewer"]), "/admin/x", "get"));
        assert!(!e.enforce(&user("v", &["viewer"]), "/admin/x", "POST"));
    }

    #[test]
    fn exact_subject_matcher_ignores_roles() {
        let model = MODEL.replace("g(r.sub, p.sub)", "r.sub == p.sub");
        let e = Enforcer::load(&model, "p, admin, /x, GET\ng, alice, admin").unwrap();
        assert!(!e.enforce(&user("alice", &["admin"]), "/x", "GET"));
        assert!(e.enforce(&user("admin", &[]), "/x", "GET"));
    }

    #[test]
    fn malformed_sources_fail_to_load() {
        assert!(matches!(
            Enforcer::load("[nonsense]", ""),
            Err(LoadError::Model(_))
        ));
        assert!(matches!(
            Enforcer::load(MODEL, "p, admin"),
            Err(LoadError::Policy(_))
        ));
    }

    #[test]
    fn missing_files_fail_to_load() {
        let err = Enforcer::from_files(
            Path::new("/nonexistent/model.conf"),
            Path::new("/nonexistent/policy.csv"),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/model.conf"));
    }

    fn arb_rule() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["admin", "guest", "operator", "*"]),
            prop::sample::select(vec!["/admin/*", "/admin/users/*", "/admin/users/list/", "/"]),
            prop::sample::select(vec!["GET", "POST", "*"]),
            prop::sample::select(vec!["allow", "deny"]),
        )
            .prop_map(|(s, o, a, e)| format!("p, {s}, {o}, {a}, {e}"))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the decision does not depend on rule order.
        #[test]
        fn decision_is_order_independent(
            rules in prop::collection::vec(arb_rule(), 0..12),
            role in prop::sample::select(vec!["admin", "guest", "operator", "nobody"]),
            path in prop::sample::select(vec!["/", "/admin/", "/admin/users/list/", "/admin/assets/"]),
            method in prop::sample::select(vec!["GET", "POST"]),
        ) {
            let forward = enforcer(&rules.join("\n"));
            let mut reversed_rules = rules.clone();
            reversed_rules.reverse();
            let reversed = enforcer(&reversed_rules.join("\n"));
            let subject = user("someone", &[role]);
            prop_assert_eq!(
                forward.enforce(&subject, path, method),
                reversed.enforce(&subject, path, method)
            );
        }

        /// Property: allowed implies some allow rule matched and, under deny
        /// override, no deny rule did.
        #[test]
        fn allowed_implies_allow_match_and_no_deny(
            rules in prop::collection::vec(arb_rule(), 0..12),
            role in prop::sample::select(vec!["admin", "guest", "operator", "nobody"]),
            path in prop::sample::select(vec!["/", "/admin/", "/admin/users/list/"]),
        ) {
            let e = enforcer(&rules.join("\n"));
            let decision = e.explain(&user("someone", &[role]), path, "GET");
            if decision.allowed {
                prop_assert!(decision.matched.iter().any(|m| m.effect == Effect::Allow));
                prop_assert!(decision.matched.iter().all(|m| m.effect == Effect::Allow));
            }
            if decision.matched.is_empty() {
                prop_assert!(!decision.allowed);
            }
        }
    }
}
