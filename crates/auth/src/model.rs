//! Access-control model grammar.
//!
//! The model is an INI-style text in the casbin `.conf` dialect:
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act, eft
//!
//! [role_definition]
//! g = _, _
//!
//! [policy_effect]
//! e = some(where (p.eft == allow)) && !some(where (p.eft == deny))
//!
//! [matchers]
//! m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && (r.act == p.act || p.act == "*")
//! ```
//!
//! Only a fixed vocabulary of effects and matcher clauses is accepted; the
//! matcher is compiled into a [`Matcher`] table instead of being evaluated as
//! an expression. Anything outside that vocabulary is a load error, because a
//! half-understood model is worse than no model at all.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::matcher::{ActionMatcher, Matcher, ObjectMatcher, SubjectMatcher};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("line {line}: unknown section [{name}]")]
    UnknownSection { line: usize, name: String },

    #[error("line {line}: section [{name}] appears twice")]
    DuplicateSection { line: usize, name: String },

    #[error("line {line}: definition outside of any section")]
    OutsideSection { line: usize },

    #[error("line {line}: expected `key = value`")]
    Syntax { line: usize },

    #[error("line {line}: unexpected key `{key}` in [{section}]")]
    UnexpectedKey {
        line: usize,
        section: &'static str,
        key: String,
    },

    #[error("missing section [{0}]")]
    MissingSection(&'static str),

    #[error("line {line}: request definition must be `sub, obj, act`, got `{value}`")]
    InvalidRequestDefinition { line: usize, value: String },

    #[error("line {line}: policy definition must name sub, obj, act (and optionally eft), got `{value}`")]
    InvalidPolicyDefinition { line: usize, value: String },

    #[error("line {line}: only two-place role definitions (`g = _, _`) are supported, got `{value}`")]
    InvalidRoleDefinition { line: usize, value: String },

    #[error("line {line}: policy effect `{value}` would admit requests that no rule allows")]
    UnsafeEffect { line: usize, value: String },

    #[error("line {line}: unsupported policy effect `{value}`")]
    UnsupportedEffect { line: usize, value: String },

    #[error("line {line}: unsupported matcher clause `{clause}`")]
    UnsupportedClause { line: usize, clause: String },

    #[error("line {line}: matcher constrains {field} more than once")]
    DuplicateClause { line: usize, field: &'static str },

    #[error("line {line}: matcher does not constrain {field}")]
    MissingClause { line: usize, field: &'static str },

    #[error("line {line}: matcher uses g() but the model has no [role_definition]")]
    RolesWithoutDefinition { line: usize },
}

/// How matching rule effects combine into one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectPolicy {
    /// `some(where (p.eft == allow))`: any allow wins, deny rules are inert.
    AllowOverride,
    /// `some(where (p.eft == allow)) && !some(where (p.eft == deny))`.
    DenyOverride,
}

/// Positions of the policy fields inside a `p` line (after the `p` token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicyLayout {
    pub subject: usize,
    pub object: usize,
    pub action: usize,
    pub effect: Option<usize>,
}

impl PolicyLayout {
    /// Number of fields a fully specified `p` line carries.
    pub fn arity(&self) -> usize {
        if self.effect.is_some() { 4 } else { 3 }
    }
}

/// A loaded, validated access-control model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Model {
    pub layout: PolicyLayout,
    pub roles_enabled: bool,
    pub effect: EffectPolicy,
    pub matcher: Matcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Section {
    Request,
    Policy,
    Role,
    Effect,
    Matchers,
}

impl Section {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "request_definition" => Some(Section::Request),
            "policy_definition" => Some(Section::Policy),
            "role_definition" => Some(Section::Role),
            "policy_effect" => Some(Section::Effect),
            "matchers" => Some(Section::Matchers),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Section::Request => "request_definition",
            Section::Policy => "policy_definition",
            Section::Role => "role_definition",
            Section::Effect => "policy_effect",
            Section::Matchers => "matchers",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Section::Request => "r",
            Section::Policy => "p",
            Section::Role => "g",
            Section::Effect => "e",
            Section::Matchers => "m",
        }
    }
}

/// A `key = value` entry with the line it came from.
#[derive(Debug, Clone)]
struct Entry {
    line: usize,
    value: String,
}

impl Model {
    /// Parse and validate a model text.
    pub fn parse(text: &str) -> Result<Self, ModelError> {
        let entries = read_sections(text)?;

        let request = entries
            .get(&Section::Request)
            .ok_or(ModelError::MissingSection(Section::Request.name()))?;
        let policy = entries
            .get(&Section::Policy)
            .ok_or(ModelError::MissingSection(Section::Policy.name()))?;
        let effect = entries
            .get(&Section::Effect)
            .ok_or(ModelError::MissingSection(Section::Effect.name()))?;
        let matchers = entries
            .get(&Section::Matchers)
            .ok_or(ModelError::MissingSection(Section::Matchers.name()))?;

        parse_request_definition(request)?;
        let layout = parse_policy_definition(policy)?;
        let roles_enabled = match entries.get(&Section::Role) {
            Some(entry) => {
                parse_role_definition(entry)?;
                true
            }
            None => false,
        };
        let effect = parse_effect(effect)?;
        let matcher = parse_matcher(matchers)?;

        if matcher.subject == SubjectMatcher::Roles && !roles_enabled {
            return Err(ModelError::RolesWithoutDefinition {
                line: matchers.line,
            });
        }

        Ok(Self {
            layout,
            roles_enabled,
            effect,
            matcher,
        })
    }
}

fn read_sections(text: &str) -> Result<HashMap<Section, Entry>, ModelError> {
    let mut entries: HashMap<Section, Entry> = HashMap::new();
    let mut seen_headers: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if let Some(name) = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let name = name.trim();
            let section = Section::from_name(name).ok_or_else(|| ModelError::UnknownSection {
                line,
                name: name.to_string(),
            })?;
            if seen_headers.contains(&section) {
                return Err(ModelError::DuplicateSection {
                    line,
                    name: name.to_string(),
                });
            }
            seen_headers.push(section);
            current = Some(section);
            continue;
        }

        let section = current.ok_or(ModelError::OutsideSection { line })?;
        let (key, value) = trimmed.split_once('=').ok_or(ModelError::Syntax { line })?;
        let key = key.trim();
        let value = value.trim();
        if key != section.key() || entries.contains_key(&section) {
            return Err(ModelError::UnexpectedKey {
                line,
                section: section.name(),
                key: key.to_string(),
            });
        }
        if value.is_empty() {
            return Err(ModelError::Syntax { line });
        }
        entries.insert(
            section,
            Entry {
                line,
                value: value.to_string(),
            },
        );
    }

    Ok(entries)
}

fn tokens(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).collect()
}

fn parse_request_definition(entry: &Entry) -> Result<(), ModelError> {
    let mut names = tokens(&entry.value);
    names.sort_unstable();
    if names == ["act", "obj", "sub"] {
        Ok(())
    } else {
        Err(ModelError::InvalidRequestDefinition {
            line: entry.line,
            value: entry.value.clone(),
        })
    }
}

fn parse_policy_definition(entry: &Entry) -> Result<PolicyLayout, ModelError> {
    let invalid = || ModelError::InvalidPolicyDefinition {
        line: entry.line,
        value: entry.value.clone(),
    };

    let names = tokens(&entry.value);
    let position = |name: &str| names.iter().position(|n| *n == name);

    let mut sorted = names.clone();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != names.len() {
        return Err(invalid());
    }
    let known = ["sub", "obj", "act", "eft"];
    if names.iter().any(|n| !known.contains(n)) {
        return Err(invalid());
    }

    Ok(PolicyLayout {
        subject: position("sub").ok_or_else(invalid)?,
        object: position("obj").ok_or_else(invalid)?,
        action: position("act").ok_or_else(invalid)?,
        effect: position("eft"),
    })
}

fn parse_role_definition(entry: &Entry) -> Result<(), ModelError> {
    if tokens(&entry.value) == ["_", "_"] {
        Ok(())
    } else {
        Err(ModelError::InvalidRoleDefinition {
            line: entry.line,
            value: entry.value.clone(),
        })
    }
}

fn squash(value: &str) -> String {
    value.split_whitespace().collect()
}

fn parse_effect(entry: &Entry) -> Result<EffectPolicy, ModelError> {
    const ANY_ALLOW: &str = "some(where(p.eft==allow))";
    const DENY_OVERRIDE: &str = "some(where(p.eft==allow))&&!some(where(p.eft==deny))";
    const ALLOW_UNLESS_DENIED: &str = "!some(where(p.eft==deny))";

    let expr = squash(&entry.value);
    match expr.as_str() {
        ANY_ALLOW => Ok(EffectPolicy::AllowOverride),
        DENY_OVERRIDE => Ok(EffectPolicy::DenyOverride),
        ALLOW_UNLESS_DENIED => Err(ModelError::UnsafeEffect {
            line: entry.line,
            value: entry.value.clone(),
        }),
        _ => Err(ModelError::UnsupportedEffect {
            line: entry.line,
            value: entry.value.clone(),
        }),
    }
}

/// Split on `&&` at parenthesis depth zero.
fn split_conjunction(expr: &str) -> Vec<&str> {
    let bytes = expr.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'&' if depth == 0 && bytes.get(i + 1) == Some(&b'&') => {
                parts.push(&expr[start..i]);
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expr[start..]);
    parts
}

/// Remove parentheses that wrap the whole clause.
fn strip_outer_parens(mut clause: &str) -> &str {
    while let Some(inner) = clause.strip_prefix('(').and_then(|c| c.strip_suffix(')')) {
        let mut depth = 0i32;
        let balanced = inner.bytes().all(|b| {
            match b {
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {}
            }
            depth >= 0
        });
        if !balanced || depth != 0 {
            break;
        }
        clause = inner;
    }
    clause
}

enum Clause {
    Subject(SubjectMatcher),
    Object(ObjectMatcher),
    Action(ActionMatcher),
}

fn classify(clause: &str) -> Option<Clause> {
    let clause = match clause {
        "g(r.sub,p.sub)" => Clause::Subject(SubjectMatcher::Roles),
        "r.sub==p.sub" | "p.sub==r.sub" => Clause::Subject(SubjectMatcher::Exact),
        "keyMatch(r.obj,p.obj)" => Clause::Object(ObjectMatcher::KeyMatch),
        "keyMatch2(r.obj,p.obj)" => Clause::Object(ObjectMatcher::KeyMatch2),
        "r.obj==p.obj" | "p.obj==r.obj" => Clause::Object(ObjectMatcher::Exact),
        "r.act==p.act" | "p.act==r.act" => Clause::Action(ActionMatcher::Exact),
        "r.act==p.act||p.act==\"*\"" | "p.act==\"*\"||r.act==p.act" => {
            Clause::Action(ActionMatcher::ExactOrWildcard)
        }
        _ => return None,
    };
    Some(clause)
}

fn parse_matcher(entry: &Entry) -> Result<Matcher, ModelError> {
    let line = entry.line;
    let expr = squash(&entry.value);

    let mut subject = None;
    let mut object = None;
    let mut action = None;

    for part in split_conjunction(&expr) {
        let clause = strip_outer_parens(part);
        match classify(clause) {
            Some(Clause::Subject(m)) => set_once(&mut subject, m, line, "the subject")?,
            Some(Clause::Object(m)) => set_once(&mut object, m, line, "the object")?,
            Some(Clause::Action(m)) => set_once(&mut action, m, line, "the action")?,
            None => {
                return Err(ModelError::UnsupportedClause {
                    line,
                    clause: clause.to_string(),
                });
            }
        }
    }

    Ok(Matcher {
        subject: subject.ok_or(ModelError::MissingClause {
            line,
            field: "the subject",
        })?,
        object: object.ok_or(ModelError::MissingClause {
            line,
            field: "the object",
        })?,
        action: action.ok_or(ModelError::MissingClause {
            line,
            field: "the action",
        })?,
    })
}

fn set_once<T>(
    slot: &mut Option<T>,
    value: T,
    line: usize,
    field: &'static str,
) -> Result<(), ModelError> {
    if slot.is_some() {
        return Err(ModelError::DuplicateClause { line, field });
    }
    *slot = Some(value);
    Ok(())
}
