//! Policy rule source (CSV).
//!
//! One rule per line:
//!
//! ```text
//! p, admin, /admin/*, *, allow
//! p, operator, /admin/assets/del_all/, GET, deny
//! g, alice, admin
//! ```
//!
//! `p` lines follow the field order of the model's policy definition. When
//! the definition carries an `eft` column it may be omitted on a line, which
//! then means `allow`. `g` lines declare that the first name inherits the
//! second role.

use core::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::model::PolicyLayout;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("line {line}: unknown rule type `{kind}` (expected `p` or `g`)")]
    UnknownKind { line: usize, kind: String },

    #[error("line {line}: expected {expected} fields after `{kind}`, got {actual}")]
    Arity {
        line: usize,
        kind: &'static str,
        expected: String,
        actual: usize,
    },

    #[error("line {line}: field {field} is empty")]
    EmptyField { line: usize, field: usize },

    #[error("line {line}: effect must be `allow` or `deny`, got `{value}`")]
    InvalidEffect { line: usize, value: String },

    #[error("line {line}: role rules need a [role_definition] in the model")]
    RolesWithoutDefinition { line: usize },
}

/// Outcome attached to a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => f.write_str("allow"),
            Effect::Deny => f.write_str("deny"),
        }
    }
}

/// A single `p` rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyRule {
    pub subject: String,
    pub object: String,
    pub action: String,
    pub effect: Effect,
    /// 1-based line in the policy source, for diagnostics.
    pub line: usize,
}

/// A single `g` edge: `member` inherits everything granted to `role`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleEdge {
    pub member: String,
    pub role: String,
    pub line: usize,
}

/// Every rule and role edge from one policy source, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    pub rules: Vec<PolicyRule>,
    pub edges: Vec<RoleEdge>,
}

impl PolicySet {
    /// Parse a policy source against the given layout.
    pub fn parse(
        text: &str,
        layout: &PolicyLayout,
        roles_enabled: bool,
    ) -> Result<Self, PolicyError> {
        let mut set = PolicySet::default();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
            let (kind, rest) = fields
                .split_first()
                .map(|(k, r)| (*k, r))
                .unwrap_or(("", &[]));

            if let Some(pos) = rest.iter().position(|f| f.is_empty()) {
                return Err(PolicyError::EmptyField {
                    line,
                    field: pos + 1,
                });
            }

            match kind {
                "p" => set.rules.push(parse_rule(rest, layout, line)?),
                "g" => {
                    if !roles_enabled {
                        return Err(PolicyError::RolesWithoutDefinition { line });
                    }
                    if rest.len() != 2 {
                        return Err(PolicyError::Arity {
                            line,
                            kind: "g",
                            expected: "2".to_string(),
                            actual: rest.len(),
                        });
                    }
                    set.edges.push(RoleEdge {
                        member: rest[0].to_string(),
                        role: rest[1].to_string(),
                        line,
                    });
                }
                other => {
                    return Err(PolicyError::UnknownKind {
                        line,
                        kind: other.to_string(),
                    });
                }
            }
        }

        Ok(set)
    }
}

fn parse_rule(fields: &[&str], layout: &PolicyLayout, line: usize) -> Result<PolicyRule, PolicyError> {
    let arity = layout.arity();
    let effect_omitted = layout.effect.is_some() && fields.len() == arity - 1;
    let effect_omitted_at_end = effect_omitted && layout.effect == Some(arity - 1);
    if fields.len() != arity && !effect_omitted_at_end {
        let expected = if layout.effect == Some(arity - 1) {
            format!("{} or {}", arity - 1, arity)
        } else {
            arity.to_string()
        };
        return Err(PolicyError::Arity {
            line,
            kind: "p",
            expected,
            actual: fields.len(),
        });
    }

    let effect = match layout.effect {
        Some(pos) if pos < fields.len() => match fields[pos] {
            "allow" => Effect::Allow,
            "deny" => Effect::Deny,
            other => {
                return Err(PolicyError::InvalidEffect {
                    line,
                    value: other.to_string(),
                });
            }
        },
        _ => Effect::Allow,
    };

    Ok(PolicyRule {
        subject: fields[layout.subject].to_string(),
        object: fields[layout.object].to_string(),
        action: fields[layout.action].to_string(),
        effect,
        line,
    })
}
