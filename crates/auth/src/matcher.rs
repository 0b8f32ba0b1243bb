//! Wildcard matchers used by policy rules.
//!
//! Each function has one well-defined semantics so the enforcer never needs a
//! generic expression evaluator:
//!
//! - [`key_match`]: a `*` ends the pattern; everything before it is a prefix.
//! - [`key_match2`]: `:name` matches exactly one non-empty path segment and `*`
//!   matches any run of characters (including `/`).
//! - [`action_match`]: case-insensitive method comparison, optionally honoring
//!   a `*` wildcard.

use serde::Serialize;

/// Match-anything token accepted in subject and action positions.
pub const WILDCARD: &str = "*";

/// Prefix match: `/admin/users/*` matches `/admin/users/` and anything below
/// it, but not `/admin/users`. Without a `*` the pattern must equal the path.
pub fn key_match(path: &str, pattern: &str) -> bool {
    match pattern.find('*') {
        Some(star) => path.starts_with(&pattern[..star]),
        None => path == pattern,
    }
}

/// Segment-aware match: `/admin/users/edit/:id` matches `/admin/users/edit/42`
/// but not `/admin/users/edit/` or `/admin/users/edit/42/x`; `*` matches any
/// run of characters. The whole path must be consumed.
pub fn key_match2(path: &str, pattern: &str) -> bool {
    match_from(path.as_bytes(), pattern.as_bytes())
}

/// Glob walk with a single backtrack point: on a mismatch only the most
/// recent `*` grows, one byte at a time. Polynomial in the path length no
/// matter how many stars the pattern holds.
fn match_from(path: &[u8], pattern: &[u8]) -> bool {
    let (mut p, mut q) = (0, 0);
    // Pattern index just after the last `*`, and where that star's run ends.
    let mut star: Option<(usize, usize)> = None;

    loop {
        if let Some(&token) = pattern.get(q) {
            match token {
                b'*' => {
                    q += 1;
                    star = Some((q, p));
                    continue;
                }
                b':' => {
                    // The parameter name runs until the next `/`, as in route syntax.
                    let name_len = pattern[q + 1..].iter().take_while(|b| **b != b'/').count();
                    let segment_len = path[p..].iter().take_while(|b| **b != b'/').count();
                    if segment_len > 0 {
                        q += 1 + name_len;
                        p += segment_len;
                        continue;
                    }
                }
                expected => {
                    if path.get(p) == Some(&expected) {
                        p += 1;
                        q += 1;
                        continue;
                    }
                }
            }
        } else if p == path.len() {
            return true;
        }

        match star {
            Some((resume, run_end)) if run_end < path.len() => {
                star = Some((resume, run_end + 1));
                q = resume;
                p = run_end + 1;
            }
            _ => return false,
        }
    }
}

/// Compare an HTTP method against a rule action.
pub fn action_match(action: &str, pattern: &str, allow_wildcard: bool) -> bool {
    (allow_wildcard && pattern == WILDCARD) || action.eq_ignore_ascii_case(pattern)
}

/// How the request subject is compared with a rule subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectMatcher {
    /// `r.sub == p.sub`: only the subject's own name counts.
    Exact,
    /// `g(r.sub, p.sub)`: the subject's name or any transitively inherited role.
    Roles,
}

/// How the request object (path) is compared with a rule object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectMatcher {
    Exact,
    KeyMatch,
    KeyMatch2,
}

impl ObjectMatcher {
    pub fn matches(self, path: &str, pattern: &str) -> bool {
        match self {
            ObjectMatcher::Exact => path == pattern,
            ObjectMatcher::KeyMatch => key_match(path, pattern),
            ObjectMatcher::KeyMatch2 => key_match2(path, pattern),
        }
    }
}

/// How the request action (method) is compared with a rule action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMatcher {
    Exact,
    ExactOrWildcard,
}

impl ActionMatcher {
    pub fn matches(self, action: &str, pattern: &str) -> bool {
        action_match(action, pattern, self == ActionMatcher::ExactOrWildcard)
    }
}

/// The compiled `[matchers]` expression: one matcher per request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Matcher {
    pub subject: SubjectMatcher,
    pub object: ObjectMatcher,
    pub action: ActionMatcher,
}
