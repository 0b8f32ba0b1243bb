//! `sentinel-auth`: access-control model, policy rules and enforcement.
//!
//! This crate is decoupled from HTTP, sessions and storage: it turns a model
//! text and a policy text into an immutable [`Enforcer`] and answers
//! `(subject, object, action)` questions.
//!
//! ```
//! use sentinel_auth::{Enforcer, Role, Subject};
//!
//! let model = "
//! [request_definition]
//! r = sub, obj, act
//! [policy_definition]
//! p = sub, obj, act
//! [role_definition]
//! g = _, _
//! [policy_effect]
//! e = some(where (p.eft == allow))
//! [matchers]
//! m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act
//! ";
//! let enforcer = Enforcer::load(model, "p, admin, /admin/users/*, GET").unwrap();
//! let alice = Subject::authenticated("alice", vec![Role::new("admin")]);
//! assert!(enforcer.enforce(&alice, "/admin/users/list/", "GET"));
//! ```

pub mod enforcer;
pub mod matcher;
pub mod model;
pub mod policy;
pub mod subject;

pub use enforcer::{Decision, DecisionReason, Enforcer, LoadError, MatchedRule};
pub use matcher::{key_match, key_match2};
pub use model::{EffectPolicy, Model, ModelError};
pub use policy::{Effect, PolicyError, PolicyRule, PolicySet, RoleEdge};
pub use subject::{ANONYMOUS, Role, Subject};
