//! Request pipeline for the admin console and its HTTP adapter.
//!
//! [`pipeline::Pipeline`] is transport-neutral: it takes a
//! [`request::GuardRequest`] and returns a verdict. The `app` and
//! `middleware` modules plug it into an axum router.

pub mod accounts;
pub mod app;
pub mod lifecycle;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod routes;
pub mod stages;

pub use lifecycle::{Lifecycle, LoginOutcome};
pub use pipeline::{
    Dispatched, ForbiddenReason, Next, Outcome, Pipeline, PipelineOptions, Rejection, Stage,
    Verdict,
};
pub use request::{GuardRequest, RequestContext};
pub use routes::RouteTable;
