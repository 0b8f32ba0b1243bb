//! `sentinel-core`: shared building blocks for the console security core.
//!
//! This crate holds the pieces every other crate agrees on: the session
//! identifier, secret-token generation and the common error model. It has no
//! knowledge of HTTP, policies or storage.

pub mod error;
pub mod id;
pub mod secret;

pub use error::{CoreError, CoreResult};
pub use id::SessionId;
pub use secret::{constant_time_eq, random_token};
