//! Strongly-typed session identifier.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::secret::random_token;

/// Number of random bytes behind a session identifier (256 bits).
pub const SESSION_ID_BYTES: usize = 32;

/// Length of the encoded identifier (unpadded base64url of [`SESSION_ID_BYTES`]).
pub const SESSION_ID_LEN: usize = 43;

/// Opaque, unpredictable identifier of a session.
///
/// The value is a bearer secret: `Display` yields the full value (it has to
/// reach the cookie), while `Debug` only shows a short prefix so identifiers
/// do not leak into logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier from the CSPRNG.
    pub fn generate() -> Self {
        Self(random_token(SESSION_ID_BYTES))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, non-secret prefix for log correlation.
    pub fn fingerprint(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl core::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SessionId({}…)", self.fingerprint())
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SESSION_ID_LEN {
            return Err(CoreError::invalid_id(format!(
                "SessionId: expected {SESSION_ID_LEN} characters, got {}",
                s.len()
            )));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(CoreError::invalid_id("SessionId: unexpected character"));
        }
        Ok(Self(s.to_string()))
    }
}
