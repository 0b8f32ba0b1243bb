//! Unpredictable token generation and timing-safe comparison.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

/// Generate `len` random bytes from the thread-local CSPRNG and encode them as
/// unpadded base64url.
///
/// `rand::thread_rng` is a ChaCha-based generator seeded from the operating
/// system, so the output is suitable for session identifiers and CSRF tokens.
pub fn random_token(len: usize) -> String {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Compare two byte strings without short-circuiting on the first difference.
///
/// Length is not secret: inputs of different length compare unequal
/// immediately.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}
