//! HTTP Basic authentication against the node's admin credential

use crate::config::AccessCredential;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Gate for every portal request
#[derive(Debug, Clone)]
pub struct BasicAuth {
    credential: AccessCredential,
}

impl BasicAuth {
    pub fn new(credential: AccessCredential) -> Self {
        Self { credential }
    }

    /// No password configured, every request passes
    pub fn is_open(&self) -> bool {
        !self.credential.requires_auth()
    }

    /// Check a raw `Authorization` header value
    pub fn authorize(&self, header: Option<&str>) -> bool {
        if self.is_open() {
            return true;
        }

        match header.and_then(decode_basic) {
            Some((user, password)) => {
                let user_ok = constant_time_compare(&self.credential.user, &user);
                let password_ok = constant_time_compare(&self.credential.password, &password);
                user_ok & password_ok
            }
            None => false,
        }
    }

    /// `WWW-Authenticate` header value for a 401 answer
    pub fn challenge(realm: &str) -> String {
        format!("Basic realm=\"{}\"", realm.replace('"', ""))
    }
}

/// Split `Basic <base64(user:password)>` into its parts
pub fn decode_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Encode a `Basic` header value for `user:password`
pub fn encode_basic(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
