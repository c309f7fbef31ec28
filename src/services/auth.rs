//! Admin authorization gate for the upload endpoints.

use axum::http::HeaderMap;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Decides whether a request may create or complete uploads.
pub trait AuthorizationGate: Send + Sync {
    fn is_authorized(&self, headers: &HeaderMap) -> bool;
}

/// Shared-secret gate comparing `x-admin-key` with the configured key.
///
/// With no key configured every request is refused.
#[derive(Clone, Default)]
pub struct AdminKeyGate {
    key: Option<String>,
}

impl AdminKeyGate {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()),
        }
    }
}

impl AuthorizationGate for AdminKeyGate {
    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.key.as_deref() else {
            return false;
        };
        headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|given| constant_time_eq(given.as_bytes(), expected.as_bytes()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
