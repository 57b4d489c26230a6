//! Quota key generation and handling.

use std::fmt;

/// The composite `app_id:api` key identifying a rule and its live counter.
///
/// Two requests with equal keys always observe the same counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuotaKey(String);

impl QuotaKey {
    /// Create a new quota key from an application id and route.
    pub fn new(app_id: &str, api: &str) -> Self {
        let mut key = String::with_capacity(app_id.len() + api.len() + 1);
        key.push_str(app_id);
        key.push(':');
        key.push_str(api);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QuotaKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
