//! Idempotency tokens for commit requests.

use std::fmt;

use ulid::Ulid;

/// A globally unique token identifying one transaction attempt.
///
/// Providers use it to recognize a retried submission of the same request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestToken(String);

impl RequestToken {
    /// Generate a fresh ULID-based token.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    /// Wrap an existing token (e.g. when replaying a request).
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Keep at most the trailing `max` characters.
    pub fn truncated(self, max: usize) -> Self {
        let len = self.0.chars().count();
        if len <= max {
            return self;
        }
        Self(self.0.chars().skip(len - max).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique() {
        let a = RequestToken::generate();
        let b = RequestToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 26);
    }

    #[test]
    fn test_truncate_keeps_suffix() {
        let token = RequestToken::from_string("urn:uuid:0123456789").truncated(10);
        assert_eq!(token.as_str(), "0123456789");

        let short = RequestToken::from_string("abc").truncated(10);
        assert_eq!(short.as_str(), "abc");
    }
}
