//! Identifier types for invocations and bridged host mappings.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

const MAX_PROXY_ID_LEN: usize = 128;

/// Tags the tracing span of one script invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Generates a random invocation identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for InvocationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0.simple(), f)
    }
}

/// Opaque identifier handed to guest code in place of a host mapping.
///
/// Generated identifiers are random; callers may also supply a stable name
/// (for example `"userData"`) when exposing a mapping explicitly.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyId(String);

impl ProxyId {
    /// Validates and wraps a caller-supplied identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProxyId`] if the identifier is empty, too long,
    /// or contains whitespace or control characters.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidProxyId {
                id,
                reason: "identifier cannot be empty".into(),
            });
        }
        if id.len() > MAX_PROXY_ID_LEN {
            return Err(Error::InvalidProxyId {
                id,
                reason: format!("identifier length must be <= {MAX_PROXY_ID_LEN}"),
            });
        }
        if !id.chars().all(|c| c.is_ascii_graphic()) {
            return Err(Error::InvalidProxyId {
                id,
                reason: "identifier must be printable ascii without whitespace".into(),
            });
        }
        Ok(Self(id))
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(format!("px-{}", Uuid::new_v4().simple()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProxyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_ids_are_distinct_and_compact() {
        let a = InvocationId::random();
        let b = InvocationId::random();
        assert_ne!(a, b);
        let text = a.to_string();
        assert_eq!(text.len(), 32);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn random_proxy_ids_are_distinct() {
        let a = ProxyId::random();
        let b = ProxyId::random();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("px-"));
    }

    #[test]
    fn proxy_id_rejects_whitespace_and_empty() {
        assert!(ProxyId::new("").is_err());
        assert!(ProxyId::new("user data").is_err());
        assert_eq!(ProxyId::new("userData").unwrap().as_str(), "userData");
    }
}
