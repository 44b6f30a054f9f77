//! Tagged values exchanged between the host bridge and guest proxies.
//!
//! Both directions travel as JSON text. Every value is wrapped in an
//! externally tagged union, so a string payload is always a string and a
//! reference is always explicit.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tool_primitives::ProxyId;

use crate::error::BridgeError;

/// Value sent from the host to the guest by a bridge `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostWire {
    /// Plain JSON scalar (or `null` for absent keys).
    Value(Value),
    /// Live reference to a registered mapping.
    Proxy(ProxyId),
    /// List whose elements are resolved individually.
    List(Vec<HostWire>),
}

impl HostWire {
    /// Wire form of an absent value.
    #[must_use]
    pub const fn null() -> Self {
        Self::Value(Value::Null)
    }

    /// Serialises to the JSON text handed to the guest.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"value":null}"#))
    }
}

/// Value sent from the guest to the host by a bridge `set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestWire {
    /// Scalar, or any plain JSON value.
    Value(Value),
    /// Assign by reference to an existing mapping.
    Ref(ProxyId),
    /// Array, encoded element by element.
    List(Vec<GuestWire>),
    /// Plain guest object, encoded entry by entry.
    Map(IndexMap<String, GuestWire>),
}

impl GuestWire {
    /// Parses the JSON text produced by the guest encoder.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Malformed`] when the text is not a tagged value.
    pub fn from_text(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|err| BridgeError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn host_values_are_tagged() {
        let wire = HostWire::List(vec![
            HostWire::Value(json!("__PROXY:abc__")),
            HostWire::Proxy(ProxyId::new("abc").unwrap()),
        ]);
        let text = wire.to_text();
        assert_eq!(
            serde_json::from_str::<Value>(&text).unwrap(),
            json!({"list": [{"value": "__PROXY:abc__"}, {"proxy": "abc"}]})
        );
    }

    #[test]
    fn guest_values_parse_nested_refs() {
        let wire = GuestWire::from_text(r#"{"map":{"a":{"ref":"px-1"},"b":{"value":[1,2]}}}"#).unwrap();
        let GuestWire::Map(entries) = wire else {
            panic!("expected map");
        };
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(entries["a"], GuestWire::Ref(ProxyId::new("px-1").unwrap()));
    }

    #[test]
    fn untagged_text_is_rejected() {
        assert!(matches!(
            GuestWire::from_text(r#""plain""#),
            Err(BridgeError::Malformed(_))
        ));
    }
}
