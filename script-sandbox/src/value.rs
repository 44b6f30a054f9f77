//! Host-side mapping structures shared live with guest scripts.
//!
//! A [`HostMap`] is a reference: cloning it never copies entries, so a script
//! writing through a proxy and a host caller holding the same `HostMap` always
//! observe the same data. Every map carries a [`MapKey`] assigned at creation
//! which serves as its identity; memory addresses are never used for that.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

static NEXT_MAP_KEY: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a [`HostMap`], unique for the life of the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MapKey(u64);

impl MapKey {
    fn next() -> Self {
        Self(NEXT_MAP_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw key.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map#{}", self.0)
    }
}

/// A value stored inside a [`HostMap`].
#[derive(Clone, Debug)]
pub enum HostValue {
    /// JSON `null`.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Numeric scalar.
    Number(Number),
    /// String scalar.
    String(String),
    /// Ordered list; element maps are shared references.
    List(Vec<HostValue>),
    /// Nested mapping, shared by reference.
    Map(HostMap),
}

impl HostValue {
    /// Returns the nested map, if this value is one.
    #[must_use]
    pub fn as_map(&self) -> Option<&HostMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns `true` for [`HostValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Deep snapshot as JSON. Cyclic references render as `null`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut visiting = HashSet::new();
        self.to_json_inner(&mut visiting)
    }

    fn to_json_inner(&self, visiting: &mut HashSet<MapKey>) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.to_json_inner(visiting))
                    .collect(),
            ),
            Self::Map(map) => map.to_json_inner(visiting),
        }
    }
}

impl From<Value> for HostValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(HostMap::from_json(map)),
        }
    }
}

impl From<HostMap> for HostValue {
    fn from(map: HostMap) -> Self {
        Self::Map(map)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// Shared, insertion-ordered mapping exposed to guest scripts.
#[derive(Clone)]
pub struct HostMap {
    key: MapKey,
    entries: Arc<RwLock<IndexMap<String, HostValue>>>,
}

impl HostMap {
    /// Creates an empty map with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            key: MapKey::next(),
            entries: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Builds a map from a JSON object; nested objects become nested maps.
    #[must_use]
    pub fn from_json(map: Map<String, Value>) -> Self {
        let entries = map
            .into_iter()
            .map(|(k, v)| (k, HostValue::from(v)))
            .collect();
        Self {
            key: MapKey::next(),
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Builds a map from any JSON value; non-objects yield an empty map.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_json(map),
            _ => Self::new(),
        }
    }

    /// Returns the identity of this map.
    #[must_use]
    pub const fn key(&self) -> MapKey {
        self.key
    }

    /// Returns `true` when both handles refer to the same map.
    #[must_use]
    pub fn same(&self, other: &HostMap) -> bool {
        self.key == other.key
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, HostValue>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, HostValue>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value under `key`. Nested maps are returned by reference.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<HostValue> {
        self.read().get(key).cloned()
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<HostValue>) -> Option<HostValue> {
        self.write().insert(key.into(), value.into())
    }

    /// Removes `key`, preserving the order of the remaining entries.
    pub fn remove(&self, key: &str) -> Option<HostValue> {
        self.write().shift_remove(key)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Returns the keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` when the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Deep snapshot as a JSON object. Cyclic references render as `null`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut visiting = HashSet::new();
        self.to_json_inner(&mut visiting)
    }

    fn to_json_inner(&self, visiting: &mut HashSet<MapKey>) -> Value {
        if !visiting.insert(self.key) {
            return Value::Null;
        }
        let snapshot: Vec<(String, HostValue)> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let object = snapshot
            .into_iter()
            .map(|(k, v)| (k, v.to_json_inner(visiting)))
            .collect();
        visiting.remove(&self.key);
        Value::Object(object)
    }
}

impl Default for HostMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMap")
            .field("key", &self.key)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clones_share_entries() {
        let map = HostMap::new();
        let alias = map.clone();
        alias.insert("name", "Bob");
        assert_eq!(map.to_json(), json!({"name": "Bob"}));
        assert!(map.same(&alias));
    }

    #[test]
    fn nested_objects_become_shared_maps() {
        let map = HostMap::from_value(json!({"user": {"name": "Alice"}, "tags": [{"a": 1}, 2]}));
        let user = map.get("user").and_then(|v| v.as_map().cloned()).unwrap();
        user.insert("name", "Bob");
        assert_eq!(map.to_json()["user"]["name"], json!("Bob"));
        assert_ne!(user.key(), map.key());
    }

    #[test]
    fn remove_keeps_insertion_order() {
        let map = HostMap::from_value(json!({"a": 1, "b": 2, "c": 3}));
        assert!(map.remove("b").is_some());
        assert!(map.remove("missing").is_none());
        assert_eq!(map.keys(), vec!["a", "c"]);
    }

    #[test]
    fn cyclic_snapshot_terminates() {
        let map = HostMap::new();
        map.insert("self", map.clone());
        assert_eq!(map.to_json(), json!({"self": null}));
    }
}
