//! Object Proxy Bridge: keyed operations on registered host mappings.
//!
//! These are the host halves of the guest `Proxy` traps. None of them fail
//! towards the guest: unknown handles read as `null`, report `false`, or
//! enumerate as empty.

use tool_primitives::ProxyId;

use crate::registry::ProxyRegistry;
use crate::value::{HostMap, HostValue};
use crate::wire::{GuestWire, HostWire};

impl ProxyRegistry {
    /// Reads `key` from the mapping behind `id`.
    ///
    /// Nested mappings come back as child references in the owning root's
    /// arena. Lists are resolved element by element.
    #[must_use]
    pub fn bridge_get(&self, id: &ProxyId, key: &str) -> HostWire {
        let Some(handle) = self.handle(id) else {
            return HostWire::null();
        };
        match handle.map().get(key) {
            Some(value) => self.encode(handle.root(), &value),
            None => HostWire::null(),
        }
    }

    fn encode(&self, root: &ProxyId, value: &HostValue) -> HostWire {
        match value {
            HostValue::Map(map) => self
                .child_id(root, map)
                .map_or_else(HostWire::null, HostWire::Proxy),
            HostValue::List(items) => {
                HostWire::List(items.iter().map(|item| self.encode(root, item)).collect())
            }
            scalar => HostWire::Value(scalar.to_json()),
        }
    }

    /// Writes `value` under `key` in the mapping behind `id`.
    ///
    /// References to live proxies are stored by reference; everything else is
    /// converted into fresh host values. Returns `false` if `id` is unknown.
    pub fn bridge_set(&self, id: &ProxyId, key: &str, value: GuestWire) -> bool {
        let Some(target) = self.get(id) else {
            return false;
        };
        let value = self.decode(value);
        target.insert(key, value);
        true
    }

    fn decode(&self, wire: GuestWire) -> HostValue {
        match wire {
            GuestWire::Value(value) => HostValue::from(value),
            GuestWire::Ref(id) => self.get(&id).map_or(HostValue::Null, HostValue::Map),
            GuestWire::List(items) => {
                HostValue::List(items.into_iter().map(|item| self.decode(item)).collect())
            }
            GuestWire::Map(entries) => {
                let map = HostMap::new();
                for (key, item) in entries {
                    map.insert(key, self.decode(item));
                }
                HostValue::Map(map)
            }
        }
    }

    /// Reports whether `key` exists in the mapping behind `id`.
    #[must_use]
    pub fn bridge_has(&self, id: &ProxyId, key: &str) -> bool {
        self.get(id).is_some_and(|map| map.contains_key(key))
    }

    /// Removes `key`, returning whether anything was removed.
    pub fn bridge_delete(&self, id: &ProxyId, key: &str) -> bool {
        self.get(id).is_some_and(|map| map.remove(key).is_some())
    }

    /// Lists the keys of the mapping behind `id` in insertion order.
    #[must_use]
    pub fn bridge_keys(&self, id: &ProxyId) -> Vec<String> {
        self.get(id).map(|map| map.keys()).unwrap_or_default()
    }
}
