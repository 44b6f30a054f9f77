//! Proxy Registry: the table of live handles addressed by guest code.
//!
//! Each top-level mapping exposed to a script becomes a *root*. Nested
//! mappings reached through a root are registered lazily as *children* in
//! that root's arena, and the reverse identity index is keyed by
//! `(root, MapKey)` so the same nested map always resolves to the same child
//! id within one root. Releasing a root sweeps its whole arena.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tool_primitives::ProxyId;
use tracing::debug;

use crate::error::BridgeError;
use crate::value::{HostMap, MapKey};

/// A registered handle: one host mapping plus the root that owns it.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    id: ProxyId,
    root: ProxyId,
    map: HostMap,
}

impl ProxyHandle {
    /// Identifier the guest uses for this handle.
    #[must_use]
    pub fn id(&self) -> &ProxyId {
        &self.id
    }

    /// Root whose arena owns this handle. Roots own themselves.
    #[must_use]
    pub fn root(&self) -> &ProxyId {
        &self.root
    }

    /// The backing mapping. Never a copy.
    #[must_use]
    pub fn map(&self) -> &HostMap {
        &self.map
    }

    /// Returns `true` when this handle is a top-level root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.id == self.root
    }
}

#[derive(Debug, Default)]
struct Tables {
    handles: HashMap<ProxyId, ProxyHandle>,
    arenas: HashMap<ProxyId, HashSet<ProxyId>>,
    identities: HashMap<(ProxyId, MapKey), ProxyId>,
}

impl Tables {
    fn fresh_id(&self) -> ProxyId {
        loop {
            let id = ProxyId::random();
            if !self.handles.contains_key(&id) {
                return id;
            }
        }
    }

    fn remove_one(&mut self, id: &ProxyId) -> Option<ProxyHandle> {
        let handle = self.handles.remove(id)?;
        self.identities.remove(&(handle.root.clone(), handle.map.key()));
        Some(handle)
    }
}

/// Thread-safe table mapping opaque identifiers to live host mappings.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    tables: Mutex<Tables>,
}

impl ProxyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `map` as a new root.
    ///
    /// When `id` is `None` a random identifier is generated; otherwise the
    /// caller's stable name is used.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DuplicateId`] if an explicit `id` is already in use.
    pub fn create(&self, map: HostMap, id: Option<ProxyId>) -> Result<ProxyId, BridgeError> {
        let mut tables = self.lock();
        let id = match id {
            Some(id) if tables.handles.contains_key(&id) => {
                return Err(BridgeError::DuplicateId(id));
            }
            Some(id) => id,
            None => tables.fresh_id(),
        };
        tables
            .identities
            .insert((id.clone(), map.key()), id.clone());
        tables.arenas.insert(id.clone(), HashSet::new());
        tables.handles.insert(
            id.clone(),
            ProxyHandle {
                id: id.clone(),
                root: id.clone(),
                map,
            },
        );
        debug!(proxy = %id, "registered root proxy");
        Ok(id)
    }

    /// Returns the handle registered under `id`.
    #[must_use]
    pub fn handle(&self, id: &ProxyId) -> Option<ProxyHandle> {
        self.lock().handles.get(id).cloned()
    }

    /// Returns the backing mapping registered under `id`.
    #[must_use]
    pub fn get(&self, id: &ProxyId) -> Option<HostMap> {
        self.lock().handles.get(id).map(|handle| handle.map.clone())
    }

    /// Looks up a mapping by its string name, as host callers do after a run.
    #[must_use]
    pub fn get_dict(&self, name: &str) -> Option<HostMap> {
        let id = ProxyId::new(name).ok()?;
        self.get(&id)
    }

    /// Resolves the child id for `map` inside `root`'s arena, registering it
    /// on first sight. Returns `None` if `root` is no longer registered.
    pub(crate) fn child_id(&self, root: &ProxyId, map: &HostMap) -> Option<ProxyId> {
        let mut tables = self.lock();
        if !tables.arenas.contains_key(root) {
            return None;
        }
        let identity = (root.clone(), map.key());
        if let Some(existing) = tables.identities.get(&identity) {
            return Some(existing.clone());
        }
        let id = tables.fresh_id();
        tables.identities.insert(identity, id.clone());
        tables.handles.insert(
            id.clone(),
            ProxyHandle {
                id: id.clone(),
                root: root.clone(),
                map: map.clone(),
            },
        );
        if let Some(arena) = tables.arenas.get_mut(root) {
            arena.insert(id.clone());
        }
        debug!(proxy = %id, root = %root, map = %map.key(), "registered child proxy");
        Some(id)
    }

    /// Releases `id` and returns every identifier that was removed.
    ///
    /// Releasing a root also sweeps all children in its arena. Releasing a
    /// child removes only that child. Unknown ids yield an empty list.
    pub fn sweep(&self, id: &ProxyId) -> Vec<ProxyId> {
        let mut tables = self.lock();
        let Some(handle) = tables.remove_one(id) else {
            return Vec::new();
        };
        let mut swept = vec![handle.id.clone()];
        if handle.is_root() {
            let children = tables.arenas.remove(id).unwrap_or_default();
            for child in children {
                if tables.remove_one(&child).is_some() {
                    swept.push(child);
                }
            }
        } else if let Some(arena) = tables.arenas.get_mut(&handle.root) {
            arena.remove(id);
        }
        debug!(proxy = %id, swept = swept.len(), "released proxy");
        swept
    }

    /// Releases `id`, returning `true` if anything was registered under it.
    pub fn release(&self, id: &ProxyId) -> bool {
        !self.sweep(id).is_empty()
    }

    /// Drops every handle.
    pub fn clear(&self) {
        let mut tables = self.lock();
        tables.handles.clear();
        tables.arenas.clear();
        tables.identities.clear();
    }

    /// Number of live handles, roots and children together.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    /// Returns `true` when no handle is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().handles.is_empty()
    }

    /// Sorted list of live identifiers.
    #[must_use]
    pub fn ids(&self) -> Vec<ProxyId> {
        let mut ids: Vec<_> = self.lock().handles.keys().cloned().collect();
        ids.sort();
        ids
    }
}
