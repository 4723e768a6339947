//! The identifier ⇄ layer index.
//!
//! Layers are keyed by identity (the allocation behind the handle), never by
//! name: renaming a layer does not make it a different layer. Identifiers are
//! exclusively owned, so registering an identifier that another layer holds
//! silently reassigns it. Lookups are gated on the dirty flag, because a
//! clean layer is a speculative registration that nothing has actually used;
//! persisting or resolving it would manufacture state.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use stagesync_core::LayerHandle;

/// Stable identity key for a layer handle.
fn identity(layer: &LayerHandle) -> usize {
    Arc::as_ptr(layer) as usize
}

#[derive(Default)]
struct DbInner {
    by_identifier: BTreeMap<String, LayerHandle>,
    /// identity -> identifiers currently owned by that layer
    by_layer: BTreeMap<usize, Vec<String>>,
}

impl DbInner {
    fn attach(&mut self, layer: &LayerHandle, identifier: &str) {
        if let Some(existing) = self.by_identifier.get(identifier) {
            if Arc::ptr_eq(existing, layer) {
                return;
            }
            self.detach_identifier(identifier);
        }
        self.by_identifier
            .insert(identifier.to_string(), Arc::clone(layer));
        self.by_layer
            .entry(identity(layer))
            .or_default()
            .push(identifier.to_string());
    }

    /// Take `identifier` away from whichever layer owns it, dropping the
    /// layer's record once its identifier set empties.
    fn detach_identifier(&mut self, identifier: &str) {
        let Some(previous) = self.by_identifier.remove(identifier) else {
            return;
        };
        let key = identity(&previous);
        if let Some(owned) = self.by_layer.get_mut(&key) {
            owned.retain(|id| id != identifier);
            if owned.is_empty() {
                self.by_layer.remove(&key);
            }
        }
    }
}

#[derive(Default)]
pub struct LayerDatabase {
    inner: RwLock<DbInner>,
}

impl LayerDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer under its own identifier, plus an optional alias.
    /// Identifiers already owned by another layer are reassigned to this one;
    /// re-adding an identical pair is a no-op.
    pub fn add_layer(&self, layer: &LayerHandle, alias: Option<&str>) {
        let canonical = layer.read().identifier.clone();
        let mut inner = self.inner.write();
        inner.attach(layer, &canonical);
        if let Some(alias) = alias.filter(|a| !a.is_empty() && *a != canonical) {
            inner.attach(layer, alias);
        }
    }

    /// Drop every identifier the layer owns. Returns false when the layer
    /// was never registered.
    pub fn remove_layer(&self, layer: &LayerHandle) -> bool {
        let mut inner = self.inner.write();
        let Some(owned) = inner.by_layer.remove(&identity(layer)) else {
            return false;
        };
        for id in owned {
            inner.by_identifier.remove(&id);
        }
        true
    }

    /// Look an identifier up. Clean layers are invisible: until a layer has
    /// been dirtied by an edit or an import it does not really exist yet.
    pub fn find_layer(&self, identifier: &str) -> Option<LayerHandle> {
        let inner = self.inner.read();
        let layer = inner.by_identifier.get(identifier)?;
        let result = layer.read().dirty.then(|| Arc::clone(layer));
        result
    }

    /// Look an identifier up regardless of dirtiness. Reload needs this to
    /// reuse registered-but-untouched layers instead of duplicating them.
    pub fn find_registered(&self, identifier: &str) -> Option<LayerHandle> {
        self.inner.read().by_identifier.get(identifier).cloned()
    }

    /// Identifiers currently owned by a layer, in registration order.
    pub fn identifiers_for(&self, layer: &LayerHandle) -> Vec<String> {
        self.inner
            .read()
            .by_layer
            .get(&identity(layer))
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every registered layer, one handle per layer.
    pub fn layers(&self) -> Vec<LayerHandle> {
        let inner = self.inner.read();
        inner
            .by_layer
            .values()
            .filter_map(|owned| owned.first())
            .filter_map(|id| inner.by_identifier.get(id))
            .cloned()
            .collect()
    }

    pub fn layer_count(&self) -> usize {
        self.inner.read().by_layer.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_identifier.clear();
        inner.by_layer.clear();
    }
}
