//! Translator discovery and dispatch.
//!
//! Two registration tables back resolution: compiled-in translators (one per
//! statically linked module) and scripted translators added at runtime. A
//! third index maps free-form asset-type strings onto their claiming
//! translator. Resolution is a pure function over the tables:
//!
//! 1. exact asset-type metadata match,
//! 2. scripted translator for the schema type,
//! 3. compiled translator for the schema type.
//!
//! Discovery drains a factory queue to a fixed point, because instantiating
//! one factory can register further factories (the plugin-load side effect).

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use stagesync_core::{NodeHandle, Prim, SceneGraph};

use crate::translator::{ExportSupport, ExtraBehavior, PrimTranslator, TranslatorId};

pub type RegistryRef = Arc<RwLock<TranslatorRegistry>>;

/// A source of translators. Instantiation may register more factories on the
/// registry it is handed.
pub trait TranslatorFactory: Send + Sync {
    fn translators(&self, registry: &mut TranslatorRegistry) -> Vec<Arc<dyn PrimTranslator>>;
}

struct TranslatorEntry {
    translator: Arc<dyn PrimTranslator>,
    active: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Table {
    Scripted,
    Compiled,
}

#[derive(Default)]
pub struct TranslatorRegistry {
    compiled: BTreeMap<String, TranslatorEntry>,
    scripted: BTreeMap<String, TranslatorEntry>,
    /// asset type -> (table, schema type key)
    asset_types: BTreeMap<String, (Table, String)>,
    pending: Vec<Arc<dyn TranslatorFactory>>,
    extra_behaviors: Vec<Arc<dyn ExtraBehavior>>,
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_ref(self) -> RegistryRef {
        Arc::new(RwLock::new(self))
    }

    /// Queue a factory for the next discovery pass.
    pub fn register_factory(&mut self, factory: Arc<dyn TranslatorFactory>) {
        self.pending.push(factory);
    }

    /// Drain the factory queue to a fixed point. Returns the number of
    /// translators adopted; entries lost to a collision do not count.
    pub fn discover(&mut self) -> usize {
        let mut registered = 0;
        while !self.pending.is_empty() {
            let batch: Vec<_> = self.pending.drain(..).collect();
            for factory in batch {
                for translator in factory.translators(self) {
                    if self.register_translator(translator) {
                        registered += 1;
                    }
                }
            }
        }
        registered
    }

    /// Returns whether the translator was adopted (a collision can keep the
    /// existing entry instead).
    pub fn register_translator(&mut self, translator: Arc<dyn PrimTranslator>) -> bool {
        Self::insert(&mut self.compiled, &mut self.asset_types, Table::Compiled, translator)
    }

    pub fn register_scripted_translator(&mut self, translator: Arc<dyn PrimTranslator>) -> bool {
        Self::insert(&mut self.scripted, &mut self.asset_types, Table::Scripted, translator)
    }

    pub fn register_extra_behavior(&mut self, behavior: Arc<dyn ExtraBehavior>) {
        self.extra_behaviors.push(behavior);
    }

    /// Collision rule: a translator with `can_be_overridden() == false` wins;
    /// if both allow override, the first registration wins. Returns whether
    /// the new translator was adopted.
    fn insert(
        table: &mut BTreeMap<String, TranslatorEntry>,
        asset_types: &mut BTreeMap<String, (Table, String)>,
        kind: Table,
        translator: Arc<dyn PrimTranslator>,
    ) -> bool {
        let key = translator.translated_type().to_string();
        match table.entry(key.clone()) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(TranslatorEntry {
                    translator: Arc::clone(&translator),
                    active: true,
                });
            }
            std::collections::btree_map::Entry::Occupied(mut e) => {
                let existing = &e.get().translator;
                let replace = existing.can_be_overridden() && !translator.can_be_overridden();
                if !replace {
                    tracing::debug!(
                        translated_type = %key,
                        "keeping existing translator registration"
                    );
                    return false;
                }
                e.get_mut().translator = Arc::clone(&translator);
            }
        }
        if let Some(asset_type) = translator.asset_type() {
            asset_types.insert(asset_type.to_string(), (kind, key));
        }
        true
    }

    fn entry(&self, table: Table, key: &str) -> Option<&TranslatorEntry> {
        match table {
            Table::Scripted => self.scripted.get(key),
            Table::Compiled => self.compiled.get(key),
        }
    }

    /// Resolve a translator for a prim, returning the id to persist alongside
    /// it. Inactive entries are skipped, falling through to the next tier. A
    /// miss is a signal, not an error.
    pub fn resolve(&self, prim: &Prim) -> Option<(TranslatorId, Arc<dyn PrimTranslator>)> {
        if let Some(asset_type) = prim.asset_type() {
            if let Some((table, key)) = self.asset_types.get(asset_type) {
                if let Some(entry) = self.entry(*table, key) {
                    if entry.active {
                        return Some((
                            TranslatorId::AssetType(asset_type.to_string()),
                            Arc::clone(&entry.translator),
                        ));
                    }
                }
            }
        }
        for table in [&self.scripted, &self.compiled] {
            if let Some(entry) = table.get(&prim.type_name) {
                if entry.active {
                    return Some((
                        TranslatorId::SchemaType(prim.type_name.clone()),
                        Arc::clone(&entry.translator),
                    ));
                }
            }
        }
        None
    }

    /// Stable lookup for a persisted translator id.
    pub fn resolve_by_id(&self, id: &TranslatorId) -> Option<Arc<dyn PrimTranslator>> {
        match id {
            TranslatorId::AssetType(asset_type) => {
                let (table, key) = self.asset_types.get(asset_type)?;
                let entry = self.entry(*table, key)?;
                entry.active.then(|| Arc::clone(&entry.translator))
            }
            TranslatorId::SchemaType(schema_type) => {
                for table in [&self.scripted, &self.compiled] {
                    if let Some(entry) = table.get(schema_type) {
                        if entry.active {
                            return Some(Arc::clone(&entry.translator));
                        }
                    }
                }
                None
            }
        }
    }

    /// Resolve the translator responsible for exporting a native object.
    /// Scripted translators are probed first and short-circuit on
    /// `Supported`; otherwise the last `Fallback` answer wins.
    pub fn resolve_for_native_object(
        &self,
        graph: &dyn SceneGraph,
        node: NodeHandle,
    ) -> Option<Arc<dyn PrimTranslator>> {
        let mut fallback = None;
        for table in [&self.scripted, &self.compiled] {
            for entry in table.values() {
                if !entry.active {
                    continue;
                }
                match entry.translator.can_export(graph, node) {
                    ExportSupport::Supported => return Some(Arc::clone(&entry.translator)),
                    ExportSupport::Fallback => fallback = Some(Arc::clone(&entry.translator)),
                    ExportSupport::NotSupported => {}
                }
            }
        }
        fallback
    }

    /// Toggle named translators on. Unknown names are ignored.
    pub fn activate(&mut self, types: &[&str]) {
        self.set_active(types, true);
    }

    /// Toggle named translators off without removing them.
    pub fn deactivate(&mut self, types: &[&str]) {
        self.set_active(types, false);
    }

    fn set_active(&mut self, types: &[&str], active: bool) {
        for ty in types {
            for table in [&mut self.scripted, &mut self.compiled] {
                if let Some(entry) = table.get_mut(*ty) {
                    entry.active = active;
                }
            }
        }
    }

    pub fn extra_behaviors_for(&self, node_type: &str) -> Vec<Arc<dyn ExtraBehavior>> {
        self.extra_behaviors
            .iter()
            .filter(|b| b.applies_to(node_type))
            .cloned()
            .collect()
    }

    pub fn translator_count(&self) -> usize {
        self.compiled.len() + self.scripted.len()
    }
}
