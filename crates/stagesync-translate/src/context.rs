//! The translator context: the authoritative mapping between description
//! paths and native-graph handles.
//!
//! One `PrimLookup` per tracked path, held in a sorted map so prefix-bounded
//! range queries (find every tracked descendant of a path) are correct.
//! The context drives the import / update / teardown lifecycle, delegates
//! the actual native-object work to the resolved translator, and persists
//! itself through the flat text encoding in `wire`.
//!
//! Teardown ordering matters: native deletion of a node can cascade to
//! destroy auto-managed ancestors, racing ahead of the bookkeeping. All
//! nodes slated for deletion are therefore first reparented under a detached
//! root — deepest first, shapes behind a disposable transform wrapper — and
//! only then deleted.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use stagesync_core::{AttrValue, NodeHandle, Prim, PrimPath, SceneGraph, StageRef, SyncError};

use crate::registry::RegistryRef;
use crate::translator::{PrimTranslator, TearDownStatus, TranslatorId};
use crate::wire;

/// Attribute names used to persist the context into the host document.
pub const CONTEXT_ATTR: &str = "stagesyncTranslatorContext";
pub const EXCLUDED_GEOMETRY_ATTR: &str = "stagesyncExcludedGeometry";

// ============================================================================
// PrimLookup
// ============================================================================

/// One entry per tracked description path.
#[derive(Debug, Clone)]
pub struct PrimLookup {
    path: PrimPath,
    translator_id: TranslatorId,
    /// The single "main" native object for this path, e.g. its transform.
    prim_handle: Option<NodeHandle>,
    /// Every native object this path's translator created, in creation order.
    created_nodes: Vec<NodeHandle>,
    unique_key: u64,
}

impl PrimLookup {
    fn new(path: PrimPath, translator_id: TranslatorId) -> Self {
        Self {
            path,
            translator_id,
            prim_handle: None,
            created_nodes: Vec::new(),
            unique_key: 0,
        }
    }

    pub fn path(&self) -> &PrimPath {
        &self.path
    }

    pub fn translator_id(&self) -> &TranslatorId {
        &self.translator_id
    }

    pub fn prim_handle(&self) -> Option<NodeHandle> {
        self.prim_handle
    }

    pub fn created_nodes(&self) -> &[NodeHandle] {
        &self.created_nodes
    }

    pub fn unique_key(&self) -> u64 {
        self.unique_key
    }
}

// ============================================================================
// TranslatorContext
// ============================================================================

pub struct TranslatorContext {
    registry: RegistryRef,
    stage: Option<StageRef>,
    lookups: BTreeMap<PrimPath, PrimLookup>,
    excluded_geometry: BTreeSet<PrimPath>,
}

impl TranslatorContext {
    pub fn new(registry: RegistryRef) -> Self {
        Self {
            registry,
            stage: None,
            lookups: BTreeMap::new(),
            excluded_geometry: BTreeSet::new(),
        }
    }

    pub fn attach_stage(&mut self, stage: StageRef) {
        self.stage = Some(stage);
    }

    pub fn detach_stage(&mut self) {
        self.stage = None;
    }

    /// Calling any translation API without a stage is a programmer error and
    /// escalates, unlike the soft per-path failures.
    fn stage(&self) -> Result<StageRef, SyncError> {
        self.stage.clone().ok_or(SyncError::NoStage)
    }

    pub fn registry(&self) -> RegistryRef {
        Arc::clone(&self.registry)
    }

    pub fn stage_ref(&self) -> Option<StageRef> {
        self.stage.clone()
    }

    fn prim_at(&self, path: &PrimPath) -> Result<Prim, SyncError> {
        let stage = self.stage()?;
        let stage = stage.read();
        stage
            .prim_at(path)
            .cloned()
            .ok_or_else(|| SyncError::UnknownPath(path.to_string()))
    }

    /// Translator id for a path, resolved against the *current* prim state.
    /// Unresolvable prims fall back to the schema-type id so the entry stays
    /// round-trippable.
    fn resolve_translator_id(&self, path: &PrimPath) -> Result<TranslatorId, SyncError> {
        let prim = self.prim_at(path)?;
        let registry = self.registry.read();
        Ok(registry
            .resolve(&prim)
            .map(|(id, _)| id)
            .unwrap_or_else(|| TranslatorId::SchemaType(prim.type_name.clone())))
    }

    fn resolve_stored_translator(&self, path: &PrimPath) -> Option<Arc<dyn PrimTranslator>> {
        let entry = self.lookups.get(path)?;
        self.registry.read().resolve_by_id(&entry.translator_id)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Find or create the entry for `path` and set its primary handle,
    /// overwriting any previous one. Created handles are untouched.
    pub fn register_item(&mut self, path: &PrimPath, handle: NodeHandle) -> Result<(), SyncError> {
        let translator_id = self.resolve_translator_id(path)?;
        let entry = self
            .lookups
            .entry(path.clone())
            .or_insert_with(|| PrimLookup::new(path.clone(), translator_id.clone()));
        entry.translator_id = translator_id;
        entry.prim_handle = Some(handle);
        Ok(())
    }

    /// Find or create the entry for `path` and append a created handle.
    /// A null handle is a no-op.
    pub fn insert_item(
        &mut self,
        path: &PrimPath,
        handle: impl Into<Option<NodeHandle>>,
    ) -> Result<(), SyncError> {
        let Some(handle) = handle.into() else {
            return Ok(());
        };
        if !self.lookups.contains_key(path) {
            let translator_id = self.resolve_translator_id(path)?;
            self.lookups
                .insert(path.clone(), PrimLookup::new(path.clone(), translator_id));
        }
        if let Some(entry) = self.lookups.get_mut(path) {
            entry.created_nodes.push(handle);
        }
        Ok(())
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub fn lookup(&self, path: &PrimPath) -> Option<&PrimLookup> {
        self.lookups.get(path)
    }

    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }

    /// Primary handle for `path`. A handle the graph no longer considers
    /// valid is treated as absent, even if the entry still records it.
    pub fn get_transform(&self, graph: &dyn SceneGraph, path: &PrimPath) -> Option<NodeHandle> {
        self.lookups
            .get(path)?
            .prim_handle
            .filter(|&h| graph.is_valid(h))
    }

    /// First valid created handle, optionally filtered by node type.
    pub fn get_native_object(
        &self,
        graph: &dyn SceneGraph,
        path: &PrimPath,
        type_filter: Option<&str>,
    ) -> Option<NodeHandle> {
        self.lookups.get(path)?.created_nodes.iter().copied().find(|&h| {
            graph.is_valid(h)
                && type_filter
                    .map(|ty| graph.node_type(h).as_deref() == Some(ty))
                    .unwrap_or(true)
        })
    }

    /// All still-valid created handles for `path`.
    pub fn get_native_objects(&self, graph: &dyn SceneGraph, path: &PrimPath) -> Vec<NodeHandle> {
        self.lookups
            .get(path)
            .map(|entry| {
                entry
                    .created_nodes
                    .iter()
                    .copied()
                    .filter(|&h| graph.is_valid(h))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tracked paths in ascending order.
    pub fn tracked_paths(&self) -> Vec<PrimPath> {
        self.lookups.keys().cloned().collect()
    }

    // ========================================================================
    // Unique keys
    // ========================================================================

    fn compute_unique_key(&self, path: &PrimPath) -> Result<u64, SyncError> {
        let prim = self.prim_at(path)?;
        let key = match self.resolve_stored_translator(path) {
            Some(translator) => translator.unique_key(&prim),
            None => crate::translator::default_unique_key(&prim),
        };
        Ok(key)
    }

    /// Recompute and store the unique key for one path, returning it.
    pub fn update_unique_key(&mut self, path: &PrimPath) -> Result<u64, SyncError> {
        let key = self.compute_unique_key(path)?;
        if let Some(entry) = self.lookups.get_mut(path) {
            entry.unique_key = key;
        }
        Ok(key)
    }

    /// Recompute every entry's unique key. Paths whose prim has vanished are
    /// left untouched.
    pub fn update_unique_keys(&mut self) {
        for path in self.tracked_paths() {
            if let Err(e) = self.update_unique_key(&path) {
                tracing::debug!(path = %path, error = %e, "skipping unique key refresh");
            }
        }
    }

    /// Whether the prim's current state differs from the last-translated
    /// state. Errors (e.g. prim removed) count as needing work.
    pub fn needs_update(&self, path: &PrimPath) -> bool {
        let Some(entry) = self.lookups.get(path) else {
            return true;
        };
        match self.compute_unique_key(path) {
            Ok(key) => key != entry.unique_key,
            Err(_) => true,
        }
    }

    // ========================================================================
    // Import / update
    // ========================================================================

    /// Import one prim: resolve its translator, run `import`, and seed the
    /// unique key. A resolution miss is not an error; the caller decides
    /// whether it cares.
    pub fn import_prim(
        &mut self,
        graph: &mut dyn SceneGraph,
        path: &PrimPath,
    ) -> Result<bool, SyncError> {
        let prim = self.prim_at(path)?;
        let resolved = self.registry.read().resolve(&prim);
        let Some((translator_id, translator)) = resolved else {
            tracing::debug!(path = %path, type_name = %prim.type_name, "no translator");
            return Ok(false);
        };
        translator.import(&prim, graph, self)?;
        // Import may have registered nothing (valid for bookkeeping-only
        // types); still record the entry so teardown stays symmetrical.
        self.lookups
            .entry(path.clone())
            .or_insert_with(|| PrimLookup::new(path.clone(), translator_id.clone()))
            .translator_id = translator_id.clone();
        let key = translator.unique_key(&prim);
        if let Some(entry) = self.lookups.get_mut(path) {
            entry.unique_key = key;
        }
        Ok(true)
    }

    /// Import every typed prim on the stage that is importable by default and
    /// not excluded. Per-path failures are reported and skipped; the batch
    /// continues. Returns the number of prims imported.
    pub fn import_all(&mut self, graph: &mut dyn SceneGraph) -> Result<usize, SyncError> {
        let stage = self.stage()?;
        let paths: Vec<PrimPath> = stage
            .read()
            .prims()
            .filter(|prim| !prim.type_name.is_empty())
            .map(|prim| prim.path().clone())
            .collect();

        let mut imported = 0;
        for path in paths {
            if self.excluded_geometry.contains(&path) {
                continue;
            }
            let Ok(prim) = self.prim_at(&path) else {
                continue;
            };
            let resolved = self.registry.read().resolve(&prim);
            let Some((_, translator)) = resolved else {
                continue;
            };
            if !translator.importable_by_default() {
                continue;
            }
            match self.import_prim(graph, &path) {
                Ok(true) => imported += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "import failed; continuing");
                }
            }
        }
        Ok(imported)
    }

    /// Reconcile one tracked prim with its current description state. The
    /// unique key gates the work: an unchanged key means no re-translation.
    /// Translators without update support are torn down and re-imported.
    pub fn update_prim(
        &mut self,
        graph: &mut dyn SceneGraph,
        path: &PrimPath,
    ) -> Result<bool, SyncError> {
        if !self.lookups.contains_key(path) {
            return self.import_prim(graph, path);
        }
        let key = self.compute_unique_key(path)?;
        let stored = self.lookups.get(path).map(|e| e.unique_key);
        if stored == Some(key) {
            return Ok(false);
        }

        let translator = self.resolve_stored_translator(path);
        match translator {
            Some(translator) if translator.supports_update() => {
                let prim = self.prim_at(path)?;
                translator.update(&prim, graph, self)?;
                if let Some(entry) = self.lookups.get_mut(path) {
                    entry.unique_key = key;
                }
                Ok(true)
            }
            _ => {
                self.remove_entries(graph, &[path.clone()]);
                self.import_prim(graph, path)
            }
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Collect every tracked path in the subtree rooted at `path`, inclusive,
    /// appending them to `items_to_remove` deepest first. When
    /// `call_pre_unload` is set, each path's translator pre-teardown hook is
    /// invoked immediately, before any native deletion can occur.
    pub fn pre_remove_entry(
        &mut self,
        graph: &mut dyn SceneGraph,
        path: &PrimPath,
        items_to_remove: &mut Vec<PrimPath>,
        call_pre_unload: bool,
    ) {
        let descendants: Vec<PrimPath> = self
            .lookups
            .range((Bound::Included(path.clone()), Bound::Unbounded))
            .map(|(p, _)| p.clone())
            .take_while(|p| path.is_self_or_ancestor_of(p))
            .collect();

        // Ascending path order puts ancestors first; reversed, every
        // descendant precedes every one of its ancestors.
        let start = items_to_remove.len();
        items_to_remove.extend(descendants.into_iter().rev());

        if call_pre_unload {
            for p in items_to_remove[start..].to_vec() {
                if let Some(translator) = self.resolve_stored_translator(&p) {
                    if let Err(e) = translator.pre_tear_down(&p, graph, self) {
                        tracing::error!(path = %p, error = %e, "pre-teardown hook failed");
                    }
                }
            }
        }
    }

    /// Run the teardown hooks for one path: extra behaviors matching the
    /// native object's type, then the translator's pre-teardown and
    /// teardown. Returns false only for genuine failures; `NotSupported`
    /// is a soft warning.
    pub fn unload_prim(
        &mut self,
        graph: &mut dyn SceneGraph,
        path: &PrimPath,
        node: Option<NodeHandle>,
    ) -> bool {
        let Some(entry) = self.lookups.get(path) else {
            return false;
        };
        let translator_id = entry.translator_id.clone();

        let (translator, behaviors) = {
            let registry = self.registry.read();
            let translator = registry.resolve_by_id(&translator_id);
            let behaviors = node
                .filter(|&n| graph.is_valid(n))
                .and_then(|n| graph.node_type(n))
                .map(|ty| registry.extra_behaviors_for(&ty))
                .unwrap_or_default();
            (translator, behaviors)
        };

        let Some(translator) = translator else {
            tracing::warn!(path = %path, translator_id = %translator_id, "no translator for unload");
            return false;
        };

        if let Some(node) = node.filter(|&n| graph.is_valid(n)) {
            for behavior in behaviors {
                behavior.pre_tear_down(graph, node);
            }
        }
        if let Err(e) = translator.pre_tear_down(path, graph, self) {
            tracing::error!(path = %path, error = %e, "pre-teardown failed");
        }
        match translator.tear_down(path, graph, self) {
            TearDownStatus::Done => true,
            TearDownStatus::NotSupported => {
                tracing::warn!(
                    path = %path,
                    "teardown not supported; a non-conforming node likely hit a structural edit"
                );
                true
            }
            TearDownStatus::Failed(reason) => {
                tracing::error!(path = %path, reason = %reason, "teardown failed");
                false
            }
        }
    }

    /// Remove the given entries. `paths` must already be sorted children
    /// before parents (as produced by `pre_remove_entry`). Per-path failures
    /// never abort the batch.
    pub fn remove_entries(&mut self, graph: &mut dyn SceneGraph, paths: &[PrimPath]) {
        let mut to_delete: Vec<(NodeHandle, bool)> = Vec::new();
        let mut prune_roots: Vec<NodeHandle> = Vec::new();

        for path in paths {
            let Some(entry) = self.lookups.get(path) else {
                continue;
            };
            let primary = entry.prim_handle;
            let created = entry.created_nodes.clone();
            // Translators flag their created objects as shapes that cannot
            // sit at the root; OR that with what the graph itself reports.
            let created_need_parent = self
                .resolve_stored_translator(path)
                .map(|t| t.needs_transform_parent())
                .unwrap_or(false);

            let still_loaded = primary
                .iter()
                .chain(created.iter())
                .any(|&h| graph.is_valid(h));
            if still_loaded {
                self.unload_prim(graph, path, primary.or_else(|| created.first().copied()));
            }

            for handle in created {
                if graph.is_valid(handle) && !to_delete.iter().any(|&(h, _)| h == handle) {
                    let wrap = created_need_parent || graph.is_shape(handle);
                    to_delete.push((handle, wrap));
                }
            }
            if let Some(handle) = primary {
                if graph.is_valid(handle) && !to_delete.iter().any(|&(h, _)| h == handle) {
                    to_delete.push((handle, graph.is_shape(handle)));
                }
            }
            if let Some(parent) = primary.and_then(|h| graph.parent(h)) {
                prune_roots.push(parent);
            }
            self.lookups.remove(path);
        }

        detach_and_delete(graph, &to_delete);

        // The transform chains above the removed prims are host-managed;
        // ask the graph to drop whatever became childless.
        for root in prune_roots {
            if graph.is_valid(root) {
                graph.prune_auto_managed_chain(root);
            }
        }
    }

    /// Remove the whole tracked subtree below (and including) `path`.
    pub fn remove_subtree(&mut self, graph: &mut dyn SceneGraph, path: &PrimPath) {
        let mut items = Vec::new();
        self.pre_remove_entry(graph, path, &mut items, true);
        self.remove_entries(graph, &items);
    }

    // ========================================================================
    // Excluded geometry
    // ========================================================================

    pub fn add_excluded_geometry(&mut self, path: &PrimPath) {
        self.excluded_geometry.insert(path.clone());
    }

    pub fn remove_excluded_geometry(&mut self, path: &PrimPath) -> bool {
        self.excluded_geometry.remove(path)
    }

    pub fn is_excluded_geometry(&self, path: &PrimPath) -> bool {
        self.excluded_geometry.contains(path)
    }

    pub fn excluded_geometry(&self) -> impl Iterator<Item = &PrimPath> {
        self.excluded_geometry.iter()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Serialize every entry to the flat text form. Handles are written as
    /// node names; stale handles serialize as absent.
    pub fn serialise(&self, graph: &dyn SceneGraph) -> String {
        let records: Vec<wire::LookupRecord> = self
            .lookups
            .values()
            .map(|entry| wire::LookupRecord {
                path: entry.path.to_string(),
                translator_id: entry.translator_id.to_string(),
                primary: entry
                    .prim_handle
                    .filter(|&h| graph.is_valid(h))
                    .and_then(|h| graph.node_name(h))
                    .unwrap_or_default(),
                created: entry
                    .created_nodes
                    .iter()
                    .copied()
                    .filter(|&h| graph.is_valid(h))
                    .filter_map(|h| graph.node_name(h))
                    .collect(),
                unique_key: Some(entry.unique_key),
            })
            .collect();
        wire::write_records(&records)
    }

    /// Rebuild the index from its serialized form, recovering handles via
    /// the graph's lookup-by-name primitive. Malformed records and missing
    /// nodes are skipped with a logged error; the rest of the batch loads.
    pub fn deserialise(&mut self, graph: &dyn SceneGraph, text: &str) {
        self.lookups.clear();
        for parsed in wire::parse_records(text) {
            let record = match parsed {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(error = %e, "skipping malformed context record");
                    continue;
                }
            };
            let path = match PrimPath::new(&record.path) {
                Ok(path) => path,
                Err(e) => {
                    tracing::error!(path = %record.path, error = %e, "skipping record with bad path");
                    continue;
                }
            };
            let mut entry = PrimLookup::new(path.clone(), TranslatorId::parse(&record.translator_id));
            if !record.primary.is_empty() {
                match graph.find_node(&record.primary) {
                    Some(handle) => entry.prim_handle = Some(handle),
                    None => {
                        tracing::warn!(path = %path, name = %record.primary, "primary node not found on reload");
                    }
                }
            }
            for name in &record.created {
                match graph.find_node(name) {
                    Some(handle) => entry.created_nodes.push(handle),
                    None => {
                        tracing::warn!(path = %path, name = %name, "created node not found on reload");
                    }
                }
            }
            entry.unique_key = record.unique_key.unwrap_or(0);
            self.lookups.insert(path, entry);
        }
    }

    pub fn serialise_excluded_geometry(&self) -> String {
        let paths: Vec<String> = self
            .excluded_geometry
            .iter()
            .map(|p| p.to_string())
            .collect();
        wire::write_path_list(&paths)
    }

    pub fn deserialise_excluded_geometry(&mut self, text: &str) {
        self.excluded_geometry.clear();
        for raw in wire::parse_path_list(text) {
            match PrimPath::new(&raw) {
                Ok(path) => {
                    self.excluded_geometry.insert(path);
                }
                Err(e) => {
                    tracing::error!(path = %raw, error = %e, "skipping bad excluded-geometry path");
                }
            }
        }
    }

    /// Persist both serialized forms into string attributes on a host node.
    pub fn save_to_node(
        &self,
        graph: &mut dyn SceneGraph,
        node: NodeHandle,
    ) -> Result<(), SyncError> {
        let records = self.serialise(graph);
        let excluded = self.serialise_excluded_geometry();
        graph.set_attr(node, CONTEXT_ATTR, AttrValue::String(records))?;
        graph.set_attr(node, EXCLUDED_GEOMETRY_ATTR, AttrValue::String(excluded))?;
        Ok(())
    }

    /// Restore both serialized forms from a host node's attributes. Missing
    /// attributes simply leave the context empty.
    pub fn restore_from_node(&mut self, graph: &dyn SceneGraph, node: NodeHandle) {
        if let Some(text) = graph
            .get_attr(node, CONTEXT_ATTR)
            .as_ref()
            .and_then(AttrValue::as_str)
        {
            self.deserialise(graph, text);
        }
        if let Some(text) = graph
            .get_attr(node, EXCLUDED_GEOMETRY_ATTR)
            .as_ref()
            .and_then(AttrValue::as_str)
        {
            self.deserialise_excluded_geometry(text);
        }
    }
}

// ============================================================================
// Detached-root deletion
// ============================================================================

/// Delete `nodes` without letting host-side cascades outrun the bookkeeping:
/// reparent everything under a detached root first, deepest full path first
/// so children detach before their former parents, then delete. Entries
/// flagged `wrap` cannot sit directly under the root and go behind a
/// disposable transform wrapper.
fn detach_and_delete(graph: &mut dyn SceneGraph, nodes: &[(NodeHandle, bool)]) {
    let mut ordered: Vec<(String, NodeHandle, bool)> = nodes
        .iter()
        .copied()
        .filter(|&(h, _)| graph.is_valid(h))
        .filter_map(|(h, wrap)| graph.full_path(h).map(|p| (p, h, wrap)))
        .collect();
    if ordered.is_empty() {
        return;
    }
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let Ok(detached_root) = graph.create_node("transform", "stagesync_teardown", None) else {
        // Creation of the holding transform failed; fall back to direct
        // deletion in the same deepest-first order.
        for (_, handle, _) in &ordered {
            if graph.is_valid(*handle) {
                let _ = graph.delete_node(*handle);
            }
        }
        return;
    };

    for (_, handle, wrap) in &ordered {
        if !graph.is_valid(*handle) {
            continue;
        }
        if *wrap {
            match graph.create_node("transform", "stagesync_teardown_wrapper", Some(detached_root))
            {
                Ok(wrapper) => {
                    let _ = graph.reparent_node(*handle, Some(wrapper));
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to create teardown wrapper");
                }
            }
        } else {
            let _ = graph.reparent_node(*handle, Some(detached_root));
        }
    }

    for (_, handle, _) in &ordered {
        if graph.is_valid(*handle) {
            let _ = graph.delete_node(*handle);
        }
    }
    if graph.is_valid(detached_root) {
        let _ = graph.delete_node(detached_root);
    }
}
