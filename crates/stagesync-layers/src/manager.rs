//! Persistence of in-memory layers into the host document.
//!
//! Layers that carry real state (the dirty ones) are serialized as JSON
//! records into a string-array attribute on a singleton bookkeeping node, and
//! reconstructed from it when the document reloads. Anonymous layers never
//! keep their old identifiers across a reload; they come back under fresh
//! ones, and every recorded sublayer reference is rewritten through the
//! old-to-new table afterwards.

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;

use stagesync_core::{
    new_anonymous_layer, new_layer, AttrValue, NodeHandle, SceneGraph, StageRef, SyncError,
};

use crate::database::LayerDatabase;

/// Node type of the singleton bookkeeping node.
pub const MANAGER_NODE_TYPE: &str = "stageSyncLayerManager";
const MANAGER_NODE_NAME: &str = "stageSyncLayerManager1";
const LAYERS_ATTR: &str = "stagesyncSerializedLayers";

/// One persisted layer.
#[derive(Debug, Serialize, Deserialize)]
struct LayerRecord {
    identifier: String,
    file_format: String,
    serialized: String,
    anonymous: bool,
}

#[derive(Default)]
pub struct LayerManager {
    database: LayerDatabase,
    /// Cached singleton handle. Reentrant because node creation can call
    /// back into discovery.
    node: ReentrantMutex<Cell<Option<NodeHandle>>>,
}

impl LayerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(&self) -> &LayerDatabase {
        &self.database
    }

    /// The singleton node, if the document has one. The cached handle is
    /// trusted only while it stays valid; otherwise a full scan re-finds it.
    pub fn find_node(&self, graph: &dyn SceneGraph) -> Option<NodeHandle> {
        let cached = self.node.lock();
        if let Some(handle) = cached.get() {
            if graph.is_valid(handle) {
                return Some(handle);
            }
            cached.set(None);
        }
        let found = graph.nodes_by_type(MANAGER_NODE_TYPE).into_iter().next();
        cached.set(found);
        found
    }

    /// The singleton node, created on demand.
    pub fn find_or_create_node(
        &self,
        graph: &mut dyn SceneGraph,
    ) -> Result<NodeHandle, SyncError> {
        let cached = self.node.lock();
        if let Some(handle) = self.find_node(graph) {
            return Ok(handle);
        }
        let handle = graph.create_node(MANAGER_NODE_TYPE, MANAGER_NODE_NAME, None)?;
        cached.set(Some(handle));
        Ok(handle)
    }

    /// Serialize every dirty layer onto the singleton node. Clean layers are
    /// speculative and not worth persisting. Returns the number written.
    pub fn save_layers(&self, graph: &mut dyn SceneGraph) -> Result<usize, SyncError> {
        let node = self.find_or_create_node(graph)?;
        let mut records = Vec::new();
        for layer in self.database.layers() {
            let data = layer.read();
            if !data.dirty {
                continue;
            }
            let record = LayerRecord {
                identifier: data.identifier.clone(),
                file_format: data.file_format.clone(),
                serialized: data.export_to_string(),
                anonymous: data.anonymous,
            };
            match serde_json::to_string(&record) {
                Ok(json) => records.push(json),
                Err(e) => {
                    tracing::error!(identifier = %data.identifier, error = %e, "failed to serialize layer");
                }
            }
        }
        let count = records.len();
        graph.set_attr(node, LAYERS_ATTR, AttrValue::StringArray(records))?;
        tracing::debug!(count, "saved layers");
        Ok(count)
    }

    /// Rebuild layers from the singleton node. Bad records are skipped with a
    /// logged error; the rest of the batch loads. Returns the number loaded.
    pub fn load_all_layers(&self, graph: &dyn SceneGraph, stage: &StageRef) -> usize {
        let Some(node) = self.find_node(graph) else {
            tracing::debug!("no layer manager node in the document");
            return 0;
        };
        let Some(attr) = graph.get_attr(node, LAYERS_ATTR) else {
            return 0;
        };
        let Some(records) = attr.as_string_array() else {
            tracing::error!("layer attribute has the wrong type");
            return 0;
        };

        // old anonymous identifier -> freshly generated one
        let mut renamed: BTreeMap<String, String> = BTreeMap::new();
        let mut loaded = 0;

        for json in records {
            let record: LayerRecord = match serde_json::from_str(json) {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(error = %e, "skipping unreadable layer record");
                    continue;
                }
            };
            if record.identifier.is_empty() {
                tracing::error!("skipping layer record with empty identifier");
                continue;
            }
            if record.serialized.is_empty() {
                tracing::error!(identifier = %record.identifier, "skipping layer record with no payload");
                continue;
            }
            match self.load_record(&record) {
                Ok(new_identifier) => {
                    if record.anonymous {
                        renamed.insert(record.identifier.clone(), new_identifier);
                    }
                    loaded += 1;
                }
                Err(e) => {
                    tracing::error!(identifier = %record.identifier, error = %e, "skipping layer record");
                }
            }
        }

        self.rewrite_sublayer_references(stage, &renamed);
        tracing::debug!(loaded, "loaded layers");
        loaded
    }

    /// Reconstruct one layer, returning the identifier it ended up under.
    fn load_record(&self, record: &LayerRecord) -> Result<String, SyncError> {
        if record.anonymous {
            let display = anonymous_display_name(&record.identifier);
            let layer = new_anonymous_layer(display);
            layer.write().import_from_string(&record.serialized)?;
            let identifier = layer.read().identifier.clone();
            self.database.add_layer(&layer, None);
            return Ok(identifier);
        }

        if let Some(existing) = self.database.find_registered(&record.identifier) {
            existing.write().import_from_string(&record.serialized)?;
            return Ok(record.identifier.clone());
        }

        // Created under a working identifier so a half-imported layer never
        // becomes findable under the real one, then swapped once whole.
        let format = resolve_file_format(&record.identifier, &record.file_format);
        let working = format!("{}.working", record.identifier);
        let layer = new_layer(&working, &format);
        layer.write().import_from_string(&record.serialized)?;
        layer.write().identifier = record.identifier.clone();
        self.database.add_layer(&layer, None);
        Ok(record.identifier.clone())
    }

    /// Rewrite sublayer paths that point at pre-reload anonymous identifiers,
    /// in the session layer and every tracked layer.
    fn rewrite_sublayer_references(&self, stage: &StageRef, renamed: &BTreeMap<String, String>) {
        if renamed.is_empty() {
            return;
        }
        let session = stage.read().session_layer();
        let mut targets = self.database.layers();
        targets.push(session);
        for layer in targets {
            let mut data = layer.write();
            for path in data.sublayer_paths.iter_mut() {
                if let Some(new_identifier) = renamed.get(path) {
                    *path = new_identifier.clone();
                }
            }
        }
    }
}

/// Display suffix of an anonymous identifier, e.g. `session` in
/// `anon:<tag>:session`.
fn anonymous_display_name(identifier: &str) -> Option<&str> {
    let rest = identifier.strip_prefix("anon:")?;
    rest.split_once(':').map(|(_, display)| display)
}

/// Stored format wins; otherwise sniff the identifier's extension.
fn resolve_file_format(identifier: &str, stored: &str) -> String {
    if !stored.is_empty() {
        return stored.to_string();
    }
    if identifier.ends_with(".sscb") {
        "stagesync_binary".to_string()
    } else {
        "stagesync_text".to_string()
    }
}
