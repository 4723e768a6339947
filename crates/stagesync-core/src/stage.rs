//! The description-graph side: stages, prims, and layers.
//!
//! A `Stage` is the persistent, hierarchical scene description — a sorted
//! tree of typed prims addressed by `PrimPath`, composed from layers. Edits
//! land on the current edit target and mark it dirty; the dirty flag is what
//! distinguishes a layer that is actually in use from one that was only
//! registered speculatively.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use crate::error::SyncError;
use crate::graph::AttrValue;
use crate::path::PrimPath;

/// Metadata key carrying the free-form asset type of a prim. Takes priority
/// over the schema type during translator resolution.
pub const ASSET_TYPE_METADATA: &str = "assettype";

// ============================================================================
// Layers
// ============================================================================

pub type LayerHandle = Arc<RwLock<LayerData>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerData {
    pub identifier: String,
    pub anonymous: bool,
    /// Set once the layer receives an edit or an import. Clean layers are
    /// treated as not-yet-real by the layer database.
    pub dirty: bool,
    pub file_format: String,
    pub sublayer_paths: Vec<String>,
    pub text: String,
}

/// Serialized body of a layer (the payload persisted into the host document).
#[derive(Debug, Serialize, Deserialize)]
struct LayerContents {
    sublayers: Vec<String>,
    body: String,
}

impl LayerData {
    pub fn with_identifier(identifier: &str, file_format: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            anonymous: is_anonymous_identifier(identifier),
            dirty: false,
            file_format: file_format.to_string(),
            sublayer_paths: Vec::new(),
            text: String::new(),
        }
    }

    pub fn anonymous(display: Option<&str>) -> Self {
        let identifier = generate_anonymous_identifier(display);
        Self {
            identifier,
            anonymous: true,
            dirty: false,
            file_format: "stagesync_text".to_string(),
            sublayer_paths: Vec::new(),
            text: String::new(),
        }
    }

    pub fn export_to_string(&self) -> String {
        let contents = LayerContents {
            sublayers: self.sublayer_paths.clone(),
            body: self.text.clone(),
        };
        serde_json::to_string(&contents).unwrap_or_default()
    }

    /// Replace the layer's contents from a serialized payload. Marks the
    /// layer dirty: an imported layer has diverged from whatever backs it.
    pub fn import_from_string(&mut self, payload: &str) -> Result<(), SyncError> {
        let contents: LayerContents =
            serde_json::from_str(payload).map_err(|e| SyncError::LayerImport {
                identifier: self.identifier.clone(),
                reason: e.to_string(),
            })?;
        self.sublayer_paths = contents.sublayers;
        self.text = contents.body;
        self.dirty = true;
        Ok(())
    }
}

pub fn new_layer(identifier: &str, file_format: &str) -> LayerHandle {
    Arc::new(RwLock::new(LayerData::with_identifier(
        identifier,
        file_format,
    )))
}

pub fn new_anonymous_layer(display: Option<&str>) -> LayerHandle {
    Arc::new(RwLock::new(LayerData::anonymous(display)))
}

pub fn is_anonymous_identifier(identifier: &str) -> bool {
    identifier.starts_with("anon:")
}

/// Anonymous identifiers are never reused: every reconstruction of an
/// anonymous layer gets a fresh one.
pub fn generate_anonymous_identifier(display: Option<&str>) -> String {
    let tag = uuid::Uuid::new_v4().simple().to_string();
    match display {
        Some(display) if !display.is_empty() => format!("anon:{tag}:{display}"),
        _ => format!("anon:{tag}"),
    }
}

// ============================================================================
// Prims
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prim {
    path: PrimPath,
    pub type_name: String,
    pub active: bool,
    pub metadata: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Prim {
    fn new(path: PrimPath, type_name: &str) -> Self {
        Self {
            path,
            type_name: type_name.to_string(),
            active: true,
            metadata: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &PrimPath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    pub fn asset_type(&self) -> Option<&str> {
        self.metadata
            .get(ASSET_TYPE_METADATA)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

// ============================================================================
// Stage
// ============================================================================

pub type StageRef = Arc<RwLock<Stage>>;

pub struct Stage {
    identifier: String,
    prims: BTreeMap<PrimPath, Prim>,
    root_layer: LayerHandle,
    session_layer: LayerHandle,
    edit_target: LayerHandle,
}

impl Stage {
    /// Open a stage rooted at a concrete layer. The session layer is always
    /// a fresh anonymous layer; the edit target starts on the root layer.
    pub fn open(identifier: &str) -> Self {
        let root_layer = new_layer(identifier, "stagesync_text");
        let session_layer = new_anonymous_layer(Some("session"));
        let edit_target = Arc::clone(&root_layer);
        Self {
            identifier: identifier.to_string(),
            prims: BTreeMap::new(),
            root_layer,
            session_layer,
            edit_target,
        }
    }

    pub fn into_ref(self) -> StageRef {
        Arc::new(RwLock::new(self))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn root_layer(&self) -> LayerHandle {
        Arc::clone(&self.root_layer)
    }

    pub fn session_layer(&self) -> LayerHandle {
        Arc::clone(&self.session_layer)
    }

    pub fn edit_target(&self) -> LayerHandle {
        Arc::clone(&self.edit_target)
    }

    pub fn set_edit_target(&mut self, layer: LayerHandle) {
        self.edit_target = layer;
    }

    /// Define a prim, creating any missing ancestors as untyped prims. Marks
    /// the edit target dirty.
    pub fn define_prim(&mut self, path: &PrimPath, type_name: &str) -> Result<(), SyncError> {
        if path.is_root() {
            return Err(SyncError::InvalidPath {
                path: path.to_string(),
                reason: "the root cannot be defined as a prim".to_string(),
            });
        }
        let mut ancestors = Vec::new();
        let mut cursor = path.parent();
        while let Some(p) = cursor {
            if p.is_root() {
                break;
            }
            cursor = p.parent();
            ancestors.push(p);
        }
        for ancestor in ancestors.into_iter().rev() {
            self.prims
                .entry(ancestor.clone())
                .or_insert_with(|| Prim::new(ancestor, ""));
        }
        match self.prims.entry(path.clone()) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(Prim::new(path.clone(), type_name));
            }
            std::collections::btree_map::Entry::Occupied(mut e) => {
                e.get_mut().type_name = type_name.to_string();
            }
        }
        self.edit_target.write().dirty = true;
        Ok(())
    }

    /// Remove a prim and its entire subtree. Returns the removed paths in
    /// ascending order.
    pub fn remove_prim(&mut self, path: &PrimPath) -> Vec<PrimPath> {
        let removed: Vec<PrimPath> = self
            .prims
            .range((Bound::Included(path.clone()), Bound::Unbounded))
            .map(|(p, _)| p.clone())
            .take_while(|p| path.is_self_or_ancestor_of(p))
            .collect();
        for p in &removed {
            self.prims.remove(p);
        }
        if !removed.is_empty() {
            self.edit_target.write().dirty = true;
        }
        removed
    }

    pub fn prim_at(&self, path: &PrimPath) -> Option<&Prim> {
        self.prims.get(path)
    }

    /// Mutable access to a prim. Marks the edit target dirty, since the
    /// caller is presumed to be editing.
    pub fn prim_at_mut(&mut self, path: &PrimPath) -> Option<&mut Prim> {
        let prim = self.prims.get_mut(path);
        if prim.is_some() {
            self.edit_target.write().dirty = true;
        }
        prim
    }

    /// All prims in path order (parents before children).
    pub fn prims(&self) -> impl Iterator<Item = &Prim> {
        self.prims.values()
    }

    /// The subtree rooted at `path`, inclusive, in path order.
    pub fn descendants<'a>(&'a self, path: &'a PrimPath) -> impl Iterator<Item = &'a Prim> + 'a {
        self.prims
            .range((Bound::Included(path.clone()), Bound::Unbounded))
            .map(|(_, prim)| prim)
            .take_while(move |prim| path.is_self_or_ancestor_of(prim.path()))
    }
}
