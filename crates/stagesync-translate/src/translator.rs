//! The per-prim-type translation unit.
//!
//! One translator exists per description-node type. It is stateless per call:
//! the acting path and prim are always parameters, never stored, so many
//! index entries can share one translator instance.

use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::str::FromStr;

use stagesync_core::{AttrValue, NodeHandle, Prim, PrimPath, SceneGraph, SyncError};

use crate::context::TranslatorContext;

/// How well a translator can export a given native object back into the
/// description graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportSupport {
    NotSupported,
    /// Usable if nothing better volunteers.
    Fallback,
    Supported,
}

/// Outcome of a teardown call.
///
/// `NotSupported` is an expected soft case: it usually means a structural
/// edit hit a non-conforming node. It is logged as a warning, never as an
/// error, and is kept distinct from genuine failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TearDownStatus {
    Done,
    NotSupported,
    Failed(String),
}

// ============================================================================
// Translator ids
// ============================================================================

/// Persisted identity of the translator that produced an index entry.
///
/// Wire grammar: `"assettype:" STRING | "schematype:" STRING | STRING`,
/// where the bare form is the legacy schema-type-only encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TranslatorId {
    AssetType(String),
    SchemaType(String),
}

impl TranslatorId {
    pub fn parse(raw: &str) -> Self {
        if let Some(value) = raw.strip_prefix("assettype:") {
            TranslatorId::AssetType(value.to_string())
        } else if let Some(value) = raw.strip_prefix("schematype:") {
            TranslatorId::SchemaType(value.to_string())
        } else {
            // Legacy bare schema name.
            TranslatorId::SchemaType(raw.to_string())
        }
    }

    pub fn value(&self) -> &str {
        match self {
            TranslatorId::AssetType(v) | TranslatorId::SchemaType(v) => v,
        }
    }
}

impl fmt::Display for TranslatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslatorId::AssetType(v) => write!(f, "assettype:{v}"),
            TranslatorId::SchemaType(v) => write!(f, "schematype:{v}"),
        }
    }
}

impl FromStr for TranslatorId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

// ============================================================================
// The translator trait
// ============================================================================

pub trait PrimTranslator: Send + Sync {
    /// Schema type name this translator handles.
    fn translated_type(&self) -> &str;

    /// Free-form asset-type string this translator claims, if any. Asset
    /// types take priority over schema types during resolution.
    fn asset_type(&self) -> Option<&str> {
        None
    }

    /// When false, a later registration for the same type cannot displace
    /// this one.
    fn can_be_overridden(&self) -> bool {
        false
    }

    /// Whether bulk import should pick this type up without being asked.
    fn importable_by_default(&self) -> bool {
        true
    }

    /// Whether `update` can reconcile in place. Translators without update
    /// support are torn down and re-imported when their prim changes.
    fn supports_update(&self) -> bool {
        false
    }

    /// Whether native objects created by this translator are shapes needing
    /// a transform parent.
    fn needs_transform_parent(&self) -> bool {
        false
    }

    /// Create the native objects for `prim`, recording them on the context
    /// via `register_item` / `insert_item`.
    fn import(
        &self,
        prim: &Prim,
        graph: &mut dyn SceneGraph,
        ctx: &mut TranslatorContext,
    ) -> Result<(), SyncError>;

    /// Reconcile existing native objects with new prim state.
    fn update(
        &self,
        prim: &Prim,
        _graph: &mut dyn SceneGraph,
        _ctx: &mut TranslatorContext,
    ) -> Result<(), SyncError> {
        Err(SyncError::UpdateNotSupported {
            type_name: prim.type_name.clone(),
        })
    }

    /// Invoked before any native deletion occurs, e.g. to snapshot state.
    fn pre_tear_down(
        &self,
        _path: &PrimPath,
        _graph: &mut dyn SceneGraph,
        _ctx: &mut TranslatorContext,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    /// Release whatever `import` set up. Native node deletion itself is
    /// driven by the context afterwards.
    fn tear_down(
        &self,
        path: &PrimPath,
        graph: &mut dyn SceneGraph,
        ctx: &mut TranslatorContext,
    ) -> TearDownStatus;

    /// Probe whether this translator can export a native object.
    fn can_export(&self, _graph: &dyn SceneGraph, _node: NodeHandle) -> ExportSupport {
        ExportSupport::NotSupported
    }

    /// Opaque hash of the prim state this translator cares about. Key
    /// inequality is what triggers an update; equality skips it.
    fn unique_key(&self, prim: &Prim) -> u64 {
        default_unique_key(prim)
    }
}

/// Extra per-node-type behavior consulted during unload, ahead of the
/// translator's own pre-teardown.
pub trait ExtraBehavior: Send + Sync {
    fn applies_to(&self, node_type: &str) -> bool;
    fn pre_tear_down(&self, graph: &mut dyn SceneGraph, node: NodeHandle);
}

// ============================================================================
// Unique keys
// ============================================================================

// Fixed seeds: unique keys are persisted and compared across processes, so
// the hash must not vary per process.
const KEY_SEEDS: (u64, u64, u64, u64) = (
    0x7374_6167_6573_796e,
    0x635f_756e_6971_7565,
    0x6b65_795f_7631_0000,
    0x0000_0000_0000_002a,
);

/// Default unique key: a stable hash over the prim's type, activation,
/// metadata, and attribute values.
pub fn default_unique_key(prim: &Prim) -> u64 {
    let state =
        ahash::RandomState::with_seeds(KEY_SEEDS.0, KEY_SEEDS.1, KEY_SEEDS.2, KEY_SEEDS.3);
    let mut hasher = state.build_hasher();
    hasher.write(prim.type_name.as_bytes());
    hasher.write_u8(prim.active as u8);
    for (key, value) in &prim.metadata {
        hasher.write(key.as_bytes());
        hasher.write(value.as_bytes());
    }
    for (key, value) in &prim.attributes {
        hasher.write(key.as_bytes());
        hash_attr(&mut hasher, value);
    }
    hasher.finish()
}

fn hash_attr(hasher: &mut impl Hasher, value: &AttrValue) {
    match value {
        AttrValue::Bool(b) => {
            hasher.write_u8(0);
            hasher.write_u8(*b as u8);
        }
        AttrValue::Int(i) => {
            hasher.write_u8(1);
            hasher.write_i64(*i);
        }
        AttrValue::Float(f) => {
            hasher.write_u8(2);
            hasher.write_u64(f.to_bits());
        }
        AttrValue::String(s) => {
            hasher.write_u8(3);
            hasher.write(s.as_bytes());
        }
        AttrValue::StringArray(values) => {
            hasher.write_u8(4);
            hasher.write_usize(values.len());
            for s in values {
                hasher.write(s.as_bytes());
            }
        }
    }
}
