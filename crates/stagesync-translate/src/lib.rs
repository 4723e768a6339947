//! Stagesync translation engine
//!
//! Keeps a persistent scene description (a stage of typed prims) and a
//! mutable native scene graph consistent with each other:
//!
//! - `translator`: the per-prim-type translation unit and its capability
//!   surface (import / update / teardown, export probing, unique keys)
//! - `registry`: discovery and dispatch — compiled-in and scripted
//!   translator tables, asset-type overrides, activation state
//! - `context`: the authoritative path → native-handle index and its
//!   lifecycle (registration, lookup, hierarchy-aware teardown,
//!   persistence across save/reload)
//! - `wire`: the flat text encoding the context persists itself in
//!
//! The native graph is only ever touched through `stagesync_core::SceneGraph`,
//! and only via weak handles checked for liveness first.

pub mod context;
pub mod registry;
pub mod translator;
pub mod wire;

pub use context::{PrimLookup, TranslatorContext};
pub use registry::{RegistryRef, TranslatorFactory, TranslatorRegistry};
pub use translator::{
    default_unique_key, ExportSupport, ExtraBehavior, PrimTranslator, TearDownStatus, TranslatorId,
};
