//! Stagesync core types
//!
//! Leaf crate shared by the translation engine and the layer manager:
//!
//! - `path`: absolute, slash-separated prim paths with hierarchy-aware ordering
//! - `handle`: generation-checked weak references to native scene-graph nodes
//! - `graph`: the narrow seam onto the host scene-graph runtime, plus an
//!   in-memory arena implementation of it
//! - `stage`: the description-graph side (prims, layers, edit target)
//! - `error`: shared error taxonomy
//!
//! Nothing in this crate owns a native object. Every reference to the host
//! graph is a weak handle whose liveness must be queried before use.

pub mod error;
pub mod graph;
pub mod handle;
pub mod path;
pub mod stage;

pub use error::SyncError;
pub use graph::{AttrValue, SceneArena, SceneGraph};
pub use handle::NodeHandle;
pub use path::PrimPath;
pub use stage::{
    generate_anonymous_identifier, is_anonymous_identifier, new_anonymous_layer, new_layer,
    LayerData, LayerHandle, Prim, Stage, StageRef, ASSET_TYPE_METADATA,
};
