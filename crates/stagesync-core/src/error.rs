//! Shared error taxonomy.
//!
//! Only a small set of conditions are hard failures (notably calling context
//! APIs with no stage attached). Most runtime mishaps — a translator that
//! cannot handle a structural edit, a stale handle, a malformed persisted
//! record — are soft: they are logged and the surrounding batch continues.

use crate::handle::NodeHandle;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Programmer error: a context API was called before a stage was attached.
    #[error("no stage attached to translator context")]
    NoStage,

    #[error("invalid prim path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("no prim found at path {0}")]
    UnknownPath(String),

    #[error("node handle {handle:?} is no longer valid")]
    StaleHandle { handle: NodeHandle },

    #[error("scene graph operation failed: {0}")]
    Graph(String),

    #[error("translator for type {type_name:?} does not support update")]
    UpdateNotSupported { type_name: String },

    #[error("malformed record {record:?}: {reason}")]
    MalformedRecord { record: String, reason: String },

    #[error("layer {identifier:?} failed to import: {reason}")]
    LayerImport { identifier: String, reason: String },
}
