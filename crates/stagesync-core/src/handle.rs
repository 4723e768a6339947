//! Weak references to native scene-graph nodes.
//!
//! A `NodeHandle` is a `(slot, generation)` pair. It never owns the node it
//! names: the host graph can delete the node at any time, and a handle to a
//! reused slot is detected by its stale generation. Liveness is always a
//! query against the graph (`SceneGraph::is_valid` / `is_alive`), made
//! immediately before any dereference.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}
