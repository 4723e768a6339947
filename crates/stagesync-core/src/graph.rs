//! The native scene-graph seam.
//!
//! The host runtime (the mutable DAG the translators create nodes in) is an
//! external collaborator. This subsystem consumes it through the narrow
//! `SceneGraph` trait: create/delete/reparent nodes, query liveness, look
//! nodes up by name or type, and read/write typed attributes.
//!
//! `SceneArena` is the in-memory implementation: a generation-checked slab.
//! Two behaviors of real hosts are reproduced deliberately, because the
//! teardown algorithms in the translator context exist to cope with them:
//!
//! - deleting a node deletes its whole subtree, and
//! - deleting the last child of an auto-managed transform deletes the
//!   transform as well, cascading upward.
//!
//! Deleted slots are retained (handles report `is_alive` but not `is_valid`)
//! until `purge` runs, mirroring hosts that keep deleted nodes reachable on
//! an undo stack.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SyncError;
use crate::handle::NodeHandle;

/// Typed attribute values on native nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringArray(Vec<String>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            AttrValue::StringArray(v) => Some(v),
            _ => None,
        }
    }
}

/// Narrow interface onto the host scene-graph runtime.
pub trait SceneGraph {
    fn create_node(
        &mut self,
        node_type: &str,
        name: &str,
        parent: Option<NodeHandle>,
    ) -> Result<NodeHandle, SyncError>;

    /// Delete a node and its subtree. May cascade to auto-managed ancestors.
    fn delete_node(&mut self, handle: NodeHandle) -> Result<(), SyncError>;

    fn reparent_node(
        &mut self,
        handle: NodeHandle,
        new_parent: Option<NodeHandle>,
    ) -> Result<(), SyncError>;

    /// The node exists and has not been deleted.
    fn is_valid(&self, handle: NodeHandle) -> bool;

    /// The node's slot is still retained, even if the node was deleted.
    fn is_alive(&self, handle: NodeHandle) -> bool;

    fn node_type(&self, handle: NodeHandle) -> Option<String>;
    fn node_name(&self, handle: NodeHandle) -> Option<String>;

    /// Pipe-separated chain of names from the root, e.g. `|rig|spine|ctl`.
    fn full_path(&self, handle: NodeHandle) -> Option<String>;

    fn parent(&self, handle: NodeHandle) -> Option<NodeHandle>;
    fn children(&self, handle: NodeHandle) -> Vec<NodeHandle>;

    /// First valid node with the given name. Used to recover handles from
    /// persisted name strings after a document reload.
    fn find_node(&self, name: &str) -> Option<NodeHandle>;

    fn nodes_by_type(&self, node_type: &str) -> Vec<NodeHandle>;

    /// Shape nodes cannot live at the root; they need a transform parent.
    fn is_shape(&self, handle: NodeHandle) -> bool;

    fn is_auto_managed(&self, handle: NodeHandle) -> bool;
    fn set_auto_managed(&mut self, handle: NodeHandle, enabled: bool) -> Result<(), SyncError>;

    /// Walk upward from `from`, deleting auto-managed nodes that have become
    /// childless. Stops at the first node that is not auto-managed or still
    /// has children.
    fn prune_auto_managed_chain(&mut self, from: NodeHandle);

    fn get_attr(&self, handle: NodeHandle, name: &str) -> Option<AttrValue>;
    fn set_attr(
        &mut self,
        handle: NodeHandle,
        name: &str,
        value: AttrValue,
    ) -> Result<(), SyncError>;
}

// ============================================================================
// In-memory arena
// ============================================================================

#[derive(Debug, Clone)]
struct NodeData {
    name: String,
    node_type: String,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    attrs: BTreeMap<String, AttrValue>,
    auto_managed: bool,
}

#[derive(Debug, Clone)]
enum SlotState {
    Vacant,
    Live(NodeData),
    /// Deleted but retained; handles still report `is_alive`.
    Deleted(NodeData),
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    state: SlotState,
}

/// Generation-checked slab of native nodes.
#[derive(Debug, Default)]
pub struct SceneArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    shape_types: BTreeMap<String, bool>,
}

impl SceneArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare whether nodes of `node_type` are shapes. Unknown types default
    /// to non-shape.
    pub fn define_node_type(&mut self, node_type: &str, is_shape: bool) {
        self.shape_types.insert(node_type.to_string(), is_shape);
    }

    /// Free every deleted slot, bumping generations so stale handles to
    /// reused slots stay invalid.
    pub fn purge(&mut self) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if matches!(slot.state, SlotState::Deleted(_)) {
                slot.state = SlotState::Vacant;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(idx as u32);
            }
        }
    }

    pub fn live_node_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Live(_)))
            .count()
    }

    fn node(&self, handle: NodeHandle) -> Option<&NodeData> {
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        match &slot.state {
            SlotState::Live(node) => Some(node),
            _ => None,
        }
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut NodeData> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        match &mut slot.state {
            SlotState::Live(node) => Some(node),
            _ => None,
        }
    }

    fn detach_from_parent(&mut self, handle: NodeHandle) {
        let Some(parent) = self.node(handle).and_then(|n| n.parent) else {
            return;
        };
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.retain(|&c| c != handle);
        }
        if let Some(node) = self.node_mut(handle) {
            node.parent = None;
        }
    }

    /// Mark `handle` and its subtree deleted, children first. Does not touch
    /// the parent's child list.
    fn delete_subtree(&mut self, handle: NodeHandle) {
        let children = self.node(handle).map(|n| n.children.clone()).unwrap_or_default();
        for child in children {
            self.delete_subtree(child);
        }
        let slot = &mut self.slots[handle.index() as usize];
        match std::mem::replace(&mut slot.state, SlotState::Vacant) {
            SlotState::Live(node) | SlotState::Deleted(node) => {
                slot.state = SlotState::Deleted(node);
            }
            SlotState::Vacant => {}
        }
    }
}

impl SceneGraph for SceneArena {
    fn create_node(
        &mut self,
        node_type: &str,
        name: &str,
        parent: Option<NodeHandle>,
    ) -> Result<NodeHandle, SyncError> {
        if let Some(parent) = parent {
            if !self.is_valid(parent) {
                return Err(SyncError::StaleHandle { handle: parent });
            }
        }
        let node = NodeData {
            name: name.to_string(),
            node_type: node_type.to_string(),
            parent,
            children: Vec::new(),
            attrs: BTreeMap::new(),
            auto_managed: false,
        };
        let handle = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.state = SlotState::Live(node);
            NodeHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                state: SlotState::Live(node),
            });
            NodeHandle::new(index, 0)
        };
        if let Some(parent) = parent {
            if let Some(parent_node) = self.node_mut(parent) {
                parent_node.children.push(handle);
            }
        }
        Ok(handle)
    }

    fn delete_node(&mut self, handle: NodeHandle) -> Result<(), SyncError> {
        if !self.is_valid(handle) {
            return Err(SyncError::StaleHandle { handle });
        }
        let parent = self.parent(handle);
        self.detach_from_parent(handle);
        self.delete_subtree(handle);

        // Host cascade: an auto-managed transform whose last child just went
        // away goes away with it.
        let mut cursor = parent;
        while let Some(current) = cursor {
            let delete_it = self
                .node(current)
                .is_some_and(|n| n.auto_managed && n.children.is_empty());
            if !delete_it {
                break;
            }
            let next = self.parent(current);
            self.detach_from_parent(current);
            self.delete_subtree(current);
            cursor = next;
        }
        Ok(())
    }

    fn reparent_node(
        &mut self,
        handle: NodeHandle,
        new_parent: Option<NodeHandle>,
    ) -> Result<(), SyncError> {
        if !self.is_valid(handle) {
            return Err(SyncError::StaleHandle { handle });
        }
        if let Some(new_parent) = new_parent {
            if !self.is_valid(new_parent) {
                return Err(SyncError::StaleHandle { handle: new_parent });
            }
        }
        self.detach_from_parent(handle);
        if let Some(new_parent) = new_parent {
            if let Some(parent_node) = self.node_mut(new_parent) {
                parent_node.children.push(handle);
            }
            if let Some(node) = self.node_mut(handle) {
                node.parent = Some(new_parent);
            }
        }
        Ok(())
    }

    fn is_valid(&self, handle: NodeHandle) -> bool {
        self.node(handle).is_some()
    }

    fn is_alive(&self, handle: NodeHandle) -> bool {
        let Some(slot) = self.slots.get(handle.index() as usize) else {
            return false;
        };
        slot.generation == handle.generation()
            && matches!(slot.state, SlotState::Live(_) | SlotState::Deleted(_))
    }

    fn node_type(&self, handle: NodeHandle) -> Option<String> {
        self.node(handle).map(|n| n.node_type.clone())
    }

    fn node_name(&self, handle: NodeHandle) -> Option<String> {
        self.node(handle).map(|n| n.name.clone())
    }

    fn full_path(&self, handle: NodeHandle) -> Option<String> {
        let mut names = Vec::new();
        let mut cursor = Some(handle);
        while let Some(current) = cursor {
            let node = self.node(current)?;
            names.push(node.name.clone());
            cursor = node.parent;
        }
        names.reverse();
        Some(format!("|{}", names.join("|")))
    }

    fn parent(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.node(handle).and_then(|n| n.parent)
    }

    fn children(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.node(handle).map(|n| n.children.clone()).unwrap_or_default()
    }

    fn find_node(&self, name: &str) -> Option<NodeHandle> {
        self.slots.iter().enumerate().find_map(|(idx, slot)| {
            if let SlotState::Live(node) = &slot.state {
                if node.name == name {
                    return Some(NodeHandle::new(idx as u32, slot.generation));
                }
            }
            None
        })
    }

    fn nodes_by_type(&self, node_type: &str) -> Vec<NodeHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                if let SlotState::Live(node) = &slot.state {
                    if node.node_type == node_type {
                        return Some(NodeHandle::new(idx as u32, slot.generation));
                    }
                }
                None
            })
            .collect()
    }

    fn is_shape(&self, handle: NodeHandle) -> bool {
        self.node(handle)
            .and_then(|n| self.shape_types.get(&n.node_type).copied())
            .unwrap_or(false)
    }

    fn is_auto_managed(&self, handle: NodeHandle) -> bool {
        self.node(handle).is_some_and(|n| n.auto_managed)
    }

    fn set_auto_managed(&mut self, handle: NodeHandle, enabled: bool) -> Result<(), SyncError> {
        let Some(node) = self.node_mut(handle) else {
            return Err(SyncError::StaleHandle { handle });
        };
        node.auto_managed = enabled;
        Ok(())
    }

    fn prune_auto_managed_chain(&mut self, from: NodeHandle) {
        let mut cursor = Some(from);
        while let Some(current) = cursor {
            let prune = self
                .node(current)
                .is_some_and(|n| n.auto_managed && n.children.is_empty());
            if !prune {
                break;
            }
            let next = self.parent(current);
            self.detach_from_parent(current);
            self.delete_subtree(current);
            cursor = next;
        }
    }

    fn get_attr(&self, handle: NodeHandle, name: &str) -> Option<AttrValue> {
        self.node(handle).and_then(|n| n.attrs.get(name).cloned())
    }

    fn set_attr(
        &mut self,
        handle: NodeHandle,
        name: &str,
        value: AttrValue,
    ) -> Result<(), SyncError> {
        let Some(node) = self.node_mut(handle) else {
            return Err(SyncError::StaleHandle { handle });
        };
        node.attrs.insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_go_stale_after_delete() {
        let mut arena = SceneArena::new();
        let a = arena.create_node("transform", "a", None).unwrap();
        let b = arena.create_node("transform", "b", Some(a)).unwrap();
        assert!(arena.is_valid(b));

        arena.delete_node(b).unwrap();
        assert!(!arena.is_valid(b));
        assert!(arena.is_alive(b), "deleted slot is retained until purge");
        assert!(arena.is_valid(a));

        arena.purge();
        assert!(!arena.is_alive(b));

        // Slot reuse must not resurrect the old handle.
        let c = arena.create_node("transform", "c", Some(a)).unwrap();
        assert!(!arena.is_valid(b));
        assert!(arena.is_valid(c));
    }

    #[test]
    fn test_delete_cascades_through_subtree() {
        let mut arena = SceneArena::new();
        let a = arena.create_node("transform", "a", None).unwrap();
        let b = arena.create_node("transform", "b", Some(a)).unwrap();
        let c = arena.create_node("mesh", "c", Some(b)).unwrap();

        arena.delete_node(a).unwrap();
        assert!(!arena.is_valid(a));
        assert!(!arena.is_valid(b));
        assert!(!arena.is_valid(c));
    }

    #[test]
    fn test_auto_managed_parent_dies_with_last_child() {
        let mut arena = SceneArena::new();
        let xform = arena.create_node("transform", "xform", None).unwrap();
        arena.set_auto_managed(xform, true).unwrap();
        let shape = arena.create_node("mesh", "shape", Some(xform)).unwrap();

        arena.delete_node(shape).unwrap();
        assert!(
            !arena.is_valid(xform),
            "auto-managed transform must cascade away with its last child"
        );
    }

    #[test]
    fn test_reparent_detaches_before_attach() {
        let mut arena = SceneArena::new();
        let a = arena.create_node("transform", "a", None).unwrap();
        let b = arena.create_node("transform", "b", None).unwrap();
        let c = arena.create_node("mesh", "c", Some(a)).unwrap();

        arena.reparent_node(c, Some(b)).unwrap();
        assert_eq!(arena.parent(c), Some(b));
        assert!(arena.children(a).is_empty());
        assert_eq!(arena.full_path(c).unwrap(), "|b|c");
    }

    #[test]
    fn test_find_node_ignores_deleted() {
        let mut arena = SceneArena::new();
        let a = arena.create_node("transform", "a", None).unwrap();
        arena.delete_node(a).unwrap();
        assert!(arena.find_node("a").is_none());
    }
}
