//! Process-wide stage registry.
//!
//! Hosts open one document per process but many stages per document; the
//! cache is how unrelated subsystems reach a stage by identifier without
//! threading references through every call chain. `clear_stages` is the
//! document-reset hook.

use dashmap::DashMap;
use std::sync::OnceLock;

use stagesync_core::StageRef;

static CACHE: OnceLock<DashMap<String, StageRef>> = OnceLock::new();

fn cache() -> &'static DashMap<String, StageRef> {
    CACHE.get_or_init(DashMap::new)
}

/// Insert or replace a stage. Returns the displaced stage, if any.
pub fn insert_stage(identifier: &str, stage: StageRef) -> Option<StageRef> {
    cache().insert(identifier.to_string(), stage)
}

pub fn find_stage(identifier: &str) -> Option<StageRef> {
    cache().get(identifier).map(|entry| entry.value().clone())
}

pub fn erase_stage(identifier: &str) -> bool {
    cache().remove(identifier).is_some()
}

pub fn clear_stages() {
    cache().clear();
}

pub fn stage_count() -> usize {
    cache().len()
}
