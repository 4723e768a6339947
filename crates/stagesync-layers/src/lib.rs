//! Layer bookkeeping for stagesync
//!
//! - `database`: the identifier ⇄ layer index. Layers are identity-keyed
//!   (by allocation, not by name), identifiers are exclusively owned, and
//!   clean layers stay invisible to lookups until something dirties them.
//! - `manager`: persistence of in-memory layers into the host document via
//!   a singleton bookkeeping node, and their reconstruction on reload.
//! - `stage_cache`: the process-wide stage registry.

pub mod database;
pub mod manager;
pub mod stage_cache;

pub use database::LayerDatabase;
pub use manager::{LayerManager, MANAGER_NODE_TYPE};
pub use stage_cache::{clear_stages, erase_stage, find_stage, insert_stage, stage_count};
