//! Integration tests for the complete stagesync pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Stage → Registry → Context import → native graph
//! - Context + layers → persisted document → reload → restored state
//! - Stage cache as the cross-subsystem entry point
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use stagesync_core::{
    new_anonymous_layer, Prim, PrimPath, SceneArena, SceneGraph, Stage, SyncError,
};
use stagesync_layers::LayerManager;
use stagesync_translate::{
    PrimTranslator, TearDownStatus, TranslatorContext, TranslatorRegistry,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn p(path: &str) -> PrimPath {
    PrimPath::new(path).unwrap()
}

// ============================================================================
// Fixture translators
// ============================================================================

struct MeshTranslator;

impl PrimTranslator for MeshTranslator {
    fn translated_type(&self) -> &str {
        "Mesh"
    }

    fn needs_transform_parent(&self) -> bool {
        true
    }

    fn import(
        &self,
        prim: &Prim,
        graph: &mut dyn SceneGraph,
        ctx: &mut TranslatorContext,
    ) -> Result<(), SyncError> {
        let parent = prim
            .path()
            .parent()
            .and_then(|pp| ctx.get_transform(graph, &pp));
        let xform = graph.create_node("transform", prim.name(), parent)?;
        graph.set_auto_managed(xform, true)?;
        let shape = graph.create_node("mesh", &format!("{}Shape", prim.name()), Some(xform))?;
        ctx.register_item(prim.path(), xform)?;
        ctx.insert_item(prim.path(), shape)?;
        Ok(())
    }

    fn tear_down(
        &self,
        _path: &PrimPath,
        _graph: &mut dyn SceneGraph,
        _ctx: &mut TranslatorContext,
    ) -> TearDownStatus {
        TearDownStatus::Done
    }
}

struct ScopeTranslator;

impl PrimTranslator for ScopeTranslator {
    fn translated_type(&self) -> &str {
        "Scope"
    }

    fn import(
        &self,
        prim: &Prim,
        graph: &mut dyn SceneGraph,
        ctx: &mut TranslatorContext,
    ) -> Result<(), SyncError> {
        let parent = prim
            .path()
            .parent()
            .and_then(|pp| ctx.get_transform(graph, &pp));
        let xform = graph.create_node("transform", prim.name(), parent)?;
        ctx.register_item(prim.path(), xform)?;
        Ok(())
    }

    fn tear_down(
        &self,
        _path: &PrimPath,
        _graph: &mut dyn SceneGraph,
        _ctx: &mut TranslatorContext,
    ) -> TearDownStatus {
        TearDownStatus::Done
    }
}

fn make_registry() -> TranslatorRegistry {
    let mut registry = TranslatorRegistry::new();
    registry.register_translator(Arc::new(MeshTranslator));
    registry.register_translator(Arc::new(ScopeTranslator));
    registry
}

fn make_arena() -> SceneArena {
    let mut arena = SceneArena::new();
    arena.define_node_type("mesh", true);
    arena
}

// ============================================================================
// Full pipeline: import, persist, reload, restore
// ============================================================================

#[test]
fn test_import_persist_reload_restore() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let scene = dir.path().join("scene.ssc");
    let identifier = scene.to_string_lossy().to_string();

    let mut arena = make_arena();
    let mut stage = Stage::open(&identifier);
    stage.define_prim(&p("/set"), "Scope")?;
    stage.define_prim(&p("/set/ball"), "Mesh")?;
    stage.define_prim(&p("/set/floor"), "Mesh")?;
    let stage = stage.into_ref();
    stagesync_layers::insert_stage(&identifier, stage.clone());

    // Working edits live on an anonymous layer referenced from the session
    // layer, the way interactive sessions stack overrides.
    let edits = new_anonymous_layer(Some("edits"));
    let edits_id = edits.read().identifier.clone();
    {
        let mut data = edits.write();
        data.text = "over /set/ball".to_string();
        data.dirty = true;
    }
    stage
        .read()
        .session_layer()
        .write()
        .sublayer_paths
        .push(edits_id.clone());

    let mut ctx = TranslatorContext::new(make_registry().into_ref());
    ctx.attach_stage(stage.clone());
    assert_eq!(ctx.import_all(&mut arena)?, 3);
    assert_eq!(arena.live_node_count(), 5);

    // Persist everything into the host document.
    let manager = LayerManager::new();
    manager.database().add_layer(&edits, None);
    manager.save_layers(&mut arena)?;
    let store = manager.find_node(&arena).unwrap();
    ctx.save_to_node(&mut arena, store)?;

    // Simulated application restart: same arena contents, fresh everything
    // else. The stage is reopened and re-cached under its identifier.
    stagesync_layers::erase_stage(&identifier);
    let reopened = Stage::open(&identifier).into_ref();
    stagesync_layers::insert_stage(&identifier, reopened.clone());
    let reopened = stagesync_layers::find_stage(&identifier).unwrap();

    let reloaded_manager = LayerManager::new();
    assert_eq!(reloaded_manager.load_all_layers(&arena, &reopened), 1);
    let restored_edits_id = reloaded_manager
        .database()
        .layers()
        .first()
        .map(|l| l.read().identifier.clone())
        .unwrap();
    assert_ne!(restored_edits_id, edits_id, "anonymous identifier must be fresh");

    let mut restored_ctx = TranslatorContext::new(make_registry().into_ref());
    restored_ctx.attach_stage(reopened);
    let node = reloaded_manager.find_node(&arena).unwrap();
    restored_ctx.restore_from_node(&arena, node);

    assert_eq!(restored_ctx.len(), 3);
    for path in ["/set", "/set/ball", "/set/floor"] {
        assert_eq!(
            restored_ctx.get_transform(&arena, &p(path)),
            ctx.get_transform(&arena, &p(path)),
            "restored handle for {path} must match the original"
        );
    }
    assert_eq!(
        restored_ctx
            .get_native_object(&arena, &p("/set/ball"), Some("mesh"))
            .map(|h| arena.node_name(h).unwrap())
            .as_deref(),
        Some("ballShape")
    );

    stagesync_layers::erase_stage(&identifier);
    Ok(())
}

#[test]
fn test_structural_edit_roundtrip() -> Result<()> {
    init_tracing();
    let mut arena = make_arena();
    let mut stage = Stage::open("edit.ssc");
    stage.define_prim(&p("/grp"), "Scope")?;
    stage.define_prim(&p("/grp/a"), "Mesh")?;
    stage.define_prim(&p("/grp/b"), "Mesh")?;
    let stage = stage.into_ref();

    let mut ctx = TranslatorContext::new(make_registry().into_ref());
    ctx.attach_stage(stage.clone());
    ctx.import_all(&mut arena)?;

    // The description drops a subtree; the native graph must follow.
    let removed = stage.write().remove_prim(&p("/grp/a"));
    assert_eq!(removed, vec![p("/grp/a")]);
    ctx.remove_subtree(&mut arena, &p("/grp/a"));

    assert!(ctx.lookup(&p("/grp/a")).is_none());
    assert!(ctx.get_transform(&arena, &p("/grp/b")).is_some());
    assert_eq!(arena.live_node_count(), 3, "grp, b, bShape remain");

    // A later define at the same path imports cleanly.
    stage.write().define_prim(&p("/grp/a"), "Mesh")?;
    assert!(ctx.import_prim(&mut arena, &p("/grp/a"))?);
    assert!(ctx.get_transform(&arena, &p("/grp/a")).is_some());
    Ok(())
}

#[test]
fn test_saved_layer_records_are_json() -> Result<()> {
    init_tracing();
    let mut arena = make_arena();
    let manager = LayerManager::new();

    let edits = new_anonymous_layer(Some("edits"));
    edits.write().text = "over /x".to_string();
    edits.write().dirty = true;
    manager.database().add_layer(&edits, None);
    manager.save_layers(&mut arena)?;

    let node = manager.find_node(&arena).unwrap();
    let attr = arena.get_attr(node, "stagesyncSerializedLayers").unwrap();
    let records = attr.as_string_array().unwrap().to_vec();
    assert_eq!(records.len(), 1);

    // Each record is independently parseable JSON with the expected shape.
    let value: serde_json::Value = serde_json::from_str(&records[0])?;
    assert_eq!(value["anonymous"], serde_json::Value::Bool(true));
    assert!(value["identifier"].as_str().unwrap().starts_with("anon:"));
    assert!(!value["serialized"].as_str().unwrap().is_empty());
    Ok(())
}
