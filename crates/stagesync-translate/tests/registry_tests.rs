//! Registry behavior: factory discovery, collision rules, resolution
//! ordering across the asset-type, scripted, and compiled tiers, and
//! export probing.

use std::sync::Arc;

use stagesync_core::{
    NodeHandle, Prim, PrimPath, SceneArena, SceneGraph, Stage, SyncError,
    ASSET_TYPE_METADATA,
};
use stagesync_translate::{
    ExportSupport, PrimTranslator, TearDownStatus, TranslatorContext, TranslatorFactory,
    TranslatorId, TranslatorRegistry,
};

/// Minimal translator fixture with tweakable identity and capabilities.
struct StubTranslator {
    translated_type: String,
    asset_type: Option<String>,
    overridable: bool,
    export: ExportSupport,
}

impl StubTranslator {
    fn new(translated_type: &str) -> Self {
        Self {
            translated_type: translated_type.to_string(),
            asset_type: None,
            overridable: false,
            export: ExportSupport::NotSupported,
        }
    }

    fn with_asset_type(mut self, asset_type: &str) -> Self {
        self.asset_type = Some(asset_type.to_string());
        self
    }

    fn overridable(mut self) -> Self {
        self.overridable = true;
        self
    }

    fn with_export(mut self, export: ExportSupport) -> Self {
        self.export = export;
        self
    }
}

impl PrimTranslator for StubTranslator {
    fn translated_type(&self) -> &str {
        &self.translated_type
    }

    fn asset_type(&self) -> Option<&str> {
        self.asset_type.as_deref()
    }

    fn can_be_overridden(&self) -> bool {
        self.overridable
    }

    fn import(
        &self,
        _prim: &Prim,
        _graph: &mut dyn SceneGraph,
        _ctx: &mut TranslatorContext,
    ) -> Result<(), SyncError> {
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

    fn can_export(&self, _graph: &dyn SceneGraph, _node: NodeHandle) -> ExportSupport {
        self.export
    }
}

fn tag_of(translator: &Arc<dyn PrimTranslator>) -> &'static str {
    // Stub translators carry a tag in place of real behavior; recover it by
    // probing through the only channel the trait exposes.
    let arena = SceneArena::new();
    match translator.can_export(&arena, probe_handle()) {
        ExportSupport::Supported => "supported",
        ExportSupport::Fallback => "fallback",
        ExportSupport::NotSupported => "not-supported",
    }
}

fn probe_handle() -> NodeHandle {
    let mut arena = SceneArena::new();
    arena.create_node("transform", "probe", None).unwrap()
}

fn mesh_prim(stage: &mut Stage, path: &str, asset_type: Option<&str>) -> Prim {
    let path = PrimPath::new(path).unwrap();
    stage.define_prim(&path, "Mesh").unwrap();
    if let Some(asset_type) = asset_type {
        stage
            .prim_at_mut(&path)
            .unwrap()
            .metadata
            .insert(ASSET_TYPE_METADATA.to_string(), asset_type.to_string());
    }
    stage.prim_at(&path).unwrap().clone()
}

// ============================================================================
// Discovery
// ============================================================================

struct LeafFactory;

impl TranslatorFactory for LeafFactory {
    fn translators(&self, _registry: &mut TranslatorRegistry) -> Vec<Arc<dyn PrimTranslator>> {
        vec![Arc::new(StubTranslator::new("Camera"))]
    }
}

/// Registers a further factory while producing its own translators, the way
/// a plugin load can pull in more plugins.
struct ChainFactory;

impl TranslatorFactory for ChainFactory {
    fn translators(&self, registry: &mut TranslatorRegistry) -> Vec<Arc<dyn PrimTranslator>> {
        registry.register_factory(Arc::new(LeafFactory));
        vec![Arc::new(StubTranslator::new("Mesh"))]
    }
}

#[test]
fn test_discovery_drains_factories_to_fixed_point() {
    let mut registry = TranslatorRegistry::new();
    registry.register_factory(Arc::new(ChainFactory));

    let registered = registry.discover();
    assert_eq!(registered, 2, "the chained factory must also run");
    assert_eq!(registry.translator_count(), 2);
    assert!(registry
        .resolve_by_id(&TranslatorId::SchemaType("Camera".to_string()))
        .is_some());

    assert_eq!(registry.discover(), 0, "queue is drained");
}

/// Yields two translators for the same type; the second loses the collision
/// and is discarded.
struct CollidingFactory;

impl TranslatorFactory for CollidingFactory {
    fn translators(&self, _registry: &mut TranslatorRegistry) -> Vec<Arc<dyn PrimTranslator>> {
        vec![
            Arc::new(StubTranslator::new("Mesh").with_export(ExportSupport::Supported)),
            Arc::new(StubTranslator::new("Mesh").with_export(ExportSupport::Fallback)),
        ]
    }
}

#[test]
fn test_discovery_count_excludes_collision_losers() {
    let mut registry = TranslatorRegistry::new();
    registry.register_factory(Arc::new(CollidingFactory));

    let registered = registry.discover();
    assert_eq!(registered, 1, "a discarded registration must not count");
    assert_eq!(registry.translator_count(), 1);

    let resolved = registry
        .resolve_by_id(&TranslatorId::SchemaType("Mesh".to_string()))
        .unwrap();
    assert_eq!(tag_of(&resolved), "supported", "the first registration stays");
}

// ============================================================================
// Collisions
// ============================================================================

#[test]
fn test_non_overridable_registration_wins() {
    let mut registry = TranslatorRegistry::new();
    assert!(registry.register_translator(Arc::new(
        StubTranslator::new("Mesh").with_export(ExportSupport::Supported),
    )));
    assert!(
        !registry.register_translator(Arc::new(
            StubTranslator::new("Mesh").with_export(ExportSupport::Fallback),
        )),
        "a losing registration must report itself rejected"
    );

    let resolved = registry
        .resolve_by_id(&TranslatorId::SchemaType("Mesh".to_string()))
        .unwrap();
    assert_eq!(tag_of(&resolved), "supported", "first non-overridable wins");
    assert_eq!(registry.translator_count(), 1);
}

#[test]
fn test_overridable_registration_is_displaced() {
    let mut registry = TranslatorRegistry::new();
    registry.register_translator(Arc::new(
        StubTranslator::new("Mesh")
            .overridable()
            .with_export(ExportSupport::Fallback),
    ));
    registry.register_translator(Arc::new(
        StubTranslator::new("Mesh").with_export(ExportSupport::Supported),
    ));

    let resolved = registry
        .resolve_by_id(&TranslatorId::SchemaType("Mesh".to_string()))
        .unwrap();
    assert_eq!(tag_of(&resolved), "supported", "non-overridable displaces");
}

// ============================================================================
// Resolution order
// ============================================================================

#[test]
fn test_asset_type_outranks_schema_type() {
    let mut registry = TranslatorRegistry::new();
    registry.register_translator(Arc::new(
        StubTranslator::new("Mesh").with_export(ExportSupport::Fallback),
    ));
    registry.register_translator(Arc::new(
        StubTranslator::new("RigMesh")
            .with_asset_type("rig")
            .with_export(ExportSupport::Supported),
    ));

    let mut stage = Stage::open("scene.ssc");
    let plain = mesh_prim(&mut stage, "/plain", None);
    let rigged = mesh_prim(&mut stage, "/rigged", Some("rig"));

    let (id, translator) = registry.resolve(&plain).unwrap();
    assert_eq!(id, TranslatorId::SchemaType("Mesh".to_string()));
    assert_eq!(tag_of(&translator), "fallback");

    let (id, translator) = registry.resolve(&rigged).unwrap();
    assert_eq!(id, TranslatorId::AssetType("rig".to_string()));
    assert_eq!(tag_of(&translator), "supported");
}

#[test]
fn test_scripted_outranks_compiled_and_deactivation_falls_through() {
    let mut registry = TranslatorRegistry::new();
    registry.register_translator(Arc::new(
        StubTranslator::new("Mesh").with_export(ExportSupport::Fallback),
    ));
    registry.register_scripted_translator(Arc::new(
        StubTranslator::new("Mesh").with_export(ExportSupport::Supported),
    ));

    let mut stage = Stage::open("scene.ssc");
    let prim = mesh_prim(&mut stage, "/m", None);

    let (_, translator) = registry.resolve(&prim).unwrap();
    assert_eq!(tag_of(&translator), "supported", "scripted tier first");

    // Deactivation hides both table entries for the name; resolution then
    // misses entirely because set_active toggles every tier.
    registry.deactivate(&["Mesh"]);
    assert!(registry.resolve(&prim).is_none());

    registry.activate(&["Mesh"]);
    let (_, translator) = registry.resolve(&prim).unwrap();
    assert_eq!(tag_of(&translator), "supported");
}

#[test]
fn test_unknown_type_resolves_to_none() {
    let registry = TranslatorRegistry::new();
    let mut stage = Stage::open("scene.ssc");
    let prim = mesh_prim(&mut stage, "/m", None);
    assert!(registry.resolve(&prim).is_none(), "a miss is not an error");
}

// ============================================================================
// Export probing
// ============================================================================

#[test]
fn test_export_resolution_prefers_supported_over_fallback() {
    let mut registry = TranslatorRegistry::new();
    registry.register_translator(Arc::new(
        StubTranslator::new("A").with_export(ExportSupport::Fallback),
    ));
    registry.register_translator(Arc::new(
        StubTranslator::new("B").with_export(ExportSupport::Supported),
    ));

    let mut arena = SceneArena::new();
    let node = arena.create_node("mesh", "m", None).unwrap();

    let resolved = registry.resolve_for_native_object(&arena, node).unwrap();
    assert_eq!(tag_of(&resolved), "supported");
}

#[test]
fn test_export_resolution_falls_back_when_nothing_claims_support() {
    let mut registry = TranslatorRegistry::new();
    registry.register_translator(Arc::new(
        StubTranslator::new("A").with_export(ExportSupport::NotSupported),
    ));
    registry.register_translator(Arc::new(
        StubTranslator::new("B").with_export(ExportSupport::Fallback),
    ));

    let mut arena = SceneArena::new();
    let node = arena.create_node("mesh", "m", None).unwrap();

    let resolved = registry.resolve_for_native_object(&arena, node).unwrap();
    assert_eq!(tag_of(&resolved), "fallback");

    let empty = TranslatorRegistry::new();
    assert!(empty.resolve_for_native_object(&arena, node).is_none());
}
