//! Integration tests for change processing.
//!
//! Each test composes a small scene, caches some results, edits a layer and
//! checks both what the change scope reported and what the cache holds
//! afterwards.

use std::sync::Arc;

use strata::cache::CompositionCache;
use strata::core::config::CacheConfig;
use strata::core::layer::{LayerHandle, LayerRegistry, PropertySpec, Reference, Specifier};
use strata::core::types::{LayerOffset, LayerStackId, Path};

// =============================================================================
// Test Helpers
// =============================================================================

fn p(s: &str) -> Path {
    Path::new(s).expect("valid path")
}

/// A registry, a root layer and the cache built on it.
struct Scene {
    registry: Arc<LayerRegistry>,
    root: LayerHandle,
    cache: CompositionCache,
}

impl Scene {
    fn new(setup: impl FnOnce(&Arc<LayerRegistry>, &LayerHandle)) -> Self {
        Self::with_config(CacheConfig::default(), setup)
    }

    fn with_config(config: CacheConfig, setup: impl FnOnce(&Arc<LayerRegistry>, &LayerHandle)) -> Self {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").expect("create root layer");
        setup(&registry, &root);
        let cache = CompositionCache::new(LayerStackId::new(root.id().clone()), registry.clone(), config)
            .expect("create cache");
        Self { registry, root, cache }
    }

    fn layer(&self, identifier: &str) -> LayerHandle {
        self.registry.create(identifier).expect("create layer")
    }

    fn compute(&self, path: &str) {
        self.cache.compute_prim_index(&p(path)).expect("compute prim index");
    }

    fn cached(&self, path: &str) -> bool {
        self.cache.find_prim_index(&p(path)).is_some()
    }

    /// Composed child names of `path`, composing it if needed.
    fn child_names(&self, path: &str) -> Vec<String> {
        let (index, _) = self.cache.compute_prim_index(&p(path)).expect("compute prim index");
        index.compute_prim_child_names().0
    }

    fn prim_stack_len(&self, path: &str) -> usize {
        self.cache.find_prim_index(&p(path)).expect("cached prim index").prim_stack().len()
    }
}

fn names(expected: &[&str]) -> Vec<String> {
    expected.iter().map(|n| n.to_string()).collect()
}

fn paths(expected: &[&str]) -> Vec<Path> {
    expected.iter().map(|s| p(s)).collect()
}

// =============================================================================
// Prim Edits
// =============================================================================

#[test]
fn cache_inert_fields_change_nothing() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
        root.create_property(&p("/World.size"), PropertySpec::default()).unwrap();
    });
    scene.compute("/World");
    let before = scene.cache.find_prim_index(&p("/World")).unwrap();

    let mut scope = scene.cache.open_scope().unwrap();
    scope.process(scene.root.set_documentation(&p("/World"), Some("the world".into())).unwrap());
    scope.process(
        scene
            .root
            .set_default_value(&p("/World.size"), Some(serde_json::json!(4.0)))
            .unwrap(),
    );
    let summary = scope.close();

    assert!(summary.is_empty());
    let after = scene.cache.find_prim_index(&p("/World")).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[test]
fn cache_inherit_added_in_referenced_layer() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
    });
    let model = scene.layer("model.sdf");
    model.create_prim_spec(&p("/Model/Geom"), Specifier::Def).unwrap();
    scene
        .cache
        .apply_changes(
            scene
                .root
                .add_reference(&p("/World"), Reference::new("model.sdf", p("/Model")))
                .unwrap(),
        )
        .unwrap();
    scene.compute("/World/Geom");

    let summary = scene
        .cache
        .apply_changes(model.add_inherit(&p("/Model/Geom"), p("/Class")).unwrap())
        .unwrap();

    assert_eq!(summary.significant, vec![p("/World/Geom")]);
    assert!(scene.cached("/World"));
    assert!(!scene.cached("/World/Geom"));
}

#[test]
fn cache_removing_last_inert_spec_is_significant() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
        root.create_over(&p("/World/Child")).unwrap();
    });
    scene.compute("/World/Child");

    let summary = scene
        .cache
        .apply_changes(scene.root.remove_prim_spec(&p("/World/Child")).unwrap())
        .unwrap();

    assert_eq!(summary.significant, vec![p("/World/Child")]);
    assert!(summary.specs.is_empty());
    assert!(scene.cached("/World"));
    assert!(!scene.cached("/World/Child"));
}

#[test]
fn cache_inert_over_in_sublayer_is_a_spec_change() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
    });
    let sub = scene.layer("sub.sdf");
    sub.create_prim_spec(&p("/Elsewhere"), Specifier::Def).unwrap();
    scene.cache.apply_changes(scene.root.add_sublayer("sub.sdf")).unwrap();
    scene.compute("/World");
    assert_eq!(scene.cache.find_prim_index(&p("/World")).unwrap().prim_stack().len(), 1);

    let summary = scene.cache.apply_changes(sub.create_over(&p("/World")).unwrap()).unwrap();

    assert!(summary.significant.is_empty());
    assert_eq!(summary.specs, vec![p("/World")]);
    let index = scene.cache.find_prim_index(&p("/World")).unwrap();
    assert_eq!(index.prim_stack().len(), 2);
}

#[test]
fn cache_first_inert_spec_is_significant() {
    let scene = Scene::new(|_, root| {
        root.create_over(&p("/Parent")).unwrap();
        root.add_reference(&p("/Parent"), Reference::new("ref.sdf", p("/Parent")))
            .unwrap();
    });
    let reference = scene.layer("ref.sdf");
    reference.create_prim_spec(&p("/Parent/Child"), Specifier::Def).unwrap();
    scene.compute("/Parent/Child");

    // An over on a prim that already has specs only changes its stack.
    let summary = scene.cache.apply_changes(scene.root.create_over(&p("/Parent/Child")).unwrap()).unwrap();
    assert!(summary.significant.is_empty());
    assert_eq!(summary.specs, paths(&["/Parent/Child"]));
    assert!(summary.prims.is_empty());
    assert_eq!(scene.prim_stack_len("/Parent/Child"), 2);

    // The first spec for a prim is significant even with nothing cached.
    let summary = scene.cache.apply_changes(scene.root.create_over(&p("/Parent/NewChild")).unwrap()).unwrap();
    assert_eq!(summary.significant, paths(&["/Parent/NewChild"]));
    assert!(summary.specs.is_empty());
    assert!(summary.prims.is_empty());

    // Likewise for a cached result that had no specs.
    scene.compute("/Parent/NewChild2");
    assert_eq!(scene.prim_stack_len("/Parent/NewChild2"), 0);
    let summary = scene.cache.apply_changes(scene.root.create_over(&p("/Parent/NewChild2")).unwrap()).unwrap();
    assert_eq!(summary.significant, paths(&["/Parent/NewChild2"]));
    assert!(summary.specs.is_empty());
    assert!(!scene.cached("/Parent/NewChild2"));
}

#[test]
fn cache_inert_ancestor_removal_cascades_spec_changes() {
    let scene = Scene::new(|_, root| {
        root.create_over(&p("/Parent/Child")).unwrap();
        root.create_property(&p("/Parent/Child.attr"), PropertySpec::default()).unwrap();
        root.add_sublayer("sub.sdf");
    });
    let sub = scene.layer("sub.sdf");
    sub.create_prim_spec(&p("/Parent"), Specifier::Def).unwrap();
    sub.create_prim_spec(&p("/Parent/Child"), Specifier::Def).unwrap();
    sub.create_property(&p("/Parent/Child.attr"), PropertySpec::with_default(serde_json::json!(1.0)))
        .unwrap();
    scene.compute("/Parent/Child");
    scene.cache.compute_property_index(&p("/Parent/Child.attr")).unwrap();
    assert_eq!(scene.prim_stack_len("/Parent"), 2);
    assert_eq!(scene.prim_stack_len("/Parent/Child"), 2);

    let summary = scene.cache.apply_changes(scene.root.remove_prim_spec(&p("/Parent")).unwrap()).unwrap();

    assert!(summary.significant.is_empty());
    assert!(summary.prims.is_empty());
    assert_eq!(summary.specs, paths(&["/Parent", "/Parent/Child", "/Parent/Child.attr"]));
    assert_eq!(scene.prim_stack_len("/Parent"), 1);
    assert_eq!(scene.prim_stack_len("/Parent/Child"), 1);
    let property = scene
        .cache
        .find_property_index(&p("/Parent/Child.attr"))
        .expect("property still cached");
    assert_eq!(property.property_stack(), &[(sub.id().clone(), p("/Parent/Child.attr"))]);
}

// =============================================================================
// Variants
// =============================================================================

#[test]
fn cache_variant_edits() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/Variant"), Specifier::Def).unwrap();
    });
    let model = scene.layer("model.sdf");
    model.create_prim_spec(&p("/Model/Geom"), Specifier::Def).unwrap();

    scene.compute("/Variant");
    let summary = scene.cache.apply_changes(scene.root.add_variant_set(&p("/Variant"), "look").unwrap()).unwrap();
    assert_eq!(summary.significant, paths(&["/Variant"]));
    assert!(summary.specs.is_empty());
    assert!(summary.prims.is_empty());

    scene.compute("/Variant");
    let summary = scene
        .cache
        .apply_changes(
            scene
                .root
                .set_variant_selection(&p("/Variant"), "look", Some("red"))
                .unwrap(),
        )
        .unwrap();
    assert_eq!(summary.significant, paths(&["/Variant"]));
    assert!(summary.specs.is_empty());

    // The selected variant node exists before its spec does, so adding the
    // spec only grows the prim stack.
    scene.compute("/Variant");
    assert_eq!(scene.prim_stack_len("/Variant"), 1);
    let summary = scene
        .cache
        .apply_changes(scene.root.create_variant(&p("/Variant"), "look", "red").unwrap())
        .unwrap();
    assert!(summary.significant.is_empty());
    assert_eq!(summary.specs, paths(&["/Variant"]));
    assert!(summary.prims.is_empty());
    assert_eq!(scene.prim_stack_len("/Variant"), 2);

    let summary = scene
        .cache
        .apply_changes(
            scene
                .root
                .add_reference(&p("/Variant{look=red}"), Reference::new("model.sdf", p("/Model")))
                .unwrap(),
        )
        .unwrap();
    assert_eq!(summary.significant, paths(&["/Variant"]));
    assert!(summary.specs.is_empty());
    assert!(!scene.cached("/Variant"));
    assert_eq!(scene.child_names("/Variant"), names(&["Geom"]));
}

#[test]
fn cache_unused_variant_edit_keeps_parent() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/Root"), Specifier::Def).unwrap();
        root.add_variant_set(&p("/Root"), "var").unwrap();
        root.create_variant(&p("/Root"), "var", "A").unwrap();
        root.create_variant(&p("/Root"), "var", "B").unwrap();
        root.set_variant_selection(&p("/Root"), "var", Some("A")).unwrap();
    });
    let (before, errors) = scene.cache.compute_prim_index(&p("/Root")).unwrap();
    assert!(errors.is_empty());

    let summary = scene
        .cache
        .apply_changes(scene.root.create_prim_spec(&p("/Root{var=B}Child"), Specifier::Def).unwrap())
        .unwrap();

    assert!(!summary.significant.contains(&p("/Root")));
    assert!(!summary.specs.contains(&p("/Root")));
    let after = scene.cache.find_prim_index(&p("/Root")).expect("parent stays cached");
    assert!(Arc::ptr_eq(&before, &after));
}

// =============================================================================
// Instancing
// =============================================================================

#[test]
fn cache_instanceable_toggle_changes_child_names() {
    let config = CacheConfig {
        instancing: true,
        ..CacheConfig::default()
    };
    let scene = Scene::with_config(config, |_, root| {
        root.create_prim_spec(&p("/Parent/DirectChild"), Specifier::Def).unwrap();
        root.add_reference(&p("/Parent"), Reference::new("ref.sdf", p("/Parent")))
            .unwrap();
    });
    let reference = scene.layer("ref.sdf");
    reference.create_prim_spec(&p("/Parent/RefChild"), Specifier::Def).unwrap();

    assert_eq!(scene.child_names("/Parent"), names(&["RefChild", "DirectChild"]));
    assert!(!scene.cache.find_prim_index(&p("/Parent")).unwrap().is_instanceable());

    let summary = scene
        .cache
        .apply_changes(scene.root.set_instanceable(&p("/Parent"), Some(true)).unwrap())
        .unwrap();
    assert_eq!(summary.significant, paths(&["/Parent"]));
    assert!(summary.specs.is_empty());
    assert!(summary.prims.is_empty());

    // Instances cannot introduce children locally.
    assert_eq!(scene.child_names("/Parent"), names(&["RefChild"]));
    assert!(scene.cache.find_prim_index(&p("/Parent")).unwrap().is_instanceable());

    let summary = scene
        .cache
        .apply_changes(scene.root.set_instanceable(&p("/Parent"), Some(false)).unwrap())
        .unwrap();
    assert_eq!(summary.significant, paths(&["/Parent"]));
    assert_eq!(scene.child_names("/Parent"), names(&["RefChild", "DirectChild"]));
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn cache_target_edits_are_reported() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
        root.create_property(
            &p("/World.look"),
            PropertySpec {
                targets: vec![p("/Looks/Red")],
                ..PropertySpec::default()
            },
        )
        .unwrap();
    });
    scene.cache.compute_property_index(&p("/World.look")).unwrap();

    let summary = scene
        .cache
        .apply_changes(scene.root.set_targets(&p("/World.look"), vec![p("/Looks/Blue")]).unwrap())
        .unwrap();

    assert_eq!(summary.targets, vec![p("/World.look")]);
    assert_eq!(summary.specs, vec![p("/World.look")]);
    assert!(summary.significant.is_empty());
    assert!(scene.cache.find_property_index(&p("/World.look")).is_some());
}

// =============================================================================
// Layer Stacks
// =============================================================================

#[test]
fn cache_empty_sublayer_changes_only_used_layers() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
    });
    let empty = scene.layer("empty.sdf");
    scene.compute("/World");
    let revision = scene.cache.used_layers_revision();

    let summary = scene.cache.apply_changes(scene.root.add_sublayer("empty.sdf")).unwrap();

    assert!(summary.significant.is_empty());
    assert!(summary.used_layers_changed);
    assert!(scene.cache.used_layers_revision() > revision);
    assert!(scene.cache.is_layer_used(empty.id()));
    assert!(scene.cached("/World"));
}

#[test]
fn cache_sublayer_with_specs_clears_everything() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
    });
    let sub = scene.layer("sub.sdf");
    sub.create_prim_spec(&p("/World"), Specifier::Over).unwrap();
    sub.set_documentation(&p("/World"), Some("opinion".into())).unwrap();
    scene.compute("/World");

    let summary = scene.cache.apply_changes(scene.root.add_sublayer("sub.sdf")).unwrap();

    assert_eq!(summary.significant, vec![Path::absolute_root()]);
    assert!(!scene.cached("/World"));
    scene.compute("/World");
    assert_eq!(scene.cache.find_prim_index(&p("/World")).unwrap().prim_stack().len(), 2);
}

#[test]
fn cache_invalid_sublayer_round_trip() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
    });
    scene.compute("/World");

    let summary = scene.cache.apply_changes(scene.root.add_sublayer("nowhere.sdf")).unwrap();
    assert!(summary.significant.is_empty());
    assert!(scene.cache.is_invalid_sublayer_identifier("nowhere.sdf"));
    assert_eq!(summary.layer_stacks, vec![scene.cache.root_layer_stack_id().clone()]);
    assert!(scene.cached("/World"));

    scene.cache.apply_changes(scene.root.remove_sublayer("nowhere.sdf")).unwrap();
    assert!(!scene.cache.is_invalid_sublayer_identifier("nowhere.sdf"));
    assert!(scene.cached("/World"));
}

#[test]
fn cache_time_scaling_changes() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
        root.set_time_codes_per_second(Some(24.0));
    });
    let sub = scene.layer("sub.sdf");
    sub.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
    scene.cache.apply_changes(scene.root.add_sublayer("sub.sdf")).unwrap();
    scene.compute("/World");

    // Frames per second is shadowed by the authored time codes.
    let summary = scene.cache.apply_changes(scene.root.set_frames_per_second(Some(30.0))).unwrap();
    assert!(summary.significant.is_empty());
    assert!(scene.cached("/World"));

    let summary = scene
        .cache
        .apply_changes(scene.root.set_sublayer_offset(0, LayerOffset::from_offset(10.0)).unwrap())
        .unwrap();
    assert_eq!(summary.significant, vec![Path::absolute_root()]);
    assert_eq!(
        scene.cache.root_layer_stack().layer_offset(sub.id()),
        Some(LayerOffset::from_offset(10.0))
    );

    scene.compute("/World");
    let summary = scene.cache.apply_changes(scene.root.set_time_codes_per_second(Some(48.0))).unwrap();
    assert_eq!(summary.significant, vec![Path::absolute_root()]);
    assert_eq!(scene.cache.root_layer_stack().time_codes_per_second(), 48.0);
}

#[test]
fn cache_default_prim_retargets_references() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
    });
    let model = scene.layer("model.sdf");
    model.create_prim_spec(&p("/Model"), Specifier::Def).unwrap();
    model.create_prim_spec(&p("/Other"), Specifier::Def).unwrap();
    model.set_default_prim(Some("Model"));
    scene
        .cache
        .apply_changes(
            scene
                .root
                .add_reference(&p("/World"), Reference::to_default_prim("model.sdf"))
                .unwrap(),
        )
        .unwrap();
    scene.compute("/World");
    let index = scene.cache.find_prim_index(&p("/World")).unwrap();
    assert!(index.prim_stack().contains(&(model.id().clone(), p("/Model"))));

    let summary = scene.cache.apply_changes(model.set_default_prim(Some("Other"))).unwrap();

    assert_eq!(summary.significant, vec![p("/World")]);
    scene.compute("/World");
    let index = scene.cache.find_prim_index(&p("/World")).unwrap();
    assert!(index.prim_stack().contains(&(model.id().clone(), p("/Other"))));
}

// =============================================================================
// Relocation
// =============================================================================

#[test]
fn cache_relocation_in_referenced_layer() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World"), Specifier::Def).unwrap();
    });
    let model = scene.layer("model.sdf");
    model.create_prim_spec(&p("/Model/A"), Specifier::Def).unwrap();
    scene
        .cache
        .apply_changes(
            scene
                .root
                .add_reference(&p("/World"), Reference::new("model.sdf", p("/Model")))
                .unwrap(),
        )
        .unwrap();
    scene.compute("/World/A");

    // The first relocate in a stack invalidates everything using it.
    let summary = scene
        .cache
        .apply_changes(model.set_relocates(vec![(p("/Model/A"), p("/Model/B"))]))
        .unwrap();
    assert_eq!(summary.significant, vec![p("/World")]);

    scene.compute("/World");
    let (names, prohibited) = scene.cache.find_prim_index(&p("/World")).unwrap().compute_prim_child_names();
    assert_eq!(names, vec!["B".to_string()]);
    assert!(prohibited.contains("A"));

    // Moving the target again only touches the paths involved.
    scene.compute("/World/B");
    let summary = scene
        .cache
        .apply_changes(model.set_relocates(vec![(p("/Model/A"), p("/Model/C"))]))
        .unwrap();
    assert!(summary.significant.contains(&p("/World/B")));
    assert!(!summary.significant.contains(&p("/World")));
    assert_eq!(summary.prims, vec![p("/World")]);
    assert!(!scene.cached("/World/B"));

    scene.compute("/World");
    let (names, _) = scene.cache.find_prim_index(&p("/World")).unwrap().compute_prim_child_names();
    assert_eq!(names, vec!["C".to_string()]);
}

/// `/A` and `/B` in the root layer both reference `/Model` in model.sdf,
/// which relocates `/Model/PreRelo` to `/Model/Relocated`.
fn shared_relocation_scene(extra_relocates: &[(&str, &str)]) -> (Scene, LayerHandle) {
    let scene = Scene::new(|_, root| {
        for importer in ["/A", "/B"] {
            root.create_prim_spec(&p(importer), Specifier::Def).unwrap();
            root.add_reference(&p(importer), Reference::new("model.sdf", p("/Model")))
                .unwrap();
        }
    });
    let model = scene.layer("model.sdf");
    model.create_prim_spec(&p("/Model/PreRelo"), Specifier::Def).unwrap();
    let mut relocates = vec![(p("/Model/PreRelo"), p("/Model/Relocated"))];
    relocates.extend(extra_relocates.iter().map(|(s, t)| (p(s), p(t))));
    model.set_relocates(relocates);
    (scene, model)
}

#[test]
fn cache_shared_relocation_removal_reaches_every_importer() {
    let (scene, model) = shared_relocation_scene(&[("/Model/Other", "/Model/Moved")]);
    scene.compute("/A/Relocated");
    scene.compute("/B/Relocated");

    let summary = scene
        .cache
        .apply_changes(model.set_relocates(vec![(p("/Model/Other"), p("/Model/Moved"))]))
        .unwrap();

    assert_eq!(
        summary.significant,
        paths(&["/A/PreRelo", "/A/Relocated", "/B/PreRelo", "/B/Relocated"])
    );
    assert_eq!(summary.prims, paths(&["/A", "/B"]));
    assert!(scene.cache.cached_prim_paths().is_empty());

    assert!(scene.child_names("/A").contains(&"PreRelo".to_string()));
    assert!(!scene.child_names("/B").contains(&"Relocated".to_string()));
}

#[test]
fn cache_removing_last_shared_relocation_resets_importers() {
    let (scene, model) = shared_relocation_scene(&[]);
    scene.compute("/A/Relocated");
    scene.compute("/B/Relocated");

    let summary = scene.cache.apply_changes(model.set_relocates(Vec::new())).unwrap();

    assert_eq!(summary.significant, paths(&["/A", "/B"]));
    assert!(summary.prims.is_empty());
    assert!(scene.cache.cached_prim_paths().is_empty());
}

#[test]
fn cache_relocation_removal_through_nested_reference() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/A"), Specifier::Def).unwrap();
        root.add_reference(&p("/A"), Reference::new("mid.sdf", p("/Mid"))).unwrap();
    });
    let mid = scene.layer("mid.sdf");
    mid.create_prim_spec(&p("/Mid"), Specifier::Def).unwrap();
    mid.add_reference(&p("/Mid"), Reference::new("model.sdf", p("/Model"))).unwrap();
    let model = scene.layer("model.sdf");
    model.create_prim_spec(&p("/Model/PreRelo"), Specifier::Def).unwrap();
    model.set_relocates(vec![
        (p("/Model/PreRelo"), p("/Model/Relocated")),
        (p("/Model/Other"), p("/Model/Moved")),
    ]);
    scene.compute("/A/Relocated");

    let summary = scene
        .cache
        .apply_changes(model.set_relocates(vec![(p("/Model/Other"), p("/Model/Moved"))]))
        .unwrap();

    assert_eq!(summary.significant, paths(&["/A/PreRelo", "/A/Relocated"]));
    assert_eq!(summary.prims, paths(&["/A"]));
    assert!(!scene.cached("/A"));
    assert!(!scene.cached("/A/Relocated"));
}

// =============================================================================
// Muting
// =============================================================================

#[test]
fn cache_muting_round_trip() {
    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World/FromRoot"), Specifier::Def).unwrap();
    });
    let sub = scene.layer("sub.sdf");
    sub.create_prim_spec(&p("/World/FromSub"), Specifier::Def).unwrap();
    scene.cache.apply_changes(scene.root.add_sublayer("sub.sdf")).unwrap();
    let unmuted = scene.child_names("/World");
    assert_eq!(unmuted, names(&["FromSub", "FromRoot"]));

    let summary = scene.cache.request_layer_muting(&["sub.sdf"], &[]).unwrap();
    assert_eq!(summary.significant, vec![Path::absolute_root()]);
    assert!(summary.used_layers_changed);
    assert!(scene.cache.is_layer_muted("sub.sdf"));
    assert!(!scene.cache.is_layer_used(sub.id()));
    assert_eq!(scene.child_names("/World"), names(&["FromRoot"]));
    assert_eq!(scene.prim_stack_len("/World"), 1);

    // Muting again is a no-op.
    let summary = scene.cache.request_layer_muting(&["sub.sdf"], &[]).unwrap();
    assert!(summary.is_empty());

    let summary = scene.cache.request_layer_muting(&[], &["sub.sdf"]).unwrap();
    assert_eq!(summary.significant, vec![Path::absolute_root()]);
    assert!(scene.cache.muted_layers().is_empty());
    assert_eq!(scene.child_names("/World"), unmuted);
    assert_eq!(scene.prim_stack_len("/World"), 2);
}

#[test]
fn cache_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<CompositionCache>();

    let scene = Scene::new(|_, root| {
        root.create_prim_spec(&p("/World/A"), Specifier::Def).unwrap();
        root.create_prim_spec(&p("/World/B"), Specifier::Def).unwrap();
    });
    std::thread::scope(|s| {
        for path in ["/World/A", "/World/B"] {
            let cache = &scene.cache;
            s.spawn(move || {
                cache.compute_prim_index(&p(path)).unwrap();
            });
        }
    });
    assert!(scene.cached("/World/A"));
    assert!(scene.cached("/World/B"));
}
