//! cache::dependencies
//!
//! Reverse map from consulted sites to the cached results that read them.
//!
//! # Architecture
//!
//! Every node of a cached prim index names a site, a path in one layer
//! stack. [`Dependencies`] records, per `(layer stack, site)`, which index
//! paths consulted it and how the site's namespace maps into the index's.
//! The change processor asks it which results an edit at some site can
//! reach.
//!
//! The index owns the strong references to the layer stacks it names. When
//! the last result using a stack is removed, [`Dependencies::remove`] hands
//! the stack back so the caller can park it until its change scope closes.
//!
//! # Invariants
//!
//! - Every recorded index path is a cached prim index
//! - A stack is held iff at least one recorded index names it

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::index::PrimIndex;
use super::layer_stack::LayerStack;
use crate::core::graph::MapFunction;
use crate::core::types::{LayerStackId, Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// The site contributes opinions.
    Direct,
    /// The site was consulted but contributes nothing yet (culled nodes,
    /// unresolved default prims).
    Virtual,
}

#[derive(Debug, Clone)]
pub struct Dependency {
    pub index_path: Path,
    /// Maps the site's namespace into the index's.
    pub map_to_root: MapFunction,
    pub kind: DependencyKind,
}

/// One result reached from a queried site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SiteDependent {
    pub index_path: Path,
    pub stack: LayerStackId,
    /// The site the dependency was recorded at, or the queried path when
    /// the result was reached through an ancestor.
    pub site: Path,
}

/// How far a dependency query reaches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyQuery {
    /// Include results depending on sites below the queried path.
    pub recurse_on_site: bool,
    /// Include cached results below every result found.
    pub recurse_on_index: bool,
    /// Only report results that are cached; skips the ancestor fallback.
    pub filter_for_existing: bool,
}

impl DependencyQuery {
    pub fn exact() -> Self {
        Self {
            filter_for_existing: true,
            ..Self::default()
        }
    }

    pub fn subtree() -> Self {
        Self {
            recurse_on_site: true,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct StackUse {
    stack: Arc<LayerStack>,
    users: BTreeSet<Path>,
}

#[derive(Debug, Default)]
pub struct Dependencies {
    sites: HashMap<LayerStackId, BTreeMap<Path, Vec<Dependency>>>,
    by_index: BTreeMap<Path, Vec<(LayerStackId, Path)>>,
    stacks: HashMap<LayerStackId, StackUse>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sites consulted by `index`.
    ///
    /// `stacks` must hold every layer stack named by the index's nodes and
    /// by `virtual_sites`.
    pub fn add(
        &mut self,
        index: &PrimIndex,
        virtual_sites: &[(LayerStackId, Path)],
        stacks: &HashMap<LayerStackId, Arc<LayerStack>>,
    ) {
        let index_path = index.path().clone();
        let mut records: Vec<(LayerStackId, Path, Dependency)> = Vec::new();
        for node in index.graph().nodes() {
            let (site, map_to_root, kind) = if node.placeholder {
                (Path::absolute_root(), MapFunction::identity(), DependencyKind::Virtual)
            } else if node.culled {
                (node.site.clone(), node.map_to_root.clone(), DependencyKind::Virtual)
            } else {
                (node.site.clone(), node.map_to_root.clone(), DependencyKind::Direct)
            };
            records.push((
                node.layer_stack.clone(),
                site,
                Dependency {
                    index_path: index_path.clone(),
                    map_to_root,
                    kind,
                },
            ));
        }
        for (stack, site) in virtual_sites {
            records.push((
                stack.clone(),
                site.clone(),
                Dependency {
                    index_path: index_path.clone(),
                    map_to_root: MapFunction::identity(),
                    kind: DependencyKind::Virtual,
                },
            ));
        }

        self.remove(&index_path);
        let mut keys = Vec::with_capacity(records.len());
        for (stack_id, site, dependency) in records {
            if let Some(stack) = stacks.get(&stack_id) {
                self.stacks
                    .entry(stack_id.clone())
                    .or_insert_with(|| StackUse {
                        stack: stack.clone(),
                        users: BTreeSet::new(),
                    })
                    .users
                    .insert(index_path.clone());
            }
            self.sites
                .entry(stack_id.clone())
                .or_default()
                .entry(site.clone())
                .or_default()
                .push(dependency);
            keys.push((stack_id, site));
        }
        self.by_index.insert(index_path, keys);
    }

    /// Forget `index_path`, returning the stacks nothing uses any more.
    pub fn remove(&mut self, index_path: &Path) -> Vec<Arc<LayerStack>> {
        let Some(keys) = self.by_index.remove(index_path) else {
            return Vec::new();
        };
        let mut released = Vec::new();
        for (stack_id, site) in keys {
            if let Some(sites) = self.sites.get_mut(&stack_id) {
                if let Some(entries) = sites.get_mut(&site) {
                    entries.retain(|d| d.index_path != *index_path);
                    if entries.is_empty() {
                        sites.remove(&site);
                    }
                }
                if sites.is_empty() {
                    self.sites.remove(&stack_id);
                }
            }
            let unused = match self.stacks.get_mut(&stack_id) {
                Some(stack_use) => {
                    stack_use.users.remove(index_path);
                    stack_use.users.is_empty()
                }
                None => false,
            };
            if unused {
                if let Some(stack_use) = self.stacks.remove(&stack_id) {
                    released.push(stack_use.stack);
                }
            }
        }
        released
    }

    /// Forget everything, returning every held stack.
    pub fn clear(&mut self) -> Vec<Arc<LayerStack>> {
        self.sites.clear();
        self.by_index.clear();
        self.stacks.drain().map(|(_, u)| u.stack).collect()
    }

    pub fn contains(&self, index_path: &Path) -> bool {
        self.by_index.contains_key(index_path)
    }

    /// Recorded index paths at or below `path`.
    pub fn index_paths_under<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a Path> + 'a {
        self.by_index
            .range(path.clone()..)
            .map(|(p, _)| p)
            .take_while(move |p| p.has_prefix(path))
    }

    pub fn uses_layer_stack(&self, id: &LayerStackId) -> bool {
        self.stacks.contains_key(id)
    }

    pub fn layer_stacks(&self) -> Vec<Arc<LayerStack>> {
        self.stacks.values().map(|u| u.stack.clone()).collect()
    }

    /// Results that depend on `path` in `stack`.
    pub fn find_site_dependents(&self, stack: &LayerStackId, path: &Path, query: DependencyQuery) -> Vec<SiteDependent> {
        let mut found = BTreeSet::new();
        if let Some(sites) = self.sites.get(stack) {
            let mut visit = |site: &Path, entries: &Vec<Dependency>| {
                for dependency in entries {
                    found.insert(SiteDependent {
                        index_path: dependency.index_path.clone(),
                        stack: stack.clone(),
                        site: site.clone(),
                    });
                }
            };
            if query.recurse_on_site {
                for (site, entries) in sites
                    .range(path.clone()..)
                    .take_while(|(site, _)| site.has_prefix(path))
                {
                    visit(site, entries);
                }
            } else if let Some(entries) = sites.get(path) {
                visit(path, entries);
            }

            if !query.filter_for_existing && path.is_prim_path() {
                for ancestor in path.prefixes() {
                    let Some(entries) = sites.get(&ancestor) else {
                        continue;
                    };
                    for dependency in entries {
                        let mapped = dependency
                            .map_to_root
                            .map_source_to_target(path)
                            .map(|p| p.strip_all_variant_selections());
                        if let Some(index_path) = mapped.filter(Path::is_prim_path) {
                            found.insert(SiteDependent {
                                index_path,
                                stack: stack.clone(),
                                site: path.clone(),
                            });
                        }
                    }
                }
            }
        }

        if query.recurse_on_index {
            let roots: Vec<SiteDependent> = found.iter().cloned().collect();
            for dependent in roots {
                for index_path in self.index_paths_under(&dependent.index_path) {
                    found.insert(SiteDependent {
                        index_path: index_path.clone(),
                        ..dependent.clone()
                    });
                }
            }
        }
        found.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::layer_stack::LayerStackData;
    use crate::core::graph::{ArcKind, Node, NodeGraph};
    use crate::core::layer::{LayerHandle, LayerRegistry, Specifier};
    use crate::core::types::LayerOffset;

    fn p(s: &str) -> Path {
        Path::new(s).unwrap()
    }

    struct Fixture {
        _registry: Arc<LayerRegistry>,
        _layers: Vec<LayerHandle>,
        root: Arc<LayerStack>,
        model: Arc<LayerStack>,
        stacks: HashMap<LayerStackId, Arc<LayerStack>>,
    }

    fn fixture() -> Fixture {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let model = registry.create("model.sdf").unwrap();
        root.create_prim_spec(&p("/World/Chair"), Specifier::Def).unwrap();
        model.create_prim_spec(&p("/Model/Leg"), Specifier::Def).unwrap();
        let build = |id: LayerStackId| {
            let data = LayerStackData::build(&id, &registry, &BTreeSet::new(), 24.0);
            Arc::new(LayerStack::new(id, data))
        };
        let root_stack = build(LayerStackId::new(root.id().clone()));
        let model_stack = build(LayerStackId::new(model.id().clone()));
        let stacks = HashMap::from([
            (root_stack.id().clone(), root_stack.clone()),
            (model_stack.id().clone(), model_stack.clone()),
        ]);
        Fixture {
            _registry: registry,
            _layers: vec![root, model],
            root: root_stack,
            model: model_stack,
            stacks,
        }
    }

    fn chair_index(fx: &Fixture) -> PrimIndex {
        let mut graph = NodeGraph::new(Node::root(fx.root.id().clone(), p("/World/Chair")));
        let map = MapFunction::new(vec![(p("/Model"), p("/World/Chair"))], LayerOffset::identity());
        graph.add_child(0, Node::for_arc(ArcKind::Reference, fx.model.id().clone(), p("/Model"), map));
        PrimIndex::new(p("/World/Chair"), graph, Vec::new(), &fx.stacks, false)
    }

    fn world_index(fx: &Fixture) -> PrimIndex {
        let graph = NodeGraph::new(Node::root(fx.root.id().clone(), p("/World")));
        PrimIndex::new(p("/World"), graph, Vec::new(), &fx.stacks, false)
    }

    #[test]
    fn exact_and_subtree_queries() {
        let fx = fixture();
        let mut deps = Dependencies::new();
        deps.add(&world_index(&fx), &[], &fx.stacks);
        deps.add(&chair_index(&fx), &[], &fx.stacks);

        let exact = deps.find_site_dependents(fx.model.id(), &p("/Model"), DependencyQuery::exact());
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].index_path, p("/World/Chair"));

        let subtree = deps.find_site_dependents(fx.root.id(), &p("/World"), DependencyQuery::subtree());
        let paths: Vec<Path> = subtree.into_iter().map(|d| d.index_path).collect();
        assert_eq!(paths, vec![p("/World"), p("/World/Chair")]);
    }

    #[test]
    fn ancestor_fallback_maps_into_index_namespace() {
        let fx = fixture();
        let mut deps = Dependencies::new();
        deps.add(&chair_index(&fx), &[], &fx.stacks);

        let found = deps.find_site_dependents(fx.model.id(), &p("/Model/Arm"), DependencyQuery::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index_path, p("/World/Chair/Arm"));

        let filtered = deps.find_site_dependents(fx.model.id(), &p("/Model/Arm"), DependencyQuery::exact());
        assert!(filtered.is_empty());
    }

    #[test]
    fn recurse_on_index_adds_cached_descendants() {
        let fx = fixture();
        let mut deps = Dependencies::new();
        deps.add(&world_index(&fx), &[], &fx.stacks);
        deps.add(&chair_index(&fx), &[], &fx.stacks);

        let query = DependencyQuery {
            recurse_on_index: true,
            filter_for_existing: true,
            ..DependencyQuery::default()
        };
        let found = deps.find_site_dependents(fx.root.id(), &p("/World"), query);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn removing_last_user_releases_stack() {
        let fx = fixture();
        let mut deps = Dependencies::new();
        deps.add(&world_index(&fx), &[], &fx.stacks);
        deps.add(&chair_index(&fx), &[], &fx.stacks);
        assert!(deps.uses_layer_stack(fx.model.id()));

        let released = deps.remove(&p("/World/Chair"));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id(), fx.model.id());
        assert!(!deps.uses_layer_stack(fx.model.id()));
        assert!(deps.uses_layer_stack(fx.root.id()));

        assert_eq!(deps.clear().len(), 1);
        assert!(!deps.contains(&p("/World")));
    }

    #[test]
    fn virtual_sites_are_recorded() {
        let fx = fixture();
        let mut deps = Dependencies::new();
        deps.add(
            &world_index(&fx),
            &[(fx.model.id().clone(), Path::absolute_root())],
            &fx.stacks,
        );
        let found = deps.find_site_dependents(fx.model.id(), &Path::absolute_root(), DependencyQuery::exact());
        assert_eq!(found[0].index_path, p("/World"));
    }
}
