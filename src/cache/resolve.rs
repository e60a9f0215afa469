//! cache::resolve
//!
//! The "resolve one path" primitive behind the cache.
//!
//! # Architecture
//!
//! [`PrimIndexResolver`] is the seam between the cache and composition
//! proper. The cache hands it a [`ResolveContext`] (layer registry, config,
//! the layer stacks it already knows) plus the parent prim's index, and gets
//! back a node graph, the composition errors found on the way and any extra
//! sites the result should be invalidated by.
//!
//! [`StandardResolver`] builds the graph in three steps:
//!
//! 1. **Ancestral**: the parent index's nodes are carried over to the child
//!    name. Nodes whose new site is relocated away in their stack are
//!    dropped together with their subtrees, except inside a relocate arc.
//! 2. **Direct arcs**: every node is expanded in turn; inherits, relocates,
//!    references, payloads and specializes authored at its site add child
//!    nodes. A reference to a non-root prim grafts the target's own site
//!    graph, so the target's ancestral arcs come along.
//! 3. **Variants**: once no direct arc is pending, variant sets are expanded
//!    using the strongest selection found anywhere in the graph. New variant
//!    nodes go back to step 2.
//!
//! # Invariants
//!
//! - A site never appears twice on one arc chain
//! - Arc chains never exceed `max_arc_depth`
//! - Opinions at a relocation source never contribute arcs

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::errors::CompositionError;
use super::index::PrimIndex;
use super::layer_stack::{LayerStack, LayerStackData};
use crate::core::config::CacheConfig;
use crate::core::graph::{ArcKind, MapFunction, Node, NodeGraph, NodeIndex};
use crate::core::layer::{LayerRegistry, Reference};
use crate::core::types::{is_valid_identifier, LayerId, LayerOffset, LayerStackId, Path};

/// What a resolver produces for one prim path.
#[derive(Debug)]
pub struct Resolved {
    pub graph: NodeGraph,
    pub errors: Vec<CompositionError>,
    /// Sites consulted without producing a node, e.g. the pseudo-root of a
    /// stack whose default prim was missing.
    pub virtual_sites: Vec<(LayerStackId, Path)>,
}

/// Resolves the composed graph of one prim path.
pub trait PrimIndexResolver: Send + Sync {
    /// Build the graph for `path`; `parent` is the index of `path`'s parent
    /// prim and is `None` only for root prims.
    fn resolve(&self, ctx: &mut ResolveContext<'_>, path: &Path, parent: Option<&PrimIndex>) -> Resolved;
}

/// Cache state a resolver may read, plus the layer stacks it touched.
pub struct ResolveContext<'a> {
    registry: &'a LayerRegistry,
    config: &'a CacheConfig,
    muted: &'a BTreeSet<String>,
    known: &'a mut HashMap<LayerStackId, Weak<LayerStack>>,
    root: Arc<LayerStack>,
    held: HashMap<LayerStackId, Arc<LayerStack>>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(
        registry: &'a LayerRegistry,
        config: &'a CacheConfig,
        muted: &'a BTreeSet<String>,
        known: &'a mut HashMap<LayerStackId, Weak<LayerStack>>,
        root: Arc<LayerStack>,
    ) -> Self {
        let held = HashMap::from([(root.id().clone(), root.clone())]);
        Self {
            registry,
            config,
            muted,
            known,
            root,
            held,
        }
    }

    pub fn registry(&self) -> &LayerRegistry {
        self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        self.config
    }

    pub fn root_stack(&self) -> &Arc<LayerStack> {
        &self.root
    }

    /// The live stack for `id`, building it if nobody holds one.
    ///
    /// Returns the stack and whether it was built by this call.
    pub fn layer_stack(&mut self, id: &LayerStackId) -> (Arc<LayerStack>, bool) {
        if let Some(stack) = self.held.get(id) {
            return (stack.clone(), false);
        }
        if let Some(stack) = self.known.get(id).and_then(Weak::upgrade) {
            self.held.insert(id.clone(), stack.clone());
            return (stack, false);
        }
        let data = LayerStackData::build(id, self.registry, self.muted, self.config.fallback_tcps);
        let stack = Arc::new(LayerStack::new(id.clone(), data));
        debug!(stack = %id, "computed layer stack");
        self.known.insert(id.clone(), Arc::downgrade(&stack));
        self.held.insert(id.clone(), stack.clone());
        (stack, true)
    }

    /// Every stack used since the context was created.
    pub fn held_stacks(&self) -> &HashMap<LayerStackId, Arc<LayerStack>> {
        &self.held
    }
}

/// The built-in resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardResolver;

impl PrimIndexResolver for StandardResolver {
    fn resolve(&self, ctx: &mut ResolveContext<'_>, path: &Path, parent: Option<&PrimIndex>) -> Resolved {
        let mut run = Resolution {
            ctx,
            errors: Vec::new(),
            virtual_sites: Vec::new(),
            site_graphs: HashMap::new(),
            in_progress: HashSet::new(),
        };
        let graph = run.index_graph(path, parent);
        for error in &run.errors {
            warn!(path = %path, "{error}");
        }
        Resolved {
            graph,
            errors: run.errors,
            virtual_sites: run.virtual_sites,
        }
    }
}

struct Resolution<'r, 'a> {
    ctx: &'r mut ResolveContext<'a>,
    errors: Vec<CompositionError>,
    virtual_sites: Vec<(LayerStackId, Path)>,
    site_graphs: HashMap<(LayerStackId, Path), NodeGraph>,
    in_progress: HashSet<(LayerStackId, Path)>,
}

impl Resolution<'_, '_> {
    fn stack(&mut self, id: &LayerStackId) -> Arc<LayerStack> {
        let (stack, built) = self.ctx.layer_stack(id);
        if built {
            self.errors.extend(stack.local_errors());
        }
        stack
    }

    fn index_graph(&mut self, path: &Path, parent: Option<&PrimIndex>) -> NodeGraph {
        let root = self.ctx.root_stack().clone();
        let root_id = root.id().clone();

        let relocated_away = root.relocations().relocated_away(path).is_some();
        if relocated_away {
            for layer in root.layers_with_spec(path) {
                self.errors.push(CompositionError::OpinionAtRelocationSource {
                    layer,
                    path: path.clone(),
                });
            }
            return NodeGraph::new(Node::root(root_id, path.clone()));
        }

        let mut graph = match parent {
            Some(parent) => self.map_to_child(parent.graph(), path, true),
            None => NodeGraph::new(Node::root(root_id, path.clone())),
        };
        self.expand(&mut graph);
        graph
    }

    /// Graph of `site` in `stack` on its own, used for grafting.
    fn site_graph(&mut self, stack: &LayerStackId, site: &Path) -> NodeGraph {
        let key = (stack.clone(), site.clone());
        if let Some(graph) = self.site_graphs.get(&key) {
            return graph.clone();
        }
        if !self.in_progress.insert(key.clone()) {
            self.errors.push(CompositionError::ArcCycle {
                layer_stack: stack.clone(),
                site: site.clone(),
            });
            return NodeGraph::new(Node::root(stack.clone(), site.clone()));
        }

        let mut graph = match site.parent() {
            Some(parent) if !parent.is_absolute_root() && parent.is_prim_or_variant_path() => {
                let parent_graph = self.site_graph(stack, &parent);
                self.map_to_child(&parent_graph, site, false)
            }
            _ => NodeGraph::new(Node::root(stack.clone(), site.clone())),
        };
        self.expand(&mut graph);

        self.in_progress.remove(&key);
        self.site_graphs.insert(key, graph.clone());
        graph
    }

    /// Carry `parent`'s nodes over to `child`, the parent's path plus one
    /// element.
    fn map_to_child(&mut self, parent: &NodeGraph, child: &Path, ancestral: bool) -> NodeGraph {
        let mut graph = NodeGraph::new(Node::root(parent.root().layer_stack.clone(), child.clone()));
        let Some(element) = child.elements().last().cloned() else {
            return graph;
        };

        let mut mapped: Vec<Option<NodeIndex>> = vec![None; parent.len()];
        mapped[0] = Some(0);
        for index in parent.strength_order().into_iter().skip(1) {
            let node = parent.node(index);
            let Some(new_parent) = node.parent.and_then(|p| mapped[p]) else {
                continue;
            };
            if node.placeholder {
                continue;
            }
            let site = node.site.append_element(&element);
            let under_relocate = parent
                .ancestry(index)
                .into_iter()
                .any(|i| parent.node(i).arc == ArcKind::Relocate);
            if !under_relocate {
                let stack = self.stack(&node.layer_stack);
                let moved = stack.relocations().relocated_away(&site).is_some();
                if moved {
                    continue;
                }
            }
            let mut copy = Node::for_arc(node.arc, node.layer_stack.clone(), site, node.map_to_parent.clone());
            copy.ancestral = ancestral || node.ancestral;
            mapped[index] = Some(graph.add_child(new_parent, copy));
        }
        graph
    }

    fn expand(&mut self, graph: &mut NodeGraph) {
        let mut pending: VecDeque<NodeIndex> = graph.strength_order().into();
        let mut variants_done = HashSet::new();
        loop {
            while let Some(index) = pending.pop_front() {
                self.add_direct_arcs(graph, index, &mut pending);
            }
            for index in graph.strength_order() {
                if variants_done.insert(index) {
                    self.add_variant_arcs(graph, index, &mut pending);
                }
            }
            if pending.is_empty() {
                break;
            }
        }
    }

    /// The node's stack, unless the node cannot carry arcs.
    fn expandable(&mut self, graph: &NodeGraph, index: NodeIndex) -> Option<Arc<LayerStack>> {
        let node = graph.node(index);
        if node.placeholder {
            return None;
        }
        let stack = self.stack(&node.layer_stack);
        let moved = stack.relocations().relocated_away(&node.site).is_some();
        (!moved).then_some(stack)
    }

    fn add_direct_arcs(&mut self, graph: &mut NodeGraph, index: NodeIndex, pending: &mut VecDeque<NodeIndex>) {
        let Some(stack) = self.expandable(graph, index) else {
            return;
        };
        let site = graph.node(index).site.clone();
        let specs = stack.prim_specs_at(&site);

        let mut inherits: Vec<Path> = Vec::new();
        let mut specializes: Vec<Path> = Vec::new();
        let mut references: Vec<(LayerId, Reference)> = Vec::new();
        let mut payloads: Vec<(LayerId, Reference)> = Vec::new();
        for (layer, spec) in &specs {
            for path in &spec.inherits {
                if !inherits.contains(path) {
                    inherits.push(path.clone());
                }
            }
            for path in &spec.specializes {
                if !specializes.contains(path) {
                    specializes.push(path.clone());
                }
            }
            for reference in &spec.references {
                if !references.iter().any(|(_, r)| r == reference) {
                    references.push((layer.clone(), reference.clone()));
                }
            }
            for payload in &spec.payloads {
                if !payloads.iter().any(|(_, r)| r == payload) {
                    payloads.push((layer.clone(), payload.clone()));
                }
            }
        }

        for class in inherits {
            self.add_class_arc(graph, index, ArcKind::Inherit, class, pending);
        }
        self.add_relocate_arc(graph, index, &stack);
        for (layer, reference) in references {
            self.add_reference_arc(graph, index, &stack, &layer, &reference, ArcKind::Reference, pending);
        }
        for (layer, payload) in payloads {
            self.add_reference_arc(graph, index, &stack, &layer, &payload, ArcKind::Payload, pending);
        }
        for base in specializes {
            self.add_class_arc(graph, index, ArcKind::Specialize, base, pending);
        }
    }

    fn check_chain(&mut self, graph: &NodeGraph, index: NodeIndex, stack: &LayerStackId, site: &Path) -> bool {
        let too_deep = graph.node(index).arc_depth + 1 > self.ctx.config().max_arc_depth;
        if too_deep || graph.site_on_chain(index, stack, site) {
            self.errors.push(CompositionError::ArcCycle {
                layer_stack: stack.clone(),
                site: site.clone(),
            });
            return false;
        }
        true
    }

    fn add_class_arc(
        &mut self,
        graph: &mut NodeGraph,
        index: NodeIndex,
        arc: ArcKind,
        class: Path,
        pending: &mut VecDeque<NodeIndex>,
    ) {
        if !class.is_absolute() || !class.is_prim_path() {
            return;
        }
        let node = graph.node(index);
        let (stack, site) = (node.layer_stack.clone(), node.site.clone());
        if !self.check_chain(graph, index, &stack, &class) {
            return;
        }
        let map = MapFunction::new(vec![(class.clone(), site)], LayerOffset::identity());
        let child = graph.add_child(index, Node::for_arc(arc, stack, class, map));
        pending.push_back(child);
    }

    fn add_relocate_arc(&mut self, graph: &mut NodeGraph, index: NodeIndex, stack: &Arc<LayerStack>) {
        let site = graph.node(index).site.clone();
        let source = stack.relocations().source_for_target(&site).cloned();
        let Some(source) = source else {
            return;
        };
        if !self.check_chain(graph, index, stack.id(), &source) {
            return;
        }
        for layer in stack.layers_with_spec(&source) {
            self.errors.push(CompositionError::OpinionAtRelocationSource {
                layer,
                path: source.clone(),
            });
        }
        let map = stack.relocations().map_function_for(&source);
        let sub = self.site_graph(stack.id(), &source);
        graft(graph, index, ArcKind::Relocate, &sub, map);
    }

    #[allow(clippy::too_many_arguments)]
    fn add_reference_arc(
        &mut self,
        graph: &mut NodeGraph,
        index: NodeIndex,
        stack: &Arc<LayerStack>,
        layer: &LayerId,
        reference: &Reference,
        arc: ArcKind,
        pending: &mut VecDeque<NodeIndex>,
    ) {
        let site = graph.node(index).site.clone();
        let target_id = if reference.is_internal() {
            stack.id().clone()
        } else {
            match self.ctx.registry().find_by_identifier(&reference.asset) {
                Some(found) => stack.id().for_asset(found.id().clone()),
                None => {
                    self.errors.push(CompositionError::UnresolvedReference {
                        layer: layer.clone(),
                        site,
                        asset: reference.asset.clone(),
                        prim_path: reference.prim_path.clone(),
                    });
                    return;
                }
            }
        };
        let target = self.stack(&target_id);

        let authoring_offset = stack.layer_offset(layer).unwrap_or_default();
        let authoring_tcps = stack.layer_tcps(layer).unwrap_or(self.ctx.config().fallback_tcps);
        let scale = authoring_tcps / target.time_codes_per_second();
        let offset = authoring_offset.compose(&reference.offset.scaled(scale));

        let prim_path = if reference.prim_path.is_empty() {
            let default_prim = target
                .root_layer()
                .and_then(|l| l.default_prim())
                .filter(|name| is_valid_identifier(name))
                .and_then(|name| Path::absolute_root().append_child(&name).ok());
            match default_prim {
                Some(path) => path,
                None => {
                    self.unresolved_prim_path(&site, reference, &target_id, &Path::absolute_root());
                    if !reference.is_internal() {
                        let map = MapFunction::new(Vec::new(), offset);
                        let mut placeholder =
                            Node::for_arc(arc, target_id, Path::absolute_root(), map);
                        placeholder.placeholder = true;
                        graph.add_child(index, placeholder);
                    }
                    return;
                }
            }
        } else {
            reference.prim_path.clone()
        };

        if !prim_path.is_absolute() || !prim_path.is_prim_path() || prim_path.is_absolute_root() {
            self.unresolved_prim_path(&site, reference, &target_id, &prim_path);
            return;
        }
        let relocated_into = target
            .relocations()
            .incremental_target_to_source()
            .keys()
            .any(|t| prim_path.has_prefix(t));
        if !target.has_spec_at(&prim_path) && !relocated_into {
            self.unresolved_prim_path(&site, reference, &target_id, &prim_path);
            return;
        }
        if !self.check_chain(graph, index, &target_id, &prim_path) {
            return;
        }

        let map = MapFunction::new(vec![(prim_path.clone(), site)], offset);
        if prim_path.is_root_prim_path() {
            let child = graph.add_child(index, Node::for_arc(arc, target_id, prim_path, map));
            pending.push_back(child);
        } else {
            let sub = self.site_graph(&target_id, &prim_path);
            graft(graph, index, arc, &sub, map);
        }
    }

    fn unresolved_prim_path(&mut self, site: &Path, reference: &Reference, target: &LayerStackId, consulted: &Path) {
        self.errors.push(CompositionError::UnresolvedPrimPath {
            site: site.clone(),
            asset: reference.asset.clone(),
            prim_path: reference.prim_path.clone(),
        });
        self.virtual_sites.push((target.clone(), consulted.clone()));
    }

    fn add_variant_arcs(&mut self, graph: &mut NodeGraph, index: NodeIndex, pending: &mut VecDeque<NodeIndex>) {
        let Some(stack) = self.expandable(graph, index) else {
            return;
        };
        let site = graph.node(index).site.clone();
        let mut sets: Vec<String> = Vec::new();
        for (_, spec) in stack.prim_specs_at(&site) {
            for set in spec.variant_sets {
                if !sets.contains(&set) {
                    sets.push(set);
                }
            }
        }

        for set in sets {
            let Some(selection) = self.variant_selection(graph, &set) else {
                continue;
            };
            let Ok(variant_site) = site.append_variant_selection(&set, &selection) else {
                continue;
            };
            if graph.find_node(stack.id(), &variant_site).is_some() {
                continue;
            }
            let map = MapFunction::new(vec![(variant_site.clone(), site.clone())], LayerOffset::identity());
            let child = graph.add_child(index, Node::for_arc(ArcKind::Variant, stack.id().clone(), variant_site, map));
            pending.push_back(child);
        }
    }

    /// Strongest selection for `set` authored at any node's site.
    fn variant_selection(&mut self, graph: &NodeGraph, set: &str) -> Option<String> {
        for index in graph.strength_order() {
            let node = graph.node(index);
            if node.placeholder {
                continue;
            }
            let stack = self.stack(&node.layer_stack);
            for (_, spec) in stack.prim_specs_at(&node.site) {
                if let Some(selection) = spec.variant_selections.get(set) {
                    return (!selection.is_empty()).then(|| selection.clone());
                }
            }
        }
        None
    }
}

/// Attach `sub` below `parent`: its root becomes an `arc` node mapped by
/// `map`, the rest keeps its shape. Grafted nodes are never ancestral.
fn graft(graph: &mut NodeGraph, parent: NodeIndex, arc: ArcKind, sub: &NodeGraph, map: MapFunction) -> NodeIndex {
    let root = sub.root();
    let top = graph.add_child(parent, Node::for_arc(arc, root.layer_stack.clone(), root.site.clone(), map));
    let mut mapped: Vec<Option<NodeIndex>> = vec![None; sub.len()];
    mapped[0] = Some(top);
    for index in sub.strength_order().into_iter().skip(1) {
        let node = sub.node(index);
        let Some(new_parent) = node.parent.and_then(|p| mapped[p]) else {
            continue;
        };
        let mut copy = Node::for_arc(node.arc, node.layer_stack.clone(), node.site.clone(), node.map_to_parent.clone());
        copy.placeholder = node.placeholder;
        mapped[index] = Some(graph.add_child(new_parent, copy));
    }
    top
}
