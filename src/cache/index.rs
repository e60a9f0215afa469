//! cache::index
//!
//! Composed results: prim indexes and property indexes.
//!
//! # Architecture
//!
//! A [`PrimIndex`] pairs the arc [`NodeGraph`] built by a resolver with the
//! data derived from it: which nodes carry specs, which are culled, the
//! strength-ordered prim stack and the instanceable flag. The derived data
//! can be refreshed in place when only spec content changed (a spec change);
//! the graph itself is never edited after resolution.
//!
//! An index refers to the layer stacks of its nodes through weak references.
//! The dependency index owns the strong ones, so a cached index always sees
//! live stacks while a stale copy held by a caller degrades to "no specs".
//!
//! # Invariants
//!
//! - The root node is never culled
//! - A node is culled iff neither it nor any descendant has specs
//! - Sites relocated away in their own stack contribute no opinions

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use super::errors::CompositionError;
use super::layer_stack::LayerStack;
use crate::core::graph::{Node, NodeGraph, NodeIndex};
use crate::core::types::{LayerId, LayerStackId, Path};

/// The composed result for one prim path.
#[derive(Debug, Clone)]
pub struct PrimIndex {
    path: Path,
    graph: NodeGraph,
    prim_stack: Vec<(LayerId, Path)>,
    errors: Vec<CompositionError>,
    instanceable: bool,
    instancing: bool,
    layer_stacks: HashMap<LayerStackId, Weak<LayerStack>>,
}

impl PrimIndex {
    /// Wrap a resolved graph and derive its spec data.
    pub fn new(
        path: Path,
        graph: NodeGraph,
        errors: Vec<CompositionError>,
        stacks: &HashMap<LayerStackId, Arc<LayerStack>>,
        instancing: bool,
    ) -> Self {
        let layer_stacks = graph
            .nodes()
            .iter()
            .filter_map(|n| {
                stacks
                    .get(&n.layer_stack)
                    .map(|s| (n.layer_stack.clone(), Arc::downgrade(s)))
            })
            .collect();
        let mut index = Self {
            path,
            graph,
            prim_stack: Vec::new(),
            errors,
            instanceable: false,
            instancing,
            layer_stacks,
        };
        index.refresh_specs();
        index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn root_node(&self) -> &Node {
        self.graph.root()
    }

    /// `(layer, site)` of every contributing prim spec, strongest first.
    pub fn prim_stack(&self) -> &[(LayerId, Path)] {
        &self.prim_stack
    }

    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    pub fn is_instanceable(&self) -> bool {
        self.instanceable
    }

    pub fn has_specs(&self) -> bool {
        !self.prim_stack.is_empty()
    }

    pub fn layer_stack(&self, id: &LayerStackId) -> Option<Arc<LayerStack>> {
        self.layer_stacks.get(id).and_then(Weak::upgrade)
    }

    /// Every layer stack referenced by a node.
    pub fn layer_stack_ids(&self) -> impl Iterator<Item = &LayerStackId> {
        self.layer_stacks.keys()
    }

    /// True if the node's site currently has opinions in its stack.
    pub fn node_has_specs_now(&self, index: NodeIndex) -> bool {
        let node = self.graph.node(index);
        if node.placeholder {
            return false;
        }
        let Some(stack) = self.layer_stack(&node.layer_stack) else {
            return false;
        };
        let relocated_away = stack.relocations().relocated_away(&node.site).is_some();
        !relocated_away && stack.has_spec_at(&node.site)
    }

    /// True if any node currently has opinions, reading the layers as they
    /// are now rather than as they were when the index was built.
    pub fn any_specs_now(&self) -> bool {
        (0..self.graph.len()).any(|i| self.node_has_specs_now(i))
    }

    /// Recompute spec flags, culling, the prim stack and instanceable.
    pub fn refresh_specs(&mut self) {
        let has_specs: Vec<bool> = (0..self.graph.len()).map(|i| self.node_has_specs_now(i)).collect();

        // Children always follow their parent in storage order.
        let mut subtree = has_specs.clone();
        for index in (1..self.graph.len()).rev() {
            if subtree[index] {
                if let Some(parent) = self.graph.node(index).parent {
                    subtree[parent] = true;
                }
            }
        }
        for (index, specs) in has_specs.iter().enumerate() {
            let node = self.graph.node_mut(index);
            node.has_specs = *specs;
            node.culled = index != 0 && !subtree[index];
        }

        let mut prim_stack = Vec::new();
        let mut instanceable = None;
        for index in self.graph.strength_order() {
            let node = self.graph.node(index);
            if !node.contributes() || !node.has_specs {
                continue;
            }
            let Some(stack) = self.layer_stack(&node.layer_stack) else {
                continue;
            };
            for (layer, spec) in stack.prim_specs_at(&node.site) {
                if instanceable.is_none() {
                    instanceable = spec.instanceable;
                }
                prim_stack.push((layer, node.site.clone()));
            }
        }
        self.prim_stack = prim_stack;
        self.instanceable = self.instancing && instanceable.unwrap_or(false);
    }

    /// The node at `site` in `layer_stack`, if any.
    pub fn node_providing_spec(&self, layer_stack: &LayerStackId, site: &Path) -> Option<NodeIndex> {
        self.graph.find_node(layer_stack, site)
    }

    /// True if the node's opinions feed an instance of this index: it is
    /// neither in the root layer stack nor inherited from the namespace
    /// parent.
    pub fn is_instance_relevant(&self, index: NodeIndex) -> bool {
        let node = self.graph.node(index);
        !node.ancestral && node.layer_stack != self.graph.root().layer_stack
    }

    /// Composed child prim names and the names prohibited by relocation.
    ///
    /// Nodes are visited weakest first and the first occurrence of a name
    /// fixes its position.
    pub fn compute_prim_child_names(&self) -> (Vec<String>, BTreeSet<String>) {
        let mut names: Vec<String> = Vec::new();
        let mut prohibited = BTreeSet::new();
        fn push(names: &mut Vec<String>, name: String) {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        for index in self.graph.strength_order().into_iter().rev() {
            let node = self.graph.node(index);
            if node.placeholder || (self.instanceable && !self.is_instance_relevant(index)) {
                continue;
            }
            let Some(stack) = self.layer_stack(&node.layer_stack) else {
                continue;
            };
            let relocations = stack.relocations().clone();
            if !node.culled && relocations.relocated_away(&node.site).is_none() {
                for layer in stack.layers().iter().rev() {
                    for name in layer.child_names(&node.site) {
                        push(&mut names, name);
                    }
                }
            }
            for (source, target) in relocations.incremental_source_to_target() {
                if source.parent().as_ref() == Some(&node.site) {
                    if let Some(name) = source.name() {
                        prohibited.insert(name);
                    }
                }
                if !target.is_empty() && target.parent().as_ref() == Some(&node.site) {
                    if let Some(name) = target.name() {
                        push(&mut names, name);
                    }
                }
            }
        }
        names.retain(|n| !prohibited.contains(n));
        (names, prohibited)
    }

    /// Property stack for `name` on this prim, strongest first.
    pub fn property_stack(&self, name: &str) -> Vec<(LayerId, Path)> {
        let mut stack = Vec::new();
        for index in self.graph.strength_order() {
            let node = self.graph.node(index);
            if !node.contributes() || !node.has_specs {
                continue;
            }
            let (Some(layer_stack), Ok(site)) = (self.layer_stack(&node.layer_stack), node.site.append_property(name))
            else {
                continue;
            };
            for layer in layer_stack.layers() {
                if layer.property_spec(&site).is_some() {
                    stack.push((layer.id().clone(), site.clone()));
                }
            }
        }
        stack
    }
}

/// The composed result for one property path.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyIndex {
    path: Path,
    property_stack: Vec<(LayerId, Path)>,
}

impl PropertyIndex {
    /// Gather the property stack for `path` from its owning prim's index.
    pub fn build(path: Path, prim_index: &PrimIndex) -> Self {
        let property_stack = path
            .name()
            .map(|name| prim_index.property_stack(&name))
            .unwrap_or_default();
        Self { path, property_stack }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn property_stack(&self) -> &[(LayerId, Path)] {
        &self.property_stack
    }

    pub fn is_empty(&self) -> bool {
        self.property_stack.is_empty()
    }
}
