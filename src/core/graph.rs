//! core::graph
//!
//! Arc graph of one composed result.
//!
//! # Architecture
//!
//! A composed prim is assembled from a tree of nodes. Each node names a
//! site (a layer stack plus a path in that stack's namespace) and the arc
//! that introduced it. The root node is the prim's own site in the cache's
//! root layer stack; children are ordered strongest first.
//!
//! Every node carries a [`MapFunction`] translating paths in its namespace
//! into the root node's namespace, together with the time offset that
//! applies to opinions found at the node.
//!
//! # Invariants
//!
//! - Node 0 is the root node and has no parent
//! - A node's children are sorted by arc strength, then direct before
//!   ancestral, then insertion order
//! - Strength order is the pre-order traversal of the tree

use super::types::{LayerOffset, LayerStackId, Path};
use std::collections::VecDeque;
use std::fmt;

/// Kind of composition arc that introduced a node.
///
/// The set is closed; classification code matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArcKind {
    Root,
    Inherit,
    Variant,
    Relocate,
    Reference,
    Payload,
    Specialize,
}

impl ArcKind {
    /// Strength rank among sibling arcs (lower is stronger).
    pub fn strength_rank(self) -> u8 {
        match self {
            ArcKind::Root => 0,
            ArcKind::Inherit => 1,
            ArcKind::Variant => 2,
            ArcKind::Relocate => 3,
            ArcKind::Reference => 4,
            ArcKind::Payload => 5,
            ArcKind::Specialize => 6,
        }
    }

    /// True for arcs that cross into another layer stack's namespace.
    pub fn is_external(self) -> bool {
        matches!(self, ArcKind::Reference | ArcKind::Payload)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArcKind::Root => "root",
            ArcKind::Inherit => "inherit",
            ArcKind::Variant => "variant",
            ArcKind::Relocate => "relocate",
            ArcKind::Reference => "reference",
            ArcKind::Payload => "payload",
            ArcKind::Specialize => "specialize",
        }
    }
}

impl fmt::Display for ArcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace and time mapping from one site into another.
///
/// Paths map through the pair with the longest matching source prefix.
/// Paths outside every source have no image.
///
/// # Example
///
/// ```
/// use strata::core::graph::MapFunction;
/// use strata::core::types::{LayerOffset, Path};
///
/// let p = |s: &str| Path::new(s).unwrap();
/// let map = MapFunction::new(vec![(p("/Model"), p("/World/Chair"))], LayerOffset::identity());
/// assert_eq!(map.map_source_to_target(&p("/Model/Leg")), Some(p("/World/Chair/Leg")));
/// assert_eq!(map.map_source_to_target(&p("/Other")), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MapFunction {
    pairs: Vec<(Path, Path)>,
    time_offset: LayerOffset,
}

impl MapFunction {
    pub fn new(pairs: Vec<(Path, Path)>, time_offset: LayerOffset) -> Self {
        Self { pairs, time_offset }
    }

    /// Maps every absolute path to itself.
    pub fn identity() -> Self {
        Self::new(
            vec![(Path::absolute_root(), Path::absolute_root())],
            LayerOffset::identity(),
        )
    }

    pub fn is_identity(&self) -> bool {
        self.time_offset.is_identity() && self.pairs.iter().all(|(s, t)| s == t)
    }

    pub fn pairs(&self) -> &[(Path, Path)] {
        &self.pairs
    }

    pub fn time_offset(&self) -> LayerOffset {
        self.time_offset
    }

    /// Extend the mapping with an extra pair.
    pub fn with_pair(mut self, source: Path, target: Path) -> Self {
        self.pairs.push((source, target));
        self
    }

    fn best_pair<'a>(pairs: impl Iterator<Item = &'a (Path, Path)>, path: &Path, by_target: bool) -> Option<&'a (Path, Path)> {
        pairs
            .filter(|(s, t)| path.has_prefix(if by_target { t } else { s }))
            .max_by_key(|(s, t)| if by_target { t.depth() } else { s.depth() })
    }

    /// Map a path from the source namespace into the target namespace.
    pub fn map_source_to_target(&self, path: &Path) -> Option<Path> {
        let (source, target) = Self::best_pair(self.pairs.iter(), path, false)?;
        path.replace_prefix(source, target)
    }

    /// Map a path from the target namespace back into the source namespace.
    pub fn map_target_to_source(&self, path: &Path) -> Option<Path> {
        let (source, target) = Self::best_pair(self.pairs.iter(), path, true)?;
        path.replace_prefix(target, source)
    }

    /// `self ∘ inner`: map through `inner`, then through `self`.
    ///
    /// Only the domain of `inner` survives; pairs of `self` that `inner`
    /// never reaches are dropped.
    pub fn compose(&self, inner: &MapFunction) -> MapFunction {
        let pairs = inner
            .pairs
            .iter()
            .filter_map(|(s, t)| self.map_source_to_target(t).map(|mapped| (s.clone(), mapped)))
            .collect();
        MapFunction::new(pairs, self.time_offset.compose(&inner.time_offset))
    }
}

impl Default for MapFunction {
    fn default() -> Self {
        Self::identity()
    }
}

/// Index of a node within its [`NodeGraph`].
pub type NodeIndex = usize;

/// One site contributing to a composed result.
#[derive(Debug, Clone)]
pub struct Node {
    pub arc: ArcKind,
    pub layer_stack: LayerStackId,
    pub site: Path,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    pub map_to_parent: MapFunction,
    pub map_to_root: MapFunction,
    /// Inherited from the namespace parent's composed result.
    pub ancestral: bool,
    /// Any layer of the node's stack has a spec at the site.
    pub has_specs: bool,
    /// Contributes no opinions; kept so the site stays a dependency.
    pub culled: bool,
    /// Stand-in for an unresolved default-prim reference target.
    pub placeholder: bool,
    /// Number of arcs between the root node and this node.
    pub arc_depth: usize,
}

impl Node {
    /// The root node for `site` in `layer_stack`.
    pub fn root(layer_stack: LayerStackId, site: Path) -> Self {
        Self {
            arc: ArcKind::Root,
            layer_stack,
            site,
            parent: None,
            children: Vec::new(),
            map_to_parent: MapFunction::identity(),
            map_to_root: MapFunction::identity(),
            ancestral: false,
            has_specs: false,
            culled: false,
            placeholder: false,
            arc_depth: 0,
        }
    }

    /// A node introduced by `arc`, not yet attached to a graph.
    pub fn for_arc(arc: ArcKind, layer_stack: LayerStackId, site: Path, map_to_parent: MapFunction) -> Self {
        Self {
            arc,
            map_to_parent,
            ..Self::root(layer_stack, site)
        }
    }

    /// True if opinions at this node contribute to the composed result.
    pub fn contributes(&self) -> bool {
        !self.culled && !self.placeholder
    }

    fn sort_key(&self) -> (u8, bool) {
        (self.arc.strength_rank(), self.ancestral)
    }
}

/// Tree of nodes making up one composed result.
#[derive(Debug, Clone)]
pub struct NodeGraph {
    nodes: Vec<Node>,
}

impl NodeGraph {
    /// Create a graph holding only `root`.
    pub fn new(mut root: Node) -> Self {
        root.parent = None;
        root.children.clear();
        root.arc_depth = 0;
        Self { nodes: vec![root] }
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach `node` under `parent`, placing it by arc strength.
    ///
    /// The node's `map_to_root` and `arc_depth` are derived from the parent.
    pub fn add_child(&mut self, parent: NodeIndex, mut node: Node) -> NodeIndex {
        let index = self.nodes.len();
        let parent_node = &self.nodes[parent];
        node.parent = Some(parent);
        node.children.clear();
        node.map_to_root = parent_node.map_to_root.compose(&node.map_to_parent);
        node.arc_depth = parent_node.arc_depth + 1;

        let key = node.sort_key();
        let siblings = &self.nodes[parent].children;
        let position = siblings
            .iter()
            .position(|&s| self.nodes[s].sort_key() > key)
            .unwrap_or(siblings.len());
        self.nodes.push(node);
        self.nodes[parent].children.insert(position, index);
        index
    }

    /// Node indices in strength order (pre-order, strongest first).
    pub fn strength_order(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0];
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.nodes[index].children.iter().rev().copied());
        }
        order
    }

    /// All nodes below `index` (children, grandchildren, etc.).
    ///
    /// Uses breadth-first traversal.
    pub fn descendants(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut result = Vec::new();
        let mut queue: VecDeque<NodeIndex> = self.nodes[index].children.iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            result.push(next);
            queue.extend(self.nodes[next].children.iter().copied());
        }
        result
    }

    /// Indices from `index` up to the root, inclusive.
    pub fn ancestry(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut chain = vec![index];
        let mut current = self.nodes[index].parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.nodes[parent].parent;
        }
        chain
    }

    /// True if the site already appears on the arc chain from `from` to the root.
    pub fn site_on_chain(&self, from: NodeIndex, layer_stack: &LayerStackId, site: &Path) -> bool {
        self.ancestry(from)
            .into_iter()
            .any(|i| self.nodes[i].layer_stack == *layer_stack && self.nodes[i].site == *site)
    }

    /// First node in strength order at the given site.
    pub fn find_node(&self, layer_stack: &LayerStackId, site: &Path) -> Option<NodeIndex> {
        self.strength_order()
            .into_iter()
            .find(|&i| self.nodes[i].layer_stack == *layer_stack && self.nodes[i].site == *site)
    }
}
