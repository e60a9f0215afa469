//! engine::changes
//!
//! What one change scope decided to do to a cache.
//!
//! [`CacheChanges`] accumulates classified paths and keeps them subsumed:
//! once a path changed significantly, nothing at or below it is reported
//! as a lighter change. [`LayerStackChanges`] carries a recomputed stack
//! snapshot waiting to be swapped in. [`ChangeSummary`] is what a closed
//! scope hands back.

use std::collections::BTreeSet;

use crate::cache::layer_stack::LayerStackData;
use crate::core::types::{LayerStackId, Path};

/// Paths classified by kind of change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheChanges {
    significant: BTreeSet<Path>,
    prims: BTreeSet<Path>,
    specs: BTreeSet<Path>,
    targets: BTreeSet<Path>,
}

impl CacheChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `path` is at or below a significantly changed path.
    pub fn is_significant(&self, path: &Path) -> bool {
        self.significant.iter().any(|s| path.has_prefix(s))
    }

    /// Mark `path` for a full recompute, dropping lighter changes under it.
    pub fn did_change_significantly(&mut self, path: Path) {
        if self.is_significant(&path) {
            return;
        }
        let under = |p: &Path| p.has_prefix(&path);
        self.significant.retain(|p| !under(p));
        self.prims.retain(|p| !under(p));
        self.specs.retain(|p| !under(p));
        self.targets.retain(|p| !under(p));
        self.significant.insert(path);
    }

    /// Mark `path`'s child name list as changed.
    pub fn did_change_prims(&mut self, path: Path) {
        if !self.is_significant(&path) {
            self.prims.insert(path);
        }
    }

    /// Mark `path`'s spec stack as changed.
    pub fn did_change_specs(&mut self, path: Path) {
        if !self.is_significant(&path) {
            self.specs.insert(path);
        }
    }

    /// Mark a relationship's targets or an attribute's connections as changed.
    pub fn did_change_targets(&mut self, path: Path) {
        if !self.is_significant(&path) {
            self.targets.insert(path);
        }
    }

    pub fn merge(&mut self, other: CacheChanges) {
        for path in other.significant {
            self.did_change_significantly(path);
        }
        for path in other.prims {
            self.did_change_prims(path);
        }
        for path in other.specs {
            self.did_change_specs(path);
        }
        for path in other.targets {
            self.did_change_targets(path);
        }
    }

    pub fn significant(&self) -> &BTreeSet<Path> {
        &self.significant
    }

    pub fn prims(&self) -> &BTreeSet<Path> {
        &self.prims
    }

    pub fn specs(&self) -> &BTreeSet<Path> {
        &self.specs
    }

    pub fn targets(&self) -> &BTreeSet<Path> {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.significant.is_empty() && self.prims.is_empty() && self.specs.is_empty() && self.targets.is_empty()
    }
}

/// A recomputed layer stack, not yet swapped in.
#[derive(Debug, Clone)]
pub struct LayerStackChanges {
    pub stack: LayerStackId,
    pub new_data: LayerStackData,
    /// The set or order of layers differs.
    pub layer_set_changed: bool,
    /// Every result using the stack must be recomputed.
    pub significant: bool,
    pub relocations_changed: bool,
}

/// Outcome of a closed change scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub significant: Vec<Path>,
    pub prims: Vec<Path>,
    pub specs: Vec<Path>,
    pub targets: Vec<Path>,
    /// Stacks whose data was recomputed.
    pub layer_stacks: Vec<LayerStackId>,
    pub used_layers_changed: bool,
    pub used_layers_revision: u64,
}

impl ChangeSummary {
    pub(crate) fn from_changes(changes: &CacheChanges) -> Self {
        Self {
            significant: changes.significant.iter().cloned().collect(),
            prims: changes.prims.iter().cloned().collect(),
            specs: changes.specs.iter().cloned().collect(),
            targets: changes.targets.iter().cloned().collect(),
            ..Self::default()
        }
    }

    /// True if nothing in the cache changed.
    pub fn is_empty(&self) -> bool {
        self.significant.is_empty()
            && self.prims.is_empty()
            && self.specs.is_empty()
            && self.targets.is_empty()
            && self.layer_stacks.is_empty()
            && !self.used_layers_changed
    }
}
