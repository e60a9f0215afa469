//! engine
//!
//! Change processing: turn layer edits into minimal cache invalidation.
//!
//! # Architecture
//!
//! Edits are processed inside a [`ChangeScope`] opened on a cache. A scope
//! moves through a fixed lifecycle:
//!
//! ```text
//! Collecting -> Classifying -> Applying -> Collecting ... -> Closed
//! ```
//!
//! 1. **Collecting**: the caller hands over a block of change lists.
//! 2. **Classifying**: [`classify`] reads the cache and decides, for each
//!    dependent result, whether it changed significantly, in its child
//!    names, in its spec stack, or not at all. Layer stacks touched by the
//!    edits are rebuilt off to the side.
//! 3. **Applying**: the cache swaps the rebuilt stacks in, bumps its
//!    used-layers revision if any layer set changed, and drops or refreshes
//!    results in the order significant, prim, spec.
//!
//! Layers and stacks released while applying go to the scope's
//! [`Lifeboat`] and stay alive until the scope closes.
//!
//! # Invariants
//!
//! - At most one scope is open per cache
//! - Reported paths are subsumed: nothing under a significant path is
//!   reported as a lighter change
//! - Closing (or dropping) a scope releases its lifeboat
//!
//! # Example
//!
//! ```
//! use strata::cache::CompositionCache;
//! use strata::core::config::CacheConfig;
//! use strata::core::layer::{LayerRegistry, Specifier};
//! use strata::core::types::{LayerStackId, Path};
//!
//! let registry = LayerRegistry::new();
//! let root = registry.create("root.sdf").unwrap();
//! let path = Path::new("/Set/Lamp").unwrap();
//! root.create_prim_spec(&path, Specifier::Def).unwrap();
//!
//! let cache = CompositionCache::new(
//!     LayerStackId::new(root.id().clone()),
//!     registry.clone(),
//!     CacheConfig::default(),
//! )
//! .unwrap();
//! cache.compute_prim_index(&path).unwrap();
//!
//! let mut scope = cache.open_scope().unwrap();
//! scope.process(root.set_documentation(&path, Some("desk lamp".into())).unwrap());
//! assert!(scope.significant_changes().is_empty());
//! scope.process(root.add_inherit(&path, Path::new("/Lamps").unwrap()).unwrap());
//! assert_eq!(scope.significant_changes(), vec![path.clone()]);
//! let summary = scope.close();
//! assert!(!summary.is_empty());
//! ```

pub mod changes;
pub(crate) mod classify;
pub mod lifeboat;

pub use changes::{CacheChanges, ChangeSummary, LayerStackChanges};
pub use lifeboat::Lifeboat;

use std::collections::BTreeSet;

use tracing::debug;

use crate::cache::CompositionCache;
use crate::core::layer::ChangeBlock;
use crate::core::types::{LayerStackId, Path};

/// Where a scope is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePhase {
    Collecting,
    Classifying,
    Applying,
    Closed,
}

/// An open batch of change processing on one cache.
#[derive(Debug)]
pub struct ChangeScope<'c> {
    cache: &'c CompositionCache,
    phase: ScopePhase,
    changes: CacheChanges,
    layer_stacks: Vec<LayerStackId>,
    used_layers_changed: bool,
    lifeboat: Lifeboat,
}

impl<'c> ChangeScope<'c> {
    pub(crate) fn new(cache: &'c CompositionCache) -> Self {
        debug!(root = %cache.root_layer_stack_id(), "change scope opened");
        Self {
            cache,
            phase: ScopePhase::Collecting,
            changes: CacheChanges::new(),
            layer_stacks: Vec::new(),
            used_layers_changed: false,
            lifeboat: Lifeboat::new(),
        }
    }

    /// Classify and apply one block of edits.
    pub fn process(&mut self, block: impl Into<ChangeBlock>) {
        let block = block.into();
        if block.is_empty() {
            return;
        }
        self.phase = ScopePhase::Classifying;
        let classification = self.cache.classify_block(&block);
        self.apply(classification, None);
    }

    /// Recompute every live stack against a new muted layer set.
    pub(crate) fn process_muting(&mut self, muted: BTreeSet<String>) {
        self.phase = ScopePhase::Classifying;
        let classification = self.cache.classify_muting(&muted);
        self.apply(classification, Some(muted));
    }

    fn apply(&mut self, classification: classify::Classification, muted: Option<BTreeSet<String>>) {
        self.phase = ScopePhase::Applying;
        self.changes.merge(classification.changes.clone());
        let applied = self.cache.apply_classification(classification, &mut self.lifeboat, muted);
        for id in applied.layer_stacks {
            if !self.layer_stacks.contains(&id) {
                self.layer_stacks.push(id);
            }
        }
        self.used_layers_changed |= applied.used_layers_changed;
        self.phase = ScopePhase::Collecting;
    }

    pub fn phase(&self) -> ScopePhase {
        self.phase
    }

    pub fn changes(&self) -> &CacheChanges {
        &self.changes
    }

    pub fn significant_changes(&self) -> Vec<Path> {
        self.changes.significant().iter().cloned().collect()
    }

    pub fn prim_changes(&self) -> Vec<Path> {
        self.changes.prims().iter().cloned().collect()
    }

    pub fn spec_changes(&self) -> Vec<Path> {
        self.changes.specs().iter().cloned().collect()
    }

    pub fn target_changes(&self) -> Vec<Path> {
        self.changes.targets().iter().cloned().collect()
    }

    pub fn lifeboat(&self) -> &Lifeboat {
        &self.lifeboat
    }

    /// Close the scope, releasing the lifeboat.
    pub fn close(mut self) -> ChangeSummary {
        self.finish()
    }

    fn finish(&mut self) -> ChangeSummary {
        if self.phase == ScopePhase::Closed {
            return ChangeSummary::default();
        }
        let mut summary = ChangeSummary::from_changes(&self.changes);
        summary.layer_stacks = std::mem::take(&mut self.layer_stacks);
        summary.used_layers_changed = self.used_layers_changed;
        summary.used_layers_revision = self.cache.used_layers_revision();
        self.lifeboat.release();
        self.cache.end_scope();
        self.phase = ScopePhase::Closed;
        debug!(
            significant = summary.significant.len(),
            prims = summary.prims.len(),
            specs = summary.specs.len(),
            "change scope closed"
        );
        summary
    }
}

impl Drop for ChangeScope<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CacheConfig;
    use crate::core::layer::{LayerRegistry, Specifier};

    fn p(s: &str) -> Path {
        Path::new(s).unwrap()
    }

    #[test]
    fn scope_walks_back_to_collecting() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let cache = CompositionCache::new(
            LayerStackId::new(root.id().clone()),
            registry.clone(),
            CacheConfig::default(),
        )
        .unwrap();

        let mut scope = cache.open_scope().unwrap();
        assert_eq!(scope.phase(), ScopePhase::Collecting);
        scope.process(root.create_prim_spec(&p("/A"), Specifier::Def).unwrap());
        assert_eq!(scope.phase(), ScopePhase::Collecting);
        // Nothing was cached, so nothing is reported.
        assert!(scope.changes().is_empty());
        let summary = scope.close();
        assert!(summary.is_empty());
        assert!(cache.open_scope().is_ok());
    }

    #[test]
    fn dropped_stack_rides_the_lifeboat() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let sub = registry.create("sub.sdf").unwrap();
        sub.create_prim_spec(&p("/A"), Specifier::Def).unwrap();
        root.add_sublayer("sub.sdf");
        let cache = CompositionCache::new(
            LayerStackId::new(root.id().clone()),
            registry.clone(),
            CacheConfig::default(),
        )
        .unwrap();
        cache.compute_prim_index(&p("/A")).unwrap();
        let sub_id = sub.id().clone();

        let mut scope = cache.open_scope().unwrap();
        scope.process(root.remove_sublayer("sub.sdf"));
        drop(sub);
        assert!(scope.lifeboat().holds_layer(&sub_id));
        assert!(registry.find(&sub_id).is_some());
        assert_eq!(scope.significant_changes(), vec![Path::absolute_root()]);

        let summary = scope.close();
        assert!(summary.used_layers_changed);
        assert!(registry.find(&sub_id).is_none());
        assert!(cache.find_prim_index(&p("/A")).is_none());
    }
}
