//! edit::relocates
//!
//! Incremental editing of a layer stack's relocates.
//!
//! # Architecture
//!
//! [`LayerRelocatesEditBuilder`] snapshots the authored relocates of every
//! layer in a stack and keeps two views in lockstep:
//!
//! - a working copy of each layer's list, in authored order
//! - the edited incremental map, source to target
//!
//! Construction already cleans up the snapshot. Malformed entries are
//! dropped from the layer that authored them. A source whose strongest
//! claim was rejected is dropped from every layer. So a stack carrying
//! invalid relocates yields edits even before the first request.
//!
//! Each [`relocate`](LayerRelocatesEditBuilder::relocate) request runs in
//! this order:
//!
//! 1. Check the form of both paths.
//! 2. Map the source through the existing entries, so that callers may
//!    name a prim by either its original or its relocated path.
//! 3. Check the placement of the mapped source against the target.
//!    Retargeting an existing entry onto a root prim skips this step.
//! 4. Check the target against existing entries.
//! 5. Update the entry that already moves the mapped source, or add one.
//! 6. Rewrite entries whose source or target lies under the moved prim,
//!    then drop entries that became identities.
//!
//! Moving a prim back to where an existing entry took it from collapses
//! that entry to an identity, which cancels it.
//!
//! # Invariants
//!
//! - A refused request leaves the builder unchanged
//! - Updated entries are rewritten in every layer that authored them
//! - New entries go to the add layer, after its existing entries
//!
//! # Example
//!
//! ```
//! use strata::cache::CompositionCache;
//! use strata::core::config::CacheConfig;
//! use strata::core::layer::LayerRegistry;
//! use strata::core::types::{LayerStackId, Path};
//! use strata::edit::LayerRelocatesEditBuilder;
//!
//! let p = |s: &str| Path::new(s).unwrap();
//! let registry = LayerRegistry::new();
//! let root = registry.create("root.sdf").unwrap();
//! let cache = CompositionCache::new(
//!     LayerStackId::new(root.id().clone()),
//!     registry.clone(),
//!     CacheConfig::default(),
//! )
//! .unwrap();
//!
//! let stack = cache.root_layer_stack();
//! let mut builder = LayerRelocatesEditBuilder::new(&stack, None).unwrap();
//! builder.relocate(&p("/Root/A"), &p("/Root/B")).unwrap();
//! builder.relocate(&p("/Root/A"), &p("/Root/C")).unwrap();
//! assert_eq!(builder.edited_relocates_map()[&p("/Root/A")], p("/Root/C"));
//!
//! for (layer, relocates) in builder.edits() {
//!     layer.set_relocates(relocates);
//! }
//! assert_eq!(root.relocates(), vec![(p("/Root/A"), p("/Root/C"))]);
//! ```

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::cache::layer_stack::LayerStack;
use crate::core::layer::LayerHandle;
use crate::core::relocates::{check_relocate_paths, check_relocate_placement, RelocationFault};
use crate::core::types::{LayerId, Path};

/// The builder could not be set up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditBuilderError {
    #[error("layer stack has no layers")]
    EmptyLayerStack,

    #[error("layer @{0}@ is not in the layer stack")]
    LayerNotInStack(LayerId),
}

/// A relocate request the builder refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RelocateRefusal {
    /// Source as named by the caller, before mapping through earlier edits.
    pub requested: Path,
    pub target: Path,
    pub fault: RelocationFault,
    message: String,
}

impl RelocateRefusal {
    fn relocate(source: &Path, mapped: &Path, target: &Path, fault: RelocationFault) -> Self {
        let from = if mapped != source {
            format!(" (relocated from original source <{source}>)")
        } else {
            String::new()
        };
        let message = format!("Cannot relocate <{mapped}>{from} to <{target}>: {fault}");
        Self {
            requested: source.clone(),
            target: target.clone(),
            fault,
            message,
        }
    }

    fn remove(source: &Path) -> Self {
        let fault = RelocationFault::NoSuchRelocate;
        let message = format!("Cannot remove relocate for <{source}>: {fault}");
        Self {
            requested: source.clone(),
            target: Path::empty(),
            fault,
            message,
        }
    }

    /// Human readable reason, naming both paths.
    pub fn why_not(&self) -> &str {
        &self.message
    }
}

/// Computes per-layer relocates edits for a layer stack.
#[derive(Debug, Clone)]
pub struct LayerRelocatesEditBuilder {
    layers: Vec<LayerHandle>,
    authored: Vec<Vec<(Path, Path)>>,
    lists: Vec<Vec<(Path, Path)>>,
    map: BTreeMap<Path, Path>,
    add_layer: usize,
}

impl LayerRelocatesEditBuilder {
    /// Snapshot `stack`. New entries go to `add_layer`, or to the root layer.
    pub fn new(stack: &LayerStack, add_layer: Option<&LayerHandle>) -> Result<Self, EditBuilderError> {
        let layers = stack.layers();
        if layers.is_empty() {
            return Err(EditBuilderError::EmptyLayerStack);
        }
        let wanted = match add_layer {
            Some(layer) => layer.id().clone(),
            None => stack.id().root.clone(),
        };
        let add_layer = layers
            .iter()
            .position(|l| *l.id() == wanted)
            .ok_or(EditBuilderError::LayerNotInStack(wanted))?;

        let authored: Vec<Vec<(Path, Path)>> = layers.iter().map(|l| l.relocates()).collect();
        let mut lists = authored.clone();
        let table = stack.relocations();
        for error in table.errors() {
            if error.fault.is_malformed() {
                if let Some(index) = layers.iter().position(|l| *l.id() == error.layer) {
                    lists[index].retain(|(s, t)| !(*s == error.source && *t == error.target));
                }
            } else {
                for list in &mut lists {
                    list.retain(|(s, _)| *s != error.source);
                }
            }
        }
        let map = table.incremental_source_to_target().clone();
        drop(table);

        Ok(Self {
            layers,
            authored,
            lists,
            map,
            add_layer,
        })
    }

    /// Relocate the prim at `source` to `target`. An empty target deletes it.
    pub fn relocate(&mut self, source: &Path, target: &Path) -> Result<(), RelocateRefusal> {
        check_relocate_paths(source, target)
            .map_err(|fault| RelocateRefusal::relocate(source, source, target, fault))?;
        let mapped = self.map_source(source)?;
        let refuse = |fault| RelocateRefusal::relocate(source, &mapped, target, fault);
        // Retargeting an existing non-root entry onto a root prim is an
        // adjustment, not a new root-prim relocate.
        let adjusting = target.is_root_prim_path()
            && self
                .source_of(&mapped)
                .is_some_and(|owner| !owner.is_root_prim_path());
        if !adjusting {
            check_relocate_placement(&mapped, target).map_err(refuse)?;
        }

        if target.is_empty() {
            self.delete(&mapped);
        } else {
            self.check_target(&mapped, target).map_err(refuse)?;
            self.move_prim(&mapped, target);
        }
        debug!(%source, %mapped, %target, "relocate accepted");
        Ok(())
    }

    /// Remove the entry whose source is `source`, undoing what it moved.
    pub fn remove_relocate(&mut self, source: &Path) -> Result<(), RelocateRefusal> {
        let Some(target) = self.map.get(source).cloned() else {
            return Err(RelocateRefusal::remove(source));
        };
        self.remove_entry(source);
        if !target.is_empty() {
            self.rewrite_under(&target, source);
            self.drop_identities();
        }
        debug!(%source, "relocate removed");
        Ok(())
    }

    /// The incremental map as edited so far.
    pub fn edited_relocates_map(&self) -> &BTreeMap<Path, Path> {
        &self.map
    }

    /// New relocates for each layer whose list changed, in stack order.
    pub fn edits(&self) -> Vec<(LayerHandle, Vec<(Path, Path)>)> {
        self.layers
            .iter()
            .zip(self.authored.iter().zip(&self.lists))
            .filter(|(_, (before, after))| before != after)
            .map(|(layer, (_, after))| (layer.clone(), after.clone()))
            .collect()
    }

    /// Follow `path` through existing entries to where the prim lives now.
    fn map_source(&self, source: &Path) -> Result<Path, RelocateRefusal> {
        let mut path = source.clone();
        for _ in 0..=self.map.len() {
            let step = self
                .map
                .iter()
                .filter(|(s, _)| path.has_prefix(s))
                .max_by_key(|(s, _)| s.depth());
            let Some((from, to)) = step else {
                break;
            };
            if to.is_empty() {
                return Err(RelocateRefusal::relocate(
                    source,
                    &path,
                    &Path::empty(),
                    RelocationFault::SourceDeleted { source: from.clone() },
                ));
            }
            match path.replace_prefix(from, to) {
                Some(next) => path = next,
                None => break,
            }
        }
        Ok(path)
    }

    fn check_target(&self, mapped: &Path, target: &Path) -> Result<(), RelocationFault> {
        if let Some(existing) = self.map.get(target) {
            if existing.is_empty() {
                return Err(RelocationFault::TargetUnderDeletedSource { source: target.clone() });
            }
            if existing != mapped {
                return Err(RelocationFault::TargetIsExistingSource {
                    source: target.clone(),
                    target: existing.clone(),
                });
            }
        }
        let relocated_ancestor = self
            .map
            .iter()
            .filter(|(s, _)| target.has_prefix(s) && *s != target)
            .max_by_key(|(s, _)| s.depth());
        if let Some((source, moved_to)) = relocated_ancestor {
            return Err(if moved_to.is_empty() {
                RelocationFault::TargetUnderDeletedSource { source: source.clone() }
            } else {
                RelocationFault::TargetUnderRelocatedSource {
                    source: source.clone(),
                    target: moved_to.clone(),
                }
            });
        }
        if let Some((source, _)) = self.map.iter().find(|(s, t)| *t == target && *s != mapped) {
            return Err(RelocationFault::DuplicateTarget {
                source: source.clone(),
                target: target.clone(),
            });
        }
        // A target that unmaps to inside the moved prim would parent it
        // under one of its own descendants.
        if strictly_under(&self.unmap(target), &self.unmap(mapped)) {
            return Err(RelocationFault::TargetIsDescendant);
        }
        Ok(())
    }

    /// Follow `path` back through existing entries to where it was authored.
    fn unmap(&self, path: &Path) -> Path {
        let mut path = path.clone();
        for _ in 0..=self.map.len() {
            let step = self
                .map
                .iter()
                .filter(|(_, t)| !t.is_empty() && path.has_prefix(t))
                .max_by_key(|(_, t)| t.depth());
            let Some((from, to)) = step else {
                break;
            };
            match path.replace_prefix(to, from) {
                Some(next) => path = next,
                None => break,
            }
        }
        path
    }

    fn move_prim(&mut self, mapped: &Path, target: &Path) {
        let owner = self.source_of(mapped).unwrap_or_else(|| mapped.clone());
        self.set_target(&owner, target.clone());
        self.rewrite_under(mapped, target);
        self.drop_identities();
    }

    fn delete(&mut self, mapped: &Path) {
        let owner = self.source_of(mapped).unwrap_or_else(|| mapped.clone());
        self.set_target(&owner, Path::empty());
        let entries: Vec<(Path, Path)> = self.map.iter().map(|(s, t)| (s.clone(), t.clone())).collect();
        for (source, target) in entries {
            if source == owner {
                continue;
            }
            if source.has_prefix(mapped) {
                self.remove_entry(&source);
            } else if !target.is_empty() && target.has_prefix(mapped) {
                self.set_target(&source, Path::empty());
            }
        }
    }

    /// Move every source and target strictly under `from` to sit under `to`.
    fn rewrite_under(&mut self, from: &Path, to: &Path) {
        let entries: Vec<(Path, Path)> = self.map.iter().map(|(s, t)| (s.clone(), t.clone())).collect();
        for (source, target) in entries {
            let new_source = strictly_under(&source, from)
                .then(|| source.replace_prefix(from, to))
                .flatten()
                .unwrap_or_else(|| source.clone());
            if new_source != source {
                self.rename_source(&source, &new_source);
            }
            if let Some(new_target) = strictly_under(&target, from)
                .then(|| target.replace_prefix(from, to))
                .flatten()
            {
                self.set_target(&new_source, new_target);
            }
        }
    }

    fn drop_identities(&mut self) {
        let identities: Vec<Path> = self
            .map
            .iter()
            .filter(|(s, t)| s == t)
            .map(|(s, _)| s.clone())
            .collect();
        for source in identities {
            self.remove_entry(&source);
        }
    }

    fn source_of(&self, target: &Path) -> Option<Path> {
        self.map.iter().find(|(_, t)| *t == target).map(|(s, _)| s.clone())
    }

    fn set_target(&mut self, source: &Path, target: Path) {
        let mut authored = false;
        for list in &mut self.lists {
            for entry in list.iter_mut().filter(|(s, _)| s == source) {
                entry.1 = target.clone();
                authored = true;
            }
        }
        if !authored {
            self.lists[self.add_layer].push((source.clone(), target.clone()));
        }
        self.map.insert(source.clone(), target);
    }

    fn rename_source(&mut self, old: &Path, new: &Path) {
        for list in &mut self.lists {
            for entry in list.iter_mut().filter(|(s, _)| s == old) {
                entry.0 = new.clone();
            }
        }
        if let Some(target) = self.map.remove(old) {
            self.map.insert(new.clone(), target);
        }
    }

    fn remove_entry(&mut self, source: &Path) {
        for list in &mut self.lists {
            list.retain(|(s, _)| s != source);
        }
        self.map.remove(source);
    }
}

fn strictly_under(path: &Path, ancestor: &Path) -> bool {
    path != ancestor && path.has_prefix(ancestor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::layer_stack::LayerStackData;
    use crate::core::layer::LayerRegistry;
    use crate::core::types::LayerStackId;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn p(s: &str) -> Path {
        Path::new(s).unwrap()
    }

    fn stack_for(root: &LayerHandle, registry: &Arc<LayerRegistry>) -> LayerStack {
        let id = LayerStackId::new(root.id().clone());
        let data = LayerStackData::build(&id, registry, &BTreeSet::new(), 24.0);
        LayerStack::new(id, data)
    }

    fn map(entries: &[(&str, &str)]) -> BTreeMap<Path, Path> {
        entries.iter().map(|(s, t)| (p(s), p(t))).collect()
    }

    #[test]
    fn relocating_back_cancels() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let stack = stack_for(&root, &registry);
        let mut builder = LayerRelocatesEditBuilder::new(&stack, None).unwrap();

        builder.relocate(&p("/Root/A"), &p("/Root/B")).unwrap();
        builder.relocate(&p("/Root/B"), &p("/Root/C")).unwrap();
        assert_eq!(*builder.edited_relocates_map(), map(&[("/Root/A", "/Root/C")]));

        builder.relocate(&p("/Root/C"), &p("/Root/A")).unwrap();
        assert!(builder.edited_relocates_map().is_empty());
        assert!(builder.edits().is_empty());
    }

    #[test]
    fn ancestor_relocate_subsumes_descendants() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let stack = stack_for(&root, &registry);
        let mut builder = LayerRelocatesEditBuilder::new(&stack, None).unwrap();

        builder.relocate(&p("/Root/A/C"), &p("/Root/B/C")).unwrap();
        builder.relocate(&p("/Root/A/D"), &p("/Root/B/D")).unwrap();
        builder.relocate(&p("/Root/B"), &p("/Root/F")).unwrap();
        assert_eq!(
            *builder.edited_relocates_map(),
            map(&[
                ("/Root/A/C", "/Root/F/C"),
                ("/Root/A/D", "/Root/F/D"),
                ("/Root/B", "/Root/F"),
            ])
        );

        builder.relocate(&p("/Root/F"), &p("/Root/A")).unwrap();
        assert_eq!(*builder.edited_relocates_map(), map(&[("/Root/B", "/Root/A")]));
    }

    #[test]
    fn refusal_names_the_mapped_source() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let stack = stack_for(&root, &registry);
        let mut builder = LayerRelocatesEditBuilder::new(&stack, None).unwrap();
        builder.relocate(&p("/Root/A"), &p("/Root/Z")).unwrap();

        let err = builder.relocate(&p("/Root/A/B"), &p("/Root/A/Y")).unwrap_err();
        assert_eq!(
            err.why_not(),
            "Cannot relocate </Root/Z/B> (relocated from original source </Root/A/B>) to \
             </Root/A/Y>: Cannot relocate a prim to be a descendant of </Root/A> which is \
             already relocated to </Root/Z>."
        );
        assert_eq!(err.requested, p("/Root/A/B"));
        assert_eq!(err.target, p("/Root/A/Y"));
        assert_eq!(err.to_string(), err.why_not());
        let as_error: &dyn std::error::Error = &err;
        assert!(as_error.source().is_none());
        assert_eq!(*builder.edited_relocates_map(), map(&[("/Root/A", "/Root/Z")]));
    }

    #[test]
    fn new_root_prim_relocates_are_refused() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let stack = stack_for(&root, &registry);
        let mut builder = LayerRelocatesEditBuilder::new(&stack, None).unwrap();

        let err = builder.relocate(&p("/Root/Z"), &p("/Root")).unwrap_err();
        assert_eq!(err.fault, RelocationFault::RootPrim);
        let err = builder.relocate(&p("/Root/Z"), &p("/Other")).unwrap_err();
        assert_eq!(err.fault, RelocationFault::RootPrim);
        assert!(builder.edited_relocates_map().is_empty());
    }

    #[test]
    fn existing_relocate_can_be_adjusted_onto_a_root_prim() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let stack = stack_for(&root, &registry);
        let mut builder = LayerRelocatesEditBuilder::new(&stack, None).unwrap();
        builder.relocate(&p("/Root/X/Y"), &p("/Root/Z")).unwrap();
        builder.relocate(&p("/Root/Z/K"), &p("/Root/Z/L")).unwrap();

        builder.relocate(&p("/Root/Z"), &p("/Root")).unwrap();
        assert_eq!(
            *builder.edited_relocates_map(),
            map(&[("/Root/K", "/Root/L"), ("/Root/X/Y", "/Root")])
        );
        let edits = builder.edits();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].1.contains(&(p("/Root/X/Y"), p("/Root"))));

        // The root prim itself still cannot be moved.
        let err = builder.relocate(&p("/Root"), &p("/Root/Q")).unwrap_err();
        assert_eq!(err.fault, RelocationFault::RootPrim);
    }

    #[test]
    fn moving_a_prim_under_its_moved_child_is_refused() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let stack = stack_for(&root, &registry);
        let mut builder = LayerRelocatesEditBuilder::new(&stack, None).unwrap();
        builder.relocate(&p("/Root/M"), &p("/Root/P")).unwrap();
        builder.relocate(&p("/Root/P/K"), &p("/Root/N")).unwrap();

        let err = builder.relocate(&p("/Root/P"), &p("/Root/N/W")).unwrap_err();
        assert_eq!(err.fault, RelocationFault::TargetIsDescendant);
        assert_eq!(
            *builder.edited_relocates_map(),
            map(&[("/Root/M", "/Root/P"), ("/Root/P/K", "/Root/N")])
        );

        // Moving it back where it came from is still a cancel.
        builder.relocate(&p("/Root/P"), &p("/Root/M")).unwrap();
        assert_eq!(*builder.edited_relocates_map(), map(&[("/Root/M/K", "/Root/N")]));
    }

    #[test]
    fn delete_turns_moved_in_prims_into_deletes() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let stack = stack_for(&root, &registry);
        let mut builder = LayerRelocatesEditBuilder::new(&stack, None).unwrap();
        builder.relocate(&p("/Root/X"), &p("/Root/B/X")).unwrap();
        builder.relocate(&p("/Root/B/C"), &p("/Root/B/D")).unwrap();

        builder.relocate(&p("/Root/B"), &Path::empty()).unwrap();
        let expected: BTreeMap<Path, Path> = [(p("/Root/B"), Path::empty()), (p("/Root/X"), Path::empty())]
            .into_iter()
            .collect();
        assert_eq!(*builder.edited_relocates_map(), expected);

        let err = builder.relocate(&p("/Root/B/C"), &p("/Root/E")).unwrap_err();
        assert_eq!(err.fault, RelocationFault::SourceDeleted { source: p("/Root/B") });
    }

    #[test]
    fn remove_relocate_requires_an_entry() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let stack = stack_for(&root, &registry);
        let mut builder = LayerRelocatesEditBuilder::new(&stack, None).unwrap();

        let err = builder.remove_relocate(&p("/Root/A")).unwrap_err();
        assert_eq!(err.fault, RelocationFault::NoSuchRelocate);

        builder.relocate(&p("/Root/A"), &p("/Root/B")).unwrap();
        builder.relocate(&p("/Root/B/H"), &p("/Root/B/I")).unwrap();
        builder.remove_relocate(&p("/Root/A")).unwrap();
        assert_eq!(*builder.edited_relocates_map(), map(&[("/Root/A/H", "/Root/A/I")]));
    }

    #[test]
    fn add_layer_must_be_in_the_stack() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let stray = registry.create("stray.sdf").unwrap();
        let stack = stack_for(&root, &registry);
        let err = LayerRelocatesEditBuilder::new(&stack, Some(&stray)).unwrap_err();
        assert_eq!(err, EditBuilderError::LayerNotInStack(stray.id().clone()));
    }
}
