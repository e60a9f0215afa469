//! engine::classify
//!
//! Decide, for one block of layer edits, what each cached result needs.
//!
//! # Architecture
//!
//! Classification reads the cache through a [`CacheView`] and never mutates
//! it. It runs in two passes:
//!
//! 1. **Layer stacks.** Every live stack containing a layer whose sublayers,
//!    time codes or relocates changed is rebuilt off to the side and
//!    compared with what it has now. The comparison decides whether the
//!    stack's layer set changed and whether the results using it must be
//!    recomputed.
//! 2. **Paths.** Every edited path is looked up in the dependency index for
//!    each stack containing the edited layer, and each dependent result is
//!    classified as significant, prim, spec or target change.
//!
//! Results that are not cached but could be reached are classified
//! conservatively as significant.
//!
//! # Invariants
//!
//! - Classification is pure; the returned [`Classification`] is the only output
//! - Stack snapshots are compared by layer identity, so an added or removed
//!   layer never counts as a time mapping change

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::changes::{CacheChanges, LayerStackChanges};
use crate::cache::dependencies::{Dependencies, DependencyQuery, SiteDependent};
use crate::cache::index::{PrimIndex, PropertyIndex};
use crate::cache::layer_stack::{LayerStack, LayerStackData};
use crate::core::config::CacheConfig;
use crate::core::layer::{ChangeBlock, ChangeEntry, ChangeList, FieldKey, LayerRegistry};
use crate::core::relocates::RelocationTable;
use crate::core::types::{LayerId, LayerStackId, Path};

/// Read-only view of a cache taken under its state lock.
pub(crate) struct CacheView<'a> {
    pub root_id: &'a LayerStackId,
    pub registry: &'a LayerRegistry,
    pub config: &'a CacheConfig,
    pub muted: &'a BTreeSet<String>,
    /// Every live layer stack.
    pub stacks: Vec<Arc<LayerStack>>,
    pub dependencies: &'a Dependencies,
    pub prim_indexes: &'a BTreeMap<Path, Arc<PrimIndex>>,
    pub property_indexes: &'a BTreeMap<Path, Arc<PropertyIndex>>,
}

/// Output of classification, applied by the cache.
#[derive(Debug, Default)]
pub(crate) struct Classification {
    pub changes: CacheChanges,
    pub stacks: Vec<(Arc<LayerStack>, LayerStackChanges)>,
}

/// Classify one block of layer edits.
pub(crate) fn classify(view: &CacheView<'_>, block: &ChangeBlock) -> Classification {
    let mut classifier = Classifier::new(view);
    for stack in &view.stacks {
        let layer_ids: HashSet<LayerId> = stack.layer_ids().into_iter().collect();
        let touched = block.lists().iter().any(|list| {
            layer_ids.contains(list.layer())
                && list
                    .entry(&Path::absolute_root())
                    .is_some_and(affects_layer_stack)
        });
        if touched {
            let rebuilt =
                LayerStackData::build(stack.id(), view.registry, view.muted, view.config.fallback_tcps);
            classifier.compare_stack(stack, rebuilt, true);
        }
    }
    for list in block.lists() {
        classifier.layer_changes(list);
    }
    classifier.finish()
}

/// Classify a change of the muted layer set.
pub(crate) fn classify_muting(view: &CacheView<'_>, muted: &BTreeSet<String>) -> Classification {
    let mut classifier = Classifier::new(view);
    for stack in &view.stacks {
        let rebuilt = LayerStackData::build(stack.id(), view.registry, muted, view.config.fallback_tcps);
        classifier.compare_stack(stack, rebuilt, false);
    }
    classifier.finish()
}

fn affects_layer_stack(entry: &ChangeEntry) -> bool {
    !entry.sublayer_changes.is_empty()
        || entry.info_changed.keys().any(|key| {
            key.affects_time_mapping() || matches!(key, FieldKey::SubLayers | FieldKey::LayerRelocates)
        })
}

struct Classifier<'v, 'a> {
    view: &'v CacheView<'a>,
    changes: CacheChanges,
    stacks: Vec<(Arc<LayerStack>, LayerStackChanges)>,
}

impl<'v, 'a> Classifier<'v, 'a> {
    fn new(view: &'v CacheView<'a>) -> Self {
        Self {
            view,
            changes: CacheChanges::new(),
            stacks: Vec::new(),
        }
    }

    fn finish(self) -> Classification {
        Classification {
            changes: self.changes,
            stacks: self.stacks,
        }
    }

    fn dependents(&self, stack: &LayerStackId, path: &Path, query: DependencyQuery) -> Vec<SiteDependent> {
        self.view.dependencies.find_site_dependents(stack, path, query)
    }

    fn significant(&mut self, path: Path, reason: &str) {
        debug!(path = %path, reason, "significant change");
        self.changes.did_change_significantly(path);
    }

    /// Compare a stack with its rebuilt snapshot and queue the swap.
    ///
    /// `always_swap` queues the new data even when nothing observable
    /// differs, so an edited layer's metadata is never stale.
    fn compare_stack(&mut self, stack: &Arc<LayerStack>, new_data: LayerStackData, always_swap: bool) {
        let old = stack.snapshot();
        let layer_set_changed = !old.same_layers(&new_data);
        let mut significant = false;

        if layer_set_changed {
            let old_ids: HashSet<&LayerId> = old.layers.iter().map(|l| l.id()).collect();
            let new_ids: HashSet<&LayerId> = new_data.layers.iter().map(|l| l.id()).collect();
            let removed = old.layers.iter().filter(|l| !new_ids.contains(l.id()));
            let added = new_data.layers.iter().filter(|l| !old_ids.contains(l.id()));
            let mut delta = removed.chain(added).peekable();
            significant = match delta.peek() {
                // Same layers in a different order.
                None => true,
                Some(_) => delta.any(|layer| !layer.is_empty()),
            };
        }
        if old.time_mapping_differs(&new_data) {
            significant = true;
        }

        let relocations_changed = old.relocations != new_data.relocations;
        if relocations_changed {
            if old.relocations.is_empty() != new_data.relocations.is_empty() {
                significant = true;
            } else if !significant {
                self.relocation_changes(stack.id(), &old.relocations, &new_data.relocations);
            }
        }

        if significant {
            self.stack_changed_significantly(stack.id());
        }

        let differs = layer_set_changed
            || significant
            || relocations_changed
            || old.local_errors != new_data.local_errors
            || old.invalid_sublayers != new_data.invalid_sublayers;
        if differs || always_swap {
            debug!(stack = %stack.id(), layer_set_changed, significant, relocations_changed, "layer stack changed");
            self.stacks.push((
                stack.clone(),
                LayerStackChanges {
                    stack: stack.id().clone(),
                    new_data,
                    layer_set_changed,
                    significant,
                    relocations_changed,
                },
            ));
        }
    }

    fn stack_changed_significantly(&mut self, stack: &LayerStackId) {
        if stack == self.view.root_id {
            self.significant(Path::absolute_root(), "root layer stack changed");
            return;
        }
        let query = DependencyQuery {
            recurse_on_site: true,
            filter_for_existing: true,
            ..DependencyQuery::default()
        };
        for dependent in self.dependents(stack, &Path::absolute_root(), query) {
            self.significant(dependent.index_path, "layer stack changed");
        }
    }

    fn relocation_changes(&mut self, stack: &LayerStackId, old: &RelocationTable, new: &RelocationTable) {
        let query = DependencyQuery {
            recurse_on_site: true,
            recurse_on_index: true,
            filter_for_existing: false,
        };
        for path in RelocationTable::affected_paths(old, new) {
            for dependent in self.dependents(stack, &path, query) {
                // The parent's child names move with the relocation.
                if let Some(parent) = dependent.index_path.parent().filter(|p| !p.is_absolute_root()) {
                    self.changes.did_change_prims(parent);
                }
                self.significant(dependent.index_path, "relocation changed");
            }
        }
    }

    fn layer_changes(&mut self, list: &ChangeList) {
        let stacks: Vec<Arc<LayerStack>> = self
            .view
            .stacks
            .iter()
            .filter(|s| s.has_layer(list.layer()))
            .cloned()
            .collect();
        if stacks.is_empty() {
            return;
        }
        for (path, entry) in list.entries() {
            for stack in &stacks {
                if path.is_absolute_root() {
                    if let Some((old, new)) = entry.info_changed.get(&FieldKey::DefaultPrim) {
                        self.default_prim_changed(stack.id(), old, new);
                    }
                } else if path.is_property_path() {
                    self.property_changed(stack.id(), path, entry);
                } else {
                    self.prim_changed(stack.id(), path, entry);
                }
            }
        }
    }

    fn default_prim_changed(&mut self, stack: &LayerStackId, old: &Value, new: &Value) {
        for name in [old, new].into_iter().filter_map(Value::as_str) {
            let Ok(path) = Path::absolute_root().append_child(name) else {
                continue;
            };
            for dependent in self.dependents(stack, &path, DependencyQuery::subtree()) {
                self.significant(dependent.index_path, "default prim changed");
            }
        }
        for dependent in self.dependents(stack, &Path::absolute_root(), DependencyQuery::exact()) {
            self.significant(dependent.index_path, "default prim changed");
        }
    }

    fn prim_changed(&mut self, stack: &LayerStackId, path: &Path, entry: &ChangeEntry) {
        let flags = &entry.flags;
        let composition = entry.info_changed.keys().any(|k| k.affects_prim_composition());
        if composition || flags.did_add_non_inert_prim || flags.did_remove_non_inert_prim {
            for dependent in self.dependents(stack, path, DependencyQuery::subtree()) {
                self.significant(dependent.index_path, "prim composition changed");
            }
            return;
        }
        if flags.did_add_inert_prim || flags.did_remove_inert_prim {
            self.specs_changed(stack, path, flags.did_remove_inert_prim);
            return;
        }
        if entry.has_info_change(FieldKey::Specifier) || entry.has_info_change(FieldKey::TypeName) {
            for dependent in self.dependents(stack, path, DependencyQuery::exact()) {
                self.changes.did_change_specs(dependent.index_path);
            }
        }
    }

    fn property_changed(&mut self, stack: &LayerStackId, path: &Path, entry: &ChangeEntry) {
        let structural = entry.flags.did_add_or_remove_property();
        let targets = entry.has_info_change(FieldKey::TargetPaths) || entry.has_info_change(FieldKey::ConnectionPaths);
        if !structural && !targets {
            return;
        }
        let Some(name) = path.name() else {
            return;
        };
        for dependent in self.dependents(stack, &path.prim_path(), DependencyQuery::exact()) {
            let Ok(property) = dependent.index_path.append_property(&name) else {
                continue;
            };
            debug!(path = %property, "property spec change");
            if targets {
                self.changes.did_change_targets(property.clone());
            }
            self.changes.did_change_specs(property);
        }
    }

    /// An inert spec was added at or removed from `path`.
    fn specs_changed(&mut self, stack: &LayerStackId, path: &Path, removed: bool) {
        let query = DependencyQuery {
            recurse_on_site: removed,
            ..DependencyQuery::default()
        };
        let view = self.view;
        for dependent in self.dependents(stack, path, query) {
            let index_path = dependent.index_path.clone();
            match view.prim_indexes.get(&index_path) {
                Some(index) if index.has_specs() => {
                    if removed && !index.any_specs_now() {
                        self.significant(index_path.clone(), "last spec removed");
                    } else {
                        match index.node_providing_spec(&dependent.stack, &dependent.site) {
                            Some(node) => {
                                let instance_changed = index.is_instanceable()
                                    && index.is_instance_relevant(node)
                                    && index.graph().node(node).has_specs != index.node_has_specs_now(node);
                                if instance_changed {
                                    self.significant(index_path.clone(), "instance contribution changed");
                                } else {
                                    self.changes.did_change_specs(index_path.clone());
                                }
                            }
                            None if removed => self.changes.did_change_specs(index_path.clone()),
                            None => self.changes.did_change_prims(index_path.clone()),
                        }
                    }
                }
                _ if removed => self.changes.did_change_specs(index_path.clone()),
                _ => self.significant(index_path.clone(), "spec added where none was cached"),
            }
            if removed {
                let properties: Vec<Path> = view
                    .property_indexes
                    .range(index_path.clone()..)
                    .take_while(|(p, _)| p.has_prefix(&index_path))
                    .map(|(p, _)| p.clone())
                    .collect();
                for property in properties {
                    self.changes.did_change_specs(property);
                }
            }
        }
    }
}
