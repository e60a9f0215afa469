//! core::layer::change
//!
//! Structured notifications describing layer edits.
//!
//! # Architecture
//!
//! Every mutating [`Layer`](super::Layer) method returns a [`ChangeList`]
//! recording, per path, which fields changed (with old and new values) and
//! which specs were added or removed. Layer-level metadata (sublayers,
//! time codes, default prim, relocates) is recorded at `/`.
//!
//! A [`ChangeBlock`] groups change lists so that related edits, such as
//! setting two time-code fields together, are classified jointly.
//!
//! # Invariants
//!
//! - An info entry whose old and new values are equal is dropped on merge
//! - A change list only ever describes one layer

use super::schema::FieldKey;
use crate::core::types::{LayerId, Path};
use serde_json::Value;
use std::collections::BTreeMap;

/// Spec add/remove flags for one path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    pub did_add_inert_prim: bool,
    pub did_add_non_inert_prim: bool,
    pub did_remove_inert_prim: bool,
    pub did_remove_non_inert_prim: bool,
    pub did_add_property: bool,
    pub did_remove_property: bool,
    pub did_reorder_children: bool,
}

impl ChangeFlags {
    pub fn did_add_or_remove_prim(&self) -> bool {
        self.did_add_inert_prim
            || self.did_add_non_inert_prim
            || self.did_remove_inert_prim
            || self.did_remove_non_inert_prim
    }

    pub fn did_add_or_remove_property(&self) -> bool {
        self.did_add_property || self.did_remove_property
    }

    fn merge(&mut self, other: &ChangeFlags) {
        self.did_add_inert_prim |= other.did_add_inert_prim;
        self.did_add_non_inert_prim |= other.did_add_non_inert_prim;
        self.did_remove_inert_prim |= other.did_remove_inert_prim;
        self.did_remove_non_inert_prim |= other.did_remove_non_inert_prim;
        self.did_add_property |= other.did_add_property;
        self.did_remove_property |= other.did_remove_property;
        self.did_reorder_children |= other.did_reorder_children;
    }
}

/// A sublayer entry added to or removed from a layer's sublayer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SublayerChange {
    Added,
    Removed,
}

/// Everything that changed at one path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeEntry {
    /// Changed fields with `(old, new)` values; `Null` means unauthored.
    pub info_changed: BTreeMap<FieldKey, (Value, Value)>,
    pub flags: ChangeFlags,
    pub sublayer_changes: Vec<(String, SublayerChange)>,
}

impl ChangeEntry {
    pub fn has_info_change(&self, key: FieldKey) -> bool {
        self.info_changed.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.info_changed.is_empty()
            && self.flags == ChangeFlags::default()
            && self.sublayer_changes.is_empty()
    }

    fn merge(&mut self, other: ChangeEntry) {
        for (key, (old, new)) in other.info_changed {
            match self.info_changed.get_mut(&key) {
                Some(existing) => existing.1 = new,
                None => {
                    self.info_changed.insert(key, (old, new));
                }
            }
        }
        self.info_changed.retain(|_, (old, new)| old != new);
        self.flags.merge(&other.flags);
        self.sublayer_changes.extend(other.sublayer_changes);
    }
}

/// Changes made to a single layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeList {
    layer: LayerId,
    entries: BTreeMap<Path, ChangeEntry>,
}

impl ChangeList {
    pub fn new(layer: LayerId) -> Self {
        Self {
            layer,
            entries: BTreeMap::new(),
        }
    }

    pub fn layer(&self) -> &LayerId {
        &self.layer
    }

    pub fn entries(&self) -> &BTreeMap<Path, ChangeEntry> {
        &self.entries
    }

    pub fn entry(&self, path: &Path) -> Option<&ChangeEntry> {
        self.entries.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entry_mut(&mut self, path: &Path) -> &mut ChangeEntry {
        self.entries.entry(path.clone()).or_default()
    }

    /// Record a field change; a no-op when the values are equal.
    pub fn record_info(&mut self, path: &Path, key: FieldKey, old: Value, new: Value) {
        if old == new {
            return;
        }
        let mut entry = ChangeEntry::default();
        entry.info_changed.insert(key, (old, new));
        self.merge_entry(path, entry);
    }

    pub fn record_flags(&mut self, path: &Path, flags: ChangeFlags) {
        let entry = ChangeEntry {
            flags,
            ..ChangeEntry::default()
        };
        self.merge_entry(path, entry);
    }

    pub fn record_sublayer(&mut self, identifier: &str, change: SublayerChange) {
        let entry = ChangeEntry {
            sublayer_changes: vec![(identifier.to_string(), change)],
            ..ChangeEntry::default()
        };
        self.merge_entry(&Path::absolute_root(), entry);
    }

    fn merge_entry(&mut self, path: &Path, entry: ChangeEntry) {
        self.entry_mut(path).merge(entry);
        if self.entries.get(path).is_some_and(ChangeEntry::is_empty) {
            self.entries.remove(path);
        }
    }

    /// Fold a later change list for the same layer into this one.
    ///
    /// Lists for other layers are ignored.
    pub fn merge(&mut self, other: ChangeList) {
        if other.layer != self.layer {
            return;
        }
        for (path, entry) in other.entries {
            self.merge_entry(&path, entry);
        }
    }
}

/// A batch of change lists classified together.
///
/// # Example
///
/// ```
/// use strata::core::layer::{ChangeBlock, LayerRegistry};
///
/// let registry = LayerRegistry::new();
/// let layer = registry.create_anonymous();
/// let mut block = ChangeBlock::new();
/// block.push(layer.set_time_codes_per_second(Some(48.0)));
/// block.push(layer.set_frames_per_second(None));
/// assert_eq!(block.lists().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChangeBlock {
    lists: Vec<ChangeList>,
}

impl ChangeBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a change list, merging it with an earlier list for the same layer.
    pub fn push(&mut self, list: ChangeList) {
        if list.is_empty() {
            return;
        }
        match self.lists.iter_mut().find(|l| l.layer == list.layer) {
            Some(existing) => existing.merge(list),
            None => self.lists.push(list),
        }
    }

    pub fn lists(&self) -> &[ChangeList] {
        &self.lists
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(ChangeList::is_empty)
    }
}

impl From<ChangeList> for ChangeBlock {
    fn from(list: ChangeList) -> Self {
        let mut block = ChangeBlock::new();
        block.push(list);
        block
    }
}

impl FromIterator<ChangeList> for ChangeBlock {
    fn from_iter<I: IntoIterator<Item = ChangeList>>(iter: I) -> Self {
        let mut block = ChangeBlock::new();
        for list in iter {
            block.push(list);
        }
        block
    }
}
