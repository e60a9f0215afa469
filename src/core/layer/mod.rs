//! core::layer
//!
//! In-memory layers and the registry that resolves layer identifiers.
//!
//! # Overview
//!
//! A [`Layer`] is a mutable document of specs keyed by [`Path`] plus
//! layer-level metadata. Its content lives behind a `parking_lot::RwLock`
//! so layers can be shared between a caller and any number of caches.
//!
//! Every edit returns the [`ChangeList`] describing it. Callers hand those
//! lists to a cache's change processor; the layer itself never notifies
//! anyone.
//!
//! # Ownership
//!
//! Layers are owned by whoever created them ([`LayerHandle`] is an `Arc`).
//! The [`LayerRegistry`] only holds weak references, so a layer that nobody
//! holds disappears from lookup.
//!
//! # Example
//!
//! ```
//! use strata::core::layer::{LayerRegistry, Specifier};
//! use strata::core::types::Path;
//!
//! let registry = LayerRegistry::new();
//! let layer = registry.create_anonymous();
//! let changes = layer
//!     .create_prim_spec(&Path::new("/World/Chair").unwrap(), Specifier::Def)
//!     .unwrap();
//!
//! // The missing parent was created as an inert over.
//! let world = changes.entry(&Path::new("/World").unwrap()).unwrap();
//! assert!(world.flags.did_add_inert_prim);
//! assert!(layer.has_spec(&Path::new("/World").unwrap()));
//! ```

pub mod change;
pub mod schema;

pub use change::{ChangeBlock, ChangeEntry, ChangeFlags, ChangeList, SublayerChange};
pub use schema::{
    FieldKey, LayerMetadata, Permission, PrimSpec, PropertySpec, Reference, Spec, Specifier,
    SublayerRef,
};

use crate::core::types::{LayerId, LayerOffset, Path, TypeError};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Errors from layer edits.
#[derive(Debug, Error, PartialEq)]
pub enum LayerError {
    #[error("no spec at {0}")]
    NoSuchSpec(Path),

    #[error("cannot author a spec at '{path}': {reason}")]
    InvalidSpecPath { path: Path, reason: String },

    #[error("sublayer index {index} out of range (layer has {len} sublayers)")]
    SublayerIndex { index: usize, len: usize },

    #[error("a layer with identifier '{0}' is already open")]
    DuplicateLayer(LayerId),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Shared handle to a layer.
pub type LayerHandle = Arc<Layer>;

#[derive(Debug, Default)]
struct LayerData {
    specs: BTreeMap<Path, Spec>,
    /// Ordered prim children per prim or variant path (`/` for root prims).
    children: BTreeMap<Path, Vec<String>>,
    metadata: LayerMetadata,
    revision: u64,
}

impl LayerData {
    fn prim_mut(&mut self, path: &Path) -> Result<&mut PrimSpec, LayerError> {
        match self.specs.get_mut(path) {
            Some(Spec::Prim(prim)) => Ok(prim),
            _ => Err(LayerError::NoSuchSpec(path.clone())),
        }
    }

    fn property_mut(&mut self, path: &Path) -> Result<&mut PropertySpec, LayerError> {
        match self.specs.get_mut(path) {
            Some(Spec::Property(prop)) => Ok(prop),
            _ => Err(LayerError::NoSuchSpec(path.clone())),
        }
    }

    fn add_child_name(&mut self, path: &Path) {
        if let (Some(parent), Some(name)) = (path.parent(), path.name()) {
            if path.is_prim_path() {
                let names = self.children.entry(parent).or_default();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }

    fn remove_child_name(&mut self, path: &Path) {
        if let (Some(parent), Some(name)) = (path.parent(), path.name()) {
            if let Some(names) = self.children.get_mut(&parent) {
                names.retain(|n| *n != name);
                if names.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }

    fn subtree<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = (&'a Path, &'a Spec)> + 'a {
        self.specs
            .range(path.clone()..)
            .take_while(move |(p, _)| p.has_prefix(path))
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// A mutable scene description document.
#[derive(Debug)]
pub struct Layer {
    id: LayerId,
    data: RwLock<LayerData>,
}

impl Layer {
    fn new(id: LayerId) -> Self {
        Self {
            id,
            data: RwLock::new(LayerData::default()),
        }
    }

    pub fn id(&self) -> &LayerId {
        &self.id
    }

    pub fn identifier(&self) -> &str {
        self.id.as_str()
    }

    /// Content revision, bumped by every edit that changed something.
    pub fn revision(&self) -> u64 {
        self.data.read().revision
    }

    /// True if the layer holds no specs.
    pub fn is_empty(&self) -> bool {
        self.data.read().specs.is_empty()
    }

    pub fn has_spec(&self, path: &Path) -> bool {
        self.data.read().specs.contains_key(path)
    }

    /// True if any spec exists at `path` or below it.
    pub fn has_specs_at_or_under(&self, path: &Path) -> bool {
        self.data.read().subtree(path).next().is_some()
    }

    pub fn spec(&self, path: &Path) -> Option<Spec> {
        self.data.read().specs.get(path).cloned()
    }

    pub fn prim_spec(&self, path: &Path) -> Option<PrimSpec> {
        self.data.read().specs.get(path).and_then(Spec::as_prim).cloned()
    }

    pub fn property_spec(&self, path: &Path) -> Option<PropertySpec> {
        self.data.read().specs.get(path).and_then(Spec::as_property).cloned()
    }

    /// Authored prim child names under `path`, in authoring order.
    pub fn child_names(&self, path: &Path) -> Vec<String> {
        self.data.read().children.get(path).cloned().unwrap_or_default()
    }

    /// Property names authored on the prim at `path`.
    pub fn property_names(&self, path: &Path) -> Vec<String> {
        let data = self.data.read();
        data.subtree(path)
            .filter(|(p, spec)| p.parent().as_ref() == Some(path) && spec.as_property().is_some())
            .filter_map(|(p, _)| p.name())
            .collect()
    }

    pub fn metadata(&self) -> LayerMetadata {
        self.data.read().metadata.clone()
    }

    pub fn sublayers(&self) -> Vec<SublayerRef> {
        self.data.read().metadata.sublayers.clone()
    }

    pub fn relocates(&self) -> Vec<(Path, Path)> {
        self.data.read().metadata.relocates.clone()
    }

    pub fn default_prim(&self) -> Option<String> {
        self.data.read().metadata.default_prim.clone()
    }

    pub fn time_codes_per_second(&self) -> Option<f64> {
        self.data.read().metadata.time_codes_per_second
    }

    pub fn frames_per_second(&self) -> Option<f64> {
        self.data.read().metadata.frames_per_second
    }

    fn finish(&self, data: &mut LayerData, list: ChangeList) -> ChangeList {
        if !list.is_empty() {
            data.revision += 1;
        }
        list
    }

    // --- prim specs -----------------------------------------------------

    /// Create a prim spec, creating missing ancestors as inert overs.
    ///
    /// If a spec already exists only its specifier is updated.
    ///
    /// # Errors
    ///
    /// `InvalidSpecPath` unless `path` is an absolute prim or variant
    /// selection path, or if a property spec sits at an ancestor.
    pub fn create_prim_spec(&self, path: &Path, specifier: Specifier) -> Result<ChangeList, LayerError> {
        if !path.is_absolute() || !path.is_prim_or_variant_path() {
            return Err(LayerError::InvalidSpecPath {
                path: path.clone(),
                reason: "prim specs need an absolute prim or variant selection path".into(),
            });
        }
        let mut data = self.data.write();
        let mut list = ChangeList::new(self.id.clone());

        for ancestor in path.prefixes() {
            match data.specs.get(&ancestor) {
                Some(Spec::Prim(_)) => {}
                Some(Spec::Property(_)) => {
                    return Err(LayerError::InvalidSpecPath {
                        path: path.clone(),
                        reason: format!("{ancestor} is a property"),
                    })
                }
                None => {
                    data.specs
                        .insert(ancestor.clone(), Spec::Prim(PrimSpec::new(Specifier::Over)));
                    data.add_child_name(&ancestor);
                    list.record_flags(
                        &ancestor,
                        ChangeFlags {
                            did_add_inert_prim: true,
                            ..ChangeFlags::default()
                        },
                    );
                }
            }
        }

        match data.specs.get_mut(path) {
            Some(Spec::Prim(prim)) => {
                if prim.specifier != specifier {
                    let old = to_value(&prim.specifier);
                    prim.specifier = specifier;
                    list.record_info(path, FieldKey::Specifier, old, to_value(&specifier));
                }
            }
            Some(Spec::Property(_)) => {
                return Err(LayerError::InvalidSpecPath {
                    path: path.clone(),
                    reason: "a property spec exists at this path".into(),
                })
            }
            None => {
                let spec = PrimSpec::new(specifier);
                let inert = spec.is_inert();
                data.specs.insert(path.clone(), Spec::Prim(spec));
                data.add_child_name(path);
                list.record_flags(
                    path,
                    ChangeFlags {
                        did_add_inert_prim: inert,
                        did_add_non_inert_prim: !inert,
                        ..ChangeFlags::default()
                    },
                );
            }
        }
        Ok(self.finish(&mut data, list))
    }

    /// Create an inert over at `path` (and any missing ancestors).
    pub fn create_over(&self, path: &Path) -> Result<ChangeList, LayerError> {
        self.create_prim_spec(path, Specifier::Over)
    }

    /// Create the variant spec `prim{set=selection}` as an inert over.
    pub fn create_variant(&self, prim: &Path, set: &str, selection: &str) -> Result<ChangeList, LayerError> {
        let path = prim.append_variant_selection(set, selection)?;
        self.create_over(&path)
    }

    /// Remove the prim spec at `path` together with everything beneath it.
    ///
    /// The removal is reported once, at `path`; it counts as inert when
    /// every removed spec was inert.
    pub fn remove_prim_spec(&self, path: &Path) -> Result<ChangeList, LayerError> {
        let mut data = self.data.write();
        if data.specs.get(path).and_then(Spec::as_prim).is_none() {
            return Err(LayerError::NoSuchSpec(path.clone()));
        }
        let removed: Vec<(Path, bool)> = data
            .subtree(path)
            .map(|(p, spec)| (p.clone(), spec.is_inert()))
            .collect();
        let inert = removed.iter().all(|(_, inert)| *inert);
        for (p, _) in &removed {
            data.specs.remove(p);
            data.children.remove(p);
        }
        data.remove_child_name(path);

        let mut list = ChangeList::new(self.id.clone());
        list.record_flags(
            path,
            ChangeFlags {
                did_remove_inert_prim: inert,
                did_remove_non_inert_prim: !inert,
                ..ChangeFlags::default()
            },
        );
        Ok(self.finish(&mut data, list))
    }

    fn edit_prim<T: Serialize>(
        &self,
        path: &Path,
        key: FieldKey,
        read: impl Fn(&PrimSpec) -> T,
        write: impl FnOnce(&mut PrimSpec),
    ) -> Result<ChangeList, LayerError> {
        let mut data = self.data.write();
        let prim = data.prim_mut(path)?;
        let old = to_value(&read(prim));
        write(prim);
        let new = to_value(&read(prim));
        let mut list = ChangeList::new(self.id.clone());
        list.record_info(path, key, old, new);
        Ok(self.finish(&mut data, list))
    }

    pub fn set_specifier(&self, path: &Path, specifier: Specifier) -> Result<ChangeList, LayerError> {
        self.edit_prim(path, FieldKey::Specifier, |p| p.specifier, |p| p.specifier = specifier)
    }

    pub fn set_type_name(&self, path: &Path, type_name: Option<String>) -> Result<ChangeList, LayerError> {
        self.edit_prim(path, FieldKey::TypeName, |p| p.type_name.clone(), |p| p.type_name = type_name)
    }

    pub fn set_references(&self, path: &Path, references: Vec<Reference>) -> Result<ChangeList, LayerError> {
        self.edit_prim(path, FieldKey::References, |p| p.references.clone(), |p| p.references = references)
    }

    pub fn add_reference(&self, path: &Path, reference: Reference) -> Result<ChangeList, LayerError> {
        self.edit_prim(
            path,
            FieldKey::References,
            |p| p.references.clone(),
            |p| {
                if !p.references.contains(&reference) {
                    p.references.push(reference);
                }
            },
        )
    }

    pub fn set_payloads(&self, path: &Path, payloads: Vec<Reference>) -> Result<ChangeList, LayerError> {
        self.edit_prim(path, FieldKey::Payloads, |p| p.payloads.clone(), |p| p.payloads = payloads)
    }

    pub fn add_inherit(&self, path: &Path, class: Path) -> Result<ChangeList, LayerError> {
        self.edit_prim(
            path,
            FieldKey::InheritPaths,
            |p| p.inherits.clone(),
            |p| {
                if !p.inherits.contains(&class) {
                    p.inherits.push(class);
                }
            },
        )
    }

    pub fn set_inherits(&self, path: &Path, inherits: Vec<Path>) -> Result<ChangeList, LayerError> {
        self.edit_prim(path, FieldKey::InheritPaths, |p| p.inherits.clone(), |p| p.inherits = inherits)
    }

    pub fn add_specialize(&self, path: &Path, base: Path) -> Result<ChangeList, LayerError> {
        self.edit_prim(
            path,
            FieldKey::Specializes,
            |p| p.specializes.clone(),
            |p| {
                if !p.specializes.contains(&base) {
                    p.specializes.push(base);
                }
            },
        )
    }

    /// Add a variant set name to the prim's variant set list.
    pub fn add_variant_set(&self, path: &Path, set: &str) -> Result<ChangeList, LayerError> {
        if !crate::core::types::is_valid_identifier(set) {
            return Err(TypeError::InvalidIdentifier(set.to_string()).into());
        }
        self.edit_prim(
            path,
            FieldKey::VariantSetNames,
            |p| p.variant_sets.clone(),
            |p| {
                if !p.variant_sets.iter().any(|s| s == set) {
                    p.variant_sets.push(set.to_string());
                }
            },
        )
    }

    /// Set or clear the selection for a variant set.
    pub fn set_variant_selection(
        &self,
        path: &Path,
        set: &str,
        selection: Option<&str>,
    ) -> Result<ChangeList, LayerError> {
        self.edit_prim(
            path,
            FieldKey::VariantSelection,
            |p| p.variant_selections.clone(),
            |p| match selection {
                Some(sel) => {
                    p.variant_selections.insert(set.to_string(), sel.to_string());
                }
                None => {
                    p.variant_selections.remove(set);
                }
            },
        )
    }

    pub fn set_instanceable(&self, path: &Path, instanceable: Option<bool>) -> Result<ChangeList, LayerError> {
        self.edit_prim(path, FieldKey::Instanceable, |p| p.instanceable, |p| p.instanceable = instanceable)
    }

    pub fn set_permission(&self, path: &Path, permission: Option<Permission>) -> Result<ChangeList, LayerError> {
        self.edit_prim(path, FieldKey::Permission, |p| p.permission, |p| p.permission = permission)
    }

    pub fn set_documentation(&self, path: &Path, doc: Option<String>) -> Result<ChangeList, LayerError> {
        self.edit_prim(path, FieldKey::Documentation, |p| p.documentation.clone(), |p| p.documentation = doc)
    }

    // --- property specs -------------------------------------------------

    /// Create a property spec on an existing prim spec.
    pub fn create_property(&self, path: &Path, spec: PropertySpec) -> Result<ChangeList, LayerError> {
        if !path.is_property_path() || !path.is_absolute() {
            return Err(LayerError::InvalidSpecPath {
                path: path.clone(),
                reason: "property specs need an absolute property path".into(),
            });
        }
        let mut data = self.data.write();
        let owner = path.prim_path();
        if data.specs.get(&owner).and_then(Spec::as_prim).is_none() {
            return Err(LayerError::NoSuchSpec(owner));
        }
        let mut list = ChangeList::new(self.id.clone());
        if data.specs.contains_key(path) {
            return Ok(list);
        }
        data.specs.insert(path.clone(), Spec::Property(spec));
        list.record_flags(
            path,
            ChangeFlags {
                did_add_property: true,
                ..ChangeFlags::default()
            },
        );
        Ok(self.finish(&mut data, list))
    }

    pub fn remove_property(&self, path: &Path) -> Result<ChangeList, LayerError> {
        let mut data = self.data.write();
        data.property_mut(path)?;
        data.specs.remove(path);
        let mut list = ChangeList::new(self.id.clone());
        list.record_flags(
            path,
            ChangeFlags {
                did_remove_property: true,
                ..ChangeFlags::default()
            },
        );
        Ok(self.finish(&mut data, list))
    }

    fn edit_property<T: Serialize>(
        &self,
        path: &Path,
        key: FieldKey,
        read: impl Fn(&PropertySpec) -> T,
        write: impl FnOnce(&mut PropertySpec),
    ) -> Result<ChangeList, LayerError> {
        let mut data = self.data.write();
        let prop = data.property_mut(path)?;
        let old = to_value(&read(prop));
        write(prop);
        let new = to_value(&read(prop));
        let mut list = ChangeList::new(self.id.clone());
        list.record_info(path, key, old, new);
        Ok(self.finish(&mut data, list))
    }

    pub fn set_default_value(&self, path: &Path, value: Option<Value>) -> Result<ChangeList, LayerError> {
        self.edit_property(path, FieldKey::Default, |p| p.default.clone(), |p| p.default = value)
    }

    pub fn set_targets(&self, path: &Path, targets: Vec<Path>) -> Result<ChangeList, LayerError> {
        self.edit_property(path, FieldKey::TargetPaths, |p| p.targets.clone(), |p| p.targets = targets)
    }

    pub fn set_connections(&self, path: &Path, connections: Vec<Path>) -> Result<ChangeList, LayerError> {
        self.edit_property(
            path,
            FieldKey::ConnectionPaths,
            |p| p.connections.clone(),
            |p| p.connections = connections,
        )
    }

    // --- layer metadata -------------------------------------------------

    fn edit_metadata<T: Serialize>(
        &self,
        key: FieldKey,
        read: impl Fn(&LayerMetadata) -> T,
        write: impl FnOnce(&mut LayerMetadata),
    ) -> ChangeList {
        let mut data = self.data.write();
        let old = to_value(&read(&data.metadata));
        write(&mut data.metadata);
        let new = to_value(&read(&data.metadata));
        let mut list = ChangeList::new(self.id.clone());
        list.record_info(&Path::absolute_root(), key, old, new);
        self.finish(&mut data, list)
    }

    /// Insert a sublayer at `index` (clamped to the end of the list).
    pub fn insert_sublayer(&self, index: usize, sublayer: SublayerRef) -> ChangeList {
        let identifier = sublayer.identifier.clone();
        let mut list = self.edit_metadata(
            FieldKey::SubLayers,
            |m| m.sublayers.iter().map(|s| s.identifier.clone()).collect::<Vec<_>>(),
            |m| {
                let index = index.min(m.sublayers.len());
                m.sublayers.insert(index, sublayer);
            },
        );
        list.record_sublayer(&identifier, SublayerChange::Added);
        list
    }

    /// Append a sublayer with an identity offset.
    pub fn add_sublayer(&self, identifier: &str) -> ChangeList {
        let len = self.data.read().metadata.sublayers.len();
        self.insert_sublayer(len, SublayerRef::new(identifier))
    }

    /// Remove the first sublayer entry with `identifier`.
    pub fn remove_sublayer(&self, identifier: &str) -> ChangeList {
        let present = self
            .data
            .read()
            .metadata
            .sublayers
            .iter()
            .any(|s| s.identifier == identifier);
        if !present {
            return ChangeList::new(self.id.clone());
        }
        let mut list = self.edit_metadata(
            FieldKey::SubLayers,
            |m| m.sublayers.iter().map(|s| s.identifier.clone()).collect::<Vec<_>>(),
            |m| {
                if let Some(pos) = m.sublayers.iter().position(|s| s.identifier == identifier) {
                    m.sublayers.remove(pos);
                }
            },
        );
        list.record_sublayer(identifier, SublayerChange::Removed);
        list
    }

    /// Change the offset of the sublayer at `index`.
    pub fn set_sublayer_offset(&self, index: usize, offset: LayerOffset) -> Result<ChangeList, LayerError> {
        let len = self.data.read().metadata.sublayers.len();
        if index >= len {
            return Err(LayerError::SublayerIndex { index, len });
        }
        Ok(self.edit_metadata(
            FieldKey::SubLayerOffsets,
            |m| m.sublayers.iter().map(|s| s.offset).collect::<Vec<_>>(),
            |m| m.sublayers[index].offset = offset,
        ))
    }

    pub fn set_time_codes_per_second(&self, tcps: Option<f64>) -> ChangeList {
        self.edit_metadata(
            FieldKey::TimeCodesPerSecond,
            |m| m.time_codes_per_second,
            |m| m.time_codes_per_second = tcps,
        )
    }

    pub fn set_frames_per_second(&self, fps: Option<f64>) -> ChangeList {
        self.edit_metadata(
            FieldKey::FramesPerSecond,
            |m| m.frames_per_second,
            |m| m.frames_per_second = fps,
        )
    }

    pub fn set_default_prim(&self, name: Option<&str>) -> ChangeList {
        self.edit_metadata(
            FieldKey::DefaultPrim,
            |m| m.default_prim.clone(),
            |m| m.default_prim = name.map(str::to_string),
        )
    }

    /// Replace the layer's authored relocates.
    pub fn set_relocates(&self, relocates: Vec<(Path, Path)>) -> ChangeList {
        self.edit_metadata(
            FieldKey::LayerRelocates,
            |m| m.relocates.clone(),
            |m| m.relocates = relocates,
        )
    }
}

/// Resolves layer identifiers to live layers.
///
/// Holds layers weakly; a layer dropped by its owners can no longer be
/// found.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: RwLock<HashMap<LayerId, Weak<Layer>>>,
}

impl LayerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a layer with the given identifier.
    ///
    /// # Errors
    ///
    /// `DuplicateLayer` if a live layer already uses the identifier.
    pub fn create(&self, identifier: &str) -> Result<LayerHandle, LayerError> {
        let id = LayerId::new(identifier)?;
        let mut layers = self.layers.write();
        layers.retain(|_, weak| weak.strong_count() > 0);
        if layers.contains_key(&id) {
            return Err(LayerError::DuplicateLayer(id));
        }
        let layer = Arc::new(Layer::new(id.clone()));
        layers.insert(id, Arc::downgrade(&layer));
        Ok(layer)
    }

    /// Create a layer with a fresh anonymous identifier.
    pub fn create_anonymous(&self) -> LayerHandle {
        let layer = Arc::new(Layer::new(LayerId::anonymous()));
        self.layers
            .write()
            .insert(layer.id().clone(), Arc::downgrade(&layer));
        layer
    }

    pub fn find(&self, id: &LayerId) -> Option<LayerHandle> {
        self.layers.read().get(id).and_then(Weak::upgrade)
    }

    /// Find a layer by identifier text.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<LayerHandle> {
        LayerId::new(identifier).ok().and_then(|id| self.find(&id))
    }

    /// Number of layers still alive.
    pub fn live_count(&self) -> usize {
        self.layers
            .read()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
