//! cache::layer_stack
//!
//! Layer stacks: the ordered layers one composition site reads from.
//!
//! # Architecture
//!
//! A [`LayerStack`] is identified by a [`LayerStackId`] and owns a
//! [`LayerStackData`] snapshot behind a `parking_lot::RwLock`. The snapshot
//! is rebuilt from the layers whenever sublayers, time codes or relocates
//! change; the change processor swaps it in place so that every prim index
//! holding the stack sees the new data.
//!
//! Build order is the session layer and its sublayers, then the root layer
//! and its sublayers, depth first. A layer reached twice is kept at its
//! first (strongest) position.
//!
//! # Time scaling
//!
//! Every layer has an effective rate: authored time codes per second, else
//! frames per second, else the configured fallback. The stack rate prefers
//! the session's authored TCPS, then the root's, then the session's FPS,
//! then the root's, then the fallback. Root and session layers map into the
//! stack with scale `stack / layer`; a sublayer composes its authored offset
//! scaled by `parent / sublayer` onto its parent's offset.
//!
//! # Invariants
//!
//! - `layers`, `offsets` and `layer_tcps` have equal length
//! - A layer appears at most once
//! - Muted identifiers never contribute a layer

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

use super::errors::CompositionError;
use crate::core::layer::{LayerHandle, LayerRegistry, PrimSpec};
use crate::core::relocates::RelocationTable;
use crate::core::types::{LayerId, LayerOffset, LayerStackId, Path};

/// Everything computed for a layer stack.
#[derive(Debug, Clone)]
pub struct LayerStackData {
    pub layers: Vec<LayerHandle>,
    /// Per layer, maps layer time into stack time.
    pub offsets: Vec<LayerOffset>,
    pub layer_tcps: Vec<f64>,
    pub tcps: f64,
    pub relocations: RelocationTable,
    pub local_errors: Vec<CompositionError>,
    /// Sublayer identifiers that could not be resolved.
    pub invalid_sublayers: BTreeSet<String>,
}

struct Builder<'a> {
    registry: &'a LayerRegistry,
    muted: &'a BTreeSet<String>,
    fallback_tcps: f64,
    seen: HashSet<LayerId>,
    data: LayerStackData,
}

impl Builder<'_> {
    fn add_tree(&mut self, layer: LayerHandle, offset: LayerOffset, chain: &mut Vec<LayerId>) {
        if !self.seen.insert(layer.id().clone()) {
            return;
        }
        let tcps = layer.metadata().effective_tcps(self.fallback_tcps);
        self.data.layers.push(layer.clone());
        self.data.offsets.push(offset);
        self.data.layer_tcps.push(tcps);

        chain.push(layer.id().clone());
        for sublayer in layer.sublayers() {
            if self.muted.contains(&sublayer.identifier) {
                continue;
            }
            let Some(found) = self.registry.find_by_identifier(&sublayer.identifier) else {
                self.data.invalid_sublayers.insert(sublayer.identifier.clone());
                self.data.local_errors.push(CompositionError::InvalidSublayerPath {
                    layer: layer.id().clone(),
                    sublayer: sublayer.identifier.clone(),
                });
                continue;
            };
            if chain.contains(found.id()) {
                self.data.local_errors.push(CompositionError::SublayerCycle {
                    layer: layer.id().clone(),
                    sublayer: sublayer.identifier.clone(),
                });
                continue;
            }
            let sub_tcps = found.metadata().effective_tcps(self.fallback_tcps);
            let sub_offset = offset.compose(&sublayer.offset.scaled(tcps / sub_tcps));
            self.add_tree(found, sub_offset, chain);
        }
        chain.pop();
    }
}

impl LayerStackData {
    /// Build the stack for `id` from the layers currently in `registry`.
    pub fn build(
        id: &LayerStackId,
        registry: &LayerRegistry,
        muted: &BTreeSet<String>,
        fallback_tcps: f64,
    ) -> Self {
        let root = registry.find(&id.root);
        let session = id.session.as_ref().and_then(|s| registry.find(s));

        let authored_tcps = |layer: &Option<LayerHandle>| layer.as_ref().and_then(|l| l.time_codes_per_second());
        let authored_fps = |layer: &Option<LayerHandle>| layer.as_ref().and_then(|l| l.frames_per_second());
        let tcps = authored_tcps(&session)
            .or_else(|| authored_tcps(&root))
            .or_else(|| authored_fps(&session))
            .or_else(|| authored_fps(&root))
            .unwrap_or(fallback_tcps);

        let mut builder = Builder {
            registry,
            muted,
            fallback_tcps,
            seen: HashSet::new(),
            data: LayerStackData {
                layers: Vec::new(),
                offsets: Vec::new(),
                layer_tcps: Vec::new(),
                tcps,
                relocations: RelocationTable::default(),
                local_errors: Vec::new(),
                invalid_sublayers: BTreeSet::new(),
            },
        };

        for layer in [session, root.clone()].into_iter().flatten() {
            let layer_tcps = layer.metadata().effective_tcps(fallback_tcps);
            let offset = LayerOffset::identity().scaled(tcps / layer_tcps);
            builder.add_tree(layer, offset, &mut Vec::new());
        }
        if root.is_none() {
            builder.data.local_errors.push(CompositionError::InvalidSublayerPath {
                layer: id.root.clone(),
                sublayer: id.root.to_string(),
            });
        }

        let mut data = builder.data;
        data.relocations = RelocationTable::compute(
            data.layers.iter().map(|l| (l.id().clone(), l.relocates())),
        );
        data.local_errors.extend(
            data.relocations
                .errors()
                .iter()
                .cloned()
                .map(CompositionError::InvalidRelocate),
        );
        debug!(stack = %id, layers = data.layers.len(), "built layer stack");
        data
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id().clone()).collect()
    }

    /// True if both snapshots hold the same layers in the same order.
    pub fn same_layers(&self, other: &LayerStackData) -> bool {
        self.layer_ids() == other.layer_ids()
    }

    /// True if the stack rate differs, or if any layer present in both
    /// snapshots maps into the stack differently.
    pub fn time_mapping_differs(&self, other: &LayerStackData) -> bool {
        let rate_differs = |a: f64, b: f64| (a - b).abs() > 1e-9;
        if rate_differs(self.tcps, other.tcps) {
            return true;
        }
        self.layers.iter().enumerate().any(|(i, layer)| {
            other
                .layers
                .iter()
                .position(|l| l.id() == layer.id())
                .is_some_and(|j| {
                    self.offsets[i] != other.offsets[j] || rate_differs(self.layer_tcps[i], other.layer_tcps[j])
                })
        })
    }
}

/// A shared, recomputable layer stack.
#[derive(Debug)]
pub struct LayerStack {
    id: LayerStackId,
    data: RwLock<LayerStackData>,
}

impl LayerStack {
    pub fn new(id: LayerStackId, data: LayerStackData) -> Self {
        Self {
            id,
            data: RwLock::new(data),
        }
    }

    pub fn id(&self) -> &LayerStackId {
        &self.id
    }

    pub fn layers(&self) -> Vec<LayerHandle> {
        self.data.read().layers.clone()
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.data.read().layer_ids()
    }

    pub fn root_layer(&self) -> Option<LayerHandle> {
        self.data
            .read()
            .layers
            .iter()
            .find(|l| *l.id() == self.id.root)
            .cloned()
    }

    pub fn has_layer(&self, id: &LayerId) -> bool {
        self.data.read().layers.iter().any(|l| l.id() == id)
    }

    /// Time mapping from `layer` into this stack.
    pub fn layer_offset(&self, layer: &LayerId) -> Option<LayerOffset> {
        let data = self.data.read();
        let index = data.layers.iter().position(|l| l.id() == layer)?;
        data.offsets.get(index).copied()
    }

    pub fn layer_tcps(&self, layer: &LayerId) -> Option<f64> {
        let data = self.data.read();
        let index = data.layers.iter().position(|l| l.id() == layer)?;
        data.layer_tcps.get(index).copied()
    }

    pub fn time_codes_per_second(&self) -> f64 {
        self.data.read().tcps
    }

    pub fn relocations(&self) -> MappedRwLockReadGuard<'_, RelocationTable> {
        RwLockReadGuard::map(self.data.read(), |d| &d.relocations)
    }

    pub fn incremental_relocates_source_to_target(&self) -> BTreeMap<Path, Path> {
        self.data.read().relocations.incremental_source_to_target().clone()
    }

    /// Errors found while building the stack: sublayers and relocates.
    pub fn local_errors(&self) -> Vec<CompositionError> {
        self.data.read().local_errors.clone()
    }

    pub fn invalid_sublayers(&self) -> BTreeSet<String> {
        self.data.read().invalid_sublayers.clone()
    }

    /// True if any layer has a spec at `path`.
    pub fn has_spec_at(&self, path: &Path) -> bool {
        self.data.read().layers.iter().any(|l| l.has_spec(path))
    }

    /// Prim specs at `path`, strongest layer first.
    pub fn prim_specs_at(&self, path: &Path) -> Vec<(LayerId, PrimSpec)> {
        self.data
            .read()
            .layers
            .iter()
            .filter_map(|l| l.prim_spec(path).map(|spec| (l.id().clone(), spec)))
            .collect()
    }

    /// Layers with any spec at `path`, strongest first.
    pub fn layers_with_spec(&self, path: &Path) -> Vec<LayerId> {
        self.data
            .read()
            .layers
            .iter()
            .filter(|l| l.has_spec(path))
            .map(|l| l.id().clone())
            .collect()
    }

    pub fn snapshot(&self) -> LayerStackData {
        self.data.read().clone()
    }

    /// Swap in freshly built data, returning the previous snapshot.
    pub(crate) fn replace_data(&self, data: LayerStackData) -> LayerStackData {
        std::mem::replace(&mut *self.data.write(), data)
    }
}
