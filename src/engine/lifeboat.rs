//! engine::lifeboat
//!
//! Strong references kept alive until a change scope closes.
//!
//! Swapping a recomputed layer stack in, or removing the last result that
//! used a stack, can drop the last strong reference to layers the caller no
//! longer holds. The lifeboat takes those references so that results
//! recomputed inside the same scope still see the content as it was before
//! the edit.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::cache::layer_stack::{LayerStack, LayerStackData};
use crate::core::layer::LayerHandle;
use crate::core::types::LayerId;

#[derive(Debug, Default)]
pub struct Lifeboat {
    stacks: Vec<Arc<LayerStack>>,
    layers: Vec<LayerHandle>,
    seen: HashSet<LayerId>,
}

impl Lifeboat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold_stack(&mut self, stack: Arc<LayerStack>) {
        self.stacks.push(stack);
    }

    pub fn hold_layer(&mut self, layer: LayerHandle) {
        if self.seen.insert(layer.id().clone()) {
            self.layers.push(layer);
        }
    }

    /// Keep the layers of a replaced stack snapshot.
    pub fn hold_data(&mut self, data: LayerStackData) {
        for layer in data.layers {
            self.hold_layer(layer);
        }
    }

    pub fn holds_layer(&self, id: &LayerId) -> bool {
        self.seen.contains(id)
    }

    pub fn stack_count(&self) -> usize {
        self.stacks.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty() && self.layers.is_empty()
    }

    /// Drop everything held.
    pub fn release(&mut self) {
        if !self.is_empty() {
            debug!(stacks = self.stacks.len(), layers = self.layers.len(), "releasing lifeboat");
        }
        self.stacks.clear();
        self.layers.clear();
        self.seen.clear();
    }
}
