//! cache::errors
//!
//! Error types for the composition cache.
//!
//! Two classes are kept apart:
//!
//! - [`CompositionError`] is data. It describes a problem in the authored
//!   scene (a reference that resolves nowhere, a sublayer that is missing)
//!   and is returned next to a usable partial result.
//! - [`CacheError`] is API misuse. It is returned from the call that
//!   caused it and the cache is left unchanged.

use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::relocates::RelocationError;
use crate::core::types::{LayerId, LayerStackId, Path};

/// A problem found while composing. Never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompositionError {
    #[error("unresolved reference @{asset}@<{prim_path}> authored on <{site}> in @{layer}@")]
    UnresolvedReference {
        layer: LayerId,
        site: Path,
        asset: String,
        prim_path: Path,
    },

    #[error("reference from <{site}> to @{asset}@ names no prim (<{prim_path}>)")]
    UnresolvedPrimPath {
        site: Path,
        asset: String,
        prim_path: Path,
    },

    #[error("could not load sublayer @{sublayer}@ of @{layer}@")]
    InvalidSublayerPath { layer: LayerId, sublayer: String },

    #[error("sublayer @{sublayer}@ of @{layer}@ forms a cycle")]
    SublayerCycle { layer: LayerId, sublayer: String },

    #[error("{0}")]
    InvalidRelocate(RelocationError),

    #[error("opinions at <{path}> in @{layer}@ are ignored; the prim is relocated away")]
    OpinionAtRelocationSource { layer: LayerId, path: Path },

    #[error("arc cycle at <{site}> in {layer_stack}")]
    ArcCycle { layer_stack: LayerStackId, site: Path },
}

/// Misuse of the cache API.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("<{0}> is not an absolute prim path")]
    InvalidPrimPath(Path),

    #[error("<{0}> is not an absolute property path")]
    InvalidPropertyPath(Path),

    #[error("a change scope is already open on this cache")]
    ScopeAlreadyOpen,

    #[error("layer @{0}@ is not loaded")]
    UnknownLayer(LayerId),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
