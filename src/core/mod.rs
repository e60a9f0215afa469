//! core
//!
//! Core domain types, layers and relocation rules for strata.
//!
//! # Modules
//!
//! - [`types`] - Strong types: Path, LayerId, LayerOffset
//! - [`graph`] - Arc graph of a composed result and namespace mapping
//! - [`layer`] - Layers, specs and change notifications
//! - [`relocates`] - Relocation rules and per-stack relocation tables
//! - [`config`] - Configuration schema and loading
//! - [`logging`] - Tracing subscriber setup
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Layers never notify; every edit returns its change list
//! - All computation here is deterministic

pub mod config;
pub mod graph;
pub mod layer;
pub mod logging;
pub mod relocates;
pub mod types;
