//! Strata - an incremental composition cache for layered scene description
//!
//! Strata composes prims from stacks of layers connected by arcs
//! (sublayers, references, payloads, inherits, specializes, variants and
//! relocates), caches the composed results, and keeps the cache current as
//! layers are edited by recomputing only what an edit can affect.
//!
//! # Architecture
//!
//! The crate follows a strict layered architecture:
//!
//! - [`core`] - Paths, layers, change lists, relocation rules, config, logging
//! - [`cache`] - Layer stacks, prim and property indexes, dependency index
//! - [`engine`] - Change scopes: classify edits and apply them to a cache
//! - [`edit`] - Builders that compute layer edits for namespace operations
//!
//! Lower layers never reach up: `core` knows nothing about caches, and the
//! cache only learns about edits through the engine.
//!
//! # Correctness Invariants
//!
//! Strata maintains the following invariants:
//!
//! 1. A cached result equals what a fresh compute would produce
//! 2. Layer edits reach the cache only through a change scope
//! 3. An edit never invalidates a result it cannot affect
//! 4. Authored data problems are reported, never fatal

pub mod cache;
pub mod core;
pub mod edit;
pub mod engine;
