//! edit
//!
//! Builders that compute layer edits for namespace operations.
//!
//! A builder reads a layer stack, accepts a sequence of requests, and
//! produces the per-layer values a caller must author to realize them. It
//! never writes to a layer itself; applying the edits (and sending the
//! resulting change lists through a change scope) is left to the caller.

pub mod relocates;

pub use relocates::{EditBuilderError, LayerRelocatesEditBuilder, RelocateRefusal};
