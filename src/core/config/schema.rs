//! core::config::schema
//!
//! The settings a cache reads from its config file.
//!
//! # Validation
//!
//! Config values are validated after parsing: the fallback time-code rate
//! must be a positive finite number and the arc depth limit must be
//! non-zero.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Time codes per second assumed when no layer authors one.
pub const DEFAULT_FALLBACK_TCPS: f64 = 24.0;

/// Default bound on the number of arcs between a result's root and any node.
pub const DEFAULT_MAX_ARC_DEPTH: usize = 64;

/// Settings for a composition cache.
///
/// # Example
///
/// ```toml
/// fallback_tcps = 24.0
/// instancing = true
/// max_arc_depth = 64
/// log_filter = "strata=debug"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Time codes per second used when neither TCPS nor FPS is authored.
    pub fallback_tcps: f64,

    /// Whether `instanceable` opinions make results instances.
    pub instancing: bool,

    /// Maximum arc chain length before composition reports a cycle.
    pub max_arc_depth: usize,

    /// Tracing filter directive used by `core::logging::init`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fallback_tcps: DEFAULT_FALLBACK_TCPS,
            instancing: false,
            max_arc_depth: DEFAULT_MAX_ARC_DEPTH,
            log_filter: None,
        }
    }
}

impl CacheConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fallback_tcps.is_finite() || self.fallback_tcps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "fallback_tcps must be a positive number, got {}",
                self.fallback_tcps
            )));
        }
        if self.max_arc_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_arc_depth must be at least 1".to_string(),
            ));
        }
        if let Some(filter) = &self.log_filter {
            if filter.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "log_filter cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Builder-style toggle for instancing.
    pub fn with_instancing(mut self, instancing: bool) -> Self {
        self.instancing = instancing;
        self
    }
}
