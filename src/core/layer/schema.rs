//! core::layer::schema
//!
//! Authored spec records and the field keys used in change notifications.
//!
//! Prim specs live at prim paths and at variant selection paths (a variant
//! is stored as an `over` prim spec at `/Prim{set=selection}`). Property
//! specs live at property paths.

use crate::core::types::{LayerOffset, Path};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a prim spec contributes to the composed prim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specifier {
    Def,
    Over,
    Class,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Public,
    Private,
}

/// Target of a reference or payload arc.
///
/// An empty `asset` is an internal reference into the authoring layer
/// stack; an empty `prim_path` targets the layer's default prim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub asset: String,
    pub prim_path: Path,
    #[serde(default)]
    pub offset: LayerOffset,
}

impl Reference {
    pub fn new(asset: impl Into<String>, prim_path: Path) -> Self {
        Self {
            asset: asset.into(),
            prim_path,
            offset: LayerOffset::identity(),
        }
    }

    /// Reference into the authoring layer stack.
    pub fn internal(prim_path: Path) -> Self {
        Self::new(String::new(), prim_path)
    }

    /// Reference to another layer's default prim.
    pub fn to_default_prim(asset: impl Into<String>) -> Self {
        Self::new(asset, Path::empty())
    }

    pub fn with_offset(mut self, offset: LayerOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn is_internal(&self) -> bool {
        self.asset.is_empty()
    }
}

/// Authored opinions for one prim in one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimSpec {
    pub specifier: Specifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payloads: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inherits: Vec<Path>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specializes: Vec<Path>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variant_sets: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variant_selections: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instanceable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

impl PrimSpec {
    pub fn new(specifier: Specifier) -> Self {
        Self {
            specifier,
            type_name: None,
            references: Vec::new(),
            payloads: Vec::new(),
            inherits: Vec::new(),
            specializes: Vec::new(),
            variant_sets: Vec::new(),
            variant_selections: BTreeMap::new(),
            instanceable: None,
            permission: None,
            documentation: None,
        }
    }

    /// An `over` with no authored fields.
    pub fn is_inert(&self) -> bool {
        *self == PrimSpec::new(Specifier::Over)
    }
}

/// Authored opinions for one property in one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Path>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Path>,
}

impl PropertySpec {
    pub fn with_default(value: serde_json::Value) -> Self {
        Self {
            default: Some(value),
            ..Self::default()
        }
    }

    pub fn is_inert(&self) -> bool {
        self.default.is_none() && self.targets.is_empty() && self.connections.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Spec {
    Prim(PrimSpec),
    Property(PropertySpec),
}

impl Spec {
    pub fn as_prim(&self) -> Option<&PrimSpec> {
        match self {
            Spec::Prim(prim) => Some(prim),
            Spec::Property(_) => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertySpec> {
        match self {
            Spec::Property(prop) => Some(prop),
            Spec::Prim(_) => None,
        }
    }

    pub fn is_inert(&self) -> bool {
        match self {
            Spec::Prim(prim) => prim.is_inert(),
            Spec::Property(prop) => prop.is_inert(),
        }
    }
}

/// A sublayer entry of a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SublayerRef {
    pub identifier: String,
    #[serde(default)]
    pub offset: LayerOffset,
}

impl SublayerRef {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            offset: LayerOffset::identity(),
        }
    }

    pub fn with_offset(identifier: impl Into<String>, offset: LayerOffset) -> Self {
        Self {
            identifier: identifier.into(),
            offset,
        }
    }
}

/// Layer-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    #[serde(default)]
    pub sublayers: Vec<SublayerRef>,
    /// Authored `(source, target)` pairs; an empty target deletes the source.
    #[serde(default)]
    pub relocates: Vec<(Path, Path)>,
    #[serde(default)]
    pub time_codes_per_second: Option<f64>,
    #[serde(default)]
    pub frames_per_second: Option<f64>,
    #[serde(default)]
    pub default_prim: Option<String>,
}

impl LayerMetadata {
    /// Effective time codes per second: authored TCPS, else FPS, else `fallback`.
    pub fn effective_tcps(&self, fallback: f64) -> f64 {
        self.time_codes_per_second
            .or(self.frames_per_second)
            .unwrap_or(fallback)
    }
}

/// Field named by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldKey {
    Specifier,
    TypeName,
    References,
    Payloads,
    InheritPaths,
    Specializes,
    VariantSetNames,
    VariantSelection,
    Instanceable,
    Permission,
    Documentation,
    Default,
    TargetPaths,
    ConnectionPaths,
    SubLayers,
    SubLayerOffsets,
    TimeCodesPerSecond,
    FramesPerSecond,
    DefaultPrim,
    LayerRelocates,
}

impl FieldKey {
    /// Fields whose edit changes the arcs that make up a composed prim.
    pub fn affects_prim_composition(self) -> bool {
        matches!(
            self,
            FieldKey::References
                | FieldKey::Payloads
                | FieldKey::InheritPaths
                | FieldKey::Specializes
                | FieldKey::VariantSetNames
                | FieldKey::VariantSelection
                | FieldKey::Instanceable
                | FieldKey::Permission
        )
    }

    /// Layer-level fields that feed the layer stack's time mapping.
    pub fn affects_time_mapping(self) -> bool {
        matches!(
            self,
            FieldKey::SubLayerOffsets | FieldKey::TimeCodesPerSecond | FieldKey::FramesPerSecond
        )
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
