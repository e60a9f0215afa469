//! core::types
//!
//! Strong types for namespace addressing and time mapping.
//!
//! # Types
//!
//! - [`Path`] - Hierarchical address of a prim, variant selection or property
//! - [`PathElement`] - One component of a [`Path`]
//! - [`LayerId`] - Stable identifier of a layer
//! - [`LayerStackId`] - Identity of a composed layer stack
//! - [`LayerOffset`] - Affine time mapping between layers
//!
//! # Validation
//!
//! Paths and layer ids are validated at construction time. Malformed text
//! is rejected with a [`TypeError`], so every `Path` in the system is
//! well formed.
//!
//! # Ordering
//!
//! `Path` orders element by element. A path sorts directly before all of
//! its descendants and the descendants form one contiguous run, which lets
//! ordered maps answer subtree queries with a single range scan.
//!
//! # Examples
//!
//! ```
//! use strata::core::types::Path;
//!
//! let path = Path::new("/Model{lod=high}Geom.points").unwrap();
//! assert!(path.is_property_path());
//! assert_eq!(path.prim_path().to_string(), "/Model{lod=high}Geom");
//! assert_eq!(path.strip_all_variant_selections().to_string(), "/Model/Geom.points");
//!
//! assert!(Path::new("/Bad Name").is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid layer id: {0}")]
    InvalidLayerId(String),

    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),
}

/// Check that `name` is a valid namespace identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_property_name(name: &str) -> bool {
    !name.is_empty() && name.split(':').all(is_valid_identifier)
}

fn is_valid_selection(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '|')
}

/// One component of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathElement {
    /// A prim name, e.g. `Model`.
    Prim(String),
    /// A variant selection, e.g. `{lod=high}`.
    VariantSelection { set: String, selection: String },
    /// A property name, e.g. `.points`.
    Property(String),
}

/// A validated hierarchical address.
///
/// Paths are immutable and cheap to clone. The empty path and the
/// absolute root `/` are distinct values.
///
/// # Example
///
/// ```
/// use strata::core::types::Path;
///
/// let a = Path::new("/World/A").unwrap();
/// let b = a.append_child("B").unwrap();
/// assert_eq!(b.to_string(), "/World/A/B");
/// assert!(b.has_prefix(&a));
///
/// let moved = b.replace_prefix(&a, &Path::new("/World/C").unwrap()).unwrap();
/// assert_eq!(moved.to_string(), "/World/C/B");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    absolute: bool,
    elements: Arc<[PathElement]>,
}

impl Path {
    /// Parse and validate a path.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidPath` if the text is not a well-formed path.
    pub fn new(text: impl AsRef<str>) -> Result<Self, TypeError> {
        PathParser::new(text.as_ref()).parse()
    }

    /// The empty path.
    pub fn empty() -> Self {
        Self::from_parts(false, Vec::new())
    }

    /// The absolute root path `/`.
    pub fn absolute_root() -> Self {
        Self::from_parts(true, Vec::new())
    }

    fn from_parts(absolute: bool, elements: Vec<PathElement>) -> Self {
        Self {
            absolute,
            elements: elements.into(),
        }
    }

    fn with_element(&self, element: PathElement) -> Self {
        let mut elements = self.elements.to_vec();
        elements.push(element);
        Self::from_parts(self.absolute, elements)
    }

    /// The path's elements, root first.
    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        !self.absolute && self.elements.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_absolute_root(&self) -> bool {
        self.absolute && self.elements.is_empty()
    }

    /// Number of elements below the root.
    pub fn depth(&self) -> usize {
        self.elements.len()
    }

    fn last(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    /// True for paths whose final element is a prim name.
    pub fn is_prim_path(&self) -> bool {
        matches!(self.last(), Some(PathElement::Prim(_)))
    }

    /// True for paths whose final element is a variant selection.
    pub fn is_prim_variant_selection_path(&self) -> bool {
        matches!(self.last(), Some(PathElement::VariantSelection { .. }))
    }

    /// True for prim paths and prim variant selection paths.
    pub fn is_prim_or_variant_path(&self) -> bool {
        self.is_prim_path() || self.is_prim_variant_selection_path()
    }

    pub fn is_property_path(&self) -> bool {
        matches!(self.last(), Some(PathElement::Property(_)))
    }

    /// True for absolute single-element prim paths like `/World`.
    pub fn is_root_prim_path(&self) -> bool {
        self.absolute && self.elements.len() == 1 && self.is_prim_path()
    }

    pub fn contains_variant_selection(&self) -> bool {
        self.elements
            .iter()
            .any(|e| matches!(e, PathElement::VariantSelection { .. }))
    }

    /// The path with its last element removed.
    ///
    /// The parent of a root prim is `/`; the root and the empty path have
    /// no parent.
    pub fn parent(&self) -> Option<Path> {
        if self.elements.is_empty() {
            return None;
        }
        let elements = self.elements[..self.elements.len() - 1].to_vec();
        Some(Self::from_parts(self.absolute, elements))
    }

    /// Name of the final element (prim name, property name or `set=selection`).
    pub fn name(&self) -> Option<String> {
        self.last().map(|e| match e {
            PathElement::Prim(name) | PathElement::Property(name) => name.clone(),
            PathElement::VariantSelection { set, selection } => format!("{set}={selection}"),
        })
    }

    /// Append a prim child.
    ///
    /// # Errors
    ///
    /// Fails when `name` is not an identifier or this path is a property path.
    pub fn append_child(&self, name: &str) -> Result<Path, TypeError> {
        if !is_valid_identifier(name) {
            return Err(TypeError::InvalidIdentifier(name.to_string()));
        }
        if self.is_property_path() {
            return Err(self.invalid("cannot append a child to a property path"));
        }
        Ok(self.with_element(PathElement::Prim(name.to_string())))
    }

    /// Append a property.
    ///
    /// # Errors
    ///
    /// Fails when `name` is not a property name or this path is not a prim
    /// or variant selection path.
    pub fn append_property(&self, name: &str) -> Result<Path, TypeError> {
        if !is_valid_property_name(name) {
            return Err(TypeError::InvalidIdentifier(name.to_string()));
        }
        if !self.is_prim_or_variant_path() {
            return Err(self.invalid("properties can only be appended to prim paths"));
        }
        Ok(self.with_element(PathElement::Property(name.to_string())))
    }

    /// Append a variant selection.
    ///
    /// # Errors
    ///
    /// Fails when the names are malformed or this path is not a prim or
    /// variant selection path.
    pub fn append_variant_selection(&self, set: &str, selection: &str) -> Result<Path, TypeError> {
        if !is_valid_identifier(set) {
            return Err(TypeError::InvalidIdentifier(set.to_string()));
        }
        if !is_valid_selection(selection) {
            return Err(TypeError::InvalidIdentifier(selection.to_string()));
        }
        if !self.is_prim_or_variant_path() {
            return Err(self.invalid("variant selections can only follow prims"));
        }
        Ok(self.with_element(PathElement::VariantSelection {
            set: set.to_string(),
            selection: selection.to_string(),
        }))
    }

    /// Append the final element of `other`, used to carry a child name
    /// across namespaces.
    pub fn append_element(&self, element: &PathElement) -> Path {
        self.with_element(element.clone())
    }

    /// True if `prefix` is this path or one of its ancestors.
    ///
    /// Absolute and relative paths never prefix each other. The empty path
    /// prefixes nothing.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        if prefix.is_empty() || self.absolute != prefix.absolute {
            return false;
        }
        self.elements.len() >= prefix.elements.len()
            && self.elements[..prefix.elements.len()] == prefix.elements[..]
    }

    /// Replace `old` at the head of this path with `new`.
    ///
    /// Returns `None` when `old` is not a prefix of this path or the result
    /// would be malformed (a property replaced by a property parent).
    pub fn replace_prefix(&self, old: &Path, new: &Path) -> Option<Path> {
        if !self.has_prefix(old) {
            return None;
        }
        if new.is_empty() {
            return None;
        }
        let tail = &self.elements[old.elements.len()..];
        if new.is_property_path() && !tail.is_empty() {
            return None;
        }
        let mut elements = new.elements.to_vec();
        elements.extend_from_slice(tail);
        Some(Self::from_parts(new.absolute, elements))
    }

    /// All proper ancestors from the outermost inwards, excluding the root.
    pub fn prefixes(&self) -> Vec<Path> {
        (1..self.elements.len())
            .map(|n| Self::from_parts(self.absolute, self.elements[..n].to_vec()))
            .collect()
    }

    /// Drop every variant selection element.
    pub fn strip_all_variant_selections(&self) -> Path {
        if !self.contains_variant_selection() {
            return self.clone();
        }
        let elements = self
            .elements
            .iter()
            .filter(|e| !matches!(e, PathElement::VariantSelection { .. }))
            .cloned()
            .collect();
        Self::from_parts(self.absolute, elements)
    }

    /// The owning prim path of a property path; other paths return themselves.
    pub fn prim_path(&self) -> Path {
        if self.is_property_path() {
            // A property always has a parent.
            self.parent().unwrap_or_else(Path::empty)
        } else {
            self.clone()
        }
    }

    /// The root prim of this path, e.g. `/A` for `/A/B{v=x}C`.
    pub fn root_prim(&self) -> Option<Path> {
        match self.elements.first() {
            Some(first @ PathElement::Prim(_)) if self.absolute => {
                Some(Self::from_parts(true, vec![first.clone()]))
            }
            _ => None,
        }
    }

    fn invalid(&self, reason: &str) -> TypeError {
        TypeError::InvalidPath {
            path: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absolute_root() {
            return f.write_str("/");
        }
        let mut prev: Option<&PathElement> = None;
        for element in self.elements.iter() {
            match element {
                PathElement::Prim(name) => {
                    let slash = match prev {
                        None => self.absolute,
                        Some(PathElement::Prim(_)) => true,
                        Some(_) => false,
                    };
                    if slash {
                        f.write_str("/")?;
                    }
                    f.write_str(name)?;
                }
                PathElement::VariantSelection { set, selection } => {
                    write!(f, "{{{set}={selection}}}")?;
                }
                PathElement::Property(name) => write!(f, ".{name}")?,
            }
            prev = Some(element);
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl TryFrom<String> for Path {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::new(value)
    }
}

impl TryFrom<&str> for Path {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Path::new(value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

impl std::str::FromStr for Path {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::new(s)
    }
}

/// Cursor-based parser for path text.
struct PathParser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> PathParser<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> TypeError {
        TypeError::InvalidPath {
            path: self.text.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.text[start..self.pos]
    }

    fn expect(&mut self, c: char) -> Result<(), TypeError> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}' at offset {}", self.pos)))
        }
    }

    fn identifier(&mut self) -> Result<String, TypeError> {
        let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_valid_identifier(name) {
            return Err(self.error(format!("expected an identifier at offset {}", self.pos)));
        }
        Ok(name.to_string())
    }

    fn parse(mut self) -> Result<Path, TypeError> {
        if self.text.is_empty() {
            return Ok(Path::empty());
        }
        let absolute = self.peek() == Some('/');
        if absolute {
            self.pos += 1;
            if self.pos == self.text.len() {
                return Ok(Path::absolute_root());
            }
        }

        let mut elements = Vec::new();
        elements.push(PathElement::Prim(self.identifier()?));
        while let Some(c) = self.peek() {
            match c {
                '/' => {
                    if !matches!(elements.last(), Some(PathElement::Prim(_))) {
                        return Err(self.error("'/' must follow a prim name"));
                    }
                    self.pos += 1;
                    elements.push(PathElement::Prim(self.identifier()?));
                }
                '{' => {
                    self.pos += 1;
                    let set = self.identifier()?;
                    self.expect('=')?;
                    let selection = self
                        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '|'))
                        .to_string();
                    self.expect('}')?;
                    elements.push(PathElement::VariantSelection { set, selection });
                    if let Some(next) = self.peek() {
                        if next.is_ascii_alphabetic() || next == '_' {
                            elements.push(PathElement::Prim(self.identifier()?));
                        }
                    }
                }
                '.' => {
                    self.pos += 1;
                    let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
                    if !is_valid_property_name(name) {
                        return Err(self.error(format!("invalid property name '{name}'")));
                    }
                    elements.push(PathElement::Property(name.to_string()));
                    if self.pos != self.text.len() {
                        return Err(self.error("a property must be the last element"));
                    }
                }
                other => {
                    return Err(self.error(format!("unexpected '{other}' at offset {}", self.pos)));
                }
            }
        }
        Ok(Path::from_parts(absolute, elements))
    }
}

/// Stable identifier of a layer.
///
/// Anonymous layers get a unique `anon:<uuid>` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerId(String);

impl LayerId {
    /// Create a layer id from an identifier string.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidLayerId` for empty or whitespace-padded ids.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypeError::InvalidLayerId("layer id cannot be empty".into()));
        }
        if id.trim() != id {
            return Err(TypeError::InvalidLayerId(format!(
                "layer id '{id}' has surrounding whitespace"
            )));
        }
        Ok(Self(id))
    }

    /// Generate a fresh anonymous layer id.
    pub fn anonymous() -> Self {
        Self(format!("anon:{}", uuid::Uuid::new_v4()))
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with("anon:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LayerId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        LayerId::new(value)
    }
}

impl From<LayerId> for String {
    fn from(id: LayerId) -> Self {
        id.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of a layer stack: its root layer, optional session layer and
/// resolution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerStackId {
    pub root: LayerId,
    pub session: Option<LayerId>,
    pub context: Option<String>,
}

impl LayerStackId {
    pub fn new(root: LayerId) -> Self {
        Self {
            root,
            session: None,
            context: None,
        }
    }

    pub fn with_session(root: LayerId, session: LayerId) -> Self {
        Self {
            root,
            session: Some(session),
            context: None,
        }
    }

    /// A stack id for a referenced asset, inheriting this stack's context.
    pub fn for_asset(&self, root: LayerId) -> Self {
        Self {
            root,
            session: None,
            context: self.context.clone(),
        }
    }
}

impl fmt::Display for LayerStackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}@", self.root)?;
        if let Some(session) = &self.session {
            write!(f, " session=@{session}@")?;
        }
        if let Some(context) = &self.context {
            write!(f, " context={context}")?;
        }
        Ok(())
    }
}

const OFFSET_EPSILON: f64 = 1e-6;

/// Affine time mapping `t -> offset + scale * t`.
///
/// # Example
///
/// ```
/// use strata::core::types::LayerOffset;
///
/// let outer = LayerOffset::new(100.0, 0.5);
/// let inner = LayerOffset::new(50.0, 1.0);
/// assert_eq!(outer.compose(&inner), LayerOffset::new(125.0, 0.5));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LayerOffset {
    pub offset: f64,
    pub scale: f64,
}

impl LayerOffset {
    pub fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 1.0)
    }

    pub fn from_offset(offset: f64) -> Self {
        Self::new(offset, 1.0)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Map a time through this offset.
    pub fn apply(&self, time: f64) -> f64 {
        self.offset + self.scale * time
    }

    /// `self ∘ inner`: apply `inner` first, then `self`.
    pub fn compose(&self, inner: &LayerOffset) -> LayerOffset {
        LayerOffset::new(self.offset + self.scale * inner.offset, self.scale * inner.scale)
    }

    /// The same offset with its scale multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> LayerOffset {
        LayerOffset::new(self.offset, self.scale * factor)
    }
}

impl Default for LayerOffset {
    fn default() -> Self {
        Self::identity()
    }
}

impl PartialEq for LayerOffset {
    fn eq(&self, other: &Self) -> bool {
        (self.offset - other.offset).abs() < OFFSET_EPSILON
            && (self.scale - other.scale).abs() < OFFSET_EPSILON
    }
}

impl fmt::Display for LayerOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(offset={}, scale={})", self.offset, self.scale)
    }
}
