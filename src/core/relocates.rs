//! core::relocates
//!
//! Relocation rules and the composed relocation table of a layer stack.
//!
//! # Architecture
//!
//! Layers author relocates as `(source, target)` pairs. A layer stack walks
//! its layers strongest to weakest and builds a [`RelocationTable`] in two
//! passes:
//!
//! 1. **Claim**: each well-formed entry claims its source unless a stronger
//!    layer already did. Malformed entries are rejected on their own and
//!    never claim anything.
//! 2. **Validate**: claimed entries are checked against each other. An entry
//!    that conflicts (shared target, target relocated away, chained source)
//!    is dropped but keeps its claim, so weaker opinions for that source do
//!    not leak through.
//!
//! Every rejection becomes a [`RelocationError`] stored with the table.
//!
//! The surviving entries form the *incremental* map. The *composed* map
//! follows each source back through ancestral relocations to the path the
//! prim originally had.
//!
//! # Invariants
//!
//! - No two incremental entries share a target
//! - No incremental target is, or lies under, an incremental source
//! - No incremental source lies under another incremental source
//! - An empty target means the source prim is deleted
//!
//! # Example
//!
//! ```
//! use strata::core::relocates::RelocationTable;
//! use strata::core::types::{LayerId, Path};
//!
//! let p = |s: &str| Path::new(s).unwrap();
//! let layer = LayerId::new("root.sdf").unwrap();
//! let table = RelocationTable::compute(vec![(
//!     layer,
//!     vec![(p("/Root/A"), p("/Root/Z")), (p("/Root/Z/B"), p("/Root/Z/Y"))],
//! )]);
//! assert!(table.errors().is_empty());
//! assert_eq!(table.source_to_target()[&p("/Root/A/B")], p("/Root/Z/Y"));
//! ```

use crate::core::graph::MapFunction;
use crate::core::types::{LayerId, LayerOffset, Path};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Why a relocate is not acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationFault {
    NotAbsolute,
    NotPrim,
    HasVariantSelection,
    RootPrim,
    TargetIsSource,
    TargetIsDescendant,
    TargetIsAncestor,
    DifferentRootPrim,
    /// Another relocate already moves a prim to the same target.
    DuplicateTarget { source: Path, target: Path },
    /// The target is the source of an existing relocate.
    TargetIsExistingSource { source: Path, target: Path },
    /// The target lies under a prim that is relocated away.
    TargetUnderRelocatedSource { source: Path, target: Path },
    /// The target lies under a deleted prim.
    TargetUnderDeletedSource { source: Path },
    /// The source is the target of an existing relocate.
    SourceIsExistingTarget { source: Path, target: Path },
    /// The source lies under the source of an existing relocate.
    SourceUnderRelocatedSource { source: Path },
    /// The source, or one of its ancestors, is deleted.
    SourceDeleted { source: Path },
    /// No relocate with the given source exists.
    NoSuchRelocate,
}

impl RelocationFault {
    /// True for faults that make an entry invalid in any context.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            RelocationFault::NotAbsolute
                | RelocationFault::NotPrim
                | RelocationFault::HasVariantSelection
                | RelocationFault::RootPrim
                | RelocationFault::TargetIsSource
                | RelocationFault::TargetIsDescendant
                | RelocationFault::TargetIsAncestor
                | RelocationFault::DifferentRootPrim
        )
    }
}

impl fmt::Display for RelocationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocationFault::NotAbsolute => f.write_str("Relocates must use absolute paths."),
            RelocationFault::NotPrim => f.write_str("Only prims can be relocated."),
            RelocationFault::HasVariantSelection => {
                f.write_str("Relocates cannot have any variant selections.")
            }
            RelocationFault::RootPrim => {
                f.write_str("Root prims cannot be the source or target of a relocate.")
            }
            RelocationFault::TargetIsSource => {
                f.write_str("The target of a relocate cannot be the same as its source.")
            }
            RelocationFault::TargetIsDescendant => {
                f.write_str("The target of a relocate cannot be a descendant of its source.")
            }
            RelocationFault::TargetIsAncestor => {
                f.write_str("The target of a relocate cannot be an ancestor of its source.")
            }
            RelocationFault::DifferentRootPrim => f.write_str(
                "Prims cannot be relocated to be a descendant of a different root prim.",
            ),
            RelocationFault::DuplicateTarget { source, target } => write!(
                f,
                "A relocate from <{source}> to <{target}> already exists and the same \
                 target cannot be relocated to again."
            ),
            RelocationFault::TargetIsExistingSource { source, target } => write!(
                f,
                "The target of the relocate is the same as the source of an existing \
                 relocate from <{source}> to <{target}>; the only prim that can be \
                 relocated to <{source}> is the existing relocate's target <{target}>, \
                 which will remove the relocate."
            ),
            RelocationFault::TargetUnderRelocatedSource { source, target } => write!(
                f,
                "Cannot relocate a prim to be a descendant of <{source}> which is \
                 already relocated to <{target}>."
            ),
            RelocationFault::TargetUnderDeletedSource { source } => write!(
                f,
                "Cannot relocate a prim to be a descendant of <{source}> which has \
                 been deleted."
            ),
            RelocationFault::SourceIsExistingTarget { source, target } => write!(
                f,
                "The source of the relocate is the target of an existing relocate from \
                 <{source}> to <{target}>."
            ),
            RelocationFault::SourceUnderRelocatedSource { source } => write!(
                f,
                "The source of the relocate is a descendant of <{source}> which is \
                 already relocated."
            ),
            RelocationFault::SourceDeleted { source } => {
                write!(f, "The prim <{source}> has been deleted and cannot be relocated.")
            }
            RelocationFault::NoSuchRelocate => f.write_str("There is no relocate with this source."),
        }
    }
}

/// Check the form of each path on its own.
///
/// An empty `target` (a delete) is accepted.
pub fn check_relocate_paths(source: &Path, target: &Path) -> Result<(), RelocationFault> {
    let has_target = !target.is_empty();
    if !source.is_absolute() || (has_target && !target.is_absolute()) {
        return Err(RelocationFault::NotAbsolute);
    }
    if !source.is_prim_or_variant_path() || (has_target && !target.is_prim_or_variant_path()) {
        return Err(RelocationFault::NotPrim);
    }
    if source.contains_variant_selection() || (has_target && target.contains_variant_selection()) {
        return Err(RelocationFault::HasVariantSelection);
    }
    Ok(())
}

/// Check how `target` sits in namespace relative to `source`.
pub fn check_relocate_placement(source: &Path, target: &Path) -> Result<(), RelocationFault> {
    if source.is_root_prim_path() || target.is_root_prim_path() {
        return Err(RelocationFault::RootPrim);
    }
    if target.is_empty() {
        return Ok(());
    }
    if source == target {
        return Err(RelocationFault::TargetIsSource);
    }
    if target.has_prefix(source) {
        return Err(RelocationFault::TargetIsDescendant);
    }
    if source.has_prefix(target) {
        return Err(RelocationFault::TargetIsAncestor);
    }
    if source.root_prim() != target.root_prim() {
        return Err(RelocationFault::DifferentRootPrim);
    }
    Ok(())
}

/// Full form check for one authored entry.
pub fn check_relocate(source: &Path, target: &Path) -> Result<(), RelocationFault> {
    check_relocate_paths(source, target)?;
    check_relocate_placement(source, target)
}

/// An authored relocate that did not make it into a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationError {
    pub layer: LayerId,
    pub source: Path,
    pub target: Path,
    pub fault: RelocationFault,
}

impl fmt::Display for RelocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid relocate <{}> -> <{}> in @{}@: {}",
            self.source, self.target, self.layer, self.fault
        )
    }
}

/// Composed relocations of one layer stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelocationTable {
    incremental_source_to_target: BTreeMap<Path, Path>,
    incremental_target_to_source: BTreeMap<Path, Path>,
    source_to_target: BTreeMap<Path, Path>,
    target_to_source: BTreeMap<Path, Path>,
    errors: Vec<RelocationError>,
}

struct Claim {
    layer: LayerId,
    target: Path,
}

impl RelocationTable {
    /// Build the table from per-layer authored relocates, strongest first.
    pub fn compute<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = (LayerId, Vec<(Path, Path)>)>,
    {
        let mut errors = Vec::new();
        let mut claims: BTreeMap<Path, Claim> = BTreeMap::new();

        for (layer, authored) in layers {
            for (source, target) in authored {
                if let Err(fault) = check_relocate(&source, &target) {
                    errors.push(RelocationError {
                        layer: layer.clone(),
                        source,
                        target,
                        fault,
                    });
                    continue;
                }
                claims.entry(source).or_insert_with(|| Claim {
                    layer: layer.clone(),
                    target,
                });
            }
        }

        let mut rejected: BTreeMap<Path, RelocationFault> = BTreeMap::new();
        for (source, claim) in &claims {
            if let Some(fault) = Self::conflict(source, &claim.target, &claims) {
                rejected.insert(source.clone(), fault);
            }
        }

        let mut table = RelocationTable::default();
        for (source, claim) in claims {
            if let Some(fault) = rejected.remove(&source) {
                errors.push(RelocationError {
                    layer: claim.layer,
                    source,
                    target: claim.target,
                    fault,
                });
                continue;
            }
            if !claim.target.is_empty() {
                table
                    .incremental_target_to_source
                    .insert(claim.target.clone(), source.clone());
            }
            table.incremental_source_to_target.insert(source, claim.target);
        }
        table.compose();
        table.errors = errors;
        table
    }

    fn conflict(source: &Path, target: &Path, claims: &BTreeMap<Path, Claim>) -> Option<RelocationFault> {
        for (other_source, other) in claims {
            if other_source == source {
                continue;
            }
            if source.has_prefix(other_source) {
                return Some(RelocationFault::SourceUnderRelocatedSource {
                    source: other_source.clone(),
                });
            }
            if !other.target.is_empty() && *source == other.target {
                return Some(RelocationFault::SourceIsExistingTarget {
                    source: other_source.clone(),
                    target: other.target.clone(),
                });
            }
            if target.is_empty() {
                continue;
            }
            if target == other_source {
                return Some(RelocationFault::TargetIsExistingSource {
                    source: other_source.clone(),
                    target: other.target.clone(),
                });
            }
            if target.has_prefix(other_source) {
                return Some(RelocationFault::TargetUnderRelocatedSource {
                    source: other_source.clone(),
                    target: other.target.clone(),
                });
            }
            if *target == other.target {
                return Some(RelocationFault::DuplicateTarget {
                    source: other_source.clone(),
                    target: other.target.clone(),
                });
            }
        }
        None
    }

    /// Follow each incremental source back to its original namespace path.
    fn compose(&mut self) {
        let limit = self.incremental_source_to_target.len();
        for (source, target) in &self.incremental_source_to_target {
            let mut original = source.clone();
            for _ in 0..limit {
                let step = self
                    .incremental_target_to_source
                    .iter()
                    .filter(|(t, _)| original.has_prefix(t) && original != **t)
                    .max_by_key(|(t, _)| t.depth())
                    .and_then(|(t, s)| original.replace_prefix(t, s));
                match step {
                    Some(next) => original = next,
                    None => break,
                }
            }
            if !target.is_empty() {
                self.target_to_source.insert(target.clone(), original.clone());
            }
            self.source_to_target.insert(original, target.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.incremental_source_to_target.is_empty()
    }

    pub fn incremental_source_to_target(&self) -> &BTreeMap<Path, Path> {
        &self.incremental_source_to_target
    }

    pub fn incremental_target_to_source(&self) -> &BTreeMap<Path, Path> {
        &self.incremental_target_to_source
    }

    /// Composed map from original source paths to final targets.
    pub fn source_to_target(&self) -> &BTreeMap<Path, Path> {
        &self.source_to_target
    }

    pub fn target_to_source(&self) -> &BTreeMap<Path, Path> {
        &self.target_to_source
    }

    pub fn errors(&self) -> &[RelocationError] {
        &self.errors
    }

    /// The incremental relocate that moves `path` (or an ancestor) away.
    pub fn relocated_away(&self, path: &Path) -> Option<(&Path, &Path)> {
        self.incremental_source_to_target
            .iter()
            .filter(|(source, _)| path.has_prefix(source))
            .max_by_key(|(source, _)| source.depth())
    }

    /// The incremental source relocated to exactly `path`.
    pub fn source_for_target(&self, path: &Path) -> Option<&Path> {
        self.incremental_target_to_source.get(path)
    }

    /// Namespace mapping across the relocation at `source`.
    ///
    /// Includes every relocate whose source lies at or under `source`,
    /// composed entries first, plus the identity at `/`.
    pub fn map_function_for(&self, source: &Path) -> MapFunction {
        let mut seen_targets = HashSet::new();
        let mut pairs = Vec::new();
        let composed = self
            .source_to_target
            .range(source.clone()..)
            .take_while(|(s, _)| s.has_prefix(source));
        let incremental = self
            .incremental_source_to_target
            .range(source.clone()..)
            .take_while(|(s, _)| s.has_prefix(source));
        for (s, t) in composed.chain(incremental) {
            if t.is_empty() || !seen_targets.insert(t.clone()) {
                continue;
            }
            pairs.push((s.clone(), t.clone()));
        }
        pairs.push((Path::absolute_root(), Path::absolute_root()));
        MapFunction::new(pairs, LayerOffset::identity())
    }

    /// Sources and targets whose relocation differs between two tables.
    pub fn affected_paths(old: &RelocationTable, new: &RelocationTable) -> BTreeSet<Path> {
        fn diff(a: &BTreeMap<Path, Path>, b: &BTreeMap<Path, Path>, out: &mut BTreeSet<Path>) {
            for (source, target) in a {
                if b.get(source) != Some(target) {
                    out.insert(source.clone());
                    if !target.is_empty() {
                        out.insert(target.clone());
                    }
                }
            }
        }
        let mut out = BTreeSet::new();
        diff(&old.incremental_source_to_target, &new.incremental_source_to_target, &mut out);
        diff(&new.incremental_source_to_target, &old.incremental_source_to_target, &mut out);
        diff(&old.source_to_target, &new.source_to_target, &mut out);
        diff(&new.source_to_target, &old.source_to_target, &mut out);
        out
    }
}
