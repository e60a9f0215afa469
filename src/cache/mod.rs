//! cache
//!
//! The composition cache: composed results per path, kept current by
//! change processing.
//!
//! # Architecture
//!
//! A [`CompositionCache`] is bound to one root [`LayerStack`]. Results are
//! created on first query and stay until change processing decides they are
//! stale:
//!
//! - [`CompositionCache::compute_prim_index`] returns the cached result or
//!   asks the [`PrimIndexResolver`] for a new one, records every site it
//!   consulted in the [`Dependencies`] index, and stores it.
//! - [`CompositionCache::find_prim_index`] only reads. It never composes
//!   and never waits on a compute in progress for longer than a map lookup.
//! - Layer edits reach the cache through a change scope
//!   ([`CompositionCache::open_scope`] or
//!   [`CompositionCache::apply_changes`]), see [`crate::engine`].
//!
//! Layer stacks are shared between results and held strongly only by the
//! dependency index (and the root stack by the cache itself). A stack that
//! no result uses is dropped when the change scope that released it closes.
//!
//! # Invariants
//!
//! - A result is never returned once it was invalidated
//! - The dependency index only names cached results
//! - The used-layers revision increases whenever the set of layers any live
//!   stack uses changes
//! - At most one change scope is open per cache
//!
//! # Example
//!
//! ```
//! use strata::cache::CompositionCache;
//! use strata::core::config::CacheConfig;
//! use strata::core::layer::{LayerRegistry, Specifier};
//! use strata::core::types::{LayerStackId, Path};
//!
//! let registry = LayerRegistry::new();
//! let shot = registry.create("shot.sdf").unwrap();
//! let world = Path::new("/World").unwrap();
//! shot.create_prim_spec(&world, Specifier::Def).unwrap();
//!
//! let id = LayerStackId::new(shot.id().clone());
//! let cache = CompositionCache::new(id, registry.clone(), CacheConfig::default()).unwrap();
//! let (index, errors) = cache.compute_prim_index(&world).unwrap();
//! assert!(errors.is_empty());
//! assert!(index.has_specs());
//!
//! // Adding an arc invalidates the result.
//! let edit = shot.add_inherit(&world, Path::new("/Class").unwrap()).unwrap();
//! let summary = cache.apply_changes(edit).unwrap();
//! assert_eq!(summary.significant, vec![world.clone()]);
//! assert!(cache.find_prim_index(&world).is_none());
//! ```

pub mod dependencies;
pub mod errors;
pub mod index;
pub mod layer_stack;
pub mod resolve;

pub use dependencies::{Dependencies, Dependency, DependencyKind, DependencyQuery, SiteDependent};
pub use errors::{CacheError, CompositionError};
pub use index::{PrimIndex, PropertyIndex};
pub use layer_stack::{LayerStack, LayerStackData};
pub use resolve::{PrimIndexResolver, ResolveContext, Resolved, StandardResolver};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core::config::CacheConfig;
use crate::core::layer::{ChangeBlock, LayerRegistry};
use crate::core::types::{LayerId, LayerStackId, Path};
use crate::engine::classify::{self, CacheView, Classification};
use crate::engine::{ChangeScope, ChangeSummary, Lifeboat};

#[derive(Debug, Default)]
struct CacheState {
    /// Built on first use so its errors are reported by that call.
    root: Option<Arc<LayerStack>>,
    known: HashMap<LayerStackId, Weak<LayerStack>>,
    dependencies: Dependencies,
    muted: BTreeSet<String>,
}

/// What applying one classification did.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub layer_stacks: Vec<LayerStackId>,
    pub used_layers_changed: bool,
}

/// Composed results for one root layer stack.
pub struct CompositionCache {
    root_id: LayerStackId,
    registry: Arc<LayerRegistry>,
    config: CacheConfig,
    resolver: Box<dyn PrimIndexResolver>,
    prim_indexes: RwLock<BTreeMap<Path, Arc<PrimIndex>>>,
    property_indexes: RwLock<BTreeMap<Path, Arc<PropertyIndex>>>,
    state: Mutex<CacheState>,
    scope_open: AtomicBool,
    used_layers_revision: AtomicU64,
}

impl fmt::Debug for CompositionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionCache")
            .field("root", &self.root_id)
            .field("prim_indexes", &self.prim_indexes.read().len())
            .field("property_indexes", &self.property_indexes.read().len())
            .field("used_layers_revision", &self.used_layers_revision())
            .finish()
    }
}

impl CompositionCache {
    /// Create a cache for the stack rooted at `root`.
    ///
    /// # Errors
    ///
    /// - `Config` if `config` does not validate
    /// - `UnknownLayer` if the root (or session) layer is not loaded
    pub fn new(root: LayerStackId, registry: Arc<LayerRegistry>, config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        for layer in std::iter::once(&root.root).chain(root.session.as_ref()) {
            if registry.find(layer).is_none() {
                return Err(CacheError::UnknownLayer(layer.clone()));
            }
        }
        Ok(Self {
            root_id: root,
            registry,
            config,
            resolver: Box::new(StandardResolver),
            prim_indexes: RwLock::new(BTreeMap::new()),
            property_indexes: RwLock::new(BTreeMap::new()),
            state: Mutex::new(CacheState::default()),
            scope_open: AtomicBool::new(false),
            used_layers_revision: AtomicU64::new(0),
        })
    }

    /// Replace the resolution primitive.
    pub fn with_resolver(mut self, resolver: impl PrimIndexResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn root_layer_stack_id(&self) -> &LayerStackId {
        &self.root_id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    pub fn root_layer_stack(&self) -> Arc<LayerStack> {
        let mut state = self.state.lock();
        self.ensure_root(&mut state).0
    }

    fn ensure_root(&self, state: &mut CacheState) -> (Arc<LayerStack>, Vec<CompositionError>) {
        if let Some(root) = &state.root {
            return (root.clone(), Vec::new());
        }
        let data = LayerStackData::build(&self.root_id, &self.registry, &state.muted, self.config.fallback_tcps);
        let errors = data.local_errors.clone();
        let stack = Arc::new(LayerStack::new(self.root_id.clone(), data));
        info!(stack = %self.root_id, layers = stack.layer_ids().len(), "computed root layer stack");
        state.known.insert(self.root_id.clone(), Arc::downgrade(&stack));
        state.root = Some(stack.clone());
        (stack, errors)
    }

    /// Every layer stack still alive, the root stack first if built.
    fn live_stacks(state: &mut CacheState) -> Vec<Arc<LayerStack>> {
        state.known.retain(|_, weak| weak.strong_count() > 0);
        let mut stacks: Vec<Arc<LayerStack>> = state.root.iter().cloned().collect();
        stacks.extend(
            state
                .known
                .iter()
                .filter(|(id, _)| state.root.as_ref().map_or(true, |root| root.id() != *id))
                .filter_map(|(_, weak)| weak.upgrade()),
        );
        stacks
    }

    /// The cached result at `path`, without composing.
    pub fn find_prim_index(&self, path: &Path) -> Option<Arc<PrimIndex>> {
        self.prim_indexes.read().get(path).cloned()
    }

    pub fn find_property_index(&self, path: &Path) -> Option<Arc<PropertyIndex>> {
        self.property_indexes.read().get(path).cloned()
    }

    /// Paths of every cached prim result, in namespace order.
    pub fn cached_prim_paths(&self) -> Vec<Path> {
        self.prim_indexes.read().keys().cloned().collect()
    }

    /// The result at `path`, composing it (and its ancestors) if needed.
    ///
    /// Composition errors found by this call are returned next to the
    /// result; a cached result comes back with none.
    ///
    /// # Errors
    ///
    /// `InvalidPrimPath` unless `path` is an absolute prim path without
    /// variant selections.
    pub fn compute_prim_index(&self, path: &Path) -> Result<(Arc<PrimIndex>, Vec<CompositionError>), CacheError> {
        if !path.is_absolute() || !path.is_prim_path() || path.contains_variant_selection() {
            return Err(CacheError::InvalidPrimPath(path.clone()));
        }
        if let Some(found) = self.find_prim_index(path) {
            return Ok((found, Vec::new()));
        }
        let mut state = self.state.lock();
        Ok(self.compute_locked(&mut state, path))
    }

    fn compute_locked(&self, state: &mut CacheState, path: &Path) -> (Arc<PrimIndex>, Vec<CompositionError>) {
        if let Some(found) = self.find_prim_index(path) {
            return (found, Vec::new());
        }
        let mut errors = Vec::new();
        let parent = match path.parent() {
            Some(parent) if !parent.is_absolute_root() => {
                let (index, parent_errors) = self.compute_locked(state, &parent);
                errors.extend(parent_errors);
                Some(index)
            }
            _ => None,
        };
        let (root, root_errors) = self.ensure_root(state);
        errors.extend(root_errors);

        let CacheState {
            known,
            dependencies,
            muted,
            ..
        } = state;
        let mut ctx = ResolveContext::new(&self.registry, &self.config, muted, known, root);
        let resolved = self.resolver.resolve(&mut ctx, path, parent.as_deref());
        for error in &resolved.errors {
            warn!(path = %path, "{error}");
        }
        let index = PrimIndex::new(
            path.clone(),
            resolved.graph,
            resolved.errors.clone(),
            ctx.held_stacks(),
            self.config.instancing,
        );
        dependencies.add(&index, &resolved.virtual_sites, ctx.held_stacks());
        debug!(path = %path, nodes = index.graph().len(), specs = index.prim_stack().len(), "computed prim index");

        let index = Arc::new(index);
        self.prim_indexes.write().insert(path.clone(), index.clone());
        errors.extend(resolved.errors);
        (index, errors)
    }

    /// The property result at `path`, composing its prim if needed.
    ///
    /// # Errors
    ///
    /// `InvalidPropertyPath` unless `path` is an absolute property path
    /// without variant selections.
    pub fn compute_property_index(
        &self,
        path: &Path,
    ) -> Result<(Arc<PropertyIndex>, Vec<CompositionError>), CacheError> {
        if !path.is_absolute() || !path.is_property_path() || path.contains_variant_selection() {
            return Err(CacheError::InvalidPropertyPath(path.clone()));
        }
        if let Some(found) = self.find_property_index(path) {
            return Ok((found, Vec::new()));
        }
        let (prim, errors) = self.compute_prim_index(&path.prim_path())?;
        let property = Arc::new(PropertyIndex::build(path.clone(), &prim));
        self.property_indexes.write().insert(path.clone(), property.clone());
        Ok((property, errors))
    }

    /// The live stack for `id`, building it if nobody holds one.
    ///
    /// Only a stack built by this call reports its local errors here; a
    /// live stack comes back with none (read `local_errors()` instead).
    pub fn compute_layer_stack(&self, id: &LayerStackId) -> (Arc<LayerStack>, Vec<CompositionError>) {
        let mut state = self.state.lock();
        if *id == self.root_id {
            return self.ensure_root(&mut state);
        }
        let root = self.ensure_root(&mut state).0;
        let CacheState { known, muted, .. } = &mut *state;
        let mut ctx = ResolveContext::new(&self.registry, &self.config, muted, known, root);
        let (stack, built) = ctx.layer_stack(id);
        let errors = if built { stack.local_errors() } else { Vec::new() };
        (stack, errors)
    }

    /// The live stack for `id`, if any.
    pub fn layer_stack(&self, id: &LayerStackId) -> Option<Arc<LayerStack>> {
        let state = self.state.lock();
        state.known.get(id).and_then(Weak::upgrade)
    }

    pub fn uses_layer_stack(&self, id: &LayerStackId) -> bool {
        self.layer_stack(id).is_some()
    }

    /// Layers used by any live stack.
    pub fn used_layers(&self) -> BTreeSet<LayerId> {
        let mut state = self.state.lock();
        Self::live_stacks(&mut state)
            .iter()
            .flat_map(|stack| stack.layer_ids())
            .collect()
    }

    pub fn is_layer_used(&self, id: &LayerId) -> bool {
        self.used_layers().contains(id)
    }

    /// Incremented whenever the set of used layers changes.
    pub fn used_layers_revision(&self) -> u64 {
        self.used_layers_revision.load(Ordering::SeqCst)
    }

    pub fn is_layer_muted(&self, identifier: &str) -> bool {
        self.state.lock().muted.contains(identifier)
    }

    pub fn muted_layers(&self) -> Vec<String> {
        self.state.lock().muted.iter().cloned().collect()
    }

    /// True if `identifier` names a sublayer some live stack failed to load.
    pub fn is_invalid_sublayer_identifier(&self, identifier: &str) -> bool {
        let mut state = self.state.lock();
        Self::live_stacks(&mut state)
            .iter()
            .any(|stack| stack.invalid_sublayers().contains(identifier))
    }

    fn is_root_identifier(&self, identifier: &str) -> bool {
        self.root_id.root.as_str() == identifier
            || self
                .root_id
                .session
                .as_ref()
                .is_some_and(|session| session.as_str() == identifier)
    }

    /// Mute and unmute sublayers, invalidating every result that used them.
    ///
    /// Empty identifiers and the root and session layers are ignored. An
    /// identifier in both lists ends up muted.
    ///
    /// # Errors
    ///
    /// `ScopeAlreadyOpen` if a change scope is open on this cache.
    pub fn request_layer_muting(&self, mute: &[&str], unmute: &[&str]) -> Result<ChangeSummary, CacheError> {
        let mut scope = self.open_scope()?;
        let current = self.state.lock().muted.clone();
        let mut muted = current.clone();
        for identifier in unmute {
            muted.remove(*identifier);
        }
        for identifier in mute.iter().filter(|id| !id.is_empty()) {
            if self.is_root_identifier(identifier) {
                warn!(layer = %identifier, "cannot mute a root or session layer");
                continue;
            }
            muted.insert((*identifier).to_string());
        }
        if muted != current {
            info!(muted = muted.len(), "layer muting changed");
            scope.process_muting(muted);
        }
        Ok(scope.close())
    }

    /// Open a change scope.
    ///
    /// # Errors
    ///
    /// `ScopeAlreadyOpen` if another scope is open on this cache.
    pub fn open_scope(&self) -> Result<ChangeScope<'_>, CacheError> {
        self.scope_open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CacheError::ScopeAlreadyOpen)?;
        Ok(ChangeScope::new(self))
    }

    pub(crate) fn end_scope(&self) {
        self.scope_open.store(false, Ordering::SeqCst);
    }

    /// Process one block of edits in its own scope.
    ///
    /// # Errors
    ///
    /// `ScopeAlreadyOpen` if a change scope is open on this cache.
    pub fn apply_changes(&self, block: impl Into<ChangeBlock>) -> Result<ChangeSummary, CacheError> {
        let mut scope = self.open_scope()?;
        scope.process(block);
        Ok(scope.close())
    }

    pub(crate) fn classify_block(&self, block: &ChangeBlock) -> Classification {
        self.with_view(|view| classify::classify(view, block))
    }

    pub(crate) fn classify_muting(&self, muted: &BTreeSet<String>) -> Classification {
        self.with_view(|view| classify::classify_muting(view, muted))
    }

    fn with_view(&self, run: impl FnOnce(&CacheView<'_>) -> Classification) -> Classification {
        let mut state = self.state.lock();
        let stacks = Self::live_stacks(&mut state);
        let prim_indexes = self.prim_indexes.read();
        let property_indexes = self.property_indexes.read();
        let view = CacheView {
            root_id: &self.root_id,
            registry: &self.registry,
            config: &self.config,
            muted: &state.muted,
            stacks,
            dependencies: &state.dependencies,
            prim_indexes: &prim_indexes,
            property_indexes: &property_indexes,
        };
        run(&view)
    }

    /// Swap in recomputed stacks and drop or refresh results.
    ///
    /// `muted` replaces the muted layer set when given.
    pub(crate) fn apply_classification(
        &self,
        classification: Classification,
        lifeboat: &mut Lifeboat,
        muted: Option<BTreeSet<String>>,
    ) -> Applied {
        let mut state = self.state.lock();
        if let Some(muted) = muted {
            state.muted = muted;
        }

        let mut applied = Applied::default();
        for (stack, change) in classification.stacks {
            lifeboat.hold_data(stack.replace_data(change.new_data));
            applied.used_layers_changed |= change.layer_set_changed;
            info!(stack = %change.stack, significant = change.significant, "layer stack recomputed");
            applied.layer_stacks.push(change.stack);
        }
        if applied.used_layers_changed {
            let revision = self.used_layers_revision.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(revision, "used layers changed");
        }

        let changes = &classification.changes;
        let dependencies = &mut state.dependencies;
        let mut prim_indexes = self.prim_indexes.write();
        let mut property_indexes = self.property_indexes.write();

        for path in changes.significant() {
            if path.is_absolute_root() {
                info!(results = prim_indexes.len(), "clearing composition cache");
                prim_indexes.clear();
                property_indexes.clear();
                for stack in dependencies.clear() {
                    lifeboat.hold_stack(stack);
                }
                continue;
            }
            let doomed: Vec<Path> = prim_indexes
                .range(path.clone()..)
                .take_while(|(p, _)| p.has_prefix(path))
                .map(|(p, _)| p.clone())
                .collect();
            for index_path in &doomed {
                drop_index(&mut prim_indexes, dependencies, lifeboat, index_path);
            }
            property_indexes.retain(|p, _| !p.has_prefix(path));
        }

        for path in changes.prims() {
            drop_index(&mut prim_indexes, dependencies, lifeboat, path);
            property_indexes.retain(|p, _| p.prim_path() != *path);
        }

        for path in changes.specs().iter().filter(|p| p.is_prim_path()) {
            let Some(index) = prim_indexes.get(path).cloned() else {
                continue;
            };
            let mut refreshed = (*index).clone();
            refreshed.refresh_specs();
            if refreshed.has_specs() {
                prim_indexes.insert(path.clone(), Arc::new(refreshed));
            } else {
                debug!(path = %path, "dropping result without specs");
                drop_index(&mut prim_indexes, dependencies, lifeboat, path);
            }
        }

        let stale: Vec<Path> = property_indexes
            .keys()
            .filter(|p| changes.specs().contains(*p) || changes.specs().contains(&p.prim_path()))
            .cloned()
            .collect();
        for path in stale {
            let rebuilt = prim_indexes
                .get(&path.prim_path())
                .map(|prim| PropertyIndex::build(path.clone(), prim))
                .filter(|property| !property.is_empty());
            match rebuilt {
                Some(property) => {
                    property_indexes.insert(path, Arc::new(property));
                }
                None => {
                    property_indexes.remove(&path);
                }
            }
        }
        applied
    }
}

fn drop_index(
    prim_indexes: &mut BTreeMap<Path, Arc<PrimIndex>>,
    dependencies: &mut Dependencies,
    lifeboat: &mut Lifeboat,
    path: &Path,
) {
    prim_indexes.remove(path);
    for stack in dependencies.remove(path) {
        lifeboat.hold_stack(stack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layer::{LayerHandle, PropertySpec, Specifier};

    fn p(s: &str) -> Path {
        Path::new(s).unwrap()
    }

    fn cache_for(layer: &LayerHandle, registry: &Arc<LayerRegistry>) -> CompositionCache {
        CompositionCache::new(
            LayerStackId::new(layer.id().clone()),
            registry.clone(),
            CacheConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn find_never_recomputes() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        root.create_prim_spec(&p("/A/B"), Specifier::Def).unwrap();
        let cache = cache_for(&root, &registry);

        assert!(cache.find_prim_index(&p("/A/B")).is_none());
        let (computed, _) = cache.compute_prim_index(&p("/A/B")).unwrap();
        // The parent was composed on the way.
        assert!(cache.find_prim_index(&p("/A")).is_some());

        let found = cache.find_prim_index(&p("/A/B")).unwrap();
        assert!(Arc::ptr_eq(&computed, &found));
        let (again, errors) = cache.compute_prim_index(&p("/A/B")).unwrap();
        assert!(Arc::ptr_eq(&computed, &again));
        assert!(errors.is_empty());
    }

    #[test]
    fn rejects_bad_paths() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let cache = cache_for(&root, &registry);

        assert!(matches!(
            cache.compute_prim_index(&p("/A.attr")),
            Err(CacheError::InvalidPrimPath(_))
        ));
        assert!(matches!(
            cache.compute_prim_index(&p("/A{v=x}B")),
            Err(CacheError::InvalidPrimPath(_))
        ));
        assert!(matches!(
            cache.compute_prim_index(&Path::absolute_root()),
            Err(CacheError::InvalidPrimPath(_))
        ));
        assert!(matches!(
            cache.compute_property_index(&p("/A")),
            Err(CacheError::InvalidPropertyPath(_))
        ));
    }

    #[test]
    fn unknown_root_layer_is_refused() {
        let registry = LayerRegistry::new();
        let id = LayerStackId::new(LayerId::new("missing.sdf").unwrap());
        let err = CompositionCache::new(id, registry, CacheConfig::default()).unwrap_err();
        assert!(matches!(err, CacheError::UnknownLayer(_)));
    }

    #[test]
    fn invalid_config_is_refused() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let config = CacheConfig {
            max_arc_depth: 0,
            ..CacheConfig::default()
        };
        let err = CompositionCache::new(LayerStackId::new(root.id().clone()), registry.clone(), config).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn one_scope_at_a_time() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let cache = cache_for(&root, &registry);

        let scope = cache.open_scope().unwrap();
        assert!(matches!(cache.open_scope(), Err(CacheError::ScopeAlreadyOpen)));
        assert!(matches!(
            cache.request_layer_muting(&["sub.sdf"], &[]),
            Err(CacheError::ScopeAlreadyOpen)
        ));
        drop(scope);
        assert!(cache.open_scope().is_ok());
    }

    #[test]
    fn layer_stack_errors_are_reported_once() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        root.add_sublayer("missing.sdf");
        let cache = cache_for(&root, &registry);
        let id = cache.root_layer_stack_id().clone();

        let (stack, errors) = cache.compute_layer_stack(&id);
        assert_eq!(errors.len(), 1);
        assert_eq!(stack.local_errors().len(), 1);
        assert!(cache.is_invalid_sublayer_identifier("missing.sdf"));

        let (_, errors) = cache.compute_layer_stack(&id);
        assert!(errors.is_empty());
    }

    #[test]
    fn root_layer_cannot_be_muted() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let cache = cache_for(&root, &registry);

        let summary = cache.request_layer_muting(&["root.sdf", ""], &[]).unwrap();
        assert!(summary.is_empty());
        assert!(cache.muted_layers().is_empty());

        cache.request_layer_muting(&["sub.sdf"], &["sub.sdf"]).unwrap();
        assert!(cache.is_layer_muted("sub.sdf"));
        cache.request_layer_muting(&[], &["sub.sdf"]).unwrap();
        assert!(!cache.is_layer_muted("sub.sdf"));
    }

    #[test]
    fn property_results_follow_property_edits() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        root.create_prim_spec(&p("/A"), Specifier::Def).unwrap();
        let cache = cache_for(&root, &registry);

        let (property, _) = cache.compute_property_index(&p("/A.size")).unwrap();
        assert!(property.is_empty());

        let edit = root.create_property(&p("/A.size"), PropertySpec::default()).unwrap();
        let summary = cache.apply_changes(edit).unwrap();
        assert_eq!(summary.specs, vec![p("/A.size")]);
        let property = cache.find_property_index(&p("/A.size")).unwrap();
        assert_eq!(property.property_stack().len(), 1);
    }

    #[test]
    fn used_layers_follow_the_root_stack() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.sdf").unwrap();
        let sub = registry.create("sub.sdf").unwrap();
        let cache = cache_for(&root, &registry);
        cache.root_layer_stack();
        assert!(cache.uses_layer_stack(cache.root_layer_stack_id()));
        assert!(!cache.is_layer_used(sub.id()));

        let revision = cache.used_layers_revision();
        cache.apply_changes(root.add_sublayer("sub.sdf")).unwrap();
        assert!(cache.is_layer_used(sub.id()));
        assert!(cache.used_layers_revision() > revision);
    }
}
