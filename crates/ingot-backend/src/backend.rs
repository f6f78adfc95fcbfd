//! The backend orchestrator.
//!
//! Owns the installed features and drives them through their lifecycle:
//!
//! ```text
//! Assembling ──start()──► Resolving ──► Starting ──► Running ──stop()──► Stopped
//!                              │            │
//!                              └────────────┴──► Failed ──stop()──► Stopped
//! ```
//!
//! `start()` runs, in order:
//!
//! 1. validation of the module forest (every module's parent is installed),
//! 2. every register routine (plugins in `add` order, then modules),
//! 3. the extension point freeze,
//! 4. graph resolution over the bound factories and every init descriptor,
//! 5. init routines, distinct plugins concurrently, a plugin's modules first,
//! 6. startup hooks registered through [`LIFECYCLE`](crate::services::LIFECYCLE).
//!
//! The first failure moves the backend to [`BackendState::Failed`] and is
//! returned from `start()`; no init routine or construction starts after it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::future;
use ingot_core::{
    AnyServiceRef, CoreError, CoreResult, DependencyRequest, ExtensionRegistry, InstanceCache,
    PluginId, RefRegistry, Requester, Resolution, ServiceFactory, default_service_factories,
    resolve,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::feature::{BackendFeature, InitFn};
use crate::registrar::PluginRegistrar;
use crate::services::{ROOT_LIFECYCLE, RootLifecycle, core_service_factories};

// =============================================================================
// States
// =============================================================================

/// Lifecycle state of a [`Backend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Features are being added.
    Assembling,
    /// Register routines run and the dependency graph is resolved.
    Resolving,
    /// Services are constructed and init routines run.
    Starting,
    /// Every init routine completed.
    Running,
    /// Some phase reported an unrecoverable error.
    Failed,
    /// `stop()` completed.
    Stopped,
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Assembling => "assembling",
            Self::Resolving => "resolving",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Load state of one installed plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLoadState {
    /// Installed, init not yet run.
    Registered,
    /// The plugin's and its modules' init routines completed.
    Active,
    /// A register or init routine of the plugin or one of its modules failed.
    Failed,
}

// =============================================================================
// BackendBuilder
// =============================================================================

/// Builder for [`Backend`].
///
/// Bindings are layered: core services, then every factory contributed to
/// [`DEFAULT_SERVICE_FACTORIES`](ingot_core::DEFAULT_SERVICE_FACTORIES), then
/// explicit defaults, then overrides.  A later binding for the same reference
/// replaces an earlier one.
pub struct BackendBuilder {
    defaults: Vec<ServiceFactory>,
    overrides: Vec<ServiceFactory>,
    refs: Option<Arc<RefRegistry>>,
}

impl BackendBuilder {
    /// Adds a default binding.
    pub fn default_factory(mut self, factory: ServiceFactory) -> Self {
        self.defaults.push(factory);
        self
    }

    /// Adds an override; overrides win over defaults, the last one wins among overrides.
    pub fn override_factory(mut self, factory: ServiceFactory) -> Self {
        self.overrides.push(factory);
        self
    }

    /// Adds several overrides, in order.
    pub fn overrides(mut self, factories: impl IntoIterator<Item = ServiceFactory>) -> Self {
        self.overrides.extend(factories);
        self
    }

    /// Uses an existing reference registry instead of a fresh one.
    pub fn ref_registry(mut self, refs: Arc<RefRegistry>) -> Self {
        self.refs = Some(refs);
        self
    }

    /// Builds the backend in [`BackendState::Assembling`].
    pub fn build(self) -> Backend {
        let mut bindings: Vec<ServiceFactory> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for factory in self.defaults.into_iter().chain(self.overrides) {
            let id = factory.service().id().to_string();
            match positions.get(&id) {
                Some(&at) => {
                    debug!(service = %id, "Binding replaced");
                    bindings[at] = factory;
                }
                None => {
                    positions.insert(id, bindings.len());
                    bindings.push(factory);
                }
            }
        }

        Backend {
            refs: self.refs.unwrap_or_default(),
            extensions: Arc::new(ExtensionRegistry::new()),
            bindings,
            state: Mutex::new(BackendState::Assembling),
            features: Mutex::new(Vec::new()),
            plugins: Mutex::new(Vec::new()),
            cache: Mutex::new(None),
            resolution: Mutex::new(None),
        }
    }
}

impl fmt::Debug for BackendBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendBuilder")
            .field("defaults", &self.defaults.len())
            .field("overrides", &self.overrides.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Backend
// =============================================================================

/// An init routine waiting for `Starting`.
struct PendingInit {
    requester: Requester,
    deps: Vec<AnyServiceRef>,
    init: InitFn,
}

/// Inits of one plugin: its modules' first, then its own.
struct PluginInits {
    plugin_id: PluginId,
    modules: Vec<PendingInit>,
    own: Option<PendingInit>,
}

/// The orchestrator.
pub struct Backend {
    refs: Arc<RefRegistry>,
    extensions: Arc<ExtensionRegistry>,
    bindings: Vec<ServiceFactory>,
    state: Mutex<BackendState>,
    features: Mutex<Vec<BackendFeature>>,
    /// Installed plugins in `add` order.
    plugins: Mutex<Vec<(PluginId, PluginLoadState)>>,
    cache: Mutex<Option<Arc<InstanceCache>>>,
    resolution: Mutex<Option<Resolution>>,
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend {
    /// Starts a builder seeded with the core services and the process-wide defaults.
    pub fn builder() -> BackendBuilder {
        let mut defaults = core_service_factories();
        defaults.extend(default_service_factories());
        BackendBuilder {
            defaults,
            overrides: Vec::new(),
            refs: None,
        }
    }

    /// Creates a backend with the default bindings only.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a backend whose `overrides` replace the default bindings.
    pub fn with_overrides(overrides: impl IntoIterator<Item = ServiceFactory>) -> Self {
        Self::builder().overrides(overrides).build()
    }

    /// Current state.
    pub fn state(&self) -> BackendState {
        *self.state.lock()
    }

    /// Load state of an installed plugin.
    pub fn plugin_state(&self, plugin_id: &str) -> Option<PluginLoadState> {
        self.plugins
            .lock()
            .iter()
            .find(|(id, _)| id.as_str() == plugin_id)
            .map(|(_, state)| *state)
    }

    /// Ids of the installed plugins, in `add` order.
    pub fn plugin_ids(&self) -> Vec<PluginId> {
        self.plugins.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    /// The reference registry of this backend.
    pub fn refs(&self) -> &Arc<RefRegistry> {
        &self.refs
    }

    /// The extension point registry of this backend.
    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    /// The bound factory for `id`, after defaults and overrides were merged.
    pub fn binding(&self, id: &str) -> Option<&ServiceFactory> {
        self.bindings
            .iter()
            .find(|factory| factory.service().id() == id)
    }

    /// The resolved construction order, once resolution succeeded.
    ///
    /// Informational: services are constructed on demand by the instance cache.
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution.lock().clone()
    }

    /// The instance cache, once `Starting` was reached.
    pub fn instances(&self) -> Option<Arc<InstanceCache>> {
        self.cache.lock().clone()
    }

    /// Installs a plugin or module.
    ///
    /// Only valid in [`BackendState::Assembling`].  A second plugin with the
    /// same id is rejected with [`CoreError::DuplicateFeature`].
    pub fn add(&self, feature: impl Into<BackendFeature>) -> CoreResult<()> {
        let feature = feature.into();
        let state = self.state.lock();
        if *state != BackendState::Assembling {
            return Err(CoreError::invalid_state("add a feature", *state));
        }

        if let BackendFeature::Plugin(plugin) = &feature {
            let mut plugins = self.plugins.lock();
            if plugins.iter().any(|(id, _)| id == plugin.id()) {
                return Err(CoreError::DuplicateFeature {
                    requester: feature.requester(),
                });
            }
            plugins.push((plugin.id().clone(), PluginLoadState::Registered));
        }
        debug!(feature = %feature.requester(), "Feature added");
        self.features.lock().push(feature);
        Ok(())
    }

    /// Registers, resolves, and starts every installed feature.
    pub async fn start(&self) -> CoreResult<()> {
        self.transition("start", &[BackendState::Assembling], BackendState::Resolving)?;
        let features = std::mem::take(&mut *self.features.lock());
        info!(features = features.len(), "Starting backend");

        match self.run_start(features).await {
            Ok(()) => {
                self.set_state(BackendState::Running);
                info!("Backend running");
                Ok(())
            }
            Err(e) => {
                self.set_state(BackendState::Failed);
                error!(error = %e, plugin = ?e.plugin_id(), "Backend failed to start");
                Err(e)
            }
        }
    }

    /// Runs shutdown hooks in reverse registration order.
    ///
    /// Valid in [`BackendState::Running`] and [`BackendState::Failed`].  Hook
    /// failures are logged and do not prevent later hooks from running.
    pub async fn stop(&self) -> CoreResult<()> {
        self.transition(
            "stop",
            &[BackendState::Running, BackendState::Failed],
            BackendState::Stopped,
        )?;
        if let Some(lifecycle) = self.root_lifecycle() {
            let failures = lifecycle.run_shutdown_hooks().await;
            if !failures.is_empty() {
                warn!(failed = failures.len(), "Some shutdown hooks failed");
            }
        }
        info!("Backend stopped");
        Ok(())
    }

    // ─── Start phases ────────────────────────────────────────────────────────

    async fn run_start(&self, features: Vec<BackendFeature>) -> CoreResult<()> {
        validate_forest(&features)?;
        let inits = self.register_all(features)?;
        self.extensions.freeze();

        let resolution = self.resolve_graph(&inits)?;
        debug!(
            order = ?resolution.order().iter().map(AnyServiceRef::id).collect::<Vec<_>>(),
            "Construction order"
        );
        *self.resolution.lock() = Some(resolution);

        self.set_state(BackendState::Starting);
        let cache = Arc::new(InstanceCache::new(
            self.bindings.iter().cloned(),
            Arc::clone(&self.extensions),
        ));
        *self.cache.lock() = Some(Arc::clone(&cache));

        let failure: Mutex<Option<CoreError>> = Mutex::new(None);
        future::join_all(
            inits
                .into_iter()
                .map(|group| self.start_plugin(group, &cache, &failure)),
        )
        .await;
        if let Some(e) = failure.into_inner() {
            return Err(e);
        }

        if let Some(lifecycle) = self.root_lifecycle() {
            lifecycle.run_startup_hooks().await?;
        }
        Ok(())
    }

    /// Admits every reference in play and resolves the factory graph.
    fn resolve_graph(&self, inits: &[PluginInits]) -> CoreResult<Resolution> {
        for factory in &self.bindings {
            self.refs.admit(factory.service())?;
            for dep in factory.deps() {
                self.refs.admit(dep)?;
            }
        }

        let pending: Vec<&PendingInit> = inits
            .iter()
            .flat_map(|group| group.modules.iter().chain(group.own.as_ref()))
            .collect();
        for init in &pending {
            for dep in &init.deps {
                self.refs.admit(dep)?;
            }
        }

        let requests: Vec<DependencyRequest<'_>> = pending
            .iter()
            .map(|init| DependencyRequest {
                requester: &init.requester,
                deps: &init.deps,
            })
            .collect();
        resolve(&self.bindings, &requests, &self.extensions)
    }

    /// Runs every register routine and collects the init descriptors per plugin.
    fn register_all(&self, features: Vec<BackendFeature>) -> CoreResult<Vec<PluginInits>> {
        let (plugins, modules): (Vec<_>, Vec<_>) = features
            .into_iter()
            .partition(|feature| matches!(feature, BackendFeature::Plugin(_)));

        let mut inits: Vec<PluginInits> = Vec::new();
        let mut index: HashMap<PluginId, usize> = HashMap::new();

        for feature in plugins.into_iter().chain(modules) {
            let plugin_id = feature.plugin_id().clone();
            let requester = feature.requester();
            let is_module = matches!(feature, BackendFeature::Module(_));
            let register = feature.into_register();

            let mut registrar =
                PluginRegistrar::new(&plugin_id, requester.clone(), &self.refs, &self.extensions);
            if let Err(e) = register(&mut registrar) {
                let err = CoreError::from_routine(requester, e);
                self.set_plugin_state(&plugin_id, PluginLoadState::Failed);
                return Err(err);
            }
            debug!(feature = %requester, "Feature registered");

            let pending = registrar.into_init().map(|descriptor| {
                let (deps, init) = descriptor.into_parts();
                PendingInit {
                    requester: requester.clone(),
                    deps,
                    init,
                }
            });

            let at = *index.entry(plugin_id.clone()).or_insert_with(|| {
                inits.push(PluginInits {
                    plugin_id: plugin_id.clone(),
                    modules: Vec::new(),
                    own: None,
                });
                inits.len() - 1
            });
            match (is_module, pending) {
                (true, Some(pending)) => inits[at].modules.push(pending),
                (false, pending) => inits[at].own = pending,
                (true, None) => {}
            }
        }
        Ok(inits)
    }

    /// Runs the inits of one plugin, recording the first failure backend-wide.
    async fn start_plugin(
        &self,
        group: PluginInits,
        cache: &InstanceCache,
        failure: &Mutex<Option<CoreError>>,
    ) {
        let plugin_id = group.plugin_id;
        for pending in group.modules.into_iter().chain(group.own) {
            match run_init(pending, &plugin_id, cache).await {
                Ok(InitOutcome::Completed) => {}
                Ok(InitOutcome::Skipped) => return,
                Err(e) => {
                    self.set_plugin_state(&plugin_id, PluginLoadState::Failed);
                    let mut first = failure.lock();
                    if first.is_none() {
                        error!(plugin = %plugin_id, error = %e, "Init failed, aborting startup");
                        *first = Some(e);
                        cache.abort();
                    }
                    return;
                }
            }
        }
        self.set_plugin_state(&plugin_id, PluginLoadState::Active);
        info!(plugin = %plugin_id, "Plugin started");
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    fn transition(
        &self,
        operation: &'static str,
        from: &[BackendState],
        to: BackendState,
    ) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return Err(CoreError::invalid_state(operation, *state));
        }
        debug!(from = %*state, to = %to, "Backend state transition");
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: BackendState) {
        let mut state = self.state.lock();
        debug!(from = %*state, to = %to, "Backend state transition");
        *state = to;
    }

    fn set_plugin_state(&self, plugin_id: &PluginId, to: PluginLoadState) {
        if let Some((_, state)) = self
            .plugins
            .lock()
            .iter_mut()
            .find(|(id, _)| id == plugin_id)
        {
            *state = to;
        }
    }

    fn root_lifecycle(&self) -> Option<Arc<RootLifecycle>> {
        let cache = self.cache.lock().clone()?;
        let instance = cache.peek(&ROOT_LIFECYCLE.erase(), None)?;
        instance.downcast_ref::<Arc<RootLifecycle>>().cloned()
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("state", &self.state())
            .field("plugins", &self.plugin_ids())
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

enum InitOutcome {
    Completed,
    /// Startup failed elsewhere before the routine could begin.
    Skipped,
}

/// Resolves the init's dependencies and runs it, unless startup was aborted
/// in the meantime.
async fn run_init(
    pending: PendingInit,
    plugin_id: &PluginId,
    cache: &InstanceCache,
) -> CoreResult<InitOutcome> {
    let PendingInit {
        requester,
        deps,
        init,
    } = pending;
    if cache.is_aborted() {
        debug!(feature = %requester, "Init skipped after an earlier failure");
        return Ok(InitOutcome::Skipped);
    }

    let resolved = cache
        .resolve_deps(&deps, Some(plugin_id), &requester)
        .await?;
    // Dependencies may have been in flight while a sibling failed.
    if cache.is_aborted() {
        debug!(feature = %requester, "Init skipped after an earlier failure");
        return Ok(InitOutcome::Skipped);
    }

    debug!(feature = %requester, deps = resolved.len(), "Running init");
    init(resolved)
        .await
        .map_err(|e| CoreError::from_routine(requester, e))?;
    Ok(InitOutcome::Completed)
}

/// Rejects modules of unknown plugins and duplicate module ids.
fn validate_forest(features: &[BackendFeature]) -> CoreResult<()> {
    let plugins: HashSet<&PluginId> = features
        .iter()
        .filter_map(|feature| match feature {
            BackendFeature::Plugin(plugin) => Some(plugin.id()),
            BackendFeature::Module(_) => None,
        })
        .collect();

    let mut modules: HashSet<(&PluginId, &str)> = HashSet::new();
    for feature in features {
        if let BackendFeature::Module(module) = feature {
            if !plugins.contains(module.plugin_id()) {
                return Err(CoreError::UnknownPlugin {
                    plugin_id: module.plugin_id().to_string(),
                    requester: feature.requester(),
                });
            }
            if !modules.insert((module.plugin_id(), module.module_id())) {
                return Err(CoreError::DuplicateFeature {
                    requester: feature.requester(),
                });
            }
        }
    }
    Ok(())
}
