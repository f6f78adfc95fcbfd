//! Feature descriptors: plugins, modules, and their init descriptors.
//!
//! A feature is installed with [`Backend::add`](crate::Backend::add) and
//! carries a register routine.  The routine runs once during
//! [`Backend::start`](crate::Backend::start) and declares, through the
//! [`PluginRegistrar`], at most one [`InitDescriptor`] and any number of
//! extension points.
//!
//! ```rust,ignore
//! let plugin = BackendPlugin::new("greeter", |reg| {
//!     reg.register_init(
//!         InitDescriptor::builder()
//!             .dep(&LOGGER)
//!             .init(|deps| async move {
//!                 deps.get(&LOGGER)?.info("hello");
//!                 Ok(())
//!             }),
//!     )?;
//!     Ok(())
//! });
//! ```

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use ingot_core::{
    AnyServiceRef, BoxError, ExtensionPointRef, PluginId, Requester, ResolvedDeps, ServiceRef,
};

use crate::registrar::PluginRegistrar;

/// Boxed register routine.
pub type RegisterFn =
    Box<dyn for<'r> FnOnce(&mut PluginRegistrar<'r>) -> Result<(), BoxError> + Send>;

/// Boxed init routine.
pub type InitFn = Box<dyn FnOnce(ResolvedDeps) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

// ─── InitDescriptor ──────────────────────────────────────────────────────────

/// A declared dependency set plus the routine to run once it is resolved.
pub struct InitDescriptor {
    deps: Vec<AnyServiceRef>,
    init: InitFn,
}

impl InitDescriptor {
    /// Starts an init descriptor.
    pub fn builder() -> InitDescriptorBuilder {
        InitDescriptorBuilder { deps: Vec::new() }
    }

    /// Declared dependencies.
    pub fn deps(&self) -> &[AnyServiceRef] {
        &self.deps
    }

    pub(crate) fn into_parts(self) -> (Vec<AnyServiceRef>, InitFn) {
        (self.deps, self.init)
    }
}

impl fmt::Debug for InitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitDescriptor")
            .field(
                "deps",
                &self.deps.iter().map(AnyServiceRef::id).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Builder for [`InitDescriptor`].
#[derive(Debug, Default)]
pub struct InitDescriptorBuilder {
    deps: Vec<AnyServiceRef>,
}

impl InitDescriptorBuilder {
    /// Declares a service dependency.
    pub fn dep<T: ?Sized + 'static>(self, service: &ServiceRef<T>) -> Self {
        self.push(service.erase())
    }

    /// Declares a dependency on the frozen view of an extension point.
    pub fn extension<T: 'static>(self, point: &ExtensionPointRef<T>) -> Self {
        self.push(point.erase())
    }

    /// Finishes with the init routine.
    pub fn init<F, Fut>(self, init: F) -> InitDescriptor
    where
        F: FnOnce(ResolvedDeps) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        InitDescriptor {
            deps: self.deps,
            init: Box::new(move |deps: ResolvedDeps| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(init(deps))
            }),
        }
    }

    fn push(mut self, dep: AnyServiceRef) -> Self {
        if !self.deps.contains(&dep) {
            self.deps.push(dep);
        }
        self
    }
}

// ─── BackendPlugin ───────────────────────────────────────────────────────────

/// A plugin: a unique id plus its register routine.
pub struct BackendPlugin {
    id: PluginId,
    register: RegisterFn,
}

impl BackendPlugin {
    /// Creates a plugin.
    pub fn new<F>(id: impl Into<PluginId>, register: F) -> Self
    where
        F: for<'r> FnOnce(&mut PluginRegistrar<'r>) -> Result<(), BoxError> + Send + 'static,
    {
        Self {
            id: id.into(),
            register: Box::new(register),
        }
    }

    /// Plugin id.
    pub fn id(&self) -> &PluginId {
        &self.id
    }
}

impl fmt::Debug for BackendPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendPlugin")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ─── BackendModule ───────────────────────────────────────────────────────────

/// A module extending an installed plugin.
///
/// Modules register after every plugin, so they can obtain their parent's
/// extension points, and consume plugin-scoped services under the parent's id.
pub struct BackendModule {
    plugin_id: PluginId,
    module_id: String,
    register: RegisterFn,
}

impl BackendModule {
    /// Creates a module of plugin `plugin_id`.
    pub fn new<F>(plugin_id: impl Into<PluginId>, module_id: impl Into<String>, register: F) -> Self
    where
        F: for<'r> FnOnce(&mut PluginRegistrar<'r>) -> Result<(), BoxError> + Send + 'static,
    {
        Self {
            plugin_id: plugin_id.into(),
            module_id: module_id.into(),
            register: Box::new(register),
        }
    }

    /// Id of the parent plugin.
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// Module id, unique within the parent plugin.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }
}

impl fmt::Debug for BackendModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendModule")
            .field("plugin_id", &self.plugin_id)
            .field("module_id", &self.module_id)
            .finish_non_exhaustive()
    }
}

// ─── BackendFeature ──────────────────────────────────────────────────────────

/// Anything installable into a [`Backend`](crate::Backend).
#[derive(Debug)]
pub enum BackendFeature {
    /// A plugin.
    Plugin(BackendPlugin),
    /// A module of a plugin.
    Module(BackendModule),
}

impl BackendFeature {
    /// The plugin id the feature is attributed to.
    pub fn plugin_id(&self) -> &PluginId {
        match self {
            Self::Plugin(plugin) => &plugin.id,
            Self::Module(module) => &module.plugin_id,
        }
    }

    /// The feature as an error requester.
    pub fn requester(&self) -> Requester {
        match self {
            Self::Plugin(plugin) => Requester::plugin(plugin.id.as_str()),
            Self::Module(module) => Requester::module(module.plugin_id.as_str(), &module.module_id),
        }
    }

    pub(crate) fn into_register(self) -> RegisterFn {
        match self {
            Self::Plugin(plugin) => plugin.register,
            Self::Module(module) => module.register,
        }
    }
}

impl From<BackendPlugin> for BackendFeature {
    fn from(plugin: BackendPlugin) -> Self {
        Self::Plugin(plugin)
    }
}

impl From<BackendModule> for BackendFeature {
    fn from(module: BackendModule) -> Self {
        Self::Module(module)
    }
}
