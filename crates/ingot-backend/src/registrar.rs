//! The plugin registration surface.

use ingot_core::{
    CoreError, CoreResult, ExtensionHandle, ExtensionPointRef, ExtensionRegistry, PluginId,
    RefRegistry, Requester,
};
use tracing::debug;

use crate::feature::InitDescriptor;

/// Object handed to each feature's register routine.
///
/// Only lives for the duration of one register routine, so everything it
/// offers is by construction limited to the register phase.
pub struct PluginRegistrar<'a> {
    plugin_id: &'a PluginId,
    requester: Requester,
    refs: &'a RefRegistry,
    extensions: &'a ExtensionRegistry,
    init: Option<InitDescriptor>,
}

impl<'a> PluginRegistrar<'a> {
    pub(crate) fn new(
        plugin_id: &'a PluginId,
        requester: Requester,
        refs: &'a RefRegistry,
        extensions: &'a ExtensionRegistry,
    ) -> Self {
        Self {
            plugin_id,
            requester,
            refs,
            extensions,
            init: None,
        }
    }

    /// Id of the plugin being registered (the parent plugin, for modules).
    pub fn plugin_id(&self) -> &PluginId {
        self.plugin_id
    }

    /// Module id, when registering a module.
    pub fn module_id(&self) -> Option<&str> {
        match &self.requester {
            Requester::Module { module_id, .. } => Some(module_id),
            _ => None,
        }
    }

    /// Registers the feature's init descriptor.
    ///
    /// A feature may register at most one; a second call fails with
    /// [`CoreError::DuplicateInit`].
    pub fn register_init(&mut self, init: InitDescriptor) -> CoreResult<()> {
        if self.init.is_some() {
            return Err(CoreError::DuplicateInit {
                requester: self.requester.clone(),
            });
        }
        debug!(requester = %self.requester, deps = init.deps().len(), "Init registered");
        self.init = Some(init);
        Ok(())
    }

    /// Publishes the implementation of an extension point owned by this plugin.
    ///
    /// The returned handle mutates the implementation until the register
    /// phase ends.
    pub fn register_extension_point<T: Send + Sync + 'static>(
        &mut self,
        point: &ExtensionPointRef<T>,
        implementation: T,
    ) -> CoreResult<ExtensionHandle<T>> {
        self.refs.admit(&point.erase())?;
        self.extensions
            .register(self.plugin_id, &self.requester, point, implementation)
    }

    /// Obtains a handle to contribute to another feature's extension point.
    ///
    /// The owning plugin must have registered before this feature; plugins
    /// always register before modules.
    pub fn extension_point<T: Send + Sync + 'static>(
        &self,
        point: &ExtensionPointRef<T>,
    ) -> CoreResult<ExtensionHandle<T>> {
        self.extensions.handle(&self.requester, point)
    }

    pub(crate) fn into_init(self) -> Option<InitDescriptor> {
        self.init
    }
}

impl std::fmt::Debug for PluginRegistrar<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistrar")
            .field("requester", &self.requester)
            .field("has_init", &self.init.is_some())
            .finish_non_exhaustive()
    }
}
