//! `core.pluginMetadata`: who is asking.

use std::sync::Arc;

use ingot_core::{BoxError, PluginId, ProduceContext, ServiceFactory, ServiceRef, ServiceScope};

/// Metadata of the consuming plugin.
pub static PLUGIN_METADATA: ServiceRef<PluginMetadata> =
    ServiceRef::new("core.pluginMetadata", ServiceScope::Plugin);

/// Identity of the plugin a plugin-scoped instance was produced for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    plugin_id: PluginId,
}

impl PluginMetadata {
    /// Creates metadata for `plugin_id`.
    pub fn new(plugin_id: PluginId) -> Self {
        Self { plugin_id }
    }

    /// The consuming plugin's id.
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }
}

/// Default factory for [`PLUGIN_METADATA`].
pub fn plugin_metadata_factory() -> ServiceFactory {
    ServiceFactory::builder(&PLUGIN_METADATA).produce(|ctx: ProduceContext| async move {
        let plugin_id = ctx.require_plugin_id()?.clone();
        Ok::<_, BoxError>(Arc::new(PluginMetadata::new(plugin_id)))
    })
}
