//! Core services the orchestrator itself relies on.
//!
//! They are ordinary reference + factory pairs: a backend binds them as
//! defaults, and an override for the same reference replaces them like any
//! other binding.

pub mod lifecycle;
pub mod metadata;

pub use lifecycle::{LIFECYCLE, LifecycleService, ROOT_LIFECYCLE, RootLifecycle};
pub use metadata::{PLUGIN_METADATA, PluginMetadata};

use ingot_core::ServiceFactory;

/// Default bindings for every core service of this crate.
pub fn core_service_factories() -> Vec<ServiceFactory> {
    vec![
        metadata::plugin_metadata_factory(),
        lifecycle::root_lifecycle_factory(),
        lifecycle::lifecycle_factory(),
    ]
}
