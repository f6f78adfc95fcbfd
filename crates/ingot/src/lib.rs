//! # Ingot
//!
//! A plugin composition runtime for modular backend processes.
//!
//! Plugins declare typed dependencies on shared services; services are bound
//! to factories that can be swapped or scoped per consumer without touching
//! plugin code; plugins publish extension points that other plugins and
//! modules contribute to before startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  register   ┌───────────────┐  resolve  ┌──────────────┐
//! │ Plugins and  │────────────▶│    Backend    │──────────▶│   Resolver   │
//! │   modules    │             │ (orchestrator)│           └──────────────┘
//! └──────────────┘             │               │  init     ┌──────────────┐
//!                              │               │──────────▶│Instance cache│──▶ factories
//!                              └───────────────┘           └──────────────┘
//! ```
//!
//! - **Core** (`ingot-core`): references, factories, the scoped instance
//!   cache, the dependency resolver, extension points
//! - **Backend** (`ingot-backend`): registration surface and the orchestrator
//!   state machine
//! - **Runtime** (`ingot-runtime`): configuration, logging, and the process
//!   run loop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ingot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = IngotRuntime::new();
//!     runtime.add(BackendPlugin::new("hello", |reg| {
//!         reg.register_init(InitDescriptor::builder().dep(&LOGGER).init(|deps| async move {
//!             deps.get(&LOGGER)?.info("hello");
//!             Ok(())
//!         }))?;
//!         Ok(())
//!     }))?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines

pub use ingot_backend as backend;
pub use ingot_core as core;
pub use ingot_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use ingot::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use ingot_runtime::{IngotRuntime, RuntimeError};

    // Plugins and the registration surface
    pub use ingot_backend::{
        Backend, BackendModule, BackendPlugin, BackendState, InitDescriptor, PluginRegistrar,
    };

    // References and factories
    pub use ingot_core::{
        BoxError, CoreError, CoreResult, ExtensionHandle, ExtensionPointRef, PluginId,
        ProduceContext, ResolvedDeps, ServiceFactory, ServiceRef, ServiceScope,
    };

    // Core services
    pub use ingot_backend::services::{LIFECYCLE, LifecycleService, PLUGIN_METADATA, PluginMetadata};
    pub use ingot_runtime::services::{LOGGER, Logger, ROOT_CONFIG, RootConfig};
}
