//! # Ingot Backend
//!
//! Plugin registration surface and backend orchestrator.
//!
//! Plugins and modules are installed into a [`Backend`]; each declares its
//! dependencies through the [`PluginRegistrar`] handed to its register
//! routine, and the backend resolves and starts them all.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ingot_backend::{Backend, BackendPlugin, InitDescriptor};
//! use ingot_backend::services::PLUGIN_METADATA;
//!
//! let backend = Backend::new();
//! backend.add(BackendPlugin::new("hello", |reg| {
//!     reg.register_init(
//!         InitDescriptor::builder()
//!             .dep(&PLUGIN_METADATA)
//!             .init(|deps| async move {
//!                 let meta = deps.get(&PLUGIN_METADATA)?;
//!                 println!("hello from {}", meta.plugin_id());
//!                 Ok(())
//!             }),
//!     )?;
//!     Ok(())
//! }))?;
//! backend.start().await?;
//! ```

pub mod backend;
pub mod feature;
pub mod registrar;
pub mod services;

#[cfg(test)]
mod scenarios;

pub use backend::{Backend, BackendBuilder, BackendState, PluginLoadState};
pub use feature::{
    BackendFeature, BackendModule, BackendPlugin, InitDescriptor, InitDescriptorBuilder, InitFn,
    RegisterFn,
};
pub use registrar::PluginRegistrar;
