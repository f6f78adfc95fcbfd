//! # Ingot Runtime
//!
//! Collaborator services and process plumbing for the Ingot plugin runtime:
//!
//! - Layered configuration (`config`), served to plugins as `core.rootConfig`
//! - `tracing` subscriber setup (`logging`) and the per-plugin `core.logger`
//! - [`IngotRuntime`], which binds both into a backend and runs it until a
//!   shutdown signal arrives
//!
//! ```rust,ignore
//! use ingot_runtime::IngotRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = IngotRuntime::new();
//!     runtime.add(my_plugin())?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod services;

pub use config::{ConfigError, ConfigLoader, ConfigResult, IngotConfig, LoadedConfig, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{IngotRuntime, RuntimeBuilder};
pub use services::{LOGGER, Logger, PluginLogger, ROOT_CONFIG, RootConfig};

pub use tracing;

/// Prelude module for convenient imports.
///
/// Re-exports the `tracing` macros most plugins log with.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
