//! Process runtime: configuration, logging, and a backend wired together.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ingot_runtime::IngotRuntime;
//!
//! let runtime = IngotRuntime::builder()
//!     .config_file("deploy/ingot.toml")
//!     .build()?;
//! runtime.add(catalog_plugin())?;
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;

use figment::Figment;
use figment::providers::Serialized;
use ingot_backend::{Backend, BackendFeature, BackendState};
use ingot_core::ServiceFactory;
use tokio::signal;
use tracing::{info, warn};

use crate::config::{ConfigLoader, IngotConfig, LoadedConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;
use crate::services::{RootConfig, root_config_instance};

/// A backend bound to the process configuration.
///
/// `core.rootConfig` is bound to the loaded configuration, logging is
/// initialized from its `logging` table, and [`run`](Self::run) keeps the
/// backend alive until Ctrl+C or SIGTERM.
pub struct IngotRuntime {
    config: IngotConfig,
    root_config: RootConfig,
    backend: Backend,
}

impl IngotRuntime {
    /// Creates a runtime from the default configuration locations.
    ///
    /// Falls back to built-in defaults if loading fails.
    pub fn new() -> Self {
        let loaded = ConfigLoader::new().load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config ({e}), using defaults");
            let config = IngotConfig::default();
            LoadedConfig {
                figment: Figment::from(Serialized::defaults(config.clone())),
                config,
                profile: Default::default(),
            }
        });
        Self::from_loaded(loaded, Vec::new())
    }

    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// `overrides` are applied after the `core.rootConfig` binding, so they
    /// may replace it too.
    pub fn from_loaded(loaded: LoadedConfig, overrides: Vec<ServiceFactory>) -> Self {
        logging::init_from_config(&loaded.config.logging);

        let root_config = RootConfig::new(loaded.figment);
        let backend = Backend::builder()
            .override_factory(root_config_instance(root_config.clone()))
            .overrides(overrides)
            .build();

        info!(
            profile = %loaded.profile,
            log_level = %loaded.config.logging.level,
            log_format = ?loaded.config.logging.format,
            "Runtime initialized from configuration"
        );

        Self {
            config: loaded.config,
            root_config,
            backend,
        }
    }

    /// The runtime's own settings.
    pub fn config(&self) -> &IngotConfig {
        &self.config
    }

    /// The configuration served as `core.rootConfig`.
    pub fn root_config(&self) -> &RootConfig {
        &self.root_config
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Installs a plugin or module.
    pub fn add(&self, feature: impl Into<BackendFeature>) -> RuntimeResult<()> {
        self.backend.add(feature)?;
        Ok(())
    }

    /// Starts the backend.
    ///
    /// A failed start still runs the shutdown hooks registered so far.
    pub async fn start(&self) -> RuntimeResult<()> {
        if let Err(e) = self.backend.start().await {
            if let Err(stop_err) = self.backend.stop().await {
                warn!(error = %stop_err, "Cleanup after failed start did not complete");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Stops the backend if it is running or failed.
    pub async fn stop(&self) -> RuntimeResult<()> {
        match self.backend.state() {
            BackendState::Running | BackendState::Failed => {
                self.backend.stop().await?;
                Ok(())
            }
            state => {
                warn!(state = %state, "Stop requested but backend is not running");
                Ok(())
            }
        }
    }

    /// Starts the backend and stops it on Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Ingot runtime is now running. Press Ctrl+C to stop.");

        let signalled = wait_for_shutdown().await;
        self.stop().await?;
        signalled
    }

    /// Starts the backend and stops it once `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }
}

impl Default for IngotRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C, or SIGTERM on Unix.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only");
                signal::ctrl_c().await?;
                info!("Received Ctrl+C, shutting down");
                return Ok(());
            }
        };

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for an [`IngotRuntime`] with custom configuration.
///
/// ```rust,ignore
/// let runtime = IngotRuntime::builder()
///     .profile("production")
///     .override_factory(my_logger_factory())
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    overrides: Vec<ServiceFactory>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            overrides: Vec::new(),
        }
    }

    /// Loads exactly this configuration file.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables `INGOT_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a typed configuration.
    pub fn merge(mut self, config: IngotConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Merges one value at a dotted key.
    pub fn merge_value<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.config_loader = self.config_loader.merge_value(key, value);
        self
    }

    /// Replaces the binding of the factory's reference.
    pub fn override_factory(mut self, factory: ServiceFactory) -> Self {
        self.overrides.push(factory);
        self
    }

    /// Loads and validates the configuration, then builds the runtime.
    pub fn build(self) -> RuntimeResult<IngotRuntime> {
        let loaded = self.config_loader.load()?;
        validate_config(&loaded.config)?;
        Ok(IngotRuntime::from_loaded(loaded, self.overrides))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
