//! Collaborator services plugged into the backend as default bindings.
//!
//! Both are contributed to `DEFAULT_SERVICE_FACTORIES`, so any backend built
//! in a process that links this crate binds them without further setup.

pub mod logger;
pub mod root_config;

pub use logger::{LOGGER, Logger, PluginLogger, logger_factory};
pub use root_config::{ROOT_CONFIG, RootConfig, root_config_factory, root_config_instance};
