//! Unified error types for the Ingot engine.
//!
//! Every failure the engine reports is a [`CoreError`].  Failures raised by
//! user routines (factory `construct`, producers, plugin register and init
//! routines) are wrapped in [`CoreError::Construction`] together with the
//! [`Requester`] they are attributed to.
//!
//! `CoreError` is `Clone` so that the scoped instance cache can memoize a
//! failed construction and hand the same error to every later requester.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by user-supplied routines.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared, cloneable form of a user routine failure.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Requester
// =============================================================================

/// Whoever asked for a dependency (or owns a failing routine).
///
/// Used to attribute every error to exactly one plugin id, and to a service
/// reference where applicable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Requester {
    /// The backend itself, outside of any plugin.
    Root,
    /// A plugin's register or init routine.
    Plugin {
        /// Plugin id.
        plugin_id: String,
    },
    /// A module attached to a plugin.
    Module {
        /// Id of the parent plugin.
        plugin_id: String,
        /// Module id, unique within the parent plugin.
        module_id: String,
    },
    /// A service factory, optionally constructing on behalf of a plugin.
    Service {
        /// The service reference id.
        service_id: String,
        /// The plugin whose request triggered the construction, if any.
        plugin_id: Option<String>,
    },
}

impl Requester {
    /// Creates a plugin requester.
    pub fn plugin(plugin_id: impl Into<String>) -> Self {
        Self::Plugin {
            plugin_id: plugin_id.into(),
        }
    }

    /// Creates a module requester.
    pub fn module(plugin_id: impl Into<String>, module_id: impl Into<String>) -> Self {
        Self::Module {
            plugin_id: plugin_id.into(),
            module_id: module_id.into(),
        }
    }

    /// Creates a service requester.
    pub fn service(service_id: impl Into<String>, plugin_id: Option<&str>) -> Self {
        Self::Service {
            service_id: service_id.into(),
            plugin_id: plugin_id.map(str::to_string),
        }
    }

    /// The plugin id this requester is attributed to, if any.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Root => None,
            Self::Plugin { plugin_id } | Self::Module { plugin_id, .. } => Some(plugin_id),
            Self::Service { plugin_id, .. } => plugin_id.as_deref(),
        }
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("the backend"),
            Self::Plugin { plugin_id } => write!(f, "plugin '{plugin_id}'"),
            Self::Module {
                plugin_id,
                module_id,
            } => write!(f, "module '{module_id}' of plugin '{plugin_id}'"),
            Self::Service {
                service_id,
                plugin_id: Some(plugin_id),
            } => write!(f, "service '{service_id}' (for plugin '{plugin_id}')"),
            Self::Service {
                service_id,
                plugin_id: None,
            } => write!(f, "service '{service_id}'"),
        }
    }
}

// =============================================================================
// CoreError
// =============================================================================

/// Errors raised by the engine.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A reference id was issued twice, or declared with a conflicting type or scope.
    #[error("duplicate reference '{id}': {reason}")]
    DuplicateReference {
        /// The colliding id.
        id: String,
        /// What collided.
        reason: String,
    },

    /// A plugin-scoped service was requested without a consumer plugin id.
    #[error("plugin-scoped service '{service}' requested without a plugin id by {required_by}")]
    MissingScope {
        /// The plugin-scoped service.
        service: String,
        /// Who requested it.
        required_by: Requester,
    },

    /// A requested reference has no bound factory (or no registered extension point).
    #[error("no implementation bound for '{dependency}', required by {required_by}")]
    UnresolvedDependency {
        /// The missing reference id.
        dependency: String,
        /// Who required it.
        required_by: Requester,
    },

    /// The factory dependency graph contains a cycle.
    #[error("circular dependency detected: {}", path.join(" -> "))]
    CyclicDependency {
        /// The cycle, first and last element being the same id.
        path: Vec<String>,
    },

    /// An extension point was registered or mutated after the register phase.
    #[error("extension point '{extension_point}' used by {requester} after the register phase")]
    LateExtensionRegistration {
        /// Extension point id.
        extension_point: String,
        /// Who attempted it.
        requester: Requester,
    },

    /// A second implementation was registered for an extension point.
    #[error(
        "extension point '{extension_point}' registered by {requester} was already registered by plugin '{owner}'"
    )]
    DuplicateExtensionPoint {
        /// Extension point id.
        extension_point: String,
        /// Plugin owning the first registration.
        owner: String,
        /// Who attempted the second registration.
        requester: Requester,
    },

    /// An operation was attempted in the wrong backend state.
    #[error("cannot {operation} while backend is {state}")]
    InvalidLifecycleState {
        /// The attempted operation.
        operation: &'static str,
        /// The backend state at the time.
        state: String,
    },

    /// A factory, producer, register, or init routine failed.
    #[error("{origin} failed: {source}")]
    Construction {
        /// Owner of the failing routine.
        origin: Requester,
        /// The routine's error.
        #[source]
        source: SharedError,
    },

    /// A plugin or module registered more than one init routine.
    #[error("{requester} registered more than one init routine")]
    DuplicateInit {
        /// The offending feature.
        requester: Requester,
    },

    /// Two installed features share an id.
    #[error("duplicate {requester} installed")]
    DuplicateFeature {
        /// The duplicated feature.
        requester: Requester,
    },

    /// A module was installed for a plugin that is not installed.
    #[error("{requester} extends plugin '{plugin_id}' which is not installed")]
    UnknownPlugin {
        /// The missing parent plugin id.
        plugin_id: String,
        /// The orphaned module.
        requester: Requester,
    },

    /// A stored instance did not have the type its reference declares.
    #[error("instance for '{id}' is not of type {expected}")]
    TypeMismatch {
        /// Reference id.
        id: String,
        /// The expected type name.
        expected: &'static str,
    },

    /// Construction was skipped because startup had already failed elsewhere.
    #[error("construction of '{service}' aborted after an earlier failure")]
    Aborted {
        /// Service whose construction was skipped.
        service: String,
    },
}

impl CoreError {
    /// Converts a user routine failure into a `CoreError`.
    ///
    /// Engine errors raised inside the routine (for example a duplicate
    /// extension point returned with `?` from a register routine) are passed
    /// through unchanged as long as they name a plugin.  Engine errors without
    /// one, and anything else, are wrapped in [`CoreError::Construction`]
    /// attributed to `origin`.
    pub fn from_routine(origin: Requester, err: BoxError) -> Self {
        match err.downcast::<CoreError>() {
            Ok(core) if core.plugin_id().is_some() || origin.plugin_id().is_none() => *core,
            Ok(core) => Self::Construction {
                origin,
                source: Arc::new(*core),
            },
            Err(other) => Self::Construction {
                origin,
                source: Arc::from(other),
            },
        }
    }

    /// Creates an invalid lifecycle state error.
    pub fn invalid_state(operation: &'static str, state: impl fmt::Display) -> Self {
        Self::InvalidLifecycleState {
            operation,
            state: state.to_string(),
        }
    }

    /// Returns the plugin id this error is attributed to, if any.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::MissingScope { required_by, .. }
            | Self::UnresolvedDependency { required_by, .. } => required_by.plugin_id(),
            Self::LateExtensionRegistration { requester, .. }
            | Self::DuplicateExtensionPoint { requester, .. }
            | Self::DuplicateInit { requester }
            | Self::DuplicateFeature { requester }
            | Self::UnknownPlugin { requester, .. } => requester.plugin_id(),
            Self::Construction { origin, .. } => origin.plugin_id(),
            Self::DuplicateReference { .. }
            | Self::CyclicDependency { .. }
            | Self::InvalidLifecycleState { .. }
            | Self::TypeMismatch { .. }
            | Self::Aborted { .. } => None,
        }
    }
}

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn test_from_routine_passes_core_errors_through() {
        let inner = CoreError::DuplicateInit {
            requester: Requester::plugin("a"),
        };
        let err = CoreError::from_routine(Requester::plugin("a"), Box::new(inner));
        assert!(matches!(err, CoreError::DuplicateInit { .. }));
    }

    #[test]
    fn test_from_routine_attributes_anonymous_engine_errors() {
        let inner = CoreError::TypeMismatch {
            id: "core.logger".into(),
            expected: "Arc<dyn Logger>",
        };
        let err = CoreError::from_routine(Requester::plugin("catalog"), Box::new(inner));
        assert_eq!(err.plugin_id(), Some("catalog"));
        assert!(matches!(err, CoreError::Construction { .. }));
        assert!(err.to_string().contains("core.logger"));

        let unattributed = CoreError::UnresolvedDependency {
            dependency: "core.lifecycle".into(),
            required_by: Requester::Root,
        };
        let err = CoreError::from_routine(
            Requester::module("catalog", "github"),
            Box::new(unattributed),
        );
        assert_eq!(err.plugin_id(), Some("catalog"));
    }

    #[test]
    fn test_from_routine_wraps_foreign_errors() {
        let err = CoreError::from_routine(Requester::module("a", "m"), Box::new(DiskError));
        assert_eq!(err.plugin_id(), Some("a"));
        assert_eq!(
            err.to_string(),
            "module 'm' of plugin 'a' failed: disk on fire"
        );
    }

    #[test]
    fn test_cycle_display() {
        let err = CoreError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
    }
}
