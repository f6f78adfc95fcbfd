//! # Ingot Core
//!
//! The dependency-injection engine of the Ingot plugin runtime.
//!
//! This crate knows nothing about plugins' register routines; it provides the
//! building blocks the backend orchestrator drives:
//!
//! ### Identity
//!
//! - **References**: typed, named identities ([`ServiceRef`], [`ExtensionPointRef`])
//! - **Reference registry**: per-backend set of issued ids ([`RefRegistry`])
//!
//! ### Construction
//!
//! - **Factories**: bind a reference to its construction routine ([`ServiceFactory`], [`Producer`])
//! - **Instance cache**: memoizes instances per `(reference, consumer)` ([`InstanceCache`])
//! - **Resolver**: orders the factory graph, detecting cycles and missing bindings ([`resolve`])
//!
//! ### Collaboration
//!
//! - **Extension points**: mutable during registration, frozen afterwards ([`ExtensionRegistry`])
//!
//! ```text
//!  requests ──► resolve() ──► Resolution ──► InstanceCache ──► ResolvedDeps
//!                  ▲                             │
//!            ServiceFactory ◄────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod extension;
pub mod factory;
pub mod refs;
pub mod registry;
pub mod resolver;

pub use cache::InstanceCache;
pub use error::{BoxError, CoreError, CoreResult, Requester, SharedError};
pub use extension::{ExtensionHandle, ExtensionRegistry};
pub use factory::{
    DEFAULT_SERVICE_FACTORIES, ProduceContext, Producer, ResolvedDeps, ServiceArc, ServiceFactory,
    ServiceFactoryBuilder, default_service_factories,
};
pub use refs::{AnyServiceRef, ExtensionPointRef, PluginId, RefKind, ServiceRef, ServiceScope};
pub use registry::RefRegistry;
pub use resolver::{DependencyRequest, Resolution, resolve};

pub use futures::future::BoxFuture;
