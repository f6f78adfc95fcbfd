//! Service factories and producers.
//!
//! A [`ServiceFactory`] binds a [`ServiceRef`] to its construction logic and
//! its own dependencies.  Construction happens in two levels:
//!
//! 1. `construct` runs **once** with the factory's root-scoped dependencies
//!    and returns a [`Producer`].
//! 2. The producer is invoked once per cache key: once in total for a
//!    root-scoped service, once per consumer plugin id for a plugin-scoped one.
//!    It receives every declared dependency resolved for that consumer.
//!
//! # Example
//!
//! ```rust,ignore
//! let factory = ServiceFactory::builder(&LOGGER)
//!     .dep(&ROOT_CONFIG)
//!     .dep(&PLUGIN_METADATA)
//!     .produce(|ctx: ProduceContext| async move {
//!         let meta = ctx.deps().get(&PLUGIN_METADATA)?;
//!         Ok::<_, BoxError>(Arc::new(PluginLogger::new(meta.plugin_id())) as Arc<dyn Logger>)
//!     });
//! ```
//!
//! # Process-wide defaults
//!
//! Crates contribute default bindings to [`DEFAULT_SERVICE_FACTORIES`]; every
//! backend collects them when it is built.  Factories passed to the backend
//! explicitly override these defaults.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use linkme::distributed_slice;

use crate::error::{BoxError, CoreError, CoreResult, Requester};
use crate::refs::{AnyServiceRef, ExtensionPointRef, PluginId, ServiceRef, ServiceScope};

/// Type-erased instance as stored by the cache.
///
/// The inner `dyn Any` is an `Arc<T>` for the `T` of the owning reference.
pub type ServiceArc = Arc<dyn Any + Send + Sync>;

// ─── Default bindings ────────────────────────────────────────────────────────

/// Process-wide default service factories.
///
/// Each entry is a constructor function, so contributing crates need no
/// global state.  Entries are collected by `Backend::builder()`.
#[distributed_slice]
pub static DEFAULT_SERVICE_FACTORIES: [fn() -> ServiceFactory];

/// Materializes every factory contributed to [`DEFAULT_SERVICE_FACTORIES`].
pub fn default_service_factories() -> Vec<ServiceFactory> {
    DEFAULT_SERVICE_FACTORIES.iter().map(|make| make()).collect()
}

// =============================================================================
// ResolvedDeps
// =============================================================================

/// Resolved dependency instances, keyed by the same references that declared them.
///
/// Lookup failures are attributed to the requester the set was resolved for.
#[derive(Clone)]
pub struct ResolvedDeps {
    instances: HashMap<Arc<str>, ServiceArc>,
    requester: Requester,
}

impl Default for ResolvedDeps {
    fn default() -> Self {
        Self::for_requester(Requester::Root)
    }
}

impl ResolvedDeps {
    /// Creates an empty set attributed to the backend itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set resolved on behalf of `requester`.
    pub fn for_requester(requester: Requester) -> Self {
        Self {
            instances: HashMap::new(),
            requester,
        }
    }

    /// Who these dependencies were resolved for.
    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// Returns the instance resolved for `service`.
    ///
    /// Fails with [`CoreError::UnresolvedDependency`] if `service` was not
    /// declared as a dependency.
    pub fn get<T: ?Sized + Send + Sync + 'static>(
        &self,
        service: &ServiceRef<T>,
    ) -> CoreResult<Arc<T>> {
        self.lookup::<Arc<T>>(service.id())
    }

    /// Returns the frozen, read-only view of an extension point.
    pub fn extension<T: Send + Sync + 'static>(
        &self,
        point: &ExtensionPointRef<T>,
    ) -> CoreResult<Arc<T>> {
        self.lookup::<Arc<T>>(point.id())
    }

    /// Returns `true` if an instance for `id` is present.
    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    /// Number of resolved instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` if nothing was resolved.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub(crate) fn insert(&mut self, id: Arc<str>, instance: ServiceArc) {
        self.instances.insert(id, instance);
    }

    fn lookup<A: Clone + 'static>(&self, id: &str) -> CoreResult<A> {
        let instance = self
            .instances
            .get(id)
            .ok_or_else(|| CoreError::UnresolvedDependency {
                dependency: id.to_string(),
                required_by: self.requester.clone(),
            })?;
        instance
            .downcast_ref::<A>()
            .cloned()
            .ok_or_else(|| CoreError::TypeMismatch {
                id: id.to_string(),
                expected: std::any::type_name::<A>(),
            })
    }
}

impl fmt::Debug for ResolvedDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.instances.keys()).finish()
    }
}

// =============================================================================
// Producer
// =============================================================================

/// Context handed to a [`Producer`] for one cache key.
#[derive(Debug, Clone)]
pub struct ProduceContext {
    service: Arc<str>,
    consumer: Option<PluginId>,
    requester: Requester,
    deps: ResolvedDeps,
}

impl ProduceContext {
    pub(crate) fn new(
        service: Arc<str>,
        consumer: Option<PluginId>,
        requester: Requester,
        deps: ResolvedDeps,
    ) -> Self {
        Self {
            service,
            consumer,
            requester,
            deps,
        }
    }

    /// The service being produced.
    pub fn service_id(&self) -> &str {
        &self.service
    }

    /// The consumer plugin id; always `Some` for plugin-scoped services.
    pub fn plugin_id(&self) -> Option<&PluginId> {
        self.consumer.as_ref()
    }

    /// The construction this context belongs to, tagged with the plugin
    /// whose request triggered it.
    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// The consumer plugin id, or [`CoreError::MissingScope`] when absent.
    pub fn require_plugin_id(&self) -> CoreResult<&PluginId> {
        self.consumer
            .as_ref()
            .ok_or_else(|| CoreError::MissingScope {
                service: self.service.to_string(),
                required_by: self.requester.clone(),
            })
    }

    /// Dependencies resolved for this consumer.
    pub fn deps(&self) -> &ResolvedDeps {
        &self.deps
    }
}

/// Yields the instance of a service for one consumer.
#[async_trait]
pub trait Producer<T: ?Sized>: Send + Sync + 'static {
    /// Produces the instance for `ctx.plugin_id()`.
    async fn produce(&self, ctx: ProduceContext) -> Result<Arc<T>, BoxError>;
}

#[async_trait]
impl<T, F, Fut> Producer<T> for F
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(ProduceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<T>, BoxError>> + Send + 'static,
{
    async fn produce(&self, ctx: ProduceContext) -> Result<Arc<T>, BoxError> {
        (self)(ctx).await
    }
}

/// Object-safe producer over erased instances.
pub(crate) trait ErasedProducer: Send + Sync {
    fn produce(&self, ctx: ProduceContext) -> BoxFuture<'static, Result<ServiceArc, BoxError>>;
}

struct TypedProducer<T: ?Sized, P> {
    inner: Arc<P>,
    _marker: std::marker::PhantomData<fn() -> Arc<T>>,
}

impl<T, P> ErasedProducer for TypedProducer<T, P>
where
    T: ?Sized + Send + Sync + 'static,
    P: Producer<T>,
{
    fn produce(&self, ctx: ProduceContext) -> BoxFuture<'static, Result<ServiceArc, BoxError>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let instance: Arc<T> = inner.produce(ctx).await?;
            Ok::<_, BoxError>(Arc::new(instance) as ServiceArc)
        })
    }
}

// =============================================================================
// ServiceFactory
// =============================================================================

type ConstructFn = dyn Fn(ResolvedDeps) -> BoxFuture<'static, Result<Arc<dyn ErasedProducer>, BoxError>>
    + Send
    + Sync;

/// Immutable descriptor binding a [`ServiceRef`] to its construction routine.
#[derive(Clone)]
pub struct ServiceFactory {
    service: AnyServiceRef,
    deps: Vec<AnyServiceRef>,
    construct: Arc<ConstructFn>,
}

impl ServiceFactory {
    /// Starts a factory for `service`.
    pub fn builder<T: ?Sized + Send + Sync + 'static>(
        service: &ServiceRef<T>,
    ) -> ServiceFactoryBuilder<T> {
        ServiceFactoryBuilder {
            service: service.clone(),
            deps: Vec::new(),
        }
    }

    /// The reference this factory provides.
    pub fn service(&self) -> &AnyServiceRef {
        &self.service
    }

    /// Declared dependencies.
    pub fn deps(&self) -> &[AnyServiceRef] {
        &self.deps
    }

    /// Dependencies handed to `construct`.
    pub fn root_deps(&self) -> impl Iterator<Item = &AnyServiceRef> {
        self.deps
            .iter()
            .filter(|dep| dep.scope() == ServiceScope::Root)
    }

    pub(crate) fn construct(
        &self,
        deps: ResolvedDeps,
    ) -> BoxFuture<'static, Result<Arc<dyn ErasedProducer>, BoxError>> {
        (self.construct)(deps)
    }
}

impl fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("service", &self.service.id())
            .field("scope", &self.service.scope())
            .field(
                "deps",
                &self.deps.iter().map(AnyServiceRef::id).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServiceFactory`].
pub struct ServiceFactoryBuilder<T: ?Sized> {
    service: ServiceRef<T>,
    deps: Vec<AnyServiceRef>,
}

impl<T: ?Sized + Send + Sync + 'static> ServiceFactoryBuilder<T> {
    /// Declares a dependency on another service.
    pub fn dep<D: ?Sized + 'static>(mut self, service: &ServiceRef<D>) -> Self {
        let erased = service.erase();
        if !self.deps.contains(&erased) {
            self.deps.push(erased);
        }
        self
    }

    /// Finishes with a two-level construction routine.
    ///
    /// `construct` runs once with the root-scoped dependencies and returns the
    /// producer that derives per-consumer instances.
    pub fn producer<C, Fut, P>(self, construct: C) -> ServiceFactory
    where
        C: Fn(ResolvedDeps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, BoxError>> + Send + 'static,
        P: Producer<T>,
    {
        let construct: Arc<ConstructFn> = Arc::new(
            move |deps: ResolvedDeps| -> BoxFuture<'static, Result<Arc<dyn ErasedProducer>, BoxError>> {
                let fut = construct(deps);
                Box::pin(async move {
                    let producer = fut.await?;
                    let erased: Arc<dyn ErasedProducer> = Arc::new(TypedProducer::<T, P> {
                        inner: Arc::new(producer),
                        _marker: std::marker::PhantomData,
                    });
                    Ok::<_, BoxError>(erased)
                })
            },
        );
        ServiceFactory {
            service: self.service.erase(),
            deps: self.deps,
            construct,
        }
    }

    /// Finishes with a single-level routine producing one instance per cache key.
    pub fn produce<P>(self, producer: P) -> ServiceFactory
    where
        P: Producer<T>,
    {
        let producer = Arc::new(producer);
        self.producer(move |_deps| {
            let producer = SharedProducer(Arc::clone(&producer));
            async move { Ok::<_, BoxError>(producer) }
        })
    }

    /// Finishes with a fixed instance, shared by every consumer.
    pub fn instance(self, instance: Arc<T>) -> ServiceFactory {
        self.produce(move |_ctx: ProduceContext| {
            let instance = Arc::clone(&instance);
            async move { Ok::<_, BoxError>(instance) }
        })
    }
}

/// Adapter letting an `Arc`-shared producer be returned from `construct` repeatedly.
struct SharedProducer<P>(Arc<P>);

#[async_trait]
impl<T, P> Producer<T> for SharedProducer<P>
where
    T: ?Sized + Send + Sync + 'static,
    P: Producer<T>,
{
    async fn produce(&self, ctx: ProduceContext) -> Result<Arc<T>, BoxError> {
        self.0.produce(ctx).await
    }
}
