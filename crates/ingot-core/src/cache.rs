//! Scoped instance cache.
//!
//! The cache owns the bound factories of one backend and memoizes everything
//! they construct:
//!
//! - one producer per factory (the result of `construct`),
//! - one instance per `(service, consumer)` key, where the consumer is
//!   `None` for root-scoped services and the plugin id for plugin-scoped ones.
//!
//! Each key maps to a [`OnceCell`] that is inserted under a short mutex and
//! initialised outside of it.  Concurrent first requests for the same key all
//! await the single in-flight construction, so duplicate construction is
//! impossible.  Failures are cached too: a key whose construction failed
//! keeps returning the same error.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, error, trace};

use crate::error::{CoreError, CoreResult, Requester};
use crate::extension::ExtensionRegistry;
use crate::factory::{ErasedProducer, ProduceContext, ResolvedDeps, ServiceArc, ServiceFactory};
use crate::refs::{AnyServiceRef, PluginId, RefKind, ServiceScope};

type InstanceKey = (Arc<str>, Option<PluginId>);
type InstanceSlot = Arc<OnceCell<CoreResult<ServiceArc>>>;
type ProducerSlot = Arc<OnceCell<CoreResult<Arc<dyn ErasedProducer>>>>;

/// Memoizing store of constructed service instances.
pub struct InstanceCache {
    factories: HashMap<Arc<str>, ServiceFactory>,
    extensions: Arc<ExtensionRegistry>,
    producers: Mutex<HashMap<Arc<str>, ProducerSlot>>,
    instances: Mutex<HashMap<InstanceKey, InstanceSlot>>,
    /// Keys in the order their construction completed successfully.
    constructed: Mutex<Vec<InstanceKey>>,
    aborted: AtomicBool,
}

impl InstanceCache {
    /// Creates a cache over the given bound factories.
    ///
    /// When several factories provide the same id, the last one wins.
    pub fn new(
        factories: impl IntoIterator<Item = ServiceFactory>,
        extensions: Arc<ExtensionRegistry>,
    ) -> Self {
        let factories = factories
            .into_iter()
            .map(|factory| (factory.service().shared_id(), factory))
            .collect();
        Self {
            factories,
            extensions,
            producers: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
            constructed: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
        }
    }

    /// Returns the factory bound to `id`.
    pub fn factory(&self, id: &str) -> Option<&ServiceFactory> {
        self.factories.get(id)
    }

    /// Resolves `service` for `consumer`, constructing it on first request.
    ///
    /// `requester` is used for error attribution only.
    pub fn get<'a>(
        &'a self,
        service: &'a AnyServiceRef,
        consumer: Option<&'a PluginId>,
        requester: &'a Requester,
    ) -> BoxFuture<'a, CoreResult<ServiceArc>> {
        Box::pin(async move {
            let factory =
                self.factories
                    .get(service.id())
                    .ok_or_else(|| CoreError::UnresolvedDependency {
                        dependency: service.id().to_string(),
                        required_by: requester.clone(),
                    })?;

            let key_consumer = match factory.service().scope() {
                ServiceScope::Root => None,
                ServiceScope::Plugin => Some(consumer.cloned().ok_or_else(|| {
                    CoreError::MissingScope {
                        service: service.id().to_string(),
                        required_by: requester.clone(),
                    }
                })?),
            };
            let key: InstanceKey = (service.shared_id(), key_consumer);

            let slot = {
                let mut instances = self.instances.lock();
                Arc::clone(instances.entry(key.clone()).or_default())
            };

            slot.get_or_init(|| self.construct_instance(factory, key, consumer))
                .await
                .clone()
        })
    }

    /// Resolves every reference in `deps` for `consumer`.
    ///
    /// Services resolve through the cache (concurrently, all in-flight
    /// constructions run to completion before the first error is returned);
    /// extension points resolve to their frozen views.
    pub async fn resolve_deps(
        &self,
        deps: &[AnyServiceRef],
        consumer: Option<&PluginId>,
        requester: &Requester,
    ) -> CoreResult<ResolvedDeps> {
        let results = future::join_all(deps.iter().map(|dep| async move {
            let instance = match dep.kind() {
                RefKind::Service => self.get(dep, consumer, requester).await,
                RefKind::ExtensionPoint => self.extensions.view(dep.id(), requester),
            };
            instance.map(|instance| (dep.shared_id(), instance))
        }))
        .await;

        let mut resolved = ResolvedDeps::for_requester(requester.clone());
        for result in results {
            let (id, instance) = result?;
            resolved.insert(id, instance);
        }
        Ok(resolved)
    }

    /// Returns an already constructed instance without constructing anything.
    pub fn peek(&self, service: &AnyServiceRef, consumer: Option<&PluginId>) -> Option<ServiceArc> {
        let consumer = match service.scope() {
            ServiceScope::Root => None,
            ServiceScope::Plugin => Some(consumer?.clone()),
        };
        let instances = self.instances.lock();
        let slot = instances.get(&(service.shared_id(), consumer))?;
        slot.get().and_then(|result| result.as_ref().ok().cloned())
    }

    /// Stops new constructions; in-flight ones still complete.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`abort`](Self::abort) was called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// `(service id, consumer)` pairs in the order their construction completed.
    pub fn construction_order(&self) -> Vec<(String, Option<PluginId>)> {
        self.constructed
            .lock()
            .iter()
            .map(|(id, consumer)| (id.to_string(), consumer.clone()))
            .collect()
    }

    async fn construct_instance(
        &self,
        factory: &ServiceFactory,
        key: InstanceKey,
        origin: Option<&PluginId>,
    ) -> CoreResult<ServiceArc> {
        let service = factory.service();
        if self.is_aborted() {
            return Err(CoreError::Aborted {
                service: service.id().to_string(),
            });
        }

        let requester = Requester::service(service.id(), origin.map(PluginId::as_str));
        let consumer = key.1.clone();

        let producer = self.producer(factory, &requester).await?;
        let deps = self
            .resolve_deps(factory.deps(), consumer.as_ref(), &requester)
            .await?;

        trace!(service = %service, consumer = ?consumer, "Producing instance");
        let ctx = ProduceContext::new(
            service.shared_id(),
            consumer.clone(),
            requester.clone(),
            deps,
        );
        match producer.produce(ctx).await {
            Ok(instance) => {
                debug!(service = %service, consumer = ?consumer, "Service instance constructed");
                self.constructed.lock().push(key);
                Ok(instance)
            }
            Err(e) => {
                error!(service = %service, consumer = ?consumer, error = %e, "Service producer failed");
                Err(CoreError::from_routine(requester, e))
            }
        }
    }

    async fn producer(
        &self,
        factory: &ServiceFactory,
        requester: &Requester,
    ) -> CoreResult<Arc<dyn ErasedProducer>> {
        let id = factory.service().shared_id();
        let slot = {
            let mut producers = self.producers.lock();
            Arc::clone(producers.entry(id).or_default())
        };

        slot.get_or_init(|| async {
            let root_deps: Vec<AnyServiceRef> = factory.root_deps().cloned().collect();
            let deps = self.resolve_deps(&root_deps, None, requester).await?;
            factory.construct(deps).await.map_err(|e| {
                error!(service = %factory.service(), error = %e, "Service factory construct failed");
                CoreError::from_routine(requester.clone(), e)
            })
        })
        .await
        .clone()
    }
}

impl std::fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCache")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("instances", &self.instances.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::error::BoxError;
    use crate::refs::ServiceRef;

    struct Counter {
        serial: usize,
    }

    static ROOT_COUNTER: ServiceRef<Counter> = ServiceRef::new("test.rootCounter", ServiceScope::Root);
    static PLUGIN_COUNTER: ServiceRef<Counter> =
        ServiceRef::new("test.pluginCounter", ServiceScope::Plugin);

    fn counting_factory(service: &ServiceRef<Counter>, calls: Arc<AtomicUsize>) -> ServiceFactory {
        ServiceFactory::builder(service).produce(move |_ctx: ProduceContext| {
            let calls = Arc::clone(&calls);
            async move {
                // Widen the race window for concurrent first access.
                tokio::time::sleep(Duration::from_millis(20)).await;
                let serial = calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(Arc::new(Counter { serial }))
            }
        })
    }

    fn cache_with(factories: Vec<ServiceFactory>) -> Arc<InstanceCache> {
        Arc::new(InstanceCache::new(
            factories,
            Arc::new(ExtensionRegistry::new()),
        ))
    }

    fn counter(instance: &ServiceArc) -> Arc<Counter> {
        Arc::clone(instance.downcast_ref::<Arc<Counter>>().unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_root_service_constructed_once_under_concurrency() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache_with(vec![counting_factory(&ROOT_COUNTER, Arc::clone(&calls))]);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let plugin = PluginId::from(format!("plugin-{i}"));
                    let requester = Requester::plugin(plugin.as_str());
                    let service = ROOT_COUNTER.erase();
                    let instance = cache.get(&service, Some(&plugin), &requester).await;
                    counter(&instance.unwrap()).serial
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_plugin_service_memoized_per_consumer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = cache_with(vec![counting_factory(&PLUGIN_COUNTER, Arc::clone(&calls))]);
        let service = PLUGIN_COUNTER.erase();
        let (a, b) = (PluginId::from("a"), PluginId::from("b"));
        let (ra, rb) = (Requester::plugin("a"), Requester::plugin("b"));

        let a1 = counter(&cache.get(&service, Some(&a), &ra).await.unwrap());
        let b1 = counter(&cache.get(&service, Some(&b), &rb).await.unwrap());
        let a2 = counter(&cache.get(&service, Some(&a), &ra).await.unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b1));
        assert_eq!(cache.construction_order().len(), 2);
    }

    #[tokio::test]
    async fn test_plugin_service_without_consumer_fails() {
        let cache = cache_with(vec![counting_factory(
            &PLUGIN_COUNTER,
            Arc::new(AtomicUsize::new(0)),
        )]);
        let result = cache
            .get(&PLUGIN_COUNTER.erase(), None, &Requester::Root)
            .await;
        assert!(matches!(result, Err(CoreError::MissingScope { .. })));
    }

    #[tokio::test]
    async fn test_failure_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let failing = ServiceFactory::builder(&ROOT_COUNTER).produce(move |_ctx: ProduceContext| {
            counted.fetch_add(1, Ordering::SeqCst);
            async move { Err::<Arc<Counter>, BoxError>("database unreachable".into()) }
        });
        let cache = cache_with(vec![failing]);
        let service = ROOT_COUNTER.erase();

        let first = cache.get(&service, None, &Requester::plugin("a")).await;
        let second = cache.get(&service, None, &Requester::plugin("b")).await;

        assert!(matches!(first, Err(CoreError::Construction { .. })));
        assert!(matches!(second, Err(CoreError::Construction { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.peek(&service, None).is_none());
    }

    #[tokio::test]
    async fn test_dependencies_resolved_before_dependent() {
        static BASE: ServiceRef<Counter> = ServiceRef::new("test.base", ServiceScope::Root);
        static DERIVED: ServiceRef<usize> = ServiceRef::new("test.derived", ServiceScope::Plugin);

        let calls = Arc::new(AtomicUsize::new(0));
        let derived = ServiceFactory::builder(&DERIVED)
            .dep(&BASE)
            .producer(|deps: ResolvedDeps| async move {
                let base = deps.get(&BASE)?;
                Ok::<_, BoxError>(move |_ctx: ProduceContext| {
                    let value = base.serial + 100;
                    async move { Ok::<_, BoxError>(Arc::new(value)) }
                })
            });
        let cache = cache_with(vec![counting_factory(&BASE, calls), derived]);

        let plugin = PluginId::from("a");
        let deps = tokio_test::assert_ok!(
            cache
                .resolve_deps(&[DERIVED.erase()], Some(&plugin), &Requester::plugin("a"))
                .await
        );
        assert_eq!(deps.requester(), &Requester::plugin("a"));

        assert_eq!(*deps.get(&DERIVED).unwrap(), 100);
        let order: Vec<String> = cache
            .construction_order()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(order, vec!["test.base", "test.derived"]);
    }

    #[tokio::test]
    async fn test_aborted_cache_refuses_new_constructions() {
        let cache = cache_with(vec![counting_factory(
            &ROOT_COUNTER,
            Arc::new(AtomicUsize::new(0)),
        )]);
        cache.abort();
        let err = tokio_test::assert_err!(
            cache
                .get(&ROOT_COUNTER.erase(), None, &Requester::Root)
                .await
        );
        assert!(matches!(err, CoreError::Aborted { .. }));
    }
}
