//! End-to-end scenarios against a real [`Backend`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use ingot_core::{
    BoxError, CoreError, DEFAULT_SERVICE_FACTORIES, ExtensionHandle, ExtensionPointRef, PluginId,
    ProduceContext, Requester, ServiceFactory, ServiceRef, ServiceScope,
};
use linkme::distributed_slice;
use parking_lot::Mutex;

use crate::services::{LIFECYCLE, PLUGIN_METADATA};
use crate::{Backend, BackendModule, BackendPlugin, BackendState, InitDescriptor, PluginLoadState};

// ─── Fixtures ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Greetings {
    items: Vec<String>,
}

impl Greetings {
    fn add_greeting(&mut self, greeting: impl Into<String>) {
        self.items.push(greeting.into());
    }
}

static GREETINGS: ExtensionPointRef<Greetings> = ExtensionPointRef::new("test.greetings");

#[derive(Debug)]
struct Clock {
    name: &'static str,
}

static CLOCK: ServiceRef<Clock> = ServiceRef::new("test.clock", ServiceScope::Root);

static LINKED: ServiceRef<str> = ServiceRef::new("test.linkedDefault", ServiceScope::Root);

fn linked_default() -> ServiceFactory {
    ServiceFactory::builder(&LINKED).instance(Arc::from("linked"))
}

#[distributed_slice(DEFAULT_SERVICE_FACTORIES)]
static LINKED_DEFAULT: fn() -> ServiceFactory = linked_default;

#[derive(Debug, thiserror::Error)]
#[error("disk on fire")]
struct DiskError;

/// A plugin whose init only declares `deps` and counts its invocations.
fn counting_plugin(id: &str, deps: InitDescriptorDeps, calls: Arc<AtomicUsize>) -> BackendPlugin {
    BackendPlugin::new(id, move |reg| {
        let builder = deps(InitDescriptor::builder());
        reg.register_init(builder.init(move |_deps| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(())
        }))?;
        Ok(())
    })
}

type InitDescriptorDeps =
    fn(crate::InitDescriptorBuilder) -> crate::InitDescriptorBuilder;

// ─── Resolution ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unbound_logger_names_service_and_plugin() {
    static LOGGER: ServiceRef<String> = ServiceRef::new("logger", ServiceScope::Plugin);

    let calls = Arc::new(AtomicUsize::new(0));
    let backend = Backend::new();
    backend
        .add(counting_plugin("A", |b| b.dep(&LOGGER), Arc::clone(&calls)))
        .unwrap();

    let err = backend.start().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::UnresolvedDependency { ref dependency, .. } if dependency == "logger"
    ));
    assert_eq!(err.plugin_id(), Some("A"));
    assert_eq!(backend.state(), BackendState::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cycle_fails_before_any_construction() {
    static PING: ServiceRef<u32> = ServiceRef::new("test.ping", ServiceScope::Root);
    static PONG: ServiceRef<u32> = ServiceRef::new("test.pong", ServiceScope::Root);

    let constructed = Arc::new(AtomicUsize::new(0));
    let counting = |service: &ServiceRef<u32>, dep: &ServiceRef<u32>| {
        let constructed = Arc::clone(&constructed);
        ServiceFactory::builder(service)
            .dep(dep)
            .produce(move |_ctx: ProduceContext| {
                constructed.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, BoxError>(Arc::new(0u32)) }
            })
    };
    let backend = Backend::builder()
        .default_factory(counting(&PING, &PONG))
        .default_factory(counting(&PONG, &PING))
        .build();

    let inits = Arc::new(AtomicUsize::new(0));
    backend
        .add(counting_plugin("A", |b| b.dep(&PING), Arc::clone(&inits)))
        .unwrap();

    let err = backend.start().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::CyclicDependency { ref path } if path == &["test.ping", "test.pong", "test.ping"]
    ));
    assert_eq!(constructed.load(Ordering::SeqCst), 0);
    assert_eq!(inits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_root_factory_on_plugin_service_is_rejected() {
    static STAMP: ServiceRef<String> = ServiceRef::new("test.stamp", ServiceScope::Root);

    let stamp = ServiceFactory::builder(&STAMP)
        .dep(&PLUGIN_METADATA)
        .instance(Arc::new("stamp".to_string()));
    let backend = Backend::builder().default_factory(stamp).build();
    backend
        .add(counting_plugin(
            "A",
            |b| b.dep(&STAMP),
            Arc::new(AtomicUsize::new(0)),
        ))
        .unwrap();

    let err = backend.start().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::MissingScope { ref service, .. } if service == "core.pluginMetadata"
    ));
}

#[tokio::test]
async fn test_static_ref_collision_fails_start() {
    static COUNT: ServiceRef<u32> = ServiceRef::new("test.collide", ServiceScope::Root);
    static NAME: ServiceRef<String> = ServiceRef::new("test.collide", ServiceScope::Root);
    static ROOT_LIMIT: ServiceRef<u32> = ServiceRef::new("test.limit", ServiceScope::Root);
    static PLUGIN_LIMIT: ServiceRef<u32> = ServiceRef::new("test.limit", ServiceScope::Plugin);

    let cases: [(InitDescriptorDeps, InitDescriptorDeps, &str); 2] = [
        (|b| b.dep(&COUNT), |b| b.dep(&NAME), "test.collide"),
        (|b| b.dep(&ROOT_LIMIT), |b| b.dep(&PLUGIN_LIMIT), "test.limit"),
    ];
    for (first, second, expected) in cases {
        let inits = Arc::new(AtomicUsize::new(0));
        let backend = Backend::new();
        backend
            .add(counting_plugin("A", first, Arc::clone(&inits)))
            .unwrap();
        backend
            .add(counting_plugin("B", second, Arc::clone(&inits)))
            .unwrap();

        let err = backend.start().await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::DuplicateReference { ref id, .. } if id == expected
        ));
        assert_eq!(backend.state(), BackendState::Failed);
        assert_eq!(inits.load(Ordering::SeqCst), 0);
    }
}

// ─── Bindings ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_last_override_wins() {
    let default = Arc::new(Clock { name: "default" });
    let first = Arc::new(Clock { name: "first" });
    let second = Arc::new(Clock { name: "second" });

    let backend = Backend::builder()
        .default_factory(ServiceFactory::builder(&CLOCK).instance(default))
        .overrides([
            ServiceFactory::builder(&CLOCK).instance(Arc::clone(&first)),
            ServiceFactory::builder(&CLOCK).instance(Arc::clone(&second)),
        ])
        .build();

    let observed: Arc<Mutex<Option<Arc<Clock>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    backend
        .add(BackendPlugin::new("A", move |reg| {
            reg.register_init(InitDescriptor::builder().dep(&CLOCK).init(
                move |deps| async move {
                    *slot.lock() = Some(deps.get(&CLOCK)?);
                    Ok::<_, BoxError>(())
                },
            ))?;
            Ok(())
        }))
        .unwrap();
    backend.start().await.unwrap();

    let clock = observed.lock().clone().unwrap();
    assert!(Arc::ptr_eq(&clock, &second));
    assert_eq!(clock.name, "second");
}

#[tokio::test]
async fn test_distributed_default_is_bound() {
    let observed = Arc::new(Mutex::new(String::new()));
    let slot = Arc::clone(&observed);
    let backend = Backend::new();
    assert!(backend.binding("test.linkedDefault").is_some());

    backend
        .add(BackendPlugin::new("A", move |reg| {
            reg.register_init(InitDescriptor::builder().dep(&LINKED).init(
                move |deps| async move {
                    slot.lock().push_str(&deps.get(&LINKED)?);
                    Ok::<_, BoxError>(())
                },
            ))?;
            Ok(())
        }))
        .unwrap();
    backend.start().await.unwrap();
    assert_eq!(*observed.lock(), "linked");
}

// ─── Scoping ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plugin_scoped_services_follow_the_consumer() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let backend = Backend::new();
    for id in ["A", "B"] {
        let seen = Arc::clone(&seen);
        backend
            .add(BackendPlugin::new(id, move |reg| {
                reg.register_init(
                    InitDescriptor::builder()
                        .dep(&PLUGIN_METADATA)
                        .dep(&LIFECYCLE)
                        .init(move |deps| async move {
                            let meta = deps.get(&PLUGIN_METADATA)?;
                            let lifecycle = deps.get(&LIFECYCLE)?;
                            assert_eq!(meta.plugin_id(), lifecycle.plugin_id());
                            seen.lock().push(meta.plugin_id().to_string());
                            Ok::<_, BoxError>(())
                        }),
                )?;
                Ok(())
            }))
            .unwrap();
    }
    backend.start().await.unwrap();

    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["A", "B"]);

    let cache = backend.instances().unwrap();
    let meta = PLUGIN_METADATA.erase();
    let a = cache.peek(&meta, Some(&PluginId::from("A"))).unwrap();
    let b = cache.peek(&meta, Some(&PluginId::from("B"))).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_root_service_constructed_once_for_many_plugins() {
    static SHARED: ServiceRef<usize> = ServiceRef::new("test.shared", ServiceScope::Root);

    let constructed = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&constructed);
    let shared = ServiceFactory::builder(&SHARED).produce(move |_ctx: ProduceContext| {
        let counted = Arc::clone(&counted);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, BoxError>(Arc::new(counted.fetch_add(1, Ordering::SeqCst)))
        }
    });
    let backend = Backend::builder().default_factory(shared).build();

    let inits = Arc::new(AtomicUsize::new(0));
    for i in 0..8 {
        backend
            .add(counting_plugin(
                &format!("plugin-{i}"),
                |b| b.dep(&SHARED),
                Arc::clone(&inits),
            ))
            .unwrap();
    }
    backend.start().await.unwrap();

    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert_eq!(inits.load(Ordering::SeqCst), 8);
}

// ─── Extension points ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_module_contributes_greeting_before_owner_init() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&observed);
    let backend = Backend::new();

    backend
        .add(BackendPlugin::new("B", move |reg| {
            reg.register_extension_point(&GREETINGS, Greetings::default())?;
            reg.register_init(InitDescriptor::builder().extension(&GREETINGS).init(
                move |deps| async move {
                    let greetings = deps.extension(&GREETINGS)?;
                    seen.lock().extend(greetings.items.iter().cloned());
                    Ok::<_, BoxError>(())
                },
            ))?;
            Ok(())
        }))
        .unwrap();
    backend
        .add(BackendModule::new("B", "C", |reg| {
            assert_eq!(reg.module_id(), Some("C"));
            reg.extension_point(&GREETINGS)?
                .update(|greetings| greetings.add_greeting("hi"))?;
            Ok(())
        }))
        .unwrap();

    backend.start().await.unwrap();
    assert_eq!(*observed.lock(), vec!["hi".to_string()]);
    assert_eq!(backend.plugin_state("B"), Some(PluginLoadState::Active));
}

#[tokio::test]
async fn test_module_init_reads_the_point_it_extended() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let backend = Backend::new();

    let seen = Arc::clone(&order);
    backend
        .add(BackendPlugin::new("B", move |reg| {
            reg.register_extension_point(&GREETINGS, Greetings::default())?;
            reg.register_init(InitDescriptor::builder().extension(&GREETINGS).init(
                move |deps| async move {
                    let greetings = deps.extension(&GREETINGS)?;
                    seen.lock().push(format!("B saw {}", greetings.items.join(",")));
                    Ok::<_, BoxError>(())
                },
            ))?;
            Ok(())
        }))
        .unwrap();

    let seen = Arc::clone(&order);
    backend
        .add(BackendModule::new("B", "C", move |reg| {
            reg.extension_point(&GREETINGS)?
                .update(|greetings| greetings.add_greeting("hi"))?;
            reg.register_init(InitDescriptor::builder().extension(&GREETINGS).init(
                move |deps| async move {
                    let greetings = deps.extension(&GREETINGS)?;
                    seen.lock().push(format!("C saw {}", greetings.items.join(",")));
                    Ok::<_, BoxError>(())
                },
            ))?;
            Ok(())
        }))
        .unwrap();

    backend.start().await.unwrap();
    assert_eq!(*order.lock(), vec!["C saw hi", "B saw hi"]);
    assert_eq!(backend.plugin_state("B"), Some(PluginLoadState::Active));
}

#[tokio::test]
async fn test_extension_point_closed_after_register_phase() {
    static LATE: ExtensionPointRef<Greetings> = ExtensionPointRef::new("test.late");

    let kept: Arc<Mutex<Option<ExtensionHandle<Greetings>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&kept);
    let backend = Backend::new();
    backend
        .add(BackendPlugin::new("B", move |reg| {
            *slot.lock() = Some(reg.register_extension_point(&GREETINGS, Greetings::default())?);
            Ok(())
        }))
        .unwrap();
    backend.start().await.unwrap();

    let late = backend.extensions().register(
        &PluginId::from("B"),
        &Requester::plugin("B"),
        &LATE,
        Greetings::default(),
    );
    assert!(matches!(
        late,
        Err(CoreError::LateExtensionRegistration { ref extension_point, .. }) if extension_point == "test.late"
    ));

    let handle = kept.lock().clone().unwrap();
    assert!(matches!(
        handle.update(|greetings| greetings.add_greeting("too late")),
        Err(CoreError::LateExtensionRegistration { .. })
    ));
    assert!(handle.frozen().unwrap().items.is_empty());
}

#[tokio::test]
async fn test_duplicate_extension_point_fails_start() {
    let backend = Backend::new();
    for id in ["X", "Y"] {
        backend
            .add(BackendPlugin::new(id, |reg| {
                reg.register_extension_point(&GREETINGS, Greetings::default())?;
                Ok(())
            }))
            .unwrap();
    }

    let err = backend.start().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::DuplicateExtensionPoint { ref owner, .. } if owner == "X"
    ));
    assert_eq!(err.plugin_id(), Some("Y"));
    assert_eq!(backend.plugin_state("Y"), Some(PluginLoadState::Failed));
    assert_eq!(backend.state(), BackendState::Failed);
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failing_module_init_stops_its_plugin() {
    let plugin_inits = Arc::new(AtomicUsize::new(0));
    let backend = Backend::new();
    backend
        .add(counting_plugin("P", |b| b, Arc::clone(&plugin_inits)))
        .unwrap();
    backend
        .add(BackendModule::new("P", "storage", |reg| {
            reg.register_init(
                InitDescriptor::builder()
                    .init(|_deps| async { Err::<(), BoxError>(Box::new(DiskError)) }),
            )?;
            Ok(())
        }))
        .unwrap();

    let err = backend.start().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Construction { ref origin, .. } if *origin == Requester::module("P", "storage")
    ));
    assert_eq!(err.plugin_id(), Some("P"));
    assert_eq!(plugin_inits.load(Ordering::SeqCst), 0);
    assert_eq!(backend.plugin_state("P"), Some(PluginLoadState::Failed));
    assert_eq!(backend.state(), BackendState::Failed);

    backend.stop().await.unwrap();
    assert_eq!(backend.state(), BackendState::Stopped);
}

#[tokio::test]
async fn test_init_waiting_on_a_dependency_is_skipped_after_a_sibling_fails() {
    static SLOW: ServiceRef<u32> = ServiceRef::new("test.slow", ServiceScope::Root);

    let slow = ServiceFactory::builder(&SLOW).produce(|_ctx: ProduceContext| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, BoxError>(Arc::new(1u32))
    });
    let backend = Backend::builder().default_factory(slow).build();

    // B is polled first, so its dependency is already in flight when A fails.
    let b_inits = Arc::new(AtomicUsize::new(0));
    backend
        .add(counting_plugin("B", |b| b.dep(&SLOW), Arc::clone(&b_inits)))
        .unwrap();
    backend
        .add(BackendPlugin::new("A", |reg| {
            reg.register_init(
                InitDescriptor::builder()
                    .init(|_deps| async { Err::<(), BoxError>(Box::new(DiskError)) }),
            )?;
            Ok(())
        }))
        .unwrap();

    let err = backend.start().await.unwrap_err();
    assert_eq!(err.plugin_id(), Some("A"));
    assert_eq!(err.to_string(), "plugin 'A' failed: disk on fire");
    assert_eq!(b_inits.load(Ordering::SeqCst), 0);
    assert_eq!(backend.plugin_state("B"), Some(PluginLoadState::Registered));

    let cache = backend.instances().unwrap();
    assert!(cache.peek(&SLOW.erase(), None).is_some());
}

#[tokio::test]
async fn test_undeclared_dependency_is_attributed_to_the_plugin() {
    let backend = Backend::new();
    backend
        .add(BackendPlugin::new("A", |reg| {
            reg.register_init(InitDescriptor::builder().init(|deps| async move {
                deps.get(&LIFECYCLE)?;
                Ok::<_, BoxError>(())
            }))?;
            Ok(())
        }))
        .unwrap();

    let err = backend.start().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::UnresolvedDependency { ref dependency, ref required_by }
            if dependency == "core.lifecycle" && *required_by == Requester::plugin("A")
    ));
    assert_eq!(err.plugin_id(), Some("A"));
}

#[tokio::test]
async fn test_root_producer_needing_a_consumer_is_attributed_to_the_requester() {
    static STAMPED: ServiceRef<String> = ServiceRef::new("test.stamped", ServiceScope::Root);

    let stamped = ServiceFactory::builder(&STAMPED).produce(|ctx: ProduceContext| async move {
        let plugin_id = ctx.require_plugin_id()?;
        Ok::<_, BoxError>(Arc::new(format!("stamped by {plugin_id}")))
    });
    let backend = Backend::with_overrides([stamped]);
    backend
        .add(counting_plugin(
            "A",
            |b| b.dep(&STAMPED),
            Arc::new(AtomicUsize::new(0)),
        ))
        .unwrap();

    let err = backend.start().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::MissingScope { ref service, .. } if service == "test.stamped"
    ));
    assert_eq!(err.plugin_id(), Some("A"));
}

#[tokio::test]
async fn test_failing_producer_is_attributed_to_the_consumer() {
    static FLAKY: ServiceRef<u32> = ServiceRef::new("test.flaky", ServiceScope::Plugin);

    let flaky = ServiceFactory::builder(&FLAKY).produce(|_ctx: ProduceContext| async {
        Err::<Arc<u32>, BoxError>(Box::new(DiskError))
    });
    let backend = Backend::with_overrides([flaky]);
    backend
        .add(counting_plugin(
            "A",
            |b| b.dep(&FLAKY),
            Arc::new(AtomicUsize::new(0)),
        ))
        .unwrap();

    let err = backend.start().await.unwrap_err();
    assert!(matches!(err, CoreError::Construction { .. }));
    assert_eq!(err.plugin_id(), Some("A"));
    assert!(err.to_string().contains("test.flaky"));
}

#[tokio::test]
async fn test_add_and_start_rejected_outside_assembling() {
    let backend = Backend::new();
    assert!(matches!(
        backend.stop().await,
        Err(CoreError::InvalidLifecycleState { .. })
    ));

    backend.start().await.unwrap();
    assert_eq!(backend.state(), BackendState::Running);

    let late = backend.add(BackendPlugin::new("late", |_reg| Ok(())));
    assert!(matches!(
        late,
        Err(CoreError::InvalidLifecycleState { operation: "add a feature", .. })
    ));
    assert!(matches!(
        backend.start().await,
        Err(CoreError::InvalidLifecycleState { .. })
    ));
}

#[tokio::test]
async fn test_invalid_feature_forest() {
    let backend = Backend::new();
    backend
        .add(BackendPlugin::new("A", |_reg| Ok(())))
        .unwrap();
    assert!(matches!(
        backend.add(BackendPlugin::new("A", |_reg| Ok(()))),
        Err(CoreError::DuplicateFeature { .. })
    ));

    backend
        .add(BackendModule::new("ghost", "m", |_reg| Ok(())))
        .unwrap();
    let err = backend.start().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::UnknownPlugin { ref plugin_id, .. } if plugin_id == "ghost"
    ));
}

#[tokio::test]
async fn test_second_init_is_rejected() {
    let backend = Backend::new();
    backend
        .add(BackendPlugin::new("A", |reg| {
            reg.register_init(InitDescriptor::builder().init(|_deps| async { Ok::<_, BoxError>(()) }))?;
            reg.register_init(InitDescriptor::builder().init(|_deps| async { Ok::<_, BoxError>(()) }))?;
            Ok(())
        }))
        .unwrap();

    let err = backend.start().await.unwrap_err();
    assert!(matches!(err, CoreError::DuplicateInit { .. }));
    assert_eq!(err.plugin_id(), Some("A"));
}

#[tokio::test]
async fn test_hooks_run_around_running_state() {
    let started = Arc::new(AtomicBool::new(false));
    let order = Arc::new(Mutex::new(Vec::new()));
    let backend = Backend::new();

    let (flag, log) = (Arc::clone(&started), Arc::clone(&order));
    backend
        .add(BackendPlugin::new("A", move |reg| {
            reg.register_init(InitDescriptor::builder().dep(&LIFECYCLE).init(
                move |deps| async move {
                    let lifecycle = deps.get(&LIFECYCLE)?;
                    lifecycle.add_startup_hook(move || async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok::<_, BoxError>(())
                    })?;
                    for name in ["one", "two", "three"] {
                        let log = Arc::clone(&log);
                        lifecycle.add_shutdown_hook(move || async move {
                            log.lock().push(name);
                            Ok::<_, BoxError>(())
                        });
                    }
                    Ok::<_, BoxError>(())
                },
            ))?;
            Ok(())
        }))
        .unwrap();

    backend.start().await.unwrap();
    assert!(started.load(Ordering::SeqCst));
    assert!(order.lock().is_empty());

    backend.stop().await.unwrap();
    assert_eq!(*order.lock(), vec!["three", "two", "one"]);
    assert_eq!(backend.state(), BackendState::Stopped);
}

#[test]
fn test_state_is_assembling_until_started() {
    let backend = Backend::new();
    assert_eq!(backend.state(), BackendState::Assembling);
    assert!(backend.instances().is_none());
    assert_eq!(BackendState::Failed.to_string(), "failed");
    tokio_test::assert_ok!(backend.add(BackendPlugin::new("A", |_reg| Ok(()))));
    assert_eq!(backend.plugin_state("A"), Some(PluginLoadState::Registered));
}
