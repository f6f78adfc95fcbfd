//! `core.rootLifecycle` and `core.lifecycle`: startup and shutdown hooks.
//!
//! [`RootLifecycle`] is the process-wide hook store; [`LifecycleService`] is
//! the plugin-scoped view of it that tags every hook with the consumer's id.
//!
//! ```text
//! start(): every init succeeded ──► startup hooks (registration order) ──► Running
//! stop():                          shutdown hooks (reverse order)     ──► Stopped
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use ingot_core::{
    BoxError, CoreError, CoreResult, PluginId, ProduceContext, Requester, ResolvedDeps,
    ServiceFactory, ServiceRef, ServiceScope,
};
use parking_lot::Mutex;
use tracing::{debug, error};

use super::metadata::PLUGIN_METADATA;

/// The process-wide hook store.
pub static ROOT_LIFECYCLE: ServiceRef<RootLifecycle> =
    ServiceRef::new("core.rootLifecycle", ServiceScope::Root);

/// Plugin-scoped lifecycle hooks.
pub static LIFECYCLE: ServiceRef<LifecycleService> =
    ServiceRef::new("core.lifecycle", ServiceScope::Plugin);

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

struct HookEntry {
    plugin_id: PluginId,
    hook: Hook,
}

fn boxed<F, Fut>(hook: F) -> Hook
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Box::new(move || -> BoxFuture<'static, Result<(), BoxError>> { Box::pin(hook()) })
}

// =============================================================================
// RootLifecycle
// =============================================================================

/// Stores startup and shutdown hooks for the whole backend.
#[derive(Default)]
pub struct RootLifecycle {
    startup: Mutex<Vec<HookEntry>>,
    shutdown: Mutex<Vec<HookEntry>>,
    started: AtomicBool,
}

impl RootLifecycle {
    /// Creates an empty hook store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook run once every init routine succeeded.
    ///
    /// Fails with [`CoreError::InvalidLifecycleState`] once startup hooks ran.
    pub fn add_startup_hook<F, Fut>(&self, plugin_id: &PluginId, hook: F) -> CoreResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let mut startup = self.startup.lock();
        if self.started.load(Ordering::SeqCst) {
            return Err(CoreError::invalid_state("add a startup hook", "running"));
        }
        startup.push(HookEntry {
            plugin_id: plugin_id.clone(),
            hook: boxed(hook),
        });
        Ok(())
    }

    /// Adds a hook run by `Backend::stop`.
    pub fn add_shutdown_hook<F, Fut>(&self, plugin_id: &PluginId, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.shutdown.lock().push(HookEntry {
            plugin_id: plugin_id.clone(),
            hook: boxed(hook),
        });
    }

    /// Number of pending startup hooks.
    pub fn startup_hook_count(&self) -> usize {
        self.startup.lock().len()
    }

    /// Number of pending shutdown hooks.
    pub fn shutdown_hook_count(&self) -> usize {
        self.shutdown.lock().len()
    }

    /// Runs startup hooks in registration order, stopping at the first failure.
    pub(crate) async fn run_startup_hooks(&self) -> CoreResult<()> {
        let hooks = {
            let mut startup = self.startup.lock();
            self.started.store(true, Ordering::SeqCst);
            std::mem::take(&mut *startup)
        };
        for entry in hooks {
            debug!(plugin = %entry.plugin_id, "Running startup hook");
            (entry.hook)().await.map_err(|e| {
                CoreError::from_routine(Requester::plugin(entry.plugin_id.as_str()), e)
            })?;
        }
        Ok(())
    }

    /// Runs shutdown hooks in reverse registration order.
    ///
    /// A failing hook is logged and reported; later hooks still run.
    pub(crate) async fn run_shutdown_hooks(&self) -> Vec<CoreError> {
        let hooks = std::mem::take(&mut *self.shutdown.lock());
        let mut failures = Vec::new();
        for entry in hooks.into_iter().rev() {
            debug!(plugin = %entry.plugin_id, "Running shutdown hook");
            if let Err(e) = (entry.hook)().await {
                let err = CoreError::from_routine(Requester::plugin(entry.plugin_id.as_str()), e);
                error!(plugin = %entry.plugin_id, error = %err, "Shutdown hook failed");
                failures.push(err);
            }
        }
        failures
    }
}

impl std::fmt::Debug for RootLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootLifecycle")
            .field("startup_hooks", &self.startup_hook_count())
            .field("shutdown_hooks", &self.shutdown_hook_count())
            .finish()
    }
}

/// Default factory for [`ROOT_LIFECYCLE`].
pub fn root_lifecycle_factory() -> ServiceFactory {
    ServiceFactory::builder(&ROOT_LIFECYCLE).produce(|_ctx: ProduceContext| async {
        Ok::<_, BoxError>(Arc::new(RootLifecycle::new()))
    })
}

// =============================================================================
// LifecycleService
// =============================================================================

/// Lifecycle hooks of one plugin.
#[derive(Debug, Clone)]
pub struct LifecycleService {
    plugin_id: PluginId,
    root: Arc<RootLifecycle>,
}

impl LifecycleService {
    /// The plugin the hooks are attributed to.
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// Adds a hook run after every init routine succeeded.
    pub fn add_startup_hook<F, Fut>(&self, hook: F) -> CoreResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.root.add_startup_hook(&self.plugin_id, hook)
    }

    /// Adds a hook run when the backend stops.
    pub fn add_shutdown_hook<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.root.add_shutdown_hook(&self.plugin_id, hook);
    }
}

/// Default factory for [`LIFECYCLE`].
pub fn lifecycle_factory() -> ServiceFactory {
    ServiceFactory::builder(&LIFECYCLE)
        .dep(&ROOT_LIFECYCLE)
        .dep(&PLUGIN_METADATA)
        .producer(|deps: ResolvedDeps| async move {
            let root = deps.get(&ROOT_LIFECYCLE)?;
            Ok::<_, BoxError>(move |ctx: ProduceContext| {
                let root = Arc::clone(&root);
                async move {
                    let meta = ctx.deps().get(&PLUGIN_METADATA)?;
                    Ok::<_, BoxError>(Arc::new(LifecycleService {
                        plugin_id: meta.plugin_id().clone(),
                        root,
                    }))
                }
            })
        })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn test_shutdown_hooks_run_in_reverse_and_survive_failures() {
        let root = RootLifecycle::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            root.add_shutdown_hook(&PluginId::from(name), move || async move {
                order.lock().push(name);
                if name == "second" {
                    return Err::<(), BoxError>("flush failed".into());
                }
                Ok(())
            });
        }

        let failures = root.run_shutdown_hooks().await;
        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].plugin_id(), Some("second"));
        assert_eq!(root.shutdown_hook_count(), 0);
    }

    #[tokio::test]
    async fn test_startup_hooks_close_after_running() {
        let root = RootLifecycle::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let id = PluginId::from("a");

        root.add_startup_hook(&id, move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        root.run_startup_hooks().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let late = root.add_startup_hook(&id, || async { Ok(()) });
        assert!(matches!(late, Err(CoreError::InvalidLifecycleState { .. })));
    }
}
