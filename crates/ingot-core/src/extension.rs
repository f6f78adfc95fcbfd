//! Extension point registry.
//!
//! An extension point is a collaboration object published by exactly one
//! plugin during its register phase.  Other features obtain an
//! [`ExtensionHandle`] and mutate the object until the registry is frozen.
//!
//! ```text
//! Unregistered ──register()──► Registered (mutable via ExtensionHandle)
//!                                  │
//!                              freeze()   ← once every register routine ran
//!                                  ▼
//!                              Frozen (read-only Arc<T> views only)
//! ```
//!
//! After the freeze, handles refuse mutation with
//! [`CoreError::LateExtensionRegistration`], and consumers only ever receive
//! an `Arc<T>`, a shared read-only view.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{CoreError, CoreResult, Requester};
use crate::factory::ServiceArc;
use crate::refs::{ExtensionPointRef, PluginId};

// ─── ExtensionSlot ───────────────────────────────────────────────────────────

/// Storage of one extension point implementation.
struct ExtensionSlot<T> {
    open: Mutex<Option<T>>,
    frozen: OnceLock<Arc<T>>,
}

impl<T> ExtensionSlot<T> {
    fn new(implementation: T) -> Self {
        Self {
            open: Mutex::new(Some(implementation)),
            frozen: OnceLock::new(),
        }
    }
}

/// Object-safe view of a slot, so the registry can freeze slots of any type.
trait ErasedSlot: Send + Sync {
    fn freeze(&self);
    fn frozen_view(&self) -> Option<ServiceArc>;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static> ErasedSlot for ExtensionSlot<T> {
    fn freeze(&self) {
        if let Some(value) = self.open.lock().take() {
            let _ = self.frozen.set(Arc::new(value));
        }
    }

    fn frozen_view(&self) -> Option<ServiceArc> {
        self.frozen
            .get()
            .map(|view| Arc::new(Arc::clone(view)) as ServiceArc)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ─── ExtensionHandle ─────────────────────────────────────────────────────────

/// Mutation handle to a registered extension point.
///
/// Valid only during the register phase; once the registry is frozen every
/// [`update`](Self::update) fails.
pub struct ExtensionHandle<T> {
    id: Arc<str>,
    requester: Requester,
    slot: Arc<ExtensionSlot<T>>,
}

impl<T: Send + Sync + 'static> ExtensionHandle<T> {
    /// Extension point id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Mutates the implementation.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> CoreResult<R> {
        let mut open = self.slot.open.lock();
        match open.as_mut() {
            Some(value) => Ok(f(value)),
            None => Err(CoreError::LateExtensionRegistration {
                extension_point: self.id.to_string(),
                requester: self.requester.clone(),
            }),
        }
    }

    /// Read-only view, available once the registry is frozen.
    pub fn frozen(&self) -> Option<Arc<T>> {
        self.slot.frozen.get().cloned()
    }
}

impl<T> Clone for ExtensionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: Arc::clone(&self.id),
            requester: self.requester.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> std::fmt::Debug for ExtensionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHandle")
            .field("id", &self.id)
            .field("requester", &self.requester)
            .finish_non_exhaustive()
    }
}

// ─── ExtensionRegistry ───────────────────────────────────────────────────────

struct ExtensionEntry {
    owner: PluginId,
    slot: Arc<dyn ErasedSlot>,
}

/// Registry of extension point implementations for one backend.
#[derive(Default)]
pub struct ExtensionRegistry {
    frozen: AtomicBool,
    entries: Mutex<HashMap<Arc<str>, ExtensionEntry>>,
}

impl ExtensionRegistry {
    /// Creates an empty, unfrozen registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the implementation of `point`, owned by `owner`.
    ///
    /// Fails with [`CoreError::LateExtensionRegistration`] once frozen and
    /// with [`CoreError::DuplicateExtensionPoint`] if `point` already has an
    /// implementation.
    pub fn register<T: Send + Sync + 'static>(
        &self,
        owner: &PluginId,
        requester: &Requester,
        point: &ExtensionPointRef<T>,
        implementation: T,
    ) -> CoreResult<ExtensionHandle<T>> {
        let mut entries = self.entries.lock();
        if self.is_frozen() {
            return Err(CoreError::LateExtensionRegistration {
                extension_point: point.id().to_string(),
                requester: requester.clone(),
            });
        }
        if let Some(existing) = entries.get(point.id()) {
            return Err(CoreError::DuplicateExtensionPoint {
                extension_point: point.id().to_string(),
                owner: existing.owner.to_string(),
                requester: requester.clone(),
            });
        }

        let id: Arc<str> = Arc::from(point.id());
        let slot = Arc::new(ExtensionSlot::new(implementation));
        entries.insert(
            Arc::clone(&id),
            ExtensionEntry {
                owner: owner.clone(),
                slot: Arc::clone(&slot) as Arc<dyn ErasedSlot>,
            },
        );
        debug!(extension_point = %id, owner = %owner, "Extension point registered");

        Ok(ExtensionHandle {
            id,
            requester: requester.clone(),
            slot,
        })
    }

    /// Obtains a mutation handle for a registered extension point.
    pub fn handle<T: Send + Sync + 'static>(
        &self,
        requester: &Requester,
        point: &ExtensionPointRef<T>,
    ) -> CoreResult<ExtensionHandle<T>> {
        let entries = self.entries.lock();
        if self.is_frozen() {
            return Err(CoreError::LateExtensionRegistration {
                extension_point: point.id().to_string(),
                requester: requester.clone(),
            });
        }
        let entry = entries
            .get(point.id())
            .ok_or_else(|| CoreError::UnresolvedDependency {
                dependency: point.id().to_string(),
                required_by: requester.clone(),
            })?;
        let slot = Arc::clone(&entry.slot)
            .as_any()
            .downcast::<ExtensionSlot<T>>()
            .map_err(|_| CoreError::TypeMismatch {
                id: point.id().to_string(),
                expected: std::any::type_name::<T>(),
            })?;
        trace!(extension_point = %point.id(), requester = %requester, "Extension handle issued");

        Ok(ExtensionHandle {
            id: Arc::from(point.id()),
            requester: requester.clone(),
            slot,
        })
    }

    /// Freezes every registered extension point.
    ///
    /// Idempotent.  Registration and mutation are refused afterwards.
    pub fn freeze(&self) {
        let entries = self.entries.lock();
        if self.frozen.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in entries.values() {
            entry.slot.freeze();
        }
        debug!(count = entries.len(), "Extension points frozen");
    }

    /// Returns `true` once [`freeze`](Self::freeze) has run.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Returns `true` if `id` has a registered implementation.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Returns the plugin owning extension point `id`.
    pub fn owner(&self, id: &str) -> Option<PluginId> {
        self.entries.lock().get(id).map(|entry| entry.owner.clone())
    }

    /// Returns the ids of every registered extension point.
    pub fn ids(&self) -> Vec<Arc<str>> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Returns the frozen view of `id`, erased.
    ///
    /// Only available after [`freeze`](Self::freeze).
    pub(crate) fn view(&self, id: &str, requester: &Requester) -> CoreResult<ServiceArc> {
        let entries = self.entries.lock();
        let entry = entries
            .get(id)
            .ok_or_else(|| CoreError::UnresolvedDependency {
                dependency: id.to_string(),
                required_by: requester.clone(),
            })?;
        entry
            .slot
            .frozen_view()
            .ok_or_else(|| CoreError::invalid_state("read an extension point", "not frozen"))
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("frozen", &self.is_frozen())
            .field("ids", &self.ids())
            .finish()
    }
}
