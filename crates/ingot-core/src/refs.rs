//! Service and extension point references.
//!
//! A reference is a pure identity: a string id, a scope, and a phantom type
//! describing what resolving it yields.  Two references are the same entity
//! iff their ids are equal.
//!
//! ```rust,ignore
//! pub static GREETER: ServiceRef<dyn Greeter> =
//!     ServiceRef::new("example.greeter", ServiceScope::Plugin);
//!
//! pub static GREETINGS: ExtensionPointRef<GreetingsExtension> =
//!     ExtensionPointRef::new("example.greetings");
//! ```

use std::any::TypeId;
use std::borrow::{Borrow, Cow};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

// ─── ServiceScope ────────────────────────────────────────────────────────────

/// How many instances a service yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceScope {
    /// One instance for the whole backend, shared by every consumer.
    Root,
    /// One instance per consumer plugin id.
    Plugin,
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Plugin => f.write_str("plugin"),
        }
    }
}

// ─── PluginId ────────────────────────────────────────────────────────────────

/// Identity of a consumer plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(Arc<str>);

impl PluginId {
    /// Creates a plugin id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for PluginId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PluginId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PluginId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PluginId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── RefKind / AnyServiceRef ─────────────────────────────────────────────────

/// Whether an erased reference names a service or an extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Resolved through a [`ServiceFactory`](crate::ServiceFactory).
    Service,
    /// Resolved to the frozen view of a registered extension point.
    ExtensionPoint,
}

/// Type-erased reference, used as the node identity of the dependency graph.
///
/// Equality and hashing consider the id only.
#[derive(Clone)]
pub struct AnyServiceRef {
    id: Arc<str>,
    scope: ServiceScope,
    kind: RefKind,
    type_id: TypeId,
    type_name: &'static str,
}

impl AnyServiceRef {
    /// Reference id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared reference id.
    pub fn shared_id(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    /// Reference scope.
    pub fn scope(&self) -> ServiceScope {
        self.scope
    }

    /// Reference kind.
    pub fn kind(&self) -> RefKind {
        self.kind
    }

    /// `TypeId` of the resolved value.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the resolved value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for AnyServiceRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AnyServiceRef {}

impl Hash for AnyServiceRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for AnyServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyServiceRef")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("kind", &self.kind)
            .field("type", &self.type_name)
            .finish()
    }
}

impl fmt::Display for AnyServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

// ─── ServiceRef ──────────────────────────────────────────────────────────────

/// Typed, named identity of a requestable service.
///
/// Resolving a `ServiceRef<T>` yields an `Arc<T>`; `T` is usually a
/// `dyn Trait` so implementations can be swapped without touching consumers.
pub struct ServiceRef<T: ?Sized> {
    id: Cow<'static, str>,
    scope: ServiceScope,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> ServiceRef<T> {
    /// Declares a reference with a static id, usable in `static` items.
    ///
    /// Collisions with other references of the same id are detected when the
    /// reference is admitted into a backend's [`RefRegistry`](crate::RefRegistry).
    pub const fn new(id: &'static str, scope: ServiceScope) -> Self {
        Self {
            id: Cow::Borrowed(id),
            scope,
            _marker: PhantomData,
        }
    }

    pub(crate) fn owned(id: String, scope: ServiceScope) -> Self {
        Self {
            id: Cow::Owned(id),
            scope,
            _marker: PhantomData,
        }
    }

    /// Reference id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reference scope.
    pub fn scope(&self) -> ServiceScope {
        self.scope
    }
}

impl<T: ?Sized + 'static> ServiceRef<T> {
    /// Erases the phantom type.
    pub fn erase(&self) -> AnyServiceRef {
        AnyServiceRef {
            id: Arc::from(self.id.as_ref()),
            scope: self.scope,
            kind: RefKind::Service,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

impl<T: ?Sized> Clone for ServiceRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            scope: self.scope,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> PartialEq for ServiceRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: ?Sized> Eq for ServiceRef<T> {}

impl<T: ?Sized> Hash for ServiceRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for ServiceRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRef")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .finish()
    }
}

// ─── ExtensionPointRef ───────────────────────────────────────────────────────

/// Typed, named identity of an extension point.
///
/// Structurally identical to a root-scoped [`ServiceRef`]; `T` is the
/// concrete collaboration object the owning plugin publishes.
pub struct ExtensionPointRef<T> {
    id: Cow<'static, str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ExtensionPointRef<T> {
    /// Declares an extension point reference with a static id.
    pub const fn new(id: &'static str) -> Self {
        Self {
            id: Cow::Borrowed(id),
            _marker: PhantomData,
        }
    }

    pub(crate) fn owned(id: String) -> Self {
        Self {
            id: Cow::Owned(id),
            _marker: PhantomData,
        }
    }

    /// Extension point id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T: 'static> ExtensionPointRef<T> {
    /// Erases the phantom type.
    pub fn erase(&self) -> AnyServiceRef {
        AnyServiceRef {
            id: Arc::from(self.id.as_ref()),
            scope: ServiceScope::Root,
            kind: RefKind::ExtensionPoint,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

impl<T> Clone for ExtensionPointRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for ExtensionPointRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ExtensionPointRef<T> {}

impl<T> Hash for ExtensionPointRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for ExtensionPointRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPointRef")
            .field("id", &self.id)
            .finish()
    }
}
