//! Reference registry: the set of reference ids issued to one backend.
//!
//! A [`RefRegistry`] is created per backend instance, so tests stay hermetic:
//! two backends in the same process never share reference identity.
//!
//! References enter the registry in two ways:
//!
//! - [`create_service_ref`](RefRegistry::create_service_ref) /
//!   [`create_extension_point`](RefRegistry::create_extension_point) issue a
//!   fresh id and fail if the id was issued before.
//! - [`admit`](RefRegistry::admit) records a reference declared as a
//!   `static` (via [`ServiceRef::new`]).  Admitting the same id again is fine
//!   as long as kind, scope, and type agree; anything else is a name collision
//!   between independently authored plugins.

use std::any::TypeId;
use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::refs::{AnyServiceRef, ExtensionPointRef, RefKind, ServiceRef, ServiceScope};

#[derive(Debug, Clone, Copy)]
struct Issued {
    kind: RefKind,
    scope: ServiceScope,
    type_id: TypeId,
    type_name: &'static str,
}

/// Registry of reference ids issued within one backend.
#[derive(Debug, Default)]
pub struct RefRegistry {
    issued: Mutex<HashMap<String, Issued>>,
}

impl RefRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new service reference.
    ///
    /// Fails with [`CoreError::DuplicateReference`] if `id` was already issued
    /// or admitted.
    pub fn create_service_ref<T: ?Sized + 'static>(
        &self,
        id: impl Into<String>,
        scope: ServiceScope,
    ) -> CoreResult<ServiceRef<T>> {
        let service = ServiceRef::<T>::owned(id.into(), scope);
        self.issue(&service.erase())?;
        Ok(service)
    }

    /// Issues a new extension point reference.
    pub fn create_extension_point<T: 'static>(
        &self,
        id: impl Into<String>,
    ) -> CoreResult<ExtensionPointRef<T>> {
        let point = ExtensionPointRef::<T>::owned(id.into());
        self.issue(&point.erase())?;
        Ok(point)
    }

    /// Records a statically declared reference.
    pub fn admit(&self, reference: &AnyServiceRef) -> CoreResult<()> {
        let mut issued = self.issued.lock();
        match issued.get(reference.id()) {
            Some(existing) => {
                if existing.kind != reference.kind() {
                    return Err(duplicate(
                        reference,
                        format!("declared as both {:?} and {:?}", existing.kind, reference.kind()),
                    ));
                }
                if existing.scope != reference.scope() {
                    return Err(duplicate(
                        reference,
                        format!(
                            "declared with both {} and {} scope",
                            existing.scope,
                            reference.scope()
                        ),
                    ));
                }
                if existing.type_id != reference.type_id() {
                    return Err(duplicate(
                        reference,
                        format!(
                            "declared with both {} and {}",
                            existing.type_name,
                            reference.type_name()
                        ),
                    ));
                }
                Ok(())
            }
            None => {
                trace!(reference = %reference, "Reference admitted");
                issued.insert(reference.id().to_string(), issued_from(reference));
                Ok(())
            }
        }
    }

    /// Returns `true` if `id` has been issued or admitted.
    pub fn contains(&self, id: &str) -> bool {
        self.issued.lock().contains_key(id)
    }

    /// Number of known reference ids.
    pub fn len(&self) -> usize {
        self.issued.lock().len()
    }

    /// Returns `true` if no reference has been issued yet.
    pub fn is_empty(&self) -> bool {
        self.issued.lock().is_empty()
    }

    fn issue(&self, reference: &AnyServiceRef) -> CoreResult<()> {
        let mut issued = self.issued.lock();
        if issued.contains_key(reference.id()) {
            return Err(duplicate(reference, "already created".to_string()));
        }
        issued.insert(reference.id().to_string(), issued_from(reference));
        Ok(())
    }
}

fn issued_from(reference: &AnyServiceRef) -> Issued {
    Issued {
        kind: reference.kind(),
        scope: reference.scope(),
        type_id: reference.type_id(),
        type_name: reference.type_name(),
    }
}

fn duplicate(reference: &AnyServiceRef, reason: String) -> CoreError {
    CoreError::DuplicateReference {
        id: reference.id().to_string(),
        reason,
    }
}
