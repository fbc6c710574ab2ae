//! Service registry: module name to provider registration, plus the
//! reverse index used to recognize a dying provider connection.
//!
//! All mutation and router lookups go through one `RwLock`, so
//! registration changes are linearizable with respect to dispatch. The
//! registry itself performs no I/O; teardown of superseded providers
//! (notice + disconnect) is the caller's job, done after the lock is
//! dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::connection::ConnectionDescriptor;

// ---------------------------------------------------------------------------
// ServiceRegistration
// ---------------------------------------------------------------------------

/// One provider's registration: its module name, the descriptor used to
/// forward requests to it, and the set of services it offers.
#[derive(Debug)]
pub struct ServiceRegistration {
    name: String,
    descriptor: Arc<ConnectionDescriptor>,
    services: HashSet<String>,
    builtin: bool,
}

impl ServiceRegistration {
    /// Module name this provider serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor of the provider's connection.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<ConnectionDescriptor> {
        &self.descriptor
    }

    /// Whether the provider offers the named service.
    #[must_use]
    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains(service)
    }

    /// The registered service names.
    #[must_use]
    pub fn services(&self) -> &HashSet<String> {
        &self.services
    }

    /// Whether this is the built-in control-plane registration.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.builtin
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Failure to register a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The name belongs to the built-in control plane and cannot be taken
    /// over by an external connection.
    #[error("provider name is reserved")]
    ReservedName,
}

/// Result of a successful registration.
#[derive(Debug)]
pub struct RegisterOutcome {
    /// The registration now in effect.
    pub registration: Arc<ServiceRegistration>,
    /// A previous registration under the same name from a different
    /// connection, removed in favor of the new one. The caller owes it a
    /// disconnect notice.
    pub superseded: Option<Arc<ServiceRegistration>>,
}

#[derive(Debug, Default)]
struct Inner {
    providers: HashMap<String, Arc<ServiceRegistration>>,
    /// Descriptor id -> provider name, for disconnect handling.
    by_descriptor: HashMap<u64, String>,
}

/// Shared provider registry.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    inner: RwLock<Inner>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or extends) the provider for `name`.
    ///
    /// Re-registration from the same connection unions the service names
    /// into the existing registration. Re-registration from a different
    /// connection supersedes the old one, which is returned in the outcome
    /// for the caller to tear down.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ReservedName`] when `name` is held by the built-in
    /// provider and the caller's connection is not the built-in one.
    pub fn register(
        &self,
        name: &str,
        descriptor: Arc<ConnectionDescriptor>,
        services: impl IntoIterator<Item = String>,
    ) -> Result<RegisterOutcome, RegistryError> {
        self.insert(name, descriptor, services, false)
    }

    /// Registers the built-in control-plane provider. Startup only.
    pub(crate) fn register_builtin(
        &self,
        name: &str,
        descriptor: Arc<ConnectionDescriptor>,
        services: impl IntoIterator<Item = String>,
    ) -> Arc<ServiceRegistration> {
        // The registry starts empty; the builtin insert cannot conflict.
        match self.insert(name, descriptor, services, true) {
            Ok(outcome) => outcome.registration,
            Err(_) => unreachable!("builtin registration cannot be rejected"),
        }
    }

    fn insert(
        &self,
        name: &str,
        descriptor: Arc<ConnectionDescriptor>,
        services: impl IntoIterator<Item = String>,
        builtin: bool,
    ) -> Result<RegisterOutcome, RegistryError> {
        let mut inner = self.inner.write();

        let mut merged: HashSet<String> = services.into_iter().collect();
        let mut superseded = None;

        if let Some(existing) = inner.providers.get(name) {
            if existing.descriptor().id() == descriptor.id() {
                merged.extend(existing.services().iter().cloned());
            } else if existing.is_builtin() && !builtin {
                return Err(RegistryError::ReservedName);
            } else {
                let old = Arc::clone(existing);
                inner.by_descriptor.remove(&old.descriptor().id());
                superseded = Some(old);
            }
        }

        let registration = Arc::new(ServiceRegistration {
            name: name.to_owned(),
            descriptor: Arc::clone(&descriptor),
            services: merged,
            builtin,
        });
        inner
            .providers
            .insert(name.to_owned(), Arc::clone(&registration));
        inner.by_descriptor.insert(descriptor.id(), name.to_owned());

        Ok(RegisterOutcome {
            registration,
            superseded,
        })
    }

    /// Removes the registration under `name`, if any.
    pub fn unregister(&self, name: &str) -> Option<Arc<ServiceRegistration>> {
        let mut inner = self.inner.write();
        let registration = inner.providers.remove(name)?;
        inner
            .by_descriptor
            .remove(&registration.descriptor().id());
        Some(registration)
    }

    /// Removes the registration backed by the given descriptor, if any.
    /// Used when a provider's connection dies.
    pub fn unregister_descriptor(&self, descriptor_id: u64) -> Option<Arc<ServiceRegistration>> {
        let mut inner = self.inner.write();
        let name = inner.by_descriptor.remove(&descriptor_id)?;
        inner.providers.remove(&name)
    }

    /// Looks up the provider registered for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ServiceRegistration>> {
        self.inner.read().providers.get(name).map(Arc::clone)
    }

    /// Name registered by the given descriptor, if it is a provider.
    #[must_use]
    pub fn provider_name_for(&self, descriptor_id: u64) -> Option<String> {
        self.inner.read().by_descriptor.get(&descriptor_id).cloned()
    }

    /// Removes every registration and returns them, shutdown order
    /// unspecified.
    pub fn drain(&self) -> Vec<Arc<ServiceRegistration>> {
        let mut inner = self.inner.write();
        inner.by_descriptor.clear();
        inner.providers.drain().map(|(_, reg)| reg).collect()
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().providers.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().providers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
