//! Service registration and resolution.
//!
//! # Responsibilities
//! - Collect service descriptors (instance or factory, with a lifetime)
//! - Resolve services by contract type, including `dyn Trait` contracts
//! - Cache singletons in the root provider and scoped services per scope
//! - Dispose the disposable services a provider created, in reverse order
//!
//! # Design Decisions
//! - Contracts are keyed by `TypeId`; the latest registration wins on
//!   `resolve`, `resolve_all` returns every registration in order
//! - Instances handed in by the caller are never disposed by the provider
//! - Factories run without holding any cache lock, so a factory may resolve
//!   other services; under contention a factory can run twice and only the
//!   first stored value is kept

use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::BoxError;

/// A service that releases resources when its provider is disposed.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifetime {
    /// One instance per root provider.
    Singleton,
    /// One instance per scope.
    Scoped,
    /// A new instance per resolution.
    Transient,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no service registered for `{type_name}`")]
    NotRegistered { type_name: &'static str },

    #[error("failed to create service `{type_name}`")]
    Factory {
        type_name: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("service provider has been disposed")]
    Disposed,
}

/// Type-erased `Arc<T>`. Boxing the `Arc` itself lets `T` be unsized.
type AnyArc = Arc<dyn Any + Send + Sync>;

struct Created {
    value: AnyArc,
    disposable: Option<Arc<dyn Disposable>>,
}

type Factory = Arc<dyn Fn(&ServiceProvider) -> Result<Created, BoxError> + Send + Sync>;

#[derive(Clone)]
enum ServiceKind {
    Instance(AnyArc),
    Factory(Factory),
}

#[derive(Clone)]
struct Descriptor {
    type_id: TypeId,
    type_name: &'static str,
    lifetime: ServiceLifetime,
    kind: ServiceKind,
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ServiceKind::Instance(_) => "instance",
            ServiceKind::Factory(_) => "factory",
        };
        f.debug_struct("Descriptor")
            .field("type_name", &self.type_name)
            .field("lifetime", &self.lifetime)
            .field("kind", &kind)
            .finish()
    }
}

/// Mutable list of service descriptors. Cloning copies the descriptors, not
/// the services.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    descriptors: Vec<Descriptor>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing instance. The caller keeps ownership of its
    /// disposal.
    pub fn add_instance<T>(&mut self, instance: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.descriptors.push(Descriptor {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            lifetime: ServiceLifetime::Singleton,
            kind: ServiceKind::Instance(Arc::new(instance)),
        });
        self
    }

    pub fn add_singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.add_factory(ServiceLifetime::Singleton, plain(factory))
    }

    pub fn add_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.add_factory(ServiceLifetime::Scoped, plain(factory))
    }

    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.add_factory(ServiceLifetime::Transient, plain(factory))
    }

    /// Register a singleton the root provider disposes on shutdown.
    pub fn add_disposable_singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Disposable + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.add_factory(ServiceLifetime::Singleton, disposable(factory))
    }

    /// Register a scoped service disposed together with its scope.
    pub fn add_disposable_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Disposable + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.add_factory(ServiceLifetime::Scoped, disposable(factory))
    }

    /// Register an instance unless the contract is already registered.
    pub fn try_add_instance<T>(&mut self, instance: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if !self.contains::<T>() {
            self.add_instance(instance);
        }
        self
    }

    /// Register a singleton factory unless the contract is already registered.
    pub fn try_add_singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        if !self.contains::<T>() {
            self.add_singleton(factory);
        }
        self
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        let id = TypeId::of::<T>();
        self.descriptors.iter().any(|d| d.type_id == id)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Freeze the current descriptors into a root provider.
    pub fn build(&self) -> ServiceProvider {
        ServiceProvider {
            inner: Arc::new(ProviderInner {
                descriptors: Arc::new(self.descriptors.clone()),
                root: None,
                cache: DashMap::new(),
                disposables: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    fn add_factory<T: ?Sized + 'static>(
        &mut self,
        lifetime: ServiceLifetime,
        factory: TypedFactory<T>,
    ) -> &mut Self {
        self.descriptors.push(Descriptor {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            lifetime,
            kind: ServiceKind::Factory(factory.0),
        });
        self
    }
}

/// A factory tagged with the contract it produces.
struct TypedFactory<T: ?Sized>(Factory, std::marker::PhantomData<fn() -> Box<T>>);

fn plain<T, F>(factory: F) -> TypedFactory<T>
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&ServiceProvider) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    TypedFactory(
        Arc::new(move |provider: &ServiceProvider| -> Result<Created, BoxError> {
            let value = factory(provider)?;
            Ok(Created {
                value: Arc::new(value),
                disposable: None,
            })
        }),
        std::marker::PhantomData,
    )
}

fn disposable<T, F>(factory: F) -> TypedFactory<T>
where
    T: Disposable + 'static,
    F: Fn(&ServiceProvider) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
{
    TypedFactory(
        Arc::new(move |provider: &ServiceProvider| -> Result<Created, BoxError> {
            let value = factory(provider)?;
            let dispose: Arc<dyn Disposable> = value.clone();
            Ok(Created {
                value: Arc::new(value),
                disposable: Some(dispose),
            })
        }),
        std::marker::PhantomData,
    )
}

struct ProviderInner {
    descriptors: Arc<Vec<Descriptor>>,
    /// `None` for the root provider.
    root: Option<ServiceProvider>,
    /// Descriptor index → created value.
    cache: DashMap<usize, AnyArc>,
    disposables: Mutex<Vec<Arc<dyn Disposable>>>,
    disposed: AtomicBool,
}

/// Resolves services from a frozen registry. Cheap to clone.
#[derive(Clone)]
pub struct ServiceProvider {
    inner: Arc<ProviderInner>,
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.inner.descriptors.len())
            .field("scope", &self.inner.root.is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ServiceProvider {
    /// Resolve the latest registration for `T`.
    pub fn resolve<T>(&self) -> Result<Arc<T>, ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let id = TypeId::of::<T>();
        let index = self
            .inner
            .descriptors
            .iter()
            .rposition(|d| d.type_id == id)
            .ok_or(ServiceError::NotRegistered {
                type_name: std::any::type_name::<T>(),
            })?;
        self.resolve_index(index).map(downcast::<T>)
    }

    /// Like [`resolve`](Self::resolve) but `Ok(None)` when `T` is not registered.
    pub fn try_resolve<T>(&self) -> Result<Option<Arc<T>>, ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.resolve::<T>() {
            Ok(service) => Ok(Some(service)),
            Err(ServiceError::NotRegistered { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolve every registration for `T` in registration order.
    pub fn resolve_all<T>(&self) -> Result<Vec<Arc<T>>, ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let id = TypeId::of::<T>();
        let indices: Vec<usize> = self
            .inner
            .descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.type_id == id)
            .map(|(i, _)| i)
            .collect();

        indices
            .into_iter()
            .map(|i| self.resolve_index(i).map(downcast::<T>))
            .collect()
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        let id = TypeId::of::<T>();
        self.inner.descriptors.iter().any(|d| d.type_id == id)
    }

    /// Create a child scope. Singletons still come from the root; scoped
    /// services get their own instances.
    pub fn create_scope(&self) -> ServiceProvider {
        let root = self.root().clone();
        ServiceProvider {
            inner: Arc::new(ProviderInner {
                descriptors: Arc::clone(&self.inner.descriptors),
                root: Some(root),
                cache: DashMap::new(),
                disposables: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Dispose every disposable service this provider created, newest first.
    ///
    /// Only the first call does anything. A panicking `dispose` is logged and
    /// the remaining services are still disposed.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let disposables = std::mem::take(
            &mut *self
                .inner
                .disposables
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for service in disposables.into_iter().rev() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| service.dispose())) {
                tracing::warn!(panic = %panic_message(panic.as_ref()), "Service disposal panicked");
            }
        }

        self.inner.cache.clear();
        tracing::debug!(scope = self.inner.root.is_some(), "Service provider disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn root(&self) -> &ServiceProvider {
        self.inner.root.as_ref().unwrap_or(self)
    }

    fn ensure_live(&self) -> Result<(), ServiceError> {
        if self.is_disposed() || self.root().is_disposed() {
            Err(ServiceError::Disposed)
        } else {
            Ok(())
        }
    }

    fn resolve_index(&self, index: usize) -> Result<AnyArc, ServiceError> {
        let descriptor = &self.inner.descriptors[index];
        match &descriptor.kind {
            ServiceKind::Instance(value) => Ok(Arc::clone(value)),
            ServiceKind::Factory(factory) => match descriptor.lifetime {
                ServiceLifetime::Singleton => self.root().cached(index, descriptor, factory),
                ServiceLifetime::Scoped => self.cached(index, descriptor, factory),
                ServiceLifetime::Transient => self.create(descriptor, factory),
            },
        }
    }

    fn cached(
        &self,
        index: usize,
        descriptor: &Descriptor,
        factory: &Factory,
    ) -> Result<AnyArc, ServiceError> {
        if let Some(value) = self.inner.cache.get(&index) {
            return Ok(Arc::clone(value.value()));
        }

        let created = self.invoke(descriptor, factory)?;
        match self.inner.cache.entry(index) {
            Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&created.value));
                self.track(created.disposable);
                Ok(created.value)
            }
        }
    }

    fn create(&self, descriptor: &Descriptor, factory: &Factory) -> Result<AnyArc, ServiceError> {
        let created = self.invoke(descriptor, factory)?;
        self.track(created.disposable);
        Ok(created.value)
    }

    fn invoke(&self, descriptor: &Descriptor, factory: &Factory) -> Result<Created, ServiceError> {
        factory(self).map_err(|source| ServiceError::Factory {
            type_name: descriptor.type_name,
            source,
        })
    }

    fn track(&self, disposable: Option<Arc<dyn Disposable>>) {
        if let Some(disposable) = disposable {
            self.inner
                .disposables
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(disposable);
        }
    }
}

fn downcast<T: ?Sized + Send + Sync + 'static>(value: AnyArc) -> Arc<T> {
    match value.downcast_ref::<Arc<T>>() {
        Some(service) => Arc::clone(service),
        // Descriptors are keyed by TypeId::of::<T>() and always store Arc<T>.
        None => unreachable!("service stored under mismatched type id"),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
