//! Service container: activity instantiation with injected dependencies
//!
//! The executor never constructs activities directly. Each activity node
//! carries an [`ActivityToken`]; at invocation time the token is resolved
//! against a [`ServiceContainer`] that the caller passes to
//! [`Flow::run`](crate::Flow::run). Three registration modes exist:
//!
//! - [`add_singleton`](ServiceContainer::add_singleton) — a pre-built
//!   instance shared across all runs. Access is serialized: activity
//!   instances are not thread-safe, so concurrent invocations queue.
//! - [`add_singleton_factory`](ServiceContainer::add_singleton_factory) —
//!   one instance per run, constructed on first use.
//! - [`add_transient`](ServiceContainer::add_transient) — a fresh instance
//!   per invocation.
//!
//! There is no reflection: factories are plain closures published at
//! registration time. A factory receives the container and can pull shared
//! services out of it:
//!
//! ```rust,ignore
//! let mut services = ServiceContainer::new();
//! services.add_service(HttpClient::new());
//! services.add_transient(|c: &ServiceContainer| {
//!     let client = c.service::<HttpClient>()
//!         .ok_or_else(|| ActivityError::new("HttpClient not registered"))?;
//!     Ok(FetchActivity::new(client))
//! });
//! ```
//!
//! Resolution failures (unregistered type, factory error) surface as
//! instantiation faults at the requesting node and route to its effective
//! fault handler like any other runtime fault.

use crate::activity::{Activity, ActivityToken, ErasedActivity};
use crate::error::ActivityError;
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// A singleton activity instance. The async mutex serializes invocations;
/// it is the one lock in the engine that legitimately spans an await.
pub(crate) type SharedActivity = Arc<AsyncMutex<Box<dyn ErasedActivity>>>;

type ActivityFactory =
    Box<dyn Fn(&ServiceContainer) -> Result<Box<dyn ErasedActivity>, ActivityError> + Send + Sync>;

enum Registration {
    Instance(SharedActivity),
    Singleton(ActivityFactory),
    Transient(ActivityFactory),
}

/// An activity resolved for one invocation.
pub(crate) enum ResolvedActivity {
    /// Freshly constructed, owned by this invocation.
    Owned(Box<dyn ErasedActivity>),
    /// Shared singleton; the caller locks it for the invocation.
    Shared(SharedActivity),
}

/// Per-run cache of singleton-by-type instances.
#[derive(Default)]
pub(crate) struct SingletonCache {
    instances: Mutex<HashMap<TypeId, SharedActivity>>,
}

/// Registry of activity types and injectable services.
#[derive(Default)]
pub struct ServiceContainer {
    registrations: RwLock<HashMap<TypeId, Registration>>,
    services: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pre-built activity instance shared across all runs.
    pub fn add_singleton<A: Activity>(&mut self, instance: A) {
        self.registrations.write().insert(
            TypeId::of::<A>(),
            Registration::Instance(Arc::new(AsyncMutex::new(Box::new(instance)))),
        );
    }

    /// Register an activity constructed once per run.
    pub fn add_singleton_factory<A, F>(&mut self, factory: F)
    where
        A: Activity,
        F: Fn(&ServiceContainer) -> Result<A, ActivityError> + Send + Sync + 'static,
    {
        self.registrations.write().insert(
            TypeId::of::<A>(),
            Registration::Singleton(Box::new(move |c| {
                factory(c).map(|a| Box::new(a) as Box<dyn ErasedActivity>)
            })),
        );
    }

    /// Register an activity constructed fresh for every invocation.
    pub fn add_transient<A, F>(&mut self, factory: F)
    where
        A: Activity,
        F: Fn(&ServiceContainer) -> Result<A, ActivityError> + Send + Sync + 'static,
    {
        self.registrations.write().insert(
            TypeId::of::<A>(),
            Registration::Transient(Box::new(move |c| {
                factory(c).map(|a| Box::new(a) as Box<dyn ErasedActivity>)
            })),
        );
    }

    /// Register an injectable service available to activity factories.
    pub fn add_service<S: Send + Sync + 'static>(&mut self, service: S) {
        self.services
            .write()
            .insert(TypeId::of::<S>(), Arc::new(service));
    }

    /// Look up a previously registered service.
    pub fn service<S: Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.services
            .read()
            .get(&TypeId::of::<S>())
            .cloned()
            .and_then(|any| any.downcast::<S>().ok())
    }

    /// Resolve an activity for one invocation.
    pub(crate) fn resolve(
        &self,
        token: ActivityToken,
        run_cache: &SingletonCache,
    ) -> Result<ResolvedActivity, ActivityError> {
        let registrations = self.registrations.read();
        match registrations.get(&token.type_id()) {
            Some(Registration::Instance(shared)) => Ok(ResolvedActivity::Shared(shared.clone())),
            Some(Registration::Transient(factory)) => factory(self).map(ResolvedActivity::Owned),
            Some(Registration::Singleton(factory)) => {
                let mut cache = run_cache.instances.lock();
                if let Some(existing) = cache.get(&token.type_id()) {
                    return Ok(ResolvedActivity::Shared(existing.clone()));
                }
                let instance: SharedActivity = Arc::new(AsyncMutex::new(factory(self)?));
                cache.insert(token.type_id(), instance.clone());
                Ok(ResolvedActivity::Shared(instance))
            }
            None => Err(ActivityError::new(format!(
                "no registration for activity type '{}'",
                token.type_name()
            ))),
        }
    }
}
