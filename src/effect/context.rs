//! Typed service context.
//!
//! A [`Context`] maps a type to one shared value of that type. It is
//! persistent: adding a service produces a new context and leaves the old
//! one untouched, so a child fiber can never observe a service its parent
//! added after the fork.

use super::Effect;
use crate::fiber::FiberContext;
use crate::types::{Defect, Exit};
use hashbrown::HashMap;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

type ServiceMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// A persistent map from service type to service value.
#[derive(Clone, Default)]
pub struct Context {
    services: Arc<ServiceMap>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("services", &self.services.len())
            .finish()
    }
}

impl Context {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context with `service` added, replacing any previous value
    /// of the same type.
    #[must_use]
    pub fn add<T: Any + Send + Sync>(&self, service: T) -> Self {
        let mut services = ServiceMap::clone(&self.services);
        services.insert(TypeId::of::<T>(), Arc::new(service));
        Self {
            services: Arc::new(services),
        }
    }

    /// Looks up the service of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let service = self.services.get(&TypeId::of::<T>())?;
        Arc::clone(service).downcast::<T>().ok()
    }

    /// Returns true if a service of type `T` is present.
    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if no service is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl<T, E> Effect<Arc<T>, E>
where
    T: Any + Send + Sync,
    E: Send + 'static,
{
    /// Reads the service of type `T` from the running fiber's context.
    ///
    /// A missing service is a defect: it means the program was assembled
    /// without providing it.
    #[must_use]
    pub fn service() -> Self {
        Self::from_fn(|ctx: FiberContext| {
            let exit = match ctx.services().get::<T>() {
                Some(service) => Exit::Success(service),
                None => Exit::die(Defect::new(format!(
                    "service not found: {}",
                    type_name::<T>()
                ))),
            };
            std::future::ready(exit)
        })
    }
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Runs `self` with `service` added to the context. Fibers forked from
    /// inside inherit it.
    #[must_use]
    pub fn provide_service<T>(self, service: T) -> Self
    where
        T: Any + Send + Sync + Clone,
    {
        Self::from_fn(move |ctx: FiberContext| {
            let services = ctx.services().add(service.clone());
            self.run_in(ctx.with_services(services))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::run_test;

    #[derive(Debug, Clone, PartialEq)]
    struct Greeting(&'static str);

    #[test]
    fn add_is_persistent() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("add_is_persistent");

        let empty = Context::new();
        let one = empty.add(Greeting("hi"));
        let two = one.add(7_u32);
        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
        assert_eq!(two.len(), 2);
        assert!(!one.contains::<u32>());
        assert_eq!(two.get::<Greeting>().as_deref(), Some(&Greeting("hi")));
        crate::test_complete!("add_is_persistent");
    }

    #[test]
    fn add_replaces_same_type() {
        let ctx = Context::new().add(1_u8).add(2_u8);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.get::<u8>().as_deref(), Some(&2));
    }

    #[test]
    fn service_reads_provided_value() {
        let effect = Effect::<Arc<Greeting>, ()>::service()
            .map(|g| g.0)
            .provide_service(Greeting("hello"));
        crate::assert_exit_success!(run_test(effect), "hello");
    }

    #[test]
    fn missing_service_is_a_defect() {
        let cause = crate::assert_exit_failure!(run_test(Effect::<Arc<Greeting>, ()>::service()));
        assert!(cause.is_die());
        let message = cause.defects()[0].message().to_string();
        assert!(message.contains("Greeting"), "{message}");
    }
}
