//! Typed dependency registry.
//!
//! Providers are registered once, at setup, keyed by the type they produce.
//! At request time a handler's dependencies are resolved in the order its
//! signature declares them; each provider runs at most once per request and
//! its result is cached on the [`Context`], so two requests never observe
//! each other's instances.
//!
//! ```text
//! server.provide(|ctx: &mut Context| Validator::for_locale(ctx.header("accept-language")))
//!        ↓ stored under TypeId::of::<Validator>()
//! async fn create(ctx: Context, v: Validator) -> Context     ← Handler<(Validator,)>
//!        ↓ request arrives
//! registry.resolve::<Validator>(&mut ctx)                    ← provider runs, value cached
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;

use crate::context::Context;
use crate::paginator::PaginationArgs;

/// A boxed, thread-safe error, the common currency for provider and
/// page-fetch failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

type Factory = dyn Fn(&mut Context) -> Result<Box<dyn Any + Send + Sync>, BoxError> + Send + Sync;

/// Identifies a dependency type. Captured per handler when a route is
/// registered, so resolution is an ordered lookup, never signature inspection.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyKey {
    id: TypeId,
    name: &'static str,
}

impl DependencyKey {
    pub fn of<T: 'static>() -> Self {
        Self { id: TypeId::of::<T>(), name: type_name::<T>() }
    }

    pub fn type_name(&self) -> &'static str { self.name }
}

impl fmt::Debug for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Why a dependency could not be produced for a request.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no provider registered for `{type_name}`")]
    Missing { type_name: &'static str },

    #[error("provider for `{type_name}` failed: {source}")]
    Provider {
        type_name: &'static str,
        #[source]
        source: BoxError,
    },
}

/// Process-wide table of providers, frozen once the server starts.
///
/// [`Registry::new`] comes with a provider for [`PaginationArgs`] built in;
/// registering another provider for the same type replaces it.
pub struct Registry {
    providers: HashMap<TypeId, Box<Factory>>,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.provide(PaginationArgs::from_context);
        registry
    }

    /// A registry with no providers at all.
    pub fn empty() -> Self {
        Self { providers: HashMap::new() }
    }

    /// Registers an infallible provider for `T`.
    pub fn provide<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&mut Context) -> T + Send + Sync + 'static,
    {
        self.try_provide(move |ctx: &mut Context| Ok::<T, BoxError>(factory(ctx)))
    }

    /// Registers a fallible provider for `T`. A provider error aborts the
    /// request with a `500` before the handler runs.
    pub fn try_provide<T, E, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        E: Into<BoxError>,
        F: Fn(&mut Context) -> Result<T, E> + Send + Sync + 'static,
    {
        let erased: Box<Factory> = Box::new(move |ctx: &mut Context| {
            factory(ctx)
                .map(|v| Box::new(v) as Box<dyn Any + Send + Sync>)
                .map_err(Into::into)
        });
        if self.providers.insert(TypeId::of::<T>(), erased).is_some() {
            tracing::debug!(dependency = type_name::<T>(), "provider replaced");
        }
        self
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.providers.contains_key(&key.id)
    }

    /// Returns the request's instance of `T`, running its provider on the
    /// first call for this context and reusing the cached value afterwards.
    pub fn resolve<T>(&self, ctx: &mut Context) -> Result<T, ResolveError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = TypeId::of::<T>();
        let type_name = type_name::<T>();
        if !ctx.is_resolved(id) {
            let factory = self.providers.get(&id).ok_or(ResolveError::Missing { type_name })?;
            let value =
                factory(ctx).map_err(|source| ResolveError::Provider { type_name, source })?;
            ctx.cache(id, value);
        }
        ctx.resolved::<T>().cloned().ok_or(ResolveError::Missing { type_name })
    }
}

impl Default for Registry {
    fn default() -> Self { Self::new() }
}
