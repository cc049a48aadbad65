//! Handler trait and type erasure.
//!
//! # How typed handlers are stored
//!
//! A handler is any async function whose first argument is the [`Context`]
//! and whose remaining arguments are dependencies:
//!
//! ```text
//! async fn list(ctx: Context, args: PaginationArgs, db: Pool) -> Context
//! ```
//!
//! The router holds handlers of *different* types in one table, so each one
//! is wrapped in `FnHandler` and stored behind a trait object. The argument
//! tuple (`(PaginationArgs, Pool)` above) is only a marker that keeps the
//! blanket impls below apart; it is turned into an ordered list of
//! [`DependencyKey`]s at registration time and never inspected again.
//!
//! ```text
//! router.route("/items", list, &[Method::GET])
//!        ↓ Handler<(PaginationArgs, Pool)>::dependencies()   ← keys captured
//! Arc::new(FnHandler { f: list, deps, .. })                 ← stored as BoxedHandler
//!        ↓ request arrives
//! handler.call(ctx, &registry)                              ← resolve in order, then invoke
//! ```
//!
//! The handler gets the context back by value and returns it once it has
//! written a response or recorded field errors.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::dependency::{DependencyKey, Registry, ResolveError};

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` lets tokio move it across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Internal dispatch interface.
pub(crate) trait ErasedHandler {
    fn dependencies(&self) -> &[DependencyKey];

    /// Resolves every dependency in declared order, then starts the handler.
    /// Nothing runs if any dependency fails.
    fn call(&self, ctx: Context, registry: &Registry) -> Result<BoxFuture<Context>, ResolveError>;
}

pub(crate) type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any function
///
/// ```text
/// async fn name(ctx: Context, dep1: D1, …, depN: DN) -> Context
/// ```
///
/// with up to six dependencies, each `Clone + Send + Sync + 'static`.
/// The trait is sealed: only the blanket impls below can satisfy it.
pub trait Handler<Args>: private::Sealed<Args> + Clone + Send + Sync + 'static {
    /// The dependency types this handler needs, in declared order.
    fn dependencies() -> Vec<DependencyKey>;

    #[doc(hidden)]
    fn invoke(&self, ctx: Context, registry: &Registry) -> Result<BoxFuture<Context>, ResolveError>;
}

pub(crate) fn boxed<H, Args>(handler: H) -> BoxedHandler
where
    H: Handler<Args>,
    Args: 'static,
{
    Arc::new(FnHandler { f: handler, deps: H::dependencies(), _args: PhantomData })
}

mod private {
    pub trait Sealed<Args> {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

macro_rules! impl_handler {
    ($($dep:ident),*) => {
        impl<F, Fut, $($dep,)*> private::Sealed<($($dep,)*)> for F
        where
            F: Fn(Context, $($dep,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Context> + Send + 'static,
            $($dep: Clone + Send + Sync + 'static,)*
        {
        }

        impl<F, Fut, $($dep,)*> Handler<($($dep,)*)> for F
        where
            F: Fn(Context, $($dep,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Context> + Send + 'static,
            $($dep: Clone + Send + Sync + 'static,)*
        {
            fn dependencies() -> Vec<DependencyKey> {
                vec![$(DependencyKey::of::<$dep>(),)*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(
                &self,
                mut ctx: Context,
                registry: &Registry,
            ) -> Result<BoxFuture<Context>, ResolveError> {
                $(let $dep = registry.resolve::<$dep>(&mut ctx)?;)*
                Ok(Box::pin((self)(ctx, $($dep,)*)))
            }
        }
    };
}

impl_handler!();
impl_handler!(D1);
impl_handler!(D1, D2);
impl_handler!(D1, D2, D3);
impl_handler!(D1, D2, D3, D4);
impl_handler!(D1, D2, D3, D4, D5);
impl_handler!(D1, D2, D3, D4, D5, D6);

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Holds a concrete handler and its captured dependency keys, bridging the
/// typed world to the trait-object world.
struct FnHandler<H, Args> {
    f: H,
    deps: Vec<DependencyKey>,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> ErasedHandler for FnHandler<H, Args>
where
    H: Handler<Args>,
{
    fn dependencies(&self) -> &[DependencyKey] { &self.deps }

    fn call(&self, ctx: Context, registry: &Registry) -> Result<BoxFuture<Context>, ResolveError> {
        self.f.invoke(ctx, registry)
    }
}
