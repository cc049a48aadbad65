//! Middleware layer.
//!
//! A middleware turns the rest of the chain into a new chain:
//! [`Middleware::wrap`] receives `next` and returns a [`Next`] that runs
//! whatever it likes before and after calling it. Layers compose in
//! registration order, outermost first, so the first middleware sees the
//! request first and the response last.
//!
//! The server always installs two layers around the user's own:
//!
//! ```text
//! Recovery ─▶ user middlewares (CORS, auth, …) ─▶ RequestLogger ─▶ dispatcher endpoint
//! ```
//!
//! Both are replaceable through the server options but never absent.

mod cors;
mod logger;
mod recovery;

use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::response::Response;

pub use cors::{Cors, CorsPolicy};
pub use logger::RequestLogger;
pub use recovery::{Crash, Recovery, Reporter, TracingReporter};

/// The remainder of the chain, down to the handler.
pub type Next = Arc<dyn Fn(Context) -> BoxFuture<Response> + Send + Sync>;

/// A request/response interceptor.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: Next) -> Next;
}

/// Builds a middleware from an async function.
///
/// ```rust
/// use restcore::middleware::{self, Next};
/// use restcore::{Context, Response};
///
/// let request_id = middleware::from_fn(|ctx: Context, next: Next| async move {
///     let mut res: Response = next(ctx).await;
///     res.headers_mut().insert("x-served-by", "restcore".parse().unwrap());
///     res
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FromFn(Arc::new(f))
}

/// Middleware returned by [`from_fn`].
pub struct FromFn<F>(Arc<F>);

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn wrap(&self, next: Next) -> Next {
        let f = Arc::clone(&self.0);
        Arc::new(move |ctx: Context| -> BoxFuture<Response> {
            Box::pin(f(ctx, Arc::clone(&next)))
        })
    }
}

/// Folds `layers` around `endpoint`, first layer outermost.
pub(crate) fn compose(layers: &[Arc<dyn Middleware>], endpoint: Next) -> Next {
    layers.iter().rev().fold(endpoint, |next, layer| layer.wrap(next))
}
