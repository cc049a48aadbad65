//! Panic recovery boundary.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use futures_util::FutureExt;
use http::{Method, StatusCode};
use tracing::error;
use uuid::Uuid;

use super::{Middleware, Next};
use crate::context::Context;
use crate::handler::BoxFuture;
use crate::response::Response;

/// A handler (or provider, or inner middleware) that panicked.
#[derive(Clone, Debug)]
pub struct Crash {
    pub message: String,
    /// Captured where the panic was raised, before unwinding.
    pub backtrace: String,
    pub method: Method,
    pub path: String,
    /// Also sent to the client, so a report can be matched to a response.
    pub correlation_id: Uuid,
}

/// Receives crashes caught by [`Recovery`], e.g. to forward them to a
/// crash-reporting service.
///
/// Runs on tokio's blocking pool, off the request path, so a slow reporter
/// never delays the `500`.
pub trait Reporter: Send + Sync + 'static {
    fn report(&self, crash: Crash);
}

/// Default reporter: one `error` event per crash.
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, crash: Crash) {
        error!(
            method = %crash.method,
            path = %crash.path,
            correlation_id = %crash.correlation_id,
            backtrace = %crash.backtrace,
            "handler panicked: {}",
            crash.message,
        );
    }
}

/// Converts a panic anywhere inside the chain into a structured `500`
/// and hands it to a [`Reporter`]. The connection task survives.
pub struct Recovery {
    reporter: Arc<dyn Reporter>,
}

impl Recovery {
    pub fn new(reporter: impl Reporter) -> Self {
        Self::with_shared(Arc::new(reporter))
    }

    pub fn with_shared(reporter: Arc<dyn Reporter>) -> Self {
        install_panic_hook();
        Self { reporter }
    }
}

impl Default for Recovery {
    fn default() -> Self { Self::new(TracingReporter) }
}

impl Middleware for Recovery {
    fn wrap(&self, next: Next) -> Next {
        let reporter = Arc::clone(&self.reporter);
        Arc::new(move |ctx: Context| -> BoxFuture<Response> {
            let next = Arc::clone(&next);
            let reporter = Arc::clone(&reporter);
            let method = ctx.method().clone();
            let path = ctx.path().to_owned();
            Box::pin(async move {
                // `next` is called inside the guarded future so a panic in its
                // synchronous part is caught as well.
                match AssertUnwindSafe(async move { next(ctx).await }).catch_unwind().await {
                    Ok(res) => res,
                    Err(payload) => {
                        let crash = Crash {
                            message: panic_message(payload.as_ref()),
                            backtrace: take_panic_backtrace(),
                            method,
                            path,
                            correlation_id: Uuid::new_v4(),
                        };
                        let res = crash_response(crash.correlation_id);
                        forward(reporter, crash);
                        res
                    }
                }
            })
        })
    }
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chains a hook in front of the current panic hook that records the
/// backtrace of the panicking thread while its frames still exist.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture();
            let _ = PANIC_BACKTRACE.try_with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(backtrace);
                }
            });
            previous(info);
        }));
    });
}

/// The backtrace recorded by the most recent panic on this thread.
fn take_panic_backtrace() -> String {
    PANIC_BACKTRACE
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut s| s.take()))
        .ok()
        .flatten()
        .map_or_else(|| "backtrace unavailable".to_owned(), |bt| bt.to_string())
}

fn forward(reporter: Arc<dyn Reporter>, crash: Crash) {
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn_blocking(move || reporter.report(crash));
        }
        Err(_) => reporter.report(crash),
    }
}

fn crash_response(correlation_id: Uuid) -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .json(&serde_json::json!({
            "error": "internal server error",
            "correlation_id": correlation_id.to_string(),
        }))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
