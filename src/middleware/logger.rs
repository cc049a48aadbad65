//! Per-request logging and tracing.

use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, info, info_span};

use super::{Middleware, Next};
use crate::context::Context;
use crate::handler::BoxFuture;
use crate::response::Response;
use crate::telemetry::Tracing;

/// Logs method, path, status and latency of every request.
///
/// With a [`Tracing`] configuration it also opens an OpenTelemetry server
/// span around the inner chain and exposes it to the handler through
/// [`Context::trace_context`].
#[derive(Clone, Default)]
pub struct RequestLogger {
    tracing: Option<Tracing>,
}

impl RequestLogger {
    pub fn new() -> Self {
        Self { tracing: None }
    }

    pub fn with_tracing(tracing: Tracing) -> Self {
        Self { tracing: Some(tracing) }
    }
}

impl Middleware for RequestLogger {
    fn wrap(&self, next: Next) -> Next {
        let tracer = self.tracing.clone();
        Arc::new(move |mut ctx: Context| -> BoxFuture<Response> {
            let next = Arc::clone(&next);
            let method = ctx.method().clone();
            let path = ctx.path().to_owned();
            let otel = tracer.as_ref().map(|t| {
                let cx = t.start(&ctx);
                ctx.set_trace_context(cx.clone());
                cx
            });
            let span = info_span!("request", %method, %path);

            Box::pin(async move {
                let started = Instant::now();
                let res = next(ctx).instrument(span).await;
                let status = res.status_code();
                if let Some(cx) = &otel {
                    Tracing::finish(cx, status);
                }
                info!(
                    %method,
                    %path,
                    status = status.as_u16(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "request completed",
                );
                res
            })
        })
    }
}
