//! Logging and distributed-tracing plumbing.
//!
//! Logging goes through `tracing`; [`init_subscriber`] is the one-call setup
//! for binaries. Distributed tracing is opt-in per server: hand
//! [`Server::with_tracing`](crate::Server::with_tracing) an OpenTelemetry
//! tracer provider and the request logger starts one server span per request,
//! parented on whatever trace context the inbound headers carry.

use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use opentelemetry::propagation::{Extractor, TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing_subscriber::EnvFilter;

use crate::context::Context;
use crate::dependency::BoxError;

/// A propagator shared by every request.
pub type SharedPropagator = Arc<dyn TextMapPropagator + Send + Sync>;

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Fails if a global subscriber is already set.
pub fn init_subscriber() -> Result<(), BoxError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).try_init()
}

/// W3C `traceparent`/`tracestate` plus `baggage`.
pub fn default_propagator() -> SharedPropagator {
    let propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ];
    Arc::new(TextMapCompositePropagator::new(propagators))
}

/// Reads propagation fields out of request headers.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Tracer plus propagator, as configured on the server.
#[derive(Clone)]
pub struct Tracing {
    tracer: SdkTracer,
    propagator: SharedPropagator,
}

impl Tracing {
    pub fn new(name: impl Into<String>, provider: &SdkTracerProvider) -> Self {
        Self { tracer: provider.tracer(name.into()), propagator: default_propagator() }
    }

    pub fn with_propagator(mut self, propagator: SharedPropagator) -> Self {
        self.propagator = propagator;
        self
    }

    /// Starts the server span for `ctx`, parented on the inbound trace
    /// context, and returns the OpenTelemetry context that carries it.
    pub(crate) fn start(&self, ctx: &Context) -> opentelemetry::Context {
        let parent = self.propagator.extract(&HeaderExtractor(ctx.headers()));
        let span = self
            .tracer
            .span_builder(format!("{} {}", ctx.method(), ctx.path()))
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new("http.request.method", ctx.method().to_string()),
                KeyValue::new("url.path", ctx.path().to_owned()),
            ])
            .start_with_context(&self.tracer, &parent);
        parent.with_span(span)
    }

    pub(crate) fn finish(cx: &opentelemetry::Context, status: StatusCode) {
        let span = cx.span();
        span.set_attribute(KeyValue::new("http.response.status_code", i64::from(status.as_u16())));
        if status.is_server_error() {
            span.set_status(Status::error(status.to_string()));
        }
        span.end();
    }
}
