//! HTTP server, setup options and graceful shutdown.
//!
//! A [`Server`] collects everything that must be fixed before the first
//! request: providers, middlewares, recovery and logging hooks, tracing.
//! [`Server::serve`] consumes it, so nothing can be registered once requests
//! are flowing.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::context::{ConnectionInfo, Context};
use crate::dependency::{BoxError, Registry};
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::middleware::{Cors, CorsPolicy, Middleware, Recovery, Reporter, RequestLogger};
use crate::response::Response;
use crate::router::Router;
use crate::telemetry::{SharedPropagator, Tracing};

/// The HTTP server and its setup-time options.
///
/// ```rust,no_run
/// use restcore::{Context, Router, Server};
/// use restcore::middleware::CorsPolicy;
///
/// #[derive(Clone)]
/// struct Greeting(&'static str);
///
/// async fn hi(mut ctx: Context, greeting: Greeting) -> Context {
///     ctx.json(http::StatusCode::OK, &format!("{} there", greeting.0));
///     ctx
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), restcore::Error> {
///     Server::from_env()
///         .provide(|_: &mut Context| Greeting("hi"))
///         .with_cors(CorsPolicy::default())
///         .serve(Router::new().get("/", hi))
///         .await
/// }
/// ```
pub struct Server {
    config: Config,
    registry: Registry,
    middlewares: Vec<Arc<dyn Middleware>>,
    recovery: Option<Arc<dyn Middleware>>,
    reporter: Option<Arc<dyn Reporter>>,
    logger: Option<Arc<dyn Middleware>>,
    tracing: Option<Tracing>,
    propagator: Option<SharedPropagator>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Registry::new(),
            middlewares: Vec::new(),
            recovery: None,
            reporter: None,
            logger: None,
            tracing: None,
            propagator: None,
        }
    }

    /// A server with default configuration listening on `addr`, e.g.
    /// `"0.0.0.0:3000"`.
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr: SocketAddr = addr.parse().map_err(|_| Error::InvalidAddress(addr.to_owned()))?;
        Ok(Self::new(Config { addr, ..Config::default() }))
    }

    /// A server configured from `RESTCORE_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    // ── Dependencies ─────────────────────────────────────────────────────────

    /// Registers a provider for `T`. See [`Registry::provide`].
    pub fn provide<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&mut Context) -> T + Send + Sync + 'static,
    {
        self.registry.provide(factory);
        self
    }

    /// Registers a fallible provider for `T`. See [`Registry::try_provide`].
    pub fn try_provide<T, E, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        E: Into<BoxError>,
        F: Fn(&mut Context) -> Result<T, E> + Send + Sync + 'static,
    {
        self.registry.try_provide(factory);
        self
    }

    // ── Middleware options ───────────────────────────────────────────────────

    /// Adds a middleware between the recovery and logging layers. Layers run
    /// in the order they are added.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Replaces the default [`Recovery`] layer.
    pub fn with_recovery(mut self, middleware: impl Middleware) -> Self {
        self.recovery = Some(Arc::new(middleware));
        self
    }

    /// Keeps the default [`Recovery`] layer but sends crashes to `reporter`.
    pub fn with_reporter(mut self, reporter: impl Reporter) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Replaces the default [`RequestLogger`] layer.
    pub fn with_request_logger(mut self, middleware: impl Middleware) -> Self {
        self.logger = Some(Arc::new(middleware));
        self
    }

    /// Opens an OpenTelemetry server span per request with a tracer named
    /// `name` from `provider`.
    pub fn with_tracing(mut self, name: impl Into<String>, provider: &SdkTracerProvider) -> Self {
        self.tracing = Some(Tracing::new(name, provider));
        self
    }

    /// Replaces the default W3C trace-context + baggage propagator.
    ///
    /// Only the default [`RequestLogger`] extracts trace context, so this has
    /// no effect without [`with_tracing`](Self::with_tracing) or alongside
    /// [`with_request_logger`](Self::with_request_logger). The unused
    /// propagator is logged when the server is frozen.
    pub fn with_propagator(mut self, propagator: SharedPropagator) -> Self {
        self.propagator = Some(propagator);
        self
    }

    pub fn with_cors(self, policy: CorsPolicy) -> Self {
        self.middleware(Cors::new(policy))
    }

    // ── Freezing and serving ─────────────────────────────────────────────────

    /// Validates `router` against the registered providers and freezes the
    /// whole setup into a [`Dispatcher`].
    pub fn into_dispatcher(self, router: Router) -> Result<Dispatcher, Error> {
        let routes = router.freeze(&self.registry)?;

        let recovery: Arc<dyn Middleware> = match (self.recovery, self.reporter) {
            (Some(custom), _) => custom,
            (None, Some(reporter)) => Arc::new(Recovery::with_shared(reporter)),
            (None, None) => Arc::new(Recovery::default()),
        };
        let mut propagator = self.propagator;
        let logger: Arc<dyn Middleware> = match (self.logger, self.tracing) {
            (Some(custom), _) => custom,
            (None, Some(tracing)) => {
                let tracing = match propagator.take() {
                    Some(p) => tracing.with_propagator(p),
                    None => tracing,
                };
                Arc::new(RequestLogger::with_tracing(tracing))
            }
            (None, None) => Arc::new(RequestLogger::new()),
        };
        if propagator.is_some() {
            warn!("propagator ignored: tracing is off or the request logger was replaced");
        }

        let mut layers: Vec<Arc<dyn Middleware>> =
            Vec::with_capacity(self.middlewares.len() + 2);
        layers.push(recovery);
        layers.extend(self.middlewares);
        layers.push(logger);

        Ok(Dispatcher::new(routes, self.registry, &layers, self.config.field_error_status))
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Setup errors (duplicate routes, missing providers) are returned before
    /// the listener is bound. Otherwise returns only after a full graceful
    /// shutdown (SIGTERM or Ctrl-C, followed by all in-flight requests
    /// completing).
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let addr = self.config.addr;
        let trust_forwarded_proto = self.config.trust_forwarded_proto;
        let dispatcher = Arc::new(self.into_dispatcher(router)?);

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "restcore listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM immediately stops
                // accepting new connections, even if more are queued.
                biased;

                () = &mut shutdown => {
                    info!(
                        in_flight = tasks.len(),
                        "shutdown signal received, draining connections",
                    );
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let dispatcher = Arc::clone(&dispatcher);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection. A client
                        // that disconnects drops the in-flight future.
                        let svc = service_fn(move |req| {
                            let dispatcher = Arc::clone(&dispatcher);
                            async move {
                                dispatch(&dispatcher, req, remote_addr, trust_forwarded_proto).await
                            }
                        });

                        // `auto::Builder` handles both HTTP/1.1 and HTTP/2.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("restcore stopped");
        Ok(())
    }
}

// ── Request adaptation ────────────────────────────────────────────────────────

/// Buffers the hyper request body and hands the request to the dispatcher.
///
/// The error type is [`Infallible`](std::convert::Infallible): every failure
/// becomes a response, hyper never sees an error.
async fn dispatch(
    dispatcher: &Dispatcher,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
    trust_forwarded_proto: bool,
) -> Result<http::Response<Full<Bytes>>, std::convert::Infallible> {
    let (mut parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "reading request body: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_inner());
        }
    };

    let secure = trust_forwarded_proto
        && parts
            .headers
            .get("x-forwarded-proto")
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"https"));
    parts.extensions.insert(ConnectionInfo { remote_addr, secure });

    let response = dispatcher.handle(http::Request::from_parts(parts, body)).await;
    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available. A signal that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("installing Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("installing SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // `pending()` never resolves: on non-Unix platforms the SIGTERM arm is
    // effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
