//! Request dispatch.
//!
//! One call to [`Dispatcher::handle`] walks a request through
//!
//! ```text
//! route lookup ─▶ Context built ─▶ middleware chain ─▶ dependencies resolved
//!     ─▶ handler ─▶ response finalised
//! ```
//!
//! Finalising is where field errors win: if the handler (or a provider, or
//! the paginator) recorded any, the aggregated error body replaces whatever
//! the handler wrote. A handler that returns without writing anything is a
//! bug and answers `500`.

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use tracing::error;

use crate::context::Context;
use crate::dependency::Registry;
use crate::field::FieldErrorBody;
use crate::handler::BoxFuture;
use crate::middleware::{self, Middleware, Next};
use crate::response::Response;
use crate::router::RouteTable;

/// A frozen application: route table, providers and middleware chain.
///
/// Built by [`Server::into_dispatcher`](crate::Server::into_dispatcher);
/// shared read-only by every connection.
pub struct Dispatcher {
    routes: RouteTable,
    chain: Next,
}

impl Dispatcher {
    pub(crate) fn new(
        routes: RouteTable,
        registry: Registry,
        layers: &[Arc<dyn Middleware>],
        field_error_status: StatusCode,
    ) -> Self {
        let endpoint = endpoint(Arc::new(registry), field_error_status);
        Self { routes, chain: middleware::compose(layers, endpoint) }
    }

    /// Handles one fully buffered request.
    pub async fn handle(&self, req: http::Request<Bytes>) -> Response {
        let ctx = match self.routes.lookup(req.method(), req.uri().path()) {
            Some((route, params)) => Context::new(req).with_route(route, params),
            None => Context::new(req),
        };
        (self.chain)(ctx).await
    }
}

/// The innermost stage of the chain.
fn endpoint(registry: Arc<Registry>, field_error_status: StatusCode) -> Next {
    Arc::new(move |ctx: Context| -> BoxFuture<Response> {
        let registry = Arc::clone(&registry);
        Box::pin(async move { run(ctx, &registry, field_error_status).await })
    })
}

async fn run(ctx: Context, registry: &Registry, field_error_status: StatusCode) -> Response {
    let Some(route) = ctx.route().cloned() else {
        return Response::status(StatusCode::NOT_FOUND);
    };

    let handler = match route.handler().call(ctx, registry) {
        Ok(fut) => fut,
        Err(e) => {
            error!(route = route.pattern(), "resolving dependencies: {e}");
            return internal_error();
        }
    };

    finalize(handler.await, field_error_status)
}

fn finalize(mut ctx: Context, field_error_status: StatusCode) -> Response {
    if ctx.has_errors() {
        return Response::builder()
            .status(field_error_status)
            .json(&FieldErrorBody { errors: ctx.field_errors() });
    }
    match ctx.take_response() {
        Some(res) => res,
        None => {
            error!(
                method = %ctx.method(),
                path = ctx.path(),
                "handler returned without writing a response",
            );
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .json(&serde_json::json!({"error": "internal server error"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldError;

    fn ctx() -> Context {
        Context::new(http::Request::builder().uri("/").body(Bytes::new()).unwrap())
    }

    #[test]
    fn field_errors_replace_written_body() {
        let mut ctx = ctx();
        ctx.json(StatusCode::OK, &"fine");
        ctx.add_field_error(FieldError::missing("name"));
        let res = finalize(ctx, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(res.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["errors"][0]["field"], "name");
    }

    #[test]
    fn silent_handler_is_a_server_error() {
        let res = finalize(ctx(), StatusCode::BAD_REQUEST);
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn written_response_passes_through() {
        let mut ctx = ctx();
        ctx.json(StatusCode::CREATED, &serde_json::json!({"id": 1}));
        let res = finalize(ctx, StatusCode::BAD_REQUEST);
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.header("content-type"), Some("application/json"));
    }
}
