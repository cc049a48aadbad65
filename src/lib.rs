//! # restcore
//!
//! The request-handling core of a JSON HTTP service: typed dependency
//! injection into handlers, a per-request context that collects field-level
//! validation errors, a fixed middleware chain with panic recovery, and
//! limit/offset pagination with hypermedia links.
//!
//! ## The contract
//!
//! Everything that can go wrong with the setup goes wrong at startup. A
//! handler whose dependencies have no provider, or two routes on the same
//! method and path, make [`Server::serve`] return an [`Error`] before the
//! listener is bound.
//!
//! At request time nothing escapes as a Rust error:
//!
//! - unknown path → `404`
//! - field errors recorded anywhere → one aggregated `400` body
//! - provider failure → `500`
//! - panic anywhere in the chain → `500` with a correlation id, reported off
//!   the request path
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use restcore::{Context, FieldError, PaginationArgs, Paginator, Router, Rows, Server};
//!
//! #[derive(Clone)]
//! struct Catalog(std::sync::Arc<Vec<String>>);
//!
//! #[tokio::main]
//! async fn main() -> Result<(), restcore::Error> {
//!     restcore::telemetry::init_subscriber().ok();
//!
//!     let catalog = Catalog(std::sync::Arc::new(vec!["apple".into(), "pear".into()]));
//!     let app = Router::new()
//!         .get("/items", list_items)
//!         .post("/items", create_item);
//!
//!     Server::from_env()
//!         .provide(move |_: &mut Context| catalog.clone())
//!         .serve(app)
//!         .await
//! }
//!
//! async fn list_items(mut ctx: Context, catalog: Catalog) -> Context {
//!     let page = Paginator::<String>::new()
//!         .paginate(&mut ctx, |limit, offset| async move {
//!             let rows: Vec<String> =
//!                 catalog.0.iter().skip(offset).take(limit).cloned().collect();
//!             Ok::<_, std::convert::Infallible>(Rows::new(rows, catalog.0.len() as u64))
//!         })
//!         .await;
//!     match page {
//!         Ok(Some(page)) => ctx.json(StatusCode::OK, &page),
//!         Ok(None) => {}
//!         Err(e) => ctx.respond(e),
//!     }
//!     ctx
//! }
//!
//! async fn create_item(mut ctx: Context, _args: PaginationArgs) -> Context {
//!     if ctx.body().is_empty() {
//!         ctx.add_field_error(FieldError::missing("name"));
//!         return ctx;
//!     }
//!     ctx.json(StatusCode::CREATED, &serde_json::json!({"created": true}));
//!     ctx
//! }
//! ```

mod config;
mod context;
mod dependency;
mod dispatch;
mod error;
mod field;
mod handler;
mod paginator;
mod response;
mod router;
mod server;

pub mod middleware;
pub mod telemetry;

pub use config::Config;
pub use context::{ConnectionInfo, Context};
pub use dependency::{BoxError, DependencyKey, Registry, ResolveError};
pub use dispatch::Dispatcher;
pub use error::Error;
pub use field::{FieldError, code};
pub use handler::{BoxFuture, Handler};
pub use paginator::{
    DEFAULT_LIMIT, DEFAULT_MAX_LIMIT, DEFAULT_OFFSET, PaginateError, PaginatedResponse,
    PaginationArgs, PaginationLinks, Paginator, RowIterator, Rows,
};
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::{Route, Router};
pub use server::Server;
