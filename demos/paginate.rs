//! A small in-memory item service.
//!
//! ```text
//! cargo run --example paginate
//! curl 'localhost:5000/ping'
//! curl 'localhost:5000/items?limit=2&offset=2'
//! curl 'localhost:5000/items?limit=abc'
//! curl -X POST 'localhost:5000/items' -d 'x'
//! curl 'localhost:5000/boom'
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use http::StatusCode;
use restcore::middleware::CorsPolicy;
use restcore::{Context, FieldError, Paginator, Router, Rows, Server};
use serde::Serialize;

#[derive(Clone, Serialize)]
struct Item {
    id: u32,
    name: String,
}

#[derive(Clone)]
struct Store(Arc<Vec<Item>>);

impl Store {
    fn seeded() -> Self {
        let items = (1..=12).map(|id| Item { id, name: format!("item-{id}") }).collect();
        Self(Arc::new(items))
    }

    async fn page(&self, limit: usize, offset: usize) -> Result<Rows<Item>, Infallible> {
        let rows = self.0.iter().skip(offset).take(limit).cloned().collect();
        Ok(Rows::new(rows, self.0.len() as u64))
    }
}

/// Built per request from the `Accept-Language` header.
#[derive(Clone)]
struct Validator {
    locale: String,
}

impl Validator {
    fn required(&self, ctx: &mut Context, field: &str, value: &[u8]) {
        if value.is_empty() {
            let message = match self.locale.as_str() {
                "fr" => "champ obligatoire",
                _ => "this field is required",
            };
            ctx.add_field_error(FieldError::new(field, message, restcore::code::MISSING_FIELD));
        }
    }
}

async fn ping(mut ctx: Context) -> Context {
    ctx.json(StatusCode::OK, &serde_json::json!({"pong": true}));
    ctx
}

async fn list_items(mut ctx: Context, store: Store) -> Context {
    let page = Paginator::<Item>::new()
        .max_limit(5)
        .paginate(&mut ctx, |limit, offset| async move { store.page(limit, offset).await })
        .await;
    match page {
        Ok(Some(page)) => ctx.json(StatusCode::OK, &page),
        Ok(None) => {}
        Err(e) => ctx.respond(e),
    }
    ctx
}

async fn create_item(mut ctx: Context, validator: Validator) -> Context {
    let body = ctx.body().clone();
    validator.required(&mut ctx, "name", &body);
    ctx.json(StatusCode::CREATED, &serde_json::json!({"name": String::from_utf8_lossy(&body)}));
    ctx
}

async fn boom(_ctx: Context) -> Context {
    panic!("boom");
}

#[tokio::main]
async fn main() -> Result<(), restcore::Error> {
    restcore::telemetry::init_subscriber().ok();

    let store = Store::seeded();
    let app = Router::new()
        .get("/ping", ping)
        .get("/items", list_items)
        .post("/items", create_item)
        .get("/boom", boom);

    Server::from_env()
        .provide(move |_: &mut Context| store.clone())
        .provide(|ctx: &mut Context| Validator {
            locale: ctx.header("accept-language").unwrap_or("en").chars().take(2).collect(),
        })
        .with_cors(CorsPolicy::default())
        .serve(app)
        .await
}
