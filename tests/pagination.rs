mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::StatusCode;
use restcore::{
    BoxError, Config, ConnectionInfo, Context, Dispatcher, PaginationArgs, Paginator, RowIterator,
    Router, Rows, Server,
};
use serde_json::json;

use common::{body, get};

#[derive(Clone)]
struct Store {
    rows: Arc<Vec<u32>>,
    fetches: Arc<AtomicUsize>,
}

impl Store {
    fn new(n: u32) -> Self {
        Self { rows: Arc::new((0..n).collect()), fetches: Arc::new(AtomicUsize::new(0)) }
    }

    async fn page(self, limit: usize, offset: usize) -> Result<Rows<u32>, BoxError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.iter().skip(offset).take(limit).copied().collect();
        Ok(Rows::new(rows, self.rows.len() as u64))
    }
}

async fn list(mut ctx: Context, store: Store) -> Context {
    let page = Paginator::<u32>::new()
        .max_limit(10)
        .paginate(&mut ctx, |limit, offset| store.page(limit, offset))
        .await;
    match page {
        Ok(Some(page)) => ctx.json(StatusCode::OK, &page),
        Ok(None) => {}
        Err(e) => ctx.respond(e),
    }
    ctx
}

/// Takes the arguments as a dependency as well, so both paths see a bad query.
async fn list_with_args(mut ctx: Context, args: PaginationArgs, store: Store) -> Context {
    let page = Paginator::<u32>::new()
        .paginate(&mut ctx, |limit, offset| store.page(limit, offset))
        .await;
    if let Ok(Some(page)) = page {
        ctx.json(StatusCode::OK, &json!({"args": args, "page": page}));
    }
    ctx
}

fn app(store: &Store) -> Dispatcher {
    let store = store.clone();
    Server::new(Config::default())
        .provide(move |_: &mut Context| store.clone())
        .into_dispatcher(Router::new().get("/items", list).get("/args", list_with_args))
        .unwrap()
}

#[tokio::test]
async fn default_page_is_clamped_to_max_limit() {
    let store = Store::new(25);
    let res = app(&store).handle(get("/items")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(
        body(&res),
        json!({
            "_links": {"next": "http://api.test/items?offset=10", "previous": null},
            "count": 25,
            "results": [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
        }),
    );
}

#[tokio::test]
async fn oversized_limit_is_silently_clamped() {
    let store = Store::new(25);
    let res = app(&store).handle(get("/items?limit=50")).await;
    let body = body(&res);
    assert_eq!(body["results"].as_array().unwrap().len(), 10);
    assert_eq!(body["_links"]["next"], "http://api.test/items?limit=50&offset=10");
}

#[tokio::test]
async fn count_is_the_total_not_the_page_size() {
    let store = Store::new(25);
    let res = app(&store).handle(get("/items?limit=10&offset=20")).await;
    assert_eq!(
        body(&res),
        json!({
            "_links": {"next": null, "previous": "http://api.test/items?limit=10&offset=10"},
            "count": 25,
            "results": [20, 21, 22, 23, 24],
        }),
    );
}

#[tokio::test]
async fn offset_past_the_end_is_an_empty_page() {
    let store = Store::new(3);
    let res = app(&store).handle(get("/items?offset=100&limit=5")).await;
    let body = body(&res);
    assert_eq!(body["count"], 3);
    assert_eq!(body["results"], json!([]));
    assert_eq!(body["_links"]["next"], serde_json::Value::Null);
    assert_eq!(body["_links"]["previous"], "http://api.test/items?limit=5&offset=95");
}

#[tokio::test]
async fn other_query_parameters_survive_in_links() {
    let store = Store::new(25);
    let res = app(&store).handle(get("/items?sort=name&limit=5&offset=5")).await;
    let body = body(&res);
    assert_eq!(body["_links"]["next"], "http://api.test/items?limit=5&offset=10&sort=name");
    assert_eq!(body["_links"]["previous"], "http://api.test/items?limit=5&offset=0&sort=name");
}

#[tokio::test]
async fn same_request_gives_same_page() {
    let store = Store::new(25);
    let app = app(&store);
    let first = app.handle(get("/items?limit=3&offset=4")).await;
    let second = app.handle(get("/items?limit=3&offset=4")).await;
    assert_eq!(first.body(), second.body());
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn malformed_arguments_are_field_errors_and_skip_the_fetch() {
    let store = Store::new(25);
    let res = app(&store).handle(get("/items?limit=abc&offset=-1")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body(&res),
        json!({"errors": [
            {"field": "limit", "message": "not a valid integer", "code": "invalid_format"},
            {"field": "offset", "message": "must be at least 0", "code": "out_of_range"},
        ]}),
    );
    assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_limit_is_out_of_range() {
    let store = Store::new(25);
    let res = app(&store).handle(get("/items?limit=0")).await;
    let body = body(&res);
    assert_eq!(body["errors"][0]["field"], "limit");
    assert_eq!(body["errors"][0]["code"], "out_of_range");
    assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn errors_are_recorded_once_when_args_are_also_a_dependency() {
    let store = Store::new(25);
    let res = app(&store).handle(get("/args?limit=x")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["errors"].as_array().unwrap().len(), 1);

    let ok = app(&store).handle(get("/args?limit=2&offset=1")).await;
    let ok = body(&ok);
    assert_eq!(ok["args"], json!({"limit": 2, "offset": 1}));
    assert_eq!(ok["page"]["results"], json!([1, 2]));
}

#[tokio::test]
async fn links_follow_the_connection_scheme() {
    let store = Store::new(25);
    let mut req = get("/items?limit=5");
    req.extensions_mut().insert(ConnectionInfo {
        remote_addr: "10.0.0.1:4000".parse().unwrap(),
        secure: true,
    });
    let res = app(&store).handle(req).await;
    assert_eq!(body(&res)["_links"]["next"], "https://api.test/items?limit=5&offset=5");
}

/// Reports a total but fails on the second row.
struct Flaky(u32);

impl Iterator for Flaky {
    type Item = Result<u32, BoxError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0 += 1;
        match self.0 {
            1 => Some(Ok(1)),
            2 => Some(Err("connection reset".into())),
            _ => None,
        }
    }
}

impl RowIterator<u32> for Flaky {
    fn total(&mut self) -> Result<u64, BoxError> { Ok(2) }
}

#[tokio::test]
async fn row_failure_fails_the_whole_page() {
    async fn flaky(mut ctx: Context) -> Context {
        let page = Paginator::<u32>::new()
            .paginate(&mut ctx, |_, _| async { Ok::<_, BoxError>(Flaky(0)) })
            .await;
        match page {
            Ok(Some(page)) => ctx.json(StatusCode::OK, &page),
            Ok(None) => {}
            Err(e) => ctx.respond(e),
        }
        ctx
    }

    let app = Server::new(Config::default())
        .into_dispatcher(Router::new().get("/flaky", flaky))
        .unwrap();
    let res = app.handle(get("/flaky")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&res)["error"], "internal server error");
}

#[tokio::test]
async fn fetch_failure_is_a_server_error() {
    async fn broken(mut ctx: Context) -> Context {
        let page = Paginator::<u32>::new()
            .paginate(&mut ctx, |_, _| async { Err::<Rows<u32>, _>("db down") })
            .await;
        match page {
            Ok(_) => ctx.respond(StatusCode::OK),
            Err(e) => ctx.respond(e),
        }
        ctx
    }

    let app = Server::new(Config::default())
        .into_dispatcher(Router::new().get("/broken", broken))
        .unwrap();
    assert_eq!(app.handle(get("/broken")).await.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn overridden_args_provider_still_reports_malformed_limit() {
    async fn fixed(mut ctx: Context, _args: PaginationArgs, store: Store) -> Context {
        let page = Paginator::<u32>::new()
            .paginate(&mut ctx, |limit, offset| store.page(limit, offset))
            .await;
        if let Ok(Some(page)) = page {
            ctx.json(StatusCode::OK, &page);
        }
        ctx
    }

    let store = Store::new(25);
    let shared = store.clone();
    let app = Server::new(Config::default())
        .provide(move |_: &mut Context| shared.clone())
        .provide(|_: &mut Context| PaginationArgs { limit: 10, offset: 0 })
        .into_dispatcher(Router::new().get("/fixed", fixed))
        .unwrap();

    let res = app.handle(get("/fixed?limit=abc")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body(&res),
        json!({"errors": [
            {"field": "limit", "message": "not a valid integer", "code": "invalid_format"},
        ]}),
    );
    assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
}
