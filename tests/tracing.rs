mod common;

use std::sync::Arc;

use http::StatusCode;
use opentelemetry::trace::TraceContextExt;
use opentelemetry_sdk::propagation::BaggagePropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use restcore::{Config, Context, Router, Server};

use common::{body, get};

async fn trace_id(mut ctx: Context) -> Context {
    let id = ctx
        .trace_context()
        .map(|cx| cx.span().span_context().trace_id().to_string());
    ctx.json(StatusCode::OK, &serde_json::json!({"trace_id": id}));
    ctx
}

#[tokio::test]
async fn server_span_continues_the_inbound_trace() {
    let provider = SdkTracerProvider::builder().build();
    let app = Server::new(Config::default())
        .with_tracing("restcore-test", &provider)
        .into_dispatcher(Router::new().get("/trace", trace_id))
        .unwrap();

    let mut req = get("/trace");
    req.headers_mut().insert(
        "traceparent",
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".parse().unwrap(),
    );
    let res = app.handle(req).await;
    assert_eq!(body(&res)["trace_id"], "4bf92f3577b34da6a3ce929d0e0e4736");
}

#[tokio::test]
async fn requests_without_a_parent_start_a_new_trace() {
    let provider = SdkTracerProvider::builder().build();
    let app = Server::new(Config::default())
        .with_tracing("restcore-test", &provider)
        .into_dispatcher(Router::new().get("/trace", trace_id))
        .unwrap();

    let res = app.handle(get("/trace")).await;
    let id = body(&res)["trace_id"].as_str().unwrap().to_owned();
    assert_eq!(id.len(), 32);
    assert_ne!(id, "00000000000000000000000000000000");
}

#[tokio::test]
async fn no_trace_context_without_tracing() {
    let app = Server::new(Config::default())
        .into_dispatcher(Router::new().get("/trace", trace_id))
        .unwrap();
    let res = app.handle(get("/trace")).await;
    assert_eq!(body(&res)["trace_id"], serde_json::Value::Null);
}

#[tokio::test]
async fn custom_propagator_replaces_trace_context_extraction() {
    let provider = SdkTracerProvider::builder().build();
    let app = Server::new(Config::default())
        .with_tracing("restcore-test", &provider)
        .with_propagator(Arc::new(BaggagePropagator::new()))
        .into_dispatcher(Router::new().get("/trace", trace_id))
        .unwrap();

    let mut req = get("/trace");
    req.headers_mut().insert(
        "traceparent",
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".parse().unwrap(),
    );
    let res = app.handle(req).await;
    let id = body(&res)["trace_id"].as_str().unwrap().to_owned();
    assert_eq!(id.len(), 32);
    assert_ne!(id, "4bf92f3577b34da6a3ce929d0e0e4736");
}

#[tokio::test]
async fn propagator_without_tracing_is_dropped() {
    let app = Server::new(Config::default())
        .with_propagator(Arc::new(BaggagePropagator::new()))
        .into_dispatcher(Router::new().get("/trace", trace_id))
        .unwrap();
    let res = app.handle(get("/trace")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res)["trace_id"], serde_json::Value::Null);
}
