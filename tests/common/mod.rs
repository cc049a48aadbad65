#![allow(dead_code)]

use bytes::Bytes;
use http::Method;
use restcore::Response;

pub const HOST: &str = "api.test";

pub fn request(method: Method, uri: &str) -> http::Request<Bytes> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header("host", HOST)
        .body(Bytes::new())
        .unwrap()
}

pub fn get(uri: &str) -> http::Request<Bytes> {
    request(Method::GET, uri)
}

pub fn body(res: &Response) -> serde_json::Value {
    serde_json::from_slice(res.body()).unwrap()
}
