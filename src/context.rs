//! Per-request state handed to every handler and middleware.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::HOST;
use http::request::Parts;
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::Serialize;
use url::Url;

use crate::field::FieldError;
use crate::response::{IntoResponse, Response};
use crate::router::Route;

/// Connection facts the server attaches to every request it accepts.
///
/// Read through [`Context::is_secure`] and [`Context::remote_addr`]. Requests
/// built by hand (tests, in-process calls) simply lack it: they count as
/// plaintext with no peer address.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionInfo {
    pub remote_addr: SocketAddr,
    /// Whether the connection the request arrived on is encrypted.
    pub secure: bool,
}

/// The request context.
///
/// Built once per incoming request and dropped after the response is written.
/// It owns the raw request, the parsed query string, the field errors recorded
/// so far, the dependencies resolved for this request, and the response the
/// handler wrote. Nothing in it is shared with other requests.
pub struct Context {
    parts: Parts,
    body: Bytes,
    params: HashMap<String, String>,
    query: HashMap<String, Vec<String>>,
    field_errors: Vec<FieldError>,
    resolved: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    trace: Option<opentelemetry::Context>,
    response: Option<Response>,
    route: Option<Arc<Route>>,
}

impl Context {
    /// Builds a context from a fully buffered request.
    pub fn new(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        let query = parse_query(parts.uri.query());
        Self {
            parts,
            body,
            params: HashMap::new(),
            query,
            field_errors: Vec::new(),
            resolved: HashMap::new(),
            trace: None,
            response: None,
            route: None,
        }
    }

    pub(crate) fn with_route(mut self, route: Arc<Route>, params: HashMap<String, String>) -> Self {
        self.route = Some(route);
        self.params = params;
        self
    }

    pub(crate) fn route(&self) -> Option<&Arc<Route>> { self.route.as_ref() }

    // ── Raw request ──────────────────────────────────────────────────────────

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `ctx.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is_secure(&self) -> bool {
        self.parts.extensions.get::<ConnectionInfo>().is_some_and(|c| c.secure)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.parts.extensions.get::<ConnectionInfo>().map(|c| c.remote_addr)
    }

    /// The absolute URL of the current request.
    ///
    /// The scheme comes from the request target when it is in absolute form,
    /// otherwise from whether the connection is encrypted. The host comes from
    /// the `Host` header, then the request target, then `localhost`.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        let uri = &self.parts.uri;
        let scheme = match uri.scheme_str() {
            Some(s) => s,
            None if self.is_secure() => "https",
            None => "http",
        };
        let host = self
            .header(HOST.as_str())
            .or_else(|| uri.authority().map(|a| a.as_str()))
            .unwrap_or("localhost");
        let mut url = Url::parse(&format!("{scheme}://{host}{}", uri.path()))?;
        url.set_query(uri.query());
        Ok(url)
    }

    // ── Query parameters ─────────────────────────────────────────────────────

    /// First value of a query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// Every value of a repeated query parameter, in request order.
    pub fn query_all(&self, key: &str) -> &[String] {
        self.query.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn query_params(&self) -> &HashMap<String, Vec<String>> { &self.query }

    // ── Field errors ─────────────────────────────────────────────────────────

    /// Records a field error. Errors are reported in the order they were added.
    pub fn add_field_error(&mut self, error: FieldError) {
        self.field_errors.push(error);
    }

    pub fn field_errors(&self) -> &[FieldError] { &self.field_errors }

    pub fn has_errors(&self) -> bool { !self.field_errors.is_empty() }

    // ── Response ─────────────────────────────────────────────────────────────

    /// Writes `value` as the JSON response body with the given status.
    ///
    /// Field errors recorded before or after this call still take precedence
    /// when the response is finalised.
    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) {
        self.response = Some(Response::builder().status(status).json(value));
    }

    /// Writes any [`IntoResponse`] value as the response.
    pub fn respond(&mut self, res: impl IntoResponse) {
        self.response = Some(res.into_response());
    }

    /// The response written so far, if any.
    pub fn response(&self) -> Option<&Response> { self.response.as_ref() }

    pub(crate) fn take_response(&mut self) -> Option<Response> { self.response.take() }

    // ── Resolved dependencies ────────────────────────────────────────────────

    /// A dependency already resolved for this request.
    pub fn resolved<T: 'static>(&self) -> Option<&T> {
        self.resolved.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
    }

    pub(crate) fn is_resolved(&self, id: TypeId) -> bool { self.resolved.contains_key(&id) }

    /// Caches a resolved value. The first value stored for a type wins.
    pub(crate) fn cache(&mut self, id: TypeId, value: Box<dyn Any + Send + Sync>) {
        self.resolved.entry(id).or_insert(value);
    }

    // ── Tracing ──────────────────────────────────────────────────────────────

    /// The OpenTelemetry context carrying this request's server span, when
    /// tracing is configured. Start child spans from it.
    pub fn trace_context(&self) -> Option<&opentelemetry::Context> { self.trace.as_ref() }

    pub fn set_trace_context(&mut self, cx: opentelemetry::Context) {
        self.trace = Some(cx);
    }
}

fn parse_query(raw: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut query: HashMap<String, Vec<String>> = HashMap::new();
    if let Some(raw) = raw {
        for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
            query.entry(k.into_owned()).or_default().push(v.into_owned());
        }
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(uri: &str) -> Context {
        Context::new(
            http::Request::builder()
                .uri(uri)
                .header("host", "api.example.com")
                .body(Bytes::new())
                .unwrap(),
        )
    }

    #[test]
    fn repeated_query_keys_keep_request_order() {
        let ctx = ctx("/items?tag=a&limit=5&tag=b%20c");
        assert_eq!(ctx.query("limit"), Some("5"));
        assert_eq!(ctx.query_all("tag"), ["a", "b c"]);
        assert!(ctx.query_all("missing").is_empty());
    }

    #[test]
    fn url_uses_host_header_and_plain_scheme() {
        let url = ctx("/items?limit=5").url().unwrap();
        assert_eq!(url.as_str(), "http://api.example.com/items?limit=5");
    }

    #[test]
    fn encrypted_connection_yields_https() {
        let mut req = http::Request::builder()
            .uri("/items")
            .header("host", "api.example.com")
            .body(Bytes::new())
            .unwrap();
        req.extensions_mut().insert(ConnectionInfo {
            remote_addr: "127.0.0.1:9000".parse().unwrap(),
            secure: true,
        });
        let ctx = Context::new(req);
        assert!(ctx.is_secure());
        assert_eq!(ctx.url().unwrap().scheme(), "https");
    }

    #[test]
    fn first_cached_value_wins() {
        let mut ctx = ctx("/");
        ctx.cache(TypeId::of::<u32>(), Box::new(1u32));
        ctx.cache(TypeId::of::<u32>(), Box::new(2u32));
        assert_eq!(ctx.resolved::<u32>(), Some(&1));
    }
}
