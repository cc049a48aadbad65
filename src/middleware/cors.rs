//! Cross-origin resource sharing.

use std::sync::Arc;

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, HeaderValue, ORIGIN, VARY,
};
use http::{Method, StatusCode};

use super::{Middleware, Next};
use crate::context::Context;
use crate::handler::BoxFuture;
use crate::response::Response;

/// Headers a browser may always send without asking.
const SIMPLE_HEADERS: [&str; 4] = ["accept", "accept-language", "content-language", "origin"];

/// Which cross-origin requests to allow.
///
/// `origins: None` allows every origin. Empty `methods` means
/// `GET, HEAD, POST`.
#[derive(Clone, Debug, Default)]
pub struct CorsPolicy {
    pub origins: Option<Vec<String>>,
    pub methods: Vec<Method>,
    pub headers: Vec<String>,
}

impl CorsPolicy {
    fn allow_origin(&self, origin: &str) -> Option<HeaderValue> {
        match &self.origins {
            None => Some(HeaderValue::from_static("*")),
            Some(list) if list.iter().any(|o| o == "*") => Some(HeaderValue::from_static("*")),
            Some(list) if list.iter().any(|o| o == origin) => HeaderValue::from_str(origin).ok(),
            Some(_) => None,
        }
    }

    fn methods(&self) -> Vec<Method> {
        if self.methods.is_empty() {
            vec![Method::GET, Method::HEAD, Method::POST]
        } else {
            self.methods.clone()
        }
    }

    fn allows_header(&self, name: &str) -> bool {
        SIMPLE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
            || self.headers.iter().any(|h| h.eq_ignore_ascii_case(name))
    }
}

/// Answers preflight requests and adds `Access-Control-Allow-Origin` to
/// responses for allowed origins. Requests without an `Origin` header pass
/// straight through.
pub struct Cors {
    policy: Arc<CorsPolicy>,
}

impl Cors {
    pub fn new(policy: CorsPolicy) -> Self {
        Self { policy: Arc::new(policy) }
    }
}

impl Middleware for Cors {
    fn wrap(&self, next: Next) -> Next {
        let policy = Arc::clone(&self.policy);
        Arc::new(move |ctx: Context| -> BoxFuture<Response> {
            let next = Arc::clone(&next);
            let policy = Arc::clone(&policy);
            Box::pin(async move {
                let Some(origin) = ctx.header(ORIGIN.as_str()).map(str::to_owned) else {
                    return next(ctx).await;
                };
                let allowed = policy.allow_origin(&origin);

                if ctx.method() == Method::OPTIONS
                    && ctx.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
                {
                    return preflight(&policy, &ctx, allowed);
                }

                let mut res = next(ctx).await;
                if let Some(value) = allowed {
                    res.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
                    res.headers_mut().append(VARY, HeaderValue::from_static("Origin"));
                }
                res
            })
        })
    }
}

fn preflight(policy: &CorsPolicy, ctx: &Context, allowed: Option<HeaderValue>) -> Response {
    let Some(allow_origin) = allowed else {
        return Response::status(StatusCode::FORBIDDEN);
    };

    let methods = policy.methods();
    let requested = ctx.header(ACCESS_CONTROL_REQUEST_METHOD.as_str()).unwrap_or_default();
    if !methods.iter().any(|m| m.as_str() == requested) {
        return Response::status(StatusCode::METHOD_NOT_ALLOWED);
    }

    let requested_headers: Vec<&str> = ctx
        .header(ACCESS_CONTROL_REQUEST_HEADERS.as_str())
        .map(|h| h.split(',').map(str::trim).filter(|h| !h.is_empty()).collect())
        .unwrap_or_default();
    if !requested_headers.iter().all(|h| policy.allows_header(h)) {
        return Response::status(StatusCode::FORBIDDEN);
    }

    let allow_methods = methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(ACCESS_CONTROL_ALLOW_METHODS.as_str(), &allow_methods)
        .header(VARY.as_str(), "Origin");
    if !requested_headers.is_empty() {
        builder =
            builder.header(ACCESS_CONTROL_ALLOW_HEADERS.as_str(), &requested_headers.join(", "));
    }
    let mut res = builder.no_body();
    res.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    res
}
