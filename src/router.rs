//! Route table.
//!
//! Routes are collected in registration order while the server is being set
//! up, then frozen into one radix tree per HTTP method (plus one for routes
//! that accept any method). Freezing is where setup mistakes surface: a
//! duplicate `(method, path)` or a handler whose dependencies have no
//! provider stops the server before it accepts a single connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::dependency::{DependencyKey, Registry};
use crate::error::Error;
use crate::handler::{self, BoxedHandler, Handler};

/// One registered `(method, path pattern) → handler` entry.
pub struct Route {
    method: Option<Method>,
    pattern: String,
    handler: BoxedHandler,
}

impl Route {
    /// The method this route answers, or `None` for any method.
    pub fn method(&self) -> Option<&Method> { self.method.as_ref() }
    pub fn pattern(&self) -> &str { &self.pattern }

    /// Dependency types the handler requires beyond the context, in declared order.
    pub fn dependencies(&self) -> &[DependencyKey] { self.handler.dependencies() }

    pub(crate) fn handler(&self) -> &BoxedHandler { &self.handler }

    fn describe(&self) -> String {
        match &self.method {
            Some(m) => format!("{m} {}", self.pattern),
            None => format!("* {}", self.pattern),
        }
    }
}

/// The application router.
///
/// Each registration returns `self` so calls chain naturally:
///
/// ```rust,no_run
/// # use restcore::{Context, Router};
/// # use http::Method;
/// # async fn list_users(ctx: Context) -> Context { ctx }
/// # async fn create_user(ctx: Context) -> Context { ctx }
/// # async fn ping(ctx: Context) -> Context { ctx }
/// Router::new()
///     .get("/users", list_users)
///     .route("/users/{id}", create_user, &[Method::PUT, Method::PATCH])
///     .route("/ping", ping, &[]); // any method
/// ```
///
/// Path templates support literal segments and `{name}` parameters, read
/// back with [`Context::param`](crate::Context::param).
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `handler` for `path` under each of `methods`. An empty
    /// method list matches any method; a method-specific route on the same
    /// path takes precedence.
    pub fn route<H, Args>(mut self, path: &str, handler: H, methods: &[Method]) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let handler = handler::boxed(handler);
        if methods.is_empty() {
            self.routes.push(Route { method: None, pattern: path.to_owned(), handler });
        } else {
            for method in methods {
                self.routes.push(Route {
                    method: Some(method.clone()),
                    pattern: path.to_owned(),
                    handler: Arc::clone(&handler),
                });
            }
        }
        self
    }

    pub fn get<H, Args>(self, path: &str, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.route(path, handler, &[Method::GET])
    }

    pub fn post<H, Args>(self, path: &str, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.route(path, handler, &[Method::POST])
    }

    /// Registered routes, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Validates every route against `registry` and builds the lookup trees.
    pub(crate) fn freeze(self, registry: &Registry) -> Result<RouteTable, Error> {
        let mut seen = HashSet::new();
        let mut table = RouteTable { by_method: HashMap::new(), any: MatchitRouter::new() };

        for route in self.routes {
            if !seen.insert((route.method.clone(), route.pattern.clone())) {
                return Err(Error::duplicate(route.method.as_ref(), &route.pattern));
            }
            if let Some(missing) = route.dependencies().iter().find(|k| !registry.contains(k)) {
                return Err(Error::MissingDependency {
                    route: route.describe(),
                    type_name: missing.type_name(),
                });
            }

            let pattern = route.pattern.clone();
            let tree = match &route.method {
                Some(m) => table.by_method.entry(m.clone()).or_default(),
                None => &mut table.any,
            };
            tree.insert(pattern.clone(), Arc::new(route))
                .map_err(|e| Error::InvalidRoute { path: pattern, reason: e.to_string() })?;
        }
        Ok(table)
    }
}

/// Frozen, read-only lookup structure shared by every request.
pub(crate) struct RouteTable {
    by_method: HashMap<Method, MatchitRouter<Arc<Route>>>,
    any: MatchitRouter<Arc<Route>>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable").finish_non_exhaustive()
    }
}

impl RouteTable {
    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let matched = self
            .by_method
            .get(method)
            .and_then(|tree| tree.at(path).ok())
            .or_else(|| self.any.at(path).ok())?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((Arc::clone(matched.value), params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    async fn noop(ctx: Context) -> Context { ctx }
    async fn needs_u64(ctx: Context, _n: u64) -> Context { ctx }

    #[test]
    fn method_specific_route_wins_over_any() {
        let table = Router::new()
            .route("/ping", noop, &[])
            .get("/ping", needs_u64)
            .freeze(&{
                let mut r = Registry::empty();
                r.provide(|_: &mut Context| 7u64);
                r
            })
            .unwrap();

        let (get, _) = table.lookup(&Method::GET, "/ping").unwrap();
        assert_eq!(get.method(), Some(&Method::GET));
        assert_eq!(get.dependencies(), [DependencyKey::of::<u64>()]);

        let (post, _) = table.lookup(&Method::POST, "/ping").unwrap();
        assert_eq!(post.method(), None);
        assert!(table.lookup(&Method::GET, "/pong").is_none());
    }

    #[test]
    fn path_params_are_captured() {
        let table = Router::new().get("/users/{id}", noop).freeze(&Registry::empty()).unwrap();
        let (_, params) = table.lookup(&Method::GET, "/users/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let err = Router::new()
            .get("/items", noop)
            .route("/items", noop, &[Method::POST, Method::GET])
            .freeze(&Registry::empty())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateRoute { ref method, ref path } if method == "GET" && path == "/items"
        ));
    }

    #[test]
    fn missing_provider_fails_at_freeze() {
        let err = Router::new().get("/n", needs_u64).freeze(&Registry::empty()).unwrap_err();
        assert!(matches!(err, Error::MissingDependency { type_name: "u64", .. }));
    }
}
