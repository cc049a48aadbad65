//! Unified setup and infrastructure error type.

use http::Method;

/// The error type returned by restcore's fallible setup and serving operations.
///
/// Application-level failures (404, 400 field errors, 500 from a panic) are
/// expressed as HTTP [`Response`](crate::Response) values, not as `Error`s.
/// This type surfaces what must stop the server from starting at all: a
/// conflicting route table, a handler whose dependencies cannot be provided,
/// or the listener failing to bind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two routes were registered for the same method and path.
    #[error("duplicate route `{method} {path}`")]
    DuplicateRoute { method: String, path: String },

    /// The path pattern was rejected by the radix tree.
    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: String },

    /// A handler requires a type no provider produces.
    #[error("route `{route}` requires `{type_name}` but no provider is registered for it")]
    MissingDependency { route: String, type_name: &'static str },

    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn duplicate(method: Option<&Method>, path: &str) -> Self {
        Self::DuplicateRoute {
            method: method.map_or_else(|| "*".to_owned(), |m| m.as_str().to_owned()),
            path: path.to_owned(),
        }
    }
}
