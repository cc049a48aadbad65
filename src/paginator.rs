//! Limit/offset pagination for collection endpoints.
//!
//! A [`Paginator`] reads `limit` and `offset` from the query string, asks a
//! caller-supplied callback for one page of rows, drains the returned
//! [`RowIterator`] and wraps the rows in a [`PaginatedResponse`]:
//!
//! ```json
//! {"_links": {"next": "http://host/items?limit=5&offset=10", "previous": null},
//!  "count": 20,
//!  "results": [ ... ]}
//! ```
//!
//! `count` is the total number of matching rows the iterator reports, not the
//! length of `results`. Malformed arguments are field errors; a `limit` above
//! the maximum is silently clamped.

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;

use http::StatusCode;
use serde::Serialize;
use tracing::error;
use url::Url;

use crate::context::Context;
use crate::dependency::BoxError;
use crate::field::FieldError;
use crate::response::{IntoResponse, Response};

pub const DEFAULT_LIMIT: usize = 100;
pub const DEFAULT_OFFSET: usize = 0;
pub const DEFAULT_MAX_LIMIT: usize = 500;

// ── Arguments ─────────────────────────────────────────────────────────────────

/// `limit` and `offset` as requested by the client.
///
/// Also available as a handler dependency: the default registry parses it
/// from the query string with the crate-wide defaults, recording field errors
/// on the context as it goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PaginationArgs {
    pub limit: usize,
    pub offset: usize,
}

impl PaginationArgs {
    /// Parses both arguments without touching the context's error list.
    ///
    /// Missing or empty values fall back to the defaults. Each argument is
    /// validated independently, so a bad `limit` never hides a bad `offset`.
    pub fn read(
        ctx: &Context,
        default_limit: usize,
        default_offset: usize,
    ) -> (Self, Vec<FieldError>) {
        let mut errors = Vec::new();
        let limit = read_field(ctx, "limit", default_limit, 1).unwrap_or_else(|e| {
            errors.push(e);
            default_limit
        });
        let offset = read_field(ctx, "offset", default_offset, 0).unwrap_or_else(|e| {
            errors.push(e);
            default_offset
        });
        (Self { limit, offset }, errors)
    }

    /// Parses both arguments, recording any field errors on `ctx`.
    pub fn parse(ctx: &mut Context, default_limit: usize, default_offset: usize) -> Self {
        let (args, errors) = Self::read(ctx, default_limit, default_offset);
        for e in errors {
            ctx.add_field_error(e);
        }
        args
    }

    /// Provider used by the default registry.
    pub fn from_context(ctx: &mut Context) -> Self {
        Self::parse(ctx, DEFAULT_LIMIT, DEFAULT_OFFSET)
    }
}

fn read_field(ctx: &Context, name: &str, default: usize, min: i64) -> Result<usize, FieldError> {
    let raw = match ctx.query(name) {
        None | Some("") => return Ok(default),
        Some(raw) => raw,
    };
    let n: i64 = raw.parse().map_err(|_| FieldError::invalid_integer(name))?;
    if n < min {
        return Err(FieldError::out_of_range(name, format!("must be at least {min}")));
    }
    usize::try_from(n).map_err(|_| FieldError::out_of_range(name, "value is too large"))
}

// ── Rows ──────────────────────────────────────────────────────────────────────

/// One page of rows, consumed once.
///
/// Iteration yields the rows of the current page in order; [`total`](Self::total)
/// reports how many rows match overall. The paginator calls `total` once and
/// then drains the iterator. It never rewinds it.
pub trait RowIterator<T>: Iterator<Item = Result<T, BoxError>> {
    fn total(&mut self) -> Result<u64, BoxError>;
}

/// A page already materialised in memory.
pub struct Rows<T> {
    items: std::vec::IntoIter<T>,
    total: u64,
}

impl<T> Rows<T> {
    pub fn new(items: Vec<T>, total: u64) -> Self {
        Self { items: items.into_iter(), total }
    }
}

impl<T> Iterator for Rows<T> {
    type Item = Result<T, BoxError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next().map(Ok)
    }
}

impl<T> RowIterator<T> for Rows<T> {
    fn total(&mut self) -> Result<u64, BoxError> { Ok(self.total) }
}

// ── Response envelope ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PaginationLinks {
    pub next: Option<String>,
    pub previous: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PaginatedResponse<T> {
    #[serde(rename = "_links")]
    pub links: PaginationLinks,
    pub count: u64,
    pub results: Vec<T>,
}

/// A page could not be produced. Server-side, never a field error.
#[derive(Debug, thiserror::Error)]
pub enum PaginateError {
    #[error("paginate: fetching page: {0}")]
    Fetch(#[source] BoxError),

    #[error("paginate: counting rows: {0}")]
    Count(#[source] BoxError),

    #[error("paginate: reading row: {0}")]
    Row(#[source] BoxError),

    #[error("paginate: building links: {0}")]
    Url(#[from] url::ParseError),
}

/// Logs the failure and answers `500`.
impl IntoResponse for PaginateError {
    fn into_response(self) -> Response {
        error!(error = %self, "pagination failed");
        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .json(&serde_json::json!({"error": "internal server error"}))
    }
}

// ── Paginator ─────────────────────────────────────────────────────────────────

/// Builds [`PaginatedResponse`]s of `T`.
///
/// ```rust,no_run
/// # use restcore::{Context, Paginator, Rows};
/// # use http::StatusCode;
/// # #[derive(serde::Serialize)] struct Item;
/// # async fn load(limit: usize, offset: usize) -> Result<Rows<Item>, std::io::Error> { todo!() }
/// async fn list(mut ctx: Context) -> Context {
///     let page = Paginator::<Item>::new()
///         .max_limit(50)
///         .paginate(&mut ctx, |limit, offset| load(limit, offset))
///         .await;
///     match page {
///         Ok(Some(page)) => ctx.json(StatusCode::OK, &page),
///         Ok(None) => {} // field errors recorded, the dispatcher reports them
///         Err(e) => ctx.respond(e),
///     }
///     ctx
/// }
/// ```
pub struct Paginator<T> {
    default_limit: usize,
    default_offset: usize,
    max_limit: usize,
    _row: PhantomData<fn() -> T>,
}

impl<T> Paginator<T> {
    pub fn new() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            default_offset: DEFAULT_OFFSET,
            max_limit: DEFAULT_MAX_LIMIT,
            _row: PhantomData,
        }
    }

    /// Zero is raised to one.
    pub fn default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn default_offset(mut self, offset: usize) -> Self {
        self.default_offset = offset;
        self
    }

    /// Zero is raised to one, so every page advances.
    pub fn max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit.max(1);
        self
    }

    /// Produces one page for the current request.
    ///
    /// Returns `Ok(None)` when `limit` or `offset` is malformed: the field
    /// errors are on `ctx` and `fetch` is never called. Errors from `fetch`,
    /// from counting, or from any single row fail the whole page.
    pub async fn paginate<F, Fut, I, E>(
        &self,
        ctx: &mut Context,
        fetch: F,
    ) -> Result<Option<PaginatedResponse<T>>, PaginateError>
    where
        F: FnOnce(usize, usize) -> Fut,
        Fut: Future<Output = Result<I, E>>,
        I: RowIterator<T>,
        E: Into<BoxError>,
    {
        let (args, errors) = PaginationArgs::read(ctx, self.default_limit, self.default_offset);
        if !errors.is_empty() {
            // A PaginationArgs provider may have recorded the same errors.
            for e in errors {
                if !ctx.field_errors().contains(&e) {
                    ctx.add_field_error(e);
                }
            }
            return Ok(None);
        }

        let limit = args.limit.min(self.max_limit);
        let offset = args.offset;

        let mut rows = fetch(limit, offset).await.map_err(|e| PaginateError::Fetch(e.into()))?;
        let count = rows.total().map_err(PaginateError::Count)?;
        let results = rows
            .by_ref()
            .collect::<Result<Vec<T>, BoxError>>()
            .map_err(PaginateError::Row)?;

        let links = links(&ctx.url()?, limit, offset, count);
        Ok(Some(PaginatedResponse { links, count, results }))
    }
}

impl<T> Default for Paginator<T> {
    fn default() -> Self { Self::new() }
}

/// `next` exists while rows remain past this page, `previous` whenever the
/// page does not start at zero. Only `offset` is rewritten.
fn links(base: &Url, limit: usize, offset: usize, count: u64) -> PaginationLinks {
    let end = limit.saturating_add(offset);
    PaginationLinks {
        next: (count > end as u64).then(|| with_offset(base, end)),
        previous: (offset != 0).then(|| with_offset(base, offset.saturating_sub(limit))),
    }
}

fn with_offset(base: &Url, offset: usize) -> String {
    let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in base.query_pairs() {
        query.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    query.insert("offset".to_owned(), vec![offset.to_string()]);

    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(query.iter().flat_map(|(k, vs)| vs.iter().map(move |v| (k, v))));
    url.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(uri: &str) -> Url {
        Url::parse(&format!("http://example.com{uri}")).unwrap()
    }

    #[test]
    fn middle_page_links_both_ways() {
        let l = links(&base("/items?limit=5&offset=5"), 5, 5, 20);
        assert_eq!(l.next.as_deref(), Some("http://example.com/items?limit=5&offset=10"));
        assert_eq!(l.previous.as_deref(), Some("http://example.com/items?limit=5&offset=0"));
    }

    #[test]
    fn first_page_has_no_previous() {
        let l = links(&base("/items"), 5, 0, 20);
        assert_eq!(l.next.as_deref(), Some("http://example.com/items?offset=5"));
        assert_eq!(l.previous, None);
    }

    #[test]
    fn last_page_has_no_next() {
        let l = links(&base("/items?limit=5&offset=15"), 5, 15, 20);
        assert_eq!(l.next, None);
        assert_eq!(l.previous.as_deref(), Some("http://example.com/items?limit=5&offset=10"));
    }

    #[test]
    fn previous_offset_never_goes_negative() {
        let l = links(&base("/items?offset=3"), 5, 3, 20);
        assert_eq!(l.previous.as_deref(), Some("http://example.com/items?offset=0"));
    }

    #[test]
    fn zero_limits_are_raised_to_one() {
        let p = Paginator::<u32>::new().default_limit(0).max_limit(0);
        assert_eq!(p.default_limit, 1);
        assert_eq!(p.max_limit, 1);
        let l = links(&base("/items"), p.max_limit, 0, 3);
        assert_eq!(l.next.as_deref(), Some("http://example.com/items?offset=1"));
    }

    #[test]
    fn other_params_are_kept_sorted() {
        let l = links(&base("/items?q=a+b&tag=x&tag=y&offset=0"), 2, 0, 10);
        assert_eq!(
            l.next.as_deref(),
            Some("http://example.com/items?offset=2&q=a+b&tag=x&tag=y"),
        );
    }
}
