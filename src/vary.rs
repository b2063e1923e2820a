//! The `Vary` header as a set, and a layer for declaring extra entries.

use crate::body::ResponseBody;
use crate::finalize::ResponseCallbacks;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, header};
use pin_project_lite::pin_project;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// The set of request header names a response varies by.
///
/// Names are compared case-insensitively and written back in a canonical
/// order, so the resulting header never depends on the order in which
/// contributors added them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vary {
    names: BTreeSet<String>,
}

impl Vary {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every `Vary` header in `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let names = headers
            .get_all(header::VARY)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        Self { names }
    }

    /// Adds a header name to the set.
    pub fn insert(&mut self, name: &HeaderName) -> bool {
        self.names.insert(name.as_str().to_owned())
    }

    /// Adds every name in `other` to the set.
    pub fn union(&mut self, other: &Vary) {
        self.names.extend(other.names.iter().cloned());
    }

    /// Returns true if the set contains `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_lowercase())
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the names in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Returns true if the response varies by credentials, i.e. by the
    /// `Cookie` or `Authorization` request headers.
    pub fn varies_on_credentials(&self) -> bool {
        self.contains(header::COOKIE.as_str()) || self.contains(header::AUTHORIZATION.as_str())
    }

    /// Replaces the `Vary` headers in `headers` with this set.
    pub fn write_to(&self, headers: &mut HeaderMap) {
        headers.remove(header::VARY);
        if self.names.is_empty() {
            return;
        }

        // "*" already covers every other entry
        let value = if self.names.contains("*") {
            "*".to_owned()
        } else {
            self.iter().collect::<Vec<_>>().join(", ")
        };

        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(header::VARY, value);
            }
            Err(_) => tracing::warn!(vary = %value, "vary set is not a valid header value"),
        }
    }
}

impl<'a> FromIterator<&'a HeaderName> for Vary {
    fn from_iter<I: IntoIterator<Item = &'a HeaderName>>(iter: I) -> Self {
        let mut vary = Vary::new();
        for name in iter {
            vary.insert(name);
        }
        vary
    }
}

impl FromIterator<HeaderName> for Vary {
    fn from_iter<I: IntoIterator<Item = HeaderName>>(iter: I) -> Self {
        let mut vary = Vary::new();
        for name in iter {
            vary.insert(&name);
        }
        vary
    }
}

/// Unions `additions` into the `Vary` header of `response`.
pub fn merge_vary<B>(response: &mut Response<B>, additions: &Vary) {
    let mut vary = Vary::from_headers(response.headers());
    vary.union(additions);
    vary.write_to(response.headers_mut());
}

/// Declares that responses produced by the wrapped service vary by `names`.
///
/// ```ignore
/// use armonaut::add_vary;
/// use http::header::ACCEPT_LANGUAGE;
/// use tower::Layer;
///
/// let service = add_vary([ACCEPT_LANGUAGE]).layer(my_service);
/// ```
pub fn add_vary<I>(names: I) -> AddVaryLayer
where
    I: IntoIterator<Item = HeaderName>,
{
    AddVaryLayer::new(names)
}

/// Layer produced by [`add_vary`].
#[derive(Debug, Clone)]
pub struct AddVaryLayer {
    additions: Vary,
}

impl AddVaryLayer {
    /// Creates a layer adding `names` to the `Vary` header.
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator<Item = HeaderName>,
    {
        Self {
            additions: names.into_iter().collect(),
        }
    }
}

impl<S> Layer<S> for AddVaryLayer {
    type Service = AddVaryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AddVaryService {
            inner,
            additions: self.additions.clone(),
        }
    }
}

/// Service produced by [`AddVaryLayer`].
#[derive(Debug, Clone)]
pub struct AddVaryService<S> {
    inner: S,
    additions: Vary,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AddVaryService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResponseBody>>,
{
    type Response = Response<ResponseBody>;
    type Error = S::Error;
    type Future = AddVaryFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Defer the union to finalization when a queue is available
        let inline = match req.extensions().get::<ResponseCallbacks>() {
            Some(callbacks) => {
                let additions = self.additions.clone();
                callbacks.add_sync(move |response| merge_vary(response, &additions));
                None
            }
            None => Some(self.additions.clone()),
        };

        AddVaryFuture {
            inner: self.inner.call(req),
            inline,
        }
    }
}

pin_project! {
    /// Future for [`AddVaryService`] responses.
    pub struct AddVaryFuture<F> {
        #[pin]
        inner: F,
        inline: Option<Vary>,
    }
}

impl<F, E> Future for AddVaryFuture<F>
where
    F: Future<Output = Result<Response<ResponseBody>, E>>,
{
    type Output = Result<Response<ResponseBody>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(mut response)) => {
                if let Some(additions) = this.inline.take() {
                    merge_vary(&mut response, &additions);
                }
                Poll::Ready(Ok(response))
            }
        }
    }
}
