//! Conditional-cache stage.
//!
//! Marks responses that carry a validator as conditional, and synthesizes a
//! content-derived ETag for successful GET/HEAD responses whose body is, or
//! can cheaply be made, fully buffered.

use crate::body::ResponseBody;
use crate::buffer::{BUFFER_MAX, buffer_small};
use crate::etag::{self, content_etag, set_etag};
use crate::future::ResponseFuture;
use http::{HeaderMap, Method, Request, Response, StatusCode, header};
use std::ops::Bound;
use std::task::{Context, Poll};
use std::time::SystemTime;
use tower::{Layer, Service};

/// Response extension marking a response as eligible for revalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionalResponse;

/// Returns true if `response` is marked as conditional.
pub fn is_conditional<B>(response: &Response<B>) -> bool {
    response.extensions().get::<ConditionalResponse>().is_some()
}

pub(crate) fn mark_conditional<B>(response: &mut Response<B>) {
    response.extensions_mut().insert(ConditionalResponse);
}

/// Attaches validators to a response produced for a request with `method`.
pub async fn apply_validators(
    mut response: Response<ResponseBody>,
    method: &Method,
) -> Response<ResponseBody> {
    let headers = response.headers();

    // Trust validators supplied by the handler
    if headers.contains_key(header::LAST_MODIFIED) || headers.contains_key(header::ETAG) {
        mark_conditional(&mut response);
        return response;
    }

    if response.status() != StatusCode::OK || !(method == Method::GET || method == Method::HEAD) {
        return response;
    }

    let mut response = buffer_small(response, Bound::Included(BUFFER_MAX)).await;

    let tag = match response.body() {
        ResponseBody::Buffered(bytes) => content_etag(bytes),
        ResponseBody::Streaming(_) => {
            tracing::debug!("streaming response left without a validator");
            return response;
        }
    };

    set_etag(response.headers_mut(), &tag);
    mark_conditional(&mut response);
    response
}

/// Layer applying [`apply_validators`] to every response.
#[derive(Debug, Clone, Default)]
pub struct ConditionalLayer {
    _priv: (),
}

impl ConditionalLayer {
    /// Creates a new conditional-cache layer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> Layer<S> for ConditionalLayer {
    type Service = ConditionalService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConditionalService { inner }
    }
}

/// Service produced by [`ConditionalLayer`].
#[derive(Debug, Clone)]
pub struct ConditionalService<S> {
    inner: S,
}

impl<S> ConditionalService<S> {
    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for ConditionalService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResponseBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<ResponseBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().clone();
        let inner = self.inner.call(req);

        Box::pin(async move {
            let response = inner.await?;
            Ok(apply_validators(response, &method).await)
        })
    }
}

/// Validators presented by a request, captured before it is handed to the
/// wrapped service.
#[derive(Debug, Clone, Default)]
pub(crate) struct Preconditions {
    safe: bool,
    if_none_match: Option<String>,
    if_modified_since: Option<SystemTime>,
}

impl Preconditions {
    pub(crate) fn from_request<B>(req: &Request<B>) -> Self {
        let headers = req.headers();
        Self {
            safe: req.method() == Method::GET || req.method() == Method::HEAD,
            if_none_match: headers
                .get(header::IF_NONE_MATCH)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            if_modified_since: http_date(headers, header::IF_MODIFIED_SINCE),
        }
    }

    fn is_fresh(&self, headers: &HeaderMap) -> bool {
        // If-None-Match takes precedence over If-Modified-Since
        if let Some(if_none_match) = &self.if_none_match {
            let current = etag::etag(headers);
            return if_none_match.split(',').any(|candidate| {
                candidate.trim() == "*" || Some(etag::opaque_tag(candidate)) == current
            });
        }

        match (self.if_modified_since, http_date(headers, header::LAST_MODIFIED)) {
            (Some(since), Some(modified)) => modified <= since,
            _ => false,
        }
    }

    /// Replaces a conditional response the client already holds with
    /// `304 Not Modified`.
    pub(crate) fn evaluate(&self, response: Response<ResponseBody>) -> Response<ResponseBody> {
        if !self.safe
            || response.status() != StatusCode::OK
            || !is_conditional(&response)
            || !self.is_fresh(response.headers())
        {
            return response;
        }

        tracing::debug!("answering conditional request with 304");

        let (mut parts, _) = response.into_parts();
        parts.status = StatusCode::NOT_MODIFIED;
        parts.headers.remove(header::CONTENT_LENGTH);
        parts.headers.remove(header::CONTENT_TYPE);
        Response::from_parts(parts, ResponseBody::empty())
    }
}

fn http_date(headers: &HeaderMap, name: header::HeaderName) -> Option<SystemTime> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok())
}
