//! Compression stage.
//!
//! Negotiates a content encoding, compresses the response either eagerly
//! (buffered bodies) or lazily (streaming bodies) and keeps the ETag in step
//! with the representation actually sent.

use crate::body::ResponseBody;
use crate::buffer::{BUFFER_MAX, buffer_small};
use crate::conditional::ConditionalResponse;
use crate::encode::{EncodedBody, encode_all};
use crate::encoding::Encoding;
use crate::etag::{content_etag, derive_etag, etag, is_weak, set_etag, set_weak_etag};
use crate::finalize::ResponseCallbacks;
use crate::future::ResponseFuture;
use crate::vary::Vary;
use http::{HeaderMap, HeaderValue, Request, Response, header};
use std::ops::Bound;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Compresses `response` with the negotiated `encoding`.
///
/// The response is left untouched when it varies by `Cookie` or
/// `Authorization`, or already has a `Content-Encoding`. Otherwise
/// `Accept-Encoding` is added to `Vary`, and unless `encoding` is identity
/// the body is compressed:
/// - streaming bodies are wrapped in a lazy encoder, lose their
///   `Content-Length`, and have their ETag derived from the previous one;
/// - buffered bodies are compressed in full and kept only if that makes them
///   strictly smaller, in which case the ETag is recomputed from the
///   compressed bytes.
pub async fn compress_response(
    mut response: Response<ResponseBody>,
    encoding: Encoding,
) -> Response<ResponseBody> {
    let mut vary = Vary::from_headers(response.headers());

    // Credential-dependent bodies must never be compressed
    if vary.varies_on_credentials() {
        tracing::debug!("response varies on credentials, not compressing");
        return response;
    }

    if response.headers().contains_key(header::CONTENT_ENCODING) {
        return response;
    }

    vary.insert(&header::ACCEPT_ENCODING);
    vary.write_to(response.headers_mut());

    let Some(encoder) = encoding.encoder() else {
        return response;
    };

    let response = buffer_small(response, Bound::Excluded(BUFFER_MAX)).await;
    let (mut parts, body) = response.into_parts();

    let body = match body {
        ResponseBody::Streaming(inner) => {
            let always_flush = is_always_flush(&parts.headers);

            set_encoding_headers(&mut parts.headers, encoding);
            parts.headers.remove(header::CONTENT_LENGTH);

            // The previous tag named the unencoded representation
            if let Some(previous) = etag(&parts.headers) {
                let derived = derive_etag(previous, encoding);
                if is_weak(&parts.headers) {
                    set_weak_etag(&mut parts.headers, &derived);
                } else {
                    set_etag(&mut parts.headers, &derived);
                }
            }

            tracing::debug!(encoding = encoding.as_str(), "compressing streaming body");
            ResponseBody::streaming(EncodedBody::new(inner, encoder, always_flush))
        }
        ResponseBody::Buffered(original) => match encode_all(encoder, &original) {
            Ok(compressed) if compressed.len() < original.len() => {
                tracing::debug!(
                    encoding = encoding.as_str(),
                    original = original.len(),
                    compressed = compressed.len(),
                    "compressed buffered body"
                );
                set_encoding_headers(&mut parts.headers, encoding);
                parts
                    .headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(compressed.len()));
                set_etag(&mut parts.headers, &content_etag(&compressed));
                parts.extensions.insert(ConditionalResponse);
                ResponseBody::Buffered(compressed)
            }
            Ok(compressed) => {
                tracing::debug!(
                    encoding = encoding.as_str(),
                    original = original.len(),
                    compressed = compressed.len(),
                    "compression did not shrink body, sending it unencoded"
                );
                ResponseBody::Buffered(original)
            }
            Err(error) => {
                tracing::warn!(%error, encoding = encoding.as_str(), "failed to compress body");
                ResponseBody::Buffered(original)
            }
        },
    };

    Response::from_parts(parts, body)
}

fn set_encoding_headers(headers: &mut HeaderMap, encoding: Encoding) {
    headers.insert(header::CONTENT_ENCODING, encoding.header_value());
    // Ranges of the encoded representation can't be served
    headers.remove(header::ACCEPT_RANGES);
}

/// Checks if the encoder should flush after every chunk (e.g., event streams).
fn is_always_flush(headers: &HeaderMap) -> bool {
    let no_buffering = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"));

    no_buffering
        || headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
            })
}

/// A Tower layer that compresses HTTP response bodies.
///
/// Compression is queued as a response callback when the request carries a
/// [`ResponseCallbacks`] queue, so it runs after every callback registered
/// by the handler. Without a queue the response is compressed as soon as
/// the wrapped service returns it.
#[derive(Debug, Clone, Default)]
pub struct CompressionLayer {
    _priv: (),
}

impl CompressionLayer {
    /// Creates a new compression layer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner)
    }
}

/// A Tower service that compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
}

impl<S> CompressionService<S> {
    /// Creates a new compression service wrapping the given inner service.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for CompressionService<S>
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
        let encoding = Encoding::negotiate(
            req.headers()
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );
        let callbacks = req.extensions().get::<ResponseCallbacks>().cloned();

        let inner = self.inner.call(req);

        Box::pin(async move {
            let response = inner.await?;
            match callbacks {
                Some(callbacks) => {
                    callbacks.add(move |response| compress_response(response, encoding));
                    Ok(response)
                }
                None => Ok(compress_response(response, encoding).await),
            }
        })
    }
}
