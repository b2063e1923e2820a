use crate::body::ResponseBody;
use http::{HeaderMap, HeaderValue, Response, header};
use http_body::Body;
use http_body_util::{BodyExt, Limited};
use std::ops::{Bound, RangeBounds};

/// Largest streaming body, in bytes, either stage will pull into memory.
pub const BUFFER_MAX: u64 = 1024 * 1024;

/// Returns the known length of a body: the Content-Length header, or an exact
/// size hint from the body itself.
pub(crate) fn content_length(headers: &HeaderMap, body: &ResponseBody) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or_else(|| body.size_hint().exact())
}

/// Materializes a streaming body whose known length is within `limit`.
///
/// Bodies of unknown length, or too large, are returned untouched. Collection
/// stops at the known length: a producer that yields more than it declared,
/// or fails while being collected, is replaced by a body re-emitting the
/// error, so the transport still sees the failure.
///
/// An empty collected body keeps its `Content-Length`, since HEAD responses
/// advertise the length of the GET representation.
pub(crate) async fn buffer_small(
    response: Response<ResponseBody>,
    limit: Bound<u64>,
) -> Response<ResponseBody> {
    let (mut parts, body) = response.into_parts();

    let body = match body {
        ResponseBody::Streaming(inner) => {
            let body = ResponseBody::Streaming(inner);
            match content_length(&parts.headers, &body) {
                Some(len) if (Bound::Unbounded, limit).contains(&len) => {
                    tracing::debug!(content_length = len, "buffering streaming body");
                    let cap = usize::try_from(len).unwrap_or(usize::MAX);
                    match Limited::new(body, cap).collect().await {
                        Ok(collected) => {
                            let bytes = collected.to_bytes();
                            if !bytes.is_empty() {
                                parts.headers.insert(
                                    header::CONTENT_LENGTH,
                                    HeaderValue::from(bytes.len()),
                                );
                            }
                            ResponseBody::Buffered(bytes)
                        }
                        Err(error) => {
                            tracing::warn!(%error, "streaming body failed while buffering");
                            ResponseBody::failed(error)
                        }
                    }
                }
                _ => body,
            }
        }
        buffered => buffered,
    };

    Response::from_parts(parts, body)
}
