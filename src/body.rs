use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Boxed error type carried by streaming bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A response body, either already materialized or produced lazily.
///
/// The pipeline stages branch on this tag: only `Buffered` bodies can be
/// hashed or compressed in one go, `Streaming` bodies are encoded chunk by
/// chunk as the transport polls them.
pub enum ResponseBody {
    /// A finite body held fully in memory.
    Buffered(Bytes),
    /// A lazily produced body of unknown total size.
    Streaming(UnsyncBoxBody<Bytes, BoxError>),
}

impl ResponseBody {
    /// Creates an empty buffered body.
    pub fn empty() -> Self {
        Self::Buffered(Bytes::new())
    }

    /// Creates a buffered body.
    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        Self::Buffered(bytes.into())
    }

    /// Wraps a lazy body producer.
    pub fn streaming<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self::Streaming(UnsyncBoxBody::new(body.map_err(Into::into)))
    }

    /// Creates a streaming body that fails with `error` on first poll.
    pub(crate) fn failed(error: BoxError) -> Self {
        Self::streaming(FailedBody { error: Some(error) })
    }

    /// Returns true if the body is held fully in memory.
    pub fn is_buffered(&self) -> bool {
        matches!(self, ResponseBody::Buffered(_))
    }

    /// Returns the in-memory bytes of a buffered body.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Buffered(bytes) => Some(bytes),
            ResponseBody::Streaming(_) => None,
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            ResponseBody::Streaming(_) => f.debug_tuple("Streaming").finish(),
        }
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::Buffered(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Buffered(bytes.into())
    }
}

impl From<String> for ResponseBody {
    fn from(text: String) -> Self {
        Self::Buffered(text.into())
    }
}

impl From<&'static str> for ResponseBody {
    fn from(text: &'static str) -> Self {
        Self::Buffered(Bytes::from_static(text.as_bytes()))
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            ResponseBody::Buffered(bytes) => {
                if bytes.is_empty() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(Frame::data(std::mem::take(bytes)))))
                }
            }
            ResponseBody::Streaming(inner) => Pin::new(inner).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Buffered(bytes) => bytes.is_empty(),
            ResponseBody::Streaming(inner) => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ResponseBody::Buffered(bytes) => SizeHint::with_exact(bytes.len() as u64),
            ResponseBody::Streaming(inner) => inner.size_hint(),
        }
    }
}

/// Body that yields a single error, used when a producer failed while
/// being materialized.
struct FailedBody {
    error: Option<BoxError>,
}

impl Body for FailedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.get_mut().error.take().map(Err))
    }

    fn is_end_stream(&self) -> bool {
        self.error.is_none()
    }
}
