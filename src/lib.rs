//! Armonaut's HTTP response pipeline for Tower.
//!
//! Every response goes through two stages, in this order:
//!
//! 1. The **conditional-cache stage** ([`ConditionalLayer`]) runs as soon as
//!    the handler returns. Responses with a `Last-Modified` or `ETag` header
//!    are marked conditional. Successful GET/HEAD responses without one get an
//!    ETag hashed from their body, buffering streaming bodies of up to 1 MiB
//!    first.
//! 2. The **compression stage** ([`CompressionLayer`]) is queued as the last
//!    response callback. It negotiates `br` or `gzip` from `Accept-Encoding`
//!    and repairs the ETag of whatever it compresses.
//!
//! Handlers declare extra `Vary` entries with [`add_vary`]; the entries are
//! merged in by a response callback, before compression runs.
//!
//! # Example
//!
//! ```ignore
//! use armonaut::{PipelineLayer, add_vary};
//! use http::header::ACCEPT_LANGUAGE;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(PipelineLayer::new())
//!     .layer(add_vary([ACCEPT_LANGUAGE]))
//!     .service(my_handler);
//! ```
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - `Vary` includes `Cookie` or `Authorization`
//! - `Content-Encoding` header is already set
//! - The negotiated encoding is `identity`
//! - The body is buffered and compressing it would not make it smaller
//!
//! Streaming bodies with a known length below 1 MiB are buffered and treated
//! like buffered bodies.
//!
//! # Response Modifications
//!
//! Unless compression is skipped for credentials or an existing encoding:
//! - `Vary` includes `Accept-Encoding`
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to the codec used
//! - `Accept-Ranges` header is removed
//! - Buffered bodies get the compressed `Content-Length` and an ETag hashed
//!   from the compressed bytes
//! - Streaming bodies lose `Content-Length`, and an existing ETag is replaced
//!   by one derived from it and the encoding name

#![deny(missing_docs)]

mod body;
mod buffer;
pub mod compression;
pub mod conditional;
pub mod config;
mod encode;
mod encoding;
pub mod etag;
pub mod finalize;
mod future;
pub mod observability;
mod pipeline;
pub mod vary;

pub use body::{BoxError, ResponseBody};
pub use buffer::BUFFER_MAX;
pub use compression::{CompressionLayer, CompressionService, compress_response};
pub use conditional::{
    ConditionalLayer, ConditionalResponse, ConditionalService, apply_validators, is_conditional,
};
pub use config::{ConfigError, Environment, Settings};
pub use encoding::Encoding;
pub use finalize::{FinalizeLayer, FinalizeService, ResponseCallback, ResponseCallbacks};
pub use future::ResponseFuture;
pub use pipeline::PipelineLayer;
pub use vary::{AddVaryLayer, AddVaryService, Vary, add_vary};
