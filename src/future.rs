use crate::body::ResponseBody;
use futures_util::future::BoxFuture;
use http::Response;

/// Future returned by the pipeline's stages.
pub type ResponseFuture<E> = BoxFuture<'static, Result<Response<ResponseBody>, E>>;
