//! Per-request response finalization.
//!
//! [`FinalizeService`] puts a fresh [`ResponseCallbacks`] queue into the
//! request extensions before calling the wrapped service. Anything in the
//! handler chain may push callbacks onto it; once the wrapped service has
//! produced a response, the queue is drained in registration order, each
//! callback running exactly once. Conditional requests are answered last.

use crate::body::ResponseBody;
use crate::conditional::Preconditions;
use crate::future::ResponseFuture;
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use http::{Request, Response};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A deferred mutation of the response.
pub type ResponseCallback =
    Box<dyn FnOnce(Response<ResponseBody>) -> BoxFuture<'static, Response<ResponseBody>> + Send>;

/// The request-scoped queue of response callbacks.
///
/// Handles are cheap to clone and all refer to the same queue.
#[derive(Clone, Default)]
pub struct ResponseCallbacks {
    queue: Arc<Mutex<VecDeque<ResponseCallback>>>,
}

impl ResponseCallbacks {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ResponseCallback>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues an asynchronous callback.
    pub fn add<F, Fut>(&self, callback: F)
    where
        F: FnOnce(Response<ResponseBody>) -> Fut + Send + 'static,
        Fut: Future<Output = Response<ResponseBody>> + Send + 'static,
    {
        self.lock()
            .push_back(Box::new(move |response| callback(response).boxed()));
    }

    /// Queues a callback that mutates the response in place.
    pub fn add_sync<F>(&self, callback: F)
    where
        F: FnOnce(&mut Response<ResponseBody>) + Send + 'static,
    {
        self.add(move |mut response| {
            callback(&mut response);
            future::ready(response)
        });
    }

    /// Returns the number of callbacks waiting to run.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no callbacks are waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs every queued callback in order, including ones queued while
    /// draining, and returns the final response.
    pub async fn run(&self, mut response: Response<ResponseBody>) -> Response<ResponseBody> {
        loop {
            let next = self.lock().pop_front();
            let Some(callback) = next else {
                return response;
            };
            response = callback(response).await;
        }
    }
}

impl fmt::Debug for ResponseCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCallbacks")
            .field("pending", &self.len())
            .finish()
    }
}

/// Layer that owns the response callback queue.
#[derive(Debug, Clone)]
pub struct FinalizeLayer {
    evaluate_preconditions: bool,
}

impl FinalizeLayer {
    /// Creates a finalize layer that answers conditional requests.
    pub fn new() -> Self {
        Self {
            evaluate_preconditions: true,
        }
    }

    /// Sets whether conditional requests may be answered with
    /// `304 Not Modified`.
    pub fn evaluate_preconditions(mut self, enabled: bool) -> Self {
        self.evaluate_preconditions = enabled;
        self
    }
}

impl Default for FinalizeLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for FinalizeLayer {
    type Service = FinalizeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FinalizeService {
            inner,
            evaluate_preconditions: self.evaluate_preconditions,
        }
    }
}

/// Service produced by [`FinalizeLayer`].
#[derive(Debug, Clone)]
pub struct FinalizeService<S> {
    inner: S,
    evaluate_preconditions: bool,
}

impl<S> FinalizeService<S> {
    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for FinalizeService<S>
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

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let callbacks = ResponseCallbacks::new();
        req.extensions_mut().insert(callbacks.clone());

        let preconditions = self
            .evaluate_preconditions
            .then(|| Preconditions::from_request(&req));

        let inner = self.inner.call(req);

        Box::pin(async move {
            let response = inner.await?;
            let pending = callbacks.len();
            let response = callbacks.run(response).await;
            tracing::trace!(callbacks = pending, "finalized response");

            Ok(match preconditions {
                Some(preconditions) => preconditions.evaluate(response),
                None => response,
            })
        })
    }
}
