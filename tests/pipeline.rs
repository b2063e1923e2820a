use armonaut::{
    BoxError, Encoding, PipelineLayer, ResponseBody, ResponseCallbacks, Settings, Vary, add_vary,
    is_conditional,
};
use bytes::Bytes;
use futures_util::stream;
use http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode, header};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use std::convert::Infallible;
use tower::{Layer, Service, ServiceBuilder, ServiceExt};

const PAGE: &str = "<html><body>hello world hello world hello world hello world</body></html>";

fn page() -> String {
    PAGE.repeat(50)
}

fn request(method: Method, accept_encoding: Option<&'static str>) -> Request<()> {
    let mut req = Request::new(());
    *req.method_mut() = method;
    if let Some(value) = accept_encoding {
        req.headers_mut()
            .insert(header::ACCEPT_ENCODING, HeaderValue::from_static(value));
    }
    req
}

fn lazy(chunks: Vec<&'static str>) -> ResponseBody {
    let frames: Vec<Result<Frame<Bytes>, BoxError>> = chunks
        .into_iter()
        .map(|chunk| Ok(Frame::data(Bytes::from_static(chunk.as_bytes()))))
        .collect();
    ResponseBody::streaming(StreamBody::new(stream::iter(frames)))
}

fn html_handler() -> impl Service<
    Request<()>,
    Response = Response<ResponseBody>,
    Error = Infallible,
    Future: Send + 'static,
> + Clone {
    tower::service_fn(|_req: Request<()>| async move {
        let mut response = Response::new(ResponseBody::from(page()));
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        Ok::<_, Infallible>(response)
    })
}

#[tokio::test]
#[cfg(feature = "gzip")]
async fn test_buffered_get_is_tagged_then_compressed() {
    let service = PipelineLayer::new().layer(html_handler());
    let response = service
        .oneshot(request(Method::GET, Some("gzip")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
    assert_eq!(response.headers().get(header::VARY).unwrap(), "accept-encoding");
    assert!(is_conditional(&response));

    // The ETag names the compressed bytes, not the page
    let body = response.body().as_bytes().unwrap().clone();
    let expected = format!("\"{}\"", armonaut::etag::content_etag(&body));
    assert_eq!(response.headers().get(header::ETAG).unwrap(), expected.as_str());
    assert_ne!(
        expected,
        format!("\"{}\"", armonaut::etag::content_etag(page().as_bytes()))
    );
}

#[tokio::test]
async fn test_identity_negotiation_keeps_body_and_tag() {
    let service = PipelineLayer::new().layer(html_handler());
    let response = service.oneshot(request(Method::GET, None)).await.unwrap();

    assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    assert_eq!(response.headers().get(header::VARY).unwrap(), "accept-encoding");

    let expected = format!("\"{}\"", armonaut::etag::content_etag(page().as_bytes()));
    assert_eq!(response.headers().get(header::ETAG).unwrap(), expected.as_str());

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from(page()));
}

#[tokio::test]
async fn test_small_streaming_get_is_buffered() {
    let handler = tower::service_fn(|_req: Request<()>| async move {
        let mut response = Response::new(lazy(vec!["data"]));
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("4"));
        Ok::<_, Infallible>(response)
    });

    let response = PipelineLayer::new()
        .layer(handler)
        .oneshot(request(Method::GET, None))
        .await
        .unwrap();

    assert!(is_conditional(&response));
    assert!(response.body().is_buffered());
    assert_eq!(
        response.headers().get(header::ETAG).unwrap(),
        "\"jXd/OF09/siBXSD3SWAm3A\""
    );
}

#[tokio::test]
async fn test_large_streaming_get_is_left_alone() {
    let handler = tower::service_fn(|_req: Request<()>| async move {
        let mut response = Response::new(lazy(vec!["data"]));
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("1048577"));
        Ok::<_, Infallible>(response)
    });

    let response = PipelineLayer::new()
        .layer(handler)
        .oneshot(request(Method::GET, None))
        .await
        .unwrap();

    assert!(!is_conditional(&response));
    assert!(response.headers().get(header::ETAG).is_none());
    assert!(!response.body().is_buffered());
}

#[tokio::test]
#[cfg(feature = "gzip")]
async fn test_streaming_compression_derives_tag() {
    let handler = tower::service_fn(|_req: Request<()>| async move {
        let mut response = Response::new(lazy(vec!["hello ", "world"]));
        response
            .headers_mut()
            .insert(header::ETAG, HeaderValue::from_static("\"abc\""));
        Ok::<_, Infallible>(response)
    });

    let response = PipelineLayer::new()
        .layer(handler)
        .oneshot(request(Method::GET, Some("gzip")))
        .await
        .unwrap();

    assert!(is_conditional(&response));
    assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
    assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
    assert_eq!(
        response.headers().get(header::ETAG).unwrap(),
        "\"7XP+QTshMiuDGLQkUXcxqw\""
    );
}

#[tokio::test]
#[cfg(feature = "gzip")]
async fn test_add_vary_runs_before_compression() {
    // The view declares Vary: Cookie, so compression must back off
    let service = ServiceBuilder::new()
        .layer(PipelineLayer::new())
        .layer(add_vary([header::COOKIE]))
        .service(html_handler());

    let response = service
        .oneshot(request(Method::GET, Some("gzip")))
        .await
        .unwrap();

    assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    assert_eq!(response.headers().get(header::VARY).unwrap(), "cookie");
}

#[tokio::test]
async fn test_add_vary_unions_with_view_vary() {
    let handler = tower::service_fn(|_req: Request<()>| async move {
        let mut response = Response::new(ResponseBody::from("hi"));
        response
            .headers_mut()
            .insert(header::VARY, HeaderValue::from_static("bar"));
        Ok::<_, Infallible>(response)
    });

    let service = ServiceBuilder::new()
        .layer(PipelineLayer::new())
        .layer(add_vary([HeaderName::from_static("foobar")]))
        .service(handler);

    let response = service.oneshot(request(Method::GET, None)).await.unwrap();

    let vary = Vary::from_headers(response.headers());
    assert_eq!(
        vary.iter().collect::<Vec<_>>(),
        vec!["accept-encoding", "bar", "foobar"]
    );
}

#[tokio::test]
async fn test_handler_callbacks_run_before_compression() {
    let handler = tower::service_fn(|req: Request<()>| async move {
        let callbacks = req.extensions().get::<ResponseCallbacks>().unwrap().clone();
        callbacks.add_sync(|response| {
            assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
            response
                .headers_mut()
                .insert("x-seen-by-callback", HeaderValue::from_static("1"));
        });
        Ok::<_, Infallible>(Response::new(ResponseBody::from(page())))
    });

    let response = PipelineLayer::new()
        .layer(handler)
        .oneshot(request(Method::GET, Some("br, gzip")))
        .await
        .unwrap();

    assert_eq!(response.headers().get("x-seen-by-callback").unwrap(), "1");
    if cfg!(feature = "brotli") {
        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "br");
    }
}

#[tokio::test]
async fn test_revalidation_answers_not_modified() {
    let service = PipelineLayer::new().layer(html_handler());

    let first = service
        .clone()
        .oneshot(request(Method::GET, None))
        .await
        .unwrap();
    let tag = first.headers().get(header::ETAG).unwrap().clone();

    let mut req = request(Method::GET, None);
    req.headers_mut().insert(header::IF_NONE_MATCH, tag.clone());
    let second = service.oneshot(req).await.unwrap();

    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(second.headers().get(header::ETAG).unwrap(), &tag);
    assert!(second.headers().get(header::CONTENT_TYPE).is_none());
    let body = second.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_prevent_http_cache_disables_not_modified() {
    let settings = Settings::resolve(Default::default(), |var| {
        (var == armonaut::config::ENV_VAR).then(|| "development".to_owned())
    })
    .unwrap();
    let service = PipelineLayer::from_settings(&settings).layer(html_handler());

    let mut req = request(Method::GET, None);
    req.headers_mut()
        .insert(header::IF_NONE_MATCH, HeaderValue::from_static("*"));
    let response = service.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(is_conditional(&response));
}

#[tokio::test]
async fn test_post_is_not_tagged() {
    let service = PipelineLayer::new().layer(html_handler());
    let response = service.oneshot(request(Method::POST, None)).await.unwrap();

    assert!(!is_conditional(&response));
    assert!(response.headers().get(header::ETAG).is_none());
}

#[test]
fn test_negotiation_defaults_to_identity() {
    assert_eq!(Encoding::negotiate(None), Encoding::Identity);
}
