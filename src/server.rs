//! Axum router construction and WebDAV method dispatch.
//!
//! WebDAV distinguishes operations by method, and most of its methods are
//! not ones axum has routing helpers for.  Everything except the landing
//! page therefore lands in a single [`dispatch`] handler that matches on
//! the method name.  Every path below `/` belongs to the caller's
//! collection, so there are no other routes.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::errors::{generate_request_id, DavError};
use crate::handlers::{collection, lock, object, transfer, Session};
use crate::metrics::metrics_middleware;
use crate::AppState;

/// Methods advertised by `OPTIONS`.
pub const ALLOWED_METHODS: &str =
    "GET, HEAD, PUT, DELETE, OPTIONS, PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK, UNLOCK";

/// Build the axum [`Router`] serving the WebDAV namespace.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // GET / is the landing page; every other method on / is WebDAV.
        .route("/", get(landing_page).fallback(dispatch))
        .fallback(dispatch)
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        // common_headers_middleware is innermost so error responses get them too.
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // Uploads are streamed, so there is no reason to cap them.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds common response headers to every response:
/// - `x-request-id`: 16-character hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `hubdav`
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert(header::DATE, value);
    }
    headers.insert(header::SERVER, HeaderValue::from_static("hubdav"));

    response
}

// -- Dispatch ------------------------------------------------------------------

/// Route one WebDAV request.
///
/// `OPTIONS` is answered before the `Authorization` header is even looked
/// at.  Every other method opens a [`Session`] first, so an
/// unauthenticated request never reaches the store.
async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, DavError> {
    if method == Method::OPTIONS {
        return Ok(options());
    }

    let session = Session::open(&state, &headers)?;
    let path = uri.path();

    match method.as_str() {
        "GET" => object::get_object(&session, path, &headers, false).await,
        "HEAD" => object::get_object(&session, path, &headers, true).await,
        "PUT" => object::put_object(&session, path, body).await,
        "DELETE" => object::delete_object(&session, path).await,
        "PROPFIND" => collection::propfind(&session, path, &headers).await,
        "PROPPATCH" => Ok(lock::proppatch()),
        "MKCOL" => collection::mkcol(&session, path).await,
        "COPY" => transfer::copy_or_move(&session, path, &headers, false).await,
        "MOVE" => transfer::copy_or_move(&session, path, &headers, true).await,
        "LOCK" => lock::lock(&session),
        "UNLOCK" => Ok(lock::unlock()),
        _ => Err(DavError::UnsupportedMethod),
    }
}

/// `OPTIONS` -- Advertise the supported methods and compliance classes.
fn options() -> Response {
    (
        StatusCode::OK,
        [
            (header::ALLOW, ALLOWED_METHODS),
            (header::HeaderName::from_static("dav"), "1, 2"),
            (header::HeaderName::from_static("ms-author-via"), "DAV"),
        ],
    )
        .into_response()
}

// -- Landing page --------------------------------------------------------------

const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>hubdav</title>
</head>
<body>
<h1>hubdav</h1>
<p>This server speaks WebDAV. Point a WebDAV client at this address and
sign in with <code>owner/collection</code> as the user name and your
access token as the password.</p>
</body>
</html>
"#;

/// `GET /` -- Static status page, no authentication.
async fn landing_page() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

// -- Tests ----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{basic, state_with, CountingConnector, FaultyConnector};
    use crate::storage::backend::ObjectStore;
    use bytes::Bytes;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        connector: CountingConnector,
        auth: String,
    }

    impl Harness {
        fn new() -> Self {
            let connector = CountingConnector::default();
            Self {
                app: app(state_with(connector.clone())),
                connector,
                auth: basic("alice/data", "secret"),
            }
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            headers: &[(&str, &str)],
            body: impl Into<Body>,
        ) -> Response {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, self.auth.as_str());
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }
            self.app
                .clone()
                .oneshot(builder.body(body.into()).unwrap())
                .await
                .unwrap()
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_auth_is_challenged_without_store_calls() {
        let h = Harness::new();
        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PROPFIND")
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        assert_eq!(h.connector.calls(), 0);
    }

    #[tokio::test]
    async fn test_traversal_rejected_without_store_calls() {
        let h = Harness::new();
        for uri in ["/a/../../other/x", "/a/%2e%2e/%2E%2E/other"] {
            let response = h.send("GET", uri, &[], Body::empty()).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
        assert_eq!(h.connector.calls(), 0);
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let h = Harness::new();
        let response = h.send("PUT", "/notes/hello.txt", &[], "hello world").await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = h.send("GET", "/notes/hello.txt", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "11");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(body_text(response).await, "hello world");

        let response = h.send("HEAD", "/notes/hello.txt", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "11");
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn test_broken_upload_keeps_partial_bytes() {
        let h = Harness::new();
        let body = Body::from_stream(futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from("part")),
            Err(std::io::Error::other("connection reset")),
        ]));
        let response = h.send("PUT", "/up/broken.bin", &[], body).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = h.send("GET", "/up/broken.bin", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "part");
    }

    #[tokio::test]
    async fn test_marker_and_cache_failures_do_not_fail_requests() {
        let connector = FaultyConnector::default();
        let app = app(state_with(connector.clone()));
        let auth = basic("alice/data", "secret");
        let send = |method: &str, uri: &str, body: &'static str| {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, auth.as_str())
                .body(Body::from(body))
                .unwrap();
            app.clone().oneshot(request)
        };

        let response = send("PUT", "/d/f.txt", "abc").await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(!connector.store.exists("alice/data/d/.keep").unwrap());

        let response = send("GET", "/d/f.txt", "").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "abc");

        let response = send("DELETE", "/d", "").await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(connector.store.is_empty());
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let h = Harness::new();
        h.send("PUT", "/hello.txt", &[], "hello world").await;

        let response = h
            .send("GET", "/hello.txt", &[("range", "bytes=0-4")], Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-4/11");
        assert_eq!(body_text(response).await, "hello");

        let response = h
            .send("GET", "/hello.txt", &[("range", "bytes=-5")], Body::empty())
            .await;
        assert_eq!(body_text(response).await, "world");

        let response = h
            .send("GET", "/hello.txt", &[("range", "bytes=11-")], Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */11");
    }

    #[tokio::test]
    async fn test_mkcol_then_propfind_hides_marker() {
        let h = Harness::new();
        let response = h.send("MKCOL", "/empty", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = h.send("MKCOL", "/empty", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = h
            .send("PROPFIND", "/empty", &[("depth", "1")], Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
        let body = body_text(response).await;
        assert_eq!(body.matches("<D:response>").count(), 1);
        assert!(!body.contains(".keep"));
        assert!(body.contains("<D:href>/empty/</D:href>"));
    }

    #[tokio::test]
    async fn test_propfind_root_lists_children() {
        let h = Harness::new();
        h.send("PUT", "/a.txt", &[], "a").await;
        h.send("MKCOL", "/dir", &[], Body::empty()).await;

        let response = h
            .send("PROPFIND", "/", &[("depth", "1")], Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
        let body = body_text(response).await;
        assert_eq!(body.matches("<D:response>").count(), 3);
        assert!(body.contains("<D:href>/a.txt</D:href>"));
        assert!(body.contains("<D:href>/dir/</D:href>"));

        let response = h
            .send("PROPFIND", "/", &[("depth", "0")], Body::empty())
            .await;
        assert_eq!(body_text(response).await.matches("<D:response>").count(), 1);
    }

    #[tokio::test]
    async fn test_move_file() {
        let h = Harness::new();
        h.send("PUT", "/a.txt", &[], "payload").await;

        let response = h
            .send("MOVE", "/a.txt", &[("destination", "/b.txt")], Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = h.send("GET", "/a.txt", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = h.send("GET", "/b.txt", &[], Body::empty()).await;
        assert_eq!(body_text(response).await, "payload");
    }

    #[tokio::test]
    async fn test_root_is_immutable() {
        let h = Harness::new();
        let response = h.send("DELETE", "/", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let response = h
            .send("MOVE", "/", &[("destination", "/elsewhere")], Body::empty())
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(h.connector.calls(), 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let h = Harness::new();
        let response = h.send("DELETE", "/missing", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        h.send("PUT", "/dir/f.txt", &[], "x").await;
        let response = h.send("DELETE", "/dir", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = h.send("GET", "/dir/f.txt", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_lock_and_noop_verbs() {
        let h = Harness::new();
        let response = h.send("LOCK", "/a.txt", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("lock-token"));

        let response = h.send("UNLOCK", "/a.txt", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = h.send("PROPPATCH", "/a.txt", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let h = Harness::new();
        let response = h.send("PATCH", "/a.txt", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_options_needs_no_auth() {
        let h = Harness::new();
        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/any/path")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["dav"], "1, 2");
        assert!(response.headers()[header::ALLOW]
            .to_str()
            .unwrap()
            .contains("PROPFIND"));
        assert_eq!(h.connector.calls(), 0);
    }

    #[tokio::test]
    async fn test_landing_page_and_common_headers() {
        let h = Harness::new();
        let response = h
            .app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::SERVER], "hubdav");
        assert_eq!(response.headers()["x-request-id"].len(), 16);
        assert!(response.headers().contains_key(header::DATE));
        assert!(body_text(response).await.contains("WebDAV"));
        assert_eq!(h.connector.calls(), 0);
    }
}
