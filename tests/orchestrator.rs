//! Request lifecycle through the axum application, without a socket.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use tower::ServiceExt;

use strata::http::{interceptor, request_layer, view_layer, Phases, REQUEST_ID};
use strata::middleware::{JsonBody, Logging, Monitor, RawBody};
use strata::{HttpError, Interceptor, Reply};

mod common;

#[tokio::test]
async fn unknown_path_is_404_with_stack_and_request_id() {
    let app = common::demo_server(Vec::new()).app();
    let response = app
        .oneshot(common::request(Method::GET, "/missing"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key(REQUEST_ID));
    let body = common::body_json(response).await;
    assert_eq!(body["message"], "Not Found");
    assert!(body["stack"].is_array());
}

#[tokio::test]
async fn view_without_reply_is_empty_200() {
    let app = common::demo_server(Vec::new()).app();
    let response = app
        .oneshot(common::request(Method::GET, "/empty"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(common::body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn declared_error_status_and_context_reach_the_client() {
    let app = common::demo_server(Vec::new()).app();
    let response = app
        .oneshot(common::request(Method::GET, "/teapot"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = common::body_json(response).await;
    assert_eq!(body["message"], "short and stout");
    assert_eq!(body["spout"], true);
}

#[tokio::test]
async fn incoming_request_id_is_echoed() {
    let app = common::demo_server(Vec::new()).app();
    let mut request = common::request(Method::GET, "/hello");
    request
        .headers_mut()
        .insert(REQUEST_ID, "abc-123".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers()[REQUEST_ID], "abc-123");
    assert_eq!(common::body_bytes(response).await, b"hello");
}

#[tokio::test]
async fn interceptors_wrap_in_registration_order() {
    let order: Arc<Mutex<Vec<String>>> = Default::default();
    let tag = |label: &'static str| -> Arc<dyn Interceptor> {
        let request_order = Arc::clone(&order);
        let view_order = Arc::clone(&order);
        interceptor(
            label,
            Phases::new()
                .on_request(request_layer(move |req, next| {
                    let order = Arc::clone(&request_order);
                    async move {
                        order.lock().unwrap().push(format!("{label} request in"));
                        let out = next.run(req).await;
                        order.lock().unwrap().push(format!("{label} request out"));
                        out
                    }
                }))
                .on_view(view_layer(move |args, next| {
                    let order = Arc::clone(&view_order);
                    async move {
                        order.lock().unwrap().push(format!("{label} view"));
                        next.run(args).await
                    }
                })),
        )
    };
    let app = common::demo_server(vec![tag("a"), tag("b")]).app();
    let response = app
        .oneshot(common::request(Method::GET, "/hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        *order.lock().unwrap(),
        vec![
            "a request in",
            "b request in",
            "a view",
            "b view",
            "b request out",
            "a request out",
        ]
    );
}

#[tokio::test]
async fn short_circuiting_layer_skips_routing() {
    let gate = interceptor(
        "gate",
        Phases::new().on_request(request_layer(|req, next| async move {
            if req.headers().contains_key(header::AUTHORIZATION) {
                next.run(req).await
            } else {
                Err(HttpError::new(StatusCode::UNAUTHORIZED, "who are you"))
            }
        })),
    );
    let app = common::demo_server(vec![gate]).app();

    let denied = app
        .clone()
        .oneshot(common::request(Method::GET, "/hello"))
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let mut request = common::request(Method::GET, "/hello");
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "yes".parse().unwrap());
    assert_eq!(app.oneshot(request).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn panicking_view_is_a_500() {
    let boom = interceptor(
        "boom",
        Phases::new().on_view(view_layer(|_args, _next| async move {
            if true {
                panic!("view layer exploded");
            }
            Ok(Reply::empty())
        })),
    );
    let app = common::demo_server(vec![boom]).app();
    let response = app
        .oneshot(common::request(Method::GET, "/hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = common::body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("view layer exploded"));
}

#[tokio::test]
async fn json_bodies_flow_through_the_body_pipeline() {
    let app = common::demo_server(vec![
        Arc::new(Logging::new(true)) as Arc<dyn Interceptor>,
        Arc::new(JsonBody::new()),
    ])
    .app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"greeting":"hi"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::body_json(response).await["greeting"], "hi");
}

#[tokio::test]
async fn body_without_a_matching_layer_is_415() {
    let app = common::demo_server(vec![Arc::new(JsonBody::new()) as Arc<dyn Interceptor>]).app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hi"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn raw_body_layer_keeps_bytes_for_later_layers() {
    let app = common::demo_server(vec![
        Arc::new(RawBody::new(false)) as Arc<dyn Interceptor>,
        Arc::new(JsonBody::new()),
    ])
    .app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"n":1}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(common::body_json(response).await["n"], 1);
}

#[tokio::test]
async fn monitor_answers_before_routing() {
    let server = common::demo_server(vec![Arc::new(Monitor::new()) as Arc<dyn Interceptor>]);
    server.start().await;
    server.ready().await;
    let response = server
        .app()
        .oneshot(common::request(Method::GET, "/_monitor/ping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!common::body_bytes(response).await.is_empty());
    server.close().await.unwrap();
}

#[tokio::test]
async fn broken_response_stream_is_reported_not_rendered() {
    let routes = common::demo_routes().route(
        Method::GET,
        "/broken",
        "broken",
        strata::routing::view_fn(|_req, _ctx| async {
            let chunks = futures_util::stream::iter(vec![
                Ok(axum::body::Bytes::from_static(b"partial")),
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upstream hung up")),
            ]);
            Ok(Some(Reply::stream(Body::from_stream(chunks))))
        }),
    );
    let server = strata::Server::new(
        "demo",
        Arc::new(routes),
        Vec::new(),
        strata::ServerOptions::default(),
    );
    let mut errors = server.transport_errors();

    let mut request = common::request(Method::GET, "/broken");
    request
        .headers_mut()
        .insert(REQUEST_ID, "broken-1".parse().unwrap());
    let response = server.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .is_err());

    let reported = errors.try_recv().unwrap();
    assert_eq!(reported.request_id, "broken-1");
    assert!(reported.message.contains("upstream hung up"));
}
