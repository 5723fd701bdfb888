//! JSON request bodies.

use std::sync::Arc;

use axum::http::{header, StatusCode};

use crate::http::body::DEFAULT_BODY_LIMIT;
use crate::http::{body_layer, BodyValue, HttpError, Interceptor, Phases, Request};

type Accept = dyn Fn(&Request) -> bool + Send + Sync;

/// Body layer for JSON payloads. Requests the predicate rejects go on to the
/// next body layer untouched.
pub struct JsonBody {
    accept: Arc<Accept>,
    limit: usize,
}

impl JsonBody {
    pub fn new() -> Self {
        Self {
            accept: Arc::new(is_json),
            limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_accept<F>(mut self, accept: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.accept = Arc::new(accept);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl Default for JsonBody {
    fn default() -> Self {
        Self::new()
    }
}

/// `application/json` or any `+json` suffix type.
pub fn is_json(req: &Request) -> bool {
    let Some(content_type) = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

impl Interceptor for JsonBody {
    fn name(&self) -> &str {
        "body-json"
    }

    fn phases(self: Arc<Self>) -> Phases {
        Phases::new().on_body(body_layer(move |(req, stream), next| {
            let accept = (self.accept)(&req);
            let limit = self.limit;
            async move {
                if !accept {
                    return next.run((req, stream)).await;
                }
                let bytes = stream.collect(limit).await?;
                serde_json::from_slice(&bytes)
                    .map(BodyValue::Json)
                    .map_err(|err| {
                        HttpError::new(StatusCode::BAD_REQUEST, "Malformed JSON body")
                            .with_context("detail", err.to_string())
                            .with_source(err)
                    })
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Reply, Server, ServerOptions};
    use crate::routing::{view_fn, Routes};
    use axum::body::Body;
    use axum::http::Method;
    use serde_json::json;

    fn server() -> Server {
        let routes = Routes::new().route(
            Method::POST,
            "/echo",
            "echo",
            view_fn(|req, _ctx| async move {
                match req.body().await? {
                    BodyValue::Json(value) => Ok(Some(Reply::from(value))),
                    other => Ok(Some(Reply::bytes(other.as_bytes().to_vec()))),
                }
            }),
        );
        Server::new(
            "test",
            Arc::new(routes),
            vec![Arc::new(JsonBody::new()) as Arc<dyn Interceptor>],
            ServerOptions::default(),
        )
    }

    fn post(content_type: &str, body: &'static str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_of(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn parses_json_bodies() {
        let response = server()
            .handle(post("application/json; charset=utf-8", r#"{"a":1}"#))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_of(response).await, json!({"a": 1}));
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let response = server().handle(post("application/json", "{nope")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_of(response).await["message"], "Malformed JSON body");
    }

    #[tokio::test]
    async fn other_types_fall_through_to_415() {
        let response = server().handle(post("text/plain", "hello")).await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn suffix_types_count_as_json() {
        let req = Request::for_test(
            axum::http::Request::builder()
                .header(header::CONTENT_TYPE, "application/vnd.api+json")
                .body(Body::empty())
                .unwrap(),
        );
        assert!(is_json(&req));
    }
}
