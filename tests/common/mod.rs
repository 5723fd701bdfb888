//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use strata::http::{Interceptor, Reply, Server, ServerOptions};
use strata::routing::{view_fn, Routes};
use strata::HttpError;

pub fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// `/hello` (text), `/empty` (no reply), `/teapot` (418 error) and
/// `/echo` (POST, body through the body pipeline).
pub fn demo_routes() -> Routes {
    Routes::new()
        .route(
            Method::GET,
            "/hello",
            "hello",
            view_fn(|_req, _ctx| async { Ok(Some(Reply::text("hello"))) }),
        )
        .route(
            Method::GET,
            "/empty",
            "empty",
            view_fn(|_req, _ctx| async { Ok(None) }),
        )
        .route(
            Method::GET,
            "/teapot",
            "teapot",
            view_fn(|_req, _ctx| async {
                Err(HttpError::new(StatusCode::IM_A_TEAPOT, "short and stout")
                    .with_context("spout", true))
            }),
        )
        .route(
            Method::POST,
            "/echo",
            "echo",
            view_fn(|req, _ctx| async move {
                let body = req.body().await?;
                Ok(Some(Reply::from(body.as_json().cloned().unwrap_or_default())))
            }),
        )
}

pub fn demo_server(interceptors: Vec<Arc<dyn Interceptor>>) -> Server {
    Server::new(
        "demo",
        Arc::new(demo_routes()),
        interceptors,
        ServerOptions::default(),
    )
}

/// Serve `server` on an ephemeral port.
pub struct Running {
    pub addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), strata::Error>>,
}

impl Running {
    pub async fn start(server: Server) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .serve(listener, async move {
                    let _ = stopped.await;
                })
                .await
        });
        Self { addr, stop, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}
