//! Interactive shell.
//!
//! Starts a server whose route table has an extra `CONNECT /` view and sends
//! it one synthetic request. That view owns the console: commands run inside
//! the request's session, as if typed into a view.
//!
//! Commands:
//! - `req`: the synthetic request
//! - `session`: its session and the operations it owns
//! - `METHOD /path`: send a request through the same server and print the
//!   response
//! - `exit`: leave (end of input does the same)

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Method, StatusCode};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::http::{HttpError, Request, Server};
use crate::lifecycle::server_options;
use crate::middleware;
use crate::routing::{view_fn, Routes};
use crate::Error;

const PROMPT: &[u8] = b"strata> ";

struct Console<R, W> {
    lines: Lines<R>,
    output: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn repl(&mut self, req: &Arc<Request>, server: &Server) -> std::io::Result<()> {
        loop {
            self.output.write_all(PROMPT).await?;
            self.output.flush().await?;
            let Some(line) = self.lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            let out = match line {
                "" => continue,
                "exit" | "quit" => break,
                "req" => describe_request(req),
                "session" => {
                    let session = req.session();
                    format!(
                        "session {} active={} ops={:?}",
                        session.id(),
                        session.is_active(),
                        session.ops()
                    )
                }
                other => match parse_request(other) {
                    Some((method, path)) => send(server, method, path).await,
                    None => format!("unknown command {other:?}; try req, session, GET /path, exit"),
                },
            };
            self.output.write_all(out.as_bytes()).await?;
            self.output.write_all(b"\n").await?;
        }
        self.output.flush().await
    }
}

fn describe_request(req: &Request) -> String {
    format!(
        "{} {} id={} state={:?} view={}",
        req.method(),
        req.uri(),
        req.id(),
        req.state(),
        req.view_name().unwrap_or_default()
    )
}

fn parse_request(line: &str) -> Option<(Method, &str)> {
    let (method, path) = line.split_once(char::is_whitespace)?;
    let path = path.trim();
    if !path.starts_with('/') {
        return None;
    }
    let method = Method::from_bytes(method.as_bytes()).ok()?;
    Some((method, path))
}

async fn send(server: &Server, method: Method, path: &str) -> String {
    let raw = match axum::http::Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
    {
        Ok(raw) => raw,
        Err(err) => return format!("bad request: {err}"),
    };
    let response = server.handle(raw).await;
    let status = response.status();
    match axum::body::to_bytes(response.into_body(), usize::MAX).await {
        Ok(bytes) => format!("{status}\n{}", String::from_utf8_lossy(&bytes)),
        Err(err) => format!("{status}\n(body failed: {err})"),
    }
}

/// Run the shell against `settings` until `exit` or end of input.
pub async fn run<R, W>(settings: &Settings, input: R, output: W) -> Result<(), Error>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let console = Arc::new(Mutex::new(Some(Console {
        lines: input.lines(),
        output,
    })));
    let target: Arc<OnceLock<Server>> = Arc::new(OnceLock::new());

    let repl = {
        let console = Arc::clone(&console);
        let target = Arc::clone(&target);
        view_fn(move |req, _ctx| {
            let console = Arc::clone(&console);
            let target = Arc::clone(&target);
            async move {
                let Some(mut attached) = console.lock().await.take() else {
                    return Err(HttpError::new(StatusCode::CONFLICT, "shell already attached"));
                };
                let Some(server) = target.get() else {
                    return Err(HttpError::defect("shell view ran before its server existed"));
                };
                attached.repl(&req, server).await.map_err(HttpError::from_error)?;
                Ok(None)
            }
        })
    };

    let routes = Routes::new()
        .route(Method::CONNECT, "/", "repl", repl)
        .concat(Routes::from_config(&settings.routes)?);
    let server = Server::new(
        format!("test-{}", settings.name),
        Arc::new(routes),
        middleware::from_settings(settings)?,
        server_options(settings),
    );
    let _ = target.set(server.clone());

    server.start().await;
    server.ready().await;

    let raw = axum::http::Request::builder()
        .method(Method::CONNECT)
        .uri("/")
        .body(Body::empty())
        .map_err(|err| Error::msg(err.to_string()))?;
    let response = server.handle(raw).await;
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await;

    server.close().await?;

    if !status.is_success() {
        let detail = body
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        return Err(Error::msg(format!("shell ended with {status}: {detail}")));
    }
    Ok(())
}
