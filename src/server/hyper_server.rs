//! Hyper-based HTTP Server
//!
//! Direct Hyper implementation with manual routing:
//! - POST /v1/embeddings
//! - GET  /healthz
//! - GET  /readyz
//! - GET  /

use hyper::body::to_bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpSocket;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::{EmbeddingError, EmbeddingService};
use crate::protocol::{EmbeddingRequest, HttpErrorResponse};

/// Bind a listening socket with TCP_NODELAY and SO_REUSEADDR
pub fn bind(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    // Nagle buffers small packets causing 40-200ms delays
    socket.set_nodelay(true)?;
    socket.set_reuseaddr(true)?;

    socket.bind(addr)?;
    let listener = socket.listen(1024)?;
    listener.into_std()
}

/// Serve the embedding API on an already bound listener until `shutdown` resolves
pub async fn serve<F>(
    listener: std::net::TcpListener,
    service: Arc<EmbeddingService>,
    shutdown: F,
) -> Result<(), hyper::Error>
where
    F: Future<Output = ()>,
{
    let make_svc = make_service_fn(move |_| {
        let service = Arc::clone(&service);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let service = Arc::clone(&service);
                handle_request(req, service)
            }))
        }
    });

    Server::from_tcp(listener)?
        .http1_keepalive(true)
        .http1_half_close(false)
        .tcp_nodelay(true)
        .tcp_sleep_on_accept_errors(true)
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Main request handler
pub async fn handle_request(
    req: Request<Body>,
    service: Arc<EmbeddingService>,
) -> Result<Response<Body>, Infallible> {
    let origin = req
        .headers()
        .get("origin")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = match (&method, path.as_str()) {
        (&Method::POST, "/v1/embeddings") => handle_embed(req, &service).await,
        (&Method::GET, "/healthz") => handle_health(&service),
        (&Method::GET, "/readyz") => handle_ready(&service).await,
        (&Method::GET, "/") => handle_root(&service).await,
        (&Method::OPTIONS, _) => empty_response(StatusCode::NO_CONTENT),
        _ => json_response(StatusCode::NOT_FOUND, &HttpErrorResponse::not_found()),
    };

    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", origin);
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type"),
    );

    Ok(response)
}

/// Liveness never depends on the model
fn handle_health(service: &EmbeddingService) -> Response<Body> {
    let status = if service.health() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    text_response(status, "ok")
}

async fn handle_ready(service: &EmbeddingService) -> Response<Body> {
    let state = service.ready().await;
    debug!("Readiness probe: {}", state);
    let status = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    text_response(status, state.token())
}

async fn handle_root(service: &EmbeddingService) -> Response<Body> {
    let info = serde_json::json!({
        "name": "Embedding Service",
        "version": env!("CARGO_PKG_VERSION"),
        "state": service.ready().await.token(),
        "model": service.info().await,
        "endpoints": {
            "embeddings": { "method": "POST", "path": "/v1/embeddings" },
            "health": { "method": "GET", "path": "/healthz" },
            "ready": { "method": "GET", "path": "/readyz" }
        }
    });
    json_response(StatusCode::OK, &info)
}

async fn handle_embed(req: Request<Body>, service: &EmbeddingService) -> Response<Body> {
    let request_id = Uuid::new_v4();
    let span = info_span!("embed", %request_id);

    async move {
        let start_time = Instant::now();

        let body_bytes = match to_bytes(req.into_body()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return error_response(&EmbeddingError::InvalidRequest {
                    message: format!("failed to read request body: {}", e),
                });
            }
        };

        let request = match EmbeddingRequest::from_slice(&body_bytes) {
            Ok(request) => request,
            Err(e) => return error_response(&e),
        };

        match service.embed(&request).await {
            Ok(response) => {
                info!(
                    "⏱️  Embedded {} texts in {:?}",
                    response.data.len(),
                    start_time.elapsed()
                );
                json_response(StatusCode::OK, &response)
            }
            Err(e) => error_response(&e),
        }
    }
    .instrument(span)
    .await
}

/// Status code for a request-level error
pub fn status_for(error: &EmbeddingError) -> StatusCode {
    match error {
        EmbeddingError::InvalidInputType { .. } | EmbeddingError::InvalidRequest { .. } => {
            StatusCode::BAD_REQUEST
        }
        EmbeddingError::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &EmbeddingError) -> Response<Body> {
    let status = status_for(error);
    if status.is_server_error() {
        error!("❌ Embedding request failed: {}", error);
    } else {
        warn!("Rejected embedding request: {}", error);
    }
    json_response(status, &HttpErrorResponse::from(error))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("❌ Failed to serialize response: {}", e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
