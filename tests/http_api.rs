//! End-to-end tests against a real listener

use async_trait::async_trait;
use embedding_service::{
    Embedding, EmbeddingEngine, EmbeddingResult, EmbeddingServer, EngineLoader, ServerConfig,
};
use hyper::{Body, Client, Method, Request, StatusCode};
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// Returns `[1, 0, 0, 0]` for any text
struct Dummy;

#[async_trait]
impl EmbeddingEngine for Dummy {
    fn dimension(&self) -> usize {
        4
    }

    async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
    }
}

struct Running {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    _dirs: tempfile::TempDir,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Reserve a free local port; the server binds it itself
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Spawn a server on a free port with a usable model directory. Returns
/// without waiting for the listener.
fn spawn_server(background_load: bool, with_model_dir: bool, loader: EngineLoader) -> Running {
    let dirs = tempfile::tempdir().unwrap();
    let model_dir = dirs.path().join("model");
    if with_model_dir {
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("config.json"), "{}").unwrap();
    }

    let port = free_port();
    let mut config = ServerConfig::default();
    config.network.host = "127.0.0.1".to_string();
    config.network.port = port;
    config.embedding.model_id = "dummy-4d".to_string();
    config.embedding.model_dir = model_dir;
    config.embedding.cache_dir = dirs.path().join("cache");
    config.embedding.background_load = background_load;

    let server = EmbeddingServer::new(config, loader).unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.run(async {
        let _ = stopped.await;
    }));

    Running {
        addr: SocketAddr::from(([127, 0, 0, 1], port)),
        stop: Some(stop),
        _dirs: dirs,
    }
}

async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..500 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener on {} never opened", addr);
}

/// Spawn a server and wait until it accepts connections
async fn start(background_load: bool, with_model_dir: bool, loader: EngineLoader) -> Running {
    let running = spawn_server(background_load, with_model_dir, loader);
    wait_for_listener(running.addr).await;
    running
}

fn dummy_loader() -> EngineLoader {
    Box::new(|| -> EmbeddingResult<Arc<dyn EmbeddingEngine>> { Ok(Arc::new(Dummy)) })
}

async fn get(addr: SocketAddr, path: &str) -> (StatusCode, String) {
    let uri = format!("http://{}{}", addr, path).parse().unwrap();
    let response = Client::new().get(uri).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn post(addr: SocketAddr, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{}/v1/embeddings", addr))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = Client::new().request(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn wait_for_readyz(addr: SocketAddr, expected: StatusCode) -> String {
    for _ in 0..200 {
        let (status, body) = get(addr, "/readyz").await;
        if status == expected && body != "initializing" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("readyz never reached {}", expected);
}

#[tokio::test]
async fn test_background_load_lifecycle() {
    let (release, gate) = mpsc::channel::<()>();
    let loader: EngineLoader = Box::new(move || -> EmbeddingResult<Arc<dyn EmbeddingEngine>> {
        let _ = gate.recv();
        Ok(Arc::new(Dummy))
    });
    let server = start(true, true, loader).await;

    // Listener is up while the model is still loading
    assert_eq!(get(server.addr, "/healthz").await, (StatusCode::OK, "ok".to_string()));
    assert_eq!(
        get(server.addr, "/readyz").await,
        (StatusCode::SERVICE_UNAVAILABLE, "initializing".to_string())
    );
    let (status, body) = post(server.addr, json!({"input": ["a"]})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());

    release.send(()).unwrap();
    assert_eq!(wait_for_readyz(server.addr, StatusCode::OK).await, "ready");

    let (status, body) = post(server.addr, json!({"input": ["a", "b"]})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");
    assert_eq!(body["model"], "dummy-4d");
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["index"], 0);
    assert_eq!(data[1]["index"], 1);
    for item in data {
        assert_eq!(item["embedding"], json!([1.0, 0.0, 0.0, 0.0]));
    }
}

#[tokio::test]
async fn test_synchronous_load_is_ready_on_first_request() {
    let server = start(false, true, dummy_loader()).await;
    assert_eq!(get(server.addr, "/readyz").await, (StatusCode::OK, "ready".to_string()));
}

#[tokio::test]
async fn test_synchronous_load_keeps_port_closed() {
    let (release, gate) = mpsc::channel::<()>();
    let loader: EngineLoader = Box::new(move || -> EmbeddingResult<Arc<dyn EmbeddingEngine>> {
        let _ = gate.recv();
        Ok(Arc::new(Dummy))
    });
    let server = spawn_server(false, true, loader);

    // Nothing accepts connections while the model loads
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(TcpStream::connect(server.addr).await.is_err());

    release.send(()).unwrap();
    wait_for_listener(server.addr).await;

    // The first answer already reports ready
    assert_eq!(get(server.addr, "/readyz").await, (StatusCode::OK, "ready".to_string()));
    assert_eq!(get(server.addr, "/healthz").await, (StatusCode::OK, "ok".to_string()));
}

#[tokio::test]
async fn test_missing_model_dir_fails_readiness() {
    let server = start(true, false, dummy_loader()).await;

    let body = wait_for_readyz(server.addr, StatusCode::SERVICE_UNAVAILABLE).await;
    assert!(body.starts_with("failed:"), "unexpected body {}", body);

    // Still alive, still answering with structured errors
    assert_eq!(get(server.addr, "/healthz").await.0, StatusCode::OK);
    let (status, body) = post(server.addr, json!({"input": "a"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("failed"));
}

#[tokio::test]
async fn test_input_validation_over_http() {
    let server = start(false, true, dummy_loader()).await;

    let (status, body) = post(server.addr, json!({"input": 42})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid input type");

    let (status, body) = post(server.addr, json!({"input": ""})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = post(server.addr, json!({"input": [], "model": "label"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["model"], "label");
}
