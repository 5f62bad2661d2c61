//! Local fixture HTTP server for crawl tests: canned routes, per-path hit
//! counts, and an in-flight high-water mark for concurrency assertions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct Route {
    /// Successive responses for this path; the last one repeats.
    responses: Vec<Response>,
    served: AtomicUsize,
}

pub struct Response {
    pub status: u16,
    pub body: String,
}

pub fn html(body: &str) -> Route {
    Route {
        responses: vec![Response {
            status: 200,
            body: body.to_string(),
        }],
        served: AtomicUsize::new(0),
    }
}

pub fn sequence(responses: Vec<Response>) -> Route {
    Route {
        responses,
        served: AtomicUsize::new(0),
    }
}

pub struct ServerState {
    routes: HashMap<String, Route>,
    hits: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
}

pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FixtureServer {
    pub async fn serve(routes: Vec<(&str, Route)>) -> Self {
        Self::serve_with_delay(routes, None).await
    }

    pub async fn serve_with_delay(routes: Vec<(&str, Route)>, delay: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            routes: routes
                .into_iter()
                .map(|(path, route)| (path.to_string(), route))
                .collect(),
            hits: Mutex::new(HashMap::new()),
            delay,
            inflight: AtomicUsize::new(0),
            max_inflight: AtomicUsize::new(0),
        });
        tokio::spawn({
            let state = state.clone();
            async move {
                loop {
                    let Ok((sock, _)) = listener.accept().await else {
                        break;
                    };
                    tokio::spawn(handle(sock, state.clone()));
                }
            }
        });
        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        *self.state.hits.lock().unwrap().get(path).unwrap_or(&0)
    }

    pub fn max_inflight(&self) -> usize {
        self.state.max_inflight.load(Ordering::SeqCst)
    }
}

async fn handle(mut sock: tokio::net::TcpStream, state: Arc<ServerState>) {
    let mut buf = vec![0u8; 8192];
    let mut read = 0;
    loop {
        let Ok(n) = sock.read(&mut buf[read..]).await else {
            return;
        };
        if n == 0 {
            break;
        }
        read += n;
        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
            break;
        }
    }
    let request = String::from_utf8_lossy(&buf[..read]);
    let path = request
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let current = state.inflight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_inflight.fetch_max(current, Ordering::SeqCst);
    *state.hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }

    let (status, body) = match state.routes.get(&path) {
        Some(route) => {
            let i = route.served.fetch_add(1, Ordering::SeqCst);
            let resp = &route.responses[i.min(route.responses.len() - 1)];
            (resp.status, resp.body.clone())
        }
        None => (404, String::from("not found")),
    };
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    sock.write_all(response.as_bytes()).await.ok();
    sock.shutdown().await.ok();

    state.inflight.fetch_sub(1, Ordering::SeqCst);
}
