//! A scripted HTTP/1.1 server for exercising the client against real sockets.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub chunks: Vec<String>,
    /// Wait before sending the status line.
    pub delay: Duration,
    pub chunk_delay: Duration,
    /// Keep the connection open after the last chunk instead of closing it.
    pub hold_open: bool,
}

impl Reply {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            chunks: vec![body.to_string()],
            delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            hold_open: false,
        }
    }

    pub fn sse(chunks: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            chunks: chunks.iter().map(|chunk| chunk.to_string()).collect(),
            delay: Duration::ZERO,
            chunk_delay: Duration::from_millis(5),
            hold_open: false,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            chunks: vec![body.to_string()],
            delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            hold_open: false,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

type Route = dyn Fn(&Request) -> Reply + Send + Sync;

pub struct TestServer {
    port: u16,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl TestServer {
    pub async fn start<F>(route: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let port = listener.local_addr().expect("local addr").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let route: Arc<Route> = Arc::new(route);

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let route = Arc::clone(&route);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve(stream, route, recorded).await;
                });
            }
        });

        Self { port, requests }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.path == path)
            .count()
    }
}

async fn serve(
    mut stream: TcpStream,
    route: Arc<Route>,
    recorded: Arc<Mutex<Vec<Request>>>,
) -> Result<(), String> {
    let request = read_http_request(&mut stream).await?;
    let reply = route(&request);
    recorded.lock().expect("requests lock").push(request);

    tokio::time::sleep(reply.delay).await;
    let head = format!(
        "HTTP/1.1 {} Test\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
        reply.status, reply.content_type
    );
    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|err| err.to_string())?;

    for chunk in &reply.chunks {
        stream
            .write_all(chunk.as_bytes())
            .await
            .map_err(|err| err.to_string())?;
        stream.flush().await.map_err(|err| err.to_string())?;
        tokio::time::sleep(reply.chunk_delay).await;
    }

    if reply.hold_open {
        // Wait until the client gives up on the connection.
        let mut sink = [0_u8; 64];
        while stream.read(&mut sink).await.map_err(|err| err.to_string())? > 0 {}
    }
    stream.shutdown().await.map_err(|err| err.to_string())
}

async fn read_http_request(stream: &mut TcpStream) -> Result<Request, String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.ok_or("header end should exist")?;
    let header_text = std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines.next().ok_or("Missing HTTP request line")?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Ok(Request {
        method,
        path,
        headers,
        body,
    })
}

/// A serving port, management port and OpenAI port wired together the way a
/// deployment reports them.
pub struct Deployment {
    pub serving: TestServer,
    pub management: TestServer,
    pub openai: TestServer,
}

impl Deployment {
    pub async fn start<S, M, O>(serving: S, management: M, openai: O) -> Self
    where
        S: Fn(&Request) -> Option<Reply> + Send + Sync + 'static,
        M: Fn(&Request) -> Option<Reply> + Send + Sync + 'static,
        O: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let openai = TestServer::start(openai).await;
        let openai_port = openai.port();
        let management = TestServer::start(move |request| {
            management(request).unwrap_or_else(|| match request.path.as_str() {
                "/status" => Reply::json(serde_json::json!({
                    "config": { "openai_port": openai_port }
                })),
                _ => Reply::status(404, "not found"),
            })
        })
        .await;
        let management_port = management.port();
        let serving = TestServer::start(move |request| {
            serving(request).unwrap_or_else(|| match request.path.as_str() {
                "/status" => Reply::json(serde_json::json!({
                    "ports": [0, management_port]
                })),
                _ => Reply::status(404, "not found"),
            })
        })
        .await;

        Self {
            serving,
            management,
            openai,
        }
    }

    /// Only the OpenAI port is scripted; discovery answers normally.
    pub async fn openai<O>(openai: O) -> Self
    where
        O: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        Self::start(|_| None, |_| None, openai).await
    }
}

pub fn chat_chunk(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
    )
}
