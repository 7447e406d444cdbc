//! Minimal HTTP/1.1 file server for driving downloads end to end.

#![allow(dead_code)]

use pget::{Config, Context};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
pub struct Resource {
    pub body: Vec<u8>,
    pub accept_ranges: bool,
    pub content_length: bool,
    pub disposition: Option<String>,
    /// Answer range requests with the whole body and `200 OK`.
    pub ignore_range: bool,
    /// Status returned for every request.
    pub status: Option<u16>,
    /// Status returned for GETs carrying exactly this Range header.
    pub fail_range: Option<(String, u16)>,
    pub chunk: usize,
    pub delay: Option<Duration>,
}

impl Resource {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            accept_ranges: true,
            content_length: true,
            disposition: None,
            ignore_range: false,
            status: None,
            fail_range: None,
            chunk: 8 * 1024,
            delay: None,
        }
    }

    pub fn slow(mut self, chunk: usize, delay: Duration) -> Self {
        self.chunk = chunk;
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub range: Option<String>,
    pub cookie: Option<String>,
}

pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    pub async fn start(resource: Resource) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(vec![]));
        let resource = Arc::new(resource);

        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let resource = resource.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, resource, log).await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Range headers of every GET, sorted for order-independent comparison.
    pub fn get_ranges(&self) -> Vec<Option<String>> {
        let mut ranges: Vec<_> = self
            .requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .map(|r| r.range)
            .collect();
        ranges.sort();
        ranges
    }
}

pub fn context(dir: &Path) -> Arc<Context> {
    let config = Config {
        data_dir: Some(dir.join("data")),
        ..Config::default()
    };
    Arc::new(Context::new(&config).unwrap())
}

pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn serve(mut socket: TcpStream, resource: Arc<Resource>, log: Arc<Mutex<Vec<Recorded>>>) -> std::io::Result<()> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        raw.extend_from_slice(&buf[..n]);
    }

    let head = String::from_utf8_lossy(&raw).to_string();
    let mut lines = head.split("\r\n");
    let method = lines
        .next()
        .and_then(|l| l.split(' ').next())
        .unwrap_or_default()
        .to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let range = headers.get("range").cloned();
    log.lock().unwrap().push(Recorded {
        method: method.clone(),
        range: range.clone(),
        cookie: headers.get("cookie").cloned(),
    });

    let failed = resource.status.or_else(|| match (&resource.fail_range, &range) {
        (Some((want, status)), Some(got)) if method == "GET" && want == got => Some(*status),
        _ => None,
    });
    if let Some(status) = failed {
        let response = format!("HTTP/1.1 {} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
        socket.write_all(response.as_bytes()).await?;
        return socket.shutdown().await;
    }

    let total = resource.body.len() as u64;
    let span = match range.as_deref().filter(|_| !resource.ignore_range) {
        Some(value) => match parse_range(value, total) {
            Some(span) => Some(span),
            None => {
                let response = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    total
                );
                socket.write_all(response.as_bytes()).await?;
                return socket.shutdown().await;
            }
        },
        None => None,
    };

    let (start, end) = span.unwrap_or((0, total));
    let mut response = match span {
        Some(_) => format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\n",
            start,
            end.saturating_sub(1),
            total
        ),
        None => "HTTP/1.1 200 OK\r\n".to_string(),
    };
    response.push_str("Connection: close\r\n");
    if resource.accept_ranges {
        response.push_str("Accept-Ranges: bytes\r\n");
    }
    if let Some(disposition) = &resource.disposition {
        response.push_str(&format!("Content-Disposition: {}\r\n", disposition));
    }
    if resource.content_length {
        response.push_str(&format!("Content-Length: {}\r\n", end - start));
    }
    response.push_str("\r\n");
    socket.write_all(response.as_bytes()).await?;

    if method != "HEAD" {
        for chunk in resource.body[start as usize..end as usize].chunks(resource.chunk.max(1)) {
            socket.write_all(chunk).await?;
            socket.flush().await?;
            if let Some(delay) = resource.delay {
                tokio::time::sleep(delay).await;
            }
        }
    }
    socket.shutdown().await
}

/// Parses `bytes=a-b` / `bytes=a-` into a half-open span.
fn parse_range(value: &str, total: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (from, to) = spec.split_once('-')?;
    let start: u64 = from.parse().ok()?;
    let end = match to {
        "" => total,
        to => (to.parse::<u64>().ok()? + 1).min(total),
    };
    (start < end).then_some((start, end))
}
