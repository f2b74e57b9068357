//! Minimal HTTP/1.1 server with Range GET support for integration tests.
//!
//! Serves static bodies by path. Unknown paths get 404. Every request's
//! `Range` start is recorded so tests can assert what the client asked for.
//! Routes can also cut a reply short or answer a resume at the wrong offset.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

/// How a served path behaves
#[derive(Debug, Clone)]
pub struct Route {
    pub body: Vec<u8>,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit Content-Length and close the connection after the body.
    pub content_length: bool,
    /// Full-body replies declare the whole length but close after this many bytes.
    pub truncate_at: Option<usize>,
    /// Ranged replies start at byte 0 whatever the client asked for.
    pub misaligned: bool,
}

impl Route {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            support_ranges: true,
            content_length: true,
            truncate_at: None,
            misaligned: false,
        }
    }

    pub fn without_ranges(mut self) -> Self {
        self.support_ranges = false;
        self
    }

    pub fn without_length(mut self) -> Self {
        self.content_length = false;
        self
    }

    pub fn truncated(mut self, n: usize) -> Self {
        self.truncate_at = Some(n);
        self
    }

    pub fn misaligned(mut self) -> Self {
        self.misaligned = true;
        self
    }
}

/// A running server; requests are logged as `(path, range start)`
#[derive(Clone)]
pub struct RangeServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<(String, Option<u64>)>>>,
}

impl RangeServer {
    /// URL for `path` ("/a.zip" -> "http://127.0.0.1:PORT/a.zip")
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<(String, Option<u64>)> {
        self.requests.lock().unwrap().clone()
    }

    /// Range starts sent for `path`, in arrival order
    pub fn ranges_for(&self, path: &str) -> Vec<Option<u64>> {
        self.requests()
            .into_iter()
            .filter(|(p, _)| p == path)
            .map(|(_, r)| r)
            .collect()
    }
}

/// Starts a server in a background thread. The server runs until the process exits.
pub fn start(routes: Vec<(&str, Route)>) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let routes: Arc<HashMap<String, Route>> = Arc::new(
        routes
            .into_iter()
            .map(|(path, route)| (path.to_string(), route))
            .collect(),
    );
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requests);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let routes = Arc::clone(&routes);
            let log = Arc::clone(&log);
            thread::spawn(move || handle(stream, &routes, &log));
        }
    });
    RangeServer {
        base_url: format!("http://127.0.0.1:{}", port),
        requests,
    }
}

/// Server with a single body at `/file.bin`
pub fn start_single(body: Vec<u8>) -> RangeServer {
    start(vec![("/file.bin", Route::new(body))])
}

fn handle(
    mut stream: std::net::TcpStream,
    routes: &HashMap<String, Route>,
    log: &Mutex<Vec<(String, Option<u64>)>>,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, path, range_start) = parse_request(request);
    log.lock().unwrap().push((path.to_string(), range_start));

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    }
    let Some(route) = routes.get(path) else {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    };

    let body = &route.body[..];
    let total = body.len() as u64;
    let (status, content_range, slice) = match range_start {
        Some(start) if route.support_ranges => {
            if start >= total {
                (
                    "416 Range Not Satisfiable",
                    Some(format!("bytes */{}", total)),
                    &body[0..0],
                )
            } else {
                let start = if route.misaligned { 0 } else { start };
                (
                    "206 Partial Content",
                    Some(format!("bytes {}-{}/{}", start, total - 1, total)),
                    &body[start as usize..],
                )
            }
        }
        _ => ("200 OK", None, body),
    };
    let sent = match route.truncate_at {
        Some(n) if content_range.is_none() => &slice[..n.min(slice.len())],
        _ => slice,
    };

    let mut head = format!("HTTP/1.1 {}\r\nConnection: close\r\n", status);
    if route.content_length {
        head.push_str(&format!("Content-Length: {}\r\n", slice.len()));
    }
    if let Some(range) = content_range {
        head.push_str(&format!("Content-Range: {}\r\n", range));
    }
    if route.support_ranges {
        head.push_str("Accept-Ranges: bytes\r\n");
    }
    head.push_str("\r\n");
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(sent);
    let _ = stream.flush();
}

/// Returns (method, path, optional start of `Range: bytes=X-`).
fn parse_request(request: &str) -> (&str, &str, Option<u64>) {
    let mut method = "";
    let mut path = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            let mut parts = line.split_whitespace();
            method = parts.next().unwrap_or("");
            path = parts.next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(ranges) = value.strip_prefix("bytes=") {
                    if let Some((a, _)) = ranges.split_once('-') {
                        range = a.trim().parse::<u64>().ok();
                    }
                }
            }
        }
    }
    (method, path, range)
}
