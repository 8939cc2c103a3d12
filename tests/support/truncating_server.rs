//! Minimal HTTP/1.1 server that drops the connection mid-body.
//!
//! Every response declares the full remaining length but sends at most
//! `max_bytes_per_response` body bytes before closing, so each attempt sees
//! an interrupted stream. Range GETs are answered with 206 from the offset.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// Handle to a running server. The listener thread lives until process exit.
#[derive(Debug, Clone)]
pub struct TruncatingServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Option<u64>>>>,
}

impl TruncatingServer {
    /// Range start of every request received, `None` for unranged ones.
    pub fn ranges_seen(&self) -> Vec<Option<u64>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Starts serving `body` with version tag `etag`.
pub fn start(body: Vec<u8>, etag: &str, max_bytes_per_response: usize) -> TruncatingServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let etag = etag.to_string();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let etag = etag.clone();
            let seen = Arc::clone(&seen);
            thread::spawn(move || handle(stream, &body, &etag, max_bytes_per_response, &seen));
        }
    });
    TruncatingServer {
        base_url: format!("http://127.0.0.1:{port}/download"),
        requests,
    }
}

fn handle(
    mut stream: TcpStream,
    body: &[u8],
    etag: &str,
    max_bytes: usize,
    seen: &Mutex<Vec<Option<u64>>>,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let Some(request) = read_head(&mut stream) else {
        return;
    };
    let start = parse_range_start(&request);
    seen.lock().unwrap().push(start);

    let total = body.len();
    let (status, slice) = match start {
        Some(start) if start as usize >= total => {
            let response = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(response.as_bytes());
            return;
        }
        Some(start) => ("206 Partial Content", &body[start as usize..]),
        None => ("200 OK", body),
    };
    let offset = total - slice.len();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Range: bytes {offset}-{}/{total}\r\nETag: \"{etag}\"\r\nConnection: close\r\n\r\n",
        slice.len(),
        total.saturating_sub(1),
    );
    let _ = stream.write_all(response.as_bytes());
    let cut = slice.len().min(max_bytes);
    let _ = stream.write_all(&slice[..cut]);
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Both);
}

fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8(head).ok()
}

fn parse_range_start(request: &str) -> Option<u64> {
    request.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("range") {
            return None;
        }
        value
            .trim()
            .strip_prefix("bytes=")?
            .strip_suffix('-')?
            .parse()
            .ok()
    })
}
