//! Wiremock responder that honors `Range: bytes=N-` against a fixed body.

use std::sync::{Arc, Mutex};

use wiremock::{Request, Respond, ResponseTemplate};

/// Serves `body` as 200, or as 206 from the requested offset.
#[derive(Debug, Clone)]
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    etag: String,
    ranges_seen: Arc<Mutex<Vec<Option<u64>>>>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>, etag: &str) -> Self {
        Self {
            body: Arc::new(body),
            etag: etag.to_string(),
            ranges_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Range start of every request served, `None` for unranged ones.
    pub fn ranges_seen(&self) -> Vec<Option<u64>> {
        self.ranges_seen.lock().unwrap().clone()
    }
}

fn range_start(request: &Request) -> Option<u64> {
    let value = request.headers.get("range")?.to_str().ok()?;
    value
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let start = range_start(request);
        self.ranges_seen.lock().unwrap().push(start);
        let total = self.body.len() as u64;
        let etag = format!("\"{}\"", self.etag);

        match start {
            Some(start) if start >= total => ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{total}").as_str()),
            Some(start) => ResponseTemplate::new(206)
                .insert_header("ETag", etag.as_str())
                .insert_header(
                    "Content-Range",
                    format!("bytes {start}-{}/{total}", total - 1).as_str(),
                )
                .set_body_bytes(self.body[start as usize..].to_vec()),
            None => ResponseTemplate::new(200)
                .insert_header("ETag", etag.as_str())
                .set_body_bytes(self.body.to_vec()),
        }
    }
}
