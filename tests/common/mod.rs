//! Shared fixtures: an origin server with `Range` support, a fake
//! classifier and a fake media decoder.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use ocaz::error::ResolveError;
use ocaz::probe::{MediaDecoder, MediaInfo};

pub const CLASSIFIER_NAME: &str = "fake-nsfw";
pub const CLASSIFIER_VERSION: &str = "1.0.0";

#[derive(Clone)]
struct Served {
    body: Vec<u8>,
    content_type: String,
    honor_range: bool,
}

#[derive(Default)]
struct OriginState {
    files: RwLock<HashMap<String, Served>>,
    classify_calls: AtomicUsize,
}

/// HTTP origin on `127.0.0.1:0` serving in-memory files under `/files/`.
pub struct Origin {
    pub base: String,
    state: Arc<OriginState>,
}

impl Origin {
    pub async fn start() -> Origin {
        let state = Arc::new(OriginState::default());
        let app = Router::new()
            .route("/files/{name}", get(serve_file))
            .route("/classify", post(classify))
            .route("/about", get(about))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Origin {
            base: format!("http://{}", addr),
            state,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/files/{}", self.base, name)
    }

    /// Serves `body` at `/files/{name}`, answering range requests with 206.
    pub fn serve(&self, name: &str, body: Vec<u8>, content_type: &str) -> String {
        self.insert(name, body, content_type, true)
    }

    /// Serves `body` with 200 regardless of any `Range` header.
    pub fn serve_ignoring_range(&self, name: &str, body: Vec<u8>, content_type: &str) -> String {
        self.insert(name, body, content_type, false)
    }

    pub fn remove(&self, name: &str) {
        self.state.files.write().unwrap().remove(name);
    }

    pub fn classify_calls(&self) -> usize {
        self.state.classify_calls.load(Ordering::SeqCst)
    }

    fn insert(&self, name: &str, body: Vec<u8>, content_type: &str, honor_range: bool) -> String {
        self.state.files.write().unwrap().insert(
            name.to_string(),
            Served {
                body,
                content_type: content_type.to_string(),
                honor_range,
            },
        );
        self.url(name)
    }
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn serve_file(
    State(state): State<Arc<OriginState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(served) = state.files.read().unwrap().get(&name).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);

    match range {
        Some((start, end)) if served.honor_range => {
            let len = served.body.len() as u64;
            if start >= len {
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", len))],
                )
                    .into_response();
            }
            let end = end.min(len - 1);
            let slice = served.body[start as usize..=end as usize].to_vec();
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, served.content_type),
                    (header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, len)),
                ],
                slice,
            )
                .into_response()
        }
        _ => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, served.content_type)],
            served.body,
        )
            .into_response(),
    }
}

async fn classify(State(state): State<Arc<OriginState>>, headers: HeaderMap) -> Response {
    let multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);
    if !multipart {
        return StatusCode::BAD_REQUEST.into_response();
    }
    state.classify_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "service": {"name": CLASSIFIER_NAME, "version": CLASSIFIER_VERSION},
        "labels": {"nsfw": 0.125, "sfw": 0.875}
    }))
    .into_response()
}

async fn about() -> Json<serde_json::Value> {
    Json(json!({"service": {"name": CLASSIFIER_NAME, "version": CLASSIFIER_VERSION}}))
}

/// Raw HTTP/1.1 origin that answers every request with `body`, writing
/// `piece` bytes after each `delay`. Returns the URL to request.
pub async fn trickle(body: Vec<u8>, piece: usize, delay: Duration) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = Arc::new(body);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for part in body.chunks(piece) {
                    tokio::time::sleep(delay).await;
                    if socket.write_all(part).await.is_err() {
                        return;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}/slow.mp4", addr)
}

/// Media decoder answering from a fixed table keyed by URL.
#[derive(Default)]
pub struct FakeDecoder {
    media: HashMap<String, MediaInfo>,
}

impl FakeDecoder {
    pub fn with(mut self, url: &str, info: MediaInfo) -> Self {
        self.media.insert(url.to_string(), info);
        self
    }
}

#[async_trait]
impl MediaDecoder for FakeDecoder {
    async fn probe(&self, url: &str) -> Result<MediaInfo, ResolveError> {
        self.media
            .get(url)
            .copied()
            .ok_or_else(|| ResolveError::decoder(url, "cannot open media"))
    }
}

/// JPEG signature followed by `len - 3` filler bytes.
pub fn jpeg_bytes(len: usize, fill: u8) -> Vec<u8> {
    let mut body = vec![0xFF, 0xD8, 0xFF];
    body.resize(len.max(3), fill);
    body
}

/// MP4 `ftyp` box followed by filler up to `len` bytes.
pub fn mp4_bytes(len: usize, fill: u8) -> Vec<u8> {
    let mut body = b"\0\0\0\x18ftypisom\0\0\x02\0isomiso2avc1mp41".to_vec();
    body.resize(len.max(body.len()), fill);
    body
}

/// A decodable PNG with a diagonal gradient.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| {
        let v = ((x + y) * 255 / (width + height)) as u8;
        image::Rgb([v, v / 2, 255 - v])
    });
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
