//! The secondary HTTP cache surface: `GET`/`PUT` on
//! `/[<instance>/]{ac|cas}/<hash>`, gzip-encoded bodies, plus `/metrics`.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use prometheus::{Encoder, TextEncoder};
use re_cache::{with_isolation, Cache, IsolationKind};
use std::io::{Read, Write};
use std::sync::Arc;

#[derive(Clone)]
pub struct HttpState {
    pub ac: Arc<dyn Cache>,
    pub cas: Arc<dyn Cache>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/*path", get(get_blob).put(put_blob))
        .with_state(state)
}

fn split_path(path: &str) -> Option<(String, IsolationKind, String)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    let hash = segments.last()?.to_string();
    let bucket = segments[segments.len() - 2];
    let kind = match bucket {
        "ac" => IsolationKind::Ac,
        "cas" => IsolationKind::Cas,
        _ => return None,
    };
    let instance = segments[..segments.len() - 2].join("/");
    Some((instance, kind, hash))
}

fn cache_for(state: &HttpState, kind: IsolationKind) -> Arc<dyn Cache> {
    match kind {
        IsolationKind::Ac => state.ac.clone(),
        IsolationKind::Cas => state.cas.clone(),
    }
}

async fn get_blob(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    let Some((instance, kind, hash)) = split_path(&path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let cache = with_isolation(cache_for(&state, kind), kind, &instance);
    match cache.get(&hash).await {
        Ok(Some(data)) => match gzip_encode(&data) {
            Ok(body) => (
                StatusCode::OK,
                [("content-encoding", "gzip")],
                Bytes::from(body),
            )
                .into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            let status: tonic::Status = e.into();
            (http_status_for(&status), status.message().to_string()).into_response()
        }
    }
}

async fn put_blob(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    let Some((instance, kind, hash)) = split_path(&path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let data = match gzip_decode(&body) {
        Ok(d) => d,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let cache = with_isolation(cache_for(&state, kind), kind, &instance);
    match cache.set(&hash, data).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            let status: tonic::Status = e.into();
            (http_status_for(&status), status.message().to_string()).into_response()
        }
    }
}

fn http_status_for(status: &tonic::Status) -> StatusCode {
    match status.code() {
        tonic::Code::NotFound => StatusCode::NOT_FOUND,
        tonic::Code::InvalidArgument | tonic::Code::OutOfRange => StatusCode::BAD_REQUEST,
        tonic::Code::ResourceExhausted => StatusCode::INSUFFICIENT_STORAGE,
        tonic::Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn gzip_encode(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gzip_decode(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

async fn metrics() -> Response {
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&metric_families, &mut buf).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (StatusCode::OK, buf).into_response()
}
