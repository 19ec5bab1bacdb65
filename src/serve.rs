//! Reference echo, payload source and payload sink services.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, head, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

/// Size of one chunk streamed by the payload source.
pub const SOURCE_CHUNK_SIZE: usize = 256 * 1024;
/// Chunks per download response (about 10 MiB).
pub const SOURCE_CHUNKS: usize = 40;
const SOURCE_CHUNK_GAP: Duration = Duration::from_millis(5);

const NO_STORE: &str = "no-store, no-cache, must-revalidate";

pub fn router() -> Router {
    Router::new()
        .route("/api/test/head", head(echo))
        .route("/api/test/download", get(source))
        .route("/api/test/upload", post(sink))
}

/// Binds `addr` and serves until Ctrl+C.
pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "serving speed test endpoints");
    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("server failed: {e}"))
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("received Ctrl+C, shutting down");
}

fn no_store(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
}

async fn echo() -> Response {
    let mut response = StatusCode::OK.into_response();
    no_store(&mut response);
    response
}

async fn source() -> Response {
    let chunk = Bytes::from(vec![0u8; SOURCE_CHUNK_SIZE]);
    // When the client goes away the body is dropped and production stops.
    let chunks = stream::iter(0..SOURCE_CHUNKS).then(move |i| {
        let chunk = chunk.clone();
        async move {
            if i > 0 {
                tokio::time::sleep(SOURCE_CHUNK_GAP).await;
            }
            Ok::<Bytes, Infallible>(chunk)
        }
    });

    let mut response = Body::from_stream(chunks).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"speed-test.bin\""),
    );
    no_store(&mut response);
    response
}

async fn sink(body: Body) -> Response {
    let mut data = body.into_data_stream();
    let mut received = 0usize;
    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(chunk) => received += chunk.len(),
            Err(e) => {
                debug!(error = %e, received, "upload body failed");
                let mut response = (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "status": "error" })),
                )
                    .into_response();
                no_store(&mut response);
                return response;
            }
        }
    }
    debug!(received, "upload drained");
    let mut response = Json(json!({ "status": "ok" })).into_response();
    no_store(&mut response);
    response
}
