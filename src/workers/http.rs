//! MJPEG over HTTP
//!
//! `GET <path>` streams `multipart/x-mixed-replace` parts until the viewer
//! disconnects or the server closes; `GET /snapshot.jpg` returns the latest
//! cached frame.

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::{BufMut, Bytes, BytesMut};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assets::SNAPSHOT_PATH;
use crate::config::{StreamConfig, check_stream_path};
use crate::workers::streamer::BroadcastServer;

pub const BOUNDARY: &str = "frame";

/// One multipart part carrying a JPEG
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

async fn stream_handler(State(server): State<Arc<BroadcastServer>>) -> Response {
    let mut subscription = server.subscribe();
    let body = async_stream::stream! {
        while let Some(jpeg) = subscription.next().await {
            yield Ok::<Bytes, std::io::Error>(multipart_part(&jpeg));
        }
    };

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

async fn snapshot_handler(State(server): State<Arc<BroadcastServer>>) -> Response {
    match server.latest() {
        Some(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Routes for the stream and the snapshot. `path` must have passed
/// [`check_stream_path`].
pub fn router(server: Arc<BroadcastServer>, path: &str) -> Router {
    Router::new()
        .route(path, get(stream_handler))
        .route(SNAPSHOT_PATH, get(snapshot_handler))
        .with_state(server)
}

/// Bind the stream endpoint and serve it until `cancel` fires.
///
/// Cancelling closes the broadcast server so open streams end and the
/// graceful shutdown can complete.
pub async fn spawn_stream_server(
    server: Arc<BroadcastServer>,
    config: &StreamConfig,
    cancel: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    check_stream_path(&config.path)?;

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    let addr = listener.local_addr()?;
    info!("Streaming MJPEG on http://{addr}{}", config.path);

    let app = router(Arc::clone(&server), &config.path);
    let handle = tokio::spawn(async move {
        let shutdown = async move {
            cancel.cancelled().await;
            server.close();
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Stream server error: {e}");
        }
        info!("Stream server stopped");
    });

    Ok((addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Frame;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn local_config() -> StreamConfig {
        StreamConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }
    }

    async fn get_request(addr: SocketAddr, path: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        stream
    }

    /// Read until `needle` has been seen `count` times in total
    async fn read_until(stream: &mut TcpStream, received: &mut Vec<u8>, needle: &[u8], count: usize) {
        let mut chunk = [0u8; 4096];
        while received.windows(needle.len()).filter(|w| *w == needle).count() < count {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed early");
            received.extend_from_slice(&chunk[..n]);
        }
    }

    #[test]
    fn test_multipart_part_layout() {
        let part = multipart_part(b"abc");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n"
        );
    }

    #[tokio::test]
    async fn test_stream_delivers_latest_then_new_frames() {
        let server = Arc::new(BroadcastServer::with_interval(Duration::ZERO));
        let cancel = CancellationToken::new();

        let mut frame = Frame::new(8, 8, 3);
        assert!(server.broadcast(&frame, 80));

        let (addr, handle) = spawn_stream_server(server.clone(), &local_config(), cancel.clone())
            .await
            .unwrap();

        let mut client = get_request(addr, "/stream").await;
        let mut received = Vec::new();
        tokio::time::timeout(
            Duration::from_secs(5),
            read_until(&mut client, &mut received, b"--frame\r\n", 1),
        )
        .await
        .unwrap();
        let text = String::from_utf8_lossy(&received).to_string();
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));

        // wait until the stream has registered before broadcasting again
        while server.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        frame.fill(200);
        assert!(server.broadcast(&frame, 80));
        tokio::time::timeout(
            Duration::from_secs(5),
            read_until(&mut client, &mut received, b"--frame\r\n", 2),
        )
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_without_frame_is_no_content() {
        let server = Arc::new(BroadcastServer::new());
        let cancel = CancellationToken::new();
        let (addr, handle) = spawn_stream_server(server, &local_config(), cancel.clone())
            .await
            .unwrap();

        let mut client = get_request(addr, SNAPSHOT_PATH).await;
        let mut received = Vec::new();
        read_until(&mut client, &mut received, b"\r\n", 1).await;
        assert!(String::from_utf8_lossy(&received).starts_with("HTTP/1.1 204"));

        drop(client);
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unroutable_path_is_refused() {
        let cancel = CancellationToken::new();
        for path in [SNAPSHOT_PATH, "/live{cam", "/cam/:id"] {
            let config = StreamConfig {
                path: path.to_string(),
                ..local_config()
            };
            let result =
                spawn_stream_server(Arc::new(BroadcastServer::new()), &config, cancel.clone())
                    .await;
            let err = result.err().expect("path should be refused");
            assert!(err.to_string().contains("invalid stream path"), "{err}");
        }
    }
}
