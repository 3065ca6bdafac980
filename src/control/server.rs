//! HTTP control plane and HTTP-FLV playback
//!
//! A small hand-rolled HTTP/1.1 server; two routes are enough that a
//! full framework would be more code than this:
//!
//!   GET /api/streams        live stream list as JSON
//!   GET /{app}/{name}.flv   the stream remuxed to FLV, chunked
//!
//! Responses carry `Access-Control-Allow-Origin: *` so browser players
//! on another origin can use both.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::error::{Error, Result};
use crate::media::flv;
use crate::registry::{StreamEvent, StreamKey, StreamRegistry};
use crate::server::config::ServerConfig;

/// Cap on the request head; anything longer is rejected
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// HTTP server exposing the stream list and FLV playback
pub struct ControlServer {
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
}

impl ControlServer {
    pub fn new(config: ServerConfig, registry: Arc<StreamRegistry>) -> Self {
        Self { config, registry }
    }

    /// Accept loop; blocks until shut down
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.http_addr).await?;
        tracing::info!(addr = %self.config.http_addr, "HTTP server listening");

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, registry).await {
                            tracing::debug!(peer = %peer_addr, error = %e, "HTTP client error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept HTTP connection");
                }
            }
        }
    }

    /// Accept loop with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => Ok(()),
            result = self.run() => result,
        }
    }
}

/// Serve one HTTP connection. One request per connection; every
/// response closes it.
pub(crate) async fn handle_client<S>(mut socket: S, registry: Arc<StreamRegistry>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = read_request_head(&mut socket).await?;
    let Some((method, path)) = parse_request_line(&request) else {
        write_error(&mut socket, 400, "bad request").await?;
        return Ok(());
    };

    match (method.as_str(), path.as_str()) {
        ("OPTIONS", _) => write_cors_preflight(&mut socket).await,
        ("GET", "/api/streams") => {
            let streams = registry.snapshot().await;
            let body = serde_json::to_vec(&streams).map_err(|e| {
                Error::InvalidRequest(format!("stream list serialization: {}", e))
            })?;
            write_response(&mut socket, 200, "application/json", &body).await
        }
        ("GET", _) => match parse_flv_path(&path) {
            Some((app, name)) => {
                serve_flv(&mut socket, registry, StreamKey::new(app, name)).await
            }
            None => {
                write_error(&mut socket, 404, "not found").await?;
                Ok(())
            }
        },
        _ => {
            write_error(&mut socket, 405, "method not allowed").await?;
            Ok(())
        }
    }
}

/// Read up to the end of the request headers
async fn read_request_head<S>(socket: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(Error::InvalidRequest("request head too large".into()));
        }
    }
    String::from_utf8(buf).map_err(|_| Error::InvalidRequest("non-utf8 request".into()))
}

/// Extract method and path from the request line
pub(crate) fn parse_request_line(request: &str) -> Option<(String, String)> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    // Strip any query string
    let path = path.split('?').next().unwrap_or("").to_string();
    if path.starts_with('/') {
        Some((method, path))
    } else {
        None
    }
}

/// `/{app}/{name}.flv` → (app, name)
pub(crate) fn parse_flv_path(path: &str) -> Option<(String, String)> {
    let mut segments = path.trim_start_matches('/').splitn(2, '/');
    let app = segments.next()?;
    let file = segments.next()?;
    let name = file.strip_suffix(".flv")?;
    if app.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((app.to_string(), name.to_string()))
}

/// Stream a live stream as HTTP-FLV until it ends or the client leaves
async fn serve_flv<S>(socket: &mut S, registry: Arc<StreamRegistry>, key: StreamKey) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut subscription, catchup) = match registry.subscribe(&key).await {
        Ok(pair) => pair,
        Err(_) => {
            write_error(socket, 404, "stream not found").await?;
            return Ok(());
        }
    };
    tracing::info!(stream = %key, subscriber = subscription.id, "HTTP-FLV viewer joined");

    let head = "HTTP/1.1 200 OK\r\n\
                Content-Type: video/x-flv\r\n\
                Transfer-Encoding: chunked\r\n\
                Access-Control-Allow-Origin: *\r\n\
                Cache-Control: no-cache\r\n\
                Connection: close\r\n\r\n";
    socket.write_all(head.as_bytes()).await?;

    let result = stream_flv_body(socket, &mut subscription, &catchup).await;

    // Detach cleanly unless the stream already ended
    registry.unsubscribe(&key, subscription.id).await;
    tracing::info!(stream = %key, subscriber = subscription.id, "HTTP-FLV viewer left");
    result
}

async fn stream_flv_body<S>(
    socket: &mut S,
    subscription: &mut crate::registry::Subscription,
    catchup: &[crate::media::MediaFrame],
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_chunk(socket, &flv::file_header(true, true)).await?;
    for frame in catchup {
        write_chunk(socket, &flv::encode_tag(frame)).await?;
    }

    loop {
        match subscription.receiver.recv().await {
            Some(StreamEvent::Frame(frame)) => {
                write_chunk(socket, &flv::encode_tag(&frame)).await?;
            }
            Some(StreamEvent::PublisherEnded) => {
                write_final_chunk(socket).await?;
                return Ok(());
            }
            // Dropped for backpressure; nothing more will arrive
            None => return Err(Error::Backpressure),
        }
    }
}

async fn write_chunk<S>(socket: &mut S, data: &Bytes) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    socket
        .write_all(format!("{:x}\r\n", data.len()).as_bytes())
        .await?;
    socket.write_all(data).await?;
    socket.write_all(b"\r\n").await?;
    Ok(())
}

async fn write_final_chunk<S>(socket: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    socket.write_all(b"0\r\n\r\n").await?;
    Ok(())
}

async fn write_response<S>(
    socket: &mut S,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Error",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\r\n",
        status,
        reason,
        content_type,
        body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(body).await?;
    Ok(())
}

async fn write_error<S>(socket: &mut S, status: u16, message: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let body = serde_json::json!({ "error": message }).to_string();
    write_response(socket, status, "application/json", body.as_bytes()).await
}

async fn write_cors_preflight<S>(socket: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let head = "HTTP/1.1 204 No Content\r\n\
                Access-Control-Allow-Origin: *\r\n\
                Access-Control-Allow-Methods: GET, OPTIONS\r\n\
                Access-Control-Allow-Headers: *\r\n\
                Connection: close\r\n\r\n";
    socket.write_all(head.as_bytes()).await?;
    Ok(())
}
