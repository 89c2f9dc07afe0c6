//! HTTP transport for the snapshot and control endpoints.
//!
//! Snapshots are fetched with `GET {base}/snapshot` and decoded from JSON;
//! commands are sent with `POST {base}/control/{command}`.

use crate::error::{SyncError, SyncResult};
use crate::transport::SnapshotTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use sessync_protocol::{SessionCommand, SessionSnapshot};
use tracing::{debug, warn};

/// `reqwest`-based [`SnapshotTransport`].
pub struct HttpSnapshotClient {
    /// Base URL of the provider (e.g., "http://127.0.0.1:8080/api").
    base_url: String,
    client: Client,
    last_error: RwLock<Option<String>>,
}

impl HttpSnapshotClient {
    /// Creates a client with a default `reqwest::Client`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Creates a client around an existing `reqwest::Client`.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn record<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        match result {
            Ok(value) => {
                *self.last_error.write() = None;
                Ok(value)
            }
            Err(e) => {
                warn!(base_url = %self.base_url, error = %e, "provider request failed");
                *self.last_error.write() = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn get_snapshot(&self) -> SyncResult<SessionSnapshot> {
        let response = self
            .client
            .get(self.url("/snapshot"))
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;
        let body = response.bytes().await.map_err(request_error)?;
        Ok(SessionSnapshot::from_json(&body)?)
    }

    async fn post_command(&self, command: SessionCommand) -> SyncResult<()> {
        let response = self
            .client
            .post(self.url(&command.path()))
            .send()
            .await
            .map_err(request_error)?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotTransport for HttpSnapshotClient {
    async fn fetch_snapshot(&self) -> SyncResult<SessionSnapshot> {
        let result = self.get_snapshot().await;
        self.record(result)
    }

    async fn send_command(&self, command: SessionCommand) -> SyncResult<()> {
        debug!(%command, "sending control command");
        let result = self.post_command(command).await;
        self.record(result)
    }
}

fn request_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else if e.is_builder() {
        SyncError::transport_fatal(e.to_string())
    } else {
        SyncError::transport_retryable(e.to_string())
    }
}

async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Maps a non-success status. Client errors other than 408/429 are not
/// worth retrying.
fn status_error(status: StatusCode, body: &str) -> SyncError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        SyncError::transport_fatal(message)
    } else {
        SyncError::ServerError(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the request line.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{addr}/"), handle)
    }

    #[test]
    fn base_url_is_normalized() {
        let client = HttpSnapshotClient::new("http://localhost:9000/api/");
        assert_eq!(client.base_url(), "http://localhost:9000/api");
        assert_eq!(client.url("/snapshot"), "http://localhost:9000/api/snapshot");
        assert_eq!(
            client.url(&SessionCommand::Complete.path()),
            "http://localhost:9000/api/control/complete"
        );
    }

    #[test]
    fn status_mapping() {
        assert!(!status_error(StatusCode::NOT_FOUND, "").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "upstream").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "upstream")
            .to_string()
            .contains("upstream"));
    }

    #[tokio::test]
    async fn fetches_snapshot() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"timestamp":12,"session":{"id":"s-9","status":"paused","startTime":5,"durationMs":60000}}"#,
        )
        .await;
        let client = HttpSnapshotClient::new(base);

        let snapshot = client.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.timestamp, 12);
        assert_eq!(snapshot.session.unwrap().duration_ms, 60_000);
        assert!(client.last_error().is_none());
        assert_eq!(server.await.unwrap(), "GET /snapshot HTTP/1.1");
    }

    #[tokio::test]
    async fn posts_command() {
        let (base, server) = serve_once("204 No Content", "").await;
        let client = HttpSnapshotClient::new(base);

        client.send_command(SessionCommand::Pause).await.unwrap();
        assert_eq!(server.await.unwrap(), "POST /control/pause HTTP/1.1");
    }

    #[tokio::test]
    async fn server_error_is_recorded() {
        let (base, server) = serve_once("503 Service Unavailable", "busy").await;
        let client = HttpSnapshotClient::new(base);

        let err = client.fetch_snapshot().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(client.last_error().unwrap().contains("busy"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_body_is_protocol_error() {
        let (base, server) = serve_once("200 OK", r#"{"timestamp":"soon"}"#).await;
        let client = HttpSnapshotClient::new(base);

        let err = client.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(!err.is_retryable());
        server.await.unwrap();
    }
}
