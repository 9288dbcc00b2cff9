//! HTTP chunk transport.
//!
//! Sends each chunk as its own request to a single endpoint, either as a
//! raw-body `PUT` with the chunk coordinates in `X-*` headers, or as a
//! `multipart/form-data` `POST` with the coordinates as form fields.

use std::time::Duration;

use chunkline_protocol::constants::{
    FIELD_CHUNK, FIELD_CHUNK_INDEX, FIELD_CHUNK_LENGTH, FIELD_CHUNK_OFFSET, FIELD_FILE_NAME,
    FIELD_TOTAL_CHUNKS, HEADER_CHUNK_INDEX, HEADER_CHUNK_LENGTH, HEADER_CHUNK_OFFSET,
    HEADER_FILE_NAME, HEADER_SESSION_ID, HEADER_TOTAL_CHUNKS, OCTET_STREAM,
};
use chunkline_transfer::{
    BoxFuture, ChunkDescriptor, ChunkTransport, SessionMetadata, TransportError,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Errors building the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// How a chunk is framed on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HttpMode {
    /// `PUT` with the raw chunk as body and coordinates in headers.
    #[default]
    HeaderPut,
    /// `POST` with a `multipart/form-data` body.
    Multipart,
}

/// [`ChunkTransport`] that uploads chunks to an HTTP endpoint.
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
    mode: HttpMode,
    request_timeout: Option<Duration>,
}

impl HttpTransport {
    /// Creates a transport with a fresh client.
    pub fn new(endpoint: impl Into<String>, mode: HttpMode) -> Result<Self, HttpError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(http, endpoint, mode))
    }

    /// Creates a transport sharing an existing client (and its pool).
    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>, mode: HttpMode) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            mode,
            request_timeout: None,
        }
    }

    /// Bounds each request; expiry is reported as [`TransportError::Timeout`].
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn mode(&self) -> HttpMode {
        self.mode
    }

    fn build_request(
        &self,
        data: Vec<u8>,
        chunk: &ChunkDescriptor,
        session: &SessionMetadata,
    ) -> Result<reqwest::Request, reqwest::Error> {
        let header = session.header_for(chunk);

        let builder = match self.mode {
            HttpMode::HeaderPut => self
                .http
                .put(&self.endpoint)
                .header(HEADER_CHUNK_INDEX, header.chunk_index.to_string())
                .header(HEADER_TOTAL_CHUNKS, header.total_chunks.to_string())
                .header(HEADER_CHUNK_OFFSET, header.offset.to_string())
                .header(HEADER_CHUNK_LENGTH, header.length.to_string())
                .header(
                    HEADER_FILE_NAME,
                    utf8_percent_encode(&header.file_name, NON_ALPHANUMERIC).to_string(),
                )
                .header(CONTENT_TYPE, OCTET_STREAM)
                .body(data),
            HttpMode::Multipart => {
                let part = Part::bytes(data)
                    .file_name(header.file_name.clone())
                    .mime_str(part_mime_type(&session.file.mime_type))?;
                let form = Form::new()
                    .part(FIELD_CHUNK, part)
                    .text(FIELD_CHUNK_INDEX, header.chunk_index.to_string())
                    .text(FIELD_TOTAL_CHUNKS, header.total_chunks.to_string())
                    .text(FIELD_CHUNK_OFFSET, header.offset.to_string())
                    .text(FIELD_CHUNK_LENGTH, header.length.to_string())
                    .text(FIELD_FILE_NAME, header.file_name);
                self.http.post(&self.endpoint).multipart(form)
            }
        };

        let builder = builder.header(HEADER_SESSION_ID, header.session_id);
        match self.request_timeout {
            Some(timeout) => builder.timeout(timeout).build(),
            None => builder.build(),
        }
    }
}

/// MIME type for the chunk part. A value reqwest cannot parse would fail
/// every attempt identically, so it is replaced with `OCTET_STREAM`.
fn part_mime_type(mime_type: &str) -> &str {
    if Part::text("").mime_str(mime_type).is_ok() {
        mime_type
    } else {
        warn!(mime = %mime_type, "unparsable MIME type, sending chunk as octet-stream");
        OCTET_STREAM
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::Other(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

impl ChunkTransport for HttpTransport {
    fn send<'a>(
        &'a self,
        data: Vec<u8>,
        chunk: &'a ChunkDescriptor,
        session: &'a SessionMetadata,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let request = self.build_request(data, chunk, session).map_err(map_error)?;
            let resp = self.http.execute(request).await.map_err(map_error)?;
            let status = resp.status();

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(TransportError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            debug!(
                session = %session.session_id,
                chunk = chunk.index,
                status = status.as_u16(),
                "chunk accepted"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chunkline_protocol::FileMetadata;
    use chunkline_transfer::{
        BackoffConfig, MemorySource, TransferConfig, TransferOutcome, TransferSession,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn session() -> SessionMetadata {
        SessionMetadata {
            session_id: "s-1".into(),
            file: FileMetadata::new("my file.bin", 10),
            total_chunks: 4,
            chunk_size: 4,
        }
    }

    fn chunk(index: u32) -> ChunkDescriptor {
        ChunkDescriptor {
            index,
            start_offset: u64::from(index) * 4,
            length: 4,
            attempt_count: 0,
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Reads one request (head plus `Content-Length` body).
    async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 8192];
        loop {
            let n = stream.read(&mut tmp).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(end) = find(&buf, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        buf
    }

    /// Starts a mock HTTP server answering every request with `status`.
    /// Returns the base URL and the raw requests it has seen.
    async fn mock_server(status: u16, body: &'static str) -> (String, Arc<Mutex<Vec<Vec<u8>>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/upload");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let request = read_request(&mut stream).await;
                    log.lock().unwrap().push(request);
                    let resp = format!(
                        "HTTP/1.1 {status} X\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(resp.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (url, seen)
    }

    #[test]
    fn header_put_request_carries_coordinates() {
        let transport = HttpTransport::new("http://localhost/upload", HttpMode::HeaderPut).unwrap();
        let req = transport
            .build_request(b"abcd".to_vec(), &chunk(2), &session())
            .unwrap();

        assert_eq!(req.method(), reqwest::Method::PUT);
        let headers = req.headers();
        assert_eq!(headers[HEADER_CHUNK_INDEX], "2");
        assert_eq!(headers[HEADER_TOTAL_CHUNKS], "4");
        assert_eq!(headers[HEADER_CHUNK_OFFSET], "8");
        assert_eq!(headers[HEADER_CHUNK_LENGTH], "4");
        assert_eq!(headers[HEADER_SESSION_ID], "s-1");
        assert_eq!(headers[HEADER_FILE_NAME], "my%20file%2Ebin");
        assert_eq!(headers[CONTENT_TYPE], OCTET_STREAM);
        assert_eq!(req.body().and_then(|b| b.as_bytes()), Some(&b"abcd"[..]));
    }

    #[test]
    fn multipart_request_is_form_post() {
        let transport = HttpTransport::new("http://localhost/upload", HttpMode::Multipart).unwrap();
        let req = transport
            .build_request(b"abcd".to_vec(), &chunk(0), &session())
            .unwrap();

        assert_eq!(req.method(), reqwest::Method::POST);
        let content_type = req.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
        assert_eq!(req.headers()[HEADER_SESSION_ID], "s-1");
        assert!(req.headers().get(HEADER_CHUNK_INDEX).is_none());
    }

    #[test]
    fn request_timeout_applied() {
        let transport = HttpTransport::new("http://localhost/upload", HttpMode::HeaderPut)
            .unwrap()
            .with_request_timeout(Duration::from_secs(7));
        let req = transport
            .build_request(Vec::new(), &chunk(0), &session())
            .unwrap();
        assert_eq!(req.timeout(), Some(&Duration::from_secs(7)));
    }

    #[test]
    fn mode_serde_names() {
        assert_eq!(
            serde_json::to_string(&HttpMode::HeaderPut).unwrap(),
            "\"headerPut\""
        );
        let mode: HttpMode = serde_json::from_str("\"multipart\"").unwrap();
        assert_eq!(mode, HttpMode::Multipart);
    }

    #[tokio::test]
    async fn accepted_chunk_is_ok() {
        let (url, seen) = mock_server(200, "ok").await;
        let transport = HttpTransport::new(url, HttpMode::HeaderPut).unwrap();

        transport
            .send(b"wxyz".to_vec(), &chunk(1), &session())
            .await
            .unwrap();

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let raw = String::from_utf8_lossy(&requests[0]).to_ascii_lowercase();
        assert!(raw.starts_with("put /upload"));
        assert!(raw.contains("x-chunk-index: 1"));
        assert!(raw.ends_with("wxyz"));
    }

    #[tokio::test]
    async fn multipart_body_has_fields() {
        let (url, seen) = mock_server(201, "").await;
        let transport = HttpTransport::new(url, HttpMode::Multipart).unwrap();

        transport
            .send(b"wxyz".to_vec(), &chunk(3), &session())
            .await
            .unwrap();

        let requests = seen.lock().unwrap();
        let raw = String::from_utf8_lossy(&requests[0]);
        assert!(raw.starts_with("POST /upload"));
        assert!(raw.contains("name=\"chunkIndex\""));
        assert!(raw.contains("name=\"totalChunks\""));
        assert!(raw.contains("name=\"chunkOffset\"\r\n\r\n12\r\n"));
        assert!(raw.contains("name=\"chunkLength\"\r\n\r\n4\r\n"));
        assert!(raw.contains("name=\"fileName\""));
        assert!(raw.contains("name=\"chunk\"; filename="));
        assert!(raw.contains("wxyz"));
    }

    #[test]
    fn malformed_mime_type_falls_back_to_octet_stream() {
        assert_eq!(part_mime_type("text/plain"), "text/plain");
        assert_eq!(part_mime_type("not a mime"), OCTET_STREAM);

        let transport = HttpTransport::new("http://localhost/upload", HttpMode::Multipart).unwrap();
        let mut meta = session();
        meta.file = meta.file.with_mime_type("not a mime");
        assert!(
            transport
                .build_request(b"abcd".to_vec(), &chunk(0), &meta)
                .is_ok()
        );
    }

    #[tokio::test]
    async fn malformed_mime_type_is_sent_as_octet_stream() {
        let (url, seen) = mock_server(200, "").await;
        let transport = HttpTransport::new(url, HttpMode::Multipart).unwrap();
        let mut meta = session();
        meta.file = meta.file.with_mime_type("not a mime");

        transport
            .send(b"wxyz".to_vec(), &chunk(0), &meta)
            .await
            .unwrap();

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let raw = String::from_utf8_lossy(&requests[0]).to_ascii_lowercase();
        assert!(raw.contains("content-type: application/octet-stream"));
        assert!(!raw.contains("not a mime"));
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let (url, _) = mock_server(500, "disk full").await;
        let transport = HttpTransport::new(url, HttpMode::HeaderPut).unwrap();

        let err = transport
            .send(b"abcd".to_vec(), &chunk(0), &session())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Rejected {
                status: 500,
                body: "disk full".into()
            }
        );
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport =
            HttpTransport::new(format!("http://127.0.0.1:{port}/upload"), HttpMode::HeaderPut)
                .unwrap();
        let err = transport
            .send(b"abcd".to_vec(), &chunk(0), &session())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        let transport =
            HttpTransport::new(format!("http://127.0.0.1:{port}/upload"), HttpMode::HeaderPut)
                .unwrap()
                .with_request_timeout(Duration::from_millis(100));
        let err = transport
            .send(b"abcd".to_vec(), &chunk(0), &session())
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[tokio::test]
    async fn session_uploads_over_http() {
        let (url, seen) = mock_server(200, "").await;
        let transport = Arc::new(HttpTransport::new(url, HttpMode::HeaderPut).unwrap());
        let source = Arc::new(MemorySource::new(b"0123456789".to_vec()));
        let config = TransferConfig {
            chunk_size_bytes: 4,
            max_parallel_workers: 2,
            backoff: BackoffConfig::none(),
            ..TransferConfig::default()
        };

        let session = TransferSession::new(
            source,
            transport,
            config,
            FileMetadata::new("digits.txt", 0),
        )
        .unwrap();
        let outcome = session.start().await.unwrap();

        assert_eq!(outcome, TransferOutcome::Success);
        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 3);
        let session_header = format!("x-session-id: {}", session.id());
        for raw in requests.iter() {
            let raw = String::from_utf8_lossy(raw).to_ascii_lowercase();
            assert!(raw.contains("x-total-chunks: 3"));
            assert!(raw.contains(&session_header));
        }
    }
}
