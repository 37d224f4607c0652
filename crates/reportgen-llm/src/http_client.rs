//! Shared HTTP client infrastructure for HTTP-based providers
//!
//! A single `reqwest::Client` is configured once per backend with timeout and
//! retry policies for reliable communication with providers.

use reportgen_utils::error::LlmError;
use reportgen_utils::logging::redact_error_message;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default maximum HTTP timeout (5 minutes)
const DEFAULT_MAX_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Default connect timeout (30 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retry attempts for 5xx and network failures
const MAX_RETRIES: u32 = 2;

/// Initial backoff duration for retries
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default sampling parameters shared by the HTTP backends
#[derive(Debug, Clone)]
pub(crate) struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

/// Shared HTTP client for providers
///
/// Provides connection reuse, per-request timeouts, bounded retry with linear
/// backoff, and TLS via rustls.
#[derive(Clone)]
pub(crate) struct HttpClient {
    client: Arc<Client>,
    max_timeout: Duration,
    backoff: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self, LlmError> {
        Self::with_max_timeout(DEFAULT_MAX_HTTP_TIMEOUT)
    }

    pub fn with_max_timeout(max_timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .use_rustls_tls()
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            max_timeout,
            backoff: INITIAL_BACKOFF,
        })
    }

    #[cfg(test)]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Start a POST request on the shared client
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// Execute an HTTP request with timeout and retry policy
    ///
    /// - Per-request timeout: `min(request_timeout, max_timeout)`
    /// - Up to 2 retries for 5xx and network failures, backing off 1s then 2s
    /// - No retries for 4xx errors
    ///
    /// # Errors
    ///
    /// - `LlmError::ProviderAuth` for 401/403
    /// - `LlmError::ProviderQuota` for 429
    /// - `LlmError::ProviderUnavailable` for 5xx after retries
    /// - `LlmError::Timeout` for timeouts
    /// - `LlmError::Transport` for network errors after retries
    pub async fn execute_with_retry(
        &self,
        request_builder: RequestBuilder,
        request_timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, LlmError> {
        let effective_timeout = request_timeout.min(self.max_timeout);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let request = request_builder
                .try_clone()
                .ok_or_else(|| LlmError::Transport("Failed to clone request for retry".to_string()))?
                .timeout(effective_timeout)
                .build()
                .map_err(|e| LlmError::Transport(format!("Failed to build request: {e}")))?;

            debug!(
                provider = provider_name,
                attempt = attempt,
                timeout_secs = effective_timeout.as_secs(),
                "Executing HTTP request"
            );

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_client_error() {
                        return Err(map_client_error(status, provider_name));
                    }

                    if status.is_server_error() {
                        if attempt <= MAX_RETRIES {
                            warn!(
                                provider = provider_name,
                                attempt = attempt,
                                status = status.as_u16(),
                                "Server error, will retry"
                            );
                            tokio::time::sleep(self.backoff * attempt).await;
                            continue;
                        }
                        return Err(LlmError::ProviderUnavailable(format!(
                            "{provider_name} returned server error: {status}"
                        )));
                    }

                    return Ok(response);
                }
                Err(e) => {
                    if e.is_timeout() {
                        return Err(LlmError::Timeout {
                            duration: effective_timeout,
                        });
                    }

                    let message = redact_error_message(&e.to_string());
                    if attempt <= MAX_RETRIES {
                        warn!(
                            provider = provider_name,
                            attempt = attempt,
                            error = %message,
                            "Network error, will retry"
                        );
                        tokio::time::sleep(self.backoff * attempt).await;
                        continue;
                    }

                    return Err(LlmError::Transport(format!(
                        "{provider_name} request failed: {message}"
                    )));
                }
            }
        }
    }
}

/// Map HTTP client error status codes to `LlmError` variants
///
/// - 401/403 → `LlmError::ProviderAuth`
/// - 429 → `LlmError::ProviderQuota`
/// - Other 4xx → `LlmError::Transport`
fn map_client_error(status: StatusCode, provider_name: &str) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::ProviderAuth(format!("{provider_name} authentication failed: {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            LlmError::ProviderQuota(format!("{provider_name} rate limit exceeded: {status}"))
        }
        _ => LlmError::Transport(format!("{provider_name} returned client error: {status}")),
    }
}

/// Minimal HTTP responder for exercising backends against canned responses.
#[cfg(test)]
pub(crate) mod test_server {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Captured request (headers and body as text)
    #[derive(Debug, Clone)]
    pub struct Captured {
        pub head: String,
        pub body: String,
    }

    pub struct TestServer {
        pub url: String,
        pub hits: Arc<AtomicUsize>,
        pub requests: Arc<tokio::sync::Mutex<Vec<Captured>>>,
    }

    /// Serve the given `(status, body)` responses in order; the last one repeats.
    pub async fn serve(responses: Vec<(u16, String)>) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let hits_task = Arc::clone(&hits);
        let requests_task = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = hits_task.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses
                    .get(n)
                    .or_else(|| responses.last())
                    .cloned()
                    .unwrap_or((500, String::new()));

                let captured = read_request(&mut socket).await;
                requests_task.lock().await.push(captured);

                let reply = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        TestServer {
            url: format!("http://{addr}/v1"),
            hits,
            requests,
        }
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> Captured {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(split) = text.find("\r\n\r\n") {
                let head = text[..split].to_string();
                let length = head
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .and_then(|v| v.trim().parse::<usize>().ok())
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    let body = String::from_utf8_lossy(&buf[split + 4..split + 4 + length]).to_string();
                    return Captured { head, body };
                }
            }
        }
        Captured {
            head: String::from_utf8_lossy(&buf).to_string(),
            body: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::serve;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_http_client_with_custom_timeout() {
        let client = HttpClient::with_max_timeout(Duration::from_secs(60)).unwrap();
        assert_eq!(client.max_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_map_client_errors() {
        assert!(matches!(
            map_client_error(StatusCode::UNAUTHORIZED, "p"),
            LlmError::ProviderAuth(msg) if msg.contains("401")
        ));
        assert!(matches!(
            map_client_error(StatusCode::FORBIDDEN, "p"),
            LlmError::ProviderAuth(_)
        ));
        assert!(matches!(
            map_client_error(StatusCode::TOO_MANY_REQUESTS, "p"),
            LlmError::ProviderQuota(msg) if msg.contains("rate limit")
        ));
        assert!(matches!(
            map_client_error(StatusCode::UNPROCESSABLE_ENTITY, "p"),
            LlmError::Transport(msg) if msg.contains("422")
        ));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = serve(vec![(429, "{}".to_string())]).await;
        let client = HttpClient::new().unwrap();

        let err = client
            .execute_with_retry(client.post(&server.url), Duration::from_secs(5), "test")
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::ProviderQuota(_)));
        assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_retry_then_succeed() {
        let server = serve(vec![
            (503, "{}".to_string()),
            (200, r#"{"ok":true}"#.to_string()),
        ])
        .await;
        let client = HttpClient::new()
            .unwrap()
            .with_backoff(Duration::from_millis(5));

        let response = client
            .execute_with_retry(client.post(&server.url), Duration::from_secs(5), "test")
            .await
            .unwrap();

        assert!(response.status().is_success());
        assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_server_errors_become_unavailable() {
        let server = serve(vec![(500, "{}".to_string())]).await;
        let client = HttpClient::new()
            .unwrap()
            .with_backoff(Duration::from_millis(5));

        let err = client
            .execute_with_retry(client.post(&server.url), Duration::from_secs(5), "test")
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::ProviderUnavailable(_)));
        assert_eq!(server.hits.load(Ordering::SeqCst), 3);
    }
}
