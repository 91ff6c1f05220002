//! Outbound HTTP helpers shared by the embedding and chat clients

use crate::errors::{AppError, Result};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

/// Build a reqwest client with the given request timeout
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// A failed upstream call, tagged with whether trying again could help
#[derive(Debug)]
pub struct RequestError {
    pub error: AppError,
    pub transient: bool,
}

impl RequestError {
    pub fn transient(error: AppError) -> Self {
        Self { error, transient: true }
    }

    pub fn permanent(error: AppError) -> Self {
        Self { error, transient: false }
    }
}

/// Anything not explicitly marked transient is final
impl From<AppError> for RequestError {
    fn from(error: AppError) -> Self {
        Self::permanent(error)
    }
}

pub type RequestResult<T> = std::result::Result<T, RequestError>;

/// Rate limiting and server-side failures may clear up on their own
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Connection failures and timeouts are worth another attempt; a request
/// that could not even be built is not
pub fn is_transient_send_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || (error.is_request() && !error.is_builder())
}

/// Run `op` until it succeeds, fails permanently, or `max_retries` extra
/// attempts are spent.
///
/// Delays grow exponentially from 100ms.
pub async fn with_retry<T, F, Fut>(max_retries: u32, service: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RequestResult<T>>,
{
    let attempts = max_retries + 1;
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = Duration::from_millis(100 * 2_u64.pow(attempt.min(10)));
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(RequestError { error, transient: false }) => {
                tracing::debug!(service, error = %error, "Request failed, not retrying");
                return Err(error);
            }
            Err(RequestError { error, transient: true }) => {
                tracing::warn!(
                    service,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %error,
                    "Request failed, retrying"
                );
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| AppError::Internal {
        message: format!("{} request failed without an error", service),
    }))
}

/// Join a base URL and a path without doubling slashes
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Minimal HTTP/1.1 server answering every request from a script
#[cfg(test)]
pub(crate) mod stub {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    pub struct StubServer {
        pub url: String,
        hits: Arc<AtomicUsize>,
        bodies: Arc<Mutex<Vec<String>>>,
    }

    impl StubServer {
        /// Serve `(status, body)` pairs in order, repeating the last one
        pub async fn start(script: Vec<(u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let hits = Arc::new(AtomicUsize::new(0));
            let bodies = Arc::new(Mutex::new(Vec::new()));

            let (task_hits, task_bodies) = (hits.clone(), bodies.clone());
            tokio::spawn(async move {
                loop {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    let n = task_hits.fetch_add(1, Ordering::SeqCst);
                    let (status, body) = script[n.min(script.len() - 1)].clone();

                    let request = read_request_body(&mut socket).await;
                    task_bodies.lock().unwrap().push(request);

                    let response = format!(
                        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });

            Self { url, hits, bodies }
        }

        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        pub fn bodies(&self) -> Vec<String> {
            self.bodies.lock().unwrap().clone()
        }
    }

    async fn read_request_body(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return String::new();
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);

            let body_start = end + 4;
            if buf.len() >= body_start + length {
                return String::from_utf8_lossy(&buf[body_start..body_start + length]).to_string();
            }
        }
    }
}
