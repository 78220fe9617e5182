use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::config::Settings;
use crate::limiter::HostLimiter;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },
    #[error("{url} has no host")]
    NoHost { url: String },
}

impl FetchError {
    /// Rate limiting and server errors are worth another try within the run.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Timeout { .. } | FetchError::Network { .. } => false,
            FetchError::NoHost { .. } => false,
        }
    }
}

/// Outbound HTTP seam. Implementations must honour the host limiter.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// GET the page body. Non-2xx answers are errors.
    async fn get(&self, url: &Url) -> Result<String, FetchError>;

    /// Cheap existence probe; true only for a 2xx answer.
    async fn exists(&self, url: &Url) -> bool;
}

pub struct HttpFetcher {
    client: Client,
    limiter: Arc<HostLimiter>,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &Settings, limiter: Arc<HostLimiter>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_str(&settings.accept_language)?);

        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            limiter,
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff(),
        })
    }

    async fn get_once(&self, url: &Url) -> Result<String, FetchError> {
        self.throttle(url).await?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| map_reqwest(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|e| map_reqwest(url, e))
    }

    async fn probe(&self, url: &Url) -> Result<StatusCode, FetchError> {
        self.throttle(url).await?;
        let status = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| map_reqwest(url, e))?
            .status();
        // Some servers refuse HEAD outright; ask again with GET.
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            self.throttle(url).await?;
            let status = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| map_reqwest(url, e))?
                .status();
            return Ok(status);
        }
        Ok(status)
    }

    async fn throttle(&self, url: &Url) -> Result<(), FetchError> {
        let host = url.host_str().ok_or_else(|| FetchError::NoHost {
            url: url.to_string(),
        })?;
        self.limiter.acquire(host).await;
        Ok(())
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &Url) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.get_once(url).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = backoff_delay(self.backoff, attempt);
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn exists(&self, url: &Url) -> bool {
        match self.probe(url).await {
            Ok(status) => {
                debug!("probe {} -> {}", url, status);
                status.is_success()
            }
            Err(e) => {
                debug!("probe {} failed: {}", url, e);
                false
            }
        }
    }
}

/// `base * 2^attempt`, saturating.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

fn map_reqwest(url: &Url, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if let Some(status) = e.status() {
        FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Local server answering one canned response per connection, in order.
    /// Returns the page URL and the request lines it received.
    async fn canned(responses: Vec<(u16, &'static str)>) -> (Url, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("http://{}/cenik", addr)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request: Vec<u8> = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }
                let line = String::from_utf8_lossy(&request)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                log.lock().unwrap().push(line);

                let reply = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: text/html\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (url, seen)
    }

    fn fetcher(max_retries: u32) -> HttpFetcher {
        let settings = Settings {
            request_delay_ms: 0,
            retry_backoff_ms: 10,
            max_retries,
            ..Settings::default()
        };
        HttpFetcher::new(&settings, Arc::new(HostLimiter::new(Duration::ZERO))).unwrap()
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let (url, seen) = canned(vec![(503, ""), (503, ""), (200, "<p>ceník</p>")]).await;
        let body = fetcher(2).get(&url).await.unwrap();
        assert_eq!(body, "<p>ceník</p>");
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn retries_run_out() {
        let (url, seen) = canned(vec![(429, ""), (503, ""), (200, "late")]).await;
        let err = fetcher(1).get(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let (url, seen) = canned(vec![(404, ""), (200, "late")]).await;
        let err = fetcher(2).get(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn head_refused_falls_back_to_get() {
        let (url, seen) = canned(vec![(405, ""), (200, "<p>ok</p>")]).await;
        assert!(fetcher(0).exists(&url).await);
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("HEAD /cenik"));
        assert!(seen[1].starts_with("GET /cenik"));
    }

    #[tokio::test]
    async fn head_not_found_is_missing() {
        let (url, seen) = canned(vec![(404, "")]).await;
        assert!(!fetcher(0).exists(&url).await);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(8));
        assert!(backoff_delay(base, 40) >= Duration::from_secs(u64::from(u32::MAX)));
        assert_eq!(backoff_delay(Duration::MAX, 1), Duration::MAX);
    }

    #[test]
    fn transient_statuses() {
        let status = |s| FetchError::Status {
            url: "https://acme.cz/".into(),
            status: s,
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(404).is_transient());
        assert!(!FetchError::Timeout { url: "x".into() }.is_transient());
    }

    #[tokio::test]
    async fn static_fetcher_serves_pages() {
        let f = testing::StaticFetcher::new().with_page("https://acme.cz/ceny", "<p>ok</p>");
        let ok = Url::parse("https://acme.cz/ceny/").unwrap();
        let missing = Url::parse("https://acme.cz/pricing").unwrap();
        assert_eq!(f.get(&ok).await.unwrap(), "<p>ok</p>");
        assert!(matches!(f.get(&missing).await, Err(FetchError::Status { status: 404, .. })));
        assert_eq!(f.calls().len(), 2);
    }
}
