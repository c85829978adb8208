//! The network seam. Sources and the installer only see [`HttpFetch`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::REFERER;
use reqwest::Client;

/// Browser-like agent; some font sites refuse obvious bots
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, lossy for non-UTF-8 pages
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// GET `url`. Non-2xx statuses are responses, not errors.
    async fn get(&self, url: &str, referer: Option<&str>) -> Result<HttpResponse, FetchError>;
}

/// The production fetcher
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str, referer: Option<&str>) -> Result<HttpResponse, FetchError> {
        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let to_error = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout { url: url.to_string() }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = request.send().await.map_err(to_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(to_error)?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use self::fake::StaticFetcher;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;

    /// Canned responses keyed by URL. A route matches its exact URL or, failing
    /// that, the longest registered prefix; anything else is a 404.
    #[derive(Debug, Default)]
    pub struct StaticFetcher {
        routes: Vec<(String, Route)>,
        requests: Mutex<Vec<(String, Option<String>)>>,
    }

    #[derive(Debug)]
    enum Route {
        Respond(HttpResponse),
        Fail,
    }

    impl StaticFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(mut self, url: &str, response: HttpResponse) -> Self {
            self.routes.push((url.to_string(), Route::Respond(response)));
            self
        }

        /// Requests under `url` fail at the transport level
        pub fn unreachable(mut self, url: &str) -> Self {
            self.routes.push((url.to_string(), Route::Fail));
            self
        }

        /// Every request made so far, with its referer
        pub fn requests(&self) -> Vec<(String, Option<String>)> {
            self.requests.lock().clone()
        }

        pub fn request_count(&self, prefix: &str) -> usize {
            self.requests.lock().iter().filter(|(url, _)| url.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl HttpFetch for StaticFetcher {
        async fn get(&self, url: &str, referer: Option<&str>) -> Result<HttpResponse, FetchError> {
            self.requests
                .lock()
                .push((url.to_string(), referer.map(str::to_string)));

            let route = self
                .routes
                .iter()
                .find(|(key, _)| key == url)
                .or_else(|| {
                    self.routes
                        .iter()
                        .filter(|(key, _)| url.starts_with(key.as_str()))
                        .max_by_key(|(key, _)| key.len())
                })
                .map(|(_, route)| route);

            match route {
                Some(Route::Respond(response)) => Ok(response.clone()),
                Some(Route::Fail) => Err(FetchError::Transport {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                }),
                None => Ok(HttpResponse::with_status(404, "not found")),
            }
        }
    }
}
