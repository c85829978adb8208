//! Remote font sources and the HTTP plumbing they share.

use std::sync::Arc;

use async_trait::async_trait;
use font_core::{DownloadCandidate, FontIdentity, SourceName};

pub mod google;
pub mod http;
pub mod markup;
pub mod retry;
pub mod scraped;

pub use google::{GoogleFontsSource, GOOGLE_FONTS_API};
pub use http::{FetchError, HttpFetch, HttpResponse, ReqwestFetcher, BROWSER_USER_AGENT};
#[cfg(any(test, feature = "test-support"))]
pub use http::StaticFetcher;
pub use retry::{retry_with_backoff, Retried};
pub use scraped::{DaFontSource, FreeFontsSource, OneThousandOneFontsSource};

/// Why a provider could not answer a search
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unexpected response: {0}")]
    Parse(String),

    /// Credential problems are not fixed by asking again
    #[error("authentication failed: {0}")]
    Authentication(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::Authentication(_))
    }
}

/// Classify a non-success HTTP status
pub(crate) fn status_error(status: u16) -> SourceError {
    match status {
        429 => SourceError::RateLimited(format!("HTTP {}", status)),
        _ => SourceError::Unavailable(format!("HTTP {}", status)),
    }
}

/// One remote provider. Returns at most one candidate per search.
#[async_trait]
pub trait FontSource: Send + Sync {
    fn name(&self) -> SourceName;

    /// False when the provider is missing a credential it needs
    fn is_configured(&self) -> bool {
        true
    }

    async fn search(&self, identity: &FontIdentity) -> Result<Option<DownloadCandidate>, SourceError>;
}

/// Construct the providers for `order`, all sharing one fetcher
pub fn build_sources(
    order: &[SourceName],
    http: Arc<dyn HttpFetch>,
    api_key: Option<String>,
) -> Vec<Arc<dyn FontSource>> {
    let mut sources: Vec<Arc<dyn FontSource>> = Vec::with_capacity(order.len());
    for name in order {
        if sources.iter().any(|s| s.name() == *name) {
            continue;
        }
        let source: Arc<dyn FontSource> = match name {
            SourceName::GoogleFonts => Arc::new(GoogleFontsSource::new(http.clone(), api_key.clone())),
            SourceName::OneThousandOneFonts => Arc::new(OneThousandOneFontsSource::new(http.clone())),
            SourceName::DaFont => Arc::new(DaFontSource::new(http.clone())),
            SourceName::FreeFonts => Arc::new(FreeFontsSource::new(http.clone())),
        };
        sources.push(source);
    }
    sources
}
