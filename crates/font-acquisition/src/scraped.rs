//! Fallback sources that scrape public font listing sites.
//!
//! Each follows the same two hops: search page, first result, then the font
//! page's download link. A search without results is "no candidate"; a
//! result page without the expected download markup is a parse error.

use std::sync::Arc;

use async_trait::async_trait;
use font_core::{Confidence, DownloadCandidate, FontIdentity, SourceName};
use font_normalizer::FontNormalizer;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::http::HttpFetch;
use crate::markup::{absolute_url, anchors, first_anchor_in_div, first_anchor_with_class, slug};
use crate::{status_error, FontSource, SourceError};

async fn fetch_page(http: &dyn HttpFetch, url: &str, referer: Option<&str>) -> Result<String, SourceError> {
    let response = http
        .get(url, referer)
        .await
        .map_err(|e| SourceError::Unavailable(e.to_string()))?;
    if !response.is_success() {
        return Err(status_error(response.status));
    }
    Ok(response.text())
}

fn search_url(base: &str, param: &str, family: &str) -> Result<String, SourceError> {
    Url::parse_with_params(base, &[(param, family)])
        .map(|u| u.to_string())
        .map_err(|e| SourceError::Parse(format!("bad search URL: {}", e)))
}

fn resolve(base: &str, href: &str) -> Result<String, SourceError> {
    absolute_url(base, href).ok_or_else(|| SourceError::Parse(format!("unusable link {:?}", href)))
}

/// Exact when the font page is for the requested family
fn confidence_for(identity: &FontIdentity, font_page: &str) -> Confidence {
    let family = FontNormalizer.normalize_family(&slug(font_page));
    if family == identity.family {
        Confidence::Exact
    } else {
        Confidence::Approximate
    }
}

fn candidate(identity: &FontIdentity, source: SourceName, font_page: &str, url: String) -> DownloadCandidate {
    let confidence = confidence_for(identity, font_page);
    debug!("{}: {} -> {} ({:?})", source, identity, url, confidence);
    DownloadCandidate {
        identity: identity.clone(),
        url,
        source,
        confidence,
    }
}

/// 1001fonts.com
pub struct OneThousandOneFontsSource {
    http: Arc<dyn HttpFetch>,
}

impl OneThousandOneFontsSource {
    pub const BASE: &'static str = "https://www.1001fonts.com";

    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FontSource for OneThousandOneFontsSource {
    fn name(&self) -> SourceName {
        SourceName::OneThousandOneFonts
    }

    async fn search(&self, identity: &FontIdentity) -> Result<Option<DownloadCandidate>, SourceError> {
        lazy_static! {
            static ref FONT_PAGE: Regex = Regex::new(r"^/[a-z0-9\-]+-font\.html$").unwrap();
        }

        let search = search_url(&format!("{}/search.html", Self::BASE), "search", &identity.family)?;
        let results = fetch_page(self.http.as_ref(), &search, None).await?;
        let Some(result) = first_anchor_with_class(&results, "preview-link", |href| FONT_PAGE.is_match(href)) else {
            return Ok(None);
        };
        let font_page = resolve(&search, result.href().unwrap_or_default())?;

        let page = fetch_page(self.http.as_ref(), &font_page, Some(&search)).await?;
        let download = first_anchor_with_class(&page, "btn-download", |href| href.starts_with("/download/"))
            .ok_or_else(|| SourceError::Parse(format!("no download button on {}", font_page)))?;
        let url = resolve(&font_page, download.href().unwrap_or_default())?;

        Ok(Some(candidate(identity, self.name(), &font_page, url)))
    }
}

/// dafont.com
pub struct DaFontSource {
    http: Arc<dyn HttpFetch>,
}

impl DaFontSource {
    pub const BASE: &'static str = "https://www.dafont.com";

    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FontSource for DaFontSource {
    fn name(&self) -> SourceName {
        SourceName::DaFont
    }

    async fn search(&self, identity: &FontIdentity) -> Result<Option<DownloadCandidate>, SourceError> {
        let search = search_url(&format!("{}/search.php", Self::BASE), "q", &identity.family)?;
        let results = fetch_page(self.http.as_ref(), &search, None).await?;
        let Some(result) = first_anchor_in_div(&results, "dffont2") else {
            return Ok(None);
        };
        let font_page = resolve(&search, result.href().unwrap_or_default())?;

        let page = fetch_page(self.http.as_ref(), &font_page, Some(&search)).await?;
        let download = first_anchor_in_div(&page, "dl")
            .ok_or_else(|| SourceError::Parse(format!("no download block on {}", font_page)))?;
        let url = resolve(&font_page, download.href().unwrap_or_default())?;

        Ok(Some(candidate(identity, self.name(), &font_page, url)))
    }
}

/// freefonts.io
pub struct FreeFontsSource {
    http: Arc<dyn HttpFetch>,
}

impl FreeFontsSource {
    pub const BASE: &'static str = "https://www.freefonts.io";

    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FontSource for FreeFontsSource {
    fn name(&self) -> SourceName {
        SourceName::FreeFonts
    }

    async fn search(&self, identity: &FontIdentity) -> Result<Option<DownloadCandidate>, SourceError> {
        let search = search_url(&format!("{}/", Self::BASE), "s", &identity.family)?;
        let results = fetch_page(self.http.as_ref(), &search, None).await?;
        let Some(result) = first_anchor_with_class(&results, "elementor-post__thumbnail__link", |_| true) else {
            return Ok(None);
        };
        let font_page = resolve(&search, result.href().unwrap_or_default())?;

        let page = fetch_page(self.http.as_ref(), &font_page, Some(&search)).await?;
        let download = anchors(&page)
            .into_iter()
            .find(|a| a.has_class("mybtnleft") && a.href().is_some())
            .ok_or_else(|| SourceError::Parse(format!("no download button on {}", font_page)))?;
        let url = resolve(&font_page, download.href().unwrap_or_default())?;

        Ok(Some(candidate(identity, self.name(), &font_page, url)))
    }
}
