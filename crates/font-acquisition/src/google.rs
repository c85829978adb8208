use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use font_core::{Confidence, DownloadCandidate, FontIdentity, SourceName};
use font_normalizer::{style_weight, FontNormalizer};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::http::HttpFetch;
use crate::{status_error, FontSource, SourceError};

pub const GOOGLE_FONTS_API: &str = "https://www.googleapis.com/webfonts/v1/webfonts";

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    items: Vec<CatalogFamily>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFamily {
    family: String,
    #[serde(default)]
    variants: Vec<String>,
    #[serde(default)]
    files: HashMap<String, String>,
}

/// A catalog family filed under its base family. "Barlow Condensed" is
/// filed under `barlow` with `name_style` ["condensed"].
#[derive(Debug, Clone)]
struct CatalogEntry {
    name_style: Vec<String>,
    family: CatalogFamily,
}

impl CatalogEntry {
    /// Style words still wanted once this family's own name is accounted
    /// for, or None when the family's name asks for something else
    fn remaining_style(&self, wanted: &[&str]) -> Option<String> {
        if !self.name_style.iter().all(|w| wanted.contains(&w.as_str())) {
            return None;
        }
        let rest: Vec<&str> = wanted
            .iter()
            .copied()
            .filter(|w| !self.name_style.iter().any(|n| n == w))
            .collect();
        Some(if rest.is_empty() {
            "regular".to_string()
        } else {
            rest.join(" ")
        })
    }
}

fn style_words(style: &str) -> Vec<&str> {
    style.split(' ').filter(|w| !w.is_empty() && *w != "regular").collect()
}

/// Google Fonts Developer API. The catalog is downloaded once per run and
/// searched locally by normalized family name.
pub struct GoogleFontsSource {
    http: Arc<dyn HttpFetch>,
    api_key: Option<String>,
    catalog: OnceCell<HashMap<String, Vec<CatalogEntry>>>,
    disabled: AtomicBool,
}

impl GoogleFontsSource {
    pub fn new(http: Arc<dyn HttpFetch>, api_key: Option<String>) -> Self {
        Self {
            http,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            catalog: OnceCell::new(),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn catalog(&self) -> Result<&HashMap<String, Vec<CatalogEntry>>, SourceError> {
        self.catalog.get_or_try_init(|| self.fetch_catalog()).await
    }

    async fn fetch_catalog(&self) -> Result<HashMap<String, Vec<CatalogEntry>>, SourceError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SourceError::Authentication("no Google Fonts API key configured".to_string()))?;
        let url = format!("{}?key={}", GOOGLE_FONTS_API, key);

        let response = self
            .http
            .get(&url, None)
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        match response.status {
            400 | 401 | 403 => {
                return Err(SourceError::Authentication(format!(
                    "Google Fonts rejected the API key (HTTP {})",
                    response.status
                )))
            }
            _ if !response.is_success() => return Err(status_error(response.status)),
            _ => {}
        }

        let parsed: CatalogResponse = serde_json::from_slice(&response.body)
            .map_err(|e| SourceError::Parse(format!("malformed Google Fonts catalog: {}", e)))?;

        let normalizer = FontNormalizer;
        let mut catalog: HashMap<String, Vec<CatalogEntry>> = HashMap::with_capacity(parsed.items.len());
        let count = parsed.items.len();
        for family in parsed.items {
            let identity = normalizer.normalize_name(&family.family, None);
            let name_style = style_words(&identity.style).into_iter().map(str::to_string).collect();
            catalog
                .entry(identity.family)
                .or_default()
                .push(CatalogEntry { name_style, family });
        }
        debug!("Google Fonts catalog: {} families", count);
        Ok(catalog)
    }
}

/// Catalog variant name for a canonical style: `regular`, `italic`, `700`,
/// `300italic`, ...
pub fn style_to_variant(style: &str) -> String {
    let italic = style.split(' ').any(|w| w == "italic");
    match (style_weight(style), italic) {
        (400, false) => "regular".to_string(),
        (400, true) => "italic".to_string(),
        (weight, false) => weight.to_string(),
        (weight, true) => format!("{}italic", weight),
    }
}

/// Styles the catalog's variant axis cannot express (widths)
fn has_width(style: &str) -> bool {
    style
        .split(' ')
        .any(|w| w.ends_with("condensed") || w.ends_with("expanded"))
}

#[async_trait]
impl FontSource for GoogleFontsSource {
    fn name(&self) -> SourceName {
        SourceName::GoogleFonts
    }

    fn is_configured(&self) -> bool {
        self.has_credential()
    }

    async fn search(&self, identity: &FontIdentity) -> Result<Option<DownloadCandidate>, SourceError> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(SourceError::Authentication(
                "Google Fonts disabled after an authentication failure".to_string(),
            ));
        }

        let catalog = match self.catalog().await {
            Ok(catalog) => catalog,
            Err(e @ SourceError::Authentication(_)) => {
                if !self.disabled.swap(true, Ordering::SeqCst) {
                    warn!("{}; skipping Google Fonts for the rest of the run", e);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let Some(entries) = catalog.get(&identity.family) else {
            return Ok(None);
        };

        // The most specific family whose name fits the wanted style wins:
        // "Barlow Condensed" over "Barlow" for bold condensed
        let wanted = style_words(&identity.style);
        let fitting = entries
            .iter()
            .filter_map(|entry| entry.remaining_style(&wanted).map(|rest| (entry, rest)))
            .fold(None::<(&CatalogEntry, String)>, |best, (entry, rest)| match best {
                Some((b, _)) if b.name_style.len() >= entry.name_style.len() => best,
                _ => Some((entry, rest)),
            });

        let exact = fitting.as_ref().and_then(|(entry, rest)| {
            if has_width(rest) {
                return None;
            }
            entry.family.files.get(&style_to_variant(rest))
        });
        let (url, confidence) = match exact {
            Some(url) => (url, Confidence::Exact),
            None => {
                let family = match &fitting {
                    Some((entry, _)) => &entry.family,
                    None => match entries.iter().find(|e| e.name_style.is_empty()) {
                        Some(base) => &base.family,
                        None => return Ok(None),
                    },
                };
                let fallback = family
                    .files
                    .get("regular")
                    .or_else(|| family.variants.iter().find_map(|v| family.files.get(v)))
                    .or_else(|| family.files.values().next());
                match fallback {
                    Some(url) => (url, Confidence::Approximate),
                    None => {
                        return Err(SourceError::Parse(format!(
                            "catalog entry for {} lists no files",
                            family.family
                        )))
                    }
                }
            }
        };

        Ok(Some(DownloadCandidate {
            identity: identity.clone(),
            url: url.clone(),
            source: SourceName::GoogleFonts,
            confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, StaticFetcher};

    const CATALOG: &str = r#"{
        "kind": "webfonts#webfontList",
        "items": [
            {
                "family": "Open Sans",
                "variants": ["regular", "italic", "700", "700italic"],
                "files": {
                    "regular": "https://fonts.gstatic.com/s/opensans/OpenSans-Regular.ttf",
                    "italic": "https://fonts.gstatic.com/s/opensans/OpenSans-Italic.ttf",
                    "700": "https://fonts.gstatic.com/s/opensans/OpenSans-Bold.ttf",
                    "700italic": "https://fonts.gstatic.com/s/opensans/OpenSans-BoldItalic.ttf"
                }
            }
        ]
    }"#;

    fn source(fetcher: StaticFetcher) -> (GoogleFontsSource, Arc<StaticFetcher>) {
        let fetcher = Arc::new(fetcher);
        (GoogleFontsSource::new(fetcher.clone(), Some("KEY".to_string())), fetcher)
    }

    #[test]
    fn maps_styles_to_variants() {
        assert_eq!(style_to_variant("regular"), "regular");
        assert_eq!(style_to_variant("italic"), "italic");
        assert_eq!(style_to_variant("bold"), "700");
        assert_eq!(style_to_variant("bold italic"), "700italic");
        assert_eq!(style_to_variant("extralight italic"), "200italic");
        assert_eq!(style_to_variant("black"), "900");
    }

    #[tokio::test]
    async fn exact_variant_and_approximate_fallback() {
        let (google, fetcher) = source(StaticFetcher::new().route(GOOGLE_FONTS_API, HttpResponse::ok(CATALOG)));

        let bold = google.search(&FontIdentity::new("open sans", "bold")).await.unwrap().unwrap();
        assert_eq!(bold.confidence, Confidence::Exact);
        assert!(bold.url.ends_with("OpenSans-Bold.ttf"));

        let light = google.search(&FontIdentity::new("open sans", "light")).await.unwrap().unwrap();
        assert_eq!(light.confidence, Confidence::Approximate);
        assert!(light.url.ends_with("OpenSans-Regular.ttf"));

        assert!(google.search(&FontIdentity::new("obscure display", "bold")).await.unwrap().is_none());

        // Catalog fetched once
        assert_eq!(fetcher.request_count(GOOGLE_FONTS_API), 1);
    }

    #[tokio::test]
    async fn width_named_families_are_matched_by_their_full_name() {
        let catalog = r#"{"items": [
            {"family": "Barlow", "variants": ["regular", "700"], "files": {
                "regular": "https://g/Barlow-Regular.ttf", "700": "https://g/Barlow-Bold.ttf"}},
            {"family": "Barlow Condensed", "variants": ["regular", "700"], "files": {
                "regular": "https://g/BarlowCondensed-Regular.ttf", "700": "https://g/BarlowCondensed-Bold.ttf"}}
        ]}"#;
        let (google, _) = source(StaticFetcher::new().route(GOOGLE_FONTS_API, HttpResponse::ok(catalog)));
        let normalizer = FontNormalizer;

        let condensed = google
            .search(&normalizer.normalize_name("Barlow Condensed", Some("Bold")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(condensed.url, "https://g/BarlowCondensed-Bold.ttf");
        assert_eq!(condensed.confidence, Confidence::Exact);

        let plain = google
            .search(&normalizer.normalize_name("Barlow", Some("Bold")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(plain.url, "https://g/Barlow-Bold.ttf");
        assert_eq!(plain.confidence, Confidence::Exact);
    }

    #[tokio::test]
    async fn width_without_a_width_family_is_approximate() {
        let (google, _) = source(StaticFetcher::new().route(GOOGLE_FONTS_API, HttpResponse::ok(CATALOG)));
        let candidate = google
            .search(&FontIdentity::new("open sans", "bold condensed"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.confidence, Confidence::Approximate);
        assert!(candidate.url.ends_with("OpenSans-Regular.ttf"));
    }

    #[tokio::test]
    async fn rejected_key_disables_the_source() {
        let (google, fetcher) = source(
            StaticFetcher::new().route(GOOGLE_FONTS_API, HttpResponse::with_status(403, "{}")),
        );
        let identity = FontIdentity::new("open sans", "regular");

        assert!(matches!(google.search(&identity).await, Err(SourceError::Authentication(_))));
        assert!(matches!(google.search(&identity).await, Err(SourceError::Authentication(_))));
        assert_eq!(fetcher.request_count(GOOGLE_FONTS_API), 1);
    }

    #[tokio::test]
    async fn missing_key_is_an_authentication_error() {
        let fetcher = Arc::new(StaticFetcher::new());
        let google = GoogleFontsSource::new(fetcher.clone(), None);
        assert!(!google.has_credential());
        assert!(matches!(
            google.search(&FontIdentity::new("lato", "regular")).await,
            Err(SourceError::Authentication(_))
        ));
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn server_errors_and_bad_json_are_classified() {
        let (google, _) = source(
            StaticFetcher::new().route(GOOGLE_FONTS_API, HttpResponse::with_status(503, "down")),
        );
        let identity = FontIdentity::new("lato", "regular");
        assert!(matches!(google.search(&identity).await, Err(SourceError::Unavailable(_))));

        let (google, _) = source(StaticFetcher::new().route(GOOGLE_FONTS_API, HttpResponse::ok("<html>")));
        assert!(matches!(google.search(&identity).await, Err(SourceError::Parse(_))));

        let (google, _) = source(
            StaticFetcher::new().route(GOOGLE_FONTS_API, HttpResponse::with_status(429, "slow down")),
        );
        assert!(matches!(google.search(&identity).await, Err(SourceError::RateLimited(_))));
    }
}
