use std::sync::{Arc, LazyLock};

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::fetch::{Fetch, FetchError};
use crate::text::{collapse_ws, contains_any};

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Finds the page holding a category's content on a target site.
pub struct PageLocator {
    fetcher: Arc<dyn Fetch>,
}

impl PageLocator {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self { fetcher }
    }

    /// Probe `candidates` in order (first 2xx wins), then fall back to
    /// scanning homepage anchors for `keywords`. `None` means the category has
    /// no page on this site.
    pub async fn locate(&self, base: &Url, candidates: &[&str], keywords: &[&str]) -> Option<Url> {
        self.try_locate(base, candidates, keywords)
            .await
            .unwrap_or_else(|e| {
                debug!("homepage scan skipped for {}: {}", base, e);
                None
            })
    }

    /// Like [`locate`](Self::locate), but a homepage that cannot be fetched
    /// for any reason other than 404/410 is reported as an error.
    pub async fn try_locate(
        &self,
        base: &Url,
        candidates: &[&str],
        keywords: &[&str],
    ) -> Result<Option<Url>, FetchError> {
        let Some(root) = origin(base) else {
            return Ok(None);
        };

        for path in candidates {
            let Ok(url) = root.join(path) else { continue };
            if self.fetcher.exists(&url).await {
                debug!("located {} via candidate path", url);
                return Ok(Some(url));
            }
        }

        let homepage = match self.fetcher.get(base).await {
            Ok(html) => html,
            Err(FetchError::Status { status: 404 | 410, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let found = scan_links(&homepage, &root, keywords);
        if let Some(url) = &found {
            debug!("located {} via homepage link", url);
        }
        Ok(found)
    }
}

/// First anchor whose visible text contains a keyword, resolved against the
/// homepage's scheme and host.
pub fn scan_links(html: &str, root: &Url, keywords: &[&str]) -> Option<Url> {
    let doc = Html::parse_document(html);
    doc.select(&ANCHOR).find_map(|a| {
        let href = a.value().attr("href")?.trim();
        if href.is_empty() || href.starts_with('#') || is_non_http(href) {
            return None;
        }
        let text = collapse_ws(&a.text().collect::<String>());
        if text.is_empty() || !contains_any(&text, keywords) {
            return None;
        }
        let url = root.join(href).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    })
}

fn is_non_http(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    ["mailto:", "tel:", "javascript:", "data:"]
        .iter()
        .any(|p| lower.starts_with(p))
}

/// `scheme://host[:port]/` of `url`.
pub fn origin(url: &Url) -> Option<Url> {
    let host = url.host_str()?;
    let raw = match url.port() {
        Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
        None => format!("{}://{}/", url.scheme(), host),
    };
    Url::parse(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::StaticFetcher;

    const KEYWORDS: &[&str] = &["ceník", "ceny", "pricing"];

    fn base() -> Url {
        Url::parse("https://acme.cz/").unwrap()
    }

    #[tokio::test]
    async fn first_responding_candidate_wins() {
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_page("https://acme.cz/ceny", "<h1>Ceny</h1>")
                .with_page("https://acme.cz/", r#"<a href="/cenik">Ceník</a>"#),
        );
        let locator = PageLocator::new(fetcher.clone());
        let url = locator.locate(&base(), &["/pricing", "/ceny"], KEYWORDS).await;
        assert_eq!(url.unwrap().as_str(), "https://acme.cz/ceny");
        // the homepage is never fetched when a candidate answered
        assert_eq!(fetcher.calls(), vec!["https://acme.cz/pricing", "https://acme.cz/ceny"]);
    }

    #[tokio::test]
    async fn candidate_order_is_priority() {
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_page("https://acme.cz/pricing", "a")
                .with_page("https://acme.cz/ceny", "b"),
        );
        let locator = PageLocator::new(fetcher);
        let url = locator.locate(&base(), &["/ceny", "/pricing"], KEYWORDS).await;
        assert_eq!(url.unwrap().path(), "/ceny");
    }

    #[tokio::test]
    async fn falls_back_to_homepage_links() {
        let home = r#"<nav><a href="/o-nas">O nás</a><a href="nase-ceny.html">Naše CENY</a></nav>"#;
        let fetcher = Arc::new(StaticFetcher::new().with_page("https://acme.cz/", home));
        let locator = PageLocator::new(fetcher);
        let url = locator.locate(&base(), &["/pricing"], KEYWORDS).await;
        assert_eq!(url.unwrap().as_str(), "https://acme.cz/nase-ceny.html");
    }

    #[tokio::test]
    async fn nothing_found() {
        let fetcher = Arc::new(
            StaticFetcher::new().with_page("https://acme.cz/", r#"<a href="/kontakt">Kontakt</a>"#),
        );
        let locator = PageLocator::new(fetcher);
        assert!(locator.locate(&base(), &["/pricing"], KEYWORDS).await.is_none());
    }

    #[tokio::test]
    async fn unreachable_site() {
        let locator = PageLocator::new(Arc::new(StaticFetcher::new()));
        assert!(locator.locate(&base(), &["/pricing", "/ceny"], KEYWORDS).await.is_none());
    }

    #[tokio::test]
    async fn down_site_is_an_error() {
        let fetcher = StaticFetcher::new();
        fetcher.fail_all(FetchError::Timeout {
            url: "https://acme.cz/".into(),
        });
        let locator = PageLocator::new(Arc::new(fetcher));
        let err = locator.try_locate(&base(), &["/pricing"], KEYWORDS).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
        assert!(locator.locate(&base(), &["/pricing"], KEYWORDS).await.is_none());
    }

    #[test]
    fn resolves_protocol_relative_and_absolute() {
        let root = base();
        let html = r#"<a href="//cdn.acme.cz/cenik">Ceník</a>"#;
        assert_eq!(
            scan_links(html, &root, KEYWORDS).unwrap().as_str(),
            "https://cdn.acme.cz/cenik"
        );
        let html = r#"<a href="https://shop.acme.cz/pricing">Pricing</a>"#;
        assert_eq!(
            scan_links(html, &root, KEYWORDS).unwrap().as_str(),
            "https://shop.acme.cz/pricing"
        );
    }

    #[test]
    fn skips_non_http_links() {
        let root = base();
        let html = r##"<a href="mailto:ceny@acme.cz">Ceny e-mailem</a><a href="#ceny">Ceny</a><a href="/cenik">Ceník</a>"##;
        assert_eq!(scan_links(html, &root, KEYWORDS).unwrap().path(), "/cenik");
    }

    #[test]
    fn relative_href_resolves_against_host_not_path() {
        let page = Url::parse("https://acme.cz/en/home/").unwrap();
        let root = origin(&page).unwrap();
        let html = r#"<a href="pricing">Pricing</a>"#;
        assert_eq!(scan_links(html, &root, KEYWORDS).unwrap().as_str(), "https://acme.cz/pricing");
    }
}
