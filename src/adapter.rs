use crate::error::ConfigError;
use crate::models::{RawRecord, SurveyQuery};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque pagination cursor handed back by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageToken(pub u32);

/// A GET request built by an adapter, executed by the fetcher
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub base_url: String,
    pub params: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            params: Vec::new(),
        }
    }

    /// Appends a query parameter; empty values are left out
    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        if !value.is_empty() {
            self.params.push((name.to_string(), value));
        }
        self
    }

    pub fn url(&self) -> String {
        if self.params.is_empty() {
            return self.base_url.clone();
        }

        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.base_url, separator, query)
    }
}

impl fmt::Display for PageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Records found on one result page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub records: Vec<RawRecord>,
    pub next_page: Option<PageToken>,
}

impl ParsedPage {
    /// A recognised "no matches" page
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The page could not be interpreted. An empty result page is not an error.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("anti-bot or block page returned: {0}")]
    BlockedPage(String),
}

/// Contract every supported listing site implements.
/// Adapters never perform I/O: they build requests and parse bodies handed to them.
pub trait SiteAdapter: Send + Sync {
    /// Identifier used on the command line (e.g. "suumo")
    fn name(&self) -> &str;

    /// Builds the request for the given page (`None` = first page)
    fn build_query(&self, query: &SurveyQuery, page: Option<PageToken>) -> PageRequest;

    /// Parses one result page into raw records
    fn parse_page(&self, body: &str, collected_at: DateTime<Utc>) -> Result<ParsedPage, ParseError>;

    fn has_next_page(&self, page: &ParsedPage) -> bool {
        page.next_page.is_some()
    }
}

/// Name-keyed set of adapters, built once at start-up and passed around explicitly
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn SiteAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Box<dyn SiteAdapter>) {
        let adapter: Arc<dyn SiteAdapter> = Arc::from(adapter);
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SiteAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn list_sites(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// Looks up every requested site, failing on the first unknown one
    pub fn resolve(&self, sites: &[String]) -> Result<Vec<Arc<dyn SiteAdapter>>, ConfigError> {
        if sites.is_empty() {
            return Err(ConfigError::NoSites);
        }

        sites
            .iter()
            .map(|site| {
                self.get(site).ok_or_else(|| ConfigError::UnknownSite {
                    site: site.clone(),
                    available: self.list_sites().join(", "),
                })
            })
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Heuristic check for captcha / access-denied interstitials
pub fn looks_like_block_page(html: &str) -> Option<&'static str> {
    let lower = html.to_lowercase();
    [
        ("recaptcha", "recaptcha"),
        ("hcaptcha", "hcaptcha"),
        ("captcha", "captcha"),
        ("cf-browser-verification", "cloudflare challenge"),
        ("cf_chl_opt", "cloudflare challenge"),
        ("access denied", "access denied"),
        ("アクセスが制限", "access restricted"),
    ]
    .iter()
    .find(|(marker, _)| lower.contains(marker))
    .map(|(_, reason)| *reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter(&'static str);

    impl SiteAdapter for StubAdapter {
        fn name(&self) -> &str {
            self.0
        }

        fn build_query(&self, query: &SurveyQuery, page: Option<PageToken>) -> PageRequest {
            PageRequest::new("https://example.com/list")
                .param("q", &query.station)
                .param("page", page.map(|p| p.0).unwrap_or(1))
        }

        fn parse_page(&self, _body: &str, _collected_at: DateTime<Utc>) -> Result<ParsedPage, ParseError> {
            Ok(ParsedPage::empty())
        }
    }

    fn registry() -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(StubAdapter("b")));
        registry.register(Box::new(StubAdapter("a")));
        registry
    }

    #[test]
    fn test_list_sites_sorted() {
        assert_eq!(registry().list_sites(), vec!["a", "b"]);
    }

    #[test]
    fn test_resolve_keeps_requested_order() {
        let resolved = registry()
            .resolve(&["b".to_string(), "a".to_string()])
            .unwrap();
        let names: Vec<&str> = resolved.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_resolve_unknown_site_fails() {
        let err = registry()
            .resolve(&["a".to_string(), "athome".to_string()])
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigError::UnknownSite {
                site: "athome".to_string(),
                available: "a, b".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_empty_fails() {
        assert_eq!(registry().resolve(&[]).err(), Some(ConfigError::NoSites));
    }

    #[test]
    fn test_page_request_url_encoding() {
        let request = PageRequest::new("https://example.com/list")
            .param("keyword", "渋谷 駅")
            .param("empty", "")
            .param("page", 2);
        assert_eq!(
            request.url(),
            "https://example.com/list?keyword=%E6%B8%8B%E8%B0%B7%20%E9%A7%85&page=2"
        );
    }

    #[test]
    fn test_block_page_detection() {
        assert_eq!(
            looks_like_block_page("<div class='g-recaptcha'></div>"),
            Some("recaptcha")
        );
        assert_eq!(looks_like_block_page("<h1>Access Denied</h1>"), Some("access denied"));
        assert_eq!(looks_like_block_page("<div id='js-bukkenList'></div>"), None);
    }

    #[test]
    fn test_has_next_page_default() {
        let adapter = StubAdapter("a");
        assert!(!adapter.has_next_page(&ParsedPage::empty()));
        let page = ParsedPage {
            records: Vec::new(),
            next_page: Some(PageToken(2)),
        };
        assert!(adapter.has_next_page(&page));
    }
}
