use crate::adapter::{PageRequest, PageToken, SiteAdapter};
use crate::fetcher::{FetchFailure, PageFetcher};
use crate::models::{FailureRecord, RawRecord, SurveyQuery};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOptions {
    /// Records kept per site
    pub max_listings: usize,
    /// Hard stop for sites that keep advertising a next page
    pub max_pages: u32,
    pub retry_transient: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SiteState {
    Start,
    Fetching { page: u32 },
    Parsing { page: u32 },
    Done,
    Failed(FailureRecord),
}

/// What one site produced
#[derive(Debug, Clone, PartialEq)]
pub struct SiteCrawl {
    pub site: String,
    pub records: Vec<RawRecord>,
    pub pages: u32,
    pub state: SiteState,
}

impl SiteCrawl {
    fn new(site: &str) -> Self {
        Self {
            site: site.to_string(),
            records: Vec::new(),
            pages: 0,
            state: SiteState::Start,
        }
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        match &self.state {
            SiteState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    fn fail(&mut self, failure: FailureRecord) {
        tracing::warn!("{}", failure);
        self.state = SiteState::Failed(failure);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlOutcome {
    pub sites: Vec<SiteCrawl>,
}

impl CrawlOutcome {
    /// All records, site by site in requested order
    pub fn records(&self) -> Vec<RawRecord> {
        self.sites.iter().flat_map(|s| s.records.iter().cloned()).collect()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.sites.iter().filter_map(|s| s.failure().cloned()).collect()
    }

    pub fn total_records(&self) -> usize {
        self.sites.iter().map(|s| s.records.len()).sum()
    }
}

async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    site: &str,
    request: &PageRequest,
    retry_transient: bool,
) -> Result<String, FetchFailure> {
    match fetcher.fetch(site, request).await {
        Err(failure) if retry_transient && failure.is_transient() => {
            tracing::warn!("[{}] {} on {}, retrying once", site, failure, request);
            fetcher.fetch(site, request).await
        }
        result => result,
    }
}

/// Crawls one site to completion. Never returns an error: failures end up in the state.
pub async fn crawl_site(
    adapter: Arc<dyn SiteAdapter>,
    fetcher: Arc<dyn PageFetcher>,
    query: Arc<SurveyQuery>,
    options: CrawlOptions,
) -> SiteCrawl {
    let site = adapter.name().to_string();
    let mut crawl = SiteCrawl::new(&site);
    let mut token: Option<PageToken> = None;

    loop {
        if crawl.pages >= options.max_pages {
            tracing::warn!("[{}] Stopping after {} pages", site, crawl.pages);
            crawl.state = SiteState::Done;
            break;
        }

        let page_number = crawl.pages + 1;
        let request = adapter.build_query(&query, token);
        crawl.state = SiteState::Fetching { page: page_number };
        tracing::debug!("[{}] Fetching page {}: {}", site, page_number, request);

        let body = match fetch_with_retry(fetcher.as_ref(), &site, &request, options.retry_transient).await {
            Ok(body) => body,
            Err(failure) => {
                crawl.fail(FailureRecord::fetch(&site, &failure));
                break;
            }
        };
        crawl.pages = page_number;

        crawl.state = SiteState::Parsing { page: page_number };
        let page = match adapter.parse_page(&body, Utc::now()) {
            Ok(page) => page,
            Err(e) => {
                crawl.fail(FailureRecord::parse(&site, format!("page {}: {}", page_number, e)));
                break;
            }
        };

        let has_next = adapter.has_next_page(&page);
        let next_page = page.next_page;
        let room = options.max_listings.saturating_sub(crawl.records.len());
        tracing::debug!("[{}] Page {} yielded {} records", site, page_number, page.records.len());
        crawl.records.extend(page.records.into_iter().take(room));

        if crawl.records.len() >= options.max_listings {
            tracing::debug!("[{}] Listing cap of {} reached", site, options.max_listings);
            crawl.state = SiteState::Done;
            break;
        }

        match next_page {
            Some(next) if has_next => token = Some(next),
            _ => {
                crawl.state = SiteState::Done;
                break;
            }
        }
    }

    tracing::info!("[{}] Collected {} records over {} pages", site, crawl.records.len(), crawl.pages);
    crawl
}

/// Crawls every adapter concurrently and returns per-site results in the given order
pub async fn crawl_all(
    adapters: &[Arc<dyn SiteAdapter>],
    fetcher: Arc<dyn PageFetcher>,
    query: &SurveyQuery,
    options: CrawlOptions,
) -> CrawlOutcome {
    let query = Arc::new(query.clone());
    let mut tasks = JoinSet::new();

    for (index, adapter) in adapters.iter().enumerate() {
        let adapter = adapter.clone();
        let fetcher = fetcher.clone();
        let query = query.clone();
        tasks.spawn(async move { (index, crawl_site(adapter, fetcher, query, options).await) });
    }

    let mut slots: Vec<Option<SiteCrawl>> = vec![None; adapters.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, crawl)) => slots[index] = Some(crawl),
            Err(e) => tracing::error!("Crawl task failed: {}", e),
        }
    }

    let sites = slots
        .into_iter()
        .zip(adapters)
        .map(|(slot, adapter)| {
            slot.unwrap_or_else(|| {
                let mut crawl = SiteCrawl::new(adapter.name());
                crawl.fail(FailureRecord::fetch(adapter.name(), "crawl task aborted"));
                crawl
            })
        })
        .collect();

    CrawlOutcome { sites }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ParseError, ParsedPage};
    use crate::models::{fields, FailureStage, OutputFormat, Preference};
    use crate::normalizer::normalize_all;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Serves `pages[n - 1]` for body "page:n"; "garbled" is a layout mismatch
    struct ScriptedAdapter {
        name: String,
        pages: Vec<Vec<RawRecord>>,
    }

    impl ScriptedAdapter {
        fn new(name: &str, pages: Vec<Vec<RawRecord>>) -> Arc<dyn SiteAdapter> {
            Arc::new(Self {
                name: name.to_string(),
                pages,
            })
        }
    }

    impl SiteAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn build_query(&self, _query: &SurveyQuery, page: Option<PageToken>) -> PageRequest {
            PageRequest::new(&format!("https://{}.test/list", self.name)).param("page", page.map(|p| p.0).unwrap_or(1))
        }

        fn parse_page(&self, body: &str, _collected_at: DateTime<Utc>) -> Result<ParsedPage, ParseError> {
            let n: usize = body
                .strip_prefix("page:")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| ParseError::LayoutMismatch("no listing container".to_string()))?;
            let records = self.pages.get(n - 1).cloned().unwrap_or_default();
            let next_page = (n < self.pages.len()).then(|| PageToken(n as u32 + 1));
            Ok(ParsedPage { records, next_page })
        }
    }

    /// Replays queued responses per site, then serves "page:<n>"
    #[derive(Default)]
    struct ScriptedFetcher {
        queued: Mutex<HashMap<String, VecDeque<Result<String, FetchFailure>>>>,
        always_fail: HashMap<String, FetchFailure>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl ScriptedFetcher {
        fn queue(self, site: &str, response: Result<String, FetchFailure>) -> Self {
            self.queued
                .lock()
                .unwrap()
                .entry(site.to_string())
                .or_default()
                .push_back(response);
            self
        }

        fn failing(mut self, site: &str, failure: FetchFailure) -> Self {
            self.always_fail.insert(site.to_string(), failure);
            self
        }

        fn calls(&self, site: &str) -> usize {
            self.calls.lock().unwrap().get(site).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, site: &str, request: &PageRequest) -> Result<String, FetchFailure> {
            *self.calls.lock().unwrap().entry(site.to_string()).or_default() += 1;

            if let Some(failure) = self.always_fail.get(site) {
                return Err(failure.clone());
            }
            if let Some(response) = self.queued.lock().unwrap().get_mut(site).and_then(|q| q.pop_front()) {
                return response;
            }

            let page = request
                .params
                .iter()
                .find(|(k, _)| k == "page")
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| "1".to_string());
            Ok(format!("page:{}", page))
        }
    }

    fn query(sites: &[&str]) -> SurveyQuery {
        SurveyQuery {
            station: "恵比寿".to_string(),
            max_walk_minutes: None,
            area: None,
            area_tolerance: 10.0,
            madori: None,
            subject_built: None,
            age_max_years: None,
            age_diff_years: None,
            building_type: None,
            auto_lock: Preference::Any,
            bath_toilet: Preference::Any,
            aspect: None,
            max_listings: 50,
            sites: sites.iter().map(|s| s.to_string()).collect(),
            output_format: OutputFormat::Csv,
            brand_new_separate_stats: false,
            surveyed_on: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
        }
    }

    fn options(max_listings: usize) -> CrawlOptions {
        CrawlOptions {
            max_listings,
            max_pages: 20,
            retry_transient: true,
        }
    }

    fn record(site: &str, name: &str) -> RawRecord {
        RawRecord::new(site, Utc::now())
            .with(fields::NAME, name)
            .with(fields::RENT, "8.5万円")
            .with(fields::FEE, "5000円")
            .with(fields::AREA, "25.5m2")
            .with(fields::ACCESS, "JR山手線/恵比寿駅 歩5分")
    }

    fn records(site: &str, count: usize) -> Vec<RawRecord> {
        (0..count).map(|i| record(site, &format!("{} 物件{}", site, i))).collect()
    }

    async fn crawl_one(adapter: Arc<dyn SiteAdapter>, fetcher: ScriptedFetcher, options: CrawlOptions) -> (SiteCrawl, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(fetcher);
        let name = adapter.name().to_string();
        let crawl = crawl_site(adapter, fetcher.clone(), Arc::new(query(&[&name])), options).await;
        (crawl, fetcher)
    }

    #[tokio::test]
    async fn test_empty_site_is_done_without_failure() {
        let (crawl, fetcher) = crawl_one(ScriptedAdapter::new("a", vec![vec![]]), ScriptedFetcher::default(), options(50)).await;
        assert_eq!(crawl.state, SiteState::Done);
        assert!(crawl.records.is_empty());
        assert_eq!(crawl.pages, 1);
        assert_eq!(fetcher.calls("a"), 1);
    }

    #[tokio::test]
    async fn test_follows_pages_until_exhausted() {
        let adapter = ScriptedAdapter::new("a", vec![records("a", 2), records("a", 2), records("a", 1)]);
        let (crawl, _) = crawl_one(adapter, ScriptedFetcher::default(), options(50)).await;
        assert_eq!(crawl.state, SiteState::Done);
        assert_eq!(crawl.records.len(), 5);
        assert_eq!(crawl.pages, 3);
    }

    #[tokio::test]
    async fn test_cap_stops_pagination() {
        let adapter = ScriptedAdapter::new("a", vec![records("a", 3), records("a", 3), records("a", 3)]);
        let (crawl, fetcher) = crawl_one(adapter, ScriptedFetcher::default(), options(4)).await;
        assert_eq!(crawl.records.len(), 4);
        assert_eq!(crawl.pages, 2);
        assert_eq!(fetcher.calls("a"), 2);
        assert_eq!(crawl.state, SiteState::Done);
    }

    #[tokio::test]
    async fn test_page_bound_stops_endless_pagination() {
        let adapter = ScriptedAdapter::new("a", vec![Vec::new(); 100]);
        let mut opts = options(50);
        opts.max_pages = 3;
        let (crawl, fetcher) = crawl_one(adapter, ScriptedFetcher::default(), opts).await;
        assert_eq!(crawl.pages, 3);
        assert_eq!(fetcher.calls("a"), 3);
        assert_eq!(crawl.state, SiteState::Done);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let fetcher = ScriptedFetcher::default().queue("a", Err(FetchFailure::Server { status: 503 }));
        let (crawl, fetcher) = crawl_one(ScriptedAdapter::new("a", vec![records("a", 1)]), fetcher, options(50)).await;
        assert_eq!(crawl.state, SiteState::Done);
        assert_eq!(crawl.records.len(), 1);
        assert_eq!(fetcher.calls("a"), 2);
    }

    #[tokio::test]
    async fn test_persistent_server_error_gives_one_failure() {
        let fetcher = ScriptedFetcher::default().failing("a", FetchFailure::Server { status: 502 });
        let (crawl, fetcher) = crawl_one(ScriptedAdapter::new("a", vec![records("a", 1)]), fetcher, options(50)).await;
        assert_eq!(fetcher.calls("a"), 2);
        let failure = crawl.failure().unwrap();
        assert_eq!(failure.stage, FailureStage::Fetch);
        assert!(failure.reason.contains("502"));
    }

    #[tokio::test]
    async fn test_retry_disabled() {
        let fetcher = ScriptedFetcher::default().failing("a", FetchFailure::Network("reset".to_string()));
        let mut opts = options(50);
        opts.retry_transient = false;
        let (crawl, fetcher) = crawl_one(ScriptedAdapter::new("a", vec![records("a", 1)]), fetcher, opts).await;
        assert_eq!(fetcher.calls("a"), 1);
        assert!(crawl.failure().is_some());
    }

    #[tokio::test]
    async fn test_blocked_is_never_retried() {
        let fetcher = ScriptedFetcher::default().failing("a", FetchFailure::Blocked { status: 403 });
        let (crawl, fetcher) = crawl_one(ScriptedAdapter::new("a", vec![records("a", 1)]), fetcher, options(50)).await;
        assert_eq!(fetcher.calls("a"), 1);
        assert_eq!(crawl.failure().map(|f| f.stage), Some(FailureStage::Fetch));
    }

    #[tokio::test]
    async fn test_layout_mismatch_fails_site_and_keeps_earlier_pages() {
        let fetcher = ScriptedFetcher::default()
            .queue("a", Ok("page:1".to_string()))
            .queue("a", Ok("garbled".to_string()));
        let adapter = ScriptedAdapter::new("a", vec![records("a", 2), records("a", 2)]);
        let (crawl, _) = crawl_one(adapter, fetcher, options(50)).await;
        assert_eq!(crawl.records.len(), 2);
        let failure = crawl.failure().unwrap();
        assert_eq!(failure.stage, FailureStage::Parse);
        assert!(failure.reason.contains("page 2"));
    }

    #[tokio::test]
    async fn test_failing_site_does_not_affect_others() {
        let adapters = vec![
            ScriptedAdapter::new("a", vec![records("a", 2)]),
            ScriptedAdapter::new("b", vec![records("b", 2)]),
        ];
        let fetcher = Arc::new(ScriptedFetcher::default().failing("b", FetchFailure::Blocked { status: 403 }));

        let outcome = crawl_all(&adapters, fetcher, &query(&["a", "b"]), options(50)).await;

        assert_eq!(outcome.sites[0].records.len(), 2);
        assert_eq!(outcome.sites[0].state, SiteState::Done);
        let failures = outcome.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].site, "b");
    }

    #[tokio::test]
    async fn test_results_merged_in_requested_order() {
        let adapters = vec![
            ScriptedAdapter::new("b", vec![records("b", 1)]),
            ScriptedAdapter::new("a", vec![records("a", 3)]),
        ];
        let outcome = crawl_all(&adapters, Arc::new(ScriptedFetcher::default()), &query(&["b", "a"]), options(50)).await;

        let sites: Vec<&str> = outcome.sites.iter().map(|s| s.site.as_str()).collect();
        assert_eq!(sites, vec!["b", "a"]);
        assert_eq!(outcome.total_records(), 4);
        assert_eq!(outcome.records()[0].site, "b");
    }

    #[tokio::test]
    async fn test_crawl_then_normalize_counts() {
        let mut b_records = records("b", 1);
        b_records.push(RawRecord::new("b", Utc::now()).with(fields::NAME, "家賃不明ハイツ").with(fields::AREA, "20m2"));
        let adapters = vec![
            ScriptedAdapter::new("a", vec![records("a", 3)]),
            ScriptedAdapter::new("b", vec![b_records]),
        ];
        let q = query(&["a", "b"]);

        let outcome = crawl_all(&adapters, Arc::new(ScriptedFetcher::default()), &q, options(2)).await;
        assert!(outcome.failures().is_empty());

        let (listings, failures) = normalize_all(&outcome.records(), &q);
        assert_eq!(listings.len(), 3);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].site, "b");
        assert_eq!(failures[0].stage, FailureStage::Parse);
    }
}
