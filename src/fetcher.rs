use crate::adapter::PageRequest;
use crate::robots::{robots_url, RobotsPolicy};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchFailure {
    #[error("disallowed by robots.txt: {url}")]
    RobotsDisallowed { url: String },

    #[error("blocked by server (HTTP {status})")]
    Blocked { status: u16 },

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("network error: {0}")]
    Network(String),
}

impl FetchFailure {
    /// Failures worth one more attempt. Blocks and robots denials never are.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchFailure::Server { .. } | FetchFailure::Network(_))
    }
}

/// Executes adapter requests. Implemented by `PoliteFetcher`; tests supply fixtures.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, site: &str, request: &PageRequest) -> Result<String, FetchFailure>;
}

pub struct PoliteFetcher {
    client: Client,
    user_agent: String,
    interval: Duration,
    respect_robots: bool,
    last_request: Mutex<HashMap<String, Instant>>,
    robots: Mutex<HashMap<String, RobotsPolicy>>,
}

impl PoliteFetcher {
    pub fn new(client: Client, user_agent: &str, interval: Duration) -> Self {
        Self {
            client,
            user_agent: user_agent.to_string(),
            interval,
            respect_robots: true,
            last_request: Mutex::new(HashMap::new()),
            robots: Mutex::new(HashMap::new()),
        }
    }

    pub fn respect_robots(mut self, respect: bool) -> Self {
        self.respect_robots = respect;
        self
    }

    /// Sleeps until `interval` has passed since the last request to `site`, then claims the slot
    async fn wait_turn(&self, site: &str, interval: Duration) {
        let wait = {
            let last_request = self.last_request.lock().await;
            last_request
                .get(site)
                .map(|last| interval.saturating_sub(last.elapsed()))
        };

        if let Some(wait) = wait.filter(|w| !w.is_zero()) {
            tracing::trace!("{}: waiting {:?} before next request", site, wait);
            tokio::time::sleep(wait).await;
        }

        self.last_request
            .lock()
            .await
            .insert(site.to_string(), Instant::now());
    }

    /// robots.txt for the site, fetched on first use and cached for the fetcher's lifetime
    async fn robots_for(&self, site: &str, url: &str) -> RobotsPolicy {
        if let Some(policy) = self.robots.lock().await.get(site) {
            return policy.clone();
        }

        let policy = match robots_url(url) {
            Some(robots_url) => {
                self.wait_turn(site, self.interval).await;
                match self.client.get(&robots_url).send().await {
                    Ok(response) if response.status().is_success() => match response.text().await {
                        Ok(body) => RobotsPolicy::from_content(&body),
                        Err(e) => {
                            tracing::warn!("{}: failed to read robots.txt: {}", site, e);
                            RobotsPolicy::allow_all()
                        }
                    },
                    Ok(response) => {
                        tracing::debug!("{}: no robots.txt (HTTP {})", site, response.status());
                        RobotsPolicy::allow_all()
                    }
                    Err(e) => {
                        tracing::warn!("{}: could not fetch robots.txt, assuming allow-all: {}", site, e);
                        RobotsPolicy::allow_all()
                    }
                }
            }
            None => RobotsPolicy::allow_all(),
        };

        self.robots
            .lock()
            .await
            .insert(site.to_string(), policy.clone());
        policy
    }

    /// Configured interval, stretched to the site's Crawl-delay when it asks for more
    fn effective_interval(&self, robots: Option<&RobotsPolicy>) -> Duration {
        robots
            .and_then(|r| r.crawl_delay(&self.user_agent))
            .filter(|delay| delay.is_finite() && *delay > 0.0)
            .map(Duration::from_secs_f64)
            .map_or(self.interval, |delay| delay.max(self.interval))
    }
}

#[async_trait]
impl PageFetcher for PoliteFetcher {
    async fn fetch(&self, site: &str, request: &PageRequest) -> Result<String, FetchFailure> {
        let url = request.url();

        let robots = if self.respect_robots {
            let policy = self.robots_for(site, &url).await;
            if !policy.is_allowed(&url, &self.user_agent) {
                tracing::warn!("{}: {} disallowed by robots.txt", site, url);
                return Err(FetchFailure::RobotsDisallowed { url });
            }
            Some(policy)
        } else {
            None
        };

        self.wait_turn(site, self.effective_interval(robots.as_ref())).await;

        tracing::debug!("{}: GET {}", site, url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchFailure::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(FetchFailure::Blocked { status: status.as_u16() });
        }
        if status.is_server_error() {
            return Err(FetchFailure::Server { status: status.as_u16() });
        }
        if !status.is_success() {
            return Err(FetchFailure::Status { status: status.as_u16() });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchFailure::Network(e.to_string()))?;
        tracing::debug!("{}: fetched {} bytes", site, body.len());

        Ok(body)
    }
}
