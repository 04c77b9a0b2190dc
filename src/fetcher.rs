use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::browser::BrowserPool;
use crate::config::Config;
use crate::error::FetchError;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

// Rotated across browser attempts to vary the fingerprint.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36",
];

// Markers of client-rendered shells that need a real browser.
const RENDER_PLACEHOLDERS: &[&str] = &[
    r#"<div id="root"></div>"#,
    r#"<div id="app"></div>"#,
    "<app-root></app-root>",
    "enable javascript",
    "loading...",
];

pub struct Fetcher {
    client: reqwest::Client,
    pool: BrowserPool,
    config: Config,
}

impl Fetcher {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENTS[0])
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            pool: BrowserPool::new(config.max_browsers),
            config,
        })
    }

    /// Fetch `url`, preferring a plain GET and escalating to the rendering
    /// path when the body looks like a client-rendered shell.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        match self.fetch_http(url).await {
            Ok(body) if !self.needs_render(&body) => {
                debug!(url, len = body.len(), "direct fetch sufficient");
                return Ok(body);
            }
            Ok(body) => {
                debug!(url, len = body.len(), "direct fetch insufficient, rendering");
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(url, error = %e, "direct fetch failed, rendering");
            }
        }

        self.fetch_rendered(url).await
    }

    async fn fetch_http(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(resp.text().await?)
    }

    /// Browser path with retry. DNS failures abort immediately; everything
    /// else backs off exponentially, rotating the UA each attempt.
    async fn fetch_rendered(&self, url: &str) -> Result<String, FetchError> {
        let mut last_err = None;

        for attempt in 0..MAX_RETRIES {
            let ua = USER_AGENTS[attempt as usize % USER_AGENTS.len()];
            match self.render_once(url, ua).await {
                Ok(html) => return Ok(html),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        url,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        error = %e,
                        "render attempt failed, backing off {:.1}s",
                        backoff.as_secs_f64()
                    );
                    last_err = Some(e);
                    if attempt + 1 < MAX_RETRIES {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FetchError::Browser("no attempts made".into())))
    }

    async fn render_once(&self, url: &str, user_agent: &str) -> Result<String, FetchError> {
        let guard = self.pool.acquire(user_agent).await?;
        let result = guard.navigate(url, self.config.nav_timeout).await;
        guard.close().await;

        let html = result?;
        if html.len() < self.config.min_content_len {
            return Err(FetchError::InsufficientContent(html.len()));
        }
        Ok(html)
    }

    /// Render-need heuristic: too short, no root html marker, or a known
    /// client-rendering placeholder.
    fn needs_render(&self, body: &str) -> bool {
        if body.len() < self.config.min_content_len {
            return true;
        }
        let lower = body.to_lowercase();
        if !lower.contains("<html") {
            return true;
        }
        if RENDER_PLACEHOLDERS.iter().any(|p| lower.contains(p)) {
            return true;
        }
        // A redirect script with nothing else behind it means the real page
        // lives elsewhere and only a browser will follow it.
        lower.contains("location.href") && lower.len() < self.config.min_content_len * 4
    }

    pub async fn shutdown(&self) {
        info!("shutting down browser pool");
        self.pool.shutdown().await;
    }
}
