use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetBlockedUrLsParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::FetchError;

// Resource types that never contribute to extracted links.
const BLOCKED_URL_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.css", "*.woff",
    "*.woff2", "*.ttf", "*.otf", "*.mp4", "*.webm", "*.mp3",
];

/// Bounded pool of browser pages over a single shared Chromium instance.
/// The semaphore caps open pages across all jobs; the instance itself is
/// launched lazily, health-checked on acquire, and relaunched when it has
/// disconnected.
#[derive(Clone)]
pub struct BrowserPool {
    instance: Arc<Mutex<Option<Arc<Browser>>>>,
    permits: Arc<Semaphore>,
}

impl BrowserPool {
    pub fn new(max_pages: usize) -> Self {
        Self {
            instance: Arc::new(Mutex::new(None)),
            permits: Arc::new(Semaphore::new(max_pages.max(1))),
        }
    }

    /// Acquire a fresh page, parking until a slot frees. The returned guard
    /// releases the slot and closes the page on drop.
    pub async fn acquire(&self, user_agent: &str) -> Result<PageGuard, FetchError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Browser("browser pool closed".into()))?;

        let browser = self.healthy_instance().await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Browser(format!("failed to open page: {e}")))?;

        page.set_user_agent(user_agent)
            .await
            .map_err(|e| FetchError::Browser(format!("failed to set UA: {e}")))?;

        let blocked = BLOCKED_URL_PATTERNS.iter().map(|s| s.to_string()).collect();
        page.execute(SetBlockedUrLsParams::new(blocked))
            .await
            .map_err(|e| FetchError::Browser(format!("failed to block resources: {e}")))?;

        Ok(PageGuard {
            page: Some(page),
            _permit: permit,
        })
    }

    /// Return the cached instance if it still answers CDP, otherwise
    /// launch a new one.
    async fn healthy_instance(&self) -> Result<Arc<Browser>, FetchError> {
        let mut guard = self.instance.lock().await;

        if let Some(browser) = guard.as_ref() {
            if browser.version().await.is_ok() {
                return Ok(Arc::clone(browser));
            }
            debug!("cached browser unresponsive, relaunching");
            *guard = None;
        }

        let config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .build()
            .map_err(|e| FetchError::Browser(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(format!("browser launch: {e}")))?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let shared = Arc::new(browser);
        *guard = Some(Arc::clone(&shared));
        Ok(shared)
    }

    pub async fn shutdown(&self) {
        let mut guard = self.instance.lock().await;
        if let Some(browser) = guard.take() {
            if let Ok(mut b) = Arc::try_unwrap(browser) {
                if let Err(e) = b.close().await {
                    warn!(error = %e, "browser close error");
                }
            }
        }
    }
}

/// RAII page handle. Prefer the explicit async `close`; the Drop fallback
/// spawns cleanup so error paths never leak tabs or pool slots.
pub struct PageGuard {
    page: Option<Page>,
    _permit: OwnedSemaphorePermit,
}

impl PageGuard {
    pub fn page(&self) -> &Page {
        self.page.as_ref().expect("page already closed")
    }

    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let page = self.page();

        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| classify_nav_error(url, &e.to_string()))?;

        // Best effort: SPAs often settle after the initial commit.
        let _ = tokio::time::timeout(timeout, page.wait_for_navigation()).await;

        tokio::time::timeout(timeout, page.content())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Browser(format!("failed to read content: {e}")))
    }

    pub async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!(error = %e, "page close error");
            }
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = page.close().await;
                });
            }
        }
    }
}

fn classify_nav_error(url: &str, msg: &str) -> FetchError {
    if msg.contains("ERR_NAME_NOT_RESOLVED") {
        FetchError::Dns(url.to_string())
    } else {
        FetchError::Browser(format!("navigation failed: {msg}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_caps_outstanding_permits() {
        let pool = BrowserPool::new(2);
        let p1 = pool.permits.clone().acquire_owned().await.unwrap();
        let _p2 = pool.permits.clone().acquire_owned().await.unwrap();
        assert_eq!(pool.permits.available_permits(), 0);
        drop(p1);
        assert_eq!(pool.permits.available_permits(), 1);
    }

    #[test]
    fn unresolved_host_is_fatal() {
        let err = classify_nav_error("https://nope.invalid/", "net::ERR_NAME_NOT_RESOLVED");
        assert!(err.is_fatal());
        let err = classify_nav_error("https://ok.gov/", "net::ERR_CONNECTION_RESET");
        assert!(!err.is_fatal());
    }
}
