use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::{Config, ScoreConfig};
use crate::db;
use crate::extractor;
use crate::fetcher::Fetcher;
use crate::scorer::{ScoredLink, Scorer};

/// Result of one scrape job. The ranked list is returned even when
/// persistence only partially succeeded.
pub struct ScrapeOutcome {
    pub links: Vec<ScoredLink>,
    pub invalid_urls: usize,
    pub stored: usize,
    pub skipped: usize,
    pub fetch_time: Duration,
    pub extract_time: Duration,
    pub score_time: Duration,
    pub persist_time: Duration,
}

impl ScrapeOutcome {
    pub fn total_score(&self) -> f64 {
        self.links.iter().map(|l| l.score).sum()
    }
}

pub struct Pipeline {
    fetcher: Fetcher,
    scorer: Scorer,
}

impl Pipeline {
    pub fn new(config: Config, score_config: ScoreConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(config)?,
            scorer: Scorer::new(score_config),
        })
    }

    /// Run fetch → extract → score → persist for one page. Phases are
    /// strictly sequential; extraction never sees partial HTML.
    pub async fn scrape(&self, conn: &Connection, url: &str) -> Result<ScrapeOutcome> {
        let mut outcome = self.scrape_unstored(url).await?;

        let t = Instant::now();
        match db::bulk_upsert(conn, &outcome.links, url) {
            Ok(stats) => {
                outcome.stored = stats.stored;
                outcome.skipped = stats.skipped;
            }
            Err(e) => {
                // The ranked list is still useful; report and move on.
                warn!(url, error = %e, "persistence failed");
                outcome.skipped = outcome.links.len();
            }
        }
        outcome.persist_time = t.elapsed();
        info!(url, stored = outcome.stored, skipped = outcome.skipped, "persisted");

        Ok(outcome)
    }

    /// Fetch, extract, and rank without touching the store.
    pub async fn scrape_unstored(&self, url: &str) -> Result<ScrapeOutcome> {
        let t = Instant::now();
        let html = self
            .fetcher
            .fetch(url)
            .await
            .with_context(|| format!("fetch failed for {url}"))?;
        let fetch_time = t.elapsed();
        info!(url, bytes = html.len(), ms = fetch_time.as_millis() as u64, "fetched");

        let t = Instant::now();
        let extraction = extractor::extract(&html, url);
        let extract_time = t.elapsed();
        info!(
            url,
            candidates = extraction.candidates.len(),
            invalid = extraction.invalid_urls,
            "extracted"
        );

        let t = Instant::now();
        let links = self.scorer.rank_par(&extraction.candidates);
        let score_time = t.elapsed();

        Ok(ScrapeOutcome {
            links,
            invalid_urls: extraction.invalid_urls,
            stored: 0,
            skipped: 0,
            fetch_time,
            extract_time,
            score_time,
            persist_time: Duration::ZERO,
        })
    }

    pub async fn shutdown(&self) {
        self.fetcher.shutdown().await;
    }
}
