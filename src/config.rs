use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Runtime configuration, read once at startup from LINKSCOUT_* variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// Max simultaneously open browser pages across all jobs.
    pub max_browsers: usize,
    pub http_timeout: Duration,
    pub nav_timeout: Duration,
    /// Bodies shorter than this are treated as render-needed.
    pub min_content_len: usize,
    pub page_size: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let default_browsers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .clamp(1, 8);

        Self {
            db_path: std::env::var("LINKSCOUT_DB").unwrap_or_else(|_| "data/links.sqlite".into()),
            max_browsers: env_or("LINKSCOUT_MAX_BROWSERS", default_browsers),
            http_timeout: Duration::from_secs(env_or("LINKSCOUT_HTTP_TIMEOUT_SECS", 10)),
            nav_timeout: Duration::from_secs(env_or("LINKSCOUT_NAV_TIMEOUT_SECS", 20)),
            min_content_len: env_or("LINKSCOUT_MIN_CONTENT_LEN", 512),
            page_size: env_or("LINKSCOUT_PAGE_SIZE", 20),
        }
    }
}

/// Keyword-weight table for the scorer. Immutable once built; the scorer
/// takes it by value at construction so there is no process-wide state.
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    /// Keyword phrase -> weight, in match/report order.
    pub weights: Vec<(String, f64)>,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            weights: vec![
                ("acfr".into(), 3.0),
                ("budget".into(), 2.5),
                ("finance director".into(), 2.0),
                ("contact".into(), 2.0),
                ("document".into(), 1.5),
            ],
        }
    }
}

impl ScoreConfig {
    pub fn weight_of(&self, keyword: &str) -> Option<f64> {
        self.weights
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, w)| *w)
    }
}
