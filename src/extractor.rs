use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// A link discovered on a page, not yet scored. Identity is the resolved
/// absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    pub url: String,
    pub anchor_text: String,
}

pub struct Extraction {
    pub invalid_urls: usize,
    pub candidates: Vec<CandidateLink>,
}

const SCRIPT_REDIRECT_LABEL: &str = "(script redirect)";

// Client-side redirect targets inside inline scripts. These are navigable
// destinations that anchor scanning never sees.
static SCRIPT_REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:location\.href\s*=|location\.assign\(|location\.replace\()\s*['"]([^'"]+)['"]"#,
    )
    .unwrap()
});

/// Parse `html`, resolve every anchor href against `base_url`, and return
/// deduplicated candidates in discovery order. Malformed hrefs are counted,
/// not fatal.
pub fn extract(html: &str, base_url: &str) -> Extraction {
    let base = Url::parse(base_url).ok();
    let doc = Html::parse_document(html);

    let mut invalid = 0usize;
    // url -> index into `candidates`, so dedup keeps insertion order.
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut candidates: Vec<CandidateLink> = Vec::new();

    let mut push = |url: String, anchor: String| {
        match index.get(&url) {
            Some(&i) => {
                // Longer anchor text assumed the more descriptive label.
                if anchor.len() > candidates[i].anchor_text.len() {
                    candidates[i].anchor_text = anchor;
                }
            }
            None => {
                index.insert(url.clone(), candidates.len());
                candidates.push(CandidateLink {
                    url,
                    anchor_text: anchor,
                });
            }
        }
    };

    let anchor_sel = Selector::parse("a[href]").expect("static selector");
    for el in doc.select(&anchor_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        match resolve(base.as_ref(), href) {
            Resolved::Link(url) => {
                let text = el.text().collect::<Vec<_>>().join(" ");
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                push(url, text);
            }
            Resolved::Skipped => {}
            Resolved::Malformed => invalid += 1,
        }
    }

    let script_sel = Selector::parse("script").expect("static selector");
    for el in doc.select(&script_sel) {
        let body = el.text().collect::<String>();
        for cap in SCRIPT_REDIRECT.captures_iter(&body) {
            match resolve(base.as_ref(), &cap[1]) {
                Resolved::Link(url) => push(url, SCRIPT_REDIRECT_LABEL.to_string()),
                Resolved::Skipped => {}
                Resolved::Malformed => invalid += 1,
            }
        }
    }

    Extraction {
        invalid_urls: invalid,
        candidates,
    }
}

enum Resolved {
    Link(String),
    /// Well-formed but not a crawlable destination (fragment jump,
    /// mailto:/tel:/javascript: scheme).
    Skipped,
    Malformed,
}

fn resolve(base: Option<&Url>, href: &str) -> Resolved {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return Resolved::Skipped;
    }
    let resolved = match base {
        Some(b) => b.join(href),
        None => Url::parse(href),
    };
    match resolved {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Resolved::Link(url.to_string()),
        Ok(_) => Resolved::Skipped,
        Err(_) => Resolved::Malformed,
    }
}
