use serde::Serialize;

use crate::config::ScoreConfig;
use crate::extractor::CandidateLink;

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "csv"];

// URL path fragments that mark a page as a contact/staff page regardless of
// anchor text.
const CONTACT_PATHS: &[&str] = &["/contact", "contact-us", "staff-directory", "leadership-team"];

const DOCUMENT_MULTIPLIER: f64 = 1.2;
const CONTACT_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Document,
    Contact,
    General,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Document => "document",
            LinkType::Contact => "contact",
            LinkType::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(LinkType::Document),
            "contact" => Some(LinkType::Contact),
            "general" => Some(LinkType::General),
            _ => None,
        }
    }

    fn multiplier(&self) -> f64 {
        match self {
            LinkType::Document => DOCUMENT_MULTIPLIER,
            LinkType::Contact => CONTACT_MULTIPLIER,
            LinkType::General => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredLink {
    pub url: String,
    pub anchor_text: String,
    pub keywords: Vec<String>,
    pub link_type: LinkType,
    pub score: f64,
}

/// Pure scoring engine. Holds only the immutable weight table, so scoring is
/// deterministic and safe to run in parallel.
pub struct Scorer {
    config: ScoreConfig,
}

impl Scorer {
    pub fn new(config: ScoreConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, candidate: &CandidateLink) -> ScoredLink {
        let haystack = format!("{} {}", candidate.anchor_text, candidate.url).to_lowercase();

        let mut keywords: Vec<String> = self
            .config
            .weights
            .iter()
            .filter(|(kw, _)| haystack.contains(kw.as_str()))
            .map(|(kw, _)| kw.clone())
            .collect();

        if has_document_extension(&candidate.url) && !keywords.iter().any(|k| k == "document") {
            keywords.push("document".to_string());
        }

        let link_type = classify(&candidate.url, &keywords);

        let score = if keywords.is_empty() {
            0.0
        } else {
            let sum: f64 = keywords
                .iter()
                .map(|kw| self.config.weight_of(kw).unwrap_or(0.0))
                .sum();
            sum * link_type.multiplier()
        };

        ScoredLink {
            url: candidate.url.clone(),
            anchor_text: candidate.anchor_text.clone(),
            keywords,
            link_type,
            score,
        }
    }

    /// Score every candidate and sort descending. The sort is stable, so
    /// equal scores keep their extraction order.
    pub fn rank(&self, candidates: &[CandidateLink]) -> Vec<ScoredLink> {
        let mut scored: Vec<ScoredLink> = candidates.iter().map(|c| self.score(c)).collect();
        sort_desc(&mut scored);
        scored
    }

    /// `rank` over a rayon pool. Scoring is pure, and par_iter's collect
    /// keeps input order, so the result is identical to the serial path.
    pub fn rank_par(&self, candidates: &[CandidateLink]) -> Vec<ScoredLink> {
        use rayon::prelude::*;
        let mut scored: Vec<ScoredLink> = candidates.par_iter().map(|c| self.score(c)).collect();
        sort_desc(&mut scored);
        scored
    }
}

/// Stable descending sort by score.
pub fn sort_desc(links: &mut [ScoredLink]) {
    links.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn url_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => u.path().to_lowercase(),
        Err(_) => url.to_lowercase(),
    }
}

fn has_document_extension(url: &str) -> bool {
    let path = url_path(url);
    DOCUMENT_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(&format!(".{ext}")))
}

fn classify(url: &str, keywords: &[String]) -> LinkType {
    let path = url_path(url);
    // Path signal wins over keyword signal.
    if CONTACT_PATHS.iter().any(|frag| path.contains(frag)) {
        return LinkType::Contact;
    }
    if keywords.iter().any(|k| k == "document") {
        return LinkType::Document;
    }
    if keywords.iter().any(|k| k == "contact") {
        return LinkType::Contact;
    }
    LinkType::General
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> Scorer {
        Scorer::new(ScoreConfig::default())
    }

    fn candidate(url: &str, anchor: &str) -> CandidateLink {
        CandidateLink {
            url: url.to_string(),
            anchor_text: anchor.to_string(),
        }
    }

    #[test]
    fn budget_anchor_scores_general() {
        let s = scorer().score(&candidate("https://city.gov/budget", "Annual Budget"));
        assert_eq!(s.keywords, vec!["budget"]);
        assert_eq!(s.link_type, LinkType::General);
        assert!((s.score - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn acfr_pdf_scores_document() {
        let s = scorer().score(&candidate("https://city.gov/files/report.pdf", "ACFR 2024"));
        assert_eq!(s.keywords, vec!["acfr", "document"]);
        assert_eq!(s.link_type, LinkType::Document);
        assert!((s.score - 5.4).abs() < 1e-9);
    }

    #[test]
    fn contact_path_wins_over_anchor() {
        let s = scorer().score(&candidate("https://city.gov/contact-us", "Random label"));
        assert_eq!(s.link_type, LinkType::Contact);
        // "contact" matches via the URL substring, so the multiplier applies
        // to a nonzero sum.
        assert!((s.score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn no_keywords_scores_zero() {
        let s = scorer().score(&candidate("https://city.gov/news", "Latest News"));
        assert!(s.keywords.is_empty());
        assert_eq!(s.score, 0.0);
        assert_eq!(s.link_type, LinkType::General);
    }

    #[test]
    fn document_extension_without_substring_match() {
        let s = scorer().score(&candidate("https://city.gov/files/q3.xlsx", "Quarterly figures"));
        assert_eq!(s.keywords, vec!["document"]);
        assert_eq!(s.link_type, LinkType::Document);
        assert!((s.score - 1.5 * 1.2).abs() < 1e-9);
    }

    #[test]
    fn multi_word_phrase_matches() {
        let s = scorer().score(&candidate("https://city.gov/staff", "Finance Director"));
        assert!(s.keywords.contains(&"finance director".to_string()));
    }

    #[test]
    fn score_is_deterministic() {
        let c = candidate("https://city.gov/budget/acfr.pdf", "ACFR Budget");
        let a = scorer().score(&c);
        let b = scorer().score(&c);
        assert_eq!(a.score, b.score);
        assert_eq!(a.keywords, b.keywords);
        assert!(a.score >= 0.0);
    }

    #[test]
    fn rank_descending_and_stable() {
        let candidates = vec![
            candidate("https://a.gov/page1", "nothing"),
            candidate("https://a.gov/budget", "Budget"),
            candidate("https://a.gov/page2", "nothing either"),
            candidate("https://a.gov/acfr.pdf", "ACFR"),
        ];
        let ranked = scorer().rank(&candidates);
        assert_eq!(ranked[0].url, "https://a.gov/acfr.pdf");
        assert_eq!(ranked[1].url, "https://a.gov/budget");
        // Two zero-score links keep extraction order.
        assert_eq!(ranked[2].url, "https://a.gov/page1");
        assert_eq!(ranked[3].url, "https://a.gov/page2");
    }

    #[test]
    fn parallel_rank_matches_serial() {
        let candidates = vec![
            candidate("https://a.gov/acfr.pdf", "ACFR"),
            candidate("https://a.gov/page", "nothing"),
            candidate("https://a.gov/budget", "Budget"),
            candidate("https://a.gov/other", "also nothing"),
        ];
        let s = scorer();
        let serial = s.rank(&candidates);
        let parallel = s.rank_par(&candidates);
        let flat = |v: &[ScoredLink]| -> Vec<(String, f64)> {
            v.iter().map(|l| (l.url.clone(), l.score)).collect()
        };
        assert_eq!(flat(&serial), flat(&parallel));
    }

    #[test]
    fn scored_link_serializes_to_json() {
        let s = scorer().score(&candidate("https://city.gov/budget", "Annual Budget"));
        let v: serde_json::Value = serde_json::to_value(&s).unwrap();
        assert_eq!(v["url"], "https://city.gov/budget");
        assert_eq!(v["link_type"], "general");
        assert_eq!(v["keywords"][0], "budget");
        assert!((v["score"].as_f64().unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn link_type_round_trip() {
        for t in [LinkType::Document, LinkType::Contact, LinkType::General] {
            assert_eq!(LinkType::parse(t.as_str()), Some(t));
        }
        assert_eq!(LinkType::parse("bogus"), None);
    }
}
