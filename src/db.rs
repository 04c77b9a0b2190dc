use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use crate::scorer::{LinkType, ScoredLink};

/// Score partition. Routing happens here, in the application, so the
/// invariant is testable in-process; there are no database triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shard {
    High,
    Medium,
    Low,
}

impl Shard {
    pub fn for_score(score: f64) -> Self {
        if score >= 0.7 {
            Shard::High
        } else if score >= 0.3 {
            Shard::Medium
        } else {
            Shard::Low
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Shard::High => "links_high",
            Shard::Medium => "links_medium",
            Shard::Low => "links_low",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Shard::High => "high",
            Shard::Medium => "medium",
            Shard::Low => "low",
        }
    }

    pub fn all() -> [Shard; 3] {
        [Shard::High, Shard::Medium, Shard::Low]
    }

    fn others(&self) -> [Shard; 2] {
        match self {
            Shard::High => [Shard::Medium, Shard::Low],
            Shard::Medium => [Shard::High, Shard::Low],
            Shard::Low => [Shard::High, Shard::Medium],
        }
    }
}

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = std::path::Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS links_high (
            id          TEXT PRIMARY KEY,
            url         TEXT UNIQUE NOT NULL,
            anchor_text TEXT NOT NULL,
            score       REAL NOT NULL CHECK(score >= 0.7),
            keywords    TEXT NOT NULL,
            parent_url  TEXT NOT NULL,
            type        TEXT NOT NULL CHECK(type IN ('document','contact','general')),
            crawled_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_links_high_score ON links_high(score);

        CREATE TABLE IF NOT EXISTS links_medium (
            id          TEXT PRIMARY KEY,
            url         TEXT UNIQUE NOT NULL,
            anchor_text TEXT NOT NULL,
            score       REAL NOT NULL CHECK(score >= 0.3 AND score < 0.7),
            keywords    TEXT NOT NULL,
            parent_url  TEXT NOT NULL,
            type        TEXT NOT NULL CHECK(type IN ('document','contact','general')),
            crawled_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_links_medium_score ON links_medium(score);

        CREATE TABLE IF NOT EXISTS links_low (
            id          TEXT PRIMARY KEY,
            url         TEXT UNIQUE NOT NULL,
            anchor_text TEXT NOT NULL,
            score       REAL NOT NULL CHECK(score >= 0.0 AND score < 0.3),
            keywords    TEXT NOT NULL,
            parent_url  TEXT NOT NULL,
            type        TEXT NOT NULL CHECK(type IN ('document','contact','general')),
            crawled_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_links_low_score ON links_low(score);

        CREATE VIEW IF NOT EXISTS links AS
            SELECT 'high' AS shard, id, url, anchor_text, score, keywords,
                   parent_url, type, crawled_at FROM links_high
            UNION ALL
            SELECT 'medium', id, url, anchor_text, score, keywords,
                   parent_url, type, crawled_at FROM links_medium
            UNION ALL
            SELECT 'low', id, url, anchor_text, score, keywords,
                   parent_url, type, crawled_at FROM links_low;
        ",
    )?;
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LinkRecord {
    pub id: String,
    pub shard: String,
    pub url: String,
    pub anchor_text: String,
    pub score: f64,
    pub keywords: Vec<String>,
    pub parent_url: String,
    pub link_type: LinkType,
    pub crawled_at: String,
}

#[derive(Debug, Default)]
pub struct UpsertStats {
    pub stored: usize,
    pub skipped: usize,
}

fn upsert_sql(shard: Shard) -> String {
    format!(
        "INSERT INTO {} (id, url, anchor_text, score, keywords, parent_url, type, crawled_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(url) DO UPDATE SET
             anchor_text = excluded.anchor_text,
             score       = excluded.score,
             keywords    = excluded.keywords,
             parent_url  = excluded.parent_url,
             type        = excluded.type,
             crawled_at  = excluded.crawled_at",
        shard.table()
    )
}

/// Insert or refresh one link. The shard is recomputed from the score; if a
/// prior store put this url in a different shard, that row is deleted in the
/// same transaction so the url never exists in two shards at once. The move
/// is all-or-nothing: an insert failure rolls the delete back too.
pub fn upsert_one(conn: &Connection, link: &ScoredLink, parent_url: &str) -> Result<()> {
    let shard = Shard::for_score(link.score);
    let tx = conn.unchecked_transaction()?;
    write_row(&tx, shard, link, parent_url)?;
    tx.commit()?;
    Ok(())
}

fn write_row(
    tx: &rusqlite::Transaction,
    shard: Shard,
    link: &ScoredLink,
    parent_url: &str,
) -> Result<()> {
    for other in shard.others() {
        tx.execute(
            &format!("DELETE FROM {} WHERE url = ?1", other.table()),
            rusqlite::params![link.url],
        )?;
    }
    tx.execute(
        &upsert_sql(shard),
        rusqlite::params![
            Uuid::now_v7().to_string(),
            link.url,
            link.anchor_text,
            link.score,
            serde_json::to_string(&link.keywords)?,
            parent_url,
            link.link_type.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Persist a scrape's links, grouped by target shard, one transaction per
/// shard. Each row writes under a savepoint: a failing row is rolled back
/// whole (its cross-shard delete included), logged, and skipped; the rest
/// of its batch commits.
pub fn bulk_upsert(conn: &Connection, links: &[ScoredLink], parent_url: &str) -> Result<UpsertStats> {
    let mut stats = UpsertStats::default();

    for shard in Shard::all() {
        let batch: Vec<&ScoredLink> = links
            .iter()
            .filter(|l| Shard::for_score(l.score) == shard)
            .collect();
        if batch.is_empty() {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        for link in batch {
            tx.execute_batch("SAVEPOINT row_write")?;
            match write_row(&tx, shard, link, parent_url) {
                Ok(()) => {
                    tx.execute_batch("RELEASE row_write")?;
                    stats.stored += 1;
                }
                Err(e) => {
                    tx.execute_batch("ROLLBACK TO row_write; RELEASE row_write")?;
                    warn!(url = %link.url, error = %e, "skipping unstorable link");
                    stats.skipped += 1;
                }
            }
        }
        tx.commit()?;
    }

    Ok(stats)
}

// ── Queries ──

#[derive(Debug, Default, Clone)]
pub struct QueryFilters {
    pub min_score: Option<f64>,
    pub keyword: Option<String>,
    pub parent_url: Option<String>,
    pub page: usize,
}

pub fn query_links(
    conn: &Connection,
    filters: &QueryFilters,
    page_size: usize,
) -> Result<Vec<LinkRecord>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(min) = filters.min_score {
        conditions.push(format!("score >= ?{}", params.len() + 1));
        params.push(Box::new(min));
    }
    if let Some(kw) = &filters.keyword {
        conditions.push(format!("keywords LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("%{}%", kw)));
    }
    if let Some(prefix) = &filters.parent_url {
        conditions.push(format!("parent_url LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("{}%", prefix)));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT shard, id, url, anchor_text, score, keywords, parent_url, type, crawled_at
         FROM links{}
         ORDER BY score DESC
         LIMIT {} OFFSET {}",
        where_clause,
        page_size,
        filters.page * page_size
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<LinkRecord>> {
    let mut stmt = conn.prepare(
        "SELECT shard, id, url, anchor_text, score, keywords, parent_url, type, crawled_at
         FROM links WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(rusqlite::params![id], row_to_record)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<LinkRecord> {
    let keywords_json: String = row.get(5)?;
    let type_str: String = row.get(7)?;
    Ok(LinkRecord {
        shard: row.get(0)?,
        id: row.get(1)?,
        url: row.get(2)?,
        anchor_text: row.get(3)?,
        score: row.get(4)?,
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        parent_url: row.get(6)?,
        link_type: LinkType::parse(&type_str).unwrap_or(LinkType::General),
        crawled_at: row.get(8)?,
    })
}

// ── Stats ──

pub struct ShardStats {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl ShardStats {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

pub fn shard_stats(conn: &Connection) -> Result<ShardStats> {
    let count = |table: &str| -> Result<usize> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
    };
    Ok(ShardStats {
        high: count("links_high")?,
        medium: count("links_medium")?,
        low: count("links_low")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::LinkType;

    fn mem_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn link(url: &str, score: f64) -> ScoredLink {
        ScoredLink {
            url: url.to_string(),
            anchor_text: "anchor".to_string(),
            keywords: vec!["budget".to_string()],
            link_type: LinkType::General,
            score,
        }
    }

    #[test]
    fn shard_routing_boundaries() {
        assert_eq!(Shard::for_score(0.7), Shard::High);
        assert_eq!(Shard::for_score(5.4), Shard::High);
        assert_eq!(Shard::for_score(0.69), Shard::Medium);
        assert_eq!(Shard::for_score(0.3), Shard::Medium);
        assert_eq!(Shard::for_score(0.29), Shard::Low);
        assert_eq!(Shard::for_score(0.0), Shard::Low);
    }

    #[test]
    fn upsert_routes_to_shard() {
        let conn = mem_conn();
        upsert_one(&conn, &link("https://a.gov/x", 2.5), "https://a.gov").unwrap();
        let stats = shard_stats(&conn).unwrap();
        assert_eq!((stats.high, stats.medium, stats.low), (1, 0, 0));
    }

    #[test]
    fn upsert_same_score_is_idempotent() {
        let conn = mem_conn();
        let l = link("https://a.gov/x", 2.5);
        upsert_one(&conn, &l, "https://a.gov").unwrap();
        let first = query_links(&conn, &QueryFilters::default(), 10).unwrap();
        upsert_one(&conn, &l, "https://a.gov").unwrap();
        let second = query_links(&conn, &QueryFilters::default(), 10).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn changed_score_moves_shard_without_stale_copy() {
        let conn = mem_conn();
        let url = "https://a.gov/x";
        upsert_one(&conn, &link(url, 2.5), "https://a.gov").unwrap();
        upsert_one(&conn, &link(url, 0.1), "https://a.gov").unwrap();

        let stats = shard_stats(&conn).unwrap();
        assert_eq!((stats.high, stats.medium, stats.low), (0, 0, 1));

        let all = query_links(&conn, &QueryFilters::default(), 10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].shard, "low");
        assert!((all[0].score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn score_always_inside_shard_range() {
        let conn = mem_conn();
        for (i, score) in [0.0, 0.1, 0.3, 0.5, 0.7, 1.0, 5.4].iter().enumerate() {
            upsert_one(&conn, &link(&format!("https://a.gov/{i}"), *score), "p").unwrap();
        }
        for rec in query_links(&conn, &QueryFilters::default(), 50).unwrap() {
            assert_eq!(Shard::for_score(rec.score).name(), rec.shard);
        }
    }

    #[test]
    fn bulk_upsert_skips_bad_row_and_keeps_rest() {
        let conn = mem_conn();
        let links = vec![
            link("https://a.gov/good1", 1.0),
            // Negative score violates the low shard CHECK; skipped, not fatal.
            link("https://a.gov/bad", -1.0),
            link("https://a.gov/good2", 0.1),
        ];
        let stats = bulk_upsert(&conn, &links, "https://a.gov").unwrap();
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(shard_stats(&conn).unwrap().total(), 2);
    }

    #[test]
    fn failed_replacement_preserves_prior_record() {
        let conn = mem_conn();
        let url = "https://a.gov/x";
        upsert_one(&conn, &link(url, 2.5), "https://a.gov").unwrap();

        // The replacement routes to the low shard but violates its CHECK;
        // the row must fail whole, leaving the high-shard record in place.
        let stats = bulk_upsert(&conn, &[link(url, -1.0)], "https://a.gov").unwrap();
        assert_eq!(stats.stored, 0);
        assert_eq!(stats.skipped, 1);

        let s = shard_stats(&conn).unwrap();
        assert_eq!((s.high, s.medium, s.low), (1, 0, 0));
        let all = query_links(&conn, &QueryFilters::default(), 10).unwrap();
        assert_eq!(all.len(), 1);
        assert!((all[0].score - 2.5).abs() < 1e-9);
    }

    #[test]
    fn min_score_query_hits_only_high_shard() {
        let conn = mem_conn();
        upsert_one(&conn, &link("https://a.gov/hi", 2.5), "p").unwrap();
        upsert_one(&conn, &link("https://a.gov/mid", 0.5), "p").unwrap();
        upsert_one(&conn, &link("https://a.gov/lo", 0.1), "p").unwrap();

        let filters = QueryFilters {
            min_score: Some(0.7),
            ..Default::default()
        };
        let rows = query_links(&conn, &filters, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.iter().all(|r| r.shard == "high"));
    }

    #[test]
    fn query_orders_descending_and_paginates() {
        let conn = mem_conn();
        for i in 0..5 {
            upsert_one(&conn, &link(&format!("https://a.gov/{i}"), i as f64), "p").unwrap();
        }
        let page0 = query_links(&conn, &QueryFilters::default(), 2).unwrap();
        assert_eq!(page0.len(), 2);
        assert!(page0[0].score >= page0[1].score);

        let page1 = query_links(
            &conn,
            &QueryFilters {
                page: 1,
                ..Default::default()
            },
            2,
        )
        .unwrap();
        assert!(page0[1].score >= page1[0].score);
    }

    #[test]
    fn keyword_and_parent_filters() {
        let conn = mem_conn();
        let mut l = link("https://a.gov/x", 1.0);
        l.keywords = vec!["acfr".to_string(), "document".to_string()];
        upsert_one(&conn, &l, "https://a.gov/finance").unwrap();
        upsert_one(&conn, &link("https://b.org/y", 1.0), "https://b.org").unwrap();

        let by_kw = query_links(
            &conn,
            &QueryFilters {
                keyword: Some("acfr".into()),
                ..Default::default()
            },
            10,
        )
        .unwrap();
        assert_eq!(by_kw.len(), 1);
        assert_eq!(by_kw[0].url, "https://a.gov/x");

        let by_parent = query_links(
            &conn,
            &QueryFilters {
                parent_url: Some("https://b.org".into()),
                ..Default::default()
            },
            10,
        )
        .unwrap();
        assert_eq!(by_parent.len(), 1);
        assert_eq!(by_parent[0].url, "https://b.org/y");
    }

    #[test]
    fn keywords_round_trip() {
        let conn = mem_conn();
        let mut l = link("https://a.gov/x", 1.0);
        l.keywords = vec!["acfr".to_string(), "finance director".to_string()];
        upsert_one(&conn, &l, "p").unwrap();
        let rec = query_links(&conn, &QueryFilters::default(), 10).unwrap();
        assert_eq!(rec[0].keywords, l.keywords);
    }

    #[test]
    fn get_by_id_found_and_missing() {
        let conn = mem_conn();
        upsert_one(&conn, &link("https://a.gov/x", 1.0), "p").unwrap();
        let rec = &query_links(&conn, &QueryFilters::default(), 10).unwrap()[0];
        let found = get_by_id(&conn, &rec.id).unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().url, "https://a.gov/x");
        assert!(get_by_id(&conn, "no-such-id").unwrap().is_none());
    }
}
