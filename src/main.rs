mod browser;
mod config;
mod db;
mod error;
mod extractor;
mod fetcher;
mod pipeline;
mod scorer;

use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::{Config, ScoreConfig};
use crate::db::QueryFilters;
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "linkscout", about = "Scrape a page and rank its links by relevance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page, score its links, and store them
    Scrape {
        /// Target page URL
        url: String,
        /// Print the ranked list without persisting
        #[arg(long)]
        dry_run: bool,
        /// Max links to display
        #[arg(short = 'n', long, default_value = "25")]
        limit: usize,
        /// Emit the ranked list as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Query stored links across all shards
    Query {
        /// Minimum score
        #[arg(long)]
        min_score: Option<f64>,
        /// Keyword substring filter
        #[arg(short, long)]
        keyword: Option<String>,
        /// Parent page URL prefix
        #[arg(short, long)]
        parent_url: Option<String>,
        /// Zero-based result page
        #[arg(long, default_value = "0")]
        page: usize,
        /// Emit rows as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one stored link by id
    Get {
        id: String,
        /// Emit the record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Per-shard row counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let cfg = Config::from_env();

    let result = match cli.command {
        Commands::Scrape { url, dry_run, limit, json } => {
            if url::Url::parse(&url).is_err() {
                anyhow::bail!("invalid URL: {url}");
            }
            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;

            let pipeline = Pipeline::new(cfg, ScoreConfig::default())?;
            let outcome = if dry_run {
                let r = pipeline.scrape_unstored(&url).await;
                pipeline.shutdown().await;
                r?
            } else {
                let r = pipeline.scrape(&conn, &url).await;
                pipeline.shutdown().await;
                r?
            };

            if json {
                let shown: Vec<_> = outcome.links.iter().take(limit).collect();
                println!("{}", serde_json::to_string_pretty(&shown)?);
                return Ok(());
            }

            println!(
                "{:>3} | {:>6} | {:<8} | {:<30} | {}",
                "#", "Score", "Type", "Anchor", "URL"
            );
            println!("{}", "-".repeat(100));
            for (i, link) in outcome.links.iter().take(limit).enumerate() {
                println!(
                    "{:>3} | {:>6.2} | {:<8} | {:<30} | {}",
                    i + 1,
                    link.score,
                    link.link_type.as_str(),
                    truncate(&link.anchor_text, 30),
                    truncate(&link.url, 60),
                );
            }

            println!(
                "\n{} links ({} invalid hrefs skipped), total score {:.2}, {} stored, {} skipped",
                outcome.links.len(),
                outcome.invalid_urls,
                outcome.total_score(),
                outcome.stored,
                outcome.skipped,
            );
            println!(
                "fetch {:.1}s | extract {:.2}s | score {:.2}s | persist {:.2}s",
                outcome.fetch_time.as_secs_f64(),
                outcome.extract_time.as_secs_f64(),
                outcome.score_time.as_secs_f64(),
                outcome.persist_time.as_secs_f64(),
            );
            Ok(())
        }
        Commands::Query { min_score, keyword, parent_url, page, json } => {
            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;
            let filters = QueryFilters {
                min_score,
                keyword,
                parent_url,
                page,
            };
            let rows = db::query_links(&conn, &filters, cfg.page_size)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("No matching links.");
                return Ok(());
            }
            for r in &rows {
                println!(
                    "{:>6.2} [{:<6}] {:<8} {}  ({})",
                    r.score,
                    r.shard,
                    r.link_type.as_str(),
                    truncate(&r.url, 60),
                    r.id,
                );
            }
            println!("\n{} rows (page {})", rows.len(), page);
            Ok(())
        }
        Commands::Get { id, json } => {
            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;
            match db::get_by_id(&conn, &id)? {
                Some(r) if json => println!("{}", serde_json::to_string_pretty(&r)?),
                Some(r) => {
                    println!("id:          {}", r.id);
                    println!("url:         {}", r.url);
                    println!("anchor_text: {}", r.anchor_text);
                    println!("score:       {:.2} ({} shard)", r.score, r.shard);
                    println!("keywords:    {}", r.keywords.join(", "));
                    println!("type:        {}", r.link_type.as_str());
                    println!("parent_url:  {}", r.parent_url);
                    println!("crawled_at:  {}", r.crawled_at);
                }
                None => println!("No link with id {id}"),
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;
            let s = db::shard_stats(&conn)?;
            println!("high:   {}", s.high);
            println!("medium: {}", s.medium);
            println!("low:    {}", s.low);
            println!("total:  {}", s.total());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
