use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use url::Url;

use rival_watch::alerts::{FanoutSink, JsonlSink, LogSink};
use rival_watch::config::Settings;
use rival_watch::db::SqliteStore;
use rival_watch::fetch::{Fetch, HttpFetcher};
use rival_watch::limiter::HostLimiter;
use rival_watch::locator::PageLocator;
use rival_watch::model::{Category, Frequency, Significance};
use rival_watch::parser::{
    Extractor, Page, PortfolioExtractor, PricingExtractor, ServicesExtractor,
};
use rival_watch::runner::{RunFilter, Runner};
use rival_watch::store::{AlertSink, SnapshotStore};

#[derive(Parser)]
#[command(name = "rival_watch", about = "Competitor website monitoring and change detection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Manage monitored targets
    Target {
        #[command(subcommand)]
        command: TargetCommands,
    },
    /// Check due targets and record snapshots
    Run {
        /// Category to check (default: all)
        category: Option<Category>,
        /// Only this target id
        #[arg(short, long)]
        target: Option<i64>,
        /// Alert only on changes at or above this level (LOW, MEDIUM, HIGH, CRITICAL)
        #[arg(short, long)]
        min_significance: Option<Significance>,
        /// Ignore crawl frequency
        #[arg(short, long)]
        force: bool,
    },
    /// Extract one page and print the facts without storing anything
    Probe {
        url: Url,
        category: Category,
        /// Treat the URL as a site root and locate the category page first
        #[arg(short, long)]
        locate: bool,
    },
    /// Show recent snapshots of a target
    History {
        target: i64,
        category: Category,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Delete old snapshots, keeping the newest per target and category
    Prune {
        /// Snapshots to keep per pair (default: keep_snapshots setting)
        #[arg(short, long)]
        keep: Option<usize>,
        /// Only this target id
        #[arg(short, long)]
        target: Option<i64>,
        /// Only this category
        #[arg(short, long)]
        category: Option<Category>,
    },
    /// Show monitoring statistics
    Stats,
}

#[derive(Subcommand)]
enum TargetCommands {
    /// Add a domain, or update an existing one
    Add {
        domain: String,
        /// Canonical URL when the site does not live at https://<domain>/
        #[arg(short, long)]
        url: Option<String>,
        /// daily, weekly, biweekly or monthly
        #[arg(short, long, default_value = "weekly")]
        frequency: Frequency,
    },
    /// List all targets
    List,
    /// Resume monitoring a target
    Activate { id: i64 },
    /// Pause monitoring a target
    Deactivate { id: i64 },
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
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Init => {
            SqliteStore::open(&settings.database_path)?;
            println!("Database ready at {}", settings.database_path.display());
            Ok(())
        }
        Commands::Target { command } => target_command(&settings, command),
        Commands::Run {
            category,
            target,
            min_significance,
            force,
        } => {
            let store = Arc::new(SqliteStore::open(&settings.database_path)?);
            let runner = Runner::new(
                &settings,
                http_fetcher(&settings)?,
                store.clone(),
                store.clone(),
                alert_sink(&settings)?,
            )
            .with_progress(true);
            let filter = RunFilter {
                target_id: target,
                min_significance,
                force,
            };

            let categories = match category {
                Some(c) => vec![c],
                None => Category::ALL.to_vec(),
            };
            for category in categories {
                let s = runner.run_due(category, &filter).await?;
                println!(
                    "{:<10} {} checked: {} baseline, {} unchanged, {} changed, {} no data, \
                     {} failed, {} alerts",
                    category,
                    s.total,
                    s.baseline,
                    s.unchanged,
                    s.changed,
                    s.no_data,
                    s.failed,
                    s.alerts
                );
            }
            Ok(())
        }
        Commands::Probe {
            url,
            category,
            locate,
        } => probe(&settings, url, category, locate).await,
        Commands::History {
            target,
            category,
            limit,
        } => {
            let store = SqliteStore::open(&settings.database_path)?;
            let rows = store.history(target, category, limit)?;
            if rows.is_empty() {
                println!("No {} snapshots for target {}.", category, target);
                return Ok(());
            }

            println!(
                "{:>6} | {:<20} | {:<8} | {:>7} | {:<12} | {}",
                "#", "Created", "Level", "Changes", "Hash", "Source"
            );
            println!("{}", "-".repeat(90));
            for s in &rows {
                let level = s.significance.map(|l| l.as_str()).unwrap_or("-");
                println!(
                    "{:>6} | {:<20} | {:<8} | {:>7} | {:<12} | {}",
                    s.id.unwrap_or_default(),
                    s.created_at.format("%Y-%m-%d %H:%M"),
                    level,
                    s.changes.len(),
                    truncate(&s.content_hash, 12),
                    s.source_url
                );
                for c in &s.changes {
                    let level = c.significance.map(|l| l.as_str()).unwrap_or("-");
                    println!(
                        "         {:<8} {}: {} -> {}",
                        level,
                        c.field,
                        truncate(&c.before.to_string(), 40),
                        truncate(&c.after.to_string(), 40)
                    );
                }
            }
            Ok(())
        }
        Commands::Prune {
            keep,
            target,
            category,
        } => {
            let store = SqliteStore::open(&settings.database_path)?;
            let keep = keep.unwrap_or(settings.keep_snapshots);
            let categories = match category {
                Some(c) => vec![c],
                None => Category::ALL.to_vec(),
            };

            let mut deleted = 0;
            for t in store.list_targets()? {
                if target.is_some_and(|id| id != t.id) {
                    continue;
                }
                for &c in &categories {
                    deleted += store.delete_older_than(t.id, c, keep)?;
                }
            }
            println!(
                "Deleted {} snapshots (kept newest {} per target and category).",
                deleted, keep
            );
            Ok(())
        }
        Commands::Stats => {
            let store = SqliteStore::open(&settings.database_path)?;
            let s = store.get_stats()?;
            println!("Targets:   {} ({} active)", s.targets, s.active_targets);
            println!("Snapshots: {} ({} with changes)", s.snapshots, s.changed_snapshots);
            println!("Attempts:  {} ({} failed)", s.attempts, s.failed_attempts);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn target_command(settings: &Settings, command: TargetCommands) -> anyhow::Result<()> {
    let store = SqliteStore::open(&settings.database_path)?;
    match command {
        TargetCommands::Add {
            domain,
            url,
            frequency,
        } => {
            let id = store.add_target(&domain, url.as_deref(), frequency)?;
            println!("Target {} saved as #{}", domain, id);
        }
        TargetCommands::List => {
            let targets = store.list_targets()?;
            if targets.is_empty() {
                println!("No targets. Add one with 'target add <domain>'.");
                return Ok(());
            }
            println!(
                "{:>4} | {:<28} | {:<9} | {:<6} | {:<16} | {}",
                "#", "Domain", "Frequency", "Active", "Last crawl", "URL"
            );
            println!("{}", "-".repeat(90));
            for t in &targets {
                let last = t
                    .last_crawled_at
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".into());
                println!(
                    "{:>4} | {:<28} | {:<9} | {:<6} | {:<16} | {}",
                    t.id,
                    truncate(&t.domain, 28),
                    t.frequency,
                    if t.active { "yes" } else { "no" },
                    last,
                    t.canonical_url.as_deref().unwrap_or("-")
                );
            }
        }
        TargetCommands::Activate { id } => set_active(&store, id, true)?,
        TargetCommands::Deactivate { id } => set_active(&store, id, false)?,
    }
    Ok(())
}

fn set_active(store: &SqliteStore, id: i64, active: bool) -> anyhow::Result<()> {
    if !store.set_active(id, active)? {
        return Err(anyhow!("no target with id {}", id));
    }
    println!("Target #{} {}", id, if active { "activated" } else { "deactivated" });
    Ok(())
}

async fn probe(
    settings: &Settings,
    url: Url,
    category: Category,
    locate: bool,
) -> anyhow::Result<()> {
    match category {
        Category::Portfolio => probe_with(settings, PortfolioExtractor, url, locate).await,
        Category::Pricing => probe_with(settings, PricingExtractor, url, locate).await,
        Category::Services => probe_with(settings, ServicesExtractor, url, locate).await,
    }
}

async fn probe_with<E: Extractor>(
    settings: &Settings,
    extractor: E,
    url: Url,
    locate: bool,
) -> anyhow::Result<()> {
    let fetcher = http_fetcher(settings)?;
    let page_url = if locate {
        PageLocator::new(fetcher.clone())
            .locate(&url, extractor.candidate_paths(), extractor.keywords())
            .await
            .ok_or_else(|| anyhow!("no {} page found on {}", E::CATEGORY, url))?
    } else {
        url.clone()
    };
    println!("Page: {}", page_url);

    let html = fetcher.get(&page_url).await?;
    let homepage = if extractor.wants_homepage() {
        let root = url.join("/").context("building homepage URL")?;
        fetcher.get(&root).await.ok()
    } else {
        None
    };
    let facts = extractor.extract(&Page {
        html: &html,
        url: &page_url,
        homepage: homepage.as_deref(),
    });

    if extractor.is_empty(&facts) {
        println!("Nothing recognizable.");
    }
    println!("{}", serde_json::to_string_pretty(&facts)?);
    println!("--- Metrics ---");
    for (name, value) in extractor.metrics(&facts) {
        println!("  {}: {}", name, serde_json::to_string(&value)?);
    }
    Ok(())
}

fn http_fetcher(settings: &Settings) -> anyhow::Result<Arc<dyn Fetch>> {
    let limiter = Arc::new(HostLimiter::new(settings.request_delay()));
    Ok(Arc::new(HttpFetcher::new(settings, limiter)?))
}

fn alert_sink(settings: &Settings) -> anyhow::Result<Arc<dyn AlertSink>> {
    let mut sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(LogSink)];
    if let Some(path) = &settings.alerts_path {
        sinks.push(Box::new(JsonlSink::open(path)?));
    }
    Ok(Arc::new(FanoutSink(sinks)))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
