//! Toonkor CLI - webcomic scraper and chapter downloader.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use toonkor::client::SiteClient;
use toonkor::config::Config;
use toonkor::console::{Console, Style};
use toonkor::downloader::{Collaborators, Downloader};
use toonkor::fetch::FetchExecutor;
use toonkor::layout::{MediaLayout, progress_topic};
use toonkor::pool::WorkerPool;
use toonkor::progress::{ConsoleSink, LogHandoff};
use toonkor::scrapers::{CatalogEntry, ComicType, Listing, SearchFilters, SortOrder, ToonkorScraper};
use toonkor::store::{JsonStatusStore, StatusStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Toonkor webcomic scraper and chapter downloader.
#[derive(Parser, Debug)]
#[command(name = "toonkor")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List popular webtoons.
    Popular,

    /// List recently updated webtoons.
    Latest,

    /// Search by title, or browse a filtered catalog without a query.
    Search {
        query: Option<String>,

        /// Comic type: webtoons, manga or hentai.
        #[arg(long = "type")]
        kind: Option<ComicType>,

        /// Sort order: popular, latest or completed.
        #[arg(long)]
        sort: Option<SortOrder>,
    },

    /// Match several titles against the site, first hit each.
    Match {
        #[arg(required = true)]
        titles: Vec<String>,
    },

    /// Show a comic and its chapters.
    Details {
        /// Comic id, e.g. `/abc`.
        id: String,
    },

    /// Download chapters of a comic.
    Download {
        id: String,

        /// Chapter indices (0 is the oldest chapter).
        #[arg(required = true)]
        chapters: Vec<usize>,

        /// Hand downloaded chapters to the translation workflow.
        #[arg(long)]
        translate: bool,
    },

    /// Record that a chapter has been translated.
    MarkTranslated { id: String, index: usize },

    /// Show, set or discover the site mirror.
    Mirror {
        /// Use this mirror URL from now on.
        #[arg(long, conflicts_with = "discover")]
        set: Option<String>,

        /// Look up the newest mirror on the mirror channel.
        #[arg(long)]
        discover: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let console = Console::new();

    let mut config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    init_tracing(config.site.debug);

    let client = Arc::new(SiteClient::new(&config.site).context("Failed to build HTTP client")?);
    let pool = WorkerPool::new(config.download.worker_count());
    let scraper = Arc::new(ToonkorScraper::new(
        client.clone(),
        pool,
        config.site.mirror_channel_url.clone(),
    ));

    match args.command {
        Command::Popular => {
            let entries = scraper.list_catalog(Listing::Popular, 1).await?;
            print_entries(&console, "Popular", &entries);
        }
        Command::Latest => {
            let entries = scraper.list_catalog(Listing::Latest, 1).await?;
            print_entries(&console, "Latest", &entries);
        }
        Command::Search { query, kind, sort } => {
            let filters = match (kind, sort) {
                (None, None) => None,
                (kind, sort) => {
                    let defaults = SearchFilters::default();
                    Some(SearchFilters {
                        kind: kind.unwrap_or(defaults.kind),
                        sort: sort.unwrap_or(defaults.sort),
                    })
                }
            };
            let entries = scraper
                .search(query.as_deref(), filters)
                .await
                .context("Search failed")?;
            print_entries(&console, "Search results", &entries);
        }
        Command::Match { titles } => {
            let total = titles.len();
            let matches = scraper.search_many(titles).await;
            console.section(&format!("Matched {} of {}", matches.len(), total));
            for (title, entry) in matches {
                println!("{} -> {} {}", title, entry.title, console.muted(&entry.id));
            }
        }
        Command::Details { id } => {
            let store = open_store(&config).await?;
            let known = store.list(&id).await?;
            let details = scraper
                .get_comic_details(&id, &known)
                .await
                .context("Failed to fetch comic details")?;

            console.section(&details.title);
            console.info(&format!("Author: {}", details.author));
            if !details.description.is_empty() {
                println!("{}", details.description);
            }
            println!();
            for chapter in &details.chapters {
                let date = chapter
                    .upload_date
                    .map(|d| d.to_string())
                    .unwrap_or_default();
                println!(
                    "{:>4}  {:<10}  {}  {}",
                    chapter.index,
                    date,
                    console.status(chapter.status, false),
                    console.muted(&chapter.chapter_id)
                );
            }
        }
        Command::Download {
            id,
            chapters,
            translate,
        } => {
            let downloader = build_downloader(&config, &client, &scraper, console).await?;
            let payload = serde_json::json!({
                "task": if translate { "download_and_translate" } else { "download" },
                "chapters": chapters,
            });

            console.section(&format!("Downloading {}", id));
            console.step(&format!(
                "Media directory: {}",
                downloader.layout().comic_dir(&id).display()
            ));
            downloader
                .append(&id, &progress_topic(&id), &payload.to_string())
                .await
                .context("Invalid download request")?;
            downloader.wait_idle(&id).await;
            console.success("Done");
        }
        Command::MarkTranslated { id, index } => {
            let downloader = build_downloader(&config, &client, &scraper, console).await?;
            downloader.mark_translated(&id, index, 1.0).await?;
        }
        Command::Mirror { set, discover } => {
            let candidate = if let Some(url) = set {
                Some(url)
            } else if discover {
                console.step("Checking mirror channel...");
                let found = scraper
                    .discover_mirror()
                    .await
                    .context("Failed to read mirror channel")?;
                if found.is_none() {
                    console.warning("No mirror announced on the channel");
                }
                found
            } else {
                console.info(&format!("Current mirror: {}", scraper.base_url()));
                if scraper.check_mirror(scraper.base_url()).await {
                    console.success("Mirror is reachable");
                } else {
                    console.warning("Mirror is not reachable");
                }
                None
            };

            if let Some(url) = candidate {
                let url = url.trim_end_matches('/').to_string();
                if !scraper.check_mirror(&url).await {
                    anyhow::bail!("Mirror is not reachable: {}", url);
                }
                config.site.base_url = url.clone();
                config.validate().context("Invalid mirror URL")?;
                config.save().context("Failed to save configuration")?;
                console.success(&format!("Mirror set to {}", url));
            }
        }
    }

    Ok(())
}

fn init_tracing(debug: bool) {
    let default = if debug { "toonkor=debug" } else { "toonkor=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_store(config: &Config) -> Result<Arc<JsonStatusStore>> {
    let path = config.status_file()?;
    let store = JsonStatusStore::open(&path)
        .await
        .with_context(|| format!("Failed to open status file {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn build_downloader(
    config: &Config,
    client: &Arc<SiteClient>,
    scraper: &Arc<ToonkorScraper>,
    console: Console,
) -> Result<Downloader> {
    let collab = Collaborators {
        source: scraper.clone(),
        store: open_store(config).await?,
        sink: Arc::new(ConsoleSink::new(console)),
        handoff: Arc::new(LogHandoff),
    };
    let fetcher = FetchExecutor::new(
        client.clone(),
        WorkerPool::new(config.download.worker_count()),
        config.download.fetch_timeout(),
    );

    Ok(Downloader::new(
        collab,
        fetcher,
        MediaLayout::new(config.media_dir()?),
        config.download.details_ttl(),
    ))
}

fn print_entries(console: &Console, heading: &str, entries: &[CatalogEntry]) {
    console.section(&format!("{} ({})", heading, entries.len()));
    for entry in entries {
        println!(
            "{}  {}",
            console.style(&entry.title, &[Style::Bold]),
            console.muted(&entry.id)
        );
    }
}
