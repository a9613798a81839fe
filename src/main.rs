use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use localfeed::config::Config;
use localfeed::feed::{
    AppLifecycle, FeedCacheController, FeedServices, NoScratch, ScratchCleaner, TempMediaDir,
    UserAnnotationCache,
};
use localfeed::remote::HttpBackend;
use localfeed::storage::{Database, DatabaseError, FeedItem, FeedOrdering, LocalFeedStore};

/// Get the config directory path (~/.config/localfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("localfeed"))
}

#[derive(Parser, Debug)]
#[command(name = "localfeed", about = "Paginated local cache for a location-scoped news feed")]
struct Cli {
    /// Config file (default: ~/.config/localfeed/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cache database (default: ~/.config/localfeed/feed_cache.db)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a filter key and scroll through it
    Browse {
        /// Filter key, e.g. a locality code
        key: String,

        /// Number of scroll-to-bottom triggers after the first page
        #[arg(long, default_value_t = 0)]
        pages: usize,

        #[command(flatten)]
        order: OrderArgs,
    },
    /// Reload a filter key from the first page
    Refresh {
        key: String,

        #[command(flatten)]
        order: OrderArgs,
    },
    /// Print cached items without touching the network
    Show {
        key: String,

        #[command(flatten)]
        order: OrderArgs,
    },
    /// Remove everything cached for a filter key
    Clear { key: String },
}

#[derive(Args, Debug)]
struct OrderArgs {
    /// Order by likes instead of recency
    #[arg(long)]
    trending: bool,
}

impl OrderArgs {
    fn ordering(&self) -> FeedOrdering {
        if self.trending {
            FeedOrdering::Trending
        } else {
            FeedOrdering::Recent
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // User-only access to the cache directory
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(config = ?config, "Effective configuration");

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config_dir.join("feed_cache.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another localfeed process is using {}. Please close it and try again.",
                db_path.display()
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    match cli.command {
        Command::Browse { key, pages, order } => {
            let ordering = order.ordering();
            let controller = build_controller(&config, db.clone(), ordering)?;
            browse(&controller, &db, &key, pages).await?;
            print_items(&db, &key, ordering).await
        }
        Command::Refresh { key, order } => {
            let ordering = order.ordering();
            let controller = build_controller(&config, db.clone(), ordering)?;
            if let Err(e) = controller.refresh(&key).await {
                eprintln!("Refresh failed: {e}");
                eprintln!("Cached items are unchanged.");
            }
            print_items(&db, &key, ordering).await
        }
        Command::Show { key, order } => print_items(&db, &key, order.ordering()).await,
        Command::Clear { key } => {
            let controller = build_controller(&config, db.clone(), FeedOrdering::Recent)?;
            let removed = controller
                .clear_cache(&key)
                .await
                .context("Failed to clear cache")?;
            println!("Removed {removed} cached items for {key}");
            Ok(())
        }
    }
}

fn build_controller(
    config: &Config,
    db: Database,
    ordering: FeedOrdering,
) -> Result<FeedCacheController> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("localfeed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let backend = Arc::new(
        HttpBackend::new(client, &config.backend_url, config.resolve_api_key())
            .with_context(|| format!("Invalid backend_url '{}'", config.backend_url))?
            .with_timeout(config.request_timeout()),
    );

    let scratch: Arc<dyn ScratchCleaner> = match &config.scratch_dir {
        Some(dir) => Arc::new(TempMediaDir::new(dir)),
        None => Arc::new(NoScratch),
    };

    let services = FeedServices {
        remote: backend.clone(),
        store: Arc::new(db),
        annotations: Arc::new(UserAnnotationCache::new(
            backend,
            config.annotation_cache_capacity,
        )),
        freshness: Arc::new(AppLifecycle::new()),
        scratch,
    };
    Ok(FeedCacheController::new(
        config.feed_settings(),
        ordering,
        services,
    ))
}

/// Initial load followed by `pages` simulated scrolls to the bottom.
async fn browse(
    controller: &FeedCacheController,
    db: &Database,
    key: &str,
    pages: usize,
) -> Result<()> {
    if let Err(e) = controller.initial_load(key).await {
        eprintln!("Load failed: {e}");
        eprintln!("Showing cached items.");
        return Ok(());
    }

    for _ in 0..pages {
        if !controller.status().has_more_content {
            break;
        }
        let visible = db
            .fetch_all(key, controller.ordering())
            .await
            .context("Failed to read cached items")?;
        let Some(last) = visible.last() else {
            break;
        };
        if let Err(e) = controller.load_more_if_needed(key, last, &visible).await {
            eprintln!("Loading more failed: {e}");
            break;
        }
    }
    Ok(())
}

async fn print_items(db: &Database, key: &str, ordering: FeedOrdering) -> Result<()> {
    let items = db
        .fetch_all(key, ordering)
        .await
        .context("Failed to read cached items")?;
    if items.is_empty() {
        println!("No cached items for {key}");
        return Ok(());
    }

    for item in &items {
        println!("{}", format_item(item));
    }
    println!("{} items ({ordering})", items.len());
    Ok(())
}

fn format_item(item: &FeedItem) -> String {
    let when = DateTime::from_timestamp(item.created_at, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown time".to_string());
    let author = item
        .annotation
        .as_ref()
        .map(|a| a.display_name.as_str())
        .unwrap_or("Unknown user");
    let media = if item.media_urls.is_empty() {
        String::new()
    } else {
        format!(" [{} media]", item.media_urls.len())
    };
    format!(
        "{when}  {author}  ({} likes, {} comments)  {}{media}",
        item.like_count, item.comment_count, item.body
    )
}
