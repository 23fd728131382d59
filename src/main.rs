use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use feedmill::{Config, Database, FeedService, Fetcher, IngestError, Shutdown, Worker};

#[derive(Parser, Debug)]
#[command(name = "feedmill", about = "Feed ingestion worker", version)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "feedmill.toml", global = true)]
    config: PathBuf,

    /// Database path (overrides `database_path` from the config file)
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ingestion worker until Ctrl-C or SIGTERM
    Run,
    /// Register a feed
    AddFeed {
        url: String,
        #[arg(long, default_value = "")]
        site_url: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List registered feeds
    ListFeeds,
    /// Ingest one feed now, regardless of when it was last fetched
    Refresh { feed_id: i64 },
    /// Show feeds that are due at the next tick
    Backlog {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Subscribe a user to a feed
    Subscribe {
        user_id: i64,
        feed_id: i64,
        #[arg(long)]
        title: Option<String>,
    },
    /// Remove a subscription
    Unsubscribe { user_id: i64, feed_id: i64 },
    /// Print a user's articles, newest first, as JSON lines
    Articles {
        user_id: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedmill=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(path) = args.database {
        config.database_path = path;
    }

    let db = Database::open_with(&config.database_path, config.max_connections)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;
    let fetcher = Fetcher::new(
        config.fetch_timeout(),
        config.max_feed_bytes,
        &config.user_agent,
    )
    .context("Failed to build HTTP client")?;
    let service = Arc::new(FeedService::new(db.clone(), fetcher));

    let result = run_command(args.command, &config, Arc::clone(&service)).await;
    db.close().await;
    result
}

async fn run_command(command: Command, config: &Config, service: Arc<FeedService>) -> Result<()> {
    match command {
        Command::Run => {
            let (trigger, shutdown) = Shutdown::new();
            tokio::spawn(async move {
                wait_for_signal().await;
                tracing::info!("Shutdown signal received");
                trigger.trigger();
            });

            let worker = Worker::new(service, config.poll_interval(), config.concurrency);
            worker.start(shutdown).await;
        }
        Command::AddFeed {
            url,
            site_url,
            title,
            description,
        } => {
            let feed = service
                .add_feed(&url, &site_url, &title, &description)
                .await
                .map_err(describe)?;
            println!("Added feed {}: {}", feed.id, feed.feed_url);
        }
        Command::ListFeeds => {
            for feed in service.list_feeds().await? {
                let fetched = feed
                    .last_fetched_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!("{}\t{}\t{}\t{}", feed.id, feed.title, feed.feed_url, fetched);
            }
        }
        Command::Refresh { feed_id } => {
            let feed = service.get_feed_by_id(feed_id).await.map_err(describe)?;
            let inserted = service
                .fetch_and_store_feed(&feed, &Shutdown::never())
                .await
                .with_context(|| format!("Failed to refresh {}", feed.feed_url))?;
            println!("{}: {} new articles", feed.feed_url, inserted);
        }
        Command::Backlog { limit } => {
            let limit = limit.unwrap_or(config.concurrency);
            let feeds = service
                .get_next_feeds_to_fetch(limit, config.poll_interval())
                .await?;
            if feeds.is_empty() {
                println!("No feeds are due");
            }
            for feed in feeds {
                println!("{}\t{}", feed.id, feed.feed_url);
            }
        }
        Command::Subscribe {
            user_id,
            feed_id,
            title,
        } => {
            let sub = service
                .subscribe_to_feed(user_id, feed_id, title.as_deref())
                .await
                .map_err(describe)?;
            println!(
                "User {} subscribed to feed {} as \"{}\"",
                sub.user_id, sub.feed_id, sub.custom_title
            );
        }
        Command::Unsubscribe { user_id, feed_id } => {
            service
                .unsubscribe_from_feed(user_id, feed_id)
                .await
                .map_err(describe)?;
            println!("User {} unsubscribed from feed {}", user_id, feed_id);
        }
        Command::Articles {
            user_id,
            offset,
            limit,
        } => {
            let articles = service
                .fetch_user_subscribed_feeds(user_id, offset, limit)
                .await?;
            for article in articles {
                println!("{}", serde_json::to_string(&article)?);
            }
        }
    }
    Ok(())
}

/// Operator-facing wording for the expected error kinds
fn describe(err: IngestError) -> anyhow::Error {
    match err {
        IngestError::NotFound => anyhow::anyhow!("No such feed or subscription"),
        IngestError::FeedAlreadyExists => anyhow::anyhow!("That feed URL is already registered"),
        IngestError::AlreadySubscribed => anyhow::anyhow!("User is already subscribed to that feed"),
        other => other.into(),
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}
