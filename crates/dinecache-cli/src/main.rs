//! dinecache - command-line host for the offline-first restaurant data layer.
//!
//! Runs the worker lifecycle against a real API and site, and exposes the
//! page-side reads so the cache can be inspected and exercised offline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dinecache_core::data::ALL;
use dinecache_core::net::Method;
use dinecache_core::worker::http_worker;
use dinecache_core::{
    Config, FeatureSupport, PageContext, Request, RestaurantId, ServiceWorker, SyncOutcome,
};

/// Offline-first restaurant data layer
#[derive(Parser, Debug)]
#[command(name = "dinecache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the restaurant API
    #[arg(long, global = true, env = "DINECACHE_API_URL")]
    api_url: Option<String>,

    /// Origin the site's static assets are served from
    #[arg(long, global = true, env = "DINECACHE_ORIGIN")]
    origin: Option<String>,

    /// Directory for the local database, the byte cache and logs
    #[arg(long, global = true, env = "DINECACHE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the worker: hand off the lazy-load choice, precache, activate
    Install {
        /// The device lacks IntersectionObserver; precache the compat script
        #[arg(long)]
        no_intersection_observer: bool,

        /// Images already rendered by the page, cached after install
        images: Vec<String>,
    },
    /// Remove stale cache generations
    Activate,
    /// Fetch a URL through the cache proxy
    Fetch {
        /// Site-relative path or absolute URL
        url: String,
    },
    /// List restaurants ("all" matches any)
    Restaurants {
        #[arg(default_value = ALL)]
        cuisine: String,
        #[arg(default_value = ALL)]
        neighborhood: String,
    },
    /// Show one restaurant with its reviews
    Restaurant { id: RestaurantId },
    /// Show reviews for a restaurant
    Reviews { id: RestaurantId },
    /// Mark or unmark a favorite
    Favorite {
        id: RestaurantId,
        #[arg(value_parser = parse_toggle, action = clap::ArgAction::Set)]
        state: bool,
    },
    /// List favorite restaurants
    Favorites,
    /// Show cache generations and entry ages
    Status,
}

fn parse_toggle(raw: &str) -> Result<bool, String> {
    match raw {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected on|off, got {}", other)),
    }
}

/// Initialize the tracing subscriber: stderr plus a daily log file.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    // RUST_LOG controls the level (e.g., RUST_LOG=dinecache_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_appender = tracing_appender::rolling::daily(log_dir, "dinecache.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(filter)
        .init();
    guard
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(ref url) = cli.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(ref origin) = cli.origin {
        config.origin = origin.clone();
    }
    if let Some(ref dir) = cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let data_dir = config.data_dir()?;
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let _guard = init_tracing(&log_dir);
    info!(command = ?cli.command, data_dir = %data_dir.display(), "dinecache starting");

    let worker = http_worker(config)?;
    let result = run(&worker, cli.command).await;
    // Background refreshes rewrite the store; let them finish before exit.
    worker.settle().await;
    result
}

async fn run(worker: &ServiceWorker, command: Commands) -> Result<()> {
    match command {
        Commands::Install {
            no_intersection_observer,
            images,
        } => {
            let page = PageContext {
                features: FeatureSupport {
                    intersection_observer: !no_intersection_observer,
                },
                rendered_images: images,
                controlled: false,
            };
            let registration = page.register(worker).await?;
            let report = &registration.install;
            println!("Cached {} assets into {}", report.cached.len(), report.generation);
            for (url, reason) in &report.failed {
                println!("  failed: {} ({})", url, reason);
            }
            if let Some(task) = registration.images {
                let images = task.await.context("Image caching task failed")?;
                println!("Cached {} of {} images", images.cached.len(), registration.images_posted);
                for (url, reason) in &images.failed {
                    println!("  failed: {} ({})", url, reason);
                }
            }
        }
        Commands::Activate => {
            let deleted = worker.activate().await?;
            if deleted.is_empty() {
                println!("No stale cache generations");
            }
            for generation in deleted {
                println!("Deleted {}", generation);
            }
        }
        Commands::Fetch { url } => {
            let url = worker.config().site_url(&url)?;
            let response = worker.fetch(Request::from_url(Method::GET, url)).await?;
            println!("{} {}", response.status, response.status_text);
            println!("{}", response.text_body());
        }
        Commands::Restaurants { cuisine, neighborhood } => {
            let restaurants = worker
                .data_client()
                .by_cuisine_and_neighborhood(&cuisine, &neighborhood)
                .await?;
            for restaurant in restaurants {
                println!(
                    "{:>4}  {}  ({}, {})",
                    restaurant.id, restaurant.name, restaurant.cuisine_type, restaurant.neighborhood
                );
            }
        }
        Commands::Restaurant { id } => {
            let restaurant = worker.data_client().fetch_restaurant_by_id(id).await?;
            println!("{}", serde_json::to_string_pretty(&restaurant)?);
        }
        Commands::Reviews { id } => {
            let reviews = worker.data_client().fetch_reviews(id).await?;
            println!("{}", serde_json::to_string_pretty(&reviews)?);
        }
        Commands::Favorite { id, state } => {
            let sync = worker.favorites().toggle(id, state).await;
            match sync.outcome().await {
                SyncOutcome::Confirmed => println!("Saved and synced"),
                SyncOutcome::Rejected { status } => println!("Saved locally; server answered {}", status),
                SyncOutcome::Failed(reason) => println!("Saved locally; not synced: {}", reason),
            }
        }
        Commands::Favorites => {
            for id in worker.favorites().favorites().await? {
                println!("{}", id);
            }
        }
        Commands::Status => {
            let caches = worker.caches();
            let now = Utc::now();
            for generation in caches.generations().await? {
                let current = generation == worker.proxy().generation();
                println!("{}{}", generation, if current { " (current)" } else { "" });
                if !current {
                    continue;
                }
                let cache = caches.open(&generation).await?;
                for key in cache.keys() {
                    if let Some(entry) = cache.entry(&key).await {
                        let minutes = (now - entry.cached_at).num_minutes();
                        println!("  {:>4}  {:>6}m  {}", entry.response.status, minutes, key.as_str());
                    }
                }
            }
        }
    }
    Ok(())
}
