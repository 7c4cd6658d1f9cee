//! Listing crawler CLI
//!
//! Local execution entry point.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use listing_crawler::{
    api,
    error::Result,
    models::Config,
    pipeline::CrawlJob,
    storage::{FileSessionStore, SessionStore},
};
use tokio_util::sync::CancellationToken;

/// Pause before retrying a run that failed to start.
const RETRY_AFTER_ERROR: Duration = Duration::from_secs(30);

/// Classified-ad crawler
#[derive(Parser, Debug)]
#[command(
    name = "listing-crawler",
    version,
    about = "Resilient classified-ad listing crawler"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl continuously, printing listings as JSON lines
    Crawl {
        /// Stop after a single run
        #[arg(long)]
        once: bool,
    },

    /// Single-shot run printing `{ success, message, ads, total_found }`
    Once {
        #[arg(long)]
        min_price: Option<u64>,

        #[arg(long)]
        max_price: Option<u64>,
    },

    /// Validate the configuration file
    Validate,

    /// Show effective configuration and session state
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, finishing the current step");
            token.cancel();
        }
    });
}

/// One job over all URLs. Listings go to stdout as they arrive.
async fn run_once(config: &Config, cancel: &CancellationToken) -> Result<usize> {
    let job = CrawlJob::from_config(config, cancel.clone())?;
    let mut pages = Box::pin(job.into_stream());
    let mut printed = 0;

    while let Some(page) = pages.next().await {
        for listing in &page.listings {
            println!("{}", serde_json::to_string(listing)?);
            printed += 1;
        }
    }
    Ok(printed)
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    api::apply_proxy_env(&mut config);
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Crawl { once } => {
            config.validate()?;
            log::debug!("Effective configuration: {:?}", config.redacted());

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            loop {
                let pause = match run_once(&config, &cancel).await {
                    Ok(count) => {
                        log::info!("Run complete, {} listings emitted", count);
                        config.crawler.pause_general()
                    }
                    Err(e) => {
                        log::error!("Run failed: {}", e);
                        RETRY_AFTER_ERROR
                    }
                };

                if once || cancel.is_cancelled() {
                    break;
                }
                log::info!("Next run in {:?}", pause);
                sleep_or_cancel(pause, &cancel).await;
                if cancel.is_cancelled() {
                    break;
                }
            }
        }

        Command::Once {
            min_price,
            max_price,
        } => {
            let request = api::ParseRequest {
                urls: config.urls.clone(),
                min_price,
                max_price,
            };
            let response = api::parse(&request, &config).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK ({} urls)", config.urls.len());
        }

        Command::Info => {
            let redacted = config.redacted();
            log::info!("Urls: {}", redacted.urls.len());
            log::info!(
                "Proxy: {}",
                redacted.proxy.proxy_string.as_deref().unwrap_or("none")
            );
            log::info!(
                "Rotation endpoints: {}",
                redacted.proxy.rotation_endpoints().len()
            );

            let store = FileSessionStore::new(config.session.store_path.clone());
            match store.load().await {
                Ok(Some(state)) => log::info!(
                    "Session: {} cookies at {}",
                    state.cookies.len(),
                    store.path().display()
                ),
                Ok(None) => log::info!("Session: none stored yet"),
                Err(e) => log::warn!("Session: unreadable ({})", e),
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
