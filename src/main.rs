use bingscraper::{Config, Scraper, StopReason, run_with_shutdown};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Download images for a search query from Bing image search.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Search query
    #[arg(short, long, required_unless_present = "config")]
    query: Option<String>,

    /// Root directory for saved images [default: ./images/]
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of results to request before stopping [default: 100]
    #[arg(long)]
    limit: Option<usize>,

    /// Maximum simultaneous image downloads [default: 20]
    #[arg(long)]
    threads: Option<usize>,

    /// Turn the provider's adult content filter off
    #[arg(long)]
    disable_adult_filter: bool,

    /// Query based filters, e.g. "+filterui:license-L1"
    #[arg(long)]
    filters: Option<String>,

    /// Directory for the tried URL list and image hash table [default: ./.bingscraper]
    #[arg(long)]
    tracker_dir: Option<PathBuf>,

    /// JSON config file; command line flags take precedence over its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> bingscraper::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_json(path)?,
            None => Config::default(),
        };

        if let Some(query) = self.query {
            config.query = query;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(limit) = self.limit {
            config.limit = limit;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if self.disable_adult_filter {
            config.adult_filter = false;
        }
        if let Some(filters) = self.filters {
            config.filters = filters;
        }
        if let Some(tracker_dir) = self.tracker_dir {
            config.tracker_dir = tracker_dir;
        }

        Ok(config)
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "bingscraper=info",
        1 => "bingscraper=debug",
        _ => "bingscraper=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, code = e.error_code(), "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let scraper = match Scraper::new(config).await {
        Ok(scraper) => scraper,
        Err(e) => {
            error!(error = %e, code = e.error_code(), "Failed to start scraper");
            return ExitCode::FAILURE;
        }
    };

    match run_with_shutdown(&scraper).await {
        Ok(summary) => {
            if summary.stop_reason == StopReason::Interrupted {
                info!("Tracker state saved after interrupt");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, code = e.error_code(), "Scrape failed");
            ExitCode::FAILURE
        }
    }
}
