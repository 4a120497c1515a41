use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use indoc::indoc;
use log::{info, warn};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};

use token_holders::{
    config::Config,
    metrics as telemetry,
    provider::{AnkrProvider, DEFAULT_CONTRACT_ADDRESS},
    tracker::{FetchState, HolderTracker, TrackerHandle, TrackerOptions},
    utils::setup_logger,
    view,
};

const LONG_ABOUT: &str = indoc! {"
    Looks up the holders of an ERC20 token through the Ankr Advanced API and
    prints them as a table.

    With --watch, further contract addresses are read from stdin, one per line;
    each new address triggers a new lookup and only the latest one is shown.
"};

#[derive(Parser)]
#[command(name = "token-holders", version, about = "ERC20 token holders viewer", long_about = LONG_ABOUT)]
struct Cli {
    /// Token contract address
    #[arg(default_value = DEFAULT_CONTRACT_ADDRESS)]
    address: String,

    /// Network to query (overrides BLOCKCHAIN)
    #[arg(long)]
    blockchain: Option<String>,

    /// Ankr API key
    #[arg(long, env = "ANKR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Give up on a lookup after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Also write the holders to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Keep reading contract addresses from stdin
    #[arg(long)]
    watch: bool,

    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    config.validate_all()?;
    setup_logger(config.level_filter()?)?;

    if let Some(port) = config.metrics_port {
        telemetry::install_exporter(port)?;
    }

    let provider = Arc::new(AnkrProvider::from_config(&config)?);
    let tracker = HolderTracker::spawn_with(provider, TrackerOptions::from(&config));
    let color = !cli.no_color;

    tracker.set_address(cli.address.as_str()).await?;
    let state = show(&tracker, color).await?;
    export(&cli, &cli.address, &state)?;

    if cli.watch {
        info!("Reading contract addresses from stdin");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let address = line.trim();
            if address.is_empty() {
                continue;
            }
            if tracker.set_address(address).await?.is_none() {
                continue;
            }
            let state = show(&tracker, color).await?;
            export(&cli, address, &state)?;
        }
    }

    tracker.shutdown();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(blockchain) = &cli.blockchain {
        config.blockchain = blockchain.clone();
    }
    if cli.api_key.is_some() {
        config.api_key = cli.api_key.clone();
    }
    if cli.timeout_secs.is_some() {
        config.request_timeout_secs = cli.timeout_secs;
    }
    Ok(config)
}

async fn show(tracker: &TrackerHandle, color: bool) -> Result<FetchState> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Loading...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let state = tracker.settled().await?;
    spinner.finish_and_clear();

    print!("{}", view::render(&state, color));
    Ok(state)
}

/// Writes the holders only when they belong to the address just requested.
fn export(cli: &Cli, requested: &str, state: &FetchState) -> Result<()> {
    let Some(path) = &cli.csv else {
        return Ok(());
    };
    match &state.address {
        Some(address) if address == requested => {
            view::export_csv(path, address, &state.holders)?;
            info!("Wrote {} holders to {}", state.holders.len(), path.display());
        }
        _ => warn!("No holders of {} to export to {}", requested, path.display()),
    }
    Ok(())
}
