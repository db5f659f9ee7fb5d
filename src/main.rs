use anyhow::{bail, Context};
use investr::api::ApiClient;
use investr::cache::{DurableStore, NullStore};
use investr::config::AppConfig;
use investr::fetch::Loaded;
use investr::resources::{ResourceHub, COMPANIES_KEY, PORTFOLIO_KEY};
use investr::signals::BundleLoad;
use investr::symbol::normalize_symbol;
use serde_json::{json, Value};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments first so --help works without config
    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args);

    dotenvy::dotenv().ok();

    // stdout carries command output only
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    tracing::debug!(base_url = %config.api.base_url, cache_path = %config.cache.path.display(), "Configuration loaded");

    let api = ApiClient::new(&config.api)?;
    let hub = ResourceHub::new(api, open_durable_store(&config), &config.cache);

    let output = tokio::select! {
        result = run(&hub, &command) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, abandoning outstanding requests");
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Parsed command line
#[derive(Debug)]
struct Command {
    name: String,
    refresh: bool,
    symbol: Option<String>,
}

/// Parse command-line arguments
fn parse_args(args: &[String]) -> Command {
    let mut name = None;
    let mut refresh = false;
    let mut symbol = None;

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--refresh" | "-r" => refresh = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            flag if flag.starts_with('-') => {
                eprintln!("Unknown argument: {}", flag);
                print_usage();
                std::process::exit(1);
            }
            value if name.is_none() => name = Some(value.to_string()),
            value if symbol.is_none() => symbol = Some(value.to_string()),
            value => {
                eprintln!("Unexpected argument: {}", value);
                print_usage();
                std::process::exit(1);
            }
        }
    }

    let Some(name) = name else {
        print_usage();
        std::process::exit(1);
    };

    Command {
        name,
        refresh,
        symbol,
    }
}

/// Print usage information
fn print_usage() {
    println!("investr - cached access to portfolio holdings and company research");
    println!();
    println!("USAGE:");
    println!("    investr <COMMAND> [--refresh] [SYMBOL]");
    println!();
    println!("COMMANDS:");
    println!("    analysis <SYMBOL>     Investment thesis (cached, stale after 5 minutes)");
    println!("    signals <SYMBOL>      News sentiment, corporate events and earnings calls");
    println!("    financials <SYMBOL>   Standalone or consolidated financial statements");
    println!("    holdings              Brokerage holdings (cached until --refresh)");
    println!("    companies             Companies with published research");
    println!("    login                 Brokerage login URL");
    println!();
    println!("OPTIONS:");
    println!("    --refresh, -r         Bypass the cache and fetch again");
    println!("    --help, -h            Print this help message");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    API_BASE_URL            Backend base URL (default: http://localhost:8000)");
    println!("    API_TIMEOUT_SECS        Request timeout in seconds (default: 30)");
    println!("    API_RATE_LIMIT          Requests per minute (default: 600)");
    println!("    CACHE_PATH              Durable cache directory (default: ./data/cache)");
    println!("    ANALYSIS_STALE_SECS     Analysis staleness threshold (default: 300)");
    println!("    MEMORY_CACHE_CAPACITY   Analysis entries kept in memory (default: unbounded)");
    println!("    RUST_LOG                Logging level (default: info)");
}

#[cfg(feature = "rocksdb-store")]
fn open_durable_store(config: &AppConfig) -> Arc<dyn DurableStore> {
    match investr::cache::RocksStore::open(&config.cache.path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!(error = %err, path = %config.cache.path.display(), "Durable cache unavailable, using process cache only");
            Arc::new(NullStore)
        }
    }
}

#[cfg(not(feature = "rocksdb-store"))]
fn open_durable_store(_config: &AppConfig) -> Arc<dyn DurableStore> {
    tracing::info!("Built without rocksdb-store, using process cache only");
    Arc::new(NullStore)
}

fn require_symbol(command: &Command) -> anyhow::Result<String> {
    let Some(raw) = command.symbol.as_deref() else {
        bail!("'{}' needs a SYMBOL argument", command.name);
    };
    normalize_symbol(raw).with_context(|| format!("Invalid symbol: {:?}", raw))
}

async fn run(hub: &ResourceHub, command: &Command) -> anyhow::Result<Value> {
    match command.name.as_str() {
        "analysis" => {
            let symbol = require_symbol(command)?;
            let coordinator = hub.analysis_coordinator();
            let (source, data) = if command.refresh {
                ("fetched", coordinator.refresh(&symbol).await?)
            } else {
                let loaded = coordinator.load(&symbol).await?;
                (loaded_source(&loaded), loaded.into_payload())
            };
            // Let a background revalidation land in the cache before exit
            let mut state = coordinator.subscribe();
            if state.wait_for(|s| !s.loading).await.is_err() {
                tracing::debug!("Coordinator closed before revalidation finished");
            }
            Ok(json!({ "symbol": symbol, "source": source, "data": data }))
        }
        "holdings" => {
            let coordinator = hub.portfolio_coordinator();
            let (source, holdings) = if command.refresh {
                ("fetched", coordinator.refresh(PORTFOLIO_KEY).await?)
            } else {
                let loaded = coordinator.load(PORTFOLIO_KEY).await?;
                (loaded_source(&loaded), loaded.into_payload())
            };
            Ok(json!({
                "source": source,
                "portfolioLoaded": hub.portfolio_loaded(),
                "holdings": holdings,
            }))
        }
        "companies" => {
            let coordinator = hub.companies_coordinator();
            let (source, companies) = if command.refresh {
                ("fetched", coordinator.refresh(COMPANIES_KEY).await?)
            } else {
                let loaded = coordinator.load(COMPANIES_KEY).await?;
                (loaded_source(&loaded), loaded.into_payload())
            };
            Ok(json!({ "source": source, "companies": companies }))
        }
        "signals" => {
            let symbol = require_symbol(command)?;
            let aggregator = hub.signal_aggregator();
            match aggregator.load_bundle(&symbol, true).await? {
                BundleLoad::Ready(bundle) => {
                    if let Some(message) = bundle.error_message() {
                        tracing::warn!("{}", message);
                    }
                    Ok(serde_json::to_value(bundle.as_ref())?)
                }
                other => bail!("Signals not loaded: {:?}", other),
            }
        }
        "financials" => {
            let symbol = require_symbol(command)?;
            let financials = hub.api().financials(&symbol).await?;
            Ok(json!({ "symbol": symbol, "financials": financials }))
        }
        "login" => {
            let url = hub.api().login_url().await?;
            Ok(json!({ "login_url": url }))
        }
        other => {
            eprintln!("Invalid command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn loaded_source<T>(loaded: &Loaded<T>) -> &'static str {
    match loaded {
        Loaded::Fresh(_) => "fresh",
        Loaded::Stale(_) => "stale",
        Loaded::Fetched(_) => "fetched",
    }
}
