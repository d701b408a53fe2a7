//! Spotlink connectivity daemon: streams market data and bridges engine
//! order flow to the exchange

#![deny(warnings)]
#![deny(clippy::all)]

use anyhow::{Context, Result};
use auth::Signer;
use clap::Parser;
use common::{ClientRequest, ClientResponse, MarketUpdate, PriceCache, TickerRegistry, TradingConfig};
use feeds::MarketDataConsumer;
use gateway::OrderGateway;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};

#[derive(Parser)]
#[command(name = "spotlink")]
#[command(about = "Exchange connectivity core: market data + order gateway")]
#[command(version)]
struct Cli {
    /// Trading configuration file (symbols, gateway, cache settings)
    #[arg(long, default_value = "config/trading.json")]
    config: PathBuf,

    /// Credential vault file
    #[arg(long, default_value = "config/vault.json")]
    vault: PathBuf,

    /// Queue capacity for engine-facing channels
    #[arg(long, default_value = "65536")]
    queue_capacity: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let cli = Cli::parse();

    let signer = Arc::new(Signer::from_vault(&cli.vault).context("loading credentials")?);
    let config = TradingConfig::from_file(&cli.config).context("loading trading config")?;
    let registry = Arc::new(TickerRegistry::new(config.tickers.clone()));
    let price_cache = Arc::new(PriceCache::new());

    let (market_tx, market_rx) = bus::bounded::<MarketUpdate>(cli.queue_capacity);
    let (request_tx, request_rx) = bus::bounded::<ClientRequest>(cli.queue_capacity);
    let (response_tx, response_rx) = bus::bounded::<ClientResponse>(cli.queue_capacity);
    // the engine owns the far ends of these queues; the daemon keeps the
    // producer side alive and drains what a co-located engine would consume
    let _request_tx = request_tx;

    let mut consumer = MarketDataConsumer::new(
        Arc::clone(&registry),
        config.use_testnet,
        market_tx,
        Arc::clone(&price_cache),
    );
    consumer.start().context("starting market-data consumer")?;

    let mut order_gateway = OrderGateway::new(
        &config,
        Arc::clone(&signer),
        Arc::clone(&registry),
        request_rx,
        response_tx,
        Arc::clone(&price_cache),
    )
    .context("building order gateway")?;
    order_gateway.start().context("starting order gateway")?;

    let market_drain = std::thread::Builder::new()
        .name("market-drain".to_string())
        .spawn(move || {
            let mut seen: u64 = 0;
            while let Ok(update) = market_rx.recv() {
                seen += 1;
                if seen % 10_000 == 0 {
                    debug!(seen, kind = ?update.kind, "market updates flowing");
                }
            }
        })
        .context("spawning market drain")?;

    let response_drain = std::thread::Builder::new()
        .name("response-drain".to_string())
        .spawn(move || {
            while let Ok(response) = response_rx.recv() {
                info!(
                    kind = ?response.kind,
                    client_order_id = %response.client_order_id,
                    market_order_id = %response.market_order_id,
                    "order response"
                );
            }
        })
        .context("spawning response drain")?;

    info!("spotlink running, press Ctrl+C to stop");
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?
        .block_on(tokio::signal::ctrl_c())
        .context("waiting for shutdown signal")?;

    info!("shutting down");
    order_gateway.stop();
    consumer.stop();
    // drain threads exit once the producers are gone
    drop(market_drain);
    drop(response_drain);
    info!("spotlink stopped");
    Ok(())
}
